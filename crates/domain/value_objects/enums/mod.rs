pub mod billing_intervals;
pub mod credit_transaction_kinds;
pub mod payment_statuses;
pub mod subscription_statuses;
pub mod user_roles;
pub mod user_statuses;
