pub mod accounts;
pub mod credits;
pub mod payments;
pub mod subscriptions;
