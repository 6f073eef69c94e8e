pub mod credits;
pub mod payments;
pub mod plans;
pub mod sessions;
pub mod subscriptions;
pub mod users;
