pub mod credit_expiry;
pub mod subscription_renewal;
