use anyhow::Result;

use super::config_model::{AuthConfig, BackendServer, Database, DotEnvyConfig, StripeConfig};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let backend_server = BackendServer {
        port: std::env::var("SERVER_PORT_BACKEND")
            .expect("SERVER_PORT_BACKEND is invalid")
            .parse()?,
        body_limit: std::env::var("SERVER_BODY_LIMIT")
            .expect("SERVER_BODY_LIMIT is invalid")
            .parse()?,
        timeout: std::env::var("SERVER_TIMEOUT")
            .expect("SERVER_TIMEOUT is invalid")
            .parse()?,
    };

    let database = Database {
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL is invalid"),
    };

    let auth = get_auth_config()?;

    let stripe = StripeConfig {
        secret_key: std::env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY is invalid"),
        webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
            .expect("STRIPE_WEBHOOK_SECRET is invalid"),
        success_url: std::env::var("STRIPE_SUCCESS_URL").expect("STRIPE_SUCCESS_URL is invalid"),
        cancel_url: std::env::var("STRIPE_CANCEL_URL").expect("STRIPE_CANCEL_URL is invalid"),
    };

    Ok(DotEnvyConfig {
        backend_server,
        database,
        auth,
        stripe,
    })
}

pub fn get_auth_config() -> Result<AuthConfig> {
    dotenvy::dotenv().ok();

    Ok(AuthConfig {
        jwt_secret: std::env::var("JWT_SECRET").expect("JWT_SECRET is invalid"),
        access_token_ttl_mins: std::env::var("JWT_ACCESS_TTL_MINS")
            .unwrap_or_else(|_| "15".to_string())
            .parse()?,
        refresh_token_ttl_days: std::env::var("JWT_REFRESH_TTL_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()?,
        max_login_attempts: std::env::var("AUTH_MAX_LOGIN_ATTEMPTS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()?,
        lockout_mins: std::env::var("AUTH_LOCKOUT_MINS")
            .unwrap_or_else(|_| "15".to_string())
            .parse()?,
    })
}
