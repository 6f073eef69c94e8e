use anyhow::Result;

use super::config_model::{Database, DotEnvyConfig, Scheduler, WorkerServer};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let worker_server = WorkerServer {
        port: std::env::var("SERVER_PORT_WORKER")
            .expect("SERVER_PORT_WORKER is invalid")
            .parse()?,
        timeout: std::env::var("SERVER_TIMEOUT")
            .unwrap_or_else(|_| "30".to_string())
            .parse()?,
        body_limit: std::env::var("SERVER_BODY_LIMIT")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?,
    };

    let database = Database {
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL is invalid"),
    };

    let scheduler = Scheduler {
        renewal_interval_secs: std::env::var("RENEWAL_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()?,
        expiry_interval_secs: std::env::var("EXPIRY_INTERVAL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()?,
        session_sweep_interval_secs: std::env::var("SESSION_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()?,
        grace_days: std::env::var("RENEWAL_GRACE_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()?,
        batch_size: std::env::var("RENEWAL_BATCH_SIZE")
            .unwrap_or_else(|_| "100".to_string())
            .parse()?,
    };

    Ok(DotEnvyConfig {
        worker_server,
        database,
        scheduler,
    })
}
