#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub worker_server: WorkerServer,
    pub database: Database,
    pub scheduler: Scheduler,
}

#[derive(Debug, Clone)]
pub struct WorkerServer {
    pub port: u16,
    pub timeout: u64,
    pub body_limit: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

/// Cadence and bounds of the background sweeps.
#[derive(Debug, Clone)]
pub struct Scheduler {
    pub renewal_interval_secs: u64,
    pub expiry_interval_secs: u64,
    pub session_sweep_interval_secs: u64,
    /// Days a past_due subscription may linger before suspension.
    pub grace_days: i64,
    pub batch_size: i64,
}
