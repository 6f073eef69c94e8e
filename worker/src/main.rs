use anyhow::Result;
use crates::domain::repositories::sessions::SessionRepository;
use crates::infra::db::{
    postgres::postgres_connection,
    repositories::{
        credits::CreditPostgres, plans::PlanPostgres, sessions::SessionPostgres,
        subscriptions::SubscriptionPostgres,
    },
};
use std::{sync::Arc, time::Duration};
use tracing::{error, info};
use worker::{
    axum_http, config,
    services::worker_loop,
    usecases::{
        credit_expiry::CreditExpiryUseCase,
        subscription_renewal::{RenewalParams, SubscriptionRenewalUseCase},
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(error) = run().await {
        error!("Worker exited with error: {}", error);
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    crates::observability::init_observability("worker")?;

    let dotenvy_env = Arc::new(config::config_loader::load()?);
    info!("ENV has been loaded");

    let postgres_pool = postgres_connection::establish_connection(&dotenvy_env.database.url)?;
    info!("Postgres connection has been established");

    let db_pool_arc = Arc::new(postgres_pool);

    let subscription_repository = Arc::new(SubscriptionPostgres::new(Arc::clone(&db_pool_arc)));
    let plan_repository = Arc::new(PlanPostgres::new(Arc::clone(&db_pool_arc)));
    let credit_repository = Arc::new(CreditPostgres::new(Arc::clone(&db_pool_arc)));
    let session_repository: Arc<dyn SessionRepository + Send + Sync> =
        Arc::new(SessionPostgres::new(Arc::clone(&db_pool_arc)));

    let renewal_usecase = Arc::new(SubscriptionRenewalUseCase::new(
        Arc::clone(&subscription_repository),
        Arc::clone(&plan_repository),
        Arc::clone(&credit_repository),
    ));
    let expiry_usecase = Arc::new(CreditExpiryUseCase::new(
        Arc::clone(&credit_repository),
        Arc::clone(&subscription_repository),
    ));

    let scheduler = &dotenvy_env.scheduler;
    let renewal_params = RenewalParams {
        grace_days: scheduler.grace_days,
        batch_size: scheduler.batch_size,
    };

    info!("Worker started");

    let renewal_loop = tokio::spawn(worker_loop::run_renewal_loop(
        renewal_usecase,
        renewal_params,
        Duration::from_secs(scheduler.renewal_interval_secs),
    ));

    let expiry_batch = scheduler.batch_size;
    let expiry_loop = tokio::spawn(worker_loop::run_credit_expiry_loop(
        expiry_usecase,
        expiry_batch,
        Duration::from_secs(scheduler.expiry_interval_secs),
    ));

    let session_sweep_loop = tokio::spawn(worker_loop::run_session_sweep_loop(
        session_repository,
        Duration::from_secs(scheduler.session_sweep_interval_secs),
    ));

    let health_server = tokio::spawn(axum_http::http_serve::start(Arc::clone(&dotenvy_env)));

    tokio::select! {
        result = renewal_loop => result??,
        result = expiry_loop => result??,
        result = session_sweep_loop => result??,
        result = health_server => result??,
    };

    Ok(())
}
