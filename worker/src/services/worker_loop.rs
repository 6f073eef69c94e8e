use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use crates::domain::repositories::{
    credits::CreditRepository, plans::PlanRepository, sessions::SessionRepository,
    subscriptions::SubscriptionRepository,
};
use tracing::{error, info};

use crate::usecases::{
    credit_expiry::CreditExpiryUseCase,
    subscription_renewal::{RenewalParams, SubscriptionRenewalUseCase},
};

pub async fn run_renewal_loop<S, P, C>(
    usecase: Arc<SubscriptionRenewalUseCase<S, P, C>>,
    params: RenewalParams,
    interval: Duration,
) -> Result<()>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    C: CreditRepository + Send + Sync + 'static,
{
    loop {
        if let Err(e) = usecase.run(&params).await {
            error!("Error while running subscription renewal sweep: {}", e);
        }

        tokio::time::sleep(interval).await;
    }
}

pub async fn run_credit_expiry_loop<C, S>(
    usecase: Arc<CreditExpiryUseCase<C, S>>,
    batch_size: i64,
    interval: Duration,
) -> Result<()>
where
    C: CreditRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    loop {
        if let Err(e) = usecase.run(batch_size).await {
            error!("Error while running credit expiry sweep: {}", e);
        }

        tokio::time::sleep(interval).await;
    }
}

pub async fn run_session_sweep_loop(
    session_repo: Arc<dyn SessionRepository + Send + Sync>,
    interval: Duration,
) -> Result<()> {
    loop {
        match session_repo.deactivate_expired(Utc::now()).await {
            Ok(0) => {}
            Ok(count) => info!(count, "session sweep: expired sessions deactivated"),
            Err(e) => error!("Error while sweeping expired sessions: {}", e),
        }

        tokio::time::sleep(interval).await;
    }
}
