use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use crates::{
    domain::repositories::{
        payments::PaymentRepository, plans::PlanRepository, subscriptions::SubscriptionRepository,
    },
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{
            payments::PaymentPostgres, plans::PlanPostgres, subscriptions::SubscriptionPostgres,
        },
    },
    payments::stripe_client::StripeClient,
};

use crate::axum_http::error_responses::error_response;
use crate::config::config_model::DotEnvyConfig;
use crate::usecases::payments::StripeGateway;
use crate::usecases::subscriptions::SubscriptionUseCase;

pub fn routes(db_pool: Arc<PgPoolSquad>, config: Arc<DotEnvyConfig>) -> Router {
    let plan_repository = PlanPostgres::new(Arc::clone(&db_pool));
    let subscription_repository = SubscriptionPostgres::new(Arc::clone(&db_pool));
    let payment_repository = PaymentPostgres::new(Arc::clone(&db_pool));
    let stripe_client = StripeClient::new(
        config.stripe.secret_key.clone(),
        config.stripe.webhook_secret.clone(),
        config.stripe.success_url.clone(),
        config.stripe.cancel_url.clone(),
    );
    let subscriptions_usecase = SubscriptionUseCase::new(
        Arc::new(plan_repository),
        Arc::new(subscription_repository),
        Arc::new(payment_repository),
        Arc::new(stripe_client),
    );

    Router::new()
        .route("/", get(list_plans))
        .with_state(Arc::new(subscriptions_usecase))
}

pub async fn list_plans<P, S, Pay, Stripe>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<P, S, Pay, Stripe>>>,
) -> impl IntoResponse
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    Pay: PaymentRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    match subscriptions_usecase.list_plans().await {
        Ok(plans) => (StatusCode::OK, Json(plans)).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}
