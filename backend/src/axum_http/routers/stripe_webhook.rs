use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use crates::{
    domain::repositories::{
        credits::CreditRepository, payments::PaymentRepository, plans::PlanRepository,
        subscriptions::SubscriptionRepository,
    },
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{
            credits::CreditPostgres, payments::PaymentPostgres, plans::PlanPostgres,
            subscriptions::SubscriptionPostgres,
        },
    },
    payments::stripe_client::StripeClient,
};
use tracing::warn;

use crate::axum_http::error_responses::error_response;
use crate::config::config_model::DotEnvyConfig;
use crate::usecases::payments::{PaymentUseCase, StripeGateway};

pub fn routes(db_pool: Arc<PgPoolSquad>, config: Arc<DotEnvyConfig>) -> Router {
    let payment_repository = PaymentPostgres::new(Arc::clone(&db_pool));
    let subscription_repository = SubscriptionPostgres::new(Arc::clone(&db_pool));
    let plan_repository = PlanPostgres::new(Arc::clone(&db_pool));
    let credit_repository = CreditPostgres::new(Arc::clone(&db_pool));
    let stripe_client = StripeClient::new(
        config.stripe.secret_key.clone(),
        config.stripe.webhook_secret.clone(),
        config.stripe.success_url.clone(),
        config.stripe.cancel_url.clone(),
    );
    let payments_usecase = PaymentUseCase::new(
        Arc::new(payment_repository),
        Arc::new(subscription_repository),
        Arc::new(plan_repository),
        Arc::new(credit_repository),
        Arc::new(stripe_client),
    );

    Router::new()
        .route("/", post(handle_webhook))
        .with_state(Arc::new(payments_usecase))
}

pub async fn handle_webhook<P, S, Pl, C, G>(
    State(payments_usecase): State<Arc<PaymentUseCase<P, S, Pl, C, G>>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse
where
    P: PaymentRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    Pl: PlanRepository + Send + Sync + 'static,
    C: CreditRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
    else {
        warn!("stripe webhook without signature header");
        return error_response(
            StatusCode::BAD_REQUEST,
            "missing stripe-signature header".to_string(),
        );
    };

    match payments_usecase.handle_stripe_webhook(&body, signature).await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}
