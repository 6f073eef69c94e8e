use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use crates::{
    domain::{
        repositories::{
            payments::PaymentRepository, plans::PlanRepository,
            subscriptions::SubscriptionRepository,
        },
        value_objects::subscriptions::{
            CancelSubscriptionRequest, CreateCheckoutRequest, CreateCheckoutResponse,
        },
    },
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{
            payments::PaymentPostgres, plans::PlanPostgres, subscriptions::SubscriptionPostgres,
        },
    },
    payments::stripe_client::StripeClient,
};

use crate::auth::AuthUser;
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
        .route("/current", get(current_subscription))
        .route("/checkout", post(start_checkout))
        .route("/cancel", post(cancel_subscription))
        .with_state(Arc::new(subscriptions_usecase))
}

pub async fn current_subscription<P, S, Pay, Stripe>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<P, S, Pay, Stripe>>>,
    auth: AuthUser,
) -> impl IntoResponse
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    Pay: PaymentRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    match subscriptions_usecase.current_subscription(auth.user_id).await {
        Ok(subscription) => (StatusCode::OK, Json(subscription)).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn start_checkout<P, S, Pay, Stripe>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<P, S, Pay, Stripe>>>,
    auth: AuthUser,
    Json(create_checkout_request): Json<CreateCheckoutRequest>,
) -> impl IntoResponse
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    Pay: PaymentRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    match subscriptions_usecase
        .start_checkout(auth.user_id, create_checkout_request)
        .await
    {
        Ok(checkout_url) => {
            (StatusCode::OK, Json(CreateCheckoutResponse { checkout_url })).into_response()
        }
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn cancel_subscription<P, S, Pay, Stripe>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<P, S, Pay, Stripe>>>,
    auth: AuthUser,
    Json(cancel_request): Json<CancelSubscriptionRequest>,
) -> impl IntoResponse
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    Pay: PaymentRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    match subscriptions_usecase
        .cancel(auth.user_id, cancel_request.reason)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}
