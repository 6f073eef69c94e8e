use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
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
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthUser;
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
        .route("/:payment_id/refund", post(refund_payment))
        .with_state(Arc::new(payments_usecase))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub amount_minor: Option<i32>,
}

pub async fn refund_payment<P, S, Pl, C, G>(
    State(payments_usecase): State<Arc<PaymentUseCase<P, S, Pl, C, G>>>,
    auth: AuthUser,
    Path(payment_id): Path<Uuid>,
    Json(refund_request): Json<RefundRequest>,
) -> impl IntoResponse
where
    P: PaymentRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    Pl: PlanRepository + Send + Sync + 'static,
    C: CreditRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    if auth.role != "admin" {
        return error_response(
            StatusCode::FORBIDDEN,
            "refunds require the admin role".to_string(),
        );
    }

    match payments_usecase
        .refund(payment_id, refund_request.amount_minor)
        .await
    {
        Ok(refunded_minor) => {
            (StatusCode::OK, Json(json!({ "refunded_minor": refunded_minor }))).into_response()
        }
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}
