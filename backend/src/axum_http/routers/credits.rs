use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use crates::{
    domain::repositories::{credits::CreditRepository, subscriptions::SubscriptionRepository},
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{credits::CreditPostgres, subscriptions::SubscriptionPostgres},
    },
};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::axum_http::error_responses::error_response;
use crate::usecases::credits::CreditUseCase;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

pub fn routes(db_pool: Arc<PgPoolSquad>) -> Router {
    let credit_repository = CreditPostgres::new(Arc::clone(&db_pool));
    let subscription_repository = SubscriptionPostgres::new(Arc::clone(&db_pool));
    let credits_usecase = CreditUseCase::new(
        Arc::new(credit_repository),
        Arc::new(subscription_repository),
    );

    Router::new()
        .route("/balance", get(balance))
        .route("/consume", post(consume))
        .route("/transactions", get(list_transactions))
        .with_state(Arc::new(credits_usecase))
}

#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    pub amount: i64,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn balance<C, S>(
    State(credits_usecase): State<Arc<CreditUseCase<C, S>>>,
    auth: AuthUser,
) -> impl IntoResponse
where
    C: CreditRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    match credits_usecase.balance(auth.user_id).await {
        Ok(balance) => (StatusCode::OK, Json(balance)).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn consume<C, S>(
    State(credits_usecase): State<Arc<CreditUseCase<C, S>>>,
    auth: AuthUser,
    Json(consume_request): Json<ConsumeRequest>,
) -> impl IntoResponse
where
    C: CreditRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    match credits_usecase
        .consume(
            auth.user_id,
            consume_request.amount,
            consume_request.description,
        )
        .await
    {
        Ok(balance) => (StatusCode::OK, Json(balance)).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn list_transactions<C, S>(
    State(credits_usecase): State<Arc<CreditUseCase<C, S>>>,
    auth: AuthUser,
    Query(query): Query<TransactionsQuery>,
) -> impl IntoResponse
where
    C: CreditRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    match credits_usecase
        .list_transactions(auth.user_id, limit, offset)
        .await
    {
        Ok(transactions) => (StatusCode::OK, Json(transactions)).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}
