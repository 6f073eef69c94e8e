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
        repositories::{sessions::SessionRepository, users::UserRepository},
        value_objects::iam::{LoginModel, RefreshModel, RegisterUserModel},
    },
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{sessions::SessionPostgres, users::UserPostgres},
    },
};
use serde_json::json;

use crate::auth::AuthUser;
use crate::axum_http::error_responses::error_response;
use crate::config::config_model::DotEnvyConfig;
use crate::usecases::accounts::AccountUseCase;

pub fn routes(db_pool: Arc<PgPoolSquad>, config: Arc<DotEnvyConfig>) -> Router {
    let user_repository = UserPostgres::new(Arc::clone(&db_pool));
    let session_repository = SessionPostgres::new(Arc::clone(&db_pool));
    let accounts_usecase = AccountUseCase::new(
        Arc::new(user_repository),
        Arc::new(session_repository),
        config.auth.clone(),
    );

    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/me", get(me).delete(close_account))
        .with_state(Arc::new(accounts_usecase))
}

pub async fn register<U, S>(
    State(accounts_usecase): State<Arc<AccountUseCase<U, S>>>,
    Json(register_user_model): Json<RegisterUserModel>,
) -> impl IntoResponse
where
    U: UserRepository + Send + Sync + 'static,
    S: SessionRepository + Send + Sync + 'static,
{
    match accounts_usecase.register(register_user_model).await {
        Ok(user) => (StatusCode::CREATED, Json(user)).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn login<U, S>(
    State(accounts_usecase): State<Arc<AccountUseCase<U, S>>>,
    Json(login_model): Json<LoginModel>,
) -> impl IntoResponse
where
    U: UserRepository + Send + Sync + 'static,
    S: SessionRepository + Send + Sync + 'static,
{
    match accounts_usecase.login(login_model).await {
        Ok((user, tokens)) => {
            (StatusCode::OK, Json(json!({ "user": user, "tokens": tokens }))).into_response()
        }
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn refresh<U, S>(
    State(accounts_usecase): State<Arc<AccountUseCase<U, S>>>,
    Json(refresh_model): Json<RefreshModel>,
) -> impl IntoResponse
where
    U: UserRepository + Send + Sync + 'static,
    S: SessionRepository + Send + Sync + 'static,
{
    match accounts_usecase.refresh(&refresh_model.refresh_token).await {
        Ok(tokens) => (StatusCode::OK, Json(tokens)).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn logout<U, S>(
    State(accounts_usecase): State<Arc<AccountUseCase<U, S>>>,
    Json(refresh_model): Json<RefreshModel>,
) -> impl IntoResponse
where
    U: UserRepository + Send + Sync + 'static,
    S: SessionRepository + Send + Sync + 'static,
{
    match accounts_usecase.logout(&refresh_model.refresh_token).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn me<U, S>(
    State(accounts_usecase): State<Arc<AccountUseCase<U, S>>>,
    auth: AuthUser,
) -> impl IntoResponse
where
    U: UserRepository + Send + Sync + 'static,
    S: SessionRepository + Send + Sync + 'static,
{
    match accounts_usecase.me(auth.user_id).await {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn close_account<U, S>(
    State(accounts_usecase): State<Arc<AccountUseCase<U, S>>>,
    auth: AuthUser,
) -> impl IntoResponse
where
    U: UserRepository + Send + Sync + 'static,
    S: SessionRepository + Send + Sync + 'static,
{
    match accounts_usecase.close_account(auth.user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}
