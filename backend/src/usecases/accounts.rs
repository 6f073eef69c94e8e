use std::sync::Arc;

use chrono::{Duration, Utc};
use crates::domain::{
    entities::sessions::InsertSessionEntity,
    repositories::{sessions::SessionRepository, users::UserRepository},
    value_objects::{
        enums::user_statuses::UserStatus,
        iam::{AuthTokens, LoginModel, RegisterUserModel, UserModel},
    },
};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{self, password};
use crate::config::config_model::AuthConfig;

const MIN_PASSWORD_LENGTH: usize = 8;
const MIN_USERNAME_LENGTH: usize = 3;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("email is already registered")]
    EmailTaken,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("account is temporarily locked")]
    AccountLocked,
    #[error("account is blocked")]
    AccountBlocked,
    #[error("invalid or expired refresh token")]
    InvalidRefreshToken,
    #[error("user not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AccountError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            AccountError::Validation(_) => StatusCode::BAD_REQUEST,
            AccountError::EmailTaken => StatusCode::CONFLICT,
            AccountError::InvalidCredentials | AccountError::InvalidRefreshToken => {
                StatusCode::UNAUTHORIZED
            }
            AccountError::AccountLocked | AccountError::AccountBlocked => StatusCode::FORBIDDEN,
            AccountError::NotFound => StatusCode::NOT_FOUND,
            AccountError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type AccountResult<T> = std::result::Result<T, AccountError>;

pub struct AccountUseCase<U, S>
where
    U: UserRepository + Send + Sync + 'static,
    S: SessionRepository + Send + Sync + 'static,
{
    user_repo: Arc<U>,
    session_repo: Arc<S>,
    auth_config: AuthConfig,
}

impl<U, S> AccountUseCase<U, S>
where
    U: UserRepository + Send + Sync + 'static,
    S: SessionRepository + Send + Sync + 'static,
{
    pub fn new(user_repo: Arc<U>, session_repo: Arc<S>, auth_config: AuthConfig) -> Self {
        Self {
            user_repo,
            session_repo,
            auth_config,
        }
    }

    pub async fn register(&self, model: RegisterUserModel) -> AccountResult<UserModel> {
        let email = model.email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(AccountError::Validation("email is malformed".to_string()));
        }
        if model.username.trim().len() < MIN_USERNAME_LENGTH {
            return Err(AccountError::Validation(format!(
                "username must be at least {MIN_USERNAME_LENGTH} characters"
            )));
        }
        password::validate_password_strength(&model.password, MIN_PASSWORD_LENGTH)
            .map_err(AccountError::Validation)?;

        if self
            .user_repo
            .find_by_email(&email)
            .await
            .map_err(AccountError::Internal)?
            .is_some()
        {
            warn!(email = %email, "accounts: registration with taken email");
            return Err(AccountError::EmailTaken);
        }

        let password_hash = password::hash_password(&model.password)
            .map_err(|e| AccountError::Internal(anyhow::anyhow!("password hashing failed: {e}")))?;

        let user_id = self
            .user_repo
            .register(model.to_entity(password_hash))
            .await
            .map_err(AccountError::Internal)?;

        info!(%user_id, "accounts: user registered");

        let user = self
            .user_repo
            .find_by_id(user_id)
            .await
            .map_err(AccountError::Internal)?
            .ok_or(AccountError::NotFound)?;

        Ok(UserModel::from(&user))
    }

    pub async fn login(&self, model: LoginModel) -> AccountResult<(UserModel, AuthTokens)> {
        let email = model.email.trim().to_lowercase();
        let now = Utc::now();

        let user = self
            .user_repo
            .find_by_email(&email)
            .await
            .map_err(AccountError::Internal)?
            .ok_or(AccountError::InvalidCredentials)?;

        if UserStatus::from_str(&user.status) == UserStatus::Blocked {
            warn!(user_id = %user.id, "accounts: blocked account login attempt");
            return Err(AccountError::AccountBlocked);
        }
        if user.is_locked(now) {
            warn!(user_id = %user.id, "accounts: locked account login attempt");
            return Err(AccountError::AccountLocked);
        }

        let verified = password::verify_password(&model.password, &user.password_hash)
            .map_err(|e| AccountError::Internal(anyhow::anyhow!("password verify failed: {e}")))?;

        if !verified {
            // Lock the account once the failure counter reaches the limit.
            let will_lock = user.login_attempts + 1 >= self.auth_config.max_login_attempts;
            let locked_until =
                will_lock.then(|| now + Duration::minutes(self.auth_config.lockout_mins));

            let attempts = self
                .user_repo
                .record_login_failure(user.id, locked_until)
                .await
                .map_err(AccountError::Internal)?;

            warn!(
                user_id = %user.id,
                attempts,
                locked = will_lock,
                "accounts: failed login attempt"
            );

            return if will_lock {
                Err(AccountError::AccountLocked)
            } else {
                Err(AccountError::InvalidCredentials)
            };
        }

        self.user_repo
            .reset_login_attempts(user.id)
            .await
            .map_err(AccountError::Internal)?;

        let tokens = self.open_session(user.id, &user.role, user.email.clone()).await?;

        info!(user_id = %user.id, "accounts: login succeeded");
        Ok((UserModel::from(&user), tokens))
    }

    pub async fn refresh(&self, refresh_token: &str) -> AccountResult<AuthTokens> {
        let now = Utc::now();
        let refresh_token_hash = password::hash_token(refresh_token);

        let session = self
            .session_repo
            .find_active_by_refresh_token_hash(&refresh_token_hash)
            .await
            .map_err(AccountError::Internal)?
            .ok_or(AccountError::InvalidRefreshToken)?;

        if !session.is_valid(now) {
            self.session_repo
                .deactivate(session.id)
                .await
                .map_err(AccountError::Internal)?;
            return Err(AccountError::InvalidRefreshToken);
        }

        let user = self
            .user_repo
            .find_by_id(session.user_id)
            .await
            .map_err(AccountError::Internal)?
            .ok_or(AccountError::InvalidRefreshToken)?;

        if UserStatus::from_str(&user.status) != UserStatus::Active {
            return Err(AccountError::InvalidRefreshToken);
        }

        let (access_token, expires_at) =
            auth::generate_access_token(user.id, &user.role, Some(user.email.clone()), &self.auth_config)
                .map_err(|e| AccountError::Internal(e.into_inner()))?;
        let new_refresh_token = password::generate_opaque_token();

        self.session_repo
            .rotate_tokens(
                session.id,
                password::hash_token(&access_token),
                password::hash_token(&new_refresh_token),
                now + Duration::days(self.auth_config.refresh_token_ttl_days),
            )
            .await
            .map_err(AccountError::Internal)?;

        Ok(AuthTokens {
            access_token,
            refresh_token: new_refresh_token,
            expires_at,
        })
    }

    pub async fn logout(&self, refresh_token: &str) -> AccountResult<()> {
        let refresh_token_hash = password::hash_token(refresh_token);

        if let Some(session) = self
            .session_repo
            .find_active_by_refresh_token_hash(&refresh_token_hash)
            .await
            .map_err(AccountError::Internal)?
        {
            self.session_repo
                .deactivate(session.id)
                .await
                .map_err(AccountError::Internal)?;
            info!(session_id = %session.id, "accounts: session closed");
        }

        Ok(())
    }

    /// Soft delete: the row is tombstoned, never removed, so ledger and
    /// payment history keep their referential integrity.
    pub async fn close_account(&self, user_id: Uuid) -> AccountResult<()> {
        let user = self
            .user_repo
            .find_by_id(user_id)
            .await
            .map_err(AccountError::Internal)?
            .ok_or(AccountError::NotFound)?;

        self.user_repo
            .tombstone(user.id)
            .await
            .map_err(AccountError::Internal)?;

        let sessions_closed = self
            .session_repo
            .deactivate_all_for_user(user.id)
            .await
            .map_err(AccountError::Internal)?;

        info!(%user_id, sessions_closed, "accounts: account closed");
        Ok(())
    }

    pub async fn me(&self, user_id: Uuid) -> AccountResult<UserModel> {
        let user = self
            .user_repo
            .find_by_id(user_id)
            .await
            .map_err(AccountError::Internal)?
            .ok_or(AccountError::NotFound)?;

        Ok(UserModel::from(&user))
    }

    async fn open_session(
        &self,
        user_id: Uuid,
        role: &str,
        email: String,
    ) -> AccountResult<AuthTokens> {
        let now = Utc::now();
        let (access_token, expires_at) =
            auth::generate_access_token(user_id, role, Some(email), &self.auth_config)
                .map_err(|e| AccountError::Internal(e.into_inner()))?;
        let refresh_token = password::generate_opaque_token();

        self.session_repo
            .create(InsertSessionEntity {
                user_id,
                token_hash: password::hash_token(&access_token),
                refresh_token_hash: password::hash_token(&refresh_token),
                expires_at: now + Duration::days(self.auth_config.refresh_token_ttl_days),
                last_activity_at: now,
                is_active: true,
            })
            .await
            .map_err(AccountError::Internal)?;

        Ok(AuthTokens {
            access_token,
            refresh_token,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crates::domain::{
        entities::users::UserEntity,
        repositories::{sessions::MockSessionRepository, users::MockUserRepository},
        value_objects::enums::user_roles::UserRole,
    };
    use mockall::predicate::eq;

    fn test_auth_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "unit-test-secret".to_string(),
            access_token_ttl_mins: 15,
            refresh_token_ttl_days: 7,
            max_login_attempts: 5,
            lockout_mins: 15,
        }
    }

    fn sample_user(email: &str, password: &str, login_attempts: i32) -> UserEntity {
        let now = Utc::now();
        UserEntity {
            id: Uuid::new_v4(),
            email: email.to_string(),
            username: "tester".to_string(),
            password_hash: password::hash_password(password).unwrap(),
            role: UserRole::User.to_string(),
            status: UserStatus::Active.to_string(),
            login_attempts,
            locked_until: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn register_rejects_taken_email() {
        let mut user_repo = MockUserRepository::new();
        let session_repo = MockSessionRepository::new();

        let existing = sample_user("taken@example.com", "somepassword", 0);
        user_repo
            .expect_find_by_email()
            .with(eq("taken@example.com"))
            .returning(move |_| {
                let existing = existing.clone();
                Box::pin(async move { Ok(Some(existing)) })
            });

        let usecase = AccountUseCase::new(
            Arc::new(user_repo),
            Arc::new(session_repo),
            test_auth_config(),
        );

        let result = usecase
            .register(RegisterUserModel {
                email: "taken@example.com".to_string(),
                username: "tester".to_string(),
                password: "longenoughpassword".to_string(),
            })
            .await;

        assert!(matches!(result, Err(AccountError::EmailTaken)));
    }

    #[tokio::test]
    async fn register_rejects_weak_password() {
        let user_repo = MockUserRepository::new();
        let session_repo = MockSessionRepository::new();

        let usecase = AccountUseCase::new(
            Arc::new(user_repo),
            Arc::new(session_repo),
            test_auth_config(),
        );

        let result = usecase
            .register(RegisterUserModel {
                email: "new@example.com".to_string(),
                username: "tester".to_string(),
                password: "short".to_string(),
            })
            .await;

        assert!(matches!(result, Err(AccountError::Validation(_))));
    }

    #[tokio::test]
    async fn login_success_resets_attempts_and_opens_session() {
        let mut user_repo = MockUserRepository::new();
        let mut session_repo = MockSessionRepository::new();

        let user = sample_user("user@example.com", "correct-password", 2);
        let user_id = user.id;

        user_repo
            .expect_find_by_email()
            .with(eq("user@example.com"))
            .returning(move |_| {
                let user = user.clone();
                Box::pin(async move { Ok(Some(user)) })
            });
        user_repo
            .expect_reset_login_attempts()
            .with(eq(user_id))
            .times(1)
            .returning(|_| Box::pin(async { Ok(()) }));
        session_repo
            .expect_create()
            .times(1)
            .returning(|_| Box::pin(async { Ok(Uuid::new_v4()) }));

        let usecase = AccountUseCase::new(
            Arc::new(user_repo),
            Arc::new(session_repo),
            test_auth_config(),
        );

        let (user_model, tokens) = usecase
            .login(LoginModel {
                email: "user@example.com".to_string(),
                password: "correct-password".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(user_model.id, user_id);
        assert!(!tokens.access_token.is_empty());
        assert!(!tokens.refresh_token.is_empty());
    }

    #[tokio::test]
    async fn fifth_failed_login_locks_the_account() {
        let mut user_repo = MockUserRepository::new();
        let session_repo = MockSessionRepository::new();

        // Four failures already on record; this one is the fifth.
        let user = sample_user("user@example.com", "correct-password", 4);
        let user_id = user.id;

        user_repo
            .expect_find_by_email()
            .returning(move |_| {
                let user = user.clone();
                Box::pin(async move { Ok(Some(user)) })
            });
        user_repo
            .expect_record_login_failure()
            .withf(move |id, locked_until| *id == user_id && locked_until.is_some())
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(5) }));

        let usecase = AccountUseCase::new(
            Arc::new(user_repo),
            Arc::new(session_repo),
            test_auth_config(),
        );

        let result = usecase
            .login(LoginModel {
                email: "user@example.com".to_string(),
                password: "wrong-password".to_string(),
            })
            .await;

        assert!(matches!(result, Err(AccountError::AccountLocked)));
    }

    #[tokio::test]
    async fn login_on_locked_account_is_rejected() {
        let mut user_repo = MockUserRepository::new();
        let session_repo = MockSessionRepository::new();

        let mut user = sample_user("user@example.com", "correct-password", 5);
        user.locked_until = Some(Utc::now() + Duration::minutes(10));

        user_repo.expect_find_by_email().returning(move |_| {
            let user = user.clone();
            Box::pin(async move { Ok(Some(user)) })
        });

        let usecase = AccountUseCase::new(
            Arc::new(user_repo),
            Arc::new(session_repo),
            test_auth_config(),
        );

        let result = usecase
            .login(LoginModel {
                email: "user@example.com".to_string(),
                password: "correct-password".to_string(),
            })
            .await;

        assert!(matches!(result, Err(AccountError::AccountLocked)));
    }

    #[tokio::test]
    async fn refresh_with_unknown_token_is_rejected() {
        let user_repo = MockUserRepository::new();
        let mut session_repo = MockSessionRepository::new();

        session_repo
            .expect_find_active_by_refresh_token_hash()
            .returning(|_| Box::pin(async { Ok(None) }));

        let usecase = AccountUseCase::new(
            Arc::new(user_repo),
            Arc::new(session_repo),
            test_auth_config(),
        );

        let result = usecase.refresh("unknown-token").await;
        assert!(matches!(result, Err(AccountError::InvalidRefreshToken)));
    }
}
