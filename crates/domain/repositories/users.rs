use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::users::{RegisterUserEntity, UserEntity};

#[async_trait]
#[automock]
pub trait UserRepository {
    async fn register(&self, register_user_entity: RegisterUserEntity) -> Result<Uuid>;

    /// Tombstoned users are filtered out.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserEntity>>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserEntity>>;

    /// Bumps the failure counter and, when the caller decided so, sets the
    /// lock-out timestamp.
    async fn record_login_failure(
        &self,
        user_id: Uuid,
        locked_until: Option<DateTime<Utc>>,
    ) -> Result<i32>;

    async fn reset_login_attempts(&self, user_id: Uuid) -> Result<()>;

    /// Soft delete: stamps `deleted_at` and flips the status, never removes
    /// the row.
    async fn tombstone(&self, user_id: Uuid) -> Result<()>;
}
