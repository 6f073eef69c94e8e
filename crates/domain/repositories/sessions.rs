use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::sessions::{InsertSessionEntity, SessionEntity};

#[async_trait]
#[automock]
pub trait SessionRepository {
    async fn create(&self, insert_session_entity: InsertSessionEntity) -> Result<Uuid>;

    async fn find_active_by_refresh_token_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<SessionEntity>>;

    /// Rotates both token hashes and extends the expiry; also touches
    /// `last_activity_at`.
    async fn rotate_tokens(
        &self,
        session_id: Uuid,
        token_hash: String,
        refresh_token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn deactivate(&self, session_id: Uuid) -> Result<()>;

    async fn deactivate_all_for_user(&self, user_id: Uuid) -> Result<usize>;

    /// Expiry sweep used by the worker. Returns how many rows were flipped.
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}
