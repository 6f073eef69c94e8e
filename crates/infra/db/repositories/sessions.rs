use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{OptionalExtension, RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::sessions},
};
use domain::{
    entities::sessions::{InsertSessionEntity, SessionEntity},
    repositories::sessions::SessionRepository,
};

pub struct SessionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SessionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SessionRepository for SessionPostgres {
    async fn create(&self, insert_session_entity: InsertSessionEntity) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let session_id = insert_into(sessions::table)
            .values(&insert_session_entity)
            .returning(sessions::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(session_id)
    }

    async fn find_active_by_refresh_token_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<SessionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let session = sessions::table
            .filter(sessions::refresh_token_hash.eq(refresh_token_hash))
            .filter(sessions::is_active.eq(true))
            .select(SessionEntity::as_select())
            .first::<SessionEntity>(&mut conn)
            .optional()?;

        Ok(session)
    }

    async fn rotate_tokens(
        &self,
        session_id: Uuid,
        token_hash: String,
        refresh_token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(sessions::table.filter(sessions::id.eq(session_id)))
            .set((
                sessions::token_hash.eq(token_hash),
                sessions::refresh_token_hash.eq(refresh_token_hash),
                sessions::expires_at.eq(expires_at),
                sessions::last_activity_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn deactivate(&self, session_id: Uuid) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(sessions::table.filter(sessions::id.eq(session_id)))
            .set(sessions::is_active.eq(false))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn deactivate_all_for_user(&self, user_id: Uuid) -> Result<usize> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let count = update(
            sessions::table
                .filter(sessions::user_id.eq(user_id))
                .filter(sessions::is_active.eq(true)),
        )
        .set(sessions::is_active.eq(false))
        .execute(&mut conn)?;

        Ok(count)
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let count = update(
            sessions::table
                .filter(sessions::is_active.eq(true))
                .filter(sessions::expires_at.le(now)),
        )
        .set(sessions::is_active.eq(false))
        .execute(&mut conn)?;

        Ok(count)
    }
}
