use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{OptionalExtension, RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::users},
};
use domain::{
    entities::users::{RegisterUserEntity, UserEntity},
    repositories::users::UserRepository,
    value_objects::enums::user_statuses::UserStatus,
};

pub struct UserPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl UserPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UserRepository for UserPostgres {
    async fn register(&self, register_user_entity: RegisterUserEntity) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let user_id = insert_into(users::table)
            .values(&register_user_entity)
            .returning(users::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(user_id)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let user = users::table
            .filter(users::email.eq(email))
            .filter(users::deleted_at.is_null())
            .select(UserEntity::as_select())
            .first::<UserEntity>(&mut conn)
            .optional()?;

        Ok(user)
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let user = users::table
            .filter(users::id.eq(user_id))
            .filter(users::deleted_at.is_null())
            .select(UserEntity::as_select())
            .first::<UserEntity>(&mut conn)
            .optional()?;

        Ok(user)
    }

    async fn record_login_failure(
        &self,
        user_id: Uuid,
        locked_until: Option<DateTime<Utc>>,
    ) -> Result<i32> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let attempts = update(users::table.filter(users::id.eq(user_id)))
            .set((
                users::login_attempts.eq(users::login_attempts + 1),
                users::locked_until.eq(locked_until),
                users::updated_at.eq(Utc::now()),
            ))
            .returning(users::login_attempts)
            .get_result::<i32>(&mut conn)?;

        Ok(attempts)
    }

    async fn reset_login_attempts(&self, user_id: Uuid) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(users::table.filter(users::id.eq(user_id)))
            .set((
                users::login_attempts.eq(0),
                users::locked_until.eq::<Option<DateTime<Utc>>>(None),
                users::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn tombstone(&self, user_id: Uuid) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(users::table.filter(users::id.eq(user_id)))
            .set((
                users::status.eq(UserStatus::Deleted.to_string()),
                users::deleted_at.eq(Some(Utc::now())),
                users::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }
}
