use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::users;

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = users)]
pub struct UserEntity {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub status: String,
    pub login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserEntity {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map(|until| now < until).unwrap_or(false)
    }

    /// Tombstoned rows stay in place to preserve ledger referential
    /// integrity; queries must treat them as absent.
    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct RegisterUserEntity {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
