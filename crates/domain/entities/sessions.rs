use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::sessions;

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = sessions)]
pub struct SessionEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl SessionEntity {
    /// A session is valid iff it is active and not past its expiry.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now < self.expires_at
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = sessions)]
pub struct InsertSessionEntity {
    pub user_id: Uuid,
    pub token_hash: String,
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub is_active: bool,
}
