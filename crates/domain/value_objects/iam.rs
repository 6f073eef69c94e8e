use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entities::users::{RegisterUserEntity, UserEntity};
use crate::domain::value_objects::enums::{user_roles::UserRole, user_statuses::UserStatus};

/// Public view of a user, safe to hand to API callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserModel {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub role: UserRole,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&UserEntity> for UserModel {
    fn from(entity: &UserEntity) -> Self {
        Self {
            id: entity.id,
            email: entity.email.clone(),
            username: entity.username.clone(),
            role: UserRole::from_str(&entity.role),
            status: UserStatus::from_str(&entity.status),
            created_at: entity.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUserModel {
    pub email: String,
    pub username: String,
    pub password: String,
}

impl RegisterUserModel {
    /// Builds the insertable entity; the password hash is produced by the
    /// caller so this module stays free of crypto dependencies.
    pub fn to_entity(&self, password_hash: String) -> RegisterUserEntity {
        RegisterUserEntity {
            email: self.email.trim().to_lowercase(),
            username: self.username.trim().to_string(),
            password_hash,
            role: UserRole::User.to_string(),
            status: UserStatus::Active.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginModel {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshModel {
    pub refresh_token: String,
}

/// Token pair returned by login/refresh. The refresh token is opaque; only
/// its SHA-256 hash is stored server-side.
#[derive(Debug, Clone, Serialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}
