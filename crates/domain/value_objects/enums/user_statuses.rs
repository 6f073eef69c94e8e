use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum UserStatus {
    #[default]
    Active,
    Blocked,
    Deleted,
}

impl Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            UserStatus::Active => "active",
            UserStatus::Blocked => "blocked",
            UserStatus::Deleted => "deleted",
        };
        write!(f, "{}", status)
    }
}

impl UserStatus {
    pub fn from_str(value: &str) -> Self {
        match value {
            "active" => UserStatus::Active,
            "blocked" => UserStatus::Blocked,
            "deleted" => UserStatus::Deleted,
            _ => UserStatus::Blocked,
        }
    }
}
