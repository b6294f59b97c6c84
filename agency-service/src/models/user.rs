//! User and client-profile models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Role assigned to every user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Superadmin,
    Manager,
    ContentWriter,
    Designer,
    Client,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Superadmin => "superadmin",
            UserRole::Manager => "manager",
            UserRole::ContentWriter => "content_writer",
            UserRole::Designer => "designer",
            UserRole::Client => "client",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "superadmin" => UserRole::Superadmin,
            "manager" => UserRole::Manager,
            "content_writer" => UserRole::ContentWriter,
            "designer" => UserRole::Designer,
            _ => UserRole::Client,
        }
    }

    /// Agency staff, as opposed to an external client account.
    pub fn is_staff(&self) -> bool {
        !matches!(self, UserRole::Client)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> UserRole {
        UserRole::from_string(&self.role)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClientProfile {
    pub id: i64,
    pub user_id: i64,
    pub company_name: String,
    pub gstin: Option<String>,
    pub address: Option<String>,
    pub client_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_strings() {
        for role in [
            UserRole::Superadmin,
            UserRole::Manager,
            UserRole::ContentWriter,
            UserRole::Designer,
            UserRole::Client,
        ] {
            assert_eq!(UserRole::from_string(role.as_str()), role);
        }
    }

    #[test]
    fn unknown_role_falls_back_to_client() {
        assert_eq!(UserRole::from_string("intern"), UserRole::Client);
    }

    #[test]
    fn client_is_not_staff() {
        assert!(!UserRole::Client.is_staff());
        assert!(UserRole::Manager.is_staff());
        assert!(UserRole::Designer.is_staff());
    }
}
