use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::user::UserRole;

/// Comment threads are one level deep. A top-level comment may carry at most
/// one reply, enforced by the unique parent constraint in storage and checked
/// again at write time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContentComment {
    pub id: i64,
    pub content_item_id: i64,
    pub parent_id: Option<i64>,
    pub author_id: i64,
    pub author_role: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateComment {
    #[validate(length(min = 1, message = "Comment body is required"))]
    pub body: String,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CommentRead {
    pub id: i64,
    pub content_item_id: i64,
    pub user_id: i64,
    pub last_read_at: DateTime<Utc>,
}

/// Comments are bucketed into two sides of the conversation.
pub fn author_role_for(role: UserRole) -> &'static str {
    match role {
        UserRole::Client => "client",
        _ => "agency",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_comments_are_client_side() {
        assert_eq!(author_role_for(UserRole::Client), "client");
    }

    #[test]
    fn every_staff_role_is_agency_side() {
        for role in [
            UserRole::Superadmin,
            UserRole::Manager,
            UserRole::ContentWriter,
            UserRole::Designer,
        ] {
            assert_eq!(author_role_for(role), "agency");
        }
    }
}
