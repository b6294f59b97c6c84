use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// A pending email verification. Only a hash of the code is stored; the
/// plaintext goes out in the email and is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingVerification {
    pub id: i64,
    pub lookup_key: String,
    pub payload: serde_json::Value,
    pub code_hash: String,
    pub attempts: i32,
    pub request_count: i32,
    pub window_started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RequestVerification {
    #[validate(length(min = 3, message = "Email is required"))]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ConfirmVerification {
    #[validate(length(min = 3, message = "Email is required"))]
    pub email: String,
    #[validate(length(min = 6, max = 6, message = "Code must be 6 digits"))]
    pub code: String,
}
