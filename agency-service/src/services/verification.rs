//! Email verification codes: hashed at rest, short-lived, rate limited.

use crate::services::database::Database;
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::providers::{EmailMessage, EmailProvider};
use chrono::{Duration, Utc};
use rand::Rng;
use service_core::error::AppError;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, instrument};

const CODE_TTL_MINUTES: i64 = 10;
const RATE_WINDOW_MINUTES: i64 = 15;
const RATE_LIMIT_MAX: i32 = 3;
const MAX_ATTEMPTS: i32 = 5;

#[derive(Clone)]
pub struct VerificationService {
    db: Database,
    email: Arc<dyn EmailProvider>,
}

impl VerificationService {
    pub fn new(db: Database, email: Arc<dyn EmailProvider>) -> Self {
        Self { db, email }
    }

    /// Issue a verification code for a lookup key and mail it out. Only the
    /// sha256 of the code is stored. Sending failures fail the whole
    /// operation; a code nobody received is useless.
    #[instrument(skip(self, payload), fields(lookup_key = lookup_key))]
    pub async fn request(
        &self,
        lookup_key: &str,
        payload: serde_json::Value,
        email: &str,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["request_verification"])
            .start_timer();

        if let Some(existing) = self.db.get_verification(lookup_key).await? {
            let window_end =
                existing.window_started_at + Duration::minutes(RATE_WINDOW_MINUTES);
            if existing.request_count >= RATE_LIMIT_MAX && Utc::now() < window_end {
                let retry_after = (window_end - Utc::now()).num_seconds().max(0) as u64;
                return Err(AppError::TooManyRequests(
                    "Verification requested too often, try again later".to_string(),
                    Some(retry_after),
                ));
            }
        }

        let code = generate_code();
        let expires_at = Utc::now() + Duration::minutes(CODE_TTL_MINUTES);
        self.db
            .upsert_verification(
                lookup_key,
                &payload,
                &hash_code(&code),
                expires_at,
                std::time::Duration::from_secs(RATE_WINDOW_MINUTES as u64 * 60),
            )
            .await?;

        timer.observe_duration();

        let message = EmailMessage {
            to: email.to_string(),
            subject: "Your verification code".to_string(),
            body_text: Some(format!(
                "Your verification code is {}. It expires in {} minutes.",
                code, CODE_TTL_MINUTES
            )),
            body_html: None,
        };
        self.email
            .send(&message)
            .await
            .map_err(|e| AppError::EmailDelivery(e.to_string()))?;

        info!(lookup_key = lookup_key, "Verification code issued");

        Ok(())
    }

    /// Check a code against the stored hash. Success consumes the row and
    /// hands back the payload stored at request time.
    #[instrument(skip(self, code), fields(lookup_key = lookup_key))]
    pub async fn confirm(
        &self,
        lookup_key: &str,
        code: &str,
    ) -> Result<serde_json::Value, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["confirm_verification"])
            .start_timer();

        let row = self
            .db
            .get_verification(lookup_key)
            .await?
            .ok_or_else(|| AppError::NotFound("No pending verification".to_string()))?;

        if row.expires_at < Utc::now() {
            self.db.delete_verification(row.id).await?;
            return Err(AppError::Validation(
                "Verification code has expired".to_string(),
            ));
        }

        if row.attempts >= MAX_ATTEMPTS {
            self.db.delete_verification(row.id).await?;
            return Err(AppError::TooManyRequests(
                "Too many incorrect attempts, request a new code".to_string(),
                None,
            ));
        }

        if hash_code(code) != row.code_hash {
            self.db.increment_verification_attempts(row.id).await?;
            return Err(AppError::Validation(
                "Incorrect verification code".to_string(),
            ));
        }

        self.db.delete_verification(row.id).await?;

        timer.observe_duration();

        info!(lookup_key = lookup_key, "Verification confirmed");

        Ok(row.payload)
    }
}

fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn hashing_is_deterministic_hex() {
        let a = hash_code("123456");
        let b = hash_code("123456");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_code("123457"));
        // Known sha256 of the ASCII string "123456".
        assert_eq!(
            a,
            "8d969eef6ecad3c29a3a629280e686cf0c3f5d5a86aff3ca12020c923adc6c92"
        );
    }
}
