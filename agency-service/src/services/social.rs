//! Meta Graph API client: typed failures and the retry policy for
//! rate-limited calls. Posting flows are not built on top of this yet.

use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const GRAPH_API_URL: &str = "https://graph.facebook.com/v19.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Attempts per call, the first one included.
const MAX_ATTEMPTS: u32 = 4;
/// Ceiling for the exponential backoff between attempts.
const BACKOFF_CAP_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum MetaApiError {
    #[error("Meta access token expired or invalid")]
    AuthExpired,
    #[error("Meta API rate limit reached")]
    RateLimited,
    #[error("Meta API error: {0}")]
    Api(String),
    #[error("Meta API request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl MetaApiError {
    /// Only rate limits are worth retrying. An expired token stays expired.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MetaApiError::RateLimited)
    }
}

/// Delay before retry number `attempt` (zero-based): 2^attempt seconds,
/// capped.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt).min(BACKOFF_CAP_SECS))
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphErrorBody,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

/// Map a Graph error response onto the typed failure set. Code 190 is the
/// OAuth token family; 4, 17 and 32 are the app/user/page throttles.
fn classify(status: StatusCode, error: Option<&GraphErrorBody>) -> MetaApiError {
    if let Some(error) = error {
        if error.code == 190 {
            return MetaApiError::AuthExpired;
        }
        if matches!(error.code, 4 | 17 | 32 | 613) {
            return MetaApiError::RateLimited;
        }
    }
    match status {
        StatusCode::UNAUTHORIZED => MetaApiError::AuthExpired,
        StatusCode::TOO_MANY_REQUESTS => MetaApiError::RateLimited,
        _ => MetaApiError::Api(match error {
            Some(e) if !e.message.is_empty() => format!("HTTP {}: {}", status, e.message),
            _ => format!("HTTP {}", status),
        }),
    }
}

#[derive(Clone)]
pub struct MetaClient {
    client: reqwest::Client,
    base_url: String,
}

impl MetaClient {
    pub fn new() -> Result<Self, MetaApiError> {
        Self::with_base_url(GRAPH_API_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, MetaApiError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// GET a Graph path, retrying rate limits with exponential backoff.
    pub async fn get(
        &self,
        path: &str,
        access_token: &str,
    ) -> Result<serde_json::Value, MetaApiError> {
        self.send_with_retry(path, || {
            self.client.get(self.url(path)).bearer_auth(access_token)
        })
        .await
    }

    /// POST a form body to a Graph path with the same retry policy.
    pub async fn post_form(
        &self,
        path: &str,
        access_token: &str,
        params: &[(String, String)],
    ) -> Result<serde_json::Value, MetaApiError> {
        self.send_with_retry(path, || {
            self.client
                .post(self.url(path))
                .bearer_auth(access_token)
                .form(params)
        })
        .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send_with_retry(
        &self,
        path: &str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, MetaApiError> {
        let mut attempt = 0u32;
        loop {
            let result = Self::digest(build().send().await?).await;
            match result {
                Err(ref e) if e.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        path = path,
                        attempt = attempt,
                        delay_secs = delay.as_secs(),
                        "Meta API rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn digest(response: reqwest::Response) -> Result<serde_json::Value, MetaApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        match response.json::<GraphErrorEnvelope>().await {
            Ok(envelope) => Err(classify(status, Some(&envelope.error))),
            Err(_) => Err(classify(status, None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(10), Duration::from_secs(60));
        assert_eq!(backoff_delay(63), Duration::from_secs(60));
    }

    #[test]
    fn token_errors_are_terminal() {
        let err = classify(
            StatusCode::BAD_REQUEST,
            Some(&GraphErrorBody {
                message: "Error validating access token".to_string(),
                code: 190,
            }),
        );
        assert!(matches!(err, MetaApiError::AuthExpired));
        assert!(!err.is_retryable());

        let err = classify(StatusCode::UNAUTHORIZED, None);
        assert!(matches!(err, MetaApiError::AuthExpired));
    }

    #[test]
    fn throttle_codes_are_retryable() {
        for code in [4, 17, 32, 613] {
            let err = classify(
                StatusCode::BAD_REQUEST,
                Some(&GraphErrorBody {
                    message: "Application request limit reached".to_string(),
                    code,
                }),
            );
            assert!(matches!(err, MetaApiError::RateLimited));
            assert!(err.is_retryable());
        }
        assert!(classify(StatusCode::TOO_MANY_REQUESTS, None).is_retryable());
    }

    #[test]
    fn unknown_errors_carry_the_message() {
        let err = classify(
            StatusCode::BAD_REQUEST,
            Some(&GraphErrorBody {
                message: "Unsupported request".to_string(),
                code: 100,
            }),
        );
        match err {
            MetaApiError::Api(message) => assert!(message.contains("Unsupported request")),
            other => panic!("expected Api, got {:?}", other),
        }
    }
}
