use super::{ProviderError, ProviderResponse, PushMessage, PushProvider};
use crate::config::FcmConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const FCM_V1_API_URL: &str = "https://fcm.googleapis.com/v1/projects";
const FCM_LEGACY_API_URL: &str = "https://fcm.googleapis.com/fcm/send";

/// Legacy batch calls accept at most this many registration ids.
const LEGACY_BATCH_LIMIT: usize = 1000;

const PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// FCM push provider. Uses the v1 per-token API when a project id is
/// configured, otherwise falls back to the legacy batch endpoint.
pub struct FcmProvider {
    config: FcmConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct FcmV1Request {
    message: FcmV1Message,
}

#[derive(Debug, Serialize)]
struct FcmV1Message {
    token: String,
    notification: FcmNotification,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<HashMap<String, String>>,
    android: FcmAndroidConfig,
}

#[derive(Debug, Serialize)]
struct FcmNotification {
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct FcmAndroidConfig {
    priority: String,
}

#[derive(Debug, Serialize)]
struct FcmLegacyRequest {
    registration_ids: Vec<String>,
    notification: FcmNotification,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<HashMap<String, String>>,
    priority: String,
}

#[derive(Debug, Deserialize)]
struct FcmLegacyResponse {
    #[serde(default)]
    success: usize,
    #[serde(default)]
    failure: usize,
}

impl FcmProvider {
    pub fn new(config: FcmConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(PUSH_TIMEOUT)
            .build()
            .map_err(|e| {
                ProviderError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self { config, client })
    }

    fn uses_v1(&self) -> bool {
        !self.config.project_id.is_empty()
    }

    async fn send_v1(&self, push: &PushMessage) -> Result<ProviderResponse, ProviderError> {
        if self.config.service_account_key.is_empty() {
            return Err(ProviderError::Configuration(
                "FCM service account key is not configured".to_string(),
            ));
        }

        let url = format!(
            "{}/{}/messages:send",
            FCM_V1_API_URL, self.config.project_id
        );

        let mut accepted = 0;
        let mut failed = 0;
        for token in &push.tokens {
            let request = FcmV1Request {
                message: FcmV1Message {
                    token: token.clone(),
                    notification: FcmNotification {
                        title: push.title.clone(),
                        body: push.body.clone(),
                    },
                    data: push.data.clone(),
                    android: FcmAndroidConfig {
                        priority: "high".to_string(),
                    },
                },
            };

            let result = self
                .client
                .post(&url)
                .bearer_auth(&self.config.service_account_key)
                .json(&request)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => accepted += 1,
                Ok(response) => {
                    failed += 1;
                    tracing::warn!(
                        status = %response.status(),
                        "FCM v1 rejected a push token"
                    );
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(error = %e, "FCM v1 push call failed");
                }
            }
        }

        Ok(ProviderResponse::batch(accepted, failed))
    }

    async fn send_legacy(&self, push: &PushMessage) -> Result<ProviderResponse, ProviderError> {
        if self.config.server_key.is_empty() {
            return Err(ProviderError::Configuration(
                "FCM server key is not configured".to_string(),
            ));
        }

        let mut accepted = 0;
        let mut failed = 0;
        for chunk in push.tokens.chunks(LEGACY_BATCH_LIMIT) {
            let request = FcmLegacyRequest {
                registration_ids: chunk.to_vec(),
                notification: FcmNotification {
                    title: push.title.clone(),
                    body: push.body.clone(),
                },
                data: push.data.clone(),
                priority: "high".to_string(),
            };

            let response = self
                .client
                .post(FCM_LEGACY_API_URL)
                .header("Authorization", format!("key={}", self.config.server_key))
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    ProviderError::Connection(format!("Failed to connect to FCM: {}", e))
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::SendFailed(format!(
                    "FCM legacy API returned status {}: {}",
                    status, body
                )));
            }

            let parsed: FcmLegacyResponse = response.json().await.map_err(|e| {
                ProviderError::SendFailed(format!("Failed to parse FCM response: {}", e))
            })?;

            accepted += parsed.success;
            failed += parsed.failure;
        }

        Ok(ProviderResponse::batch(accepted, failed))
    }
}

#[async_trait]
impl PushProvider for FcmProvider {
    async fn send(&self, push: &PushMessage) -> Result<ProviderResponse, ProviderError> {
        if !self.config.enabled {
            return Err(ProviderError::NotEnabled(
                "FCM push provider is not enabled".to_string(),
            ));
        }

        if push.tokens.is_empty() {
            return Ok(ProviderResponse::batch(0, 0));
        }

        let response = if self.uses_v1() {
            self.send_v1(push).await?
        } else {
            self.send_legacy(push).await?
        };

        tracing::info!(
            accepted = response.accepted,
            failed = response.failed,
            v1 = self.uses_v1(),
            "Push dispatch completed"
        );

        Ok(response)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if !self.config.enabled {
            return Ok(());
        }

        if self.config.project_id.is_empty() && self.config.server_key.is_empty() {
            return Err(ProviderError::Configuration(
                "Neither FCM project_id nor server_key is configured".to_string(),
            ));
        }

        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// Mock push provider for testing
pub struct MockPushProvider {
    enabled: bool,
    send_count: AtomicU64,
    token_count: AtomicU64,
}

impl MockPushProvider {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            send_count: AtomicU64::new(0),
            token_count: AtomicU64::new(0),
        }
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }

    pub fn token_count(&self) -> u64 {
        self.token_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushProvider for MockPushProvider {
    async fn send(&self, push: &PushMessage) -> Result<ProviderResponse, ProviderError> {
        if !self.enabled {
            return Err(ProviderError::NotEnabled(
                "Mock push provider is not enabled".to_string(),
            ));
        }

        self.send_count.fetch_add(1, Ordering::SeqCst);
        self.token_count
            .fetch_add(push.tokens.len() as u64, Ordering::SeqCst);

        tracing::info!(
            tokens = push.tokens.len(),
            title = %push.title,
            "[MOCK] Push notification would be sent"
        );

        Ok(ProviderResponse::batch(push.tokens.len(), 0))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_request_serializes_registration_ids() {
        let request = FcmLegacyRequest {
            registration_ids: vec!["tok-a".to_string(), "tok-b".to_string()],
            notification: FcmNotification {
                title: "Invoice paid".to_string(),
                body: "AC12AUG25 is fully paid".to_string(),
            },
            data: None,
            priority: "high".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["registration_ids"].as_array().unwrap().len(), 2);
        assert_eq!(json["priority"], "high");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn batch_limit_splits_large_token_sets() {
        let tokens: Vec<String> = (0..2500).map(|i| format!("tok-{}", i)).collect();
        let chunks: Vec<_> = tokens.chunks(LEGACY_BATCH_LIMIT).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[2].len(), 500);
    }

    #[tokio::test]
    async fn mock_provider_counts_tokens() {
        let provider = MockPushProvider::new(true);
        let push = PushMessage {
            tokens: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            title: "t".to_string(),
            body: "b".to_string(),
            data: None,
        };
        let response = provider.send(&push).await.unwrap();
        assert_eq!(response.accepted, 3);
        assert_eq!(provider.send_count(), 1);
        assert_eq!(provider.token_count(), 3);
    }
}
