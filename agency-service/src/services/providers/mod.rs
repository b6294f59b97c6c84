pub mod email;
pub mod push;
pub mod realtime;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub use email::{MockEmailProvider, SmtpProvider};
pub use push::{FcmProvider, MockPushProvider};
pub use realtime::{ChannelBroker, MockBroker};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not enabled: {0}")]
    NotEnabled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Send error: {0}")]
    SendFailed(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub provider_id: Option<String>,
    pub accepted: usize,
    pub failed: usize,
}

impl ProviderResponse {
    pub fn success(provider_id: Option<String>) -> Self {
        Self {
            provider_id,
            accepted: 1,
            failed: 0,
        }
    }

    pub fn batch(accepted: usize, failed: usize) -> Self {
        Self {
            provider_id: None,
            accepted,
            failed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
}

/// One push dispatch across a set of device tokens.
#[derive(Debug, Clone)]
pub struct PushMessage {
    pub tokens: Vec<String>,
    pub title: String,
    pub body: String,
    pub data: Option<HashMap<String, String>>,
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, email: &EmailMessage) -> Result<ProviderResponse, ProviderError>;
    async fn health_check(&self) -> Result<(), ProviderError>;
    fn is_enabled(&self) -> bool;
}

#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, push: &PushMessage) -> Result<ProviderResponse, ProviderError>;
    async fn health_check(&self) -> Result<(), ProviderError>;
    fn is_enabled(&self) -> bool;
}

/// Live message delivery to websocket-style groups. At-most-once, no
/// acknowledgment; a group with no subscribers drops the message.
#[async_trait]
pub trait RealtimeBroker: Send + Sync {
    async fn broadcast(&self, group: &str, event: &str, data: serde_json::Value);
}
