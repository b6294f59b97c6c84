use super::RealtimeBroker;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

/// In-process realtime broker over per-group tokio broadcast channels.
/// Channels are created lazily on first subscribe; broadcasting to a group
/// nobody listens to drops the message.
pub struct ChannelBroker {
    channels: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
}

impl ChannelBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Subscribe to a group, creating its channel on first use.
    pub fn subscribe(&self, group: &str) -> broadcast::Receiver<String> {
        self.channels
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn group_count(&self) -> usize {
        self.channels.len()
    }
}

#[async_trait]
impl RealtimeBroker for ChannelBroker {
    async fn broadcast(&self, group: &str, event: &str, data: serde_json::Value) {
        if let Some(tx) = self.channels.get(group) {
            if tx.receiver_count() > 0 {
                let envelope = serde_json::json!({ "event": event, "data": data }).to_string();
                let _ = tx.send(envelope);
                return;
            }
        }
        debug!(group = group, event = event, "No subscribers for group");
    }
}

/// Mock broker for testing; records every broadcast.
#[derive(Default)]
pub struct MockBroker {
    broadcast_count: AtomicU64,
    sent: Mutex<Vec<(String, String)>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broadcast_count(&self) -> u64 {
        self.broadcast_count.load(Ordering::SeqCst)
    }

    /// (group, event) pairs in dispatch order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RealtimeBroker for MockBroker {
    async fn broadcast(&self, group: &str, event: &str, _data: serde_json::Value) {
        self.broadcast_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((group.to_string(), event.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_enveloped_messages() {
        let broker = ChannelBroker::new(16);
        let mut rx = broker.subscribe("client_42");

        broker
            .broadcast(
                "client_42",
                "invoice_status_changed",
                serde_json::json!({"invoice_id": 7, "status": "paid"}),
            )
            .await;

        let raw = rx.try_recv().unwrap();
        let envelope: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(envelope["event"], "invoice_status_changed");
        assert_eq!(envelope["data"]["status"], "paid");
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_dropped() {
        let broker = ChannelBroker::new(16);
        broker
            .broadcast("user_9", "comment_added", serde_json::json!({}))
            .await;
        assert_eq!(broker.group_count(), 0);
    }

    #[tokio::test]
    async fn groups_are_isolated() {
        let broker = ChannelBroker::new(16);
        let mut a = broker.subscribe("client_1");
        let mut b = broker.subscribe("client_2");

        broker
            .broadcast("client_1", "comment_added", serde_json::json!({"id": 1}))
            .await;

        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_err());
    }
}
