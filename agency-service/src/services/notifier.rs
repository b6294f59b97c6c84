//! Realtime and push fan-out. Every method here is best-effort: failures are
//! logged at warn and never reach the triggering flow. Callers spawn these
//! after their transaction commits.

use crate::models::{ContentComment, ContentItem, Invoice, InvoiceItem, InvoiceStatus};
use crate::services::database::Database;
use crate::services::metrics::PUSH_DELIVERIES_TOTAL;
use crate::services::providers::{PushMessage, PushProvider, RealtimeBroker};
use async_trait::async_trait;
use futures::future::join_all;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Where device tokens come from. Split out so the fan-out can be exercised
/// without a live pool.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn active_tokens_for_users(&self, user_ids: &[i64]) -> Result<Vec<String>, AppError>;
}

#[async_trait]
impl TokenSource for Database {
    async fn active_tokens_for_users(&self, user_ids: &[i64]) -> Result<Vec<String>, AppError> {
        Database::active_tokens_for_users(self, user_ids).await
    }
}

/// Push recipients: every distinct candidate user except the actor.
pub fn recipients(candidates: &[Option<i64>], actor_id: Option<i64>) -> Vec<i64> {
    let mut out: Vec<i64> = Vec::new();
    for candidate in candidates.iter().flatten() {
        if Some(*candidate) == actor_id || out.contains(candidate) {
            continue;
        }
        out.push(*candidate);
    }
    out
}

#[derive(Clone)]
pub struct Notifier {
    tokens: Arc<dyn TokenSource>,
    broker: Arc<dyn RealtimeBroker>,
    push: Arc<dyn PushProvider>,
}

impl Notifier {
    pub fn new(
        tokens: Arc<dyn TokenSource>,
        broker: Arc<dyn RealtimeBroker>,
        push: Arc<dyn PushProvider>,
    ) -> Self {
        Self {
            tokens,
            broker,
            push,
        }
    }

    fn client_group(client_id: i64) -> String {
        format!("client_{}", client_id)
    }

    fn user_group(user_id: i64) -> String {
        format!("user_{}", user_id)
    }

    /// Broadcast an event to the client group and each affected user group.
    async fn publish(&self, client_id: i64, user_ids: &[i64], event: &str, data: serde_json::Value) {
        self.broker
            .broadcast(&Self::client_group(client_id), event, data.clone())
            .await;
        join_all(user_ids.iter().map(|user_id| {
            let group = Self::user_group(*user_id);
            let data = data.clone();
            async move { self.broker.broadcast(&group, event, data).await }
        }))
        .await;
    }

    /// Resolve tokens and dispatch one push. All failures end here.
    async fn push_to_users(
        &self,
        user_ids: &[i64],
        title: &str,
        body: &str,
        data: HashMap<String, String>,
    ) {
        if user_ids.is_empty() || !self.push.is_enabled() {
            return;
        }

        let tokens = match self.tokens.active_tokens_for_users(user_ids).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Token lookup failed, skipping push");
                return;
            }
        };
        if tokens.is_empty() {
            return;
        }

        let message = PushMessage {
            tokens,
            title: title.to_string(),
            body: body.to_string(),
            data: Some(data),
        };

        match self.push.send(&message).await {
            Ok(response) => {
                PUSH_DELIVERIES_TOTAL
                    .with_label_values(&["sent"])
                    .inc_by(response.accepted as f64);
                PUSH_DELIVERIES_TOTAL
                    .with_label_values(&["failed"])
                    .inc_by(response.failed as f64);
            }
            Err(e) => {
                PUSH_DELIVERIES_TOTAL.with_label_values(&["failed"]).inc();
                warn!(error = %e, "Push dispatch failed");
            }
        }
    }

    /// A line item was added to an invoice. Event only, scoped to the client.
    pub async fn invoice_item_recorded(&self, invoice: &Invoice, item: &InvoiceItem) {
        let data = serde_json::json!({
            "invoice_id": invoice.id,
            "invoice_number": invoice.invoice_number,
            "item_id": item.id,
            "description": item.description,
            "total_amount": invoice.total_amount,
        });
        self.publish(invoice.client_id, &[], "invoice_item_recorded", data)
            .await;
    }

    /// A payment flipped the invoice status.
    pub async fn invoice_status_changed(
        &self,
        invoice: &Invoice,
        status: InvoiceStatus,
        actor_id: Option<i64>,
    ) {
        let targets = recipients(
            &[Some(invoice.client_id), invoice.authorized_by],
            actor_id,
        );
        let data = serde_json::json!({
            "invoice_id": invoice.id,
            "invoice_number": invoice.invoice_number,
            "status": status.as_str(),
            "total_amount": invoice.total_amount,
        });
        self.publish(invoice.client_id, &targets, "invoice_status_changed", data)
            .await;

        let number = invoice.invoice_number.as_deref().unwrap_or("invoice");
        let title = format!("Invoice {}", number);
        let body = format!("Invoice {} is now {}", number, status.as_str());
        let push_data = HashMap::from([
            ("type".to_string(), "invoice_status_changed".to_string()),
            ("invoice_id".to_string(), invoice.id.to_string()),
        ]);
        self.push_to_users(&targets, &title, &body, push_data).await;
    }

    /// A content item changed column (move, approval, or schedule).
    pub async fn content_item_status_changed(
        &self,
        item: &ContentItem,
        action: &str,
        actor_id: Option<i64>,
    ) {
        let targets = recipients(
            &[Some(item.client_id), item.assigned_to, item.created_by],
            actor_id,
        );
        let data = serde_json::json!({
            "content_item_id": item.id,
            "title": item.title,
            "column": item.kanban_column,
            "approval_status": item.approval_status,
            "action": action,
        });
        self.publish(item.client_id, &targets, "content_item_status_changed", data)
            .await;

        let title = "Content update".to_string();
        let body = format!("{} moved to {}", item.title, item.kanban_column);
        let push_data = HashMap::from([
            ("type".to_string(), "content_item_status_changed".to_string()),
            ("content_item_id".to_string(), item.id.to_string()),
        ]);
        self.push_to_users(&targets, &title, &body, push_data).await;
    }

    /// Content fields changed without a column move. Event only.
    pub async fn content_item_updated(&self, item: &ContentItem) {
        let data = serde_json::json!({
            "content_item_id": item.id,
            "title": item.title,
            "column": item.kanban_column,
        });
        self.publish(item.client_id, &[], "content_item_updated", data)
            .await;
    }

    /// A comment landed; the other side of the conversation gets notified.
    pub async fn comment_added(
        &self,
        item: &ContentItem,
        comment: &ContentComment,
        actor_id: i64,
    ) {
        let candidates: Vec<Option<i64>> = if comment.author_role == "client" {
            vec![item.assigned_to, item.created_by]
        } else {
            vec![Some(item.client_id)]
        };
        let targets = recipients(&candidates, Some(actor_id));

        let data = serde_json::json!({
            "content_item_id": item.id,
            "comment_id": comment.id,
            "author_id": comment.author_id,
            "author_role": comment.author_role,
            "body": comment.body,
        });
        self.publish(item.client_id, &targets, "comment_added", data)
            .await;

        let title = "New comment".to_string();
        let body = format!("New comment on {}", item.title);
        let push_data = HashMap::from([
            ("type".to_string(), "comment_added".to_string()),
            ("content_item_id".to_string(), item.id.to_string()),
        ]);
        self.push_to_users(&targets, &title, &body, push_data).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::{MockBroker, MockPushProvider};
    use chrono::Utc;
    use rust_decimal::Decimal;

    struct StaticTokens(Vec<String>);

    #[async_trait]
    impl TokenSource for StaticTokens {
        async fn active_tokens_for_users(
            &self,
            user_ids: &[i64],
        ) -> Result<Vec<String>, AppError> {
            if user_ids.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(self.0.clone())
            }
        }
    }

    fn notifier_with(
        tokens: Vec<String>,
    ) -> (Notifier, Arc<MockBroker>, Arc<MockPushProvider>) {
        let broker = Arc::new(MockBroker::new());
        let push = Arc::new(MockPushProvider::new(true));
        let notifier = Notifier::new(
            Arc::new(StaticTokens(tokens)),
            broker.clone(),
            push.clone(),
        );
        (notifier, broker, push)
    }

    fn sample_item() -> ContentItem {
        ContentItem {
            id: 5,
            title: "REEL-001".to_string(),
            copy_text: String::new(),
            caption: String::new(),
            due_date: None,
            platforms: serde_json::json!([]),
            kanban_column: "client_approval".to_string(),
            priority: "medium".to_string(),
            assigned_to: Some(2),
            approval_status: "pending".to_string(),
            revise_requested: false,
            revise_count: 0,
            revise_notes: String::new(),
            post_action: "manual".to_string(),
            scheduled_at: None,
            posted_at: None,
            platform_captions: serde_json::json!({}),
            external_post_id: None,
            post_failed: false,
            post_error: None,
            client_id: 10,
            invoice_id: None,
            service_id: None,
            created_by: Some(3),
            approved_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_invoice() -> Invoice {
        Invoice {
            id: 7,
            invoice_number: Some("AC7AUG25".to_string()),
            client_id: 10,
            business_name: String::new(),
            business_address: String::new(),
            business_gstin: String::new(),
            bank_account_name: String::new(),
            bank_account_number: String::new(),
            bank_ifsc: String::new(),
            bank_branch: String::new(),
            issue_date: Utc::now().date_naive(),
            start_date: None,
            due_date: None,
            gst_percentage: Decimal::from(18),
            gst_amount: Decimal::ZERO,
            total_amount: Decimal::from(295),
            status: "paid".to_string(),
            payment_terms: None,
            notes: None,
            authorized_by: Some(3),
            pipeline_started_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn recipients_skip_actor_and_duplicates() {
        let targets = recipients(&[Some(10), Some(3), Some(10), None, Some(2)], Some(3));
        assert_eq!(targets, vec![10, 2]);
    }

    #[tokio::test]
    async fn status_change_reaches_client_and_authorizer_but_not_actor() {
        let (notifier, broker, push) = notifier_with(vec!["tok-1".to_string()]);
        let invoice = sample_invoice();

        // Actor 3 is the authorizer; only the client should be pushed.
        notifier
            .invoice_status_changed(&invoice, InvoiceStatus::Paid, Some(3))
            .await;

        let sent = broker.sent();
        assert!(sent.contains(&(
            "client_10".to_string(),
            "invoice_status_changed".to_string()
        )));
        assert!(sent.contains(&(
            "user_10".to_string(),
            "invoice_status_changed".to_string()
        )));
        assert!(!sent.iter().any(|(group, _)| group == "user_3"));
        assert_eq!(push.send_count(), 1);
    }

    #[tokio::test]
    async fn client_comment_notifies_agency_side() {
        let (notifier, broker, push) = notifier_with(vec!["tok-1".to_string()]);
        let item = sample_item();
        let comment = ContentComment {
            id: 1,
            content_item_id: item.id,
            parent_id: None,
            author_id: 10,
            author_role: "client".to_string(),
            body: "Looks great".to_string(),
            created_at: Utc::now(),
        };

        notifier.comment_added(&item, &comment, 10).await;

        let sent = broker.sent();
        assert!(sent.contains(&("user_2".to_string(), "comment_added".to_string())));
        assert!(sent.contains(&("user_3".to_string(), "comment_added".to_string())));
        assert!(!sent.iter().any(|(group, _)| group == "user_10"));
        assert_eq!(push.send_count(), 1);
    }

    #[tokio::test]
    async fn agency_comment_notifies_the_client() {
        let (notifier, broker, _push) = notifier_with(vec![]);
        let item = sample_item();
        let comment = ContentComment {
            id: 2,
            content_item_id: item.id,
            parent_id: None,
            author_id: 2,
            author_role: "agency".to_string(),
            body: "Revised copy attached".to_string(),
            created_at: Utc::now(),
        };

        notifier.comment_added(&item, &comment, 2).await;

        let sent = broker.sent();
        assert!(sent.contains(&("user_10".to_string(), "comment_added".to_string())));
        assert!(!sent.iter().any(|(group, _)| group == "user_2"));
    }

    #[tokio::test]
    async fn item_recorded_is_event_only() {
        let (notifier, broker, push) = notifier_with(vec!["tok-1".to_string()]);
        let invoice = sample_invoice();
        let item = InvoiceItem {
            id: 1,
            invoice_id: invoice.id,
            service_id: None,
            description: "Instagram reels".to_string(),
            unit_price: Decimal::from(100),
            quantity: 2,
            created_at: Utc::now(),
        };

        notifier.invoice_item_recorded(&invoice, &item).await;

        assert_eq!(broker.broadcast_count(), 1);
        assert_eq!(push.send_count(), 0);
    }
}
