//! Pipeline provisioning: seeding kanban items from a paid invoice's
//! pipeline-eligible services. Idempotent per (invoice, service, title).

use crate::middleware::AuthUser;
use crate::models::{ContentItem, Invoice, InvoiceStatus, PipelineBatch, Service};
use crate::services::database::Database;
use crate::services::metrics::DB_QUERY_DURATION;
use service_core::error::AppError;
use std::collections::HashSet;
use tracing::{info, instrument};

/// Result of a provisioning run. `skipped` counts titles that already
/// existed from an earlier invocation.
#[derive(Debug)]
pub struct PipelineStart {
    pub invoice: Invoice,
    pub created: Vec<ContentItem>,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct ProvisioningService {
    db: Database,
}

impl ProvisioningService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Provision content items for every pipeline-eligible service billed on
    /// a paid invoice. Safe to call repeatedly; only missing titles are
    /// created, and pipeline_started_at is stamped exactly once.
    #[instrument(skip(self, actor), fields(invoice_id = invoice_id, actor_id = actor.id))]
    pub async fn start_pipeline(
        &self,
        actor: &AuthUser,
        invoice_id: i64,
    ) -> Result<PipelineStart, AppError> {
        if !actor.is_staff() {
            return Err(AppError::PermissionDenied(
                "Only agency staff can start a pipeline".to_string(),
            ));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["start_pipeline"])
            .start_timer();

        let mut tx = self.db.pool().begin().await?;

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT id, invoice_number, client_id, business_name, business_address, business_gstin,
                bank_account_name, bank_account_number, bank_ifsc, bank_branch,
                issue_date, start_date, due_date, gst_percentage, gst_amount, total_amount,
                status, payment_terms, notes, authorized_by, pipeline_started_at, created_at, updated_at
            FROM invoices
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Invoice not found".to_string()))?;

        if invoice.status() != InvoiceStatus::Paid {
            return Err(AppError::PreconditionFailed(
                "pipeline can only start on paid invoices".to_string(),
            ));
        }

        let services = sqlx::query_as::<_, Service>(
            r#"
            SELECT DISTINCT s.id, s.code, s.name, s.hsn_code, s.category,
                s.is_pipeline, s.pipeline_config, s.created_at
            FROM services s
            JOIN invoice_items i ON i.service_id = s.id
            WHERE i.invoice_id = $1 AND s.is_pipeline
            "#,
        )
        .bind(invoice.id)
        .fetch_all(&mut *tx)
        .await?;

        if services.is_empty() {
            return Err(AppError::PreconditionFailed(
                "No invoice item references a pipeline-eligible service".to_string(),
            ));
        }

        let mut created = Vec::new();
        let mut skipped = 0usize;

        for service in &services {
            let titles: Vec<String> = service
                .pipeline_batches()
                .iter()
                .flat_map(batch_titles)
                .collect();
            if titles.is_empty() {
                continue;
            }

            let existing: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT title FROM content_items
                WHERE invoice_id = $1 AND service_id = $2 AND title = ANY($3)
                "#,
            )
            .bind(invoice.id)
            .bind(service.id)
            .bind(&titles)
            .fetch_all(&mut *tx)
            .await?;
            let existing: HashSet<String> = existing.into_iter().collect();
            skipped += existing.len();

            for title in titles {
                if existing.contains(&title) {
                    continue;
                }
                let item = sqlx::query_as::<_, ContentItem>(
                    r#"
                    INSERT INTO content_items (
                        title, due_date, kanban_column, client_id, invoice_id, service_id, created_by
                    )
                    VALUES ($1, $2, 'backlog', $3, $4, $5, $6)
                    RETURNING id, title, copy_text, caption, due_date, platforms, kanban_column,
                        priority, assigned_to, approval_status, revise_requested, revise_count,
                        revise_notes, post_action, scheduled_at, posted_at, platform_captions,
                        external_post_id, post_failed, post_error, client_id, invoice_id,
                        service_id, created_by, approved_by, created_at, updated_at
                    "#,
                )
                .bind(&title)
                .bind(invoice.start_date)
                .bind(invoice.client_id)
                .bind(invoice.id)
                .bind(service.id)
                .bind(actor.id)
                .fetch_one(&mut *tx)
                .await?;
                created.push(item);
            }
        }

        // Stamped once; later runs keep the original timestamp.
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET pipeline_started_at = now(), updated_at = now()
            WHERE id = $1 AND pipeline_started_at IS NULL
            RETURNING id, invoice_number, client_id, business_name, business_address, business_gstin,
                bank_account_name, bank_account_number, bank_ifsc, bank_branch,
                issue_date, start_date, due_date, gst_percentage, gst_amount, total_amount,
                status, payment_terms, notes, authorized_by, pipeline_started_at, created_at, updated_at
            "#,
        )
        .bind(invoice.id)
        .fetch_optional(&mut *tx)
        .await?
        .unwrap_or(invoice);

        tx.commit().await?;

        timer.observe_duration();

        info!(
            invoice_id = invoice.id,
            created = created.len(),
            skipped = skipped,
            "Pipeline provisioned"
        );

        Ok(PipelineStart {
            invoice,
            created,
            skipped,
        })
    }
}

/// Titles for one batch: `{prefix}-{001..count}`, zero-padded to three.
pub fn batch_titles(batch: &PipelineBatch) -> Vec<String> {
    (1..=batch.count)
        .map(|n| format!("{}-{:03}", batch.prefix, n))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_are_zero_padded_and_one_based() {
        let batch = PipelineBatch {
            prefix: "REEL".to_string(),
            count: 4,
        };
        assert_eq!(
            batch_titles(&batch),
            vec!["REEL-001", "REEL-002", "REEL-003", "REEL-004"]
        );
    }

    #[test]
    fn zero_count_yields_no_titles() {
        let batch = PipelineBatch {
            prefix: "POST".to_string(),
            count: 0,
        };
        assert!(batch_titles(&batch).is_empty());
    }
}
