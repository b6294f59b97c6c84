//! Ledger engine: invoices, line items, payments, derived totals and the
//! payment-driven status lifecycle.

use crate::middleware::AuthUser;
use crate::models::{
    client_code_candidates, compose_invoice_number, compute_totals, derive_status, ChangeLogEntry,
    CreateInvoice, FieldDelta, Invoice, InvoiceItem, InvoiceStatus, ListInvoicesFilter,
    NewInvoiceItem, Payment, PaymentMode, RecordPayment, UpdateInvoice, UpdateInvoiceItem,
    UserRole,
};
use crate::services::database::{record_change, Database};
use crate::services::metrics::{DB_QUERY_DURATION, INVOICES_TOTAL, PAYMENTS_TOTAL};
use crate::services::notifier::Notifier;
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::{is_unique_violation, AppError};
use tracing::{info, instrument};
use validator::Validate;

/// Client-code allocation retries before surfacing a conflict.
const CLIENT_CODE_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct LedgerService {
    db: Database,
    notifier: Notifier,
}

impl LedgerService {
    pub fn new(db: Database, notifier: Notifier) -> Self {
        Self { db, notifier }
    }

    fn require_staff(actor: &AuthUser) -> Result<(), AppError> {
        if actor.is_staff() {
            Ok(())
        } else {
            Err(AppError::PermissionDenied(
                "Only agency staff can manage invoices".to_string(),
            ))
        }
    }

    /// Create an invoice with its sender snapshot, optional initial items,
    /// and a generated invoice number.
    #[instrument(skip(self, actor, input), fields(client_id = input.client_id, actor_id = actor.id))]
    pub async fn create_invoice(
        &self,
        actor: &AuthUser,
        input: &CreateInvoice,
    ) -> Result<Invoice, AppError> {
        Self::require_staff(actor)?;
        input.validate()?;
        if input.gst_percentage < Decimal::ZERO {
            return Err(AppError::Validation(
                "GST percentage cannot be negative".to_string(),
            ));
        }
        for item in &input.items {
            item.validate()?;
            if item.unit_price < Decimal::ZERO {
                return Err(AppError::Validation(
                    "Unit price cannot be negative".to_string(),
                ));
            }
        }

        let client = self
            .db
            .get_user(input.client_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Client not found".to_string()))?;
        if client.role() != UserRole::Client {
            return Err(AppError::Validation(
                "Invoices can only be raised for client accounts".to_string(),
            ));
        }

        let sender = match input.business_info_id {
            Some(id) => self
                .db
                .get_business_info(id)
                .await?
                .ok_or_else(|| AppError::NotFound("Business info record not found".to_string()))?,
            None => self.db.latest_active_business_info().await?.ok_or_else(|| {
                AppError::PreconditionFailed(
                    "No active business info record to snapshot".to_string(),
                )
            })?,
        };

        let code = self.resolve_client_code(input.client_id).await?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let mut tx = self.db.pool().begin().await?;

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (
                client_id, business_name, business_address, business_gstin,
                bank_account_name, bank_account_number, bank_ifsc, bank_branch,
                issue_date, start_date, due_date, gst_percentage,
                payment_terms, notes, authorized_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, COALESCE($9, CURRENT_DATE), $10, $11, $12, $13, $14, $15)
            RETURNING id, invoice_number, client_id, business_name, business_address, business_gstin,
                bank_account_name, bank_account_number, bank_ifsc, bank_branch,
                issue_date, start_date, due_date, gst_percentage, gst_amount, total_amount,
                status, payment_terms, notes, authorized_by, pipeline_started_at, created_at, updated_at
            "#,
        )
        .bind(input.client_id)
        .bind(&sender.name)
        .bind(&sender.address)
        .bind(&sender.gstin)
        .bind(&sender.bank_account_name)
        .bind(&sender.bank_account_number)
        .bind(&sender.bank_ifsc)
        .bind(&sender.bank_branch)
        .bind(input.issue_date)
        .bind(input.start_date)
        .bind(input.due_date)
        .bind(input.gst_percentage)
        .bind(&input.payment_terms)
        .bind(&input.notes)
        .bind(actor.id)
        .fetch_one(&mut *tx)
        .await?;

        for item in &input.items {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (invoice_id, service_id, description, unit_price, quantity)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(invoice.id)
            .bind(item.service_id)
            .bind(&item.description)
            .bind(item.unit_price)
            .bind(item.quantity)
            .execute(&mut *tx)
            .await?;
        }

        let invoice =
            Self::recompute_totals(&mut tx, invoice.id, invoice.gst_percentage).await?;

        // Number assignment happens exactly once, now that the pk exists.
        let number = compose_invoice_number(&code, invoice.id, Utc::now());
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET invoice_number = $2, updated_at = now()
            WHERE id = $1 AND invoice_number IS NULL
            RETURNING id, invoice_number, client_id, business_name, business_address, business_gstin,
                bank_account_name, bank_account_number, bank_ifsc, bank_branch,
                issue_date, start_date, due_date, gst_percentage, gst_amount, total_amount,
                status, payment_terms, notes, authorized_by, pipeline_started_at, created_at, updated_at
            "#,
        )
        .bind(invoice.id)
        .bind(&number)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, None) {
                AppError::Conflict(format!("Invoice number {} already exists", number))
            } else {
                e.into()
            }
        })?;

        tx.commit().await?;

        timer.observe_duration();

        INVOICES_TOTAL
            .with_label_values(&[InvoiceStatus::Unpaid.as_str()])
            .inc();

        info!(
            invoice_id = invoice.id,
            invoice_number = %number,
            client_id = invoice.client_id,
            "Invoice created"
        );

        Ok(invoice)
    }

    /// Get an invoice. Client callers only ever see their own.
    #[instrument(skip(self, actor), fields(invoice_id = invoice_id))]
    pub async fn get_invoice(&self, actor: &AuthUser, invoice_id: i64) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT id, invoice_number, client_id, business_name, business_address, business_gstin,
                bank_account_name, bank_account_number, bank_ifsc, bank_branch,
                issue_date, start_date, due_date, gst_percentage, gst_amount, total_amount,
                status, payment_terms, notes, authorized_by, pipeline_started_at, created_at, updated_at
            FROM invoices
            WHERE id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(self.db.pool())
        .await?;

        timer.observe_duration();

        let invoice =
            invoice.ok_or_else(|| AppError::NotFound("Invoice not found".to_string()))?;
        if actor.role == UserRole::Client && invoice.client_id != actor.id {
            return Err(AppError::NotFound("Invoice not found".to_string()));
        }
        Ok(invoice)
    }

    /// Invoice with items and payments embedded.
    pub async fn get_invoice_detail(
        &self,
        actor: &AuthUser,
        invoice_id: i64,
    ) -> Result<(Invoice, Vec<InvoiceItem>, Vec<Payment>), AppError> {
        let invoice = self.get_invoice(actor, invoice_id).await?;
        let items = self.list_items(invoice_id).await?;
        let payments = self.list_payments(invoice_id).await?;
        Ok((invoice, items, payments))
    }

    /// List invoices with optional filters. Client callers are pinned to
    /// their own invoices regardless of the supplied filter.
    #[instrument(skip(self, actor, filter))]
    pub async fn list_invoices(
        &self,
        actor: &AuthUser,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let client_id = if actor.role == UserRole::Client {
            Some(actor.id)
        } else {
            filter.client_id
        };

        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT id, invoice_number, client_id, business_name, business_address, business_gstin,
                bank_account_name, bank_account_number, bank_ifsc, bank_branch,
                issue_date, start_date, due_date, gst_percentage, gst_amount, total_amount,
                status, payment_terms, notes, authorized_by, pipeline_started_at, created_at, updated_at
            FROM invoices
            WHERE ($1::bigint IS NULL OR client_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::date IS NULL OR issue_date >= $3)
              AND ($4::date IS NULL OR issue_date <= $4)
            ORDER BY id DESC
            "#,
        )
        .bind(client_id)
        .bind(&filter.status)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_all(self.db.pool())
        .await?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// Update mutable invoice fields. Attempts to change the client, the
    /// invoice number or any sender-snapshot field are rejected wholesale.
    #[instrument(skip(self, actor, update), fields(invoice_id = invoice_id, actor_id = actor.id))]
    pub async fn update_invoice(
        &self,
        actor: &AuthUser,
        invoice_id: i64,
        update: &UpdateInvoice,
    ) -> Result<Invoice, AppError> {
        Self::require_staff(actor)?;

        let invoice = self.get_invoice(actor, invoice_id).await?;

        let violations = invoice.immutable_violations(update);
        if !violations.is_empty() {
            return Err(AppError::ImmutableField(violations.join(", ")));
        }

        let mut deltas = Vec::new();
        if let Some(v) = update.start_date {
            if invoice.start_date != Some(v) {
                deltas.push(FieldDelta::new("start_date", invoice.start_date, v));
            }
        }
        if let Some(v) = update.due_date {
            if invoice.due_date != Some(v) {
                deltas.push(FieldDelta::new("due_date", invoice.due_date, v));
            }
        }
        if let Some(v) = &update.payment_terms {
            if invoice.payment_terms.as_deref() != Some(v.as_str()) {
                deltas.push(FieldDelta::new(
                    "payment_terms",
                    invoice.payment_terms.clone(),
                    v.clone(),
                ));
            }
        }
        if let Some(v) = &update.notes {
            if invoice.notes.as_deref() != Some(v.as_str()) {
                deltas.push(FieldDelta::new("notes", invoice.notes.clone(), v.clone()));
            }
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let mut tx = self.db.pool().begin().await?;

        let updated = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET start_date = COALESCE($2, start_date),
                due_date = COALESCE($3, due_date),
                payment_terms = COALESCE($4, payment_terms),
                notes = COALESCE($5, notes),
                updated_at = now()
            WHERE id = $1
            RETURNING id, invoice_number, client_id, business_name, business_address, business_gstin,
                bank_account_name, bank_account_number, bank_ifsc, bank_branch,
                issue_date, start_date, due_date, gst_percentage, gst_amount, total_amount,
                status, payment_terms, notes, authorized_by, pipeline_started_at, created_at, updated_at
            "#,
        )
        .bind(invoice.id)
        .bind(update.start_date)
        .bind(update.due_date)
        .bind(&update.payment_terms)
        .bind(&update.notes)
        .fetch_one(&mut *tx)
        .await?;

        record_change(&mut *tx, "invoice", invoice.id, Some(actor.id), &deltas).await?;

        tx.commit().await?;

        timer.observe_duration();

        info!(invoice_id = invoice.id, "Invoice updated");

        Ok(updated)
    }

    /// Add a billing line and recompute the invoice totals from a fresh read
    /// of all items, in one transaction.
    #[instrument(skip(self, actor, input), fields(invoice_id = invoice_id, actor_id = actor.id))]
    pub async fn add_item(
        &self,
        actor: &AuthUser,
        invoice_id: i64,
        input: &NewInvoiceItem,
    ) -> Result<(InvoiceItem, Invoice), AppError> {
        Self::require_staff(actor)?;
        input.validate()?;
        if input.unit_price < Decimal::ZERO {
            return Err(AppError::Validation(
                "Unit price cannot be negative".to_string(),
            ));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["add_item"])
            .start_timer();

        let mut tx = self.db.pool().begin().await?;

        let invoice = Self::lock_invoice(&mut tx, invoice_id).await?;

        let item = sqlx::query_as::<_, InvoiceItem>(
            r#"
            INSERT INTO invoice_items (invoice_id, service_id, description, unit_price, quantity)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, invoice_id, service_id, description, unit_price, quantity, created_at
            "#,
        )
        .bind(invoice.id)
        .bind(input.service_id)
        .bind(&input.description)
        .bind(input.unit_price)
        .bind(input.quantity)
        .fetch_one(&mut *tx)
        .await?;

        let invoice = Self::recompute_totals(&mut tx, invoice.id, invoice.gst_percentage).await?;

        tx.commit().await?;

        timer.observe_duration();

        info!(
            item_id = item.id,
            invoice_id = invoice.id,
            total_amount = %invoice.total_amount,
            "Invoice item added"
        );

        let notifier = self.notifier.clone();
        let invoice_copy = invoice.clone();
        let item_copy = item.clone();
        tokio::spawn(async move {
            notifier
                .invoice_item_recorded(&invoice_copy, &item_copy)
                .await;
        });

        Ok((item, invoice))
    }

    /// Update a billing line, then recompute totals the same way add does.
    #[instrument(skip(self, actor, input), fields(invoice_id = invoice_id, item_id = item_id))]
    pub async fn update_item(
        &self,
        actor: &AuthUser,
        invoice_id: i64,
        item_id: i64,
        input: &UpdateInvoiceItem,
    ) -> Result<(InvoiceItem, Invoice), AppError> {
        Self::require_staff(actor)?;
        input.validate()?;
        if input.unit_price.is_some_and(|p| p < Decimal::ZERO) {
            return Err(AppError::Validation(
                "Unit price cannot be negative".to_string(),
            ));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_item"])
            .start_timer();

        let mut tx = self.db.pool().begin().await?;

        let invoice = Self::lock_invoice(&mut tx, invoice_id).await?;

        let item = sqlx::query_as::<_, InvoiceItem>(
            r#"
            UPDATE invoice_items
            SET service_id = COALESCE($3, service_id),
                description = COALESCE($4, description),
                unit_price = COALESCE($5, unit_price),
                quantity = COALESCE($6, quantity)
            WHERE id = $2 AND invoice_id = $1
            RETURNING id, invoice_id, service_id, description, unit_price, quantity, created_at
            "#,
        )
        .bind(invoice.id)
        .bind(item_id)
        .bind(input.service_id)
        .bind(&input.description)
        .bind(input.unit_price)
        .bind(input.quantity)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Invoice item not found".to_string()))?;

        let invoice = Self::recompute_totals(&mut tx, invoice.id, invoice.gst_percentage).await?;

        tx.commit().await?;

        timer.observe_duration();

        info!(item_id = item.id, invoice_id = invoice.id, "Invoice item updated");

        Ok((item, invoice))
    }

    /// Remove a billing line and recompute totals.
    #[instrument(skip(self, actor), fields(invoice_id = invoice_id, item_id = item_id))]
    pub async fn remove_item(
        &self,
        actor: &AuthUser,
        invoice_id: i64,
        item_id: i64,
    ) -> Result<Invoice, AppError> {
        Self::require_staff(actor)?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["remove_item"])
            .start_timer();

        let mut tx = self.db.pool().begin().await?;

        let invoice = Self::lock_invoice(&mut tx, invoice_id).await?;

        let result = sqlx::query("DELETE FROM invoice_items WHERE id = $2 AND invoice_id = $1")
            .bind(invoice.id)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Invoice item not found".to_string()));
        }

        let invoice = Self::recompute_totals(&mut tx, invoice.id, invoice.gst_percentage).await?;

        tx.commit().await?;

        timer.observe_duration();

        info!(item_id = item_id, invoice_id = invoice.id, "Invoice item removed");

        Ok(invoice)
    }

    /// Record a payment and derive the new status, atomically. The invoice
    /// row is locked so concurrent payments serialize.
    #[instrument(skip(self, actor, input), fields(invoice_id = invoice_id, actor_id = actor.id))]
    pub async fn record_payment(
        &self,
        actor: &AuthUser,
        invoice_id: i64,
        input: &RecordPayment,
    ) -> Result<(Payment, Invoice), AppError> {
        Self::require_staff(actor)?;
        input.validate()?;
        if input.amount <= Decimal::ZERO {
            return Err(AppError::Validation(
                "Payment amount must be positive".to_string(),
            ));
        }
        let mode = PaymentMode::from_string(&input.mode).ok_or_else(|| {
            AppError::Validation(format!("Unknown payment mode: {}", input.mode))
        })?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_payment"])
            .start_timer();

        let mut tx = self.db.pool().begin().await?;

        let invoice = Self::lock_invoice(&mut tx, invoice_id).await?;
        if invoice.status() == InvoiceStatus::Cancelled {
            return Err(AppError::PreconditionFailed(
                "Payments cannot be recorded on a cancelled invoice".to_string(),
            ));
        }

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (invoice_id, amount, mode, reference, paid_at, received_by)
            VALUES ($1, $2, $3, $4, COALESCE($5, now()), $6)
            RETURNING id, invoice_id, amount, mode, reference, paid_at, received_by, created_at
            "#,
        )
        .bind(invoice.id)
        .bind(input.amount)
        .bind(mode.as_str())
        .bind(&input.reference)
        .bind(input.paid_at)
        .bind(actor.id)
        .fetch_one(&mut *tx)
        .await?;

        let paid_total: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE invoice_id = $1",
        )
        .bind(invoice.id)
        .fetch_one(&mut *tx)
        .await?;

        let previous = invoice.status();
        let next = derive_status(paid_total, invoice.total_amount);

        let invoice = if next != previous {
            let updated = sqlx::query_as::<_, Invoice>(
                r#"
                UPDATE invoices
                SET status = $2, updated_at = now()
                WHERE id = $1
                RETURNING id, invoice_number, client_id, business_name, business_address, business_gstin,
                    bank_account_name, bank_account_number, bank_ifsc, bank_branch,
                    issue_date, start_date, due_date, gst_percentage, gst_amount, total_amount,
                    status, payment_terms, notes, authorized_by, pipeline_started_at, created_at, updated_at
                "#,
            )
            .bind(invoice.id)
            .bind(next.as_str())
            .fetch_one(&mut *tx)
            .await?;

            record_change(
                &mut *tx,
                "invoice",
                updated.id,
                Some(actor.id),
                &[FieldDelta::new("status", previous.as_str(), next.as_str())],
            )
            .await?;

            updated
        } else {
            invoice
        };

        tx.commit().await?;

        timer.observe_duration();

        PAYMENTS_TOTAL.with_label_values(&[mode.as_str()]).inc();

        info!(
            payment_id = payment.id,
            invoice_id = invoice.id,
            amount = %payment.amount,
            status = %invoice.status,
            "Payment recorded"
        );

        if next != previous {
            INVOICES_TOTAL.with_label_values(&[next.as_str()]).inc();

            let notifier = self.notifier.clone();
            let invoice_copy = invoice.clone();
            let actor_id = actor.id;
            tokio::spawn(async move {
                notifier
                    .invoice_status_changed(&invoice_copy, next, Some(actor_id))
                    .await;
            });
        }

        Ok((payment, invoice))
    }

    /// Items for an invoice, oldest first.
    pub async fn list_items(&self, invoice_id: i64) -> Result<Vec<InvoiceItem>, AppError> {
        let items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT id, invoice_id, service_id, description, unit_price, quantity, created_at
            FROM invoice_items
            WHERE invoice_id = $1
            ORDER BY id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(items)
    }

    /// Payments against an invoice, oldest first.
    pub async fn list_payments(&self, invoice_id: i64) -> Result<Vec<Payment>, AppError> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, invoice_id, amount, mode, reference, paid_at, received_by, created_at
            FROM payments
            WHERE invoice_id = $1
            ORDER BY id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(payments)
    }

    /// Audit history for an invoice the caller can see.
    pub async fn invoice_history(
        &self,
        actor: &AuthUser,
        invoice_id: i64,
    ) -> Result<Vec<ChangeLogEntry>, AppError> {
        let invoice = self.get_invoice(actor, invoice_id).await?;
        self.db.list_changes("invoice", invoice.id).await
    }

    /// The profile's client code, deriving and claiming one from the company
    /// name when absent. The unique constraint backstops the check-then-act
    /// race; claiming retries with the next free candidate.
    async fn resolve_client_code(&self, client_id: i64) -> Result<String, AppError> {
        let profile = self
            .db
            .get_client_profile(client_id)
            .await?
            .ok_or_else(|| {
                AppError::PreconditionFailed(
                    "Client has no profile to derive a client code from".to_string(),
                )
            })?;

        if let Some(code) = profile.client_code {
            return Ok(code);
        }

        for _ in 0..CLIENT_CODE_ATTEMPTS {
            let taken = self.db.taken_client_codes().await?;
            let candidates = client_code_candidates(&profile.company_name);
            let Some(candidate) = candidates.into_iter().find(|c| !taken.contains(c)) else {
                break;
            };

            if self.db.try_claim_client_code(profile.id, &candidate).await? {
                return Ok(candidate);
            }

            // Lost the race. Either another writer coded this profile, or the
            // candidate was taken; refresh and retry.
            if let Some(refreshed) = self.db.get_client_profile(client_id).await? {
                if let Some(code) = refreshed.client_code {
                    return Ok(code);
                }
            }
        }

        Err(AppError::Conflict(
            "Could not allocate a unique client code".to_string(),
        ))
    }

    /// Lock the invoice row for the rest of the transaction.
    async fn lock_invoice(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        invoice_id: i64,
    ) -> Result<Invoice, AppError> {
        sqlx::query_as::<_, Invoice>(
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
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Invoice not found".to_string()))
    }

    /// Recompute gst_amount and total_amount from a fresh read of all items,
    /// writing them back with a targeted totals-only update.
    async fn recompute_totals(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        invoice_id: i64,
        gst_percentage: Decimal,
    ) -> Result<Invoice, AppError> {
        let items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT id, invoice_id, service_id, description, unit_price, quantity, created_at
            FROM invoice_items
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&mut **tx)
        .await?;

        let items_total: Decimal = items.iter().map(|item| item.line_total()).sum();
        let (gst_amount, total_amount) = compute_totals(items_total, gst_percentage);

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET gst_amount = $2, total_amount = $3, updated_at = now()
            WHERE id = $1
            RETURNING id, invoice_number, client_id, business_name, business_address, business_gstin,
                bank_account_name, bank_account_number, bank_ifsc, bank_branch,
                issue_date, start_date, due_date, gst_percentage, gst_amount, total_amount,
                status, payment_terms, notes, authorized_by, pipeline_started_at, created_at, updated_at
            "#,
        )
        .bind(invoice_id)
        .bind(gst_amount)
        .bind(total_amount)
        .fetch_one(&mut **tx)
        .await?;

        Ok(invoice)
    }
}
