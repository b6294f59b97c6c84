//! Content pipeline: kanban items, the move/approval state machine,
//! scheduling and media attachments.

use crate::middleware::AuthUser;
use crate::models::{
    can_move, ApprovalRequest, ApprovalStatus, AttachMedia, ChangeLogEntry, ContentItem,
    CreateContentItem, FieldDelta, KanbanColumn, ListContentItemsFilter, MediaAsset, MediaType,
    MoveRequest, MoveTarget, PostAction, Priority, ScheduleRequest, UpdateContentItem, UserRole,
};
use crate::services::database::{record_change, Database};
use crate::services::metrics::{CONTENT_MOVES_TOTAL, DB_QUERY_DURATION};
use crate::services::notifier::Notifier;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use service_core::error::AppError;
use tracing::{info, instrument};
use validator::Validate;

#[derive(Clone)]
pub struct PipelineService {
    db: Database,
    notifier: Notifier,
    utc_offset_minutes: i32,
}

impl PipelineService {
    pub fn new(db: Database, notifier: Notifier, utc_offset_minutes: i32) -> Self {
        Self {
            db,
            notifier,
            utc_offset_minutes,
        }
    }

    /// Create a content item. The column always starts at backlog no matter
    /// what the caller sends; clients may only create items for themselves.
    #[instrument(skip(self, actor, input), fields(client_id = input.client_id, actor_id = actor.id))]
    pub async fn create_item(
        &self,
        actor: &AuthUser,
        input: &CreateContentItem,
    ) -> Result<ContentItem, AppError> {
        input.validate()?;
        if let Some(priority) = &input.priority {
            Priority::from_string(priority)
                .ok_or_else(|| AppError::Validation(format!("Unknown priority: {}", priority)))?;
        }
        if actor.role == UserRole::Client && input.client_id != actor.id {
            return Err(AppError::PermissionDenied(
                "Clients can only create content for their own account".to_string(),
            ));
        }

        let client = self
            .db
            .get_user(input.client_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Client not found".to_string()))?;
        if client.role() != UserRole::Client {
            return Err(AppError::Validation(
                "Content items belong to client accounts".to_string(),
            ));
        }

        let platforms = serde_json::json!(input.platforms.clone().unwrap_or_default());

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_content_item"])
            .start_timer();

        let item = sqlx::query_as::<_, ContentItem>(
            r#"
            INSERT INTO content_items (
                title, copy_text, caption, due_date, platforms, kanban_column,
                priority, assigned_to, client_id, invoice_id, service_id, created_by
            )
            VALUES ($1, COALESCE($2, ''), COALESCE($3, ''), $4, $5, 'backlog',
                    COALESCE($6, 'medium'), $7, $8, $9, $10, $11)
            RETURNING id, title, copy_text, caption, due_date, platforms, kanban_column,
                priority, assigned_to, approval_status, revise_requested, revise_count,
                revise_notes, post_action, scheduled_at, posted_at, platform_captions,
                external_post_id, post_failed, post_error, client_id, invoice_id,
                service_id, created_by, approved_by, created_at, updated_at
            "#,
        )
        .bind(&input.title)
        .bind(&input.copy_text)
        .bind(&input.caption)
        .bind(input.due_date)
        .bind(platforms)
        .bind(&input.priority)
        .bind(input.assigned_to)
        .bind(input.client_id)
        .bind(input.invoice_id)
        .bind(input.service_id)
        .bind(actor.id)
        .fetch_one(self.db.pool())
        .await?;

        timer.observe_duration();

        info!(
            content_item_id = item.id,
            client_id = item.client_id,
            "Content item created"
        );

        Ok(item)
    }

    /// Get a content item. Client callers only ever see their own.
    pub async fn get_item(&self, actor: &AuthUser, item_id: i64) -> Result<ContentItem, AppError> {
        let item = sqlx::query_as::<_, ContentItem>(
            r#"
            SELECT id, title, copy_text, caption, due_date, platforms, kanban_column,
                priority, assigned_to, approval_status, revise_requested, revise_count,
                revise_notes, post_action, scheduled_at, posted_at, platform_captions,
                external_post_id, post_failed, post_error, client_id, invoice_id,
                service_id, created_by, approved_by, created_at, updated_at
            FROM content_items
            WHERE id = $1
            "#,
        )
        .bind(item_id)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| AppError::NotFound("Content item not found".to_string()))?;

        if actor.role == UserRole::Client && item.client_id != actor.id {
            return Err(AppError::NotFound("Content item not found".to_string()));
        }
        Ok(item)
    }

    /// List content items. Client callers are pinned to their own items.
    #[instrument(skip(self, actor, filter))]
    pub async fn list_items(
        &self,
        actor: &AuthUser,
        filter: &ListContentItemsFilter,
    ) -> Result<Vec<ContentItem>, AppError> {
        if let Some(column) = &filter.column {
            KanbanColumn::from_string(column)
                .ok_or_else(|| AppError::Validation(format!("Unknown column: {}", column)))?;
        }

        let client_id = if actor.role == UserRole::Client {
            Some(actor.id)
        } else {
            filter.client_id
        };

        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_content_items"])
            .start_timer();

        let items = sqlx::query_as::<_, ContentItem>(
            r#"
            SELECT id, title, copy_text, caption, due_date, platforms, kanban_column,
                priority, assigned_to, approval_status, revise_requested, revise_count,
                revise_notes, post_action, scheduled_at, posted_at, platform_captions,
                external_post_id, post_failed, post_error, client_id, invoice_id,
                service_id, created_by, approved_by, created_at, updated_at
            FROM content_items
            WHERE ($1::bigint IS NULL OR client_id = $1)
              AND ($2::text IS NULL OR kanban_column = $2)
              AND ($3::bigint IS NULL OR assigned_to = $3)
              AND ($4::bigint IS NULL OR invoice_id = $4)
            ORDER BY id DESC
            "#,
        )
        .bind(client_id)
        .bind(&filter.column)
        .bind(filter.assigned_to)
        .bind(filter.invoice_id)
        .fetch_all(self.db.pool())
        .await?;

        timer.observe_duration();

        Ok(items)
    }

    /// Update mutable content fields. Column and approval state never change
    /// here; those go through move and approval.
    #[instrument(skip(self, actor, input), fields(content_item_id = item_id, actor_id = actor.id))]
    pub async fn update_item(
        &self,
        actor: &AuthUser,
        item_id: i64,
        input: &UpdateContentItem,
    ) -> Result<ContentItem, AppError> {
        input.validate()?;
        if let Some(priority) = &input.priority {
            Priority::from_string(priority)
                .ok_or_else(|| AppError::Validation(format!("Unknown priority: {}", priority)))?;
        }

        let item = self.get_item(actor, item_id).await?;
        let platforms = input.platforms.as_ref().map(|p| serde_json::json!(p));

        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_content_item"])
            .start_timer();

        let updated = sqlx::query_as::<_, ContentItem>(
            r#"
            UPDATE content_items
            SET title = COALESCE($2, title),
                copy_text = COALESCE($3, copy_text),
                caption = COALESCE($4, caption),
                due_date = COALESCE($5, due_date),
                platforms = COALESCE($6, platforms),
                priority = COALESCE($7, priority),
                assigned_to = COALESCE($8, assigned_to),
                platform_captions = COALESCE($9, platform_captions),
                updated_at = now()
            WHERE id = $1
            RETURNING id, title, copy_text, caption, due_date, platforms, kanban_column,
                priority, assigned_to, approval_status, revise_requested, revise_count,
                revise_notes, post_action, scheduled_at, posted_at, platform_captions,
                external_post_id, post_failed, post_error, client_id, invoice_id,
                service_id, created_by, approved_by, created_at, updated_at
            "#,
        )
        .bind(item.id)
        .bind(&input.title)
        .bind(&input.copy_text)
        .bind(&input.caption)
        .bind(input.due_date)
        .bind(platforms)
        .bind(&input.priority)
        .bind(input.assigned_to)
        .bind(&input.platform_captions)
        .fetch_one(self.db.pool())
        .await?;

        timer.observe_duration();

        info!(content_item_id = updated.id, "Content item updated");

        let notifier = self.notifier.clone();
        let item_copy = updated.clone();
        tokio::spawn(async move {
            notifier.content_item_updated(&item_copy).await;
        });

        Ok(updated)
    }

    /// Move an item on the board, enforcing the per-role transition table.
    /// A client sending "revise_needed" takes the revise path.
    #[instrument(skip(self, actor, input), fields(content_item_id = item_id, actor_id = actor.id))]
    pub async fn move_item(
        &self,
        actor: &AuthUser,
        item_id: i64,
        input: &MoveRequest,
    ) -> Result<ContentItem, AppError> {
        let target = MoveTarget::from_string(&input.column)
            .ok_or_else(|| AppError::Validation(format!("Unknown column: {}", input.column)))?;

        let item = self.get_item(actor, item_id).await?;
        let from = item.column();

        if !can_move(actor.role, from, target) {
            return Err(AppError::PermissionDenied(format!(
                "{} cannot move an item from {} to {}",
                actor.role.as_str(),
                from.as_str(),
                input.column
            )));
        }

        if target == MoveTarget::ReviseNeeded {
            return self.apply_revise(actor, &item, None).await;
        }

        let destination = target.destination();
        // Items arriving for client approval always restart at pending.
        let reset_approval = destination == KanbanColumn::ClientApproval
            && from != KanbanColumn::ClientApproval;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["move_content_item"])
            .start_timer();

        let mut tx = self.db.pool().begin().await?;

        let updated = sqlx::query_as::<_, ContentItem>(
            r#"
            UPDATE content_items
            SET kanban_column = $2,
                approval_status = CASE WHEN $3 THEN 'pending' ELSE approval_status END,
                updated_at = now()
            WHERE id = $1
            RETURNING id, title, copy_text, caption, due_date, platforms, kanban_column,
                priority, assigned_to, approval_status, revise_requested, revise_count,
                revise_notes, post_action, scheduled_at, posted_at, platform_captions,
                external_post_id, post_failed, post_error, client_id, invoice_id,
                service_id, created_by, approved_by, created_at, updated_at
            "#,
        )
        .bind(item.id)
        .bind(destination.as_str())
        .bind(reset_approval)
        .fetch_one(&mut *tx)
        .await?;

        record_change(
            &mut *tx,
            "content_item",
            item.id,
            Some(actor.id),
            &[FieldDelta::new(
                "kanban_column",
                from.as_str(),
                destination.as_str(),
            )],
        )
        .await?;

        tx.commit().await?;

        timer.observe_duration();

        CONTENT_MOVES_TOTAL
            .with_label_values(&[destination.as_str()])
            .inc();

        info!(
            content_item_id = updated.id,
            from = from.as_str(),
            to = destination.as_str(),
            "Content item moved"
        );

        self.emit_status_change(&updated, destination.as_str(), actor.id);

        Ok(updated)
    }

    /// Approve or send back an item under client review. Only managers and
    /// clients take this action, and only while the item sits in
    /// client_approval.
    #[instrument(skip(self, actor, input), fields(content_item_id = item_id, actor_id = actor.id))]
    pub async fn approve(
        &self,
        actor: &AuthUser,
        item_id: i64,
        input: &ApprovalRequest,
    ) -> Result<ContentItem, AppError> {
        let item = self.get_item(actor, item_id).await?;

        if item.column() != KanbanColumn::ClientApproval {
            return Err(AppError::PreconditionFailed(
                "Approval actions are only available while the item awaits client approval"
                    .to_string(),
            ));
        }
        if !matches!(actor.role, UserRole::Manager | UserRole::Client) {
            return Err(AppError::PermissionDenied(
                "Only managers and clients can act on approvals".to_string(),
            ));
        }

        match input.action.as_str() {
            "approve" => self.apply_approve(actor, &item).await,
            "revise" => self.apply_revise(actor, &item, input.notes.as_deref()).await,
            other => Err(AppError::Validation(format!(
                "Unknown approval action: {}",
                other
            ))),
        }
    }

    /// Schedule an item for posting. Naive timestamps are interpreted in the
    /// configured local UTC offset.
    #[instrument(skip(self, actor, input), fields(content_item_id = item_id, actor_id = actor.id))]
    pub async fn schedule(
        &self,
        actor: &AuthUser,
        item_id: i64,
        input: &ScheduleRequest,
    ) -> Result<ContentItem, AppError> {
        if !matches!(actor.role, UserRole::Superadmin | UserRole::Manager) {
            return Err(AppError::PermissionDenied(
                "Only managers can schedule content".to_string(),
            ));
        }

        let scheduled_at = parse_schedule_time(&input.scheduled_at, self.utc_offset_minutes)?;
        let item = self.get_item(actor, item_id).await?;
        let from = item.column();

        let timer = DB_QUERY_DURATION
            .with_label_values(&["schedule_content_item"])
            .start_timer();

        let mut tx = self.db.pool().begin().await?;

        let updated = sqlx::query_as::<_, ContentItem>(
            r#"
            UPDATE content_items
            SET scheduled_at = $2,
                post_action = $3,
                kanban_column = $4,
                updated_at = now()
            WHERE id = $1
            RETURNING id, title, copy_text, caption, due_date, platforms, kanban_column,
                priority, assigned_to, approval_status, revise_requested, revise_count,
                revise_notes, post_action, scheduled_at, posted_at, platform_captions,
                external_post_id, post_failed, post_error, client_id, invoice_id,
                service_id, created_by, approved_by, created_at, updated_at
            "#,
        )
        .bind(item.id)
        .bind(scheduled_at)
        .bind(PostAction::Schedule.as_str())
        .bind(KanbanColumn::Scheduled.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let mut deltas = vec![FieldDelta::new(
            "scheduled_at",
            item.scheduled_at,
            scheduled_at,
        )];
        if from != KanbanColumn::Scheduled {
            deltas.push(FieldDelta::new(
                "kanban_column",
                from.as_str(),
                KanbanColumn::Scheduled.as_str(),
            ));
        }
        record_change(&mut *tx, "content_item", item.id, Some(actor.id), &deltas).await?;

        tx.commit().await?;

        timer.observe_duration();

        CONTENT_MOVES_TOTAL
            .with_label_values(&[KanbanColumn::Scheduled.as_str()])
            .inc();

        info!(
            content_item_id = updated.id,
            scheduled_at = %scheduled_at,
            "Content item scheduled"
        );

        self.emit_status_change(&updated, "scheduled", actor.id);

        Ok(updated)
    }

    /// Attach a media asset. Agency-side only; the kind is inferred from the
    /// declared content type and the order defaults to the end of the reel.
    #[instrument(skip(self, actor, input), fields(content_item_id = item_id, actor_id = actor.id))]
    pub async fn attach_media(
        &self,
        actor: &AuthUser,
        item_id: i64,
        input: &AttachMedia,
    ) -> Result<MediaAsset, AppError> {
        if actor.role == UserRole::Client {
            return Err(AppError::PermissionDenied(
                "Clients cannot attach media".to_string(),
            ));
        }
        input.validate()?;

        let item = self.get_item(actor, item_id).await?;
        let media_type = MediaType::from_content_type(input.content_type.as_deref());

        let timer = DB_QUERY_DURATION
            .with_label_values(&["attach_media"])
            .start_timer();

        let asset = sqlx::query_as::<_, MediaAsset>(
            r#"
            INSERT INTO media_assets (content_item_id, file_url, media_type, display_order, uploaded_by)
            VALUES ($1, $2, $3,
                    CASE WHEN COALESCE($4, 0) > 0 THEN $4
                         ELSE (SELECT COUNT(*) + 1 FROM media_assets WHERE content_item_id = $1)::int
                    END,
                    $5)
            RETURNING id, content_item_id, file_url, media_type, display_order, uploaded_by, created_at
            "#,
        )
        .bind(item.id)
        .bind(&input.file_url)
        .bind(media_type.as_str())
        .bind(input.display_order)
        .bind(actor.id)
        .fetch_one(self.db.pool())
        .await?;

        timer.observe_duration();

        info!(
            media_asset_id = asset.id,
            content_item_id = item.id,
            media_type = media_type.as_str(),
            "Media attached"
        );

        Ok(asset)
    }

    /// Media for an item, in display order.
    pub async fn list_media(
        &self,
        actor: &AuthUser,
        item_id: i64,
    ) -> Result<Vec<MediaAsset>, AppError> {
        let item = self.get_item(actor, item_id).await?;
        let assets = sqlx::query_as::<_, MediaAsset>(
            r#"
            SELECT id, content_item_id, file_url, media_type, display_order, uploaded_by, created_at
            FROM media_assets
            WHERE content_item_id = $1
            ORDER BY display_order, id
            "#,
        )
        .bind(item.id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(assets)
    }

    /// Audit history for an item the caller can see.
    pub async fn item_history(
        &self,
        actor: &AuthUser,
        item_id: i64,
    ) -> Result<Vec<ChangeLogEntry>, AppError> {
        let item = self.get_item(actor, item_id).await?;
        self.db.list_changes("content_item", item.id).await
    }

    async fn apply_approve(
        &self,
        actor: &AuthUser,
        item: &ContentItem,
    ) -> Result<ContentItem, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["approve_content_item"])
            .start_timer();

        let mut tx = self.db.pool().begin().await?;

        let updated = sqlx::query_as::<_, ContentItem>(
            r#"
            UPDATE content_items
            SET approval_status = $2,
                kanban_column = $3,
                approved_by = $4,
                updated_at = now()
            WHERE id = $1
            RETURNING id, title, copy_text, caption, due_date, platforms, kanban_column,
                priority, assigned_to, approval_status, revise_requested, revise_count,
                revise_notes, post_action, scheduled_at, posted_at, platform_captions,
                external_post_id, post_failed, post_error, client_id, invoice_id,
                service_id, created_by, approved_by, created_at, updated_at
            "#,
        )
        .bind(item.id)
        .bind(ApprovalStatus::Approved.as_str())
        .bind(KanbanColumn::Scheduled.as_str())
        .bind(actor.id)
        .fetch_one(&mut *tx)
        .await?;

        record_change(
            &mut *tx,
            "content_item",
            item.id,
            Some(actor.id),
            &[
                FieldDelta::new(
                    "approval_status",
                    item.approval_status.clone(),
                    ApprovalStatus::Approved.as_str(),
                ),
                FieldDelta::new(
                    "kanban_column",
                    item.kanban_column.clone(),
                    KanbanColumn::Scheduled.as_str(),
                ),
            ],
        )
        .await?;

        tx.commit().await?;

        timer.observe_duration();

        CONTENT_MOVES_TOTAL
            .with_label_values(&[KanbanColumn::Scheduled.as_str()])
            .inc();

        info!(content_item_id = updated.id, "Content item approved");

        self.emit_status_change(&updated, "approved", actor.id);

        Ok(updated)
    }

    async fn apply_revise(
        &self,
        actor: &AuthUser,
        item: &ContentItem,
        notes: Option<&str>,
    ) -> Result<ContentItem, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["revise_content_item"])
            .start_timer();

        let mut tx = self.db.pool().begin().await?;

        let updated = sqlx::query_as::<_, ContentItem>(
            r#"
            UPDATE content_items
            SET approval_status = $2,
                kanban_column = $3,
                revise_requested = TRUE,
                revise_count = revise_count + 1,
                revise_notes = COALESCE($4, revise_notes),
                updated_at = now()
            WHERE id = $1
            RETURNING id, title, copy_text, caption, due_date, platforms, kanban_column,
                priority, assigned_to, approval_status, revise_requested, revise_count,
                revise_notes, post_action, scheduled_at, posted_at, platform_captions,
                external_post_id, post_failed, post_error, client_id, invoice_id,
                service_id, created_by, approved_by, created_at, updated_at
            "#,
        )
        .bind(item.id)
        .bind(ApprovalStatus::ReviseNeeded.as_str())
        .bind(KanbanColumn::ContentWriting.as_str())
        .bind(notes)
        .fetch_one(&mut *tx)
        .await?;

        record_change(
            &mut *tx,
            "content_item",
            item.id,
            Some(actor.id),
            &[
                FieldDelta::new(
                    "approval_status",
                    item.approval_status.clone(),
                    ApprovalStatus::ReviseNeeded.as_str(),
                ),
                FieldDelta::new(
                    "kanban_column",
                    item.kanban_column.clone(),
                    KanbanColumn::ContentWriting.as_str(),
                ),
            ],
        )
        .await?;

        tx.commit().await?;

        timer.observe_duration();

        CONTENT_MOVES_TOTAL
            .with_label_values(&[KanbanColumn::ContentWriting.as_str()])
            .inc();

        info!(
            content_item_id = updated.id,
            revise_count = updated.revise_count,
            "Content item sent back for revision"
        );

        self.emit_status_change(&updated, "revise_requested", actor.id);

        Ok(updated)
    }

    fn emit_status_change(&self, item: &ContentItem, action: &str, actor_id: i64) {
        let notifier = self.notifier.clone();
        let item_copy = item.clone();
        let action = action.to_string();
        tokio::spawn(async move {
            notifier
                .content_item_status_changed(&item_copy, &action, Some(actor_id))
                .await;
        });
    }
}

/// Parse a schedule timestamp. RFC 3339 strings carry their own offset;
/// naive `YYYY-MM-DDTHH:MM[:SS]` strings are read in the given offset.
pub fn parse_schedule_time(raw: &str, utc_offset_minutes: i32) -> Result<DateTime<Utc>, AppError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .map_err(|_| AppError::Validation(format!("Unparseable scheduled_at: {}", raw)))?;

    let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
        .ok_or_else(|| AppError::Validation("Configured UTC offset is out of range".to_string()))?;

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| AppError::Validation(format!("Unparseable scheduled_at: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rfc3339_timestamps_keep_their_offset() {
        let parsed = parse_schedule_time("2026-03-01T10:00:00+05:30", 0).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 3, 1, 4, 30, 0).unwrap());
    }

    #[test]
    fn naive_timestamps_use_the_configured_offset() {
        // 10:00 at UTC+05:30 is 04:30 UTC.
        let parsed = parse_schedule_time("2026-03-01T10:00:00", 330).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 3, 1, 4, 30, 0).unwrap());

        let parsed = parse_schedule_time("2026-03-01 10:00:00", 0).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn garbage_timestamps_are_rejected() {
        assert!(parse_schedule_time("next tuesday", 0).is_err());
        assert!(parse_schedule_time("", 330).is_err());
    }
}
