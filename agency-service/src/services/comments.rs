//! Comment threads on content items: one level of nesting, at most one
//! reply per comment, per-user read marks.

use crate::middleware::AuthUser;
use crate::models::{author_role_for, ContentComment, ContentItem, CreateComment};
use crate::services::database::Database;
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::notifier::Notifier;
use service_core::error::{is_unique_violation, AppError};
use tracing::{info, instrument};
use validator::Validate;

#[derive(Clone)]
pub struct CommentService {
    db: Database,
    notifier: Notifier,
}

impl CommentService {
    pub fn new(db: Database, notifier: Notifier) -> Self {
        Self { db, notifier }
    }

    /// Post a comment or a reply. Replies attach to top-level comments on
    /// the same item, and each comment carries at most one reply. The
    /// author's read mark moves to now, and the other party is notified.
    #[instrument(skip(self, actor, item, input), fields(content_item_id = item.id, actor_id = actor.id))]
    pub async fn create_comment(
        &self,
        actor: &AuthUser,
        item: &ContentItem,
        input: &CreateComment,
    ) -> Result<ContentComment, AppError> {
        input.validate()?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_comment"])
            .start_timer();

        let mut tx = self.db.pool().begin().await?;

        if let Some(parent_id) = input.parent_id {
            let parent = sqlx::query_as::<_, ContentComment>(
                r#"
                SELECT id, content_item_id, parent_id, author_id, author_role, body, created_at
                FROM content_comments
                WHERE id = $1
                FOR UPDATE
                "#,
            )
            .bind(parent_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound("Parent comment not found".to_string()))?;

            if parent.parent_id.is_some() {
                return Err(AppError::Validation(
                    "Replies cannot be nested further".to_string(),
                ));
            }
            if parent.content_item_id != item.id {
                return Err(AppError::Validation(
                    "Parent comment belongs to a different content item".to_string(),
                ));
            }

            let has_reply: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM content_comments WHERE parent_id = $1)",
            )
            .bind(parent_id)
            .fetch_one(&mut *tx)
            .await?;
            if has_reply {
                return Err(AppError::Conflict(
                    "Comment already has a reply".to_string(),
                ));
            }
        }

        let comment = sqlx::query_as::<_, ContentComment>(
            r#"
            INSERT INTO content_comments (content_item_id, author_id, author_role, body, parent_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, content_item_id, parent_id, author_id, author_role, body, created_at
            "#,
        )
        .bind(item.id)
        .bind(actor.id)
        .bind(author_role_for(actor.role))
        .bind(&input.body)
        .bind(input.parent_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, None) {
                AppError::Conflict("Comment already has a reply".to_string())
            } else {
                e.into()
            }
        })?;

        Self::upsert_read_mark(&mut tx, item.id, actor.id).await?;

        tx.commit().await?;

        timer.observe_duration();

        info!(
            comment_id = comment.id,
            content_item_id = item.id,
            author_role = %comment.author_role,
            "Comment posted"
        );

        let notifier = self.notifier.clone();
        let item_copy = item.clone();
        let comment_copy = comment.clone();
        let actor_id = actor.id;
        tokio::spawn(async move {
            notifier
                .comment_added(&item_copy, &comment_copy, actor_id)
                .await;
        });

        Ok(comment)
    }

    /// Comments on an item, oldest first. Listing counts as reading, so the
    /// caller's read mark moves to now.
    pub async fn list_comments(
        &self,
        actor: &AuthUser,
        item: &ContentItem,
    ) -> Result<Vec<ContentComment>, AppError> {
        let comments = sqlx::query_as::<_, ContentComment>(
            r#"
            SELECT id, content_item_id, parent_id, author_id, author_role, body, created_at
            FROM content_comments
            WHERE content_item_id = $1
            ORDER BY id
            "#,
        )
        .bind(item.id)
        .fetch_all(self.db.pool())
        .await?;

        self.mark_read(item.id, actor.id).await?;

        Ok(comments)
    }

    /// Move a user's read mark on an item to now.
    pub async fn mark_read(&self, item_id: i64, user_id: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO comment_reads (content_item_id, user_id, last_read_at)
            VALUES ($1, $2, now())
            ON CONFLICT (content_item_id, user_id) DO UPDATE SET last_read_at = now()
            "#,
        )
        .bind(item_id)
        .bind(user_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Comments by others since the user's last read mark.
    pub async fn unread_count(&self, item_id: i64, user_id: i64) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM content_comments c
            WHERE c.content_item_id = $1
              AND c.author_id <> $2
              AND c.created_at > COALESCE(
                  (SELECT last_read_at FROM comment_reads
                   WHERE content_item_id = $1 AND user_id = $2),
                  'epoch'::timestamptz)
            "#,
        )
        .bind(item_id)
        .bind(user_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(count)
    }

    async fn upsert_read_mark(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        item_id: i64,
        user_id: i64,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO comment_reads (content_item_id, user_id, last_read_at)
            VALUES ($1, $2, now())
            ON CONFLICT (content_item_id, user_id) DO UPDATE SET last_read_at = now()
            "#,
        )
        .bind(item_id)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
