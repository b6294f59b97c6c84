//! Content pipeline item and the column transition table.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::user::UserRole;

/// Pipeline stages, in board order. Items re-enter `content_writing` when a
/// revision is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KanbanColumn {
    Backlog,
    ContentWriting,
    DesignCreative,
    InternalReview,
    ClientApproval,
    Scheduled,
    Ready,
    Posted,
}

impl KanbanColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            KanbanColumn::Backlog => "backlog",
            KanbanColumn::ContentWriting => "content_writing",
            KanbanColumn::DesignCreative => "design_creative",
            KanbanColumn::InternalReview => "internal_review",
            KanbanColumn::ClientApproval => "client_approval",
            KanbanColumn::Scheduled => "scheduled",
            KanbanColumn::Ready => "ready",
            KanbanColumn::Posted => "posted",
        }
    }

    /// Strict parse for caller-supplied columns.
    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "backlog" => Some(KanbanColumn::Backlog),
            "content_writing" => Some(KanbanColumn::ContentWriting),
            "design_creative" => Some(KanbanColumn::DesignCreative),
            "internal_review" => Some(KanbanColumn::InternalReview),
            "client_approval" => Some(KanbanColumn::ClientApproval),
            "scheduled" => Some(KanbanColumn::Scheduled),
            "ready" => Some(KanbanColumn::Ready),
            "posted" => Some(KanbanColumn::Posted),
            _ => None,
        }
    }
}

/// A move request targets either a real column or the revise alias, which
/// lands in `content_writing` with revision bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveTarget {
    Column(KanbanColumn),
    ReviseNeeded,
}

impl MoveTarget {
    pub fn from_string(s: &str) -> Option<Self> {
        if s == "revise_needed" {
            return Some(MoveTarget::ReviseNeeded);
        }
        KanbanColumn::from_string(s).map(MoveTarget::Column)
    }

    /// The column an accepted move actually lands in.
    pub fn destination(&self) -> KanbanColumn {
        match self {
            MoveTarget::Column(col) => *col,
            MoveTarget::ReviseNeeded => KanbanColumn::ContentWriting,
        }
    }
}

/// Role-gated transition table. Superadmins and managers move anything
/// anywhere; production roles each own exactly one handoff; clients act only
/// out of client_approval.
pub fn can_move(role: UserRole, from: KanbanColumn, target: MoveTarget) -> bool {
    use KanbanColumn::*;
    match role {
        UserRole::Superadmin | UserRole::Manager => true,
        UserRole::ContentWriter => {
            from == ContentWriting && target == MoveTarget::Column(DesignCreative)
        }
        UserRole::Designer => {
            from == DesignCreative && target == MoveTarget::Column(InternalReview)
        }
        UserRole::Client => {
            from == ClientApproval
                && matches!(
                    target,
                    MoveTarget::Column(Scheduled) | MoveTarget::ReviseNeeded
                )
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    ReviseNeeded,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::ReviseNeeded => "revise_needed",
        }
    }
}

/// What happens when a scheduled item comes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostAction {
    Instant,
    Schedule,
    Manual,
}

impl PostAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostAction::Instant => "instant",
            PostAction::Schedule => "schedule",
            PostAction::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContentItem {
    pub id: i64,
    pub title: String,
    pub copy_text: String,
    pub caption: String,
    pub due_date: Option<NaiveDate>,
    pub platforms: serde_json::Value,
    #[serde(rename = "column")]
    pub kanban_column: String,
    pub priority: String,
    pub assigned_to: Option<i64>,
    pub approval_status: String,
    pub revise_requested: bool,
    pub revise_count: i32,
    pub revise_notes: String,
    pub post_action: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub posted_at: Option<DateTime<Utc>>,
    pub platform_captions: serde_json::Value,
    pub external_post_id: Option<String>,
    pub post_failed: bool,
    pub post_error: Option<String>,
    pub client_id: i64,
    pub invoice_id: Option<i64>,
    pub service_id: Option<i64>,
    pub created_by: Option<i64>,
    pub approved_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn column(&self) -> KanbanColumn {
        KanbanColumn::from_string(&self.kanban_column).unwrap_or(KanbanColumn::Backlog)
    }
}

/// Input for creating a content item. A supplied column is ignored; every
/// new item starts in backlog.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateContentItem {
    #[validate(length(min = 1, message = "Title is required"))]
    pub title: String,
    pub copy_text: Option<String>,
    pub caption: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub platforms: Option<Vec<String>>,
    pub column: Option<String>,
    pub priority: Option<String>,
    pub assigned_to: Option<i64>,
    pub client_id: i64,
    pub invoice_id: Option<i64>,
    pub service_id: Option<i64>,
}

/// Mutable content fields. Column and approval state move only through the
/// move/approval operations.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateContentItem {
    #[validate(length(min = 1, message = "Title cannot be empty"))]
    pub title: Option<String>,
    pub copy_text: Option<String>,
    pub caption: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub platforms: Option<Vec<String>>,
    pub priority: Option<String>,
    pub assigned_to: Option<i64>,
    pub platform_captions: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveRequest {
    pub column: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalRequest {
    pub action: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub scheduled_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListContentItemsFilter {
    pub client_id: Option<i64>,
    pub column: Option<String>,
    pub assigned_to: Option<i64>,
    pub invoice_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_COLUMNS: [KanbanColumn; 8] = [
        KanbanColumn::Backlog,
        KanbanColumn::ContentWriting,
        KanbanColumn::DesignCreative,
        KanbanColumn::InternalReview,
        KanbanColumn::ClientApproval,
        KanbanColumn::Scheduled,
        KanbanColumn::Ready,
        KanbanColumn::Posted,
    ];

    #[test]
    fn managers_and_superadmins_move_anything() {
        for role in [UserRole::Superadmin, UserRole::Manager] {
            for from in ALL_COLUMNS {
                for to in ALL_COLUMNS {
                    assert!(can_move(role, from, MoveTarget::Column(to)));
                }
                assert!(can_move(role, from, MoveTarget::ReviseNeeded));
            }
        }
    }

    #[test]
    fn content_writer_owns_exactly_one_handoff() {
        for from in ALL_COLUMNS {
            for to in ALL_COLUMNS {
                let allowed = can_move(UserRole::ContentWriter, from, MoveTarget::Column(to));
                let expected = from == KanbanColumn::ContentWriting
                    && to == KanbanColumn::DesignCreative;
                assert_eq!(allowed, expected, "{:?} -> {:?}", from, to);
            }
        }
    }

    #[test]
    fn designer_hands_off_to_internal_review_only() {
        assert!(can_move(
            UserRole::Designer,
            KanbanColumn::DesignCreative,
            MoveTarget::Column(KanbanColumn::InternalReview),
        ));
        assert!(!can_move(
            UserRole::Designer,
            KanbanColumn::DesignCreative,
            MoveTarget::Column(KanbanColumn::ClientApproval),
        ));
        assert!(!can_move(
            UserRole::Designer,
            KanbanColumn::InternalReview,
            MoveTarget::Column(KanbanColumn::ClientApproval),
        ));
    }

    #[test]
    fn client_acts_only_out_of_client_approval() {
        assert!(can_move(
            UserRole::Client,
            KanbanColumn::ClientApproval,
            MoveTarget::Column(KanbanColumn::Scheduled),
        ));
        assert!(can_move(
            UserRole::Client,
            KanbanColumn::ClientApproval,
            MoveTarget::ReviseNeeded,
        ));
        for from in ALL_COLUMNS {
            if from == KanbanColumn::ClientApproval {
                continue;
            }
            assert!(!can_move(
                UserRole::Client,
                from,
                MoveTarget::Column(KanbanColumn::Scheduled),
            ));
        }
        assert!(!can_move(
            UserRole::Client,
            KanbanColumn::ClientApproval,
            MoveTarget::Column(KanbanColumn::Posted),
        ));
    }

    #[test]
    fn revise_target_lands_in_content_writing() {
        assert_eq!(
            MoveTarget::ReviseNeeded.destination(),
            KanbanColumn::ContentWriting
        );
        assert_eq!(
            MoveTarget::from_string("revise_needed"),
            Some(MoveTarget::ReviseNeeded)
        );
    }

    #[test]
    fn unknown_columns_are_rejected() {
        assert_eq!(KanbanColumn::from_string("finalised"), None);
        assert_eq!(MoveTarget::from_string("launch_pad"), None);
    }
}
