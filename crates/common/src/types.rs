// Core domain types shared across all Huddle crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Presence ────────────────────────────────────────────────────────

/// A user's coarse availability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Online,
    Away,
    Busy,
    Offline,
}

/// The page taxonomy of the host application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    Dashboard,
    Editor,
    Calendar,
    Analytics,
    Settings,
}

/// Where in the application a user currently is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    pub page: PageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<Uuid>,
}

/// Absolute char offset in a document.
///
/// Cursor, selection, and operation positions all use the same flat
/// char-offset coordinate system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CursorPosition {
    pub offset: u32,
}

/// Selection range (anchor, head) — collapsed selections use `cursor` instead.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectionRange {
    pub anchor: u32,
    pub head: u32,
}

/// One known user's presence. At most one record per user id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceRecord {
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub status: UserStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionRange>,
    pub last_active_at: DateTime<Utc>,
}

// ── Collaborative editing ───────────────────────────────────────────

/// Payload of a text operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    Insert { text: String },
    Delete { len: u32 },
    Replace { len: u32, text: String },
}

/// One collaborative edit.
///
/// Operations are ordered by the `(clock, user_id)` Lamport pair, never by
/// wall-clock time. `base_clock` is the highest clock the originator had
/// applied when generating the op; anything logged above it is concurrent
/// and must be transformed against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextOperation {
    pub id: Uuid,
    pub user_id: String,
    /// Zero-based char offset in the document.
    pub pos: u32,
    #[serde(flatten)]
    pub kind: OperationKind,
    pub clock: u64,
    pub base_clock: u64,
}

impl TextOperation {
    /// Total-order key: `(clock, user_id)`.
    pub fn order_key(&self) -> (u64, &str) {
        (self.clock, self.user_id.as_str())
    }
}

// ── Publishing jobs ─────────────────────────────────────────────────

/// Lifecycle state of a publish job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Publishing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are never left once entered.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Any non-terminal, in-flight state.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

/// Per-platform outcome of a publish job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlatformStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

/// Engagement counters reported back by a platform after publishing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngagementMetrics {
    pub views: u64,
    pub likes: u64,
    pub shares: u64,
    pub comments: u64,
}

/// Result of publishing to a single platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformResult {
    pub platform: String,
    pub status: PlatformStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement: Option<EngagementMetrics>,
}

/// Caller-supplied options for starting a publish job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishOptions {
    /// Defer the publish until this time instead of publishing immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// One asynchronous multi-platform publish request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishJob {
    pub id: String,
    pub content_id: Uuid,
    pub platforms: Vec<String>,
    pub status: JobStatus,
    /// Percent complete, 0–100.
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub platform_results: Vec<PlatformResult>,
}

// ── Live analytics ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    Engagement,
    Performance,
    Revenue,
    Usage,
    System,
}

/// Wire form of one analytics measurement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricUpdate {
    pub metric_id: String,
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub category: MetricCategory,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_terminal_partition() {
        for status in [JobStatus::Queued, JobStatus::Processing, JobStatus::Publishing] {
            assert!(status.is_active());
            assert!(!status.is_terminal());
        }
        for status in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(status.is_terminal());
            assert!(!status.is_active());
        }
    }

    #[test]
    fn operation_order_key_breaks_clock_ties_by_user() {
        let a = TextOperation {
            id: Uuid::new_v4(),
            user_id: "user-a".into(),
            pos: 0,
            kind: OperationKind::Insert { text: "x".into() },
            clock: 3,
            base_clock: 2,
        };
        let b = TextOperation { user_id: "user-b".into(), ..a.clone() };
        assert!(a.order_key() < b.order_key());
    }

    #[test]
    fn presence_record_omits_empty_optionals() {
        let record = PresenceRecord {
            user_id: "user-1".into(),
            display_name: "Alice".into(),
            avatar_url: None,
            status: UserStatus::Online,
            custom_status: None,
            location: None,
            cursor: None,
            selection: None,
            last_active_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("avatar_url").is_none());
        assert!(json.get("location").is_none());
        assert_eq!(json["status"], "online");
    }
}
