//! Data model for tasks, epics, and runs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output captured from a process is truncated to this many bytes before
/// it is ever persisted.
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024;

/// Truncate `s` to at most [`MAX_OUTPUT_BYTES`] bytes, respecting UTF-8
/// character boundaries.
pub fn truncate_output(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_BYTES {
        return s.to_string();
    }
    let mut end = MAX_OUTPUT_BYTES;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

macro_rules! display_fromstr_enum {
    ($name:ident { $($variant:ident => $str:literal),+ $(,)? }) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let s = match self {
                    $(Self::$variant => $str),+
                };
                f.write_str(s)
            }
        }

        impl FromStr for $name {
            type Err = EnumParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($str => Ok(Self::$variant)),+,
                    other => Err(EnumParseError {
                        type_name: stringify!($name),
                        value: other.to_owned(),
                    }),
                }
            }
        }
    };
}

/// Error returned when parsing an invalid enum string.
#[derive(Debug, Clone)]
pub struct EnumParseError {
    pub type_name: &'static str,
    pub value: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}", self.type_name, self.value)
    }
}

impl std::error::Error for EnumParseError {}

// ---------------------------------------------------------------------------
// Task enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Bug,
    Feature,
    Task,
    Epic,
    Chore,
    Docs,
    Test,
}

display_fromstr_enum!(TaskType {
    Bug => "bug",
    Feature => "feature",
    Task => "task",
    Epic => "epic",
    Chore => "chore",
    Docs => "docs",
    Test => "test",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Size {
    Xs,
    S,
    M,
    L,
    Xl,
}

display_fromstr_enum!(Size {
    Xs => "xs",
    S => "s",
    M => "m",
    L => "l",
    Xl => "xl",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

display_fromstr_enum!(Complexity {
    Trivial => "trivial",
    Simple => "simple",
    Moderate => "moderate",
    Complex => "complex",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Closed,
    Cancelled,
}

display_fromstr_enum!(TaskStatus {
    Open => "open",
    InProgress => "in_progress",
    Closed => "closed",
    Cancelled => "cancelled",
});

/// A task's priority: 0 (highest) through 4 (lowest). Validated at the
/// repository boundary rather than encoded as an enum so that
/// out-of-range values produce a `ValidationError` with the offending
/// number.
pub type Priority = u8;

pub const MIN_PRIORITY: Priority = 0;
pub const MAX_PRIORITY: Priority = 4;

pub fn validate_priority(p: Priority) -> crate::error::Result<()> {
    if p > MAX_PRIORITY {
        return Err(crate::error::Error::Validation(format!(
            "priority {p} out of range 0..{MAX_PRIORITY}"
        )));
    }
    Ok(())
}

/// A unit of work tracked by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub priority: Priority,
    pub size: Size,
    pub complexity: Complexity,
    #[serde(default)]
    pub labels: Vec<String>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic: Option<String>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub last_review_issues: Vec<String>,

    // Supervisor-owned transient fields.
    #[serde(default)]
    pub consumed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consume_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_output: Option<String>,
}

impl Task {
    pub const NEEDS_HUMAN_LABEL: &'static str = "needs-human";

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

// ---------------------------------------------------------------------------
// Epic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpicStatus {
    Planning,
    InProgress,
    ReviewPending,
    Reviewed,
    ChangesRequested,
    Approved,
}

display_fromstr_enum!(EpicStatus {
    Planning => "planning",
    InProgress => "in_progress",
    ReviewPending => "review_pending",
    Reviewed => "reviewed",
    ChangesRequested => "changes_requested",
    Approved => "approved",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes_requested_at: Option<DateTime<Utc>>,
}

/// Compute an epic's status from its flags and member tasks.
///
/// Status is never stored -- it is always derived fresh from the epic's
/// flag fields and the statuses of its current member tasks.
pub fn compute_epic_status(epic: &Epic, members: &[&Task]) -> EpicStatus {
    if epic.approved_at.is_some() {
        return EpicStatus::Approved;
    }
    if epic.changes_requested_at.is_some() {
        let any_open = members
            .iter()
            .any(|t| matches!(t.status, TaskStatus::Open | TaskStatus::InProgress));
        return if any_open {
            EpicStatus::InProgress
        } else {
            EpicStatus::ChangesRequested
        };
    }
    if epic.reviewed_at.is_some() {
        return EpicStatus::Reviewed;
    }
    if members.is_empty() {
        return EpicStatus::Planning;
    }
    let any_open = members
        .iter()
        .any(|t| matches!(t.status, TaskStatus::Open | TaskStatus::InProgress));
    if any_open {
        return EpicStatus::InProgress;
    }
    let all_closed = members.iter().all(|t| matches!(t.status, TaskStatus::Closed));
    if all_closed {
        return EpicStatus::ReviewPending;
    }
    EpicStatus::InProgress
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

display_fromstr_enum!(RunStatus {
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

/// A record with a stable short id, used by [`crate::jsonl`] to keep a
/// file sorted by id on every write.
pub trait Identified {
    fn id(&self) -> &str;
}

impl Identified for Task {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for Epic {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for Run {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub task_id: String,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_display_roundtrip() {
        for v in [
            TaskStatus::Open,
            TaskStatus::InProgress,
            TaskStatus::Closed,
            TaskStatus::Cancelled,
        ] {
            let s = v.to_string();
            let parsed: TaskStatus = s.parse().expect("should parse");
            assert_eq!(v, parsed);
        }
    }

    #[test]
    fn task_status_invalid() {
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn epic_status_display_roundtrip() {
        for v in [
            EpicStatus::Planning,
            EpicStatus::InProgress,
            EpicStatus::ReviewPending,
            EpicStatus::Reviewed,
            EpicStatus::ChangesRequested,
            EpicStatus::Approved,
        ] {
            let s = v.to_string();
            let parsed: EpicStatus = s.parse().expect("should parse");
            assert_eq!(v, parsed);
        }
    }

    #[test]
    fn truncate_output_preserves_under_limit() {
        let s = "a".repeat(MAX_OUTPUT_BYTES);
        assert_eq!(truncate_output(&s).len(), MAX_OUTPUT_BYTES);
    }

    #[test]
    fn truncate_output_truncates_over_limit() {
        let s = "a".repeat(MAX_OUTPUT_BYTES + 1);
        assert_eq!(truncate_output(&s).len(), MAX_OUTPUT_BYTES);
    }

    #[test]
    fn validate_priority_accepts_boundaries() {
        assert!(validate_priority(0).is_ok());
        assert!(validate_priority(4).is_ok());
    }

    #[test]
    fn validate_priority_rejects_out_of_range() {
        assert!(validate_priority(5).is_err());
    }

    fn task(status: TaskStatus) -> Task {
        let now = Utc::now();
        Task {
            id: "f-000001".to_string(),
            title: "t".to_string(),
            description: None,
            task_type: TaskType::Task,
            priority: 2,
            size: Size::M,
            complexity: Complexity::Simple,
            labels: vec![],
            status,
            epic: None,
            blocked_by: vec![],
            created_at: now,
            updated_at: now,
            reason: None,
            commit_hash: None,
            last_review_issues: vec![],
            consumed: false,
            consumed_at: None,
            consumed_exit_code: None,
            consume_pid: None,
            consumed_output: None,
        }
    }

    fn epic() -> Epic {
        let now = Utc::now();
        Epic {
            id: "e-000001".to_string(),
            title: "e".to_string(),
            description: None,
            created_at: now,
            updated_at: now,
            reviewed_at: None,
            approved_at: None,
            approved_by: None,
            changes_requested_at: None,
        }
    }

    #[test]
    fn epic_status_no_members_is_planning() {
        let e = epic();
        assert_eq!(compute_epic_status(&e, &[]), EpicStatus::Planning);
    }

    #[test]
    fn epic_status_all_closed_is_review_pending() {
        let e = epic();
        let t1 = task(TaskStatus::Closed);
        let t2 = task(TaskStatus::Closed);
        assert_eq!(
            compute_epic_status(&e, &[&t1, &t2]),
            EpicStatus::ReviewPending
        );
    }

    #[test]
    fn epic_status_approved_wins_over_everything() {
        let mut e = epic();
        e.approved_at = Some(Utc::now());
        e.changes_requested_at = Some(Utc::now());
        let t1 = task(TaskStatus::Open);
        assert_eq!(compute_epic_status(&e, &[&t1]), EpicStatus::Approved);
    }

    #[test]
    fn epic_status_changes_requested_with_open_member_is_in_progress() {
        let mut e = epic();
        e.changes_requested_at = Some(Utc::now());
        let t1 = task(TaskStatus::Open);
        assert_eq!(compute_epic_status(&e, &[&t1]), EpicStatus::InProgress);
    }

    #[test]
    fn epic_status_changes_requested_with_no_open_member_is_changes_requested() {
        let mut e = epic();
        e.changes_requested_at = Some(Utc::now());
        let t1 = task(TaskStatus::Closed);
        assert_eq!(
            compute_epic_status(&e, &[&t1]),
            EpicStatus::ChangesRequested
        );
    }
}
