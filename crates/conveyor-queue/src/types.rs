use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Terminal and non-terminal states a queued item can be in.
///
/// | Variant   | Meaning                                              |
/// |-----------|------------------------------------------------------|
/// | `Pending` | Attempts are still remaining; eligible for dispatch  |
/// | `Done`    | The handler finished successfully                    |
/// | `Failed`  | All attempts failed, or the handler returned `Fail`  |
/// | `Skipped` | The handler returned `Skip`                          |
///
/// `Done`, `Failed` and `Skipped` are terminal: the queue never transitions
/// out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    Done,
    Failed,
    Skipped,
}

impl Status {
    /// True for `Done`, `Failed` and `Skipped`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Pending)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Pending => "PENDING",
            Status::Done => "DONE",
            Status::Failed => "FAILED",
            Status::Skipped => "SKIPPED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Status::Pending),
            "DONE" => Ok(Status::Done),
            "FAILED" => Ok(Status::Failed),
            "SKIPPED" => Ok(Status::Skipped),
            other => Err(format!("unknown item status: {other}")),
        }
    }
}

/// An item on the queue as seen by producers and handlers.
///
/// Handlers receive a by-value snapshot; mutating it does not touch the
/// persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Unique primary key. Caller-provided; a content hash over the source
    /// identifier is the conventional choice.
    pub id: String,
    /// Selects the handler. Must be non-empty.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque UTF-8 payload handed to the handler.
    pub payload: String,
    /// User-assigned cohort label, used for stats grouping and enumeration.
    /// May be empty.
    pub group_id: String,
    /// Completed attempts so far. Ignored on push.
    pub attempt: u32,
    /// Attempt budget. 0 means "use the queue default"; otherwise clamped to
    /// the queue default at enqueue time.
    pub max_attempts: u32,
    /// Earliest time this item may be dispatched. Honoured on push, so
    /// producers can enqueue delayed items.
    pub next_attempt: DateTime<Local>,
    /// Handler output of the last attempt. Empty until set.
    pub result: String,
}

impl Item {
    /// New item due immediately, with the queue-default attempt budget.
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload: payload.into(),
            group_id: String::new(),
            attempt: 0,
            max_attempts: 0,
            next_attempt: Local::now(),
            result: String::new(),
        }
    }
}

/// Queue statistics for one (group, type) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStats {
    pub group_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub total: i64,
    pub done: i64,
    pub pending: i64,
    pub failed: i64,
    pub skipped: i64,
}

/// Worker configuration. All fields are honoured by the poll loop.
#[derive(Debug, Clone)]
pub struct Options {
    /// Duration between polls.
    pub poll_interval: Duration,
    /// Per-invocation handler deadline.
    pub fn_timeout: Duration,
    /// Default attempt budget for items that do not specify one.
    pub max_attempts: u32,
    /// Delay added to `next_attempt_at` on transient failure.
    pub retry_backoff: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            fn_timeout: Duration::from_secs(1),
            max_attempts: 1,
            retry_backoff: Duration::from_secs(10),
        }
    }
}
