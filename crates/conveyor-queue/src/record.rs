use chrono::{DateTime, Local, Utc};

use crate::error::HandlerError;
use crate::types::{Item, Status};

/// A persisted queue row: an [`Item`] plus its execution state.
///
/// The store owns all durable bytes; the worker only ever holds transient
/// copies of records during a dispatch cycle.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: String,
    pub kind: String,
    pub group_id: String,
    pub payload: String,
    pub status: Status,
    pub max_attempts: u32,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub result: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Birth a `PENDING` record from an item at enqueue time.
    ///
    /// `max_attempts` must already be resolved via [`resolve_max_attempts`].
    /// The item's `next_attempt` is honoured so producers can delay items.
    pub fn from_item(item: &Item, max_attempts: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: item.id.clone(),
            kind: item.kind.clone(),
            group_id: item.group_id.clone(),
            payload: item.payload.clone(),
            status: Status::Pending,
            max_attempts,
            attempts: 0,
            next_attempt_at: item.next_attempt.with_timezone(&Utc),
            result: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Project the record back into an item for handler dispatch.
    ///
    /// `next_attempt` is shifted to the local zone; NULL text columns map to
    /// the empty string.
    pub fn item(&self) -> Item {
        Item {
            id: self.id.clone(),
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            group_id: self.group_id.clone(),
            attempt: self.attempts,
            max_attempts: self.max_attempts,
            next_attempt: self.next_attempt_at.with_timezone(&Local),
            result: self.result.clone().unwrap_or_default(),
        }
    }

    /// Fold a classifier verdict into the record. The caller persists the
    /// record afterwards; this is the only path that mutates execution state.
    pub(crate) fn apply(&mut self, verdict: Verdict, now: DateTime<Utc>) {
        self.status = verdict.status;
        self.attempts = verdict.attempts;
        self.result = verdict.result;
        self.last_error = verdict.last_error;
        if let Some(at) = verdict.next_attempt_at {
            self.next_attempt_at = at;
        }
        self.updated_at = now;
    }
}

/// Attempt budget resolved at enqueue time: the item's own positive budget
/// clamped to the queue default, floored at 1.
pub(crate) fn resolve_max_attempts(item_max: u32, default_max: u32) -> u32 {
    let resolved = if item_max > 0 {
        item_max.min(default_max)
    } else {
        default_max
    };
    resolved.max(1)
}

/// The new execution state produced by [`classify`].
///
/// `next_attempt_at` is `Some` only when the record is rescheduled; terminal
/// statuses never move it.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Verdict {
    pub status: Status,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub last_error: Option<String>,
}

/// Classify a handler outcome into the record's next execution state.
///
/// | Outcome                          | Status    |
/// |----------------------------------|-----------|
/// | `Ok(bytes)`                      | `DONE`    |
/// | `Err(Fail)`                      | `FAILED`  |
/// | `Err(Skip)`                      | `SKIPPED` |
/// | `Err(Retry)`, budget exhausted   | `FAILED`  |
/// | `Err(Retry)`, budget remaining   | `PENDING`, rescheduled to `now + backoff` |
///
/// Every error records `last_error`; only the retry branch moves
/// `next_attempt_at`. Success keeps a `last_error` left over from earlier
/// attempts, so operators can see what a record recovered from.
pub(crate) fn classify(
    record: &Record,
    outcome: &std::result::Result<Vec<u8>, HandlerError>,
    now: DateTime<Utc>,
    backoff: std::time::Duration,
) -> Verdict {
    let attempts = record.attempts + 1;

    match outcome {
        Ok(bytes) => Verdict {
            status: Status::Done,
            attempts,
            next_attempt_at: None,
            result: Some(String::from_utf8_lossy(bytes).into_owned()),
            last_error: record.last_error.clone(),
        },
        Err(err) => {
            let status = match err {
                HandlerError::Fail(_) => Status::Failed,
                HandlerError::Skip => Status::Skipped,
                HandlerError::Retry(_) if attempts >= record.max_attempts => Status::Failed,
                HandlerError::Retry(_) => Status::Pending,
            };
            let next_attempt_at = if status == Status::Pending {
                let backoff =
                    chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::zero());
                Some(now + backoff)
            } else {
                None
            };
            Verdict {
                status,
                attempts,
                next_attempt_at,
                result: record.result.clone(),
                last_error: Some(err.to_string()),
            }
        }
    }
}
