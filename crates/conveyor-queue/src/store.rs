use std::ops::ControlFlow;

use chrono::{DateTime, Utc};

use crate::error::{QueueError, Result};
use crate::record::Record;
use crate::sqlite::SqliteStore;
use crate::types::{GroupStats, Item, Status};

/// The durable record layer. The only component that talks to a backend.
///
/// Implementations assume a single worker loop per store: there is no row
/// leasing, so running multiple dispatching workers against one store will
/// execute items beyond their retry policy.
pub trait Store: Send + Sync + std::fmt::Debug {
    /// Bulk insert, all-or-nothing. Fails with [`QueueError::DuplicateId`]
    /// if any id collides.
    fn insert(&self, records: &[Record]) -> Result<()>;

    /// Up to the store's batch limit of `PENDING` records with
    /// `next_attempt_at <= now` and a type in `kinds`, ordered by
    /// `next_attempt_at` ascending with insertion order breaking ties.
    /// An empty `kinds` returns no rows.
    fn fetch_due_batch(&self, kinds: &[String], now: DateTime<Utc>) -> Result<Vec<Record>>;

    /// In-place write of the record's execution state, keyed by id.
    fn update(&self, record: &Record) -> Result<()>;

    /// One row per (group, type) with status counts.
    fn stats(&self) -> Result<Vec<GroupStats>>;

    /// Stream all records matching (group, status) through `f` in insertion
    /// order. `f` may break to stop early.
    fn for_each(
        &self,
        group_id: &str,
        status: Status,
        f: &mut dyn FnMut(Item) -> ControlFlow<()>,
    ) -> Result<()>;

    /// Release the backend handle. Further calls fail with
    /// [`QueueError::Closed`].
    fn close(&self) -> Result<()>;
}

/// Open a store from a queue-spec URL.
///
/// The scheme selects the backend; the base system recognises
/// `sqlite3://<file>`. Unknown schemes fail with
/// [`QueueError::UnknownBackend`].
pub fn open_store(spec: &str) -> Result<Box<dyn Store>> {
    let (scheme, rest) = spec.split_once("://").unwrap_or(("", spec));
    match scheme {
        "sqlite3" => Ok(Box::new(SqliteStore::open(rest)?)),
        other => Err(QueueError::UnknownBackend {
            scheme: other.to_string(),
        }),
    }
}
