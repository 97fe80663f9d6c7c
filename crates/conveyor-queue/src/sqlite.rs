use std::ops::ControlFlow;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection};

use crate::error::{QueueError, Result};
use crate::record::Record;
use crate::store::Store;
use crate::types::{GroupStats, Item, Status};

/// Most records a single poll cycle will fetch and dispatch.
const BATCH_LIMIT: usize = 10;

/// Column list shared by every SELECT so [`row_to_record`] can map by
/// position.
const COLUMNS: &str = "id, type, group_id, payload, status, max_attempts, \
                       attempts, next_attempt_at, result, last_error, \
                       created_at, updated_at";

/// Disk-backed store over a single SQLite file.
///
/// One `queue` table holds every record; `next_attempt_at` ordering defines
/// dispatch order. The connection sits behind a mutex so producers can push
/// while the worker loop polls.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
    path: String,
}

impl SqliteStore {
    /// Open (or create) the queue database at `path` and initialise the
    /// schema. Idempotent across restarts.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: path.to_string(),
        })
    }

    /// Wrap an existing connection. Used by tests to run against an
    /// in-memory database.
    #[cfg(test)]
    pub(crate) fn from_conn(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: ":memory:".to_string(),
        })
    }
}

impl std::fmt::Display for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sqlite3://{}", self.path)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS queue (
            id              TEXT    NOT NULL PRIMARY KEY,
            type            TEXT    NOT NULL,
            group_id        TEXT    NOT NULL,
            payload         TEXT    NOT NULL,
            status          TEXT    NOT NULL,
            max_attempts    INTEGER NOT NULL,
            attempts        INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TEXT    NOT NULL,   -- RFC 3339 UTC
            result          TEXT,
            last_error      TEXT,
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_queue_type ON queue (type);
        CREATE INDEX IF NOT EXISTS idx_queue_group_id ON queue (group_id);
        -- Dequeue path: WHERE next_attempt_at <= now ORDER BY next_attempt_at
        CREATE INDEX IF NOT EXISTS idx_queue_next_attempt_at ON queue (next_attempt_at);
        ",
    )?;
    Ok(())
}

/// Fixed-width RFC 3339 UTC with microseconds, so timestamp range queries
/// compare correctly as bytes.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(col: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let status_str: String = row.get(4)?;
    let status: Status = status_str.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;
    let next_attempt_at: String = row.get(7)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(Record {
        id: row.get(0)?,
        kind: row.get(1)?,
        group_id: row.get(2)?,
        payload: row.get(3)?,
        status,
        max_attempts: row.get(5)?,
        attempts: row.get(6)?,
        next_attempt_at: parse_ts(7, &next_attempt_at)?,
        result: row.get(8)?,
        last_error: row.get(9)?,
        created_at: parse_ts(10, &created_at)?,
        updated_at: parse_ts(11, &updated_at)?,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl Store for SqliteStore {
    fn insert(&self, records: &[Record]) -> Result<()> {
        let mut guard = self.conn.lock().unwrap();
        let conn = guard.as_mut().ok_or(QueueError::Closed)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO queue (id, type, group_id, payload, status, max_attempts,
                                    attempts, next_attempt_at, result, last_error,
                                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for rec in records {
                stmt.execute(params![
                    rec.id,
                    rec.kind,
                    rec.group_id,
                    rec.payload,
                    rec.status.to_string(),
                    rec.max_attempts,
                    rec.attempts,
                    ts(rec.next_attempt_at),
                    rec.result,
                    rec.last_error,
                    ts(rec.created_at),
                    ts(rec.updated_at),
                ])
                .map_err(|e| {
                    if is_constraint_violation(&e) {
                        QueueError::DuplicateId { id: rec.id.clone() }
                    } else {
                        QueueError::Backend(e)
                    }
                })?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn fetch_due_batch(&self, kinds: &[String], now: DateTime<Utc>) -> Result<Vec<Record>> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }

        let guard = self.conn.lock().unwrap();
        let conn = guard.as_ref().ok_or(QueueError::Closed)?;

        let placeholders = vec!["?"; kinds.len()].join(", ");
        let sql = format!(
            "SELECT {COLUMNS} FROM queue
             WHERE status = 'PENDING' AND next_attempt_at <= ? AND type IN ({placeholders})
             ORDER BY next_attempt_at, rowid
             LIMIT {BATCH_LIMIT}"
        );

        let now_str = ts(now);
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(std::iter::once(now_str.as_str()).chain(kinds.iter().map(String::as_str))),
            row_to_record,
        )?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn update(&self, record: &Record) -> Result<()> {
        let guard = self.conn.lock().unwrap();
        let conn = guard.as_ref().ok_or(QueueError::Closed)?;
        conn.execute(
            "UPDATE queue
             SET status = ?1, attempts = ?2, next_attempt_at = ?3,
                 result = ?4, last_error = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                record.status.to_string(),
                record.attempts,
                ts(record.next_attempt_at),
                record.result,
                record.last_error,
                ts(record.updated_at),
                record.id,
            ],
        )?;
        Ok(())
    }

    fn stats(&self) -> Result<Vec<GroupStats>> {
        let guard = self.conn.lock().unwrap();
        let conn = guard.as_ref().ok_or(QueueError::Closed)?;
        let mut stmt = conn.prepare_cached(
            "SELECT group_id, type,
                    count(*)                                         AS total,
                    count(CASE WHEN status = 'DONE'    THEN 1 END)   AS done,
                    count(CASE WHEN status = 'PENDING' THEN 1 END)   AS pending,
                    count(CASE WHEN status = 'FAILED'  THEN 1 END)   AS failed,
                    count(CASE WHEN status = 'SKIPPED' THEN 1 END)   AS skipped
             FROM queue
             GROUP BY group_id, type
             ORDER BY group_id, type",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(GroupStats {
                group_id: row.get(0)?,
                kind: row.get(1)?,
                total: row.get(2)?,
                done: row.get(3)?,
                pending: row.get(4)?,
                failed: row.get(5)?,
                skipped: row.get(6)?,
            })
        })?;
        let mut stats = Vec::new();
        for row in rows {
            stats.push(row?);
        }
        Ok(stats)
    }

    fn for_each(
        &self,
        group_id: &str,
        status: Status,
        f: &mut dyn FnMut(Item) -> ControlFlow<()>,
    ) -> Result<()> {
        let guard = self.conn.lock().unwrap();
        let conn = guard.as_ref().ok_or(QueueError::Closed)?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {COLUMNS} FROM queue
             WHERE group_id = ?1 AND status = ?2
             ORDER BY rowid"
        ))?;
        let mut rows = stmt.query(params![group_id, status.to_string()])?;
        while let Some(row) = rows.next()? {
            let record = row_to_record(row)?;
            if f(record.item()).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap().take();
        match conn {
            Some(conn) => conn.close().map_err(|(_, e)| QueueError::Backend(e)),
            None => Ok(()),
        }
    }
}
