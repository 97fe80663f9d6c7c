use thiserror::Error;

/// Errors surfaced by the queue core.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue-spec URL names a scheme no backend is registered for.
    #[error("unknown queue backend '{scheme}'")]
    UnknownBackend { scheme: String },

    /// Underlying store I/O failure.
    #[error("backend error: {0}")]
    Backend(#[from] rusqlite::Error),

    /// Push with an id that already exists in the store.
    #[error("duplicate item id '{id}'")]
    DuplicateId { id: String },

    /// An item failed structural validation before sanitize.
    #[error("invalid item '{id}': {reason}")]
    InvalidItem { id: String, reason: String },

    /// The handler's sanitize step rejected an item at push time.
    #[error("sanitize rejected item '{id}': {reason}")]
    SanitizeRejected { id: String, reason: String },

    /// Operation on a queue whose store has been closed.
    #[error("queue is closed")]
    Closed,
}

/// Sentinel surface handlers return from `execute` (and `sanitize`).
///
/// Anything other than `Skip` and `Fail` is a transient failure: the item
/// stays `PENDING` and is retried after the configured backoff until its
/// attempt budget runs out.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The item is inapplicable; move it to `SKIPPED` immediately,
    /// regardless of remaining attempts.
    #[error("skip")]
    Skip,

    /// Permanent failure; move the item to `FAILED` immediately,
    /// regardless of remaining attempts.
    #[error("{0}")]
    Fail(String),

    /// Transient failure; retry after the backoff.
    #[error("{0}")]
    Retry(String),
}

impl HandlerError {
    pub fn fail(msg: impl Into<String>) -> Self {
        HandlerError::Fail(msg.into())
    }

    pub fn retry(msg: impl Into<String>) -> Self {
        HandlerError::Retry(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
