//! `conveyor-queue` — durable single-node job queue over SQLite.
//!
//! # Overview
//!
//! Producers [`push`](Queue::push) batches of items identified by a textual
//! type and opaque payload. The worker loop polls the store, dispatches each
//! due item to its type's registered [`Handler`], and records the outcome.
//! Items survive process restarts, are retried with a backoff on transient
//! failure, and settle into a terminal status on success, permanent failure
//! or skip.
//!
//! # Item lifecycle
//!
//! | Handler outcome        | Status                                        |
//! |------------------------|-----------------------------------------------|
//! | `Ok(bytes)`            | `DONE`, bytes recorded as `result`            |
//! | `Err(Fail)`            | `FAILED` immediately                          |
//! | `Err(Skip)`            | `SKIPPED` immediately                         |
//! | `Err(Retry)`           | `PENDING`, retried after the backoff until the attempt budget runs out, then `FAILED` |
//!
//! Delivery is at-least-once within the attempt budget; terminal statuses
//! are never revisited.

pub mod error;
pub mod handler;
pub mod queue;
pub mod record;
pub mod sqlite;
pub mod store;
pub mod types;
mod worker;

pub use error::{HandlerError, QueueError, Result};
pub use handler::{Handler, HandlerFn, HandlerRegistry};
pub use queue::Queue;
pub use record::Record;
pub use store::{open_store, Store};
pub use types::{GroupStats, Item, Options, Status};
