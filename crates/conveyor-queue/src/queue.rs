use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::info;

use crate::error::{QueueError, Result};
use crate::handler::{Handler, HandlerRegistry};
use crate::record::{resolve_max_attempts, Record};
use crate::store::{open_store, Store};
use crate::types::{GroupStats, Item, Options, Status};
use crate::worker;

/// A durable delay queue: composes the store, the handler registry and the
/// worker loop.
///
/// All methods take `&self`, so a `Queue` is shared as `Arc<Queue>` between
/// producers and the worker. One worker loop per queue instance; see
/// [`Store`] for why.
pub struct Queue {
    store: Box<dyn Store>,
    registry: HandlerRegistry,
    kinds: Vec<String>,
    opts: Options,
    spec: String,
}

impl Queue {
    /// Open a queue from a backend spec URL such as `sqlite3://jobs.db`,
    /// creating tables as needed.
    ///
    /// `kinds` is the set of active types the worker will dispatch; leave it
    /// empty to dispatch every registered handler type.
    pub fn open(spec: &str, kinds: Vec<String>, opts: Options) -> Result<Self> {
        let store = open_store(spec)?;
        Ok(Self {
            store,
            registry: HandlerRegistry::new(),
            kinds,
            opts,
            spec: spec.to_string(),
        })
    }

    /// Register a handler for an item type. Allowed while the worker runs;
    /// pending items of that type are picked up on the next poll.
    pub fn register(&self, kind: impl Into<String>, handler: Arc<dyn Handler>) {
        self.registry.register(kind, handler);
    }

    /// Enqueue all items with `PENDING` status. All-or-nothing: if any item
    /// fails validation, sanitization or insertion, none persist.
    ///
    /// Each item is run through its handler's `sanitize` first (when one is
    /// registered), and the sanitized item is what gets stored.
    pub fn push(&self, items: &[Item]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let mut item = item.clone();
            if item.id.is_empty() {
                return Err(QueueError::InvalidItem {
                    id: item.id,
                    reason: "empty id".into(),
                });
            }
            if item.kind.is_empty() {
                return Err(QueueError::InvalidItem {
                    id: item.id,
                    reason: "empty type".into(),
                });
            }
            if let Some(handler) = self.registry.get(&item.kind) {
                handler
                    .sanitize(&mut item)
                    .map_err(|e| QueueError::SanitizeRejected {
                        id: item.id.clone(),
                        reason: e.to_string(),
                    })?;
            }
            let max_attempts = resolve_max_attempts(item.max_attempts, self.opts.max_attempts);
            records.push(Record::from_item(&item, max_attempts, now));
        }

        self.store.insert(&records)?;
        info!(count = records.len(), "items queued");
        Ok(())
    }

    /// Drive the worker loop until `shutdown` flips to `true`, then close
    /// the store.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        worker::run_loop(
            self.store.as_ref(),
            &self.registry,
            &self.kinds,
            &self.opts,
            shutdown,
        )
        .await;
        self.close()
    }

    /// Queue statistics broken down by (group, type).
    pub fn stats(&self) -> Result<Vec<GroupStats>> {
        self.store.stats()
    }

    /// Enumerate all items of the group with the given status, in insertion
    /// order. `f` may break to stop early.
    pub fn for_each(
        &self,
        group_id: &str,
        status: Status,
        f: &mut dyn FnMut(Item) -> ControlFlow<()>,
    ) -> Result<()> {
        self.store.for_each(group_id, status, f)
    }

    /// The active types the worker dispatches: the configured set, or every
    /// registered handler type when none was configured.
    pub fn job_types(&self) -> Vec<String> {
        if self.kinds.is_empty() {
            self.registry.kinds()
        } else {
            self.kinds.clone()
        }
    }

    /// Release the backend. Only needed when [`Queue::run`] is not used;
    /// `run` closes the store on exit.
    pub fn close(&self) -> Result<()> {
        self.store.close()
    }
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Queue<spec='{}'>", self.spec)
    }
}
