use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::types::Item;

/// Code registered for an item type.
///
/// `sanitize` runs at push time against the item that will be persisted, so
/// malformed payloads are rejected at submission rather than at dispatch, and
/// any normalisation it applies is what ends up in the store. `execute` runs
/// the job; its bytes are recorded as the item's `result`.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Pre-enqueue validation and normalisation. Default is a no-op.
    fn sanitize(&self, _item: &mut Item) -> std::result::Result<(), HandlerError> {
        Ok(())
    }

    /// Run the job. The worker bounds this with the configured per-invocation
    /// timeout; a handler that outlives it is classified as a transient
    /// failure.
    async fn execute(&self, item: Item) -> std::result::Result<Vec<u8>, HandlerError>;
}

/// Wraps a plain async function into a [`Handler`] with a no-op sanitize.
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Item) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Vec<u8>, HandlerError>> + Send,
{
    async fn execute(&self, item: Item) -> std::result::Result<Vec<u8>, HandlerError> {
        (self.0)(item).await
    }
}

/// Type → handler mapping.
///
/// Registration is allowed while the worker loop is running: an item whose
/// type has no handler yet stays `PENDING` with `last_error` set, and is
/// picked up normally once the handler appears.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.write().unwrap().insert(kind.into(), handler);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.read().unwrap().get(kind).cloned()
    }

    /// Registered types, sorted for stable output.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.read().unwrap().keys().cloned().collect();
        kinds.sort();
        kinds
    }
}
