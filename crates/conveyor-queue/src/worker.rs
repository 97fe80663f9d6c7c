use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{HandlerError, Result};
use crate::handler::HandlerRegistry;
use crate::record::{classify, Record};
use crate::store::Store;
use crate::types::Options;

/// The poll/dispatch loop.
///
/// Fires immediately on the first iteration and every `poll_interval`
/// thereafter; the tick is re-armed only after the batch finishes, so slow
/// batches backpressure polling. Returns when `shutdown` flips to `true`
/// (checked at the tick, between records, and during handler invocations)
/// or when the shutdown sender is dropped.
pub(crate) async fn run_loop(
    store: &dyn Store,
    registry: &HandlerRegistry,
    kinds: &[String],
    opts: &Options,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut poll = tokio::time::interval(opts.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(poll_interval = ?opts.poll_interval, "worker loop started");
    loop {
        tokio::select! {
            _ = poll.tick() => {
                if *shutdown.borrow() {
                    break;
                }

                // Active types come from the configuration when given,
                // otherwise from whatever handlers are registered right now.
                let active = if kinds.is_empty() { registry.kinds() } else { kinds.to_vec() };
                let batch = match store.fetch_due_batch(&active, Utc::now()) {
                    Ok(batch) => batch,
                    Err(e) => {
                        error!(error = %e, "failed to read next batch");
                        continue;
                    }
                };
                if batch.is_empty() {
                    continue;
                }
                debug!(count = batch.len(), "dispatching batch");

                for mut record in batch {
                    if *shutdown.borrow() {
                        break;
                    }
                    if let Err(e) = process_record(store, registry, opts, &mut record, &mut shutdown).await {
                        error!(item_id = %record.id, error = %e, "failed to process item");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("worker loop stopped");
}

/// Execute one record and persist the classified outcome.
///
/// A timeout and a shutdown observed mid-execution are transient: the record
/// stays `PENDING` (budget permitting) with `last_error` set. A type with no
/// registered handler is rescheduled after the backoff without consuming the
/// attempt budget, since no handler was invoked; operators can register the
/// missing handler and recover without data loss.
async fn process_record(
    store: &dyn Store,
    registry: &HandlerRegistry,
    opts: &Options,
    record: &mut Record,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let Some(handler) = registry.get(&record.kind) else {
        let now = Utc::now();
        warn!(item_id = %record.id, item_type = %record.kind, "no handler registered");
        record.last_error = Some(format!(
            "no handler registered for type '{}'",
            record.kind
        ));
        record.next_attempt_at = now
            + chrono::Duration::from_std(opts.retry_backoff)
                .unwrap_or_else(|_| chrono::Duration::zero());
        record.updated_at = now;
        return store.update(record);
    };

    let outcome = {
        let item = record.item();
        tokio::select! {
            res = tokio::time::timeout(opts.fn_timeout, handler.execute(item)) => {
                match res {
                    Ok(outcome) => outcome,
                    Err(_) => Err(HandlerError::retry(format!(
                        "handler timed out after {:?}",
                        opts.fn_timeout
                    ))),
                }
            }
            _ = shutdown.changed() => {
                Err(HandlerError::retry("shutdown while handler was running"))
            }
        }
    };

    let now = Utc::now();
    let verdict = classify(record, &outcome, now, opts.retry_backoff);
    debug!(
        item_id = %record.id,
        item_type = %record.kind,
        attempts = verdict.attempts,
        status = %verdict.status,
        "item processed"
    );
    record.apply(verdict, now);
    store.update(record)
}
