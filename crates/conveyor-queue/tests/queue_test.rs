// End-to-end scenarios: a real worker loop against a SQLite file, driven
// with short poll intervals. Each test gets its own database inside a
// temporary directory.

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::watch;

use conveyor_queue::{
    Handler, HandlerError, HandlerFn, Item, Options, Queue, QueueError, Status,
};

fn fast_options() -> Options {
    Options {
        poll_interval: Duration::from_millis(10),
        fn_timeout: Duration::from_millis(500),
        max_attempts: 3,
        retry_backoff: Duration::from_millis(20),
    }
}

fn open_queue(dir: &TempDir, kinds: &[&str], opts: Options) -> Arc<Queue> {
    let spec = format!("sqlite3://{}", dir.path().join("queue.db").display());
    let kinds = kinds.iter().map(|s| s.to_string()).collect();
    Arc::new(Queue::open(&spec, kinds, opts).expect("open queue"))
}

fn item(id: &str, kind: &str, payload: &str, max_attempts: u32) -> Item {
    let mut item = Item::new(id, kind, payload);
    item.group_id = "batch".into();
    item.max_attempts = max_attempts;
    item
}

/// Spawn the worker loop; the returned guard stops it and waits for the
/// store to close.
struct Running {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<Result<(), QueueError>>,
}

fn start(queue: &Arc<Queue>) -> Running {
    let (shutdown, rx) = watch::channel(false);
    let queue = Arc::clone(queue);
    let task = tokio::spawn(async move { queue.run(rx).await });
    Running { shutdown, task }
}

impl Running {
    async fn stop(self) {
        self.shutdown.send(true).expect("worker already gone");
        self.task.await.expect("worker panicked").expect("run failed");
    }
}

/// Poll `check` every 10 ms until it returns true or two seconds pass.
async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

/// Read one persisted column directly, to assert on state the facade does
/// not expose (`last_error`, raw status).
fn read_column(db: &Path, id: &str, column: &str) -> Option<String> {
    let conn = rusqlite::Connection::open(db).unwrap();
    conn.query_row(
        &format!("SELECT CAST({column} AS TEXT) FROM queue WHERE id = ?1"),
        [id],
        |row| row.get::<_, Option<String>>(0),
    )
    .unwrap()
}

fn find_item(queue: &Queue, status: Status, id: &str) -> Option<Item> {
    let mut found = None;
    queue
        .for_each("batch", status, &mut |item| {
            if item.id == id {
                found = Some(item);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
    found
}

#[tokio::test]
async fn happy_path_runs_item_to_done() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir, &["echo"], fast_options());
    queue.register(
        "echo",
        Arc::new(HandlerFn(|item: Item| async move {
            Ok(item.payload.into_bytes())
        })),
    );

    queue.push(&[item("a", "echo", "hi", 3)]).unwrap();
    let running = start(&queue);

    wait_for(|| {
        queue
            .stats()
            .unwrap()
            .iter()
            .any(|g| g.group_id == "batch" && g.kind == "echo" && g.done == 1)
    })
    .await;

    let done = find_item(&queue, Status::Done, "a").expect("done item");
    assert_eq!(done.result, "hi");
    assert_eq!(done.attempt, 1);

    running.stop().await;
}

#[tokio::test]
async fn transient_failures_then_success() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir, &["flaky"], fast_options());

    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&calls);
    queue.register(
        "flaky",
        Arc::new(HandlerFn(move |item: Item| {
            let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(HandlerError::retry("nope"))
                } else {
                    Ok(item.payload.into_bytes())
                }
            }
        })),
    );

    queue.push(&[item("a", "flaky", "payload", 3)]).unwrap();
    let running = start(&queue);

    wait_for(|| queue.stats().unwrap().iter().any(|g| g.done == 1)).await;

    let done = find_item(&queue, Status::Done, "a").expect("done item");
    assert_eq!(done.attempt, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // the error from the earlier attempts stays visible after success
    let last_error = read_column(&dir.path().join("queue.db"), "a", "last_error");
    assert_eq!(last_error.as_deref(), Some("nope"));

    running.stop().await;
}

#[tokio::test]
async fn attempt_budget_exhaustion_fails_the_item() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir, &["doomed"], fast_options());

    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&calls);
    queue.register(
        "doomed",
        Arc::new(HandlerFn(move |_: Item| {
            seen.fetch_add(1, Ordering::SeqCst);
            async move { Err(HandlerError::retry("still broken")) }
        })),
    );

    queue.push(&[item("a", "doomed", "x", 2)]).unwrap();
    let running = start(&queue);

    wait_for(|| queue.stats().unwrap().iter().any(|g| g.failed == 1)).await;
    running.stop().await;

    // the handler ran exactly max_attempts times
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let db = dir.path().join("queue.db");
    assert_eq!(read_column(&db, "a", "status").as_deref(), Some("FAILED"));
    assert_eq!(read_column(&db, "a", "attempts").as_deref(), Some("2"));
}

#[tokio::test]
async fn fail_error_short_circuits_the_budget() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir, &["strict"], fast_options());
    queue.register(
        "strict",
        Arc::new(HandlerFn(|_: Item| async move {
            Err(HandlerError::fail("bad input"))
        })),
    );

    queue.push(&[item("a", "strict", "x", 5)]).unwrap();
    let running = start(&queue);

    wait_for(|| queue.stats().unwrap().iter().any(|g| g.failed == 1)).await;

    let failed = find_item(&queue, Status::Failed, "a").expect("failed item");
    assert_eq!(failed.attempt, 1);

    running.stop().await;
    let db = dir.path().join("queue.db");
    assert_eq!(read_column(&db, "a", "attempts").as_deref(), Some("1"));
    assert_eq!(read_column(&db, "a", "last_error").as_deref(), Some("bad input"));
}

#[tokio::test]
async fn skip_error_short_circuits_the_budget() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir, &["seen"], fast_options());
    queue.register(
        "seen",
        Arc::new(HandlerFn(|_: Item| async move { Err(HandlerError::Skip) })),
    );

    queue.push(&[item("a", "seen", "x", 5)]).unwrap();
    let running = start(&queue);

    wait_for(|| queue.stats().unwrap().iter().any(|g| g.skipped == 1)).await;
    running.stop().await;

    let db = dir.path().join("queue.db");
    assert_eq!(read_column(&db, "a", "status").as_deref(), Some("SKIPPED"));
    assert_eq!(read_column(&db, "a", "attempts").as_deref(), Some("1"));
}

#[tokio::test]
async fn unknown_type_waits_for_a_handler_without_losing_the_item() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir, &["ghost"], fast_options());

    queue.push(&[item("a", "ghost", "boo", 1)]).unwrap();
    let running = start(&queue);

    // several poll cycles pass; the item stays PENDING with the error noted
    let db = dir.path().join("queue.db");
    wait_for(|| read_column(&db, "a", "last_error").is_some()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(read_column(&db, "a", "status").as_deref(), Some("PENDING"));
    assert!(read_column(&db, "a", "last_error")
        .unwrap()
        .contains("no handler registered"));

    // registering the handler recovers the item on a later poll
    queue.register(
        "ghost",
        Arc::new(HandlerFn(|item: Item| async move {
            Ok(item.payload.into_bytes())
        })),
    );
    wait_for(|| queue.stats().unwrap().iter().any(|g| g.done == 1)).await;

    running.stop().await;
    assert_eq!(read_column(&db, "a", "status").as_deref(), Some("DONE"));
    assert_eq!(read_column(&db, "a", "result").as_deref(), Some("boo"));
}

#[tokio::test]
async fn push_is_all_or_nothing() {
    struct PickySanitizer;

    #[async_trait]
    impl Handler for PickySanitizer {
        fn sanitize(&self, item: &mut Item) -> Result<(), HandlerError> {
            if item.payload.is_empty() {
                return Err(HandlerError::fail("empty payload"));
            }
            item.payload = item.payload.trim().to_string();
            Ok(())
        }

        async fn execute(&self, item: Item) -> Result<Vec<u8>, HandlerError> {
            Ok(item.payload.into_bytes())
        }
    }

    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir, &["picky"], fast_options());
    queue.register("picky", Arc::new(PickySanitizer));

    let err = queue
        .push(&[item("ok", "picky", "  fine  ", 1), item("bad", "picky", "", 1)])
        .unwrap_err();
    assert!(matches!(err, QueueError::SanitizeRejected { id, .. } if id == "bad"));
    assert!(queue.stats().unwrap().is_empty());

    // a valid batch persists the sanitized payload, not the submitted one
    queue.push(&[item("ok", "picky", "  fine  ", 1)]).unwrap();
    let pending = find_item(&queue, Status::Pending, "ok").expect("pending item");
    assert_eq!(pending.payload, "fine");

    // duplicate ids roll the whole batch back as well
    let err = queue
        .push(&[item("fresh", "picky", "x", 1), item("ok", "picky", "y", 1)])
        .unwrap_err();
    assert!(matches!(err, QueueError::DuplicateId { id } if id == "ok"));
    assert!(find_item(&queue, Status::Pending, "fresh").is_none());

    queue.close().unwrap();
}

#[tokio::test]
async fn items_survive_a_restart() {
    let dir = TempDir::new().unwrap();

    // first process: push and exit without running the worker
    {
        let queue = open_queue(&dir, &["echo"], fast_options());
        queue.push(&[item("a", "echo", "hi", 3)]).unwrap();
        let stats = queue.stats().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].pending, 1);
        queue.close().unwrap();
    }

    // second process: the item is still there and runs to completion
    let queue = open_queue(&dir, &["echo"], fast_options());
    queue.register(
        "echo",
        Arc::new(HandlerFn(|item: Item| async move {
            Ok(item.payload.into_bytes())
        })),
    );
    assert_eq!(queue.stats().unwrap()[0].pending, 1);

    let running = start(&queue);
    wait_for(|| queue.stats().unwrap().iter().any(|g| g.done == 1)).await;
    running.stop().await;
}

#[tokio::test]
async fn delayed_items_wait_for_their_due_time() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir, &["echo"], fast_options());
    queue.register(
        "echo",
        Arc::new(HandlerFn(|item: Item| async move {
            Ok(item.payload.into_bytes())
        })),
    );

    let mut delayed = item("a", "echo", "later", 1);
    delayed.next_attempt = chrono::Local::now() + chrono::Duration::milliseconds(150);
    queue.push(&[delayed]).unwrap();

    let running = start(&queue);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(queue.stats().unwrap()[0].pending, 1, "ran before due time");

    wait_for(|| queue.stats().unwrap().iter().any(|g| g.done == 1)).await;
    running.stop().await;
}

#[tokio::test]
async fn handler_timeout_is_a_transient_failure() {
    let dir = TempDir::new().unwrap();
    let mut opts = fast_options();
    opts.fn_timeout = Duration::from_millis(30);
    let queue = open_queue(&dir, &["slow"], opts);
    queue.register(
        "slow",
        Arc::new(HandlerFn(|_: Item| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        })),
    );

    queue.push(&[item("a", "slow", "x", 1)]).unwrap();
    let running = start(&queue);

    wait_for(|| queue.stats().unwrap().iter().any(|g| g.failed == 1)).await;
    running.stop().await;

    let db = dir.path().join("queue.db");
    assert!(read_column(&db, "a", "last_error")
        .unwrap()
        .contains("timed out"));
}
