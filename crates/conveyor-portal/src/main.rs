use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use conveyor_queue::{Options, Queue};
use tokio::sync::watch;
use tracing::{error, info};

mod app;
mod handlers;
mod http;

#[derive(Parser)]
#[command(name = "conveyor", version, about = "Durable job queue with a web portal")]
struct Cli {
    /// Bind address for the portal
    #[arg(long, default_value = "0.0.0.0:9090")]
    bind: String,

    /// Queue backend specification, e.g. sqlite3://conveyor.db
    #[arg(long, default_value = "sqlite3://conveyor.db")]
    spec: String,

    /// Comma-separated active job types. Defaults to every registered
    /// handler type.
    #[arg(long)]
    types: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor_portal=info,conveyor_queue=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let kinds: Vec<String> = cli
        .types
        .as_deref()
        .map(|csv| {
            csv.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let queue = Queue::open(&cli.spec, kinds, Options::default())
        .with_context(|| format!("failed to open queue '{}'", cli.spec))?;
    handlers::register_builtin(&queue);
    let queue = Arc::new(queue);
    info!(%queue, types = ?queue.job_types(), "queue opened");

    // worker loop in the background; the portal owns the foreground
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            if let Err(e) = queue.run(shutdown_rx).await {
                error!(error = %e, "worker loop exited with error");
            }
        })
    };

    let state = Arc::new(app::AppState::new(Arc::clone(&queue)));
    let router = app::build_router(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", cli.bind))?;
    info!("portal listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind portal address")?;
    axum::serve(listener, router).await?;

    // signal the worker to stop; it closes the store on the way out
    let _ = shutdown_tx.send(true);
    let _ = worker.await;
    Ok(())
}
