use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use scribe_api::state::AppStateInner;
use scribe_db::Database;
use scribe_ingest::{HttpFetcher, Listener, Pipeline, Store};
use scribe_server::app;
use scribe_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Config (loads .env if present)
    let config = Config::from_env()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "scribe=debug,scribe_server=debug,scribe_ingest=debug,scribe_api=debug,tower_http=debug".into()
            }),
        )
        .init();

    // Init database. Unavailable storage is fatal.
    let db = Arc::new(
        Database::open(&config.db_path)
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    // Ingestion: one fetcher and pipeline shared by every session
    let fetcher = HttpFetcher::new(&config.fetch)?;
    let pipeline = Pipeline::new(
        Store::new(db.clone()),
        fetcher.clone(),
        config.max_fetches_per_message,
    );
    let listener = Listener::new(pipeline);

    let state = Arc::new(AppStateInner {
        db: db.clone(),
        listener: listener.clone(),
    });
    let router = app::build(state.clone(), &config.public_dir);

    let addr = config.addr()?;
    let tcp = tokio::net::TcpListener::bind(addr).await?;
    info!("Scribe listening on {}", addr);
    info!(
        "Attachment fetches: {:?} timeout, {} bytes max, {} per message, {} total",
        config.fetch.timeout,
        config.fetch.max_bytes,
        config.max_fetches_per_message,
        config.fetch.max_concurrent
    );

    // New upgrades are refused as soon as the signal arrives; HTTP keeps
    // answering until the sessions have drained or the grace period ends.
    let grace = config.shutdown_grace;
    app::serve(tcp, router, async move {
        shutdown_signal().await;
        if !listener.shutdown(grace).await {
            warn!("Abandoning ingestion sessions still in progress");
        }
    })
    .await?;

    fetcher.close();
    drop(state);
    db.checkpoint()?;
    info!("Database checkpointed, bye");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
