use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod app;
mod http;
mod wiring;

/// Chat-to-docs proposal pipeline daemon.
#[derive(Parser)]
#[command(name = "docsmith-server", version)]
struct Args {
    /// Path to docsmith.toml (default: ~/.docsmith/docsmith.toml,
    /// DOCSMITH_CONFIG overrides).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "docsmith_server=info,docsmith_pipeline=info,docsmith_streams=info,tower_http=warn"
                    .into()
            }),
        )
        .init();

    let args = Args::parse();
    let config_path = args.config.or_else(|| std::env::var("DOCSMITH_CONFIG").ok());

    // Bad config or an unreachable database is fatal at startup (exit ≠ 0).
    let config = docsmith_core::config::DocsmithConfig::load(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("config load failed: {e}"))?;

    let cancel = CancellationToken::new();
    let state = wiring::build_state(config, cancel.clone()).await?;

    // Seed the vector store from the documentation snapshot.
    if let Err(e) = wiring::index_documentation(&state).await {
        warn!(error = %e, "documentation indexing failed; RAG retrieval will be empty");
    }

    // Stream adapters and scheduled jobs.
    state.manager.load_enabled()?;
    let (scheduler, shutdown_tx) = wiring::start_scheduler(&state);

    let bind = state.config.server.bind.clone();
    let port = state.config.server.port;
    let router = app::build_router(state.clone());
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("docsmith review API listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    // Graceful teardown: stop triggers, let in-flight work finish.
    cancel.cancel();
    if shutdown_tx.send(true).is_err() {
        error!("scheduler already gone at shutdown");
    }
    scheduler.await.ok();
    state.manager.shutdown_all().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    tokio::select! {
        _ = ctrl_c => info!("shutdown signal received"),
        _ = cancel.cancelled() => {}
    }
}
