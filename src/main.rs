mod aggregate;
mod app;
mod cache;
mod clock;
mod config;
mod http;
mod metrics;
mod persistence;
mod records;
mod store;

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::Error as DotenvError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::app::AppContext;
use crate::cache::MetricsCache;
use crate::clock::SystemClock;
use crate::persistence::{PersistenceConfig, flush_once, load_if_exists, spawn_flush_loop};
use crate::store::HttpRecordStore;

#[derive(Debug, Parser)]
#[command(author, version, about = "evalmon — Evaluation Metrics Dashboard Agent")]
struct Cli {
    /// Path to YAML configuration file. Defaults to env EVALMON_CONFIG or built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    let bind_addr: SocketAddr = config
        .http
        .bind
        .parse()
        .context("invalid http.bind address")?;

    let metrics = metrics::AppMetrics::new()?;
    let store = Arc::new(HttpRecordStore::new(&config)?);
    let cache = MetricsCache::new(store, Arc::new(SystemClock), metrics.clone(), &config);

    let ctx = AppContext::new(config, metrics, cache);

    // Persistence: load last-known-good snapshots then spawn the flush
    // loop if configured, so dashboards reattaching after a restart are
    // served instantly.
    if let Some(persist_cfg) = PersistenceConfig::from_env() {
        load_if_exists(&persist_cfg, &ctx.cache).await;
        let _flush_handle = spawn_flush_loop(persist_cfg, ctx.cache.clone());
    } else {
        tracing::warn!("persistence disabled: EVALMON_DATA_DIR not set");
    }

    let router = http::create_router(ctx.clone());

    info!("evalmon listening on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context("failed to bind HTTP listener")?;

    if let Err(err) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = ?err, "server terminated with error");
    }

    ctx.cache.shutdown().await;

    // Final flush on shutdown so snapshots refreshed just before
    // termination survive the restart.
    if let Some(cfg) = PersistenceConfig::from_env() {
        if let Err(err) = flush_once(&cfg, &ctx.cache).await {
            tracing::warn!(error=?err, "final snapshot flush failed");
        } else {
            tracing::info!("final snapshot flush complete");
        }
    }

    Ok(())
}

fn load_env() {
    if let Err(err) = dotenvy::dotenv() {
        match err {
            DotenvError::Io(io_err) if io_err.kind() == ErrorKind::NotFound => {}
            other => eprintln!("warning: failed to load .env file: {other}"),
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("evalmon=info,axum::rejection=trace"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
