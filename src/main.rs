use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use knitted_drain::backend::BackendClient;
use knitted_drain::config;
use knitted_drain::drain;
use knitted_drain::model::TriggerKind;
use knitted_drain::trigger::{self, AppState};

#[derive(Debug, Parser)]
#[command(author, version, about = "HTTP-triggered drain of the follow-event queue")]
struct Args {
    /// Path to YAML config file (defaults to ./config.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override `app.bind_address`
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(args.config.as_deref())?;

    let client = Arc::new(BackendClient::from_config(&cfg)?);
    let state = AppState::new(client.clone(), client, cfg.drain_settings());

    // Optional in-process scheduler; external triggers keep working alongside it.
    if let Some(interval) = cfg.schedule_interval() {
        let state = state.clone();
        info!(?interval, "starting built-in scheduler");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                drain::drain_batch(
                    state.queue.as_ref(),
                    state.follow.as_ref(),
                    &state.settings,
                    TriggerKind::Scheduled,
                )
                .await;
            }
        });
    }

    let address = args.bind.unwrap_or_else(|| cfg.app.bind_address.clone());
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(%address, queue = %cfg.queue.name, "drain service listening");

    axum::serve(listener, trigger::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("drain service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(?err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(?err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
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
