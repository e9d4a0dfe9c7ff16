use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use knitted_drain::backend::BackendClient;
use knitted_drain::config;
use knitted_drain::drain;
use knitted_drain::model::{DrainResponse, TriggerKind};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Drain pending follow events once and print the batch report"
)]
struct Args {
    /// Path to YAML config file (defaults to ./config.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep popping batches until a pop comes back empty
    #[arg(long)]
    until_empty: bool,

    /// Upper bound on batches when --until-empty is set
    #[arg(long, default_value = "100")]
    max_batches: usize,

    /// Override `queue.batch_size` for this run
    #[arg(long)]
    batch_size: Option<u32>,

    /// Mark the run as scheduled in the report
    #[arg(long)]
    scheduled: bool,
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
    let client = BackendClient::from_config(&cfg)?;

    let mut settings = cfg.drain_settings();
    if let Some(n) = args.batch_size.filter(|n| *n > 0) {
        settings.batch_size = n;
    }
    let trigger = if args.scheduled {
        TriggerKind::Scheduled
    } else {
        TriggerKind::Manual
    };
    let max_batches = if args.until_empty {
        args.max_batches.max(1)
    } else {
        1
    };

    info!(
        queue = %settings.queue_name,
        batch_size = settings.batch_size,
        max_batches,
        "starting drain"
    );
    let reports =
        drain::drain_until_empty(&client, &client, &settings, trigger, max_batches).await;

    let processed: usize = reports.iter().map(|r| r.processed_count()).sum();
    let skipped: usize = reports.iter().map(|r| r.skipped_count()).sum();
    let failed: usize = reports.iter().map(|r| r.failed_count()).sum();
    if let Some(err) = reports.iter().find_map(|r| r.read_error.as_deref()) {
        warn!(%err, "queue read failed during drain");
    }
    if args.until_empty && drain::stopped_at_limit(&reports, max_batches) {
        warn!(max_batches, "stopped at --max-batches; messages may remain");
    }
    info!(
        batches = reports.len(),
        processed,
        skipped,
        failed,
        "drain finished"
    );

    for report in &reports {
        let line = serde_json::to_string(report).context("failed to encode batch report")?;
        println!("{line}");
    }
    let summary = DrainResponse {
        success: true,
        message: Some(format!("Processed {processed} messages")),
        error: None,
    };
    println!(
        "{}",
        serde_json::to_string(&summary).context("failed to encode summary")?
    );
    Ok(())
}
