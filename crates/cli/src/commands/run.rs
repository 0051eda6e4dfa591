//! `run` command implementation.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use contracts::{RelayConfig, SecurityEvent};
use dispatcher::DispatcherBuilder;

use super::print_stats;
use crate::cli::RunArgs;

/// Counts from reading the event stream
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IntakeStats {
    pub lines: u64,
    pub accepted: u64,
    pub rejected: u64,
}

/// Execute the `run` command
pub async fn run_relay(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let enabled = config.outputs.enabled_destinations();
    info!(
        outputs = ?enabled,
        metrics_queue = config.metrics.queue_capacity,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)?;
    }

    let dispatcher = DispatcherBuilder::new(config)
        .build()
        .await
        .context("Failed to create outputs")?;

    let (event_tx, event_rx) = mpsc::channel(args.buffer_size.max(1));
    let dispatcher_handle = dispatcher.spawn(event_rx);

    let reader = open_input(args.input.as_deref()).await?;
    let shutdown_signal = setup_shutdown_signal();

    info!("Reading events...");

    // Dropping the sender (either branch) lets the dispatcher drain and stop
    tokio::select! {
        result = forward_events(reader, event_tx) => {
            let intake = result.context("Failed to read events")?;
            info!(
                lines = intake.lines,
                accepted = intake.accepted,
                rejected = intake.rejected,
                "Input exhausted"
            );
        }
        _ = shutdown_signal => {
            warn!("Received shutdown signal, draining in-flight events...");
        }
    }

    let stats = dispatcher_handle.await.context("Dispatcher task failed")?;
    print_stats(&stats);

    info!("alert-relay finished");
    Ok(())
}

async fn open_input(path: Option<&Path>) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    match path {
        None => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
        Some(p) if p.as_os_str() == "-" => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
        Some(p) => {
            let file = tokio::fs::File::open(p)
                .await
                .with_context(|| format!("Failed to open input {}", p.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
    }
}

/// Parse newline-delimited JSON events and queue them for dispatch
///
/// Blank lines are ignored; malformed lines are logged and skipped.
pub(crate) async fn forward_events<R>(reader: R, event_tx: mpsc::Sender<SecurityEvent>) -> Result<IntakeStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut intake = IntakeStats::default();

    while let Some(line) = lines.next_line().await? {
        intake.lines += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<SecurityEvent>(line) {
            Ok(event) => {
                debug!(uuid = %event.uuid, rule = %event.rule, "Event received");
                if event_tx.send(event).await.is_err() {
                    warn!("Dispatcher stopped, no longer reading input");
                    break;
                }
                intake.accepted += 1;
            }
            Err(e) => {
                intake.rejected += 1;
                warn!(line = intake.lines, error = %e, "Skipping malformed event");
            }
        }
    }

    Ok(intake)
}

/// Setup Ctrl+C and SIGTERM signal handlers
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &RelayConfig) {
    println!("\n=== Configuration Summary ===\n");

    let outputs = &config.outputs;
    if let Some(es) = outputs.elasticsearch.as_ref().filter(|c| c.enabled) {
        println!("Elasticsearch:");
        println!("  Host: {}", es.host_port);
        println!("  Index: {} (suffix: {}, type: {})", es.index, es.suffix, es.doc_type);
        println!("  Minimum priority: {}", es.minimum_priority);
    }
    if let Some(mqtt) = outputs.mqtt.as_ref().filter(|c| c.enabled) {
        println!("MQTT:");
        println!("  Broker: {}", mqtt.broker);
        println!("  Topic: {} (qos {}, retained: {})", mqtt.topic, mqtt.qos, mqtt.retained);
        println!("  Minimum priority: {}", mqtt.minimum_priority);
    }
    if let Some(webhook) = outputs.webhook.as_ref().filter(|c| c.enabled) {
        println!("Webhook:");
        println!("  Address: {} ({:?})", webhook.address, webhook.method);
        println!("  Minimum priority: {}", webhook.minimum_priority);
    }
    if outputs.enabled_destinations().is_empty() {
        println!("No outputs enabled");
    }

    println!("\nMetrics queue capacity: {}", config.metrics.queue_capacity);
    println!();
}
