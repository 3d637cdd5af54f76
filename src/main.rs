//! Geofence monitor - GPS anchor-distance tracking with Kalman smoothing
//!
//! Anchors every tracked entity at its first fix and reports, once per
//! polling cycle, whether it is still within the safe radius, is forecast
//! to leave it, has left it, or has gone silent.
//!
//! Module structure:
//! - `domain/` - Core types (observations, safety states, geodesy)
//! - `io/` - External interfaces (MQTT ingress/egress, replay, JSONL, Prometheus)
//! - `services/` - Estimation logic (Engine, Kalman filter, Classifier, Runner)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use geofence_monitor::domain::SafetyState;
use geofence_monitor::infra::{Config, IngressMode, Metrics};
use geofence_monitor::io::{
    create_egress_channel, read_replay_file, run_replay, Egress, MqttPublisher,
};
use geofence_monitor::services::{CycleClock, CycleRunner, TrackingEngine};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Geofence monitor - keeps tracked entities near their anchor
#[derive(Parser, Debug)]
#[command(name = "geofence-monitor", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-entity filter steps
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "geofence-monitor starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config)?;
    let settings = config.tracker_settings();

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        ingress_mode = ?config.ingress_mode(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        ingress_topic = %config.ingress_topic(),
        poll_interval_secs = %config.poll_interval_secs(),
        safe_radius_m = %settings.safe_radius_m,
        stale_threshold_minutes = %settings.stale_threshold_minutes,
        ignored_entities = ?settings.ignored_entities,
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Batch channel (bounded for backpressure)
    let (batch_tx, batch_rx) = mpsc::channel(16);

    let clock = match config.ingress_mode() {
        IngressMode::Mqtt => {
            let mqtt_config = config.clone();
            let mqtt_metrics = metrics.clone();
            let mqtt_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = geofence_monitor::io::mqtt::start_mqtt_client(
                    &mqtt_config,
                    batch_tx,
                    mqtt_metrics,
                    mqtt_shutdown,
                )
                .await
                {
                    error!(error = %e, "MQTT client error");
                }
            });
            CycleClock::Wall
        }
        IngressMode::Replay => {
            let Some(path) = config.replay_file() else {
                return Err("ingress.mode = \"replay\" requires ingress.replay_file".into());
            };
            let batches = read_replay_file(path)?;
            for _ in &batches {
                metrics.record_batch_received();
            }
            let replay_shutdown = shutdown_rx.clone();
            tokio::spawn(run_replay(batches, batch_tx, replay_shutdown));
            CycleClock::Replay
        }
    };

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = geofence_monitor::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Create MQTT egress channel and publisher (if enabled)
    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) = create_egress_channel(1000, config.site_id().to_string());
        let egress_sender = egress_sender.with_metrics(metrics.clone());

        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        Some(egress_sender)
    } else {
        None
    };

    // Start metrics reporter; also publishes the summary when MQTT egress is on
    let reporter_metrics = metrics.clone();
    let reporter_egress = egress_sender.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let tracked: u64 =
                SafetyState::ALL.iter().map(|state| reporter_metrics.entities_in(*state)).sum();
            let summary = reporter_metrics.report(tracked as usize);
            summary.log();
            if let Some(sender) = &reporter_egress {
                sender.send_metrics(summary, chrono::Utc::now().timestamp_millis());
            }
        }
    });

    let engine = TrackingEngine::with_metrics(settings, metrics.clone())?;
    let egress = Egress::new(config.egress_file());
    let mut runner = CycleRunner::new(engine, egress, metrics, config.poll_interval_secs())
        .with_clock(clock);
    if let Some(sender) = egress_sender {
        runner = runner.with_egress_sender(sender);
    }

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run cycles until the batch source ends or shutdown is requested
    runner.run(batch_rx, shutdown_rx).await;

    info!("geofence-monitor shutdown complete");
    Ok(())
}
