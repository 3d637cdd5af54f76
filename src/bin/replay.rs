//! Geofence Replay - offline run of recorded observation batches
//!
//! Feeds a JSONL file (one batch per line) through the tracking engine and
//! prints each cycle. Uses the same config file as geofence-monitor so
//! radius, filter and staleness parameters match the live deployment.
//!
//! Usage:
//!   geofence-replay recordings/2026-10-16.jsonl
//!   geofence-replay --config config/dev.toml --json recordings/day.jsonl > out.jsonl
//!   geofence-replay --alerts-only recordings/day.jsonl

use chrono::{DateTime, Utc};
use clap::Parser;
use geofence_monitor::domain::TrackerSnapshot;
use geofence_monitor::infra::Config;
use geofence_monitor::io::read_replay_file;
use geofence_monitor::services::{CycleReport, TrackingEngine};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Geofence Replay - run recorded batches through the tracking engine
#[derive(Parser, Debug)]
#[command(name = "geofence-replay", version, about, long_about = None)]
struct Args {
    /// JSONL file with one observation batch per line
    input: String,

    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,

    /// Print each cycle report as one JSON line instead of a table
    #[arg(long)]
    json: bool,

    /// Only print state transitions
    #[arg(long)]
    alerts_only: bool,
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so --json output stays clean
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(&args.config)?;
    let mut engine = TrackingEngine::new(config.tracker_settings())?;
    let batches = read_replay_file(&args.input)?;

    let mut replay_now: Option<DateTime<Utc>> = None;
    for batch in &batches {
        let Some(now) = batch.newest_sample_time().or(replay_now) else {
            // Nothing to date this cycle against yet
            continue;
        };
        replay_now = Some(now);

        let report = engine.process_cycle(&batch.observations, now)?;
        if args.json {
            println!("{}", serde_json::to_string(&report)?);
        } else {
            print_report(&report, args.alerts_only);
        }
    }

    info!(batches = batches.len(), cycles = engine.cycles(), "replay_complete");
    Ok(())
}

fn print_report(report: &CycleReport, alerts_only: bool) {
    let ts = report.processed_at.format("%Y-%m-%d %H:%M:%S");
    for transition in &report.transitions {
        println!(
            "{ts} cycle {:>4}  {:<16} {} -> {}  dist {:>7.1} m  forecast {:>7.1} m",
            report.cycle,
            transition.entity_id,
            transition.from,
            transition.to,
            transition.filtered_distance_m,
            transition.forecast_distance_m
        );
    }
    if alerts_only {
        return;
    }
    for snapshot in &report.snapshots {
        println!("{ts} cycle {:>4}  {}", report.cycle, format_snapshot(snapshot));
    }
}

fn format_snapshot(snapshot: &TrackerSnapshot) -> String {
    let activity = snapshot.activity.map(|a| format!(" ({a:?})")).unwrap_or_default();
    let age = snapshot.age_minutes.map(|a| format!("  age {a:.1} min")).unwrap_or_default();
    format!(
        "{:<16} {:<15}{}  dist {:>7.1} m  forecast {:>7.1} m{}",
        snapshot.entity_id,
        snapshot.safety_state,
        activity,
        snapshot.filtered_distance_m,
        snapshot.forecast_distance_m,
        age
    )
}
