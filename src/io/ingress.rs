//! Observation batch decoding and JSONL replay
//!
//! A batch is the full position list for one polling cycle:
//!
//! ```json
//! {"observations": [{"entity_id": "An", "latitude": 10.77, "longitude": 106.70,
//!                    "timestamp": "2026-10-16T08:00:00Z"}]}
//! ```
//!
//! Items are decoded one by one so a single bad entry does not discard the
//! rest of the batch; semantic validation happens in the engine.

use crate::domain::types::RawObservation;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// One cycle's worth of observations as received
#[derive(Debug, Clone, Default)]
pub struct ObservationBatch {
    pub observations: Vec<RawObservation>,
    /// Items that were present but could not be decoded
    pub undecodable: usize,
}

impl ObservationBatch {
    /// Newest parseable sample time in the batch
    pub fn newest_sample_time(&self) -> Option<DateTime<Utc>> {
        self.observations.iter().filter_map(|o| o.timestamp.to_utc()).max()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchEnvelope {
    Wrapped { observations: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

/// Decode a batch payload.
///
/// Accepts `{"observations": [...]}` or a bare array. Fails only when the
/// payload as a whole is not a batch.
pub fn parse_batch(json_str: &str) -> Result<ObservationBatch, serde_json::Error> {
    let items = match serde_json::from_str::<BatchEnvelope>(json_str)? {
        BatchEnvelope::Wrapped { observations } => observations,
        BatchEnvelope::Bare(items) => items,
    };

    let mut batch =
        ObservationBatch { observations: Vec::with_capacity(items.len()), undecodable: 0 };
    for item in items {
        match serde_json::from_value::<RawObservation>(item) {
            Ok(observation) => batch.observations.push(observation),
            Err(e) => {
                debug!(error = %e, "observation_undecodable");
                batch.undecodable += 1;
            }
        }
    }
    Ok(batch)
}

/// Read every batch from a JSONL file (one batch per line).
///
/// Blank lines are skipped; lines that are not batches are logged and
/// skipped.
pub fn read_replay_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<ObservationBatch>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open replay file {}", path.display()))?;

    let mut batches = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line =
            line.with_context(|| format!("Failed to read line {} of {}", index + 1, path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_batch(&line) {
            Ok(batch) => batches.push(batch),
            Err(e) => warn!(line = index + 1, error = %e, "replay_line_skipped"),
        }
    }

    info!(file = %path.display(), batches = batches.len(), "replay_file_loaded");
    Ok(batches)
}

/// Feed replay batches into the cycle runner in file order.
///
/// Waits for the runner to accept each batch, so every line yields one
/// cycle. Returns when the file is exhausted or on shutdown.
pub async fn run_replay(
    batches: Vec<ObservationBatch>,
    batch_tx: mpsc::Sender<ObservationBatch>,
    mut shutdown: watch::Receiver<bool>,
) {
    let total = batches.len();
    for (index, batch) in batches.into_iter().enumerate() {
        tokio::select! {
            result = batch_tx.send(batch) => {
                if result.is_err() {
                    warn!("replay_channel_closed");
                    return;
                }
            }
            _ = shutdown_requested(&mut shutdown) => {
                info!(sent = index, total = total, "replay_shutdown");
                return;
            }
        }
    }
    info!(batches = total, "replay_finished");
}

/// Resolves once shutdown is signalled; never resolves if the sender is gone
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_wrapped_batch() {
        let json = r#"{"observations": [
            {"entity_id": "An", "latitude": 10.7769, "longitude": 106.7009,
             "timestamp": "2026-10-16T08:00:00+00:00"},
            {"entity_id": "Binh", "latitude": 10.78, "longitude": 106.70,
             "timestamp": 1792137600000}
        ]}"#;
        let batch = parse_batch(json).unwrap();
        assert_eq!(batch.observations.len(), 2);
        assert_eq!(batch.undecodable, 0);
        assert_eq!(batch.observations[0].entity_id, "An");
        assert_eq!(batch.observations[1].latitude, Some(10.78));
    }

    #[test]
    fn test_parse_bare_array() {
        let json = r#"[{"entity_id": "An", "latitude": 1.0, "longitude": 2.0,
                        "timestamp": "2026-10-16 08:00:00"}]"#;
        let batch = parse_batch(json).unwrap();
        assert_eq!(batch.observations.len(), 1);
        assert_eq!(
            batch.newest_sample_time(),
            Some(Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_null_coordinates_decode_for_later_rejection() {
        let json = r#"{"observations": [
            {"entity_id": "An", "latitude": null, "longitude": null, "timestamp": null}
        ]}"#;
        let batch = parse_batch(json).unwrap();
        assert_eq!(batch.observations.len(), 1);
        assert!(batch.observations[0].latitude.is_none());
        assert!(batch.observations[0].validate().is_err());
    }

    #[test]
    fn test_bad_item_does_not_poison_batch() {
        let json = r#"{"observations": [
            {"latitude": 1.0},
            {"entity_id": "An", "latitude": 1.0, "longitude": 2.0,
             "timestamp": "2026-10-16T08:00:00Z"},
            "garbage"
        ]}"#;
        let batch = parse_batch(json).unwrap();
        assert_eq!(batch.observations.len(), 1);
        assert_eq!(batch.undecodable, 2);
    }

    #[test]
    fn test_parse_invalid_payload() {
        assert!(parse_batch("not json").is_err());
        assert!(parse_batch(r#"{"frames": []}"#).is_err());
    }

    #[test]
    fn test_empty_batch() {
        let batch = parse_batch(r#"{"observations": []}"#).unwrap();
        assert!(batch.is_empty());
        assert!(batch.newest_sample_time().is_none());
    }

    #[test]
    fn test_read_replay_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"observations": [{{"entity_id": "An", "latitude": 1.0, "longitude": 2.0, "timestamp": "2026-10-16T08:00:00Z"}}]}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not a batch").unwrap();
        writeln!(file, r#"{{"observations": []}}"#).unwrap();
        file.flush().unwrap();

        let batches = read_replay_file(file.path()).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].observations.len(), 1);
        assert!(batches[1].is_empty());
    }

    #[test]
    fn test_read_missing_replay_file() {
        let err = read_replay_file("/nonexistent/replay.jsonl").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to open replay file"));
    }

    #[tokio::test]
    async fn test_run_replay_sends_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let batches = vec![
            ObservationBatch { observations: vec![], undecodable: 1 },
            ObservationBatch { observations: vec![], undecodable: 2 },
        ];

        run_replay(batches, tx, shutdown_rx).await;

        assert_eq!(rx.recv().await.unwrap().undecodable, 1);
        assert_eq!(rx.recv().await.unwrap().undecodable, 2);
        assert!(rx.recv().await.is_none());
    }
}
