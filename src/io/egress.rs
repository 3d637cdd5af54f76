//! Cycle egress - writes cycle reports to file
//!
//! Each processed cycle is written as one JSON object per line (JSONL)
//! to the file specified in config.

use crate::services::engine::CycleReport;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// Egress writer for cycle reports
pub struct Egress {
    file_path: String,
}

impl Egress {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "egress_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Write a cycle report to the egress file
    /// Returns true if successful, false otherwise
    pub fn write_report(&self, report: &CycleReport) -> bool {
        let json = match serde_json::to_string(report) {
            Ok(json) => json,
            Err(e) => {
                error!(cycle = %report.cycle, error = %e, "report_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                debug!(
                    cycle = %report.cycle,
                    entities = %report.snapshots.len(),
                    transitions = %report.transitions.len(),
                    "report_egressed"
                );
                true
            }
            Err(e) => {
                error!(cycle = %report.cycle, error = %e, "report_egress_failed");
                false
            }
        }
    }

    /// Append a line to the egress file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "egress_written");

        Ok(())
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }
}
