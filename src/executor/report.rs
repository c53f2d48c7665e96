use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::ExecutionSummary;
use crate::common::config::{Config, DeleteMode};
use crate::planner::KeepSet;

/// Audit record of one execution, appended as a JSON line to the daily run log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: Uuid,

    /// When the run finished
    pub timestamp: DateTime<Utc>,

    pub mode: DeleteMode,

    /// Scan roots the plan was built from
    pub roots: Vec<PathBuf>,

    pub keep: KeepSet,

    pub summary: ExecutionSummary,
}

impl RunLog {
    pub fn new(summary: ExecutionSummary, mode: DeleteMode, roots: Vec<PathBuf>, keep: KeepSet) -> Self {
        Self {
            run_id: summary.run_id,
            timestamp: Utc::now(),
            mode,
            roots,
            keep,
            summary,
        }
    }

    /// Append to `~/.slimmac/logs/runs-<date>.jsonl`
    pub fn save(&self) -> Result<PathBuf> {
        self.save_in(&Config::logs_dir())
    }

    /// Append to the daily log file in `log_dir`
    pub fn save_in(&self, log_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create logs dir: {}", log_dir.display()))?;

        let log_date = self.timestamp.format("%Y-%m-%d").to_string();
        let log_path = log_dir.join(format!("runs-{}.jsonl", log_date));

        let log_entry = serde_json::to_string(self).context("Failed to serialize run log")?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log: {}", log_path.display()))?;
        writeln!(file, "{}", log_entry)?;

        Ok(log_path)
    }
}
