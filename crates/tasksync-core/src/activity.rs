use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const ACTIVITY_FILE: &str = "activity.log";

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("Failed to write activity log: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize activity event: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    InstructionEmitted,
    TaskTombstoned,
    TaskOrphaned,
    HealCompleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub details: Value,
}

pub fn activity_log_path(state_dir: &Path) -> PathBuf {
    state_dir.join(ACTIVITY_FILE)
}

/// Append-only JSONL record of what the engine decided, one event per line.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: activity_log_path(state_dir),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &ActivityEvent) -> Result<(), ActivityError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(event)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Appends, logging instead of failing.
    pub fn record(&self, event: ActivityEvent) {
        if let Err(err) = self.append(&event) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to append activity event");
        }
    }

    /// Events in file order. Unparsable lines are skipped.
    pub fn read_events(&self) -> Result<Vec<ActivityEvent>, ActivityError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(event) = serde_json::from_str::<ActivityEvent>(&line) {
                events.push(event);
            }
        }
        Ok(events)
    }
}
