//! Append-only audit log: one JSONL file per project root, one line per
//! CRUD operation or command decision, chronological order.

use crate::fingerprint::project_key;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Create,
    Update,
    Delete,
    Rollback,
    Command,
}

/// Immutable record of one operation or decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
    pub target: String,
    pub outcome: String,
}

impl LogEntry {
    pub fn now(kind: LogKind, target: &str, outcome: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            target: target.to_string(),
            outcome: outcome.to_string(),
        }
    }
}

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Open (creating if needed) the log store for a project root.
    pub fn open(dir: &Path, root: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        Ok(Self {
            path: dir.join(format!("{}.jsonl", project_key(root))),
        })
    }

    /// Default log location: `<user cache dir>/repostate/logs`.
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("repostate")
            .join("logs")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, flushed immediately. Logging must never abort the
    /// operation being logged, so failures are swallowed here; callers that
    /// need the error use `append`.
    pub fn record(&mut self, entry: LogEntry) {
        let _ = self.append(&entry);
    }

    pub fn append(&mut self, entry: &LogEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open audit log {}", self.path.display()))?;
        let line = serde_json::to_string(entry).context("Failed to encode log entry")?;
        writeln!(file, "{line}")
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        Ok(())
    }

    /// All entries in chronological (append) order. Undecodable lines are
    /// skipped rather than failing the whole read.
    pub fn read_all(&self) -> Result<Vec<LogEntry>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read audit log {}", self.path.display()));
            }
        };
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}
