//! Typed error kinds callers need to discriminate on.
//! General I/O plumbing stays on `anyhow::Result` with context.

use std::path::PathBuf;
use thiserror::Error;

/// Scan-level failures. Per-path problems never surface here — they are
/// recorded as skipped entries on the scan outcome instead.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The caller cancelled mid-scan. The in-progress tree is discarded;
    /// the previous snapshot remains authoritative.
    #[error("scan cancelled")]
    Cancelled,

    #[error("failed to access scan root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid ignore pattern `{pattern}`: {message}")]
    Pattern { pattern: String, message: String },
}

/// Snapshot cache save failures. Loads never error: any corrupt,
/// version-mismatched, or unreadable cache is reported as absent and
/// forces a full rescan.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The on-disk generation marker no longer matches the one observed at
    /// load time — another session saved in between. A silent overwrite
    /// would discard its newer state.
    #[error("snapshot cache at {path} was modified by another session since load")]
    ConcurrentModification { path: PathBuf },

    #[error("snapshot cache I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fatal apply failure: a pre-image could not be restored during rollback.
/// The listed paths are in an indeterminate state and no further automatic
/// recovery is possible.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("rollback failed; paths left in indeterminate state: {}", paths.join(", "))]
    RollbackFailed { paths: Vec<String> },
}
