//! Persisted fingerprint record enabling incremental rescans.
//! A snapshot is only valid for the exact (root, ignore patterns, version)
//! triple it was produced under; any mismatch forces a full rescan.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bump on any change to the persisted layout. A version mismatch on load
/// is a cache miss, never an error.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub size: u64,
    pub mtime_ns: u64,
    pub fingerprint: String,
    pub algo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub version: u32,
    /// Canonical absolute root path this snapshot was produced under.
    pub root: String,
    /// Normalized (sorted, deduped) ignore patterns.
    pub ignore_patterns: Vec<String>,
    /// Relative file path to entry. Directories are never fingerprinted
    /// and carry no entry.
    pub entries: BTreeMap<String, SnapshotEntry>,
}

impl Snapshot {
    pub fn new(root: impl Into<String>, ignore_patterns: &[String]) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            root: root.into(),
            ignore_patterns: normalize_patterns(ignore_patterns),
            entries: BTreeMap::new(),
        }
    }

    /// Whether this snapshot was produced under the given identity triple.
    pub fn matches_identity(&self, root: &str, ignore_patterns: &[String]) -> bool {
        self.version == SNAPSHOT_VERSION
            && self.root == root
            && self.ignore_patterns == normalize_patterns(ignore_patterns)
    }
}

/// Canonical form of an ignore-pattern set: sorted and deduped, so two
/// spellings of the same set produce the same cache identity.
pub fn normalize_patterns(patterns: &[String]) -> Vec<String> {
    let mut out: Vec<String> = patterns.to_vec();
    out.sort();
    out.dedup();
    out
}
