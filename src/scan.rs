//! Tree Indexer: walks a project root into a Tree and Snapshot, reusing
//! fingerprints from a previous snapshot when size and mtime are unchanged,
//! so rescanning an untouched tree performs zero content reads.

use crate::errors::ScanError;
use crate::fingerprint::{fingerprint_file, FINGERPRINT_ALGO};
use crate::snapshot::{normalize_patterns, Snapshot, SnapshotEntry};
use crate::tree::{Tree, TreeNode};
use ignore::gitignore::GitignoreBuilder;
use ignore::WalkBuilder;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Cooperative cancellation flag shared between the caller and a running
/// scan or apply. Checked once per entry/op.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for the next operation.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub files: usize,
    pub dirs: usize,
    /// Files whose content was read and fingerprinted this scan.
    pub content_reads: usize,
    /// Files whose fingerprint was reused from the previous snapshot.
    pub reused: usize,
}

/// A path the scan could not index. Never aborts the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPath {
    pub path: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct ScanOutcome {
    pub tree: Tree,
    pub snapshot: Snapshot,
    pub stats: ScanStats,
    pub skipped: Vec<SkippedPath>,
}

/// Walk `root`, excluding `ignore_patterns` (gitignore-style globs), and
/// produce the current Tree plus a Snapshot of exactly the entries found.
///
/// Files matching a `previous` entry on (size, mtime_ns) take the trusted
/// unchanged fast path and reuse its fingerprint without a content read.
/// Symlinks are never followed, so traversal cannot revisit an ancestor.
pub fn scan(
    root: &Path,
    ignore_patterns: &[String],
    previous: Option<&Snapshot>,
    cancel: &CancelToken,
) -> Result<ScanOutcome, ScanError> {
    let root = fs::canonicalize(root).map_err(|source| ScanError::Root {
        path: root.to_path_buf(),
        source,
    })?;

    let patterns = normalize_patterns(ignore_patterns);
    let mut matcher_builder = GitignoreBuilder::new(&root);
    for pattern in &patterns {
        matcher_builder
            .add_line(None, pattern)
            .map_err(|err| ScanError::Pattern {
                pattern: pattern.clone(),
                message: err.to_string(),
            })?;
    }
    let matcher = matcher_builder.build().map_err(|err| ScanError::Pattern {
        pattern: patterns.join(", "),
        message: err.to_string(),
    })?;

    let filter_root = root.clone();
    let walker = WalkBuilder::new(&root)
        .hidden(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            let rel = entry
                .path()
                .strip_prefix(&filter_root)
                .unwrap_or_else(|_| entry.path());
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            !matcher.matched(rel, is_dir).is_ignore()
        })
        .build();

    let root_str = root.to_string_lossy().to_string();
    let mut tree = Tree::new(root.clone());
    let mut snapshot = Snapshot::new(root_str, &patterns);
    let mut stats = ScanStats::default();
    let mut skipped = Vec::new();

    for result in walker {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                let path = walk_error_path(&err)
                    .map(|p| {
                        p.strip_prefix(&root)
                            .unwrap_or(p)
                            .to_string_lossy()
                            .replace('\\', "/")
                    })
                    .unwrap_or_default();
                skipped.push(SkippedPath {
                    path,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        if entry.depth() == 0 {
            continue; // the root itself is implicit
        }

        let rel = match entry.path().strip_prefix(&root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };

        let Some(file_type) = entry.file_type() else {
            skipped.push(SkippedPath {
                path: rel,
                reason: "unknown file type".to_string(),
            });
            continue;
        };

        if file_type.is_symlink() {
            skipped.push(SkippedPath {
                path: rel,
                reason: "symlink not followed".to_string(),
            });
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(meta) => meta,
            Err(err) => {
                skipped.push(SkippedPath {
                    path: rel,
                    reason: format!("stat failed: {err}"),
                });
                continue;
            }
        };
        let mtime_ns = mtime_nanos(&metadata);

        if file_type.is_dir() {
            if tree.insert(TreeNode::directory(&rel, mtime_ns)).is_ok() {
                stats.dirs += 1;
            }
            continue;
        }

        if !file_type.is_file() {
            skipped.push(SkippedPath {
                path: rel,
                reason: "not a regular file".to_string(),
            });
            continue;
        }

        let size = metadata.len();
        let fingerprint = match trusted_fingerprint(previous, &rel, size, mtime_ns) {
            Some(fp) => {
                stats.reused += 1;
                fp
            }
            None => match fingerprint_file(entry.path()) {
                Ok(fp) => {
                    stats.content_reads += 1;
                    fp
                }
                Err(err) => {
                    skipped.push(SkippedPath {
                        path: rel,
                        reason: format!("read failed: {err:#}"),
                    });
                    continue;
                }
            },
        };

        if tree
            .insert(TreeNode::file(&rel, size, mtime_ns, fingerprint.clone()))
            .is_ok()
        {
            stats.files += 1;
            snapshot.entries.insert(
                rel,
                SnapshotEntry {
                    size,
                    mtime_ns,
                    fingerprint,
                    algo: FINGERPRINT_ALGO.to_string(),
                },
            );
        }
    }

    Ok(ScanOutcome {
        tree,
        snapshot,
        stats,
        skipped,
    })
}

fn trusted_fingerprint(
    previous: Option<&Snapshot>,
    rel: &str,
    size: u64,
    mtime_ns: u64,
) -> Option<String> {
    let entry = previous?.entries.get(rel)?;
    if entry.size == size && entry.mtime_ns == mtime_ns && entry.algo == FINGERPRINT_ALGO {
        Some(entry.fingerprint.clone())
    } else {
        None
    }
}

/// Pull the offending path out of a walker error, unwrapping the depth
/// wrapper the walker adds around partial failures.
fn walk_error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path),
        ignore::Error::WithDepth { err, .. } => walk_error_path(err),
        _ => None,
    }
}

pub(crate) fn mtime_nanos(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
        .map(|dur| dur.as_nanos() as u64)
        .unwrap_or(0)
}
