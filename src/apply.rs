//! Change application: dry-run diffs, atomic mutation with pre-image
//! capture, reverse-order rollback, and incremental tree/snapshot updates
//! for only the affected paths.

use crate::audit::{AuditLog, LogEntry, LogKind};
use crate::changeset::{ChangeOp, ValidatedChangeSet};
use crate::errors::ApplyError;
use crate::fingerprint::{fingerprint_bytes, FINGERPRINT_ALGO};
use crate::scan::{mtime_nanos, CancelToken};
use crate::snapshot::{Snapshot, SnapshotEntry};
use crate::tree::{parent_path, NodeKind, Tree, TreeNode};
use anyhow::{Context, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// What to do when an op fails at execution time (disk full, permission
/// revoked mid-run, base changed on disk since planning).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Roll back every op already applied in this call, reverse order.
    #[default]
    StopOnFirstFailure,
    /// Keep successfully applied ops, collect failures per op.
    ContinueOnError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpAction {
    Create,
    Update,
    Delete,
}

impl OpAction {
    fn of(op: &ChangeOp) -> Self {
        match op {
            ChangeOp::Create { .. } => OpAction::Create,
            ChangeOp::Update { .. } => OpAction::Update,
            ChangeOp::Delete { .. } => OpAction::Delete,
        }
    }

    fn log_kind(self) -> LogKind {
        match self {
            OpAction::Create => LogKind::Create,
            OpAction::Update => LogKind::Update,
            OpAction::Delete => LogKind::Delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpExecStatus {
    Applied,
    /// Dry run: the effective byte delta had the op been applied.
    WouldApply { bytes_before: u64, bytes_after: u64 },
    Failed(String),
    RolledBack,
    /// Never started: an earlier failure or cancellation stopped the run.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpOutcome {
    pub path: String,
    pub action: OpAction,
    pub status: OpExecStatus,
}

#[derive(Debug)]
pub struct ApplyResult {
    pub ok: bool,
    pub dry_run: bool,
    pub outcomes: Vec<OpOutcome>,
}

impl ApplyResult {
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == OpExecStatus::Applied)
            .count()
    }

    /// Human-readable summary, one line per op.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for outcome in &self.outcomes {
            let tag = match outcome.action {
                OpAction::Create => "+".green(),
                OpAction::Update => "~".yellow(),
                OpAction::Delete => "-".red(),
            };
            let status = match &outcome.status {
                OpExecStatus::Applied => "applied".to_string(),
                OpExecStatus::WouldApply {
                    bytes_before,
                    bytes_after,
                } => format!("would apply ({bytes_before} -> {bytes_after} bytes)"),
                OpExecStatus::Failed(reason) => format!("failed: {reason}"),
                OpExecStatus::RolledBack => "rolled back".to_string(),
                OpExecStatus::Skipped => "skipped".to_string(),
            };
            out.push_str(&format!("{} {} {}\n", tag, outcome.path, status));
        }
        out
    }
}

/// Captured state of a path before mutation, for rollback.
#[derive(Debug)]
enum PreImage {
    Missing,
    File(Vec<u8>),
}

struct AppliedOp {
    rel: String,
    abs: PathBuf,
    pre: PreImage,
    /// Directories this op created, deepest last. Removed again on rollback.
    created_dirs: Vec<PathBuf>,
    /// New content for create/update, None for delete.
    new_content: Option<Vec<u8>>,
}

/// Apply a validated set in order. `dry_run` performs no mutation and
/// reports the effective diff instead. On mid-run failure the configured
/// policy governs rollback; a failed pre-image restore is fatal and names
/// the paths left indeterminate.
pub fn apply(
    root: &Path,
    tree: &mut Tree,
    snapshot: &mut Snapshot,
    audit: &mut AuditLog,
    set: ValidatedChangeSet,
    dry_run: bool,
    policy: FailurePolicy,
    cancel: &CancelToken,
) -> Result<ApplyResult, ApplyError> {
    if dry_run {
        return Ok(plan_dry_run(root, set));
    }

    let ops = set.into_ops();
    let mut outcomes: Vec<OpOutcome> = Vec::with_capacity(ops.len());
    let mut applied: Vec<AppliedOp> = Vec::new();
    let mut failed = false;

    let mut iter = ops.into_iter();
    while let Some(op) = iter.next() {
        let action = OpAction::of(&op);
        let rel = op.path().to_string();

        if cancel.is_cancelled() {
            // Stop before starting the next unapplied op. Already-applied
            // ops still honor rollback via the failure path below.
            outcomes.push(OpOutcome {
                path: rel,
                action,
                status: OpExecStatus::Failed("cancelled before execution".to_string()),
            });
            failed = true;
            for remaining in iter.by_ref() {
                outcomes.push(OpOutcome {
                    path: remaining.path().to_string(),
                    action: OpAction::of(&remaining),
                    status: OpExecStatus::Skipped,
                });
            }
            break;
        }

        match execute_op(root, &op) {
            Ok(record) => {
                audit.record(LogEntry::now(action.log_kind(), &record.rel, "applied"));
                applied.push(record);
                outcomes.push(OpOutcome {
                    path: rel,
                    action,
                    status: OpExecStatus::Applied,
                });
            }
            Err(err) => {
                let reason = format!("{err:#}");
                audit.record(LogEntry::now(
                    action.log_kind(),
                    &rel,
                    &format!("failed: {reason}"),
                ));
                outcomes.push(OpOutcome {
                    path: rel,
                    action,
                    status: OpExecStatus::Failed(reason),
                });
                failed = true;
                if policy == FailurePolicy::StopOnFirstFailure {
                    for remaining in iter.by_ref() {
                        outcomes.push(OpOutcome {
                            path: remaining.path().to_string(),
                            action: OpAction::of(&remaining),
                            status: OpExecStatus::Skipped,
                        });
                    }
                    break;
                }
            }
        }
    }

    if failed && policy == FailurePolicy::StopOnFirstFailure {
        rollback(&mut applied, audit)?;
        for outcome in &mut outcomes {
            if outcome.status == OpExecStatus::Applied {
                outcome.status = OpExecStatus::RolledBack;
            }
        }
        return Ok(ApplyResult {
            ok: false,
            dry_run: false,
            outcomes,
        });
    }

    // Kept ops: fold their effects into the tree and snapshot — affected
    // paths only, no rescan.
    for record in &applied {
        absorb_effect(root, tree, snapshot, record);
    }

    Ok(ApplyResult {
        ok: !failed,
        dry_run: false,
        outcomes,
    })
}

fn plan_dry_run(root: &Path, set: ValidatedChangeSet) -> ApplyResult {
    let mut outcomes = Vec::with_capacity(set.len());
    for op in set.ops() {
        let abs = root.join(op.path());
        let bytes_before = fs::metadata(&abs).map(|m| m.len()).unwrap_or(0);
        let bytes_after = match op {
            ChangeOp::Create { content, .. } | ChangeOp::Update { new_content: content, .. } => {
                content.len() as u64
            }
            ChangeOp::Delete { .. } => 0,
        };
        outcomes.push(OpOutcome {
            path: op.path().to_string(),
            action: OpAction::of(op),
            status: OpExecStatus::WouldApply {
                bytes_before,
                bytes_after,
            },
        });
    }
    ApplyResult {
        ok: true,
        dry_run: true,
        outcomes,
    }
}

/// Capture the pre-image, re-verify the expected base against the disk,
/// then mutate atomically.
fn execute_op(root: &Path, op: &ChangeOp) -> Result<AppliedOp> {
    let rel = op.path().to_string();
    let abs = root.join(&rel);

    let pre = match fs::read(&abs) {
        Ok(bytes) => PreImage::File(bytes),
        Err(err) if err.kind() == ErrorKind::NotFound => PreImage::Missing,
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read pre-image of {rel}"));
        }
    };

    match op {
        ChangeOp::Create { content, .. } => {
            if let PreImage::File(_) = pre {
                anyhow::bail!("path appeared on disk since planning");
            }
            let created_dirs = ensure_parent_dirs(&abs)?;
            write_atomic(&abs, content)?;
            Ok(AppliedOp {
                rel,
                abs,
                pre,
                created_dirs,
                new_content: Some(content.clone()),
            })
        }
        ChangeOp::Update {
            expected_base,
            new_content,
            ..
        } => {
            verify_disk_base(&pre, expected_base)?;
            write_atomic(&abs, new_content)?;
            Ok(AppliedOp {
                rel,
                abs,
                pre,
                created_dirs: Vec::new(),
                new_content: Some(new_content.clone()),
            })
        }
        ChangeOp::Delete { expected_base, .. } => {
            verify_disk_base(&pre, expected_base)?;
            fs::remove_file(&abs).with_context(|| format!("Failed to delete {rel}"))?;
            Ok(AppliedOp {
                rel,
                abs,
                pre,
                created_dirs: Vec::new(),
                new_content: None,
            })
        }
    }
}

fn verify_disk_base(pre: &PreImage, expected_base: &str) -> Result<()> {
    match pre {
        PreImage::Missing => anyhow::bail!("path vanished from disk since planning"),
        PreImage::File(bytes) => {
            let current = fingerprint_bytes(bytes);
            if current != expected_base {
                anyhow::bail!("stale base on disk: expected {expected_base}, found {current}");
            }
            Ok(())
        }
    }
}

/// Restore pre-images in reverse order. Restore failures are collected and
/// reported as fatal — the filesystem is indeterminate at those paths.
fn rollback(applied: &mut Vec<AppliedOp>, audit: &mut AuditLog) -> Result<(), ApplyError> {
    let mut indeterminate = Vec::new();

    while let Some(record) = applied.pop() {
        let restored = match &record.pre {
            PreImage::File(bytes) => write_atomic(&record.abs, bytes),
            PreImage::Missing => match fs::remove_file(&record.abs) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            },
        };

        match restored {
            Ok(()) => {
                // Created directories are removed again, deepest first.
                for dir in record.created_dirs.iter().rev() {
                    let _ = fs::remove_dir(dir);
                }
                audit.record(LogEntry::now(LogKind::Rollback, &record.rel, "restored"));
            }
            Err(err) => {
                audit.record(LogEntry::now(
                    LogKind::Rollback,
                    &record.rel,
                    &format!("restore failed: {err:#}"),
                ));
                indeterminate.push(record.rel.clone());
            }
        }
    }

    if indeterminate.is_empty() {
        Ok(())
    } else {
        indeterminate.reverse();
        Err(ApplyError::RollbackFailed {
            paths: indeterminate,
        })
    }
}

fn absorb_effect(root: &Path, tree: &mut Tree, snapshot: &mut Snapshot, record: &AppliedOp) {
    match &record.new_content {
        Some(content) => {
            ensure_tree_dirs(root, tree, &record.rel);
            let metadata = fs::metadata(&record.abs).ok();
            let size = metadata.as_ref().map(|m| m.len()).unwrap_or(content.len() as u64);
            let mtime_ns = metadata.as_ref().map(mtime_nanos).unwrap_or(0);
            let fingerprint = fingerprint_bytes(content);
            let _ = tree.upsert_file(&record.rel, size, mtime_ns, fingerprint.clone());
            snapshot.entries.insert(
                record.rel.clone(),
                SnapshotEntry {
                    size,
                    mtime_ns,
                    fingerprint,
                    algo: FINGERPRINT_ALGO.to_string(),
                },
            );
        }
        None => {
            tree.remove(&record.rel);
            snapshot.entries.remove(&record.rel);
        }
    }
}

/// Insert directory nodes for every missing ancestor of `rel`.
fn ensure_tree_dirs(root: &Path, tree: &mut Tree, rel: &str) {
    let mut missing = Vec::new();
    let mut ancestor = parent_path(rel);
    while !ancestor.is_empty() {
        match tree.get(ancestor) {
            Some(node) if node.kind == NodeKind::Directory => break,
            Some(_) => break, // planner prevents file ancestors
            None => missing.push(ancestor.to_string()),
        }
        ancestor = parent_path(ancestor);
    }
    for dir in missing.into_iter().rev() {
        let mtime_ns = fs::metadata(root.join(&dir))
            .map(|m| mtime_nanos(&m))
            .unwrap_or(0);
        let _ = tree.insert(TreeNode::directory(&dir, mtime_ns));
    }
}

/// Create missing parent directories, returning the ones that did not
/// exist before (shallowest first) so rollback can remove them.
fn ensure_parent_dirs(abs: &Path) -> Result<Vec<PathBuf>> {
    let Some(parent) = abs.parent() else {
        return Ok(Vec::new());
    };
    let mut missing = Vec::new();
    let mut cursor = parent;
    while !cursor.as_os_str().is_empty() && !cursor.exists() {
        missing.push(cursor.to_path_buf());
        match cursor.parent() {
            Some(next) => cursor = next,
            None => break,
        }
    }
    missing.reverse();
    if !missing.is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory {}", parent.display()))?;
    }
    Ok(missing)
}

/// Write via temp file + rename in the target's directory so readers never
/// observe a half-written file.
fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    tmp.write_all(content)
        .with_context(|| format!("Failed to write {} bytes to temp file", content.len()))?;
    tmp.as_file()
        .sync_data()
        .with_context(|| format!("Failed to sync temp data for {}", path.display()))?;
    tmp.persist(path).map_err(|e| {
        anyhow::Error::new(e.error)
            .context(format!("Failed to atomically replace {}", path.display()))
    })?;
    Ok(())
}
