//! Session context: the single owner of tree, snapshot, cache store, and
//! audit log for one project root. All engine state flows through a
//! Session — there are no process-wide singletons.

use crate::apply::{self, ApplyResult};
use crate::audit::{AuditLog, LogEntry, LogKind};
use crate::cache::SnapshotStore;
use crate::changeset::{plan, ChangeSet, PlanOutcome, ValidatedChangeSet};
use crate::config::EngineConfig;
use crate::policy::{self, CommandRequest, PolicyAction, PolicyDecision};
use crate::scan::{scan, CancelToken, ScanStats, SkippedPath};
use crate::snapshot::{normalize_patterns, Snapshot};
use crate::tree::Tree;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub struct Session {
    root: PathBuf,
    config: EngineConfig,
    patterns: Vec<String>,
    store: SnapshotStore,
    audit: AuditLog,
    tree: Tree,
    snapshot: Snapshot,
    cancel: CancelToken,
    last_stats: ScanStats,
    last_skipped: Vec<SkippedPath>,
}

impl Session {
    /// Open a session: load the prior snapshot (if any and valid for this
    /// root/pattern/version triple), run the incremental scan, and persist
    /// the refreshed snapshot.
    pub fn open(root: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let root = fs::canonicalize(root.as_ref()).with_context(|| {
            format!("Failed to resolve project root {}", root.as_ref().display())
        })?;
        anyhow::ensure!(root.is_dir(), "Project root must be a directory: {}", root.display());

        let patterns = normalize_patterns(&config.ignore);
        let cache_dir = config
            .cache_dir
            .clone()
            .unwrap_or_else(SnapshotStore::default_dir);
        let log_dir = config.log_dir.clone().unwrap_or_else(AuditLog::default_dir);

        let mut store = SnapshotStore::new(cache_dir);
        let audit = AuditLog::open(&log_dir, &root)?;
        let previous = store.load(&root, &patterns);
        let cancel = CancelToken::new();

        let outcome = scan(&root, &patterns, previous.as_ref(), &cancel)?;
        store
            .save(&root, &outcome.snapshot)
            .with_context(|| format!("Failed to persist snapshot for {}", root.display()))?;

        Ok(Self {
            root,
            config,
            patterns,
            store,
            audit,
            tree: outcome.tree,
            snapshot: outcome.snapshot,
            cancel,
            last_stats: outcome.stats,
            last_skipped: outcome.skipped,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn last_scan_stats(&self) -> ScanStats {
        self.last_stats
    }

    pub fn last_scan_skipped(&self) -> &[SkippedPath] {
        &self.last_skipped
    }

    /// Token for interrupting a running scan or apply from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Re-index the project incrementally against the current snapshot.
    /// On cancellation the session keeps its previous tree and snapshot.
    pub fn rescan(&mut self) -> Result<&Tree> {
        self.cancel.reset();
        let outcome = scan(&self.root, &self.patterns, Some(&self.snapshot), &self.cancel)?;
        self.store
            .save(&self.root, &outcome.snapshot)
            .with_context(|| format!("Failed to persist snapshot for {}", self.root.display()))?;
        self.tree = outcome.tree;
        self.snapshot = outcome.snapshot;
        self.last_stats = outcome.stats;
        self.last_skipped = outcome.skipped;
        Ok(&self.tree)
    }

    /// Validate a change set against the current tree. No filesystem access.
    pub fn propose_changes(&self, change_set: ChangeSet) -> PlanOutcome {
        plan(&self.tree, change_set)
    }

    /// Apply a validated set. Dry-run reports the effective diff without
    /// mutating anything; a real apply updates tree and snapshot for the
    /// affected paths and persists the snapshot.
    pub fn apply_changes(&mut self, set: ValidatedChangeSet, dry_run: bool) -> Result<ApplyResult> {
        self.cancel.reset();
        let result = apply::apply(
            &self.root,
            &mut self.tree,
            &mut self.snapshot,
            &mut self.audit,
            set,
            dry_run,
            self.config.failure_policy,
            &self.cancel,
        )?;

        if !dry_run && result.applied_count() > 0 {
            self.store
                .save(&self.root, &self.snapshot)
                .with_context(|| format!("Failed to persist snapshot for {}", self.root.display()))?;
        }
        Ok(result)
    }

    /// Classify a command without executing it, and record the decision.
    pub fn check_command(&mut self, command: &str, cwd: impl Into<PathBuf>) -> Result<PolicyDecision> {
        let request = CommandRequest::new(command, cwd);
        let decision = policy::classify(&request, self.config.safe_mode);

        let rule = decision.matched_rule.as_deref().unwrap_or("no rule matched");
        let verdict = match decision.action {
            PolicyAction::Allow => "allow",
            PolicyAction::Block => "block",
            PolicyAction::Confirm => "confirm",
        };
        self.audit.append(&LogEntry::now(
            LogKind::Command,
            &policy::canonicalize(command),
            &format!("{verdict} ({rule})"),
        ))?;
        Ok(decision)
    }

    /// Chronological audit trail for display.
    pub fn read_log(&self) -> Result<Vec<LogEntry>> {
        self.audit.read_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(scratch: &Path) -> EngineConfig {
        EngineConfig {
            cache_dir: Some(scratch.join("cache")),
            log_dir: Some(scratch.join("logs")),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn open_scans_and_persists_snapshot() {
        let project = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        fs::write(project.path().join("a.txt"), "alpha").unwrap();

        let session = Session::open(project.path(), test_config(scratch.path())).unwrap();
        assert_eq!(session.tree().files().count(), 1);
        assert_eq!(session.last_scan_stats().content_reads, 1);
        assert!(scratch.path().join("cache").exists());
    }

    #[test]
    fn second_session_reuses_fingerprints() {
        let project = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        fs::write(project.path().join("a.txt"), "alpha").unwrap();

        let first = Session::open(project.path(), test_config(scratch.path())).unwrap();
        let first_snapshot = first.snapshot().clone();
        drop(first);

        let second = Session::open(project.path(), test_config(scratch.path())).unwrap();
        assert_eq!(second.last_scan_stats().content_reads, 0);
        assert_eq!(second.last_scan_stats().reused, 1);
        assert_eq!(*second.snapshot(), first_snapshot);
    }

    #[test]
    fn check_command_records_decision() {
        let project = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let mut session = Session::open(project.path(), test_config(scratch.path())).unwrap();

        let decision = session.check_command("ls -la", project.path()).unwrap();
        assert_eq!(decision.action, PolicyAction::Allow);

        let log = session.read_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, LogKind::Command);
        assert_eq!(log[0].target, "ls -la");
        assert!(log[0].outcome.contains("allow"));
    }
}
