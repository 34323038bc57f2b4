//! repostate — a local codebase state engine.
//!
//! Four coupled pieces behind one session context: an incremental
//! filesystem indexer producing an in-memory [`tree::Tree`], a persisted
//! [`snapshot::Snapshot`] cache making rescans sub-linear in unchanged
//! files, a change planner/applier with conflict detection, dry-run, and
//! rollback, and a safety gate classifying shell commands before anything
//! executes them. The chat/CLI layer sits outside this crate and talks to
//! [`session::Session`].

pub mod apply;
pub mod audit;
pub mod cache;
pub mod changeset;
pub mod config;
pub mod errors;
pub mod fingerprint;
pub mod policy;
pub mod scan;
pub mod session;
pub mod snapshot;
pub mod tree;

pub use apply::{ApplyResult, FailurePolicy, OpAction, OpExecStatus, OpOutcome};
pub use audit::{LogEntry, LogKind};
pub use changeset::{
    ChangeOp, ChangeSet, ConflictPolicy, ConflictReport, OpStatus, PlanOutcome, ValidatedChangeSet,
};
pub use config::EngineConfig;
pub use errors::{ApplyError, CacheError, ScanError};
pub use policy::{classify, CommandRequest, PolicyAction, PolicyDecision};
pub use scan::{CancelToken, ScanOutcome, ScanStats, SkippedPath};
pub use session::Session;
pub use snapshot::{Snapshot, SnapshotEntry, SNAPSHOT_VERSION};
pub use tree::{NodeKind, Tree, TreeNode};
