//! Proposed edits and their validation against the current tree state.
//! Planning never touches the filesystem: it checks each op against the
//! tree plus an overlay carrying the effect of already-validated ops in
//! the same set, so a Create followed by a second Create of the same path
//! is a conflict within one batch.

use crate::fingerprint::fingerprint_bytes;
use crate::tree::{NodeKind, Tree};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOp {
    Create {
        path: String,
        content: Vec<u8>,
    },
    Update {
        path: String,
        /// Fingerprint of the file as the proposer last saw it.
        expected_base: String,
        new_content: Vec<u8>,
    },
    Delete {
        path: String,
        expected_base: String,
    },
}

impl ChangeOp {
    pub fn path(&self) -> &str {
        match self {
            ChangeOp::Create { path, .. }
            | ChangeOp::Update { path, .. }
            | ChangeOp::Delete { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    #[default]
    StopOnFirstConflict,
    ContinueAndReport,
}

/// Ordered batch of proposed ops. Created per request, consumed once by
/// planning, never persisted.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub ops: Vec<ChangeOp>,
    pub policy: ConflictPolicy,
}

impl ChangeSet {
    pub fn new(ops: Vec<ChangeOp>) -> Self {
        Self {
            ops,
            policy: ConflictPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpStatus {
    Validated,
    Conflicted(String),
    /// Not examined: a prior conflict halted validation (stop-on-first).
    Unresolved,
}

#[derive(Debug)]
pub struct ConflictReport {
    pub statuses: Vec<(ChangeOp, OpStatus)>,
}

impl ConflictReport {
    pub fn conflicts(&self) -> impl Iterator<Item = (&ChangeOp, &str)> {
        self.statuses.iter().filter_map(|(op, status)| match status {
            OpStatus::Conflicted(reason) => Some((op, reason.as_str())),
            _ => None,
        })
    }

    pub fn conflict_count(&self) -> usize {
        self.conflicts().count()
    }
}

/// A change set that passed validation. Consumed once by the applier.
#[derive(Debug)]
pub struct ValidatedChangeSet {
    ops: Vec<ChangeOp>,
}

impl ValidatedChangeSet {
    pub fn ops(&self) -> &[ChangeOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn into_ops(self) -> Vec<ChangeOp> {
        self.ops
    }
}

#[derive(Debug)]
pub enum PlanOutcome {
    Ready(ValidatedChangeSet),
    Conflicts(ConflictReport),
}

/// Simulated state of one path while validating a set.
#[derive(Debug, Clone)]
enum SimState {
    Absent,
    File(String),
    Directory,
}

/// Validate a change set against the tree. Returns either a set ready to
/// apply or a per-op conflict report, per the set's conflict policy.
pub fn plan(tree: &Tree, change_set: ChangeSet) -> PlanOutcome {
    let ChangeSet { ops, policy } = change_set;
    let mut overlay: HashMap<String, SimState> = HashMap::new();
    let mut statuses: Vec<(ChangeOp, OpStatus)> = Vec::with_capacity(ops.len());
    let mut halted = false;

    for op in ops {
        if halted {
            statuses.push((op, OpStatus::Unresolved));
            continue;
        }

        let status = match validate_op(tree, &overlay, &op) {
            Ok(()) => {
                record_effect(&mut overlay, &op);
                OpStatus::Validated
            }
            Err(reason) => OpStatus::Conflicted(reason),
        };

        if matches!(status, OpStatus::Conflicted(_))
            && policy == ConflictPolicy::StopOnFirstConflict
        {
            halted = true;
        }
        statuses.push((op, status));
    }

    if statuses
        .iter()
        .all(|(_, status)| *status == OpStatus::Validated)
    {
        PlanOutcome::Ready(ValidatedChangeSet {
            ops: statuses.into_iter().map(|(op, _)| op).collect(),
        })
    } else {
        PlanOutcome::Conflicts(ConflictReport { statuses })
    }
}

fn validate_op(
    tree: &Tree,
    overlay: &HashMap<String, SimState>,
    op: &ChangeOp,
) -> Result<(), String> {
    let path = op.path();
    sane_rel_path(path)?;

    let state = effective_state(tree, overlay, path);
    match op {
        ChangeOp::Create { .. } => match state {
            SimState::Absent => {
                // An ancestor that exists as a file cannot gain children.
                let mut ancestor = crate::tree::parent_path(path);
                while !ancestor.is_empty() {
                    if let SimState::File(_) = effective_state(tree, overlay, ancestor) {
                        return Err(format!("parent {ancestor} exists as a file"));
                    }
                    ancestor = crate::tree::parent_path(ancestor);
                }
                Ok(())
            }
            SimState::File(_) => Err("path already exists".to_string()),
            SimState::Directory => Err("path exists as a directory".to_string()),
        },
        ChangeOp::Update { expected_base, .. } | ChangeOp::Delete { expected_base, .. } => {
            match state {
                SimState::Absent => Err("path not found in tree".to_string()),
                SimState::Directory => Err("path is a directory".to_string()),
                SimState::File(current) => {
                    if current == *expected_base {
                        Ok(())
                    } else {
                        Err(format!(
                            "stale base: expected {expected_base}, current {current}"
                        ))
                    }
                }
            }
        }
    }
}

fn record_effect(overlay: &mut HashMap<String, SimState>, op: &ChangeOp) {
    match op {
        ChangeOp::Create { path, content } | ChangeOp::Update { path, new_content: content, .. } => {
            overlay.insert(path.clone(), SimState::File(fingerprint_bytes(content)));
        }
        ChangeOp::Delete { path, .. } => {
            overlay.insert(path.clone(), SimState::Absent);
        }
    }
}

fn effective_state(tree: &Tree, overlay: &HashMap<String, SimState>, path: &str) -> SimState {
    if let Some(state) = overlay.get(path) {
        return state.clone();
    }
    match tree.get(path) {
        Some(node) if node.kind == NodeKind::Directory => SimState::Directory,
        Some(node) => SimState::File(node.fingerprint.clone().unwrap_or_default()),
        None => SimState::Absent,
    }
}

/// Ops address project-relative paths only; anything escaping the root is
/// rejected at planning time.
fn sane_rel_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("empty path".to_string());
    }
    if path.starts_with('/') || path.contains('\\') || path.contains(':') {
        return Err("path must be project-relative".to_string());
    }
    if path.split('/').any(|seg| seg == ".." || seg == "." || seg.is_empty()) {
        return Err("path escapes project root".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeNode;

    fn tree_with_file(rel: &str, content: &[u8]) -> Tree {
        let mut tree = Tree::new("/p");
        tree.insert(TreeNode::file(
            rel,
            content.len() as u64,
            1,
            fingerprint_bytes(content),
        ))
        .unwrap();
        tree
    }

    fn create(path: &str, content: &[u8]) -> ChangeOp {
        ChangeOp::Create {
            path: path.to_string(),
            content: content.to_vec(),
        }
    }

    #[test]
    fn create_of_new_path_validates() {
        let tree = Tree::new("/p");
        match plan(&tree, ChangeSet::new(vec![create("d.txt", b"new")])) {
            PlanOutcome::Ready(set) => assert_eq!(set.len(), 1),
            PlanOutcome::Conflicts(_) => panic!("expected Ready"),
        }
    }

    #[test]
    fn create_of_existing_path_conflicts() {
        let tree = tree_with_file("a.txt", b"alpha");
        match plan(&tree, ChangeSet::new(vec![create("a.txt", b"x")])) {
            PlanOutcome::Conflicts(report) => {
                assert_eq!(report.conflict_count(), 1);
            }
            PlanOutcome::Ready(_) => panic!("expected conflict"),
        }
    }

    #[test]
    fn second_create_of_same_path_in_one_set_conflicts() {
        let tree = Tree::new("/p");
        let set = ChangeSet::new(vec![create("d.txt", b"one"), create("d.txt", b"two")]);
        match plan(&tree, set) {
            PlanOutcome::Conflicts(report) => {
                assert_eq!(report.statuses[0].1, OpStatus::Validated);
                assert!(matches!(report.statuses[1].1, OpStatus::Conflicted(_)));
            }
            PlanOutcome::Ready(_) => panic!("expected conflict"),
        }
    }

    #[test]
    fn stale_base_update_conflicts() {
        let tree = tree_with_file("a.txt", b"current content");
        let op = ChangeOp::Update {
            path: "a.txt".to_string(),
            expected_base: fingerprint_bytes(b"outdated view"),
            new_content: b"new".to_vec(),
        };
        match plan(&tree, ChangeSet::new(vec![op])) {
            PlanOutcome::Conflicts(report) => {
                let (_, reason) = report.conflicts().next().unwrap();
                assert!(reason.contains("stale base"));
            }
            PlanOutcome::Ready(_) => panic!("expected conflict"),
        }
    }

    #[test]
    fn matching_base_update_validates() {
        let tree = tree_with_file("a.txt", b"alpha");
        let op = ChangeOp::Update {
            path: "a.txt".to_string(),
            expected_base: fingerprint_bytes(b"alpha"),
            new_content: b"beta".to_vec(),
        };
        assert!(matches!(
            plan(&tree, ChangeSet::new(vec![op])),
            PlanOutcome::Ready(_)
        ));
    }

    #[test]
    fn stop_on_first_conflict_leaves_rest_unresolved() {
        let tree = tree_with_file("a.txt", b"alpha");
        let set = ChangeSet::new(vec![
            create("ok.txt", b"fine"),
            create("a.txt", b"collides"),
            create("later.txt", b"never examined"),
        ]);
        match plan(&tree, set) {
            PlanOutcome::Conflicts(report) => {
                assert_eq!(report.statuses[0].1, OpStatus::Validated);
                assert!(matches!(report.statuses[1].1, OpStatus::Conflicted(_)));
                assert_eq!(report.statuses[2].1, OpStatus::Unresolved);
            }
            PlanOutcome::Ready(_) => panic!("expected conflict"),
        }
    }

    #[test]
    fn continue_and_report_validates_independent_ops() {
        let tree = tree_with_file("a.txt", b"alpha");
        let set = ChangeSet::new(vec![
            create("a.txt", b"collides"),
            create("later.txt", b"still validated"),
        ])
        .with_policy(ConflictPolicy::ContinueAndReport);
        match plan(&tree, set) {
            PlanOutcome::Conflicts(report) => {
                assert!(matches!(report.statuses[0].1, OpStatus::Conflicted(_)));
                assert_eq!(report.statuses[1].1, OpStatus::Validated);
            }
            PlanOutcome::Ready(_) => panic!("expected conflict"),
        }
    }

    #[test]
    fn update_after_create_in_same_set_validates() {
        let tree = Tree::new("/p");
        let set = ChangeSet::new(vec![
            create("d.txt", b"first"),
            ChangeOp::Update {
                path: "d.txt".to_string(),
                expected_base: fingerprint_bytes(b"first"),
                new_content: b"second".to_vec(),
            },
        ]);
        assert!(matches!(plan(&tree, set), PlanOutcome::Ready(_)));
    }

    #[test]
    fn delete_then_recreate_in_same_set_validates() {
        let tree = tree_with_file("a.txt", b"alpha");
        let set = ChangeSet::new(vec![
            ChangeOp::Delete {
                path: "a.txt".to_string(),
                expected_base: fingerprint_bytes(b"alpha"),
            },
            create("a.txt", b"reborn"),
        ]);
        assert!(matches!(plan(&tree, set), PlanOutcome::Ready(_)));
    }

    #[test]
    fn escaping_paths_conflict() {
        let tree = Tree::new("/p");
        for bad in ["../outside.txt", "/abs.txt", "a/../b.txt", ""] {
            let set = ChangeSet::new(vec![create(bad, b"x")]);
            assert!(
                matches!(plan(&tree, set), PlanOutcome::Conflicts(_)),
                "path {bad:?} must be rejected"
            );
        }
    }
}
