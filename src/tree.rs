//! In-memory structural model of a project directory.
//! Nodes are owned by the tree and keyed by relative path, so the hierarchy
//! can always be rebuilt by path lookup alone.

use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// One filesystem entry. `fingerprint` is present for files only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub rel_path: String,
    pub kind: NodeKind,
    pub size: u64,
    pub mtime_ns: u64,
    pub fingerprint: Option<String>,
}

impl TreeNode {
    pub fn file(rel_path: impl Into<String>, size: u64, mtime_ns: u64, fingerprint: String) -> Self {
        Self {
            rel_path: rel_path.into(),
            kind: NodeKind::File,
            size,
            mtime_ns,
            fingerprint: Some(fingerprint),
        }
    }

    pub fn directory(rel_path: impl Into<String>, mtime_ns: u64) -> Self {
        Self {
            rel_path: rel_path.into(),
            kind: NodeKind::Directory,
            size: 0,
            mtime_ns,
            fingerprint: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }
}

/// Parent of a relative path; `""` is the implicit root.
pub fn parent_path(rel: &str) -> &str {
    match rel.rsplit_once('/') {
        Some((parent, _)) => parent,
        None => "",
    }
}

/// Ordered-by-path map of relative path to node, rooted at one directory.
/// Invariants: paths are unique; every non-root path's parent directory is
/// present before its children.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    root: PathBuf,
    nodes: BTreeMap<String, TreeNode>,
}

impl Tree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, rel: &str) -> Option<&TreeNode> {
        self.nodes.get(rel)
    }

    pub fn contains(&self, rel: &str) -> bool {
        self.nodes.contains_key(rel)
    }

    /// Insert a node, enforcing the structural invariants.
    pub fn insert(&mut self, node: TreeNode) -> Result<()> {
        if node.rel_path.is_empty() {
            bail!("Cannot insert the implicit root as a node");
        }
        if self.nodes.contains_key(&node.rel_path) {
            bail!("Duplicate tree path: {}", node.rel_path);
        }
        let parent = parent_path(&node.rel_path);
        if !parent.is_empty() {
            match self.nodes.get(parent) {
                Some(p) if p.kind == NodeKind::Directory => {}
                Some(_) => bail!("Parent of {} is not a directory", node.rel_path),
                None => bail!("Missing parent directory for {}", node.rel_path),
            }
        }
        self.nodes.insert(node.rel_path.clone(), node);
        Ok(())
    }

    /// Replace an existing file node's content attributes, or insert it if
    /// absent (parent invariant still enforced).
    pub fn upsert_file(
        &mut self,
        rel: &str,
        size: u64,
        mtime_ns: u64,
        fingerprint: String,
    ) -> Result<()> {
        if let Some(existing) = self.nodes.get_mut(rel) {
            if existing.kind != NodeKind::File {
                bail!("{} exists as a directory", rel);
            }
            existing.size = size;
            existing.mtime_ns = mtime_ns;
            existing.fingerprint = Some(fingerprint);
            return Ok(());
        }
        self.insert(TreeNode::file(rel, size, mtime_ns, fingerprint))
    }

    pub fn remove(&mut self, rel: &str) -> Option<TreeNode> {
        self.nodes.remove(rel)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values()
    }

    pub fn files(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values().filter(|n| n.is_file())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Absolute path of a relative entry under this tree's root.
    pub fn abs_path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }
}
