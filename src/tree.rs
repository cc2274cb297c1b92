//! Keyed, recursive output of a pipeline run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Record;

/// Result of running a pipeline over a set of records.
///
/// A node is either a branch (children keyed by the classification that produced them) or a
/// leaf holding the single record a converge stage reduced its branch to. The shape is data
/// driven: different partitions of one dataset may produce different key sets.
///
/// The only branch that may be empty is the root, which means nothing was classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultTree {
    Branch(BTreeMap<String, ResultTree>),
    Leaf(Record),
}

impl Default for ResultTree {
    fn default() -> Self {
        Self::empty()
    }
}

impl ResultTree {
    /// A root with no children.
    pub fn empty() -> Self {
        Self::Branch(BTreeMap::new())
    }

    pub fn leaf(value: impl Into<Record>) -> Self {
        Self::Leaf(value.into())
    }

    /// Build a branch from `(key, child)` pairs.
    pub fn branch<K, I>(children: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, ResultTree)>,
    {
        Self::Branch(children.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// `true` for a branch without children.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Branch(children) if children.is_empty())
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    /// The leaf value, or `None` for a branch.
    pub fn leaf_value(&self) -> Option<&[u8]> {
        match self {
            Self::Leaf(value) => Some(value.as_slice()),
            Self::Branch(_) => None,
        }
    }

    /// The child under `key`, or `None` for a missing key or a leaf.
    pub fn child(&self, key: &str) -> Option<&ResultTree> {
        match self {
            Self::Branch(children) => children.get(key),
            Self::Leaf(_) => None,
        }
    }

    /// Child keys in sorted order (empty for a leaf).
    pub fn children_keys(&self) -> impl Iterator<Item = &str> {
        self.children().map(|(k, _)| k)
    }

    /// `(key, child)` pairs in sorted key order (empty for a leaf).
    pub fn children(&self) -> impl Iterator<Item = (&str, &ResultTree)> {
        let children = match self {
            Self::Branch(children) => Some(children),
            Self::Leaf(_) => None,
        };
        children
            .into_iter()
            .flat_map(|c| c.iter().map(|(k, v)| (k.as_str(), v)))
    }

    /// Follow `path` from this node.
    pub fn get(&self, path: &[&str]) -> Option<&ResultTree> {
        path.iter().try_fold(self, |node, key| node.child(key))
    }

    /// All leaves with their key paths, depth-first in key order.
    pub fn leaves(&self) -> Vec<(Vec<String>, &[u8])> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        collect_leaves(self, &mut path, &mut out);
        out
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::Branch(children) => children.values().map(ResultTree::leaf_count).sum(),
        }
    }
}

fn collect_leaves<'a>(
    node: &'a ResultTree,
    path: &mut Vec<String>,
    out: &mut Vec<(Vec<String>, &'a [u8])>,
) {
    match node {
        ResultTree::Leaf(value) => out.push((path.clone(), value.as_slice())),
        ResultTree::Branch(children) => {
            for (key, child) in children {
                path.push(key.clone());
                collect_leaves(child, path, out);
                path.pop();
            }
        }
    }
}
