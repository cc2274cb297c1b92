//! Union of per-node result trees.
//!
//! Trees are folded into an accumulator by key path: branches are unioned (a key seen in any
//! tree exists in the result), and leaves landing on the same path are collected and then
//! re-converged with the pipeline's converge stage. Folding order does not matter beyond the
//! order the converge stage sees values in.

use std::collections::BTreeMap;

use crate::error::{ComputeError, ComputeResult};
use crate::execution::{converge, CancelToken};
use crate::pipeline::{ConvergeFn, Pipeline};
use crate::tree::ResultTree;
use crate::types::Record;

/// Merge `trees` into one, re-converging co-located leaves with `converge_stage`.
pub fn merge(trees: Vec<ResultTree>, converge_stage: &ConvergeFn) -> ComputeResult<ResultTree> {
    let mut merger = TreeMerger::new(converge_stage);
    for tree in trees {
        merger.fold(tree)?;
    }
    Ok(merger.finish()?.tree)
}

/// Merged tree plus the work it took to produce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    pub tree: ResultTree,
    /// Trees folded in.
    pub trees: usize,
    /// Converge stage invocations across all leaves.
    pub converge_invocations: usize,
}

/// Incremental tree merger. Owns the merged tree exclusively until [`TreeMerger::finish`].
pub struct TreeMerger<'a> {
    converge_stage: &'a ConvergeFn,
    stage_index: usize,
    cancel: CancelToken,
    root: Accumulator,
    trees: usize,
}

#[derive(Default)]
struct Accumulator {
    children: BTreeMap<String, Accumulator>,
    values: Vec<Record>,
}

impl<'a> TreeMerger<'a> {
    pub fn new(converge_stage: &'a ConvergeFn) -> Self {
        Self {
            converge_stage,
            stage_index: 0,
            cancel: CancelToken::new(),
            root: Accumulator::default(),
            trees: 0,
        }
    }

    /// A merger using `pipeline`'s converge stage; errors report its stage index.
    pub fn for_pipeline(pipeline: &'a Pipeline) -> Self {
        let mut merger = Self::new(pipeline.converge_stage().as_ref());
        merger.stage_index = pipeline.converge_index();
        merger
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fold one tree into the accumulator.
    ///
    /// Fails with [`ComputeError::ShapeMismatch`] if a path is a leaf in one tree and a
    /// non-empty branch in another.
    pub fn fold(&mut self, tree: ResultTree) -> ComputeResult<()> {
        let mut path = Vec::new();
        fold_into(&mut self.root, tree, &mut path)?;
        self.trees += 1;
        Ok(())
    }

    /// Converge every collected leaf list and return the merged tree.
    pub fn finish(self) -> ComputeResult<Merged> {
        let mut invocations = 0usize;
        let tree = finish_node(
            self.root,
            self.converge_stage,
            self.stage_index,
            &self.cancel,
            &mut invocations,
        )?
        .unwrap_or_default();

        Ok(Merged {
            tree,
            trees: self.trees,
            converge_invocations: invocations,
        })
    }
}

fn fold_into(node: &mut Accumulator, tree: ResultTree, path: &mut Vec<String>) -> ComputeResult<()> {
    match tree {
        ResultTree::Leaf(value) => {
            if !node.children.is_empty() {
                return Err(shape_mismatch(path));
            }
            node.values.push(value);
        }
        ResultTree::Branch(children) => {
            if !children.is_empty() && !node.values.is_empty() {
                return Err(shape_mismatch(path));
            }
            for (key, child) in children {
                let slot = node.children.entry(key.clone()).or_default();
                path.push(key);
                fold_into(slot, child, path)?;
                path.pop();
            }
        }
    }
    Ok(())
}

fn finish_node(
    node: Accumulator,
    converge_stage: &ConvergeFn,
    stage_index: usize,
    cancel: &CancelToken,
    invocations: &mut usize,
) -> ComputeResult<Option<ResultTree>> {
    if !node.values.is_empty() {
        let converged = converge(converge_stage, stage_index, node.values, cancel)?;
        *invocations += converged.invocations;
        return Ok(converged.value.map(ResultTree::Leaf));
    }

    let mut children = BTreeMap::new();
    for (key, child) in node.children {
        if let Some(child) = finish_node(child, converge_stage, stage_index, cancel, invocations)? {
            children.insert(key, child);
        }
    }
    if children.is_empty() {
        Ok(None)
    } else {
        Ok(Some(ResultTree::Branch(children)))
    }
}

fn shape_mismatch(path: &[String]) -> ComputeError {
    ComputeError::ShapeMismatch {
        path: format!("/{}", path.join("/")),
    }
}
