//! Local execution of a pipeline over one partition's records.
//!
//! [`ChainExecutor`] walks the stage list recursively:
//!
//! - a classify stage groups records by key and recurses once per key, creating a child node
//! - a combine stage replaces the current record set and continues on the same node
//! - the converge stage reduces the set to one record, which becomes the node's leaf value
//!
//! No I/O happens here; records arrive already materialized. The first stage error aborts the
//! whole run, and no partial tree is returned.
//!
//! This module also holds the coordinator's observer hooks and metrics.

mod cancel;
mod converge;
mod observer;

use std::collections::{BTreeMap, HashMap};

use crate::error::{ComputeError, ComputeResult, StageKind};
use crate::pipeline::{Pipeline, Stage};
use crate::tree::ResultTree;
use crate::types::Record;

pub use cancel::CancelToken;
pub use converge::{converge, Convergence};
pub use observer::{
    CalculationEvent, CalculationMetrics, CalculationMetricsSnapshot, CalculationObserver,
    LogObserver, StdErrObserver,
};

/// Run `pipeline` over `records` with a fresh [`ChainExecutor`].
pub fn execute(records: Vec<Record>, pipeline: &Pipeline) -> ComputeResult<ResultTree> {
    ChainExecutor::new().execute(records, pipeline)
}

/// Builds a [`ResultTree`] for one partition.
#[derive(Debug, Clone, Default)]
pub struct ChainExecutor {
    cancel: CancelToken,
}

impl ChainExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe `cancel` between stages and between records.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute the pipeline.
    ///
    /// Records keep their input order within each branch all the way to the combine and
    /// converge stages. If nothing survives classification the result is an empty tree.
    pub fn execute(&self, records: Vec<Record>, pipeline: &Pipeline) -> ComputeResult<ResultTree> {
        Ok(self.run(pipeline.stages(), 0, records)?.unwrap_or_default())
    }

    /// Build the node for `stages[index..]`. `None` means the node would be empty.
    fn run(
        &self,
        stages: &[Stage],
        index: usize,
        records: Vec<Record>,
    ) -> ComputeResult<Option<ResultTree>> {
        self.cancel.check()?;
        let Some(stage) = stages.get(index) else {
            return Ok(None);
        };

        match stage {
            Stage::Combine(combine) => {
                let out = combine(records)
                    .map_err(|e| ComputeError::stage(index, StageKind::Combine, e))?;
                self.run(stages, index + 1, out)
            }
            Stage::Converge(reduce) => {
                let converged = converge(reduce.as_ref(), index, records, &self.cancel)?;
                Ok(converged.value.map(ResultTree::Leaf))
            }
            Stage::Classify(classify) => {
                let mut groups: Vec<(String, Vec<Record>)> = Vec::new();
                let mut slots: HashMap<String, usize> = HashMap::new();

                for record in records {
                    self.cancel.check()?;
                    let key = classify(record.as_slice())
                        .map_err(|e| ComputeError::stage(index, StageKind::Classify, e))?;
                    let Some(key) = key else {
                        continue;
                    };
                    match slots.get(&key) {
                        Some(&slot) => groups[slot].1.push(record),
                        None => {
                            slots.insert(key.clone(), groups.len());
                            groups.push((key, vec![record]));
                        }
                    }
                }

                let mut children = BTreeMap::new();
                for (key, group) in groups {
                    if let Some(child) = self.run(stages, index + 1, group)? {
                        children.insert(key, child);
                    }
                }

                if children.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(ResultTree::Branch(children)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::{execute, CancelToken, ChainExecutor};
    use crate::error::{ComputeError, StageKind};
    use crate::pipeline::{Pipeline, Stage};
    use crate::tree::ResultTree;
    use crate::types::Record;

    fn rec(s: &str) -> Record {
        s.as_bytes().to_vec()
    }

    fn parity(record: &[u8]) -> String {
        let n: u32 = std::str::from_utf8(record).unwrap().parse().unwrap();
        let key = if n % 2 == 0 { "even" } else { "odd" };
        key.to_string()
    }

    fn keep_first(mut records: Vec<Record>) -> Result<Vec<Record>, crate::error::StageError> {
        records.truncate(1);
        Ok(records)
    }

    fn count(records: Vec<Record>) -> Result<Vec<Record>, crate::error::StageError> {
        Ok(vec![records.len().to_string().into_bytes()])
    }

    fn sum(records: Vec<Record>) -> Result<Vec<Record>, crate::error::StageError> {
        let total: u64 = records
            .iter()
            .map(|r| std::str::from_utf8(r).unwrap().parse::<u64>().unwrap())
            .sum();
        Ok(vec![total.to_string().into_bytes()])
    }

    #[test]
    fn single_record_becomes_leaf_under_its_key() {
        let pipeline = Pipeline::build(|_| Ok(Some("k".to_string()))).final_reduce(keep_first);
        let tree = execute(vec![rec("r1")], &pipeline).unwrap();

        assert_eq!(tree, ResultTree::branch([("k", ResultTree::leaf(rec("r1")))]));
    }

    #[test]
    fn dropping_every_record_yields_empty_tree() {
        let pipeline = Pipeline::build(|_| Ok(None)).final_reduce(keep_first);
        let tree = execute(vec![rec("1"), rec("2")], &pipeline).unwrap();

        assert!(tree.is_empty());
        assert_eq!(tree.leaf_count(), 0);
    }

    #[test]
    fn combine_runs_once_per_branch_with_full_record_set() {
        let calls = Arc::new(Mutex::new(Vec::<(usize, Vec<Record>)>::new()));
        let calls2 = Arc::clone(&calls);

        let pipeline = Pipeline::build(|r| Ok(Some(parity(r))))
            .reduce(move |records| {
                calls2.lock().unwrap().push((records.len(), records.clone()));
                count(records)
            })
            .final_reduce(sum);

        let records = ["1", "2", "3", "4", "5"].into_iter().map(rec).collect();
        let tree = execute(records, &pipeline).unwrap();

        let mut calls = calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                (2, vec![rec("2"), rec("4")]),
                (3, vec![rec("1"), rec("3"), rec("5")]),
            ]
        );
        assert_eq!(tree.get(&["odd"]).and_then(ResultTree::leaf_value), Some(&b"3"[..]));
        assert_eq!(tree.get(&["even"]).and_then(ResultTree::leaf_value), Some(&b"2"[..]));
    }

    #[test]
    fn converge_repeats_until_one_record_remains() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let invocations2 = Arc::clone(&invocations);

        let pipeline = Pipeline::build(|_| Ok(Some("all".to_string()))).final_reduce(move |records| {
            invocations2.fetch_add(1, Ordering::SeqCst);
            Ok(records[1..].to_vec())
        });

        let records = ["a", "b", "c", "d"].into_iter().map(rec).collect();
        let tree = execute(records, &pipeline).unwrap();

        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        assert_eq!(tree.get(&["all"]).and_then(ResultTree::leaf_value), Some(&b"d"[..]));
    }

    #[test]
    fn nested_classification_builds_nested_branches() {
        let pipeline = Pipeline::build(|r| Ok(Some(parity(r))))
            .map(|r| {
                let key = if r.len() > 1 { "big" } else { "small" };
                Ok(Some(key.to_string()))
            })
            .final_reduce(sum);

        let records = ["1", "2", "10", "11", "13"].into_iter().map(rec).collect();
        let tree = execute(records, &pipeline).unwrap();

        assert_eq!(tree.get(&["odd", "small"]).and_then(ResultTree::leaf_value), Some(&b"1"[..]));
        assert_eq!(tree.get(&["odd", "big"]).and_then(ResultTree::leaf_value), Some(&b"24"[..]));
        assert_eq!(tree.get(&["even", "small"]).and_then(ResultTree::leaf_value), Some(&b"2"[..]));
        assert_eq!(tree.get(&["even", "big"]).and_then(ResultTree::leaf_value), Some(&b"10"[..]));
        assert_eq!(tree.leaf_count(), 4);
    }

    #[test]
    fn records_keep_input_order_within_a_branch() {
        let pipeline = Pipeline::build(|r| Ok(Some(parity(r)))).final_reduce(|records| {
            let joined = records
                .iter()
                .map(|r| String::from_utf8_lossy(r).into_owned())
                .collect::<Vec<_>>()
                .join(",");
            Ok(vec![joined.into_bytes()])
        });

        let records = ["5", "2", "3", "8", "1"].into_iter().map(rec).collect();
        let tree = execute(records, &pipeline).unwrap();

        assert_eq!(tree.get(&["odd"]).and_then(ResultTree::leaf_value), Some(&b"5,3,1"[..]));
        assert_eq!(tree.get(&["even"]).and_then(ResultTree::leaf_value), Some(&b"2,8"[..]));
    }

    #[test]
    fn branch_emptied_by_combine_is_pruned() {
        let pipeline = Pipeline::build(|r| Ok(Some(parity(r))))
            .reduce(|records| {
                let odd = records.first().map(|r| parity(r) == "odd").unwrap_or(false);
                Ok(if odd { Vec::new() } else { records })
            })
            .final_reduce(sum);

        let records = ["1", "2", "3", "4"].into_iter().map(rec).collect();
        let tree = execute(records, &pipeline).unwrap();

        assert_eq!(tree.children_keys().collect::<Vec<_>>(), vec!["even"]);
        assert_eq!(tree.get(&["even"]).and_then(ResultTree::leaf_value), Some(&b"6"[..]));
    }

    #[test]
    fn pipeline_starting_with_combine_yields_root_leaf() {
        let pipeline = Pipeline::from_stages(vec![Stage::combine(count), Stage::converge(sum)]);
        let tree = execute(vec![rec("x"), rec("y")], &pipeline).unwrap();
        assert_eq!(tree, ResultTree::leaf(rec("2")));
    }

    #[test]
    fn first_stage_error_aborts_execution() {
        let later_calls = Arc::new(AtomicUsize::new(0));
        let later_calls2 = Arc::clone(&later_calls);

        let pipeline = Pipeline::build(|r| {
            if r == b"bad" {
                Err("unparseable record".into())
            } else {
                Ok(Some("k".to_string()))
            }
        })
        .final_reduce(move |records| {
            later_calls2.fetch_add(1, Ordering::SeqCst);
            keep_first(records)
        });

        let err = execute(vec![rec("ok"), rec("bad"), rec("ok")], &pipeline).unwrap_err();
        match err {
            ComputeError::Stage { stage, kind, source } => {
                assert_eq!(stage, 0);
                assert_eq!(kind, StageKind::Classify);
                assert_eq!(source.to_string(), "unparseable record");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancelled_executor_returns_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let pipeline = Pipeline::build(|_| Ok(Some("k".to_string()))).final_reduce(keep_first);

        let err = ChainExecutor::new()
            .with_cancel(cancel)
            .execute(vec![rec("1")], &pipeline)
            .unwrap_err();
        assert!(matches!(err, ComputeError::Cancelled));
    }
}
