//! Fluent construction of [`Pipeline`]s.

use std::fmt;
use std::sync::Arc;

use crate::error::StageError;
use crate::types::Record;

use super::stage::{ConvergeFn, Stage};

/// An ordered, immutable sequence of stages ending in a converge stage.
///
/// Build one with [`Pipeline::build`]:
///
/// ```rust
/// use partition_reduce::pipeline::Pipeline;
///
/// let pipeline = Pipeline::build(|record: &[u8]| {
///     let key = if record.len() % 2 == 0 { "even" } else { "odd" };
///     Ok(Some(key.to_string()))
/// })
/// .reduce(|records| Ok(vec![(records.len() as u64).to_le_bytes().to_vec()]))
/// .final_reduce(|records| {
///     let total: u64 = records
///         .iter()
///         .map(|r| u64::from_le_bytes(r[..8].try_into().unwrap()))
///         .sum();
///     Ok(vec![total.to_le_bytes().to_vec()])
/// });
///
/// assert_eq!(pipeline.len(), 3);
/// ```
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Start a pipeline with a classify stage.
    pub fn build<F>(classify: F) -> PipelineBuilder
    where
        F: Fn(&[u8]) -> Result<Option<String>, StageError> + Send + Sync + 'static,
    {
        PipelineBuilder {
            stages: vec![Stage::classify(classify)],
        }
    }

    /// Assemble a pipeline from pre-built stages.
    ///
    /// # Panics
    ///
    /// Panics if `stages` is empty, does not end in a converge stage, or has a converge stage
    /// anywhere but last. These are programming errors in the caller, not data conditions.
    pub fn from_stages(stages: Vec<Stage>) -> Self {
        assert!(!stages.is_empty(), "pipeline must have at least one stage");
        let last = stages.len() - 1;
        for (idx, stage) in stages.iter().enumerate() {
            let is_converge = matches!(stage, Stage::Converge(_));
            assert!(
                is_converge == (idx == last),
                "converge stage must be the last and only terminal stage (stage {idx} is {})",
                stage.kind()
            );
        }
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The terminal converge stage, also used when merging per-node trees.
    pub fn converge_stage(&self) -> &Arc<ConvergeFn> {
        match self.stages.last() {
            Some(Stage::Converge(f)) => f,
            _ => unreachable!("pipeline invariant: last stage is converge"),
        }
    }

    /// Index of the converge stage.
    pub fn converge_index(&self) -> usize {
        self.stages.len() - 1
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages)
            .finish()
    }
}

/// An unfinished pipeline. Finish it with [`PipelineBuilder::final_reduce`].
#[must_use = "a pipeline is only executable after `final_reduce`"]
pub struct PipelineBuilder {
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    /// Append a classify stage.
    pub fn map<F>(mut self, classify: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Option<String>, StageError> + Send + Sync + 'static,
    {
        self.stages.push(Stage::classify(classify));
        self
    }

    /// Append a combine stage.
    pub fn reduce<F>(mut self, combine: F) -> Self
    where
        F: Fn(Vec<Record>) -> Result<Vec<Record>, StageError> + Send + Sync + 'static,
    {
        self.stages.push(Stage::combine(combine));
        self
    }

    /// Append the terminal converge stage and finish the pipeline.
    pub fn final_reduce<F>(mut self, converge: F) -> Pipeline
    where
        F: Fn(Vec<Record>) -> Result<Vec<Record>, StageError> + Send + Sync + 'static,
    {
        self.stages.push(Stage::converge(converge));
        Pipeline {
            stages: self.stages,
        }
    }
}
