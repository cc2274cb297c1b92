use crate::error::{ComputeError, ComputeResult, StageKind};
use crate::pipeline::ConvergeFn;
use crate::types::Record;

use super::CancelToken;

/// Outcome of driving a converge stage to a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Convergence {
    /// The surviving record, or `None` if the input was empty.
    pub value: Option<Record>,
    /// Number of times the stage was invoked.
    pub invocations: usize,
}

/// Re-apply `stage` to its own output until one record remains.
///
/// Inputs of length 0 or 1 are returned without invoking the stage. Every invocation must shrink
/// the working set; an output that is empty or not smaller than its input fails with
/// [`ComputeError::NonConvergent`], so the loop runs at most `records.len() - 1` times.
pub fn converge(
    stage: &ConvergeFn,
    stage_index: usize,
    records: Vec<Record>,
    cancel: &CancelToken,
) -> ComputeResult<Convergence> {
    let mut records = records;
    let mut invocations = 0usize;

    while records.len() > 1 {
        cancel.check()?;
        let input_len = records.len();
        let out = stage(records)
            .map_err(|e| ComputeError::stage(stage_index, StageKind::Converge, e))?;
        invocations += 1;

        if out.is_empty() || out.len() >= input_len {
            return Err(ComputeError::NonConvergent {
                stage: stage_index,
                input_len,
                output_len: out.len(),
            });
        }
        records = out;
    }

    Ok(Convergence {
        value: records.pop(),
        invocations,
    })
}
