use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Convenience result type used across the crate.
pub type ComputeResult<T> = Result<T, ComputeError>;

/// Error returned by a user-supplied stage function.
pub type StageError = Box<dyn std::error::Error + Send + Sync>;

/// Which kind of stage produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Classify,
    Combine,
    Converge,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Classify => "classify",
            Self::Combine => "combine",
            Self::Converge => "converge",
        };
        f.write_str(name)
    }
}

/// Error type shared by pipeline execution, storage, transport and coordination.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// Underlying I/O error (e.g. dataset file missing, read failure).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// No pipeline is registered under the requested name.
    #[error("unknown pipeline: '{name}'")]
    UnknownPipeline { name: String },

    /// The storage accessor does not know the requested dataset.
    #[error("unknown dataset: '{name}'")]
    UnknownDataset { name: String },

    /// The dataset exists but no node reports holding it.
    #[error("dataset '{dataset}' is not held by any node")]
    NoNodes { dataset: String },

    /// A stage function returned an error.
    #[error("stage {stage} ({kind}) failed: {source}")]
    Stage {
        stage: usize,
        kind: StageKind,
        #[source]
        source: StageError,
    },

    /// A converge stage did not shrink its input.
    #[error(
        "non-convergent reduction at stage {stage}: {input_len} records reduced to {output_len}"
    )]
    NonConvergent {
        stage: usize,
        input_len: usize,
        output_len: usize,
    },

    /// A record frame could not be decoded.
    #[error("corrupt frame at offset {offset}: {message}")]
    CorruptFrame { offset: u64, message: String },

    /// A remote node reported a failure.
    #[error("node '{node}' failed: {message}")]
    Node { node: String, message: String },

    /// Two result trees disagree on whether a position holds a leaf or a branch.
    #[error("result tree shape mismatch at '{path}'")]
    ShapeMismatch { path: String },

    /// The computation observed a cancellation signal.
    #[error("calculation cancelled")]
    Cancelled,

    /// The calculation did not finish within its configured deadline.
    #[error("deadline exceeded after {elapsed:?}")]
    DeadlineExceeded { elapsed: Duration },

    /// Encoding or decoding of a wire message failed.
    #[error("wire error: {0}")]
    Wire(#[from] serde_json::Error),

    /// An input line could not be turned into a record.
    #[error("invalid record at line {line}: {message}")]
    InvalidRecord { line: usize, message: String },

    /// CSV ingestion error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// The per-calculation worker pool could not be built.
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Segment tasks went away without reporting a result (e.g. a stage panicked).
    #[error("{missing} segment task(s) exited without reporting a result")]
    SegmentTaskLost { missing: usize },
}

impl ComputeError {
    pub(crate) fn stage(stage: usize, kind: StageKind, source: StageError) -> Self {
        Self::Stage {
            stage,
            kind,
            source,
        }
    }
}
