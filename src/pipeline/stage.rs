//! Pipeline stage variants.

use std::fmt;
use std::sync::Arc;

use crate::error::{StageError, StageKind};
use crate::types::Record;

/// Assigns a record to a named branch; `Ok(None)` drops the record.
pub type ClassifyFn = dyn Fn(&[u8]) -> Result<Option<String>, StageError> + Send + Sync;

/// Replaces a branch's whole record set with a (typically smaller) set.
pub type CombineFn = dyn Fn(Vec<Record>) -> Result<Vec<Record>, StageError> + Send + Sync;

/// Terminal reduction, re-applied to its own output until a single record remains.
///
/// Each call must return fewer records than it received.
pub type ConvergeFn = dyn Fn(Vec<Record>) -> Result<Vec<Record>, StageError> + Send + Sync;

/// One step of a [`super::Pipeline`].
#[derive(Clone)]
pub enum Stage {
    /// Partition records into named branches.
    Classify(Arc<ClassifyFn>),
    /// Reduce a branch's records once per node, without branching.
    Combine(Arc<CombineFn>),
    /// Reduce a branch to its leaf value. Only valid as the last stage.
    Converge(Arc<ConvergeFn>),
}

impl Stage {
    pub fn classify<F>(f: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Option<String>, StageError> + Send + Sync + 'static,
    {
        Self::Classify(Arc::new(f))
    }

    pub fn combine<F>(f: F) -> Self
    where
        F: Fn(Vec<Record>) -> Result<Vec<Record>, StageError> + Send + Sync + 'static,
    {
        Self::Combine(Arc::new(f))
    }

    pub fn converge<F>(f: F) -> Self
    where
        F: Fn(Vec<Record>) -> Result<Vec<Record>, StageError> + Send + Sync + 'static,
    {
        Self::Converge(Arc::new(f))
    }

    pub fn kind(&self) -> StageKind {
        match self {
            Self::Classify(_) => StageKind::Classify,
            Self::Combine(_) => StageKind::Combine,
            Self::Converge(_) => StageKind::Converge,
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stage::{:?}", self.kind())
    }
}
