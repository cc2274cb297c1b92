//! Pipeline lookup by name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ComputeError, ComputeResult};

use super::Pipeline;

/// Resolves a pipeline by name plus an opaque metadata blob.
///
/// Nodes and the coordinator share a registry so they agree on which stages a name refers to.
pub trait PipelineRegistry: Send + Sync {
    /// Look up `name`. A miss is [`ComputeError::UnknownPipeline`].
    fn resolve(&self, name: &str, meta: &[u8]) -> ComputeResult<Arc<Pipeline>>;
}

/// A [`PipelineRegistry`] backed by a map; `meta` is ignored.
#[derive(Clone, Default)]
pub struct PipelineMap {
    pipelines: HashMap<String, Arc<Pipeline>>,
}

impl PipelineMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pipeline` under `name`, replacing any previous entry.
    pub fn with(mut self, name: impl Into<String>, pipeline: Pipeline) -> Self {
        self.insert(name, pipeline);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, pipeline: Pipeline) {
        self.pipelines.insert(name.into(), Arc::new(pipeline));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }
}

impl fmt::Debug for PipelineMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("PipelineMap").field("names", &names).finish()
    }
}

impl PipelineRegistry for PipelineMap {
    fn resolve(&self, name: &str, _meta: &[u8]) -> ComputeResult<Arc<Pipeline>> {
        self.pipelines
            .get(name)
            .cloned()
            .ok_or_else(|| ComputeError::UnknownPipeline {
                name: name.to_string(),
            })
    }
}
