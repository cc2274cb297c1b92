//! Running a segment's computation on a node.
//!
//! The coordinator hands each node a [`SegmentTask`] through a [`NodeTransport`] and gets the
//! node's [`ResultTree`] back. Whether that happens in-process or over a network is the
//! transport's business:
//!
//! - [`InProcessTransport`] calls a [`NodeExecutor`] directly
//! - [`crate::wire::LoopbackTransport`] round-trips every task through the wire encoding
//! - [`RoutingTransport`] dispatches by node id to per-node transports

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ComputeError, ComputeResult};
use crate::execution::{CancelToken, ChainExecutor};
use crate::pipeline::PipelineRegistry;
use crate::storage::{read_segment, StorageAccessor};
use crate::tree::ResultTree;
use crate::types::{NodeId, Segment};

/// One unit of node work: run `pipeline` over `segment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentTask {
    /// Registered pipeline name.
    pub pipeline: String,
    /// Opaque metadata passed to the pipeline registry.
    #[serde(default)]
    pub meta: Vec<u8>,
    pub segment: Segment,
}

/// Executes segment tasks on nodes.
pub trait NodeTransport: Send + Sync {
    /// Run `task` on `node` and return its result tree.
    ///
    /// `cancel` is advisory: transports that cannot forward it may ignore it.
    fn run_on_node(
        &self,
        node: &NodeId,
        task: &SegmentTask,
        cancel: &CancelToken,
    ) -> ComputeResult<ResultTree>;
}

/// Node-side execution: read a segment and run the pipeline over it.
#[derive(Clone)]
pub struct NodeExecutor {
    storage: Arc<dyn StorageAccessor>,
    registry: Arc<dyn PipelineRegistry>,
}

impl NodeExecutor {
    pub fn new(storage: Arc<dyn StorageAccessor>, registry: Arc<dyn PipelineRegistry>) -> Self {
        Self { storage, registry }
    }

    /// Resolve the pipeline, read the segment in order and execute it.
    pub fn compute(&self, task: &SegmentTask, cancel: &CancelToken) -> ComputeResult<ResultTree> {
        let pipeline = self.registry.resolve(&task.pipeline, &task.meta)?;
        let records = read_segment(self.storage.as_ref(), &task.segment, cancel)?;
        log::debug!(
            "executing pipeline {} over {} ({} records)",
            task.pipeline,
            task.segment,
            records.len()
        );
        ChainExecutor::new()
            .with_cancel(cancel.clone())
            .execute(records, &pipeline)
    }
}

impl fmt::Debug for NodeExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeExecutor").finish_non_exhaustive()
    }
}

/// Runs every task in the current process, regardless of node id.
#[derive(Debug, Clone)]
pub struct InProcessTransport {
    executor: NodeExecutor,
}

impl InProcessTransport {
    pub fn new(executor: NodeExecutor) -> Self {
        Self { executor }
    }
}

impl NodeTransport for InProcessTransport {
    fn run_on_node(
        &self,
        _node: &NodeId,
        task: &SegmentTask,
        cancel: &CancelToken,
    ) -> ComputeResult<ResultTree> {
        self.executor.compute(task, cancel)
    }
}

/// Dispatches each task to the transport registered for its node.
#[derive(Default)]
pub struct RoutingTransport {
    routes: HashMap<NodeId, Arc<dyn NodeTransport>>,
}

impl RoutingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, node: impl Into<NodeId>, transport: Arc<dyn NodeTransport>) -> Self {
        self.routes.insert(node.into(), transport);
        self
    }
}

impl fmt::Debug for RoutingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nodes: Vec<&str> = self.routes.keys().map(NodeId::as_str).collect();
        nodes.sort_unstable();
        f.debug_struct("RoutingTransport").field("nodes", &nodes).finish()
    }
}

impl NodeTransport for RoutingTransport {
    fn run_on_node(
        &self,
        node: &NodeId,
        task: &SegmentTask,
        cancel: &CancelToken,
    ) -> ComputeResult<ResultTree> {
        let transport = self.routes.get(node).ok_or_else(|| ComputeError::Node {
            node: node.to_string(),
            message: "no route to node".to_string(),
        })?;
        transport.run_on_node(node, task, cancel)
    }
}
