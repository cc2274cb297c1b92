//! JSON encoding of node requests and responses.
//!
//! A request is a serialized [`SegmentTask`]; a response is a [`NodeResponse`]. Node-side
//! failures travel as messages and come back to the coordinator as [`ComputeError::Node`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ComputeError, ComputeResult};
use crate::execution::CancelToken;
use crate::transport::{NodeExecutor, NodeTransport, SegmentTask};
use crate::tree::ResultTree;
use crate::types::NodeId;

/// Outcome of a segment task as sent back by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeResponse {
    Tree(ResultTree),
    Failed { message: String },
}

pub fn encode_task(task: &SegmentTask) -> ComputeResult<Vec<u8>> {
    Ok(serde_json::to_vec(task)?)
}

pub fn decode_task(bytes: &[u8]) -> ComputeResult<SegmentTask> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn encode_response(response: &NodeResponse) -> ComputeResult<Vec<u8>> {
    Ok(serde_json::to_vec(response)?)
}

pub fn decode_response(bytes: &[u8]) -> ComputeResult<NodeResponse> {
    Ok(serde_json::from_slice(bytes)?)
}

impl NodeExecutor {
    /// Serve one encoded request and return the encoded response.
    ///
    /// Undecodable requests and computation failures are reported inside the response.
    /// The request runs to completion; use [`NodeExecutor::handle_with_cancel`] to stop it early.
    pub fn handle(&self, request: &[u8]) -> ComputeResult<Vec<u8>> {
        self.handle_with_cancel(request, &CancelToken::new())
    }

    /// Like [`NodeExecutor::handle`], but stops between records once `cancel` fires and
    /// answers with a failed response.
    pub fn handle_with_cancel(
        &self,
        request: &[u8],
        cancel: &CancelToken,
    ) -> ComputeResult<Vec<u8>> {
        let outcome = decode_task(request).and_then(|task| self.compute(&task, cancel));
        let response = match outcome {
            Ok(tree) => NodeResponse::Tree(tree),
            Err(e) => NodeResponse::Failed {
                message: e.to_string(),
            },
        };
        encode_response(&response)
    }
}

/// A transport that serves every task through [`NodeExecutor::handle_with_cancel`], exercising
/// the full request/response encoding without a network. The calculation's cancel token is
/// handed to the executor, so siblings of a failed segment stop early.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    executor: Arc<NodeExecutor>,
}

impl LoopbackTransport {
    pub fn new(executor: Arc<NodeExecutor>) -> Self {
        Self { executor }
    }
}

impl NodeTransport for LoopbackTransport {
    fn run_on_node(
        &self,
        node: &NodeId,
        task: &SegmentTask,
        cancel: &CancelToken,
    ) -> ComputeResult<ResultTree> {
        cancel.check()?;
        let request = encode_task(task)?;
        let response = self.executor.handle_with_cancel(&request, cancel)?;
        match decode_response(&response)? {
            NodeResponse::Tree(tree) => Ok(tree),
            NodeResponse::Failed { message } => Err(ComputeError::Node {
                node: node.to_string(),
                message,
            }),
        }
    }
}
