//! `partition-reduce` runs a multi-stage map/reduce pipeline over a dataset that is spread
//! across several nodes, and merges the per-node results into one [`tree::ResultTree`].
//!
//! A [`pipeline::Pipeline`] is an ordered list of stages over opaque byte records:
//!
//! - **classify** (`map`): give each record a key, or drop it; records with equal keys form a
//!   group and the rest of the pipeline runs once per group, producing one tree level per
//!   classify stage
//! - **combine** (`reduce`): turn a group's record list into another record list
//! - **converge** (`final_reduce`): the last stage; applied repeatedly until one record is
//!   left, which becomes the group's leaf value
//!
//! The primary entrypoint is [`coordinator::Coordinator::calculate`], which splits the dataset
//! into one byte-range segment per node, runs the pipeline on every segment concurrently and
//! merges the resulting trees with the same converge stage. Either the merged tree or the first
//! error is returned, never a partial result.
//!
//! ## Quick example: count even and odd numbers on three nodes
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use partition_reduce::coordinator::Coordinator;
//! use partition_reduce::pipeline::{Pipeline, PipelineMap};
//! use partition_reduce::storage::InMemoryStorage;
//! use partition_reduce::types::NodeId;
//!
//! # fn main() -> Result<(), partition_reduce::ComputeError> {
//! let pipeline = Pipeline::build(|record: &[u8]| {
//!     let n: u64 = std::str::from_utf8(record)?.parse()?;
//!     Ok(Some(if n % 2 == 0 { "even" } else { "odd" }.to_string()))
//! })
//! .reduce(|records| Ok(vec![vec![records.len() as u8]]))
//! .final_reduce(|records| {
//!     let total: u8 = records.iter().map(|r| r[0]).sum();
//!     Ok(vec![vec![total]])
//! });
//!
//! let storage = InMemoryStorage::new();
//! let nodes = vec![NodeId::from("a"), NodeId::from("b"), NodeId::from("c")];
//! let numbers: Vec<String> = (1..=9).map(|n| n.to_string()).collect();
//! storage.insert("numbers", nodes, &numbers)?;
//!
//! let coordinator = Coordinator::in_process(
//!     Arc::new(storage),
//!     Arc::new(PipelineMap::new().with("parity", pipeline)),
//! );
//! let tree = coordinator.calculate("numbers", "parity")?;
//!
//! assert_eq!(tree.get(&["odd"]).and_then(|t| t.leaf_value()), Some(&[5u8][..]));
//! assert_eq!(tree.get(&["even"]).and_then(|t| t.leaf_value()), Some(&[4u8][..]));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`pipeline`]: stages, the pipeline builder and name-based pipeline lookup
//! - [`execution`]: running a pipeline over an in-memory record list, cancellation, observers
//! - [`merge`]: merging result trees from several nodes
//! - [`coordinator`]: segmenting a dataset and running a calculation across its nodes
//! - [`storage`]: length-prefixed record framing, in-memory and directory-backed datasets
//! - [`transport`] / [`wire`]: handing segment tasks to nodes and encoding them
//! - [`ingestion`]: converting CSV / NDJSON input into records
//! - [`tree`], [`types`], [`error`]: shared data types

pub mod coordinator;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod merge;
pub mod pipeline;
pub mod storage;
pub mod transport;
pub mod tree;
pub mod types;
pub mod wire;

pub use coordinator::{Coordinator, CoordinatorOptions};
pub use error::{ComputeError, ComputeResult, StageError, StageKind};
pub use pipeline::{Pipeline, PipelineMap, PipelineRegistry};
pub use tree::ResultTree;
pub use types::{NodeId, Record, Segment};
