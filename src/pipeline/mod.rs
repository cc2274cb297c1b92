//! Pipeline definition.
//!
//! A pipeline is an ordered list of [`Stage`]s:
//!
//! - [`Stage::Classify`]: assign each record to a named branch, or drop it
//! - [`Stage::Combine`]: replace a branch's records with a smaller set, once per node
//! - [`Stage::Converge`]: reduce a branch to a single leaf record (last stage only)
//!
//! Pipelines are built fluently with [`Pipeline::build`] and looked up by name through a
//! [`PipelineRegistry`].

pub mod builder;
pub mod registry;
pub mod stage;

pub use builder::{Pipeline, PipelineBuilder};
pub use registry::{PipelineMap, PipelineRegistry};
pub use stage::{ClassifyFn, CombineFn, ConvergeFn, Stage};
