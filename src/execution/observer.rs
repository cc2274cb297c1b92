use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::types::{NodeId, Segment};

/// Events emitted by the coordinator while a calculation runs.
#[derive(Debug, Clone)]
pub enum CalculationEvent {
    CalculationStarted {
        dataset: String,
        pipeline: String,
        nodes: usize,
        length: u64,
    },
    SegmentDispatched { node: NodeId, segment: Segment },
    SegmentFinished { node: NodeId, elapsed: Duration },
    SegmentFailed { node: NodeId, error: String },
    MergeStarted { trees: usize },
    CalculationFinished {
        elapsed: Duration,
        metrics: CalculationMetricsSnapshot,
    },
    CalculationFailed { error: String },
}

/// Observer hook for calculation events.
pub trait CalculationObserver: Send + Sync {
    fn on_event(&self, event: &CalculationEvent);
}

/// A simple stderr logger for calculation events.
#[derive(Debug, Default)]
pub struct StdErrObserver;

impl CalculationObserver for StdErrObserver {
    fn on_event(&self, event: &CalculationEvent) {
        eprintln!("[calculate] {event:?}");
    }
}

/// Forwards calculation events to the [`log`] facade.
///
/// Progress is logged at `info`/`debug`, failures at `warn`.
#[derive(Debug, Default)]
pub struct LogObserver;

impl CalculationObserver for LogObserver {
    fn on_event(&self, event: &CalculationEvent) {
        match event {
            CalculationEvent::CalculationStarted {
                dataset,
                pipeline,
                nodes,
                length,
            } => log::info!(
                "calculating pipeline={pipeline} dataset={dataset} nodes={nodes} length={length}"
            ),
            CalculationEvent::SegmentDispatched { node, segment } => {
                log::debug!("dispatched segment {segment} to node {node}")
            }
            CalculationEvent::SegmentFinished { node, elapsed } => {
                log::debug!("node {node} finished in {elapsed:?}")
            }
            CalculationEvent::SegmentFailed { node, error } => {
                log::warn!("node {node} failed: {error}")
            }
            CalculationEvent::MergeStarted { trees } => log::debug!("merging {trees} trees"),
            CalculationEvent::CalculationFinished { elapsed, metrics } => {
                log::info!("calculation finished in {elapsed:?}: {metrics}")
            }
            CalculationEvent::CalculationFailed { error } => {
                log::warn!("calculation failed: {error}")
            }
        }
    }
}

/// Real-time counters for coordinator runs.
///
/// The coordinator updates these while calculating; callers can snapshot them at any time.
/// Counters are reset at the start of each run.
pub struct CalculationMetrics {
    run_id: AtomicU64,
    elapsed_ns: AtomicU64,

    segments_dispatched: AtomicU64,
    segments_succeeded: AtomicU64,
    segments_failed: AtomicU64,
    trees_merged: AtomicU64,
    converge_invocations: AtomicU64,
}

impl CalculationMetrics {
    pub fn new() -> Self {
        Self {
            run_id: AtomicU64::new(0),
            elapsed_ns: AtomicU64::new(0),
            segments_dispatched: AtomicU64::new(0),
            segments_succeeded: AtomicU64::new(0),
            segments_failed: AtomicU64::new(0),
            trees_merged: AtomicU64::new(0),
            converge_invocations: AtomicU64::new(0),
        }
    }

    pub fn begin_run(&self) {
        let _ = self.run_id.fetch_add(1, Ordering::SeqCst);
        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.segments_dispatched.store(0, Ordering::SeqCst);
        self.segments_succeeded.store(0, Ordering::SeqCst);
        self.segments_failed.store(0, Ordering::SeqCst);
        self.trees_merged.store(0, Ordering::SeqCst);
        self.converge_invocations.store(0, Ordering::SeqCst);
    }

    pub fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns
            .store(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }

    pub fn on_segment_dispatched(&self) {
        let _ = self.segments_dispatched.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_segment_succeeded(&self) {
        let _ = self.segments_succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_segment_failed(&self) {
        let _ = self.segments_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_merged(&self, trees: usize, converge_invocations: usize) {
        let _ = self.trees_merged.fetch_add(trees as u64, Ordering::SeqCst);
        let _ = self
            .converge_invocations
            .fetch_add(converge_invocations as u64, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> CalculationMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        let elapsed = if elapsed_ns > 0 {
            Some(Duration::from_nanos(elapsed_ns))
        } else {
            None
        };

        CalculationMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            elapsed,
            segments_dispatched: self.segments_dispatched.load(Ordering::SeqCst),
            segments_succeeded: self.segments_succeeded.load(Ordering::SeqCst),
            segments_failed: self.segments_failed.load(Ordering::SeqCst),
            trees_merged: self.trees_merged.load(Ordering::SeqCst),
            converge_invocations: self.converge_invocations.load(Ordering::SeqCst),
        }
    }
}

impl Default for CalculationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of [`CalculationMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalculationMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    pub segments_dispatched: u64,
    pub segments_succeeded: u64,
    pub segments_failed: u64,
    /// Per-node trees folded into the merged result.
    pub trees_merged: u64,
    /// Converge invocations performed while merging.
    pub converge_invocations: u64,
}

impl fmt::Display for CalculationMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, segments={}/{} (failed={}), trees_merged={}, converge_invocations={}, elapsed={:?}",
            self.run_id,
            self.segments_succeeded,
            self.segments_dispatched,
            self.segments_failed,
            self.trees_merged,
            self.converge_invocations,
            self.elapsed
        )
    }
}
