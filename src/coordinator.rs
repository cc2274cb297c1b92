//! Distributed calculation over a partitioned dataset.
//!
//! [`Coordinator::calculate`]:
//!
//! 1. asks storage for the dataset's nodes and length
//! 2. splits the length into one contiguous byte-range segment per node
//! 3. runs the pipeline for every segment concurrently, one task per node, via the
//!    [`NodeTransport`]
//! 4. fails fast on the first segment error (no partial results), otherwise merges the
//!    per-node trees with the pipeline's converge stage
//!
//! When a segment fails (or the deadline passes) the remaining tasks are signalled through a
//! shared [`CancelToken`]; their results are discarded either way.

use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{ComputeError, ComputeResult};
use crate::execution::{CalculationEvent, CalculationMetrics, CalculationObserver, CancelToken};
use crate::merge::TreeMerger;
use crate::pipeline::PipelineRegistry;
use crate::storage::StorageAccessor;
use crate::transport::{InProcessTransport, NodeExecutor, NodeTransport, SegmentTask};
use crate::tree::ResultTree;
use crate::types::{split_segments, NodeId, Segment};

/// Configuration for the [`Coordinator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorOptions {
    /// Upper bound on a whole calculation. `None` waits for every segment.
    pub deadline: Option<Duration>,
    /// Signal cancellation to still-running segments once one has failed.
    pub cancel_on_failure: bool,
    /// Name prefix for segment worker threads.
    pub thread_name_prefix: String,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            deadline: None,
            cancel_on_failure: true,
            thread_name_prefix: "segment".to_string(),
        }
    }
}

impl CoordinatorOptions {
    /// Parse options from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> ComputeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Runs named pipelines across the nodes holding a dataset and merges their results.
pub struct Coordinator {
    storage: Arc<dyn StorageAccessor>,
    transport: Arc<dyn NodeTransport>,
    registry: Arc<dyn PipelineRegistry>,
    opts: CoordinatorOptions,
    observer: Option<Arc<dyn CalculationObserver>>,
    metrics: Arc<CalculationMetrics>,
}

struct SegmentOutcome {
    node: NodeId,
    elapsed: Duration,
    result: ComputeResult<ResultTree>,
}

impl Coordinator {
    pub fn new(
        storage: Arc<dyn StorageAccessor>,
        transport: Arc<dyn NodeTransport>,
        registry: Arc<dyn PipelineRegistry>,
    ) -> Self {
        Self {
            storage,
            transport,
            registry,
            opts: CoordinatorOptions::default(),
            observer: None,
            metrics: Arc::new(CalculationMetrics::new()),
        }
    }

    /// A coordinator whose nodes all execute in this process against `storage`.
    pub fn in_process(storage: Arc<dyn StorageAccessor>, registry: Arc<dyn PipelineRegistry>) -> Self {
        let executor = NodeExecutor::new(Arc::clone(&storage), Arc::clone(&registry));
        Self::new(storage, Arc::new(InProcessTransport::new(executor)), registry)
    }

    pub fn with_options(mut self, opts: CoordinatorOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Attach an observer for calculation events (logging/metrics).
    pub fn with_observer(mut self, observer: Arc<dyn CalculationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time calculation metrics.
    pub fn metrics(&self) -> Arc<CalculationMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.opts
    }

    /// Run `pipeline` over `dataset` with empty metadata.
    pub fn calculate(&self, dataset: &str, pipeline: &str) -> ComputeResult<ResultTree> {
        self.calculate_with_meta(dataset, pipeline, &[])
    }

    /// Run `pipeline` over `dataset`, passing `meta` to every pipeline lookup.
    ///
    /// Returns either the merged tree or the first error; never both.
    pub fn calculate_with_meta(
        &self,
        dataset: &str,
        pipeline: &str,
        meta: &[u8],
    ) -> ComputeResult<ResultTree> {
        let start = Instant::now();
        self.metrics.begin_run();

        let out = self.calculate_impl(dataset, pipeline, meta, start);

        self.metrics.end_run(start.elapsed());
        match &out {
            Ok(_) => self.emit(CalculationEvent::CalculationFinished {
                elapsed: start.elapsed(),
                metrics: self.metrics.snapshot(),
            }),
            Err(e) => self.emit(CalculationEvent::CalculationFailed {
                error: e.to_string(),
            }),
        }
        out
    }

    fn calculate_impl(
        &self,
        dataset: &str,
        pipeline_name: &str,
        meta: &[u8],
        start: Instant,
    ) -> ComputeResult<ResultTree> {
        let pipeline = self.registry.resolve(pipeline_name, meta)?;
        let nodes = self.storage.nodes_for(dataset)?;
        if nodes.is_empty() {
            return Err(ComputeError::NoNodes {
                dataset: dataset.to_string(),
            });
        }
        let length = self.storage.length_of(dataset)?;

        self.emit(CalculationEvent::CalculationStarted {
            dataset: dataset.to_string(),
            pipeline: pipeline_name.to_string(),
            nodes: nodes.len(),
            length,
        });

        let segments = split_segments(dataset, length, nodes.len());
        let trees = self.run_segments(pipeline_name, meta, nodes, segments, start)?;

        self.emit(CalculationEvent::MergeStarted { trees: trees.len() });
        let mut merger = TreeMerger::for_pipeline(&pipeline);
        for tree in trees {
            merger.fold(tree)?;
        }
        let merged = merger.finish()?;
        self.metrics.on_merged(merged.trees, merged.converge_invocations);
        Ok(merged.tree)
    }

    /// Fan out one task per `(node, segment)` and collect every tree, or the first error.
    fn run_segments(
        &self,
        pipeline: &str,
        meta: &[u8],
        nodes: Vec<NodeId>,
        segments: Vec<Segment>,
        start: Instant,
    ) -> ComputeResult<Vec<ResultTree>> {
        let expected = nodes.len();
        let prefix = self.opts.thread_name_prefix.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(expected)
            .thread_name(move |i| format!("{prefix}-{i}"))
            .panic_handler(|_| log::error!("segment task panicked"))
            .build()?;

        let (tx, rx) = mpsc::sync_channel::<SegmentOutcome>(expected);
        let cancel = CancelToken::new();

        for (node, segment) in nodes.into_iter().zip(segments) {
            self.metrics.on_segment_dispatched();
            self.emit(CalculationEvent::SegmentDispatched {
                node: node.clone(),
                segment: segment.clone(),
            });

            let task = SegmentTask {
                pipeline: pipeline.to_string(),
                meta: meta.to_vec(),
                segment,
            };
            let transport = Arc::clone(&self.transport);
            let cancel = cancel.clone();
            let tx = tx.clone();
            pool.spawn(move || {
                let started = Instant::now();
                let result = transport.run_on_node(&node, &task, &cancel);
                // The receiver is gone if the calculation already failed.
                let _ = tx.send(SegmentOutcome {
                    node,
                    elapsed: started.elapsed(),
                    result,
                });
            });
        }
        drop(tx);

        let mut trees = Vec::with_capacity(expected);
        while trees.len() < expected {
            let received = match self.opts.deadline {
                Some(deadline) => rx.recv_timeout(deadline.saturating_sub(start.elapsed())),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            let outcome = match received {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => {
                    cancel.cancel();
                    return Err(ComputeError::DeadlineExceeded {
                        elapsed: start.elapsed(),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    cancel.cancel();
                    return Err(ComputeError::SegmentTaskLost {
                        missing: expected - trees.len(),
                    });
                }
            };

            match outcome.result {
                Ok(tree) => {
                    self.metrics.on_segment_succeeded();
                    self.emit(CalculationEvent::SegmentFinished {
                        node: outcome.node,
                        elapsed: outcome.elapsed,
                    });
                    trees.push(tree);
                }
                Err(e) => {
                    self.metrics.on_segment_failed();
                    self.emit(CalculationEvent::SegmentFailed {
                        node: outcome.node,
                        error: e.to_string(),
                    });
                    if self.opts.cancel_on_failure {
                        cancel.cancel();
                    }
                    return Err(e);
                }
            }
        }
        Ok(trees)
    }

    fn emit(&self, event: CalculationEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("opts", &self.opts)
            .field("observer_set", &self.observer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{Coordinator, CoordinatorOptions};
    use crate::error::{ComputeError, ComputeResult};
    use crate::execution::{CalculationEvent, CalculationObserver, CancelToken};
    use crate::pipeline::{Pipeline, PipelineMap};
    use crate::storage::InMemoryStorage;
    use crate::transport::{NodeTransport, SegmentTask};
    use crate::tree::ResultTree;
    use crate::types::{NodeId, Record, Segment};

    fn nodes(n: usize) -> Vec<NodeId> {
        (0..n).map(|i| NodeId::new(format!("node-{i}"))).collect()
    }

    fn count_pipeline() -> Pipeline {
        Pipeline::build(|r| Ok(Some(String::from_utf8_lossy(r).into_owned())))
            .reduce(|records| Ok(vec![(records.len() as u64).to_le_bytes().to_vec()]))
            .final_reduce(|records| {
                let total: u64 = records
                    .iter()
                    .map(|r| u64::from_le_bytes(r[..8].try_into().unwrap()))
                    .sum();
                Ok(vec![total.to_le_bytes().to_vec()])
            })
    }

    fn count_of(tree: &ResultTree, key: &str) -> Option<u64> {
        tree.child(key)
            .and_then(ResultTree::leaf_value)
            .map(|v| u64::from_le_bytes(v[..8].try_into().unwrap()))
    }

    fn words() -> Vec<&'static str> {
        "a b a c b a d a c b".split(' ').collect()
    }

    fn coordinator(storage: InMemoryStorage) -> Coordinator {
        Coordinator::in_process(
            Arc::new(storage),
            Arc::new(PipelineMap::new().with("count", count_pipeline())),
        )
    }

    #[test]
    fn counts_match_regardless_of_node_count() {
        for n in 1..=6 {
            let storage = InMemoryStorage::new();
            storage.insert("words", nodes(n), words()).unwrap();
            let tree = coordinator(storage).calculate("words", "count").unwrap();

            assert_eq!(count_of(&tree, "a"), Some(4), "nodes={n}");
            assert_eq!(count_of(&tree, "b"), Some(3), "nodes={n}");
            assert_eq!(count_of(&tree, "c"), Some(2), "nodes={n}");
            assert_eq!(count_of(&tree, "d"), Some(1), "nodes={n}");
            assert_eq!(tree.leaf_count(), 4);
        }
    }

    #[test]
    fn empty_dataset_yields_empty_tree() {
        let storage = InMemoryStorage::new();
        storage.insert("empty", nodes(3), Vec::<Record>::new()).unwrap();
        let tree = coordinator(storage).calculate("empty", "count").unwrap();
        assert!(tree.is_empty());
    }

    #[test]
    fn lookup_and_storage_errors_abort_before_dispatch() {
        let storage = InMemoryStorage::new();
        storage.insert("words", nodes(2), words()).unwrap();
        storage.insert("orphan", Vec::new(), words()).unwrap();
        let coordinator = coordinator(storage);

        assert!(matches!(
            coordinator.calculate("words", "nope"),
            Err(ComputeError::UnknownPipeline { .. })
        ));
        assert!(matches!(
            coordinator.calculate("missing", "count"),
            Err(ComputeError::UnknownDataset { .. })
        ));
        assert!(matches!(
            coordinator.calculate("orphan", "count"),
            Err(ComputeError::NoNodes { .. })
        ));
        assert_eq!(coordinator.metrics().snapshot().segments_dispatched, 0);
    }

    /// Fails on one node, succeeds (slowly) elsewhere and records what it saw.
    struct FlakyTransport {
        failing: NodeId,
        calls: AtomicUsize,
        cancelled_seen: AtomicUsize,
        completed: AtomicUsize,
    }

    impl FlakyTransport {
        fn failing_on(node: &str) -> Self {
            Self {
                failing: NodeId::from(node),
                calls: AtomicUsize::new(0),
                cancelled_seen: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            }
        }
    }

    impl NodeTransport for FlakyTransport {
        fn run_on_node(
            &self,
            node: &NodeId,
            _task: &SegmentTask,
            cancel: &CancelToken,
        ) -> ComputeResult<ResultTree> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if *node == self.failing {
                return Err(ComputeError::Node {
                    node: node.to_string(),
                    message: "disk on fire".to_string(),
                });
            }
            for _ in 0..200 {
                if cancel.is_cancelled() {
                    self.cancelled_seen.fetch_add(1, Ordering::SeqCst);
                    return Err(ComputeError::Cancelled);
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(ResultTree::branch([("k", ResultTree::leaf(1u64.to_le_bytes().to_vec()))]))
        }
    }

    #[test]
    fn one_failing_segment_fails_the_whole_calculation() {
        let storage = InMemoryStorage::new();
        storage.insert("words", nodes(4), words()).unwrap();
        let transport = Arc::new(FlakyTransport::failing_on("node-2"));
        let coordinator = Coordinator::new(
            Arc::new(storage),
            transport.clone(),
            Arc::new(PipelineMap::new().with("count", count_pipeline())),
        );

        let result = coordinator.calculate("words", "count");

        match result {
            Err(ComputeError::Node { node, message }) => {
                assert_eq!(node, "node-2");
                assert_eq!(message, "disk on fire");
            }
            other => panic!("expected node error, got {other:?}"),
        }
        let snap = coordinator.metrics().snapshot();
        assert_eq!(snap.segments_dispatched, 4);
        assert_eq!(snap.segments_failed, 1);
        assert_eq!(snap.trees_merged, 0);

        // Siblings observe the cancellation signal shortly after.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while transport.cancelled_seen.load(Ordering::SeqCst) < 3 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
        assert_eq!(transport.cancelled_seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn siblings_run_to_completion_without_cancel_on_failure() {
        let storage = InMemoryStorage::new();
        storage.insert("words", nodes(3), words()).unwrap();
        let transport = Arc::new(FlakyTransport::failing_on("node-0"));
        let coordinator = Coordinator::new(
            Arc::new(storage),
            transport.clone(),
            Arc::new(PipelineMap::new().with("count", count_pipeline())),
        )
        .with_options(CoordinatorOptions {
            cancel_on_failure: false,
            ..Default::default()
        });

        match coordinator.calculate("words", "count") {
            Err(ComputeError::Node { node, .. }) => assert_eq!(node, "node-0"),
            other => panic!("expected node error, got {other:?}"),
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while transport.completed.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(transport.completed.load(Ordering::SeqCst), 2);
        assert_eq!(transport.cancelled_seen.load(Ordering::SeqCst), 0);
    }

    struct SlowTransport;

    impl NodeTransport for SlowTransport {
        fn run_on_node(
            &self,
            _node: &NodeId,
            _task: &SegmentTask,
            cancel: &CancelToken,
        ) -> ComputeResult<ResultTree> {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(2));
            }
            Err(ComputeError::Cancelled)
        }
    }

    #[test]
    fn deadline_cancels_outstanding_segments() {
        let storage = InMemoryStorage::new();
        storage.insert("words", nodes(2), words()).unwrap();
        let coordinator = Coordinator::new(
            Arc::new(storage),
            Arc::new(SlowTransport),
            Arc::new(PipelineMap::new().with("count", count_pipeline())),
        )
        .with_options(CoordinatorOptions {
            deadline: Some(Duration::from_millis(50)),
            ..Default::default()
        });

        let err = coordinator.calculate("words", "count").unwrap_err();
        assert!(matches!(err, ComputeError::DeadlineExceeded { .. }));
    }

    struct PanickingTransport;

    impl NodeTransport for PanickingTransport {
        fn run_on_node(
            &self,
            _node: &NodeId,
            _task: &SegmentTask,
            _cancel: &CancelToken,
        ) -> ComputeResult<ResultTree> {
            panic!("stage bug");
        }
    }

    #[test]
    fn panicking_segment_is_reported_as_lost() {
        let storage = InMemoryStorage::new();
        storage.insert("words", nodes(2), words()).unwrap();
        let coordinator = Coordinator::new(
            Arc::new(storage),
            Arc::new(PanickingTransport),
            Arc::new(PipelineMap::new().with("count", count_pipeline())),
        );

        let err = coordinator.calculate("words", "count").unwrap_err();
        assert!(matches!(err, ComputeError::SegmentTaskLost { missing: 2 }));
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
        segments: Mutex<Vec<Segment>>,
    }

    impl CalculationObserver for RecordingObserver {
        fn on_event(&self, event: &CalculationEvent) {
            let name = match event {
                CalculationEvent::CalculationStarted { .. } => "started",
                CalculationEvent::SegmentDispatched { segment, .. } => {
                    self.segments.lock().unwrap().push(segment.clone());
                    "dispatched"
                }
                CalculationEvent::SegmentFinished { .. } => "finished",
                CalculationEvent::SegmentFailed { .. } => "failed",
                CalculationEvent::MergeStarted { .. } => "merge",
                CalculationEvent::CalculationFinished { .. } => "done",
                CalculationEvent::CalculationFailed { .. } => "calculation_failed",
            };
            self.events.lock().unwrap().push(name.to_string());
        }
    }

    #[test]
    fn observer_sees_lifecycle_and_segments_tile_dataset() {
        let storage = InMemoryStorage::new();
        storage.insert("words", nodes(3), words()).unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let obs_trait: Arc<dyn CalculationObserver> = observer.clone();
        let coordinator = coordinator(storage).with_observer(obs_trait);

        coordinator.calculate("words", "count").unwrap();

        let events = observer.events.lock().unwrap().clone();
        assert_eq!(events.first().map(String::as_str), Some("started"));
        assert_eq!(events.iter().filter(|e| *e == "dispatched").count(), 3);
        assert_eq!(events.iter().filter(|e| *e == "finished").count(), 3);
        assert_eq!(&events[events.len() - 2..], ["merge", "done"]);

        // 10 one-byte words, 5 bytes per frame.
        let segments = observer.segments.lock().unwrap().clone();
        assert_eq!(
            segments,
            vec![
                Segment::new("words", 0, 16),
                Segment::new("words", 16, 32),
                Segment::new("words", 32, 50),
            ]
        );

        let snap = coordinator.metrics().snapshot();
        assert_eq!(snap.run_id, 1);
        assert_eq!(snap.segments_succeeded, 3);
        assert_eq!(snap.trees_merged, 3);
        assert!(snap.elapsed.is_some());
    }

    #[test]
    fn options_parse_from_json_with_defaults() {
        let opts = CoordinatorOptions::from_json(
            r#"{"deadline":{"secs":2,"nanos":0},"thread_name_prefix":"calc"}"#,
        )
        .unwrap();
        assert_eq!(opts.deadline, Some(Duration::from_secs(2)));
        assert_eq!(opts.thread_name_prefix, "calc");
        assert!(opts.cancel_on_failure);

        assert_eq!(CoordinatorOptions::from_json("{}").unwrap(), CoordinatorOptions::default());
        assert!(CoordinatorOptions::from_json("[").is_err());
    }
}
