use std::sync::Arc;

use partition_reduce::coordinator::Coordinator;
use partition_reduce::ingestion::records_from_ndjson_path;
use partition_reduce::pipeline::{Pipeline, PipelineMap};
use partition_reduce::storage::{DirectoryStorage, StorageAccessor};
use partition_reduce::types::{NodeId, Record};

fn point(record: &[u8]) -> Result<serde_json::Value, partition_reduce::StageError> {
    Ok(serde_json::from_slice(record)?)
}

fn value_of(record: &[u8]) -> Result<f64, partition_reduce::StageError> {
    point(record)?["value"]
        .as_f64()
        .ok_or_else(|| "point has no numeric value".into())
}

/// Keep the highest-valued point for every whole second.
fn max_per_second() -> Pipeline {
    Pipeline::build(|r| {
        let ts = point(r)?["ts"].as_f64().ok_or("point has no timestamp")?;
        Ok(Some((ts.floor() as i64).to_string()))
    })
    .final_reduce(|records: Vec<Record>| {
        let mut best: Option<(f64, Record)> = None;
        for record in records {
            let value = value_of(&record)?;
            if best.as_ref().is_none_or(|(max, _)| value > *max) {
                best = Some((value, record));
            }
        }
        Ok(best.map(|(_, record)| record).into_iter().collect())
    })
}

fn coordinator(dir: &tempfile::TempDir, nodes: usize) -> Coordinator {
    let storage = DirectoryStorage::new(
        dir.path(),
        (0..nodes).map(|i| NodeId::new(format!("n{i}"))).collect(),
    );
    let records = records_from_ndjson_path("tests/fixtures/points.ndjson").unwrap();
    storage.write_dataset("points", &records).unwrap();

    Coordinator::in_process(
        Arc::new(storage),
        Arc::new(PipelineMap::new().with("max", max_per_second())),
    )
}

#[test]
fn per_second_maximum_from_files_on_disk() {
    for nodes in [1, 3, 4, 7] {
        let dir = tempfile::tempdir().unwrap();
        let tree = coordinator(&dir, nodes).calculate("points", "max").unwrap();

        let maxima: Vec<(String, f64)> = tree
            .children()
            .map(|(second, leaf)| {
                let value = value_of(leaf.leaf_value().unwrap()).unwrap();
                (second.to_string(), value)
            })
            .collect();
        assert_eq!(
            maxima,
            vec![
                ("0".to_string(), 7.25),
                ("1".to_string(), 9.5),
                ("2".to_string(), 4.75),
                ("3".to_string(), -0.5),
            ],
            "nodes={nodes}"
        );
    }
}

#[test]
fn leaf_is_the_original_point() {
    let dir = tempfile::tempdir().unwrap();
    let tree = coordinator(&dir, 2).calculate("points", "max").unwrap();

    assert_eq!(
        tree.get(&["1"]).and_then(|t| t.leaf_value()),
        Some(&br#"{"ts":1.3,"value":9.5}"#[..])
    );
}

#[test]
fn appended_points_are_picked_up_by_the_next_calculation() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(&dir, 3);
    let storage = DirectoryStorage::new(dir.path(), Vec::new());
    let before = storage.length_of("points").unwrap();

    storage
        .append_records("points", [br#"{"ts":3.9,"value":12.0}"#])
        .unwrap();
    assert!(storage.length_of("points").unwrap() > before);

    let tree = coordinator.calculate("points", "max").unwrap();
    let top = tree.get(&["3"]).and_then(|t| t.leaf_value()).unwrap();
    assert_eq!(value_of(top).unwrap(), 12.0);
}
