//! Driver Lifecycle Tests
//!
//! Tests for driver invariants:
//! - Saved indexes load back with the same lookup results
//! - A save replaces the previous content of every partition it sees
//! - Indexes left marked as processing are removed on load
//! - A failing partition cancels its siblings and its error is returned
//! - Saves of different indexes under one root do not interfere
//! - Delete cancels running saves before removing anything

use std::collections::BTreeMap;
use std::fs;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bitindex::index::{
    write_processing_file, Driver, DriverConfig, Index, IndexError, IndexKeyValueIter,
    IndexResult, KeyPartition, Partition, PartitionIndexKeyValueIter, ProcessingKind,
    SaveContext, VecPartitionIter, CONFIG_FILE_NAME, PROCESSING_FILE_NAME,
};
use bitindex::key::IndexKey;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn driver(dir: &TempDir) -> Driver {
    Driver::new(DriverConfig::new(dir.path()).with_batch_size(3))
}

fn create(driver: &Driver, table: &str, id: &str) -> Index {
    driver
        .create("db", table, id, vec!["v".to_string()], BTreeMap::new())
        .unwrap()
}

/// `n` rows per partition, value `i % 4`, location `<partition>/<i>`
fn partitions(keys: &[&str], n: i64) -> VecPartitionIter {
    VecPartitionIter::new(
        keys.iter()
            .map(|k| {
                let rows = (0..n)
                    .map(|i| (vec![IndexKey::Int64(i % 4)], format!("{}/{}", k, i).into_bytes()))
                    .collect();
                (KeyPartition::new(*k), rows)
            })
            .collect(),
    )
}

fn lookup(index: &Index, partition: &str, value: i64) -> IndexResult<Vec<String>> {
    let locations = index
        .get(&[IndexKey::Int64(value)])?
        .values(&KeyPartition::new(partition))?
        .collect_locations()?;
    Ok(locations
        .into_iter()
        .map(|l| String::from_utf8(l).unwrap())
        .collect())
}

// =============================================================================
// Save and Load Tests
// =============================================================================

#[test]
fn test_saved_index_loads_in_new_driver() {
    let dir = TempDir::new().unwrap();
    {
        let d = driver(&dir);
        let index = create(&d, "t", "i");
        d.save(&SaveContext::new(), &index, &mut partitions(&["p1", "p2"], 10))
            .unwrap();
    }

    let d = driver(&dir);
    let loaded = d.load_all("db", "t").unwrap();
    assert_eq!(loaded.len(), 1);
    let index = &loaded[0];
    assert_eq!(index.expressions(), &["v".to_string()]);
    assert_eq!(index.partitions().len(), 2);

    assert_eq!(lookup(index, "p1", 1).unwrap(), vec!["p1/1", "p1/5", "p1/9"]);
    assert_eq!(lookup(index, "p2", 3).unwrap(), vec!["p2/3", "p2/7"]);
}

#[test]
fn test_parallel_partitions() {
    let dir = TempDir::new().unwrap();
    let d = driver(&dir);
    let index = create(&d, "t", "i");
    let keys: Vec<String> = (0..8).map(|i| format!("p{}", i)).collect();
    let key_refs: Vec<&str> = keys.iter().map(|s| s.as_str()).collect();

    let ctx = SaveContext::new().with_threads(4);
    d.save(&ctx, &index, &mut partitions(&key_refs, 20)).unwrap();

    for key in &keys {
        assert_eq!(lookup(&index, key, 0).unwrap().len(), 5);
    }
    assert_eq!(d.metrics().snapshot().partitions_saved, 8);
    assert_eq!(d.metrics().snapshot().rows_indexed, 160);
}

#[test]
fn test_resave_replaces_partition_content() {
    let dir = TempDir::new().unwrap();
    let d = driver(&dir);
    let index = create(&d, "t", "i");
    d.save(&SaveContext::new(), &index, &mut partitions(&["p"], 8))
        .unwrap();
    assert_eq!(lookup(&index, "p", 2).unwrap(), vec!["p/2", "p/6"]);

    d.save(&SaveContext::new(), &index, &mut partitions(&["p"], 3))
        .unwrap();
    assert_eq!(lookup(&index, "p", 2).unwrap(), vec!["p/2"]);
    assert!(lookup(&index, "p", 3).unwrap().is_empty());
}

#[test]
fn test_null_values_are_not_indexed() {
    let dir = TempDir::new().unwrap();
    let d = driver(&dir);
    let index = create(&d, "t", "i");
    let rows = vec![
        (vec![IndexKey::Null], b"a".to_vec()),
        (vec![IndexKey::Int64(1)], b"b".to_vec()),
    ];
    let mut iter = VecPartitionIter::new(vec![(KeyPartition::new("p"), rows)]);
    d.save(&SaveContext::new(), &index, &mut iter).unwrap();

    assert_eq!(lookup(&index, "p", 1).unwrap(), vec!["b"]);
    let not = index
        .not(&[IndexKey::Int64(1)])
        .unwrap()
        .values(&KeyPartition::new("p"))
        .unwrap()
        .collect_locations()
        .unwrap();
    assert!(not.is_empty());
}

#[test]
fn test_lookup_on_unsaved_partition() {
    let dir = TempDir::new().unwrap();
    let d = driver(&dir);
    let index = create(&d, "t", "i");

    let err = lookup(&index, "p", 1).unwrap_err();
    assert!(matches!(err, IndexError::MappingNotFound(_)));
}

// =============================================================================
// Corruption Tests
// =============================================================================

/// A leftover marker removes that index only.
#[test]
fn test_processing_marker_removes_index_on_load() {
    let dir = TempDir::new().unwrap();
    let d = driver(&dir);
    let good = create(&d, "t", "good");
    d.save(&SaveContext::new(), &good, &mut partitions(&["p"], 4))
        .unwrap();
    let bad = create(&d, "t", "bad");
    d.save(&SaveContext::new(), &bad, &mut partitions(&["p"], 4))
        .unwrap();

    let bad_dir = d.index_dir("db", "t", "bad");
    write_processing_file(&bad_dir.join(PROCESSING_FILE_NAME), ProcessingKind::Save).unwrap();

    let d = driver(&dir);
    let err = d.load_index("db", "t", "bad").unwrap_err();
    assert!(err.is_corrupted());
    assert!(!bad_dir.exists());

    let loaded = d.load_all("db", "t").unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id(), "good");
    assert_eq!(lookup(&loaded[0], "p", 0).unwrap(), vec!["p/0"]);
}

#[test]
fn test_missing_config_is_corrupted() {
    let dir = TempDir::new().unwrap();
    let d = driver(&dir);
    create(&d, "t", "i");
    fs::remove_file(d.index_dir("db", "t", "i").join(CONFIG_FILE_NAME)).unwrap();

    assert!(d.load_index("db", "t", "i").unwrap_err().is_corrupted());
    assert!(d.load_all("db", "t").unwrap().is_empty());
}

struct FailingPartitions;

impl PartitionIndexKeyValueIter for FailingPartitions {
    fn next(&mut self) -> IndexResult<Option<(Box<dyn Partition>, Box<dyn IndexKeyValueIter>)>> {
        Err(IndexError::Iterator("source unavailable".to_string()))
    }
}

#[test]
fn test_iterator_error_fails_save_and_keeps_marker() {
    let dir = TempDir::new().unwrap();
    let d = driver(&dir);
    let index = create(&d, "t", "i");

    let err = d
        .save(&SaveContext::new(), &index, &mut FailingPartitions)
        .unwrap_err();
    assert!(matches!(err, IndexError::Iterator(_)));
    assert!(d
        .index_dir("db", "t", "i")
        .join(PROCESSING_FILE_NAME)
        .exists());
    assert!(d.load_all("db", "t").unwrap().is_empty());
}

// =============================================================================
// Isolation and Deletion Tests
// =============================================================================

#[test]
fn test_concurrent_saves_of_two_indexes() {
    let dir = TempDir::new().unwrap();
    let d = driver(&dir);
    let first = create(&d, "t", "first");
    let second = create(&d, "t", "second");

    thread::scope(|s| {
        s.spawn(|| {
            d.save(&SaveContext::new(), &first, &mut partitions(&["p1", "p2"], 50))
                .unwrap()
        });
        s.spawn(|| {
            d.save(&SaveContext::new(), &second, &mut partitions(&["p1", "p2"], 30))
                .unwrap()
        });
    });

    let d = driver(&dir);
    let loaded = d.load_all("db", "t").unwrap();
    assert_eq!(loaded.len(), 2);
    for index in &loaded {
        let expected = if index.id() == "first" { 13 } else { 8 };
        assert_eq!(lookup(index, "p1", 0).unwrap().len(), expected);
        assert_eq!(lookup(index, "p2", 0).unwrap().len(), expected);
    }
}

#[test]
fn test_delete_removes_index() {
    let dir = TempDir::new().unwrap();
    let d = driver(&dir);
    let index = create(&d, "t", "i");
    d.save(&SaveContext::new(), &index, &mut partitions(&["p"], 4))
        .unwrap();

    let mut parts = VecPartitionIter::keys(vec![KeyPartition::new("p")]);
    d.delete(&index, &mut parts).unwrap();

    assert!(!d.index_dir("db", "t", "i").exists());
    assert!(index.partitions().is_empty());
    assert!(d.load_all("db", "t").unwrap().is_empty());
    assert_eq!(d.metrics().snapshot().indexes_deleted, 1);
}

const SLOW_ROWS: i64 = 100_000;

/// Rows produced slowly until the save is cancelled
struct SlowRows {
    next: i64,
    produced: Arc<AtomicI64>,
}

impl SlowRows {
    fn new(produced: &Arc<AtomicI64>) -> Self {
        Self {
            next: 0,
            produced: Arc::clone(produced),
        }
    }
}

impl IndexKeyValueIter for SlowRows {
    fn next(&mut self) -> IndexResult<Option<(Vec<IndexKey>, Vec<u8>)>> {
        self.produced.fetch_add(1, Ordering::SeqCst);
        if self.next >= SLOW_ROWS {
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(1));
        self.next += 1;
        Ok(Some((vec![IndexKey::Int64(self.next)], self.next.to_string().into_bytes())))
    }
}

struct SlowPartition(Option<SlowRows>);

impl PartitionIndexKeyValueIter for SlowPartition {
    fn next(&mut self) -> IndexResult<Option<(Box<dyn Partition>, Box<dyn IndexKeyValueIter>)>> {
        Ok(self.0.take().map(|rows| {
            (
                Box::new(KeyPartition::new("p")) as Box<dyn Partition>,
                Box::new(rows) as Box<dyn IndexKeyValueIter>,
            )
        }))
    }
}

#[test]
fn test_delete_cancels_running_save() {
    let dir = TempDir::new().unwrap();
    let d = driver(&dir);
    let index = create(&d, "t", "i");
    let produced = Arc::new(AtomicI64::new(0));

    thread::scope(|s| {
        let save = s.spawn(|| {
            let mut iter = SlowPartition(Some(SlowRows::new(&produced)));
            d.save(&SaveContext::new(), &index, &mut iter)
        });

        while produced.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        let mut parts = VecPartitionIter::keys(vec![KeyPartition::new("p")]);
        d.delete(&index, &mut parts).unwrap();

        let err = save.join().unwrap().unwrap_err();
        assert!(matches!(err, IndexError::Cancelled));
    });

    assert!(!d.index_dir("db", "t", "i").exists());
}

/// Fails on its first row, once the sibling partition is producing rows
struct BrokenRows {
    sibling: Arc<AtomicI64>,
}

impl IndexKeyValueIter for BrokenRows {
    fn next(&mut self) -> IndexResult<Option<(Vec<IndexKey>, Vec<u8>)>> {
        while self.sibling.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        Err(IndexError::Iterator("row source failed".to_string()))
    }
}

/// A slow partition followed by a broken one
struct SlowThenBroken {
    slow: Option<SlowRows>,
    broken: Option<BrokenRows>,
}

impl PartitionIndexKeyValueIter for SlowThenBroken {
    fn next(&mut self) -> IndexResult<Option<(Box<dyn Partition>, Box<dyn IndexKeyValueIter>)>> {
        if let Some(rows) = self.slow.take() {
            return Ok(Some((
                Box::new(KeyPartition::new("slow")) as Box<dyn Partition>,
                Box::new(rows) as Box<dyn IndexKeyValueIter>,
            )));
        }
        Ok(self.broken.take().map(|rows| {
            (
                Box::new(KeyPartition::new("broken")) as Box<dyn Partition>,
                Box::new(rows) as Box<dyn IndexKeyValueIter>,
            )
        }))
    }
}

#[test]
fn test_failing_partition_cancels_siblings() {
    let dir = TempDir::new().unwrap();
    let d = driver(&dir);
    let index = create(&d, "t", "i");
    let produced = Arc::new(AtomicI64::new(0));

    let mut iter = SlowThenBroken {
        slow: Some(SlowRows::new(&produced)),
        broken: Some(BrokenRows {
            sibling: Arc::clone(&produced),
        }),
    };
    let ctx = SaveContext::new().with_threads(2);
    let err = d.save(&ctx, &index, &mut iter).unwrap_err();

    match err {
        IndexError::Iterator(msg) => assert_eq!(msg, "row source failed"),
        other => panic!("expected the failing partition's error, got {:?}", other),
    }
    assert!(produced.load(Ordering::SeqCst) < SLOW_ROWS);
    assert!(d
        .index_dir("db", "t", "i")
        .join(PROCESSING_FILE_NAME)
        .exists());
    assert_eq!(d.metrics().snapshot().saves_failed, 1);
}
