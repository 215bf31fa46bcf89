//! Crash between removing the index directory and dropping its fields

use bitindex::crash_point::points;
use bitindex::index::{KeyPartition, VecPartitionIter};
use tempfile::TempDir;

use crate::crash::harness::{child_dir, report_failure, run_child};
use crate::crash::utils::{create, driver, save, DB, TABLE};

#[test]
fn child_delete() {
    let Some(dir) = child_dir() else {
        return;
    };
    let d = driver(&dir);
    let index = d.load_index(DB, TABLE, "doomed").unwrap();
    let mut partitions =
        VecPartitionIter::keys(vec![KeyPartition::new("p1"), KeyPartition::new("p2")]);
    d.delete(&index, &mut partitions).unwrap();
}

#[test]
fn test_crash_after_directory_remove() {
    let dir = TempDir::new().unwrap();
    let d = driver(dir.path());
    let doomed = create(&d, "doomed");
    save(&d, &doomed);
    let kept = create(&d, "kept");
    save(&d, &kept);

    let point = points::DELETE_AFTER_DIRECTORY_REMOVE;
    let result = run_child("crash::scenarios::delete::child_delete", point, dir.path());
    if !result.crashed {
        report_failure(point, "child aborts after removing the directory", &result);
    }
    assert!(result.crashed);

    let d = driver(dir.path());
    let loaded = d.load_all(DB, TABLE).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id(), "kept");
}
