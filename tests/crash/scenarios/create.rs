//! Crash while an index is being created

use bitindex::crash_point::points;
use tempfile::TempDir;

use crate::crash::harness::{child_dir, report_failure, run_child};
use crate::crash::utils::{create, driver, DB, TABLE};

#[test]
fn child_create() {
    let Some(dir) = child_dir() else {
        return;
    };
    let d = driver(&dir);
    create(&d, "crashed");
}

#[test]
fn test_crash_after_create_marker() {
    let dir = TempDir::new().unwrap();
    let d = driver(dir.path());
    create(&d, "valid");

    let point = points::CREATE_AFTER_PROCESSING_MARKER;
    let result = run_child("crash::scenarios::create::child_create", point, dir.path());
    if !result.crashed {
        report_failure(point, "child aborts after writing the marker", &result);
    }
    assert!(result.crashed);

    let d = driver(dir.path());
    let loaded = d.load_all(DB, TABLE).unwrap();
    let ids: Vec<&str> = loaded.iter().map(|i| i.id()).collect();
    assert_eq!(ids, vec!["valid"]);
    assert!(!d.index_dir(DB, TABLE, "crashed").exists());
}
