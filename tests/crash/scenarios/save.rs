//! Crash while an index is being saved
//!
//! Whatever the point, the index is still marked as processing after the
//! crash: the next load removes it and keeps its siblings.

use std::fs;

use bitindex::crash_point::points;
use bitindex::index::{mapping_file_name, mapping_key, PROCESSING_FILE_NAME};
use tempfile::TempDir;

use crate::crash::harness::{child_dir, report_failure, run_child};
use crate::crash::utils::{create, driver, save, DB, TABLE};

const CHILD: &str = "crash::scenarios::save::child_save";

#[test]
fn child_save() {
    let Some(dir) = child_dir() else {
        return;
    };
    let d = driver(&dir);
    let index = create(&d, "crashed");
    save(&d, &index);
}

fn crash_during_save(point: &str) {
    let dir = TempDir::new().unwrap();
    let d = driver(dir.path());
    let valid = create(&d, "valid");
    save(&d, &valid);

    let result = run_child(CHILD, point, dir.path());
    if !result.crashed {
        report_failure(point, "child aborts during save", &result);
    }
    assert!(result.crashed);
    assert!(d
        .index_dir(DB, TABLE, "crashed")
        .join(PROCESSING_FILE_NAME)
        .exists());

    let d = driver(dir.path());
    let loaded = d.load_all(DB, TABLE).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id(), "valid");
    assert!(!d.index_dir(DB, TABLE, "crashed").exists());
    assert_eq!(d.metrics().snapshot().corrupted_indexes_removed, 1);
}

#[test]
fn test_crash_after_save_marker() {
    crash_during_save(points::SAVE_AFTER_PROCESSING_MARKER);
}

#[test]
fn test_crash_after_bitmap_import() {
    crash_during_save(points::SAVE_AFTER_BITMAP_IMPORT);
}

#[test]
fn test_crash_after_mapping_commit() {
    let dir = TempDir::new().unwrap();
    let d = driver(dir.path());
    let result = run_child(CHILD, points::SAVE_AFTER_MAPPING_COMMIT, dir.path());
    if !result.crashed {
        report_failure(
            points::SAVE_AFTER_MAPPING_COMMIT,
            "child aborts after a batch commit",
            &result,
        );
    }
    assert!(result.crashed);

    // the first batch reached the mapping log, yet the index stays unusable
    let crashed_dir = d.index_dir(DB, TABLE, "crashed");
    let mapping_file = crashed_dir.join(mapping_file_name(&mapping_key(b"p1")));
    assert!(fs::metadata(&mapping_file).unwrap().len() > 0);
    assert!(crashed_dir.join(PROCESSING_FILE_NAME).exists());

    let d = driver(dir.path());
    assert!(d.load_all(DB, TABLE).unwrap().is_empty());
    assert!(!crashed_dir.exists());
}

#[test]
fn test_crash_before_marker_remove() {
    crash_during_save(points::SAVE_BEFORE_MARKER_REMOVE);
}
