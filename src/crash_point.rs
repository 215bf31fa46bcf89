//! Crash point injection for testing index durability
//!
//! A crash point is enabled through the `BITINDEX_CRASH_POINT` environment
//! variable. When the running code reaches the named point the process is
//! terminated with `std::process::abort()`: no cleanup, no unwinding.
//!
//! The points sit around the processing-marker lifecycle, which is what a
//! crash-recovery run has to observe on the next `LoadAll`.
//!
//! ```bash
//! BITINDEX_CRASH_POINT=save_before_marker_remove ./indexer
//! ```

use std::sync::OnceLock;

/// Cached crash point name
static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn get_crash_point() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var("BITINDEX_CRASH_POINT").ok())
        .as_deref()
}

/// Returns true if `BITINDEX_CRASH_POINT` equals the given name.
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    get_crash_point().map(|p| p == name).unwrap_or(false)
}

/// Abort the process if the named crash point is enabled.
///
/// No-op when `BITINDEX_CRASH_POINT` is unset or names another point.
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        eprintln!("[CRASH] Triggering crash at point: {}", name);
        std::process::abort();
    }
}

/// All defined crash point names
pub mod points {
    // Create
    pub const CREATE_AFTER_PROCESSING_MARKER: &str = "create_after_processing_marker";

    // Save
    pub const SAVE_AFTER_PROCESSING_MARKER: &str = "save_after_processing_marker";
    pub const SAVE_AFTER_BITMAP_IMPORT: &str = "save_after_bitmap_import";
    pub const SAVE_AFTER_MAPPING_COMMIT: &str = "save_after_mapping_commit";
    pub const SAVE_BEFORE_MARKER_REMOVE: &str = "save_before_marker_remove";

    // Delete
    pub const DELETE_AFTER_DIRECTORY_REMOVE: &str = "delete_after_directory_remove";

    /// Get all crash point names
    pub fn all() -> &'static [&'static str] {
        &[
            CREATE_AFTER_PROCESSING_MARKER,
            SAVE_AFTER_PROCESSING_MARKER,
            SAVE_AFTER_BITMAP_IMPORT,
            SAVE_AFTER_MAPPING_COMMIT,
            SAVE_BEFORE_MARKER_REMOVE,
            DELETE_AFTER_DIRECTORY_REMOVE,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_point_disabled_by_default() {
        assert!(!crash_point_enabled("test_point"));
    }

    #[test]
    fn test_all_crash_points_defined() {
        let all = points::all();
        assert_eq!(all.len(), 6);
        assert!(all.contains(&"save_before_marker_remove"));
        assert!(all.contains(&"create_after_processing_marker"));
    }

    #[test]
    fn test_crash_point_names_are_lowercase_with_underscores() {
        for point in points::all() {
            assert!(
                point.chars().all(|c| c.is_lowercase() || c == '_'),
                "Crash point '{}' should be lowercase with underscores",
                point
            );
        }
    }
}
