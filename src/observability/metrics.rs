//! Index driver counters
//!
//! - Counters only, monotonic
//! - Atomic, `Relaxed` ordering (values are read for reporting only)

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared by a driver and every save it runs
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    indexes_created: AtomicU64,
    indexes_deleted: AtomicU64,
    saves_completed: AtomicU64,
    saves_failed: AtomicU64,
    partitions_saved: AtomicU64,
    rows_indexed: AtomicU64,
    bitmap_import_nanos: AtomicU64,
    mapping_commit_nanos: AtomicU64,
    corrupted_indexes_removed: AtomicU64,
    lookups_evaluated: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_indexes_created(&self) {
        self.indexes_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_indexes_deleted(&self) {
        self.indexes_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_saves_completed(&self) {
        self.saves_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_saves_failed(&self) {
        self.saves_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one finished partition and the rows it indexed
    pub fn record_partition(&self, rows: u64, bitmap: Duration, mapping: Duration) {
        self.partitions_saved.fetch_add(1, Ordering::Relaxed);
        self.rows_indexed.fetch_add(rows, Ordering::Relaxed);
        self.bitmap_import_nanos
            .fetch_add(bitmap.as_nanos() as u64, Ordering::Relaxed);
        self.mapping_commit_nanos
            .fetch_add(mapping.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn increment_corrupted_removed(&self) {
        self.corrupted_indexes_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_lookups(&self) {
        self.lookups_evaluated.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            indexes_created: self.indexes_created.load(Ordering::Relaxed),
            indexes_deleted: self.indexes_deleted.load(Ordering::Relaxed),
            saves_completed: self.saves_completed.load(Ordering::Relaxed),
            saves_failed: self.saves_failed.load(Ordering::Relaxed),
            partitions_saved: self.partitions_saved.load(Ordering::Relaxed),
            rows_indexed: self.rows_indexed.load(Ordering::Relaxed),
            bitmap_import_nanos: self.bitmap_import_nanos.load(Ordering::Relaxed),
            mapping_commit_nanos: self.mapping_commit_nanos.load(Ordering::Relaxed),
            corrupted_indexes_removed: self.corrupted_indexes_removed.load(Ordering::Relaxed),
            lookups_evaluated: self.lookups_evaluated.load(Ordering::Relaxed),
        }
    }

    /// Snapshot serialized as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub indexes_created: u64,
    pub indexes_deleted: u64,
    pub saves_completed: u64,
    pub saves_failed: u64,
    pub partitions_saved: u64,
    pub rows_indexed: u64,
    pub bitmap_import_nanos: u64,
    pub mapping_commit_nanos: u64,
    pub corrupted_indexes_removed: u64,
    pub lookups_evaluated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.rows_indexed, 0);
        assert_eq!(snapshot.saves_completed, 0);
    }

    #[test]
    fn test_record_partition() {
        let registry = MetricsRegistry::new();
        registry.record_partition(10, Duration::from_nanos(5), Duration::from_nanos(7));
        registry.record_partition(3, Duration::from_nanos(1), Duration::from_nanos(1));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.partitions_saved, 2);
        assert_eq!(snapshot.rows_indexed, 13);
        assert_eq!(snapshot.bitmap_import_nanos, 6);
        assert_eq!(snapshot.mapping_commit_nanos, 8);
    }

    #[test]
    fn test_to_json() {
        let registry = MetricsRegistry::new();
        registry.increment_saves_completed();
        registry.increment_corrupted_removed();

        let parsed: serde_json::Value = serde_json::from_str(&registry.to_json()).unwrap();
        assert_eq!(parsed["saves_completed"], 1);
        assert_eq!(parsed["corrupted_indexes_removed"], 1);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        reg.increment_lookups();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.snapshot().lookups_evaluated, 800);
    }
}
