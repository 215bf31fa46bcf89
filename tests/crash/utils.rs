//! Shared fixtures for crash scenarios

use std::collections::BTreeMap;
use std::path::Path;

use bitindex::index::{
    Driver, DriverConfig, Index, KeyPartition, SaveContext, VecPartitionIter,
};
use bitindex::key::IndexKey;

pub const DB: &str = "db";
pub const TABLE: &str = "t";

pub fn driver(root: &Path) -> Driver {
    Driver::new(DriverConfig::new(root).with_batch_size(2).with_threads(1))
}

pub fn create(driver: &Driver, id: &str) -> Index {
    driver
        .create(DB, TABLE, id, vec!["a".to_string()], BTreeMap::new())
        .unwrap()
}

/// Two partitions of three rows each
pub fn partitions() -> VecPartitionIter {
    let rows = |prefix: &str| {
        (0..3)
            .map(|i| {
                (
                    vec![IndexKey::Int64(i)],
                    format!("{}-{}", prefix, i).into_bytes(),
                )
            })
            .collect::<Vec<_>>()
    };
    VecPartitionIter::new(vec![
        (KeyPartition::new("p1"), rows("p1")),
        (KeyPartition::new("p2"), rows("p2")),
    ])
}

pub fn save(driver: &Driver, index: &Index) {
    driver
        .save(&SaveContext::new(), index, &mut partitions())
        .unwrap();
}
