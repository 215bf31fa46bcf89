//! Iterators crossing the driver boundary
//!
//! Input: partitions, each yielding `(values, location)` rows.
//! Output: `LocationIter`, the row locations matched by a lookup.

use std::sync::Arc;

use crate::key::IndexKey;
use crate::mapping::Mapping;

use super::errors::{IndexError, IndexResult};

/// A shard of the indexed table.
///
/// The key must be stable across runs: field and mapping file names are
/// derived from it.
pub trait Partition: Send + Sync {
    fn key(&self) -> &[u8];
}

/// Rows of one partition: the value of every indexed expression and the
/// opaque location of the row
pub trait IndexKeyValueIter: Send {
    fn next(&mut self) -> IndexResult<Option<(Vec<IndexKey>, Vec<u8>)>>;

    fn close(&mut self) -> IndexResult<()> {
        Ok(())
    }
}

/// Source of a save: partitions with their rows
pub trait PartitionIndexKeyValueIter {
    fn next(&mut self) -> IndexResult<Option<(Box<dyn Partition>, Box<dyn IndexKeyValueIter>)>>;

    fn close(&mut self) -> IndexResult<()> {
        Ok(())
    }
}

/// Partitions of a table, used by delete
pub trait PartitionIter {
    fn next(&mut self) -> IndexResult<Option<Box<dyn Partition>>>;

    fn close(&mut self) -> IndexResult<()> {
        Ok(())
    }
}

/// Partition identified by an owned byte key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPartition(pub Vec<u8>);

impl KeyPartition {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self(key.into())
    }
}

impl Partition for KeyPartition {
    fn key(&self) -> &[u8] {
        &self.0
    }
}

/// In-memory rows of one partition
#[derive(Debug)]
pub struct VecKeyValueIter {
    rows: std::vec::IntoIter<(Vec<IndexKey>, Vec<u8>)>,
}

impl VecKeyValueIter {
    pub fn new(rows: Vec<(Vec<IndexKey>, Vec<u8>)>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl IndexKeyValueIter for VecKeyValueIter {
    fn next(&mut self) -> IndexResult<Option<(Vec<IndexKey>, Vec<u8>)>> {
        Ok(self.rows.next())
    }
}

/// In-memory partitioned rows
#[derive(Debug)]
pub struct VecPartitionIter {
    partitions: std::vec::IntoIter<(KeyPartition, Vec<(Vec<IndexKey>, Vec<u8>)>)>,
}

impl VecPartitionIter {
    pub fn new(partitions: Vec<(KeyPartition, Vec<(Vec<IndexKey>, Vec<u8>)>)>) -> Self {
        Self {
            partitions: partitions.into_iter(),
        }
    }

    /// Partitions only, for delete
    pub fn keys(partitions: Vec<KeyPartition>) -> Self {
        Self::new(partitions.into_iter().map(|p| (p, Vec::new())).collect())
    }
}

impl PartitionIndexKeyValueIter for VecPartitionIter {
    fn next(&mut self) -> IndexResult<Option<(Box<dyn Partition>, Box<dyn IndexKeyValueIter>)>> {
        Ok(self.partitions.next().map(|(p, rows)| {
            (
                Box::new(p) as Box<dyn Partition>,
                Box::new(VecKeyValueIter::new(rows)) as Box<dyn IndexKeyValueIter>,
            )
        }))
    }
}

impl PartitionIter for VecPartitionIter {
    fn next(&mut self) -> IndexResult<Option<Box<dyn Partition>>> {
        Ok(self
            .partitions
            .next()
            .map(|(p, _)| Box::new(p) as Box<dyn Partition>))
    }
}

#[derive(Debug)]
enum Source {
    /// Resolved one column at a time
    Columns {
        index: String,
        columns: std::vec::IntoIter<u64>,
    },
    /// Already resolved and ordered
    Sorted(std::vec::IntoIter<Vec<u8>>),
}

/// Locations matched by a lookup in one partition.
///
/// Holds the partition mapping open until closed or dropped. Not restartable.
#[derive(Debug)]
pub struct LocationIter {
    mapping: Option<Arc<Mapping>>,
    source: Source,
}

impl LocationIter {
    /// `mapping` must already be open; the iterator takes over that client
    pub(crate) fn columns(mapping: Arc<Mapping>, index: &str, columns: Vec<u64>) -> Self {
        Self {
            mapping: Some(mapping),
            source: Source::Columns {
                index: index.to_string(),
                columns: columns.into_iter(),
            },
        }
    }

    pub(crate) fn sorted(mapping: Arc<Mapping>, locations: Vec<Vec<u8>>) -> Self {
        Self {
            mapping: Some(mapping),
            source: Source::Sorted(locations.into_iter()),
        }
    }

    /// Releases the mapping; later calls to `next` return `None`
    pub fn close(&mut self) {
        if let Some(mapping) = self.mapping.take() {
            mapping.close();
        }
    }

    /// Drains the remaining locations
    pub fn collect_locations(mut self) -> IndexResult<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        for loc in &mut self {
            out.push(loc?);
        }
        self.close();
        Ok(out)
    }
}

impl Iterator for LocationIter {
    type Item = IndexResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mapping = self.mapping.as_ref()?;
        match &mut self.source {
            Source::Sorted(locations) => locations.next().map(Ok),
            Source::Columns { index, columns } => {
                let col = columns.next()?;
                Some(match mapping.get_location(index, col) {
                    Ok(Some(location)) => Ok(location),
                    Ok(None) => Err(IndexError::Mapping(crate::mapping::MappingError::Decode(
                        format!("column {} of {} has no location", col, index),
                    ))),
                    Err(e) => Err(e.into()),
                })
            }
        }
    }
}

impl Drop for LocationIter {
    fn drop(&mut self) {
        self.close();
    }
}
