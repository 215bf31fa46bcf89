//! Batched import of set bits
//!
//! While a partition is streamed, every `(rowID, columnID)` pair is
//! buffered per expression. Every `batch_size` columns, and once at the
//! end, the buffers are imported into the bitmap fields and the mapping
//! transaction is committed. A crash loses at most one batch, and the
//! processing marker still flags the index.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bitmap::Field;
use crate::crash_point::{maybe_crash, points};
use crate::mapping::Mapping;
use crate::observability::Logger;

use super::errors::IndexResult;

/// Upper bound of the per-batch buffers reserved up front
const MAX_PREALLOCATED: usize = 64 * 1024;

/// `(rowID, columnID)` pairs waiting for import into one field
#[derive(Debug, Clone)]
pub struct BitBatch {
    size: usize,
    rows: Vec<u64>,
    cols: Vec<u64>,
}

impl BitBatch {
    pub fn new(size: u64) -> Self {
        let size = usize::try_from(size)
            .unwrap_or(usize::MAX)
            .min(MAX_PREALLOCATED);
        Self {
            size,
            rows: Vec::with_capacity(size),
            cols: Vec::with_capacity(size),
        }
    }

    pub fn add(&mut self, row: u64, col: u64) {
        self.rows.push(row);
        self.cols.push(col);
    }

    pub fn clean(&mut self) {
        self.rows = Vec::with_capacity(self.size);
        self.cols = Vec::with_capacity(self.size);
    }

    pub fn rows(&self) -> &[u64] {
        &self.rows
    }

    pub fn cols(&self) -> &[u64] {
        &self.cols
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Fields of one partition with their pending bits and time spent
pub(crate) struct PartitionBatch {
    pub fields: Vec<Arc<Field>>,
    pub bits: Vec<BitBatch>,
    pub time_bitmap: Duration,
    pub time_mapping: Duration,
}

impl PartitionBatch {
    pub fn new(fields: Vec<Arc<Field>>, batch_size: u64) -> Self {
        let bits = fields.iter().map(|_| BitBatch::new(batch_size)).collect();
        Self {
            fields,
            bits,
            time_bitmap: Duration::ZERO,
            time_mapping: Duration::ZERO,
        }
    }

    /// Imports every pending bit, then commits the mapping transaction.
    ///
    /// `cols` is the number of columns processed so far, for logging.
    pub fn flush(&mut self, mapping: &Mapping, cols: u64, continues: bool) -> IndexResult<()> {
        let start = Instant::now();
        for (field, bits) in self.fields.iter().zip(self.bits.iter_mut()) {
            field.import_bits(bits.rows(), bits.cols())?;
            bits.clean();
        }
        self.time_bitmap += start.elapsed();
        Logger::trace(
            "BITMAP_BATCH_IMPORTED",
            &[
                ("cols", cols.to_string().as_str()),
                ("fields", self.fields.len().to_string().as_str()),
            ],
        );
        maybe_crash(points::SAVE_AFTER_BITMAP_IMPORT);

        let start = Instant::now();
        mapping.commit(continues)?;
        self.time_mapping += start.elapsed();
        maybe_crash(points::SAVE_AFTER_MAPPING_COMMIT);
        Logger::trace(
            "MAPPING_BATCH_COMMITTED",
            &[
                ("cols", cols.to_string().as_str()),
                ("continues", if continues { "true" } else { "false" }),
            ],
        );
        Ok(())
    }
}
