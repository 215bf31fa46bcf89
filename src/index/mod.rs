//! Bitmap secondary index driver
//!
//! Maps the values of one or more expressions of a table to the locations
//! of the rows holding them:
//!
//! - `Driver`: create, save, delete and load indexes under a root directory
//! - `Index`: lookups over a saved index
//! - `Lookup`: lazily evaluated row sets, combinable by set algebra
//!
//! # Invariants
//!
//! - An index directory holding a processing marker is never loaded
//! - Column ids follow row arrival order within a partition
//! - Range lookups return locations in arrival order (reversed descending)

mod batch;
mod config;
mod driver;
mod errors;
mod handle;
mod iter;
mod lookup;
mod names;
mod pool;

pub use batch::BitBatch;
pub use config::{
    exists_processing_file, read_processing_file, remove_processing_file, write_processing_file,
    DriverConfig, IndexConfig, ProcessingKind, CHECKSUM_KEY, CONFIG_FILE_NAME,
    DEFAULT_BATCH_SIZE, INDEX_THREADS_ENV, PROCESSING_FILE_NAME,
};
pub use driver::{Driver, BITMAP_DIR, DRIVER_ID};
pub use errors::{ErrorSeverity, IndexError, IndexResult};
pub use handle::Index;
pub use iter::{
    IndexKeyValueIter, KeyPartition, LocationIter, Partition, PartitionIndexKeyValueIter,
    PartitionIter, VecKeyValueIter, VecPartitionIter,
};
pub use lookup::{IndexLookup, Lookup, LookupKind, SetOp};
pub use names::{field_name, index_name, mapping_file_name, mapping_key};
pub use pool::{CancelToken, PoolToken, SaveContext, TokenPool};
