//! Durable mapping between indexed values, rowIDs and row locations
//!
//! Each partition of an index owns one `Mapping`, persisted as an
//! append-only log of checksummed records:
//!
//! - Value buckets assign dense rowIDs (1, 2, ...) in first-seen order
//! - Location tables resolve bitmap columnIDs back to caller locations
//! - Writes are transactional; only committed transactions survive replay
//! - A torn tail left by a crash is ignored and overwritten on next commit

mod errors;
mod record;
mod store;

pub use errors::{MappingError, MappingResult};
pub use store::Mapping;
