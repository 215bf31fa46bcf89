//! bitindex - bitmap secondary indexes over partitioned tables
//!
//! Values of the indexed expressions are translated to dense row ids by a
//! per-partition mapping log, and every row id owns a roaring bitmap of the
//! columns (rows of the table) holding that value.

pub mod bitmap;
pub mod crash_point;
pub mod index;
pub mod key;
pub mod mapping;
pub mod observability;
