//! Crash testing for the index driver
//!
//! - Crash injection at the points listed in `bitindex::crash_point::points`
//! - Child process management
//! - Post-crash validation

pub mod harness;
pub mod scenarios;
pub mod utils;
