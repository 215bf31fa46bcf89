//! Observability for the index driver
//!
//! - Structured JSON logging (`Logger`)
//! - Begin/complete scopes with elapsed time (`ObservationScope`, `Timer`)
//! - Atomic counters (`MetricsRegistry`)
//!
//! Observability is read-only: nothing here can fail an index operation.

mod logger;
mod metrics;
mod scope;

pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::{ObservationScope, Timer};
