//! The per-session subscription engine: command/query state machine,
//! incremental query-diff, resizable worker pool, completion-barrier
//! trigger, and binary codec for the result stream.
//!
//! Session transport, dashboard/panel metadata lookup, and the metric data
//! source itself live outside this crate; it only depends on the
//! [`source::DataSource`] / [`source::MetricBoard`] capability traits.

pub mod codec;
pub mod diff;
pub mod error;
pub mod pool;
pub mod source;
pub mod subscription;
pub mod trigger;

pub use error::{CoreError, Result};
pub use pool::WorkerPool;
pub use source::{DataSource, MetricBoard, MetricEmit};
pub use subscription::run as run_subscription;
pub use trigger::Trigger;
