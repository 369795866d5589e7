//! Internal error type for the subscription engine.
//!
//! Distinct from [`mb_common::MetricBoardError`]: that type crosses the
//! session boundary (it is what gets published on the result stream); this
//! one stays inside the engine and covers worker-pool and trigger misuse,
//! which are programmer errors rather than reportable failures.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("submit called after pool stop")]
    PoolStopped,
    #[error("trigger done() called without a matching add()")]
    TriggerUnbalanced,
    #[error("trigger armed more than once")]
    TriggerAlreadyArmed,
    #[error("data source failed: {0}")]
    DataSource(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
