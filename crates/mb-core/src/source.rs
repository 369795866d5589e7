//! Capability interfaces the subscription engine is built against.
//!
//! Both are external collaborators: the engine only calls through these
//! traits and never assumes anything about where the data or metadata
//! actually comes from.

use async_trait::async_trait;
use mb_common::{Dashboard, Metric, MetricQuery, Panel};
use tokio_util::sync::CancellationToken;

/// Sink a `DataSource` emits zero or more [`Metric`] batches into while a
/// fetch is running. Backed by the result channel in production, so `emit`
/// carries the same back-pressure the channel does.
#[async_trait]
pub trait MetricEmit: Send + Sync {
    async fn emit(&self, metric: Metric);
}

/// Supplies metric samples for a panel over a time window.
///
/// `get_metric` may call `emit` any number of times before returning; once
/// it returns, no further emits for that call are valid.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn get_metric(
        &self,
        ctx: CancellationToken,
        panel_id: &str,
        query: MetricQuery,
        emit: &dyn MetricEmit,
    ) -> anyhow::Result<()>;
}

/// Superset of [`DataSource`] that also resolves dashboard/panel metadata.
/// The engine never interprets display strings, sizing hints, or units —
/// it only forwards ids and uses `panel_ids()` to seed a session.
#[async_trait]
pub trait MetricBoard: DataSource {
    async fn get_dashboard(&self, ctx: CancellationToken, dashboard_id: &str) -> anyhow::Result<Dashboard>;
    async fn get_panel(&self, ctx: CancellationToken, panel_id: &str) -> anyhow::Result<Panel>;
}
