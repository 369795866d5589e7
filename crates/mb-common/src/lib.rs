//! Shared domain types for the metricboard streaming server.
//!
//! These types cross the boundary between the session transport, the
//! per-session subscription engine (`mb-core`), and the capability
//! implementations (`DataSource` / `MetricBoard`) that supply metric data
//! and panel metadata.

pub mod logging;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Upper bound on the number of points a single fetch may request or return.
pub const MAX_PANEL_DATA_POINTS: i64 = 100_000;

/// A half-closed time window over which metric samples are requested.
///
/// `end == 0` is a sentinel meaning "stream up to now on each refresh tick".
/// All timestamps are microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub start: i64,
    pub end: i64,
    pub resolution: i64,
}

impl MetricQuery {
    pub fn new(start: i64, end: i64, resolution: i64) -> Self {
        Self { start, end, resolution }
    }

    /// Resolve the `end == 0` streaming sentinel against `now` and clamp an
    /// inverted window (`start > end`) to zero width, matching the
    /// reference behavior rather than rejecting it outright.
    pub fn normalize(mut self, now: i64) -> Self {
        if self.end == 0 {
            self.end = now;
        }
        if self.start > self.end {
            self.end = self.start;
        }
        self
    }

    /// Number of points a fetch of this window would request at its resolution.
    pub fn point_count(&self) -> i64 {
        if self.resolution <= 0 {
            return i64::MAX;
        }
        (self.end - self.start) / self.resolution
    }
}

/// The kind of aggregation a [`Metric`] batch represents. Aggregation is
/// computed upstream; the core only transports the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricLineType {
    Instance,
    GroupMean,
    GroupVariance,
}

impl Default for MetricLineType {
    fn default() -> Self {
        MetricLineType::Instance
    }
}

/// A batch of samples for one panel, produced by a `DataSource` fetch.
///
/// Invariant: `timestamps.len() == values.len()`; timestamps are strictly
/// increasing and aligned to multiples of the query's resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub panel_id: String,
    #[serde(rename = "type")]
    pub line_type: MetricLineType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    pub timestamps: Vec<u64>,
    pub values: Vec<f32>,
}

/// The panel-scoped JSON envelope that precedes a metric's binary frames on
/// the result stream, or carries an error in isolation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub line_type: Option<MetricLineType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The outcome of a single panel fetch: a batch to encode, or an error to
/// report. Consumed exactly once by the output encoder.
#[derive(Debug, Clone)]
pub enum MetricResult {
    Metric { panel_id: String, metric: Metric },
    Error { panel_id: Option<String>, error: String },
}

impl MetricResult {
    pub fn error(panel_id: impl Into<String>, error: impl std::fmt::Display) -> Self {
        MetricResult::Error { panel_id: Some(panel_id.into()), error: error.to_string() }
    }

    /// A validation error with no associated panel (e.g. a malformed command).
    pub fn global_error(error: impl std::fmt::Display) -> Self {
        MetricResult::Error { panel_id: None, error: error.to_string() }
    }
}

// ---------------------------------------------------------------------
// Command stream schema
// ---------------------------------------------------------------------

/// `time` sub-command: replaces the session's active query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeUpdateCommand {
    pub start: i64,
    pub end: i64,
    pub resolution: i64,
}

/// `panels` sub-command: replaces the active panel set and forces a reset
/// (full refetch) for any listed panel id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelsUpdateCommand {
    pub active: Vec<String>,
    #[serde(default)]
    pub reset: Vec<String>,
}

/// One inbound message on the command stream. Any subset of fields may be
/// present; each sub-command is applied independently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeUpdateCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panels: Option<PanelsUpdateCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<i64>,
}

// ---------------------------------------------------------------------
// Dashboard / panel metadata (MetricBoard capability)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Panel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub units: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Row {
    pub title: String,
    pub description: String,
    pub heights: Vec<u32>,
    pub widths: Vec<u32>,
    pub panels: Vec<Panel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub id: String,
    pub title: String,
    pub description: String,
    pub rows: Vec<Row>,
}

impl Dashboard {
    /// Flattened panel ids across all rows, in display order.
    pub fn panel_ids(&self) -> Vec<String> {
        self.rows.iter().flat_map(|row| row.panels.iter().map(|p| p.id.clone())).collect()
    }
}

// ---------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MetricBoardError {
    #[error("invalid command: {0}")]
    Validation(String),
    #[error("data source failed: {0}")]
    DataSource(String),
    #[error("dashboard not found: {0}")]
    DashboardNotFound(String),
    #[error("panel not found: {0}")]
    PanelNotFound(String),
    #[error("pool is stopped")]
    PoolStopped,
    #[error("trigger misuse: {0}")]
    TriggerMisuse(String),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MetricBoardError>;
