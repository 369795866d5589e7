//! Deterministic synthetic `MetricBoard` used by the demo server: no real
//! time-series backend, just enough structure to exercise the subscription
//! engine end to end.

use std::hash::Hasher;

use async_trait::async_trait;
use mb_common::{Dashboard, Metric, MetricLineType, MetricQuery, Panel, Row};
use mb_core::source::{DataSource, MetricBoard, MetricEmit};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;

pub struct MockMetricBoard;

#[async_trait]
impl DataSource for MockMetricBoard {
    async fn get_metric(
        &self,
        _ctx: CancellationToken,
        panel_id: &str,
        query: MetricQuery,
        emit: &dyn MetricEmit,
    ) -> anyhow::Result<()> {
        let resolution = query.resolution.max(1);
        let mut t = query.start - (query.start % resolution);
        let mut timestamps = Vec::new();
        let mut values = Vec::new();
        while t <= query.end {
            timestamps.push(t as u64);
            values.push(synthetic_value(panel_id, t));
            t += resolution;
        }
        emit.emit(Metric {
            panel_id: panel_id.to_string(),
            line_type: MetricLineType::Instance,
            group: None,
            labels: None,
            timestamps,
            values,
        })
        .await;
        Ok(())
    }
}

#[async_trait]
impl MetricBoard for MockMetricBoard {
    async fn get_dashboard(&self, _ctx: CancellationToken, dashboard_id: &str) -> anyhow::Result<Dashboard> {
        Ok(Dashboard {
            id: dashboard_id.to_string(),
            title: "dashboard title".into(),
            description: "dashboard description".into(),
            rows: vec![Row {
                title: "row title".into(),
                description: "row description".into(),
                heights: vec![8],
                widths: vec![12, 12],
                panels: vec![
                    Panel { id: "panel-id-1".into(), name: "panel name 1".into(), description: "panel description 1".into(), units: "ms".into() },
                    Panel { id: "panel-id-2".into(), name: "panel name 2".into(), description: "panel description 2".into(), units: "%".into() },
                ],
            }],
        })
    }

    async fn get_panel(&self, _ctx: CancellationToken, panel_id: &str) -> anyhow::Result<Panel> {
        Ok(Panel { id: panel_id.to_string(), name: "panel name 1".into(), description: "panel description 1".into(), units: "ms".into() })
    }
}

/// A hash of `(panel_id, timestamp)` seeds a per-point PRNG for jitter on
/// top of a one-minute sine wave, so repeated fetches of the same point are
/// stable but panels don't all look identical.
fn synthetic_value(panel_id: &str, timestamp_micros: i64) -> f32 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    hasher.write(panel_id.as_bytes());
    hasher.write_i64(timestamp_micros);
    let seed = hasher.finish();

    let mut rng = StdRng::seed_from_u64(seed);
    let jitter: f32 = rng.gen_range(-0.05..0.05);

    let minute_micros = 60_000_000f64;
    let phase = 2.0 * std::f64::consts::PI * (timestamp_micros as f64 % minute_micros) / minute_micros;
    phase.sin() as f32 + jitter
}
