//! The session-scoped state machine: consumes commands, drives periodic
//! refresh, cancels superseded fetch generations, dispatches per-panel
//! fetches through the worker pool, and publishes results.
//!
//! Single task per session. All subscription state is private to this
//! task except `previous_queries`, which fetch tasks also touch under a
//! lock (see [`SubscriptionState`]).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mb_common::{MetricQuery, MetricResult, PanelsUpdateCommand, SubscriptionCommand, TimeUpdateCommand, MAX_PANEL_DATA_POINTS};

use crate::diff;
use crate::pool::{combine_tokens, WorkerPool};
use crate::source::{DataSource, MetricEmit};
use crate::trigger::Trigger;

/// Per-session subscription state, as described in the data model: mutable
/// only by the loop, except `previous_queries` which fetch tasks also
/// write to (on success) under its lock.
struct SubscriptionState {
    session_token: CancellationToken,
    active_panel_ids: Vec<String>,
    active_query: Option<MetricQuery>,
    refresh_interval: Duration,
    previous_queries: Arc<Mutex<HashMap<String, MetricQuery>>>,
    generation_token: CancellationToken,
}

/// Forwards emitted metrics to the session's result channel, tagging each
/// with the panel id the fetch was issued for.
struct ChannelEmitter {
    panel_id: String,
    results: mpsc::Sender<MetricResult>,
}

#[async_trait]
impl MetricEmit for ChannelEmitter {
    async fn emit(&self, metric: mb_common::Metric) {
        let _ = self.results.send(MetricResult::Metric { panel_id: self.panel_id.clone(), metric }).await;
    }
}

fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// Validate a `time` sub-command against its own fields and return the
/// query it produces, or the error message to publish.
fn validate_time(cmd: TimeUpdateCommand, now: i64) -> Result<MetricQuery, String> {
    if cmd.start <= 0 || cmd.end < 0 || cmd.resolution <= 0 {
        return Err(format!("invalid time parameters: {cmd:?}"));
    }
    if cmd.end != 0 && cmd.start > cmd.end {
        return Err(format!("start > end: {cmd:?}"));
    }
    let query = MetricQuery::new(cmd.start, cmd.end, cmd.resolution);
    let points = query.normalize(now).point_count();
    if points > MAX_PANEL_DATA_POINTS {
        return Err(format!("too many data points requested ({points}): {cmd:?}"));
    }
    Ok(query)
}

/// Run one session's subscription loop to completion. Returns when
/// `session_token` is cancelled or the command channel closes.
pub async fn run(
    data_source: Arc<dyn DataSource>,
    panel_ids: Vec<String>,
    mut commands: mpsc::Receiver<SubscriptionCommand>,
    results: mpsc::Sender<MetricResult>,
    session_token: CancellationToken,
) {
    let pool = Arc::new(WorkerPool::new(&session_token, 1, 1024));
    pool.start().await;

    let mut state = SubscriptionState {
        session_token: session_token.clone(),
        active_panel_ids: panel_ids,
        active_query: None,
        refresh_interval: Duration::ZERO,
        previous_queries: Arc::new(Mutex::new(HashMap::new())),
        generation_token: {
            let t = session_token.child_token();
            t.cancel();
            t
        },
    };

    loop {
        let refresh_sleep = async {
            if state.refresh_interval.is_zero() {
                std::future::pending::<()>().await;
            } else {
                tokio::time::sleep(state.refresh_interval).await;
            }
        };

        let should_dispatch = tokio::select! {
            _ = session_token.cancelled() => {
                info!("session cancelled, stopping subscription loop");
                break;
            }
            _ = refresh_sleep => {
                debug!("periodic refresh triggered");
                true
            }
            maybe_cmd = commands.recv() => {
                match maybe_cmd {
                    None => {
                        info!("command channel closed, stopping subscription loop");
                        break;
                    }
                    Some(cmd) => {
                        handle_command(cmd, &mut state, &pool, &results).await;
                        true
                    }
                }
            }
        };

        if should_dispatch {
            if let Some(active_query) = state.active_query {
                dispatch_generation(&data_source, &pool, &mut state, active_query, &results);
            } else {
                debug!("no active query set, skip iteration");
            }
        }
    }

    pool.stop().await;
}

async fn handle_command(
    cmd: SubscriptionCommand,
    state: &mut SubscriptionState,
    pool: &Arc<WorkerPool>,
    results: &mpsc::Sender<MetricResult>,
) {
    if let Some(time) = cmd.time {
        match validate_time(time, now_micros()) {
            Ok(query) => state.active_query = Some(query),
            Err(message) => {
                warn!(%message, "rejected time update");
                let _ = results.send(MetricResult::global_error(message)).await;
            }
        }
    }

    if let Some(concurrency) = cmd.concurrency {
        if concurrency < 0 {
            let message = format!("invalid concurrency parameter: {concurrency}");
            warn!(%message, "rejected concurrency update");
            let _ = results.send(MetricResult::global_error(message)).await;
        } else {
            pool.resize(concurrency as usize).await;
        }
    }

    if let Some(refresh) = cmd.refresh {
        if refresh < 0 {
            let message = format!("invalid refresh parameter: {refresh}");
            warn!(%message, "rejected refresh update");
            let _ = results.send(MetricResult::global_error(message)).await;
        } else {
            state.refresh_interval = Duration::from_micros(refresh as u64);
        }
    }

    if let Some(PanelsUpdateCommand { active, reset }) = cmd.panels {
        state.active_panel_ids = active;
        if !reset.is_empty() {
            let mut previous_queries = state.previous_queries.lock();
            for panel_id in &reset {
                previous_queries.remove(panel_id);
            }
        }
    }
}

/// Cancel the previous generation, open a fresh one, and dispatch a fetch
/// for every active panel whose diff yields a non-empty fragment.
///
/// Two back-to-back time updates must not let the first generation's
/// fetches commit `previous_queries` writes after the second generation has
/// already started reading them: cancelling the old generation's scope
/// severs its right to commit, and the trigger tells the loop (via
/// `gen_token.cancel()`, which is otherwise unobserved by the loop itself)
/// once every old-generation task has acknowledged that cancellation.
fn dispatch_generation(
    data_source: &Arc<dyn DataSource>,
    pool: &Arc<WorkerPool>,
    state: &mut SubscriptionState,
    active_query: MetricQuery,
    results: &mpsc::Sender<MetricResult>,
) {
    state.generation_token.cancel();
    let gen_token = state.session_token.child_token();
    state.generation_token = gen_token.clone();

    let trigger = {
        let fire_token = gen_token.clone();
        Trigger::new(move || fire_token.cancel())
    };

    let now = now_micros();
    for panel_id in state.active_panel_ids.clone() {
        let previous = state.previous_queries.lock().get(&panel_id).copied();
        let (fragment, merged) = diff::adjust(now, previous, active_query);
        let Some(fragment) = fragment else {
            debug!(panel_id = %panel_id, "diff yielded no fragment, skipping");
            continue;
        };

        trigger.add();

        let data_source = data_source.clone();
        let pool = pool.clone();
        let results = results.clone();
        let previous_queries = state.previous_queries.clone();
        let gen_token = gen_token.clone();
        let trigger_for_submit = trigger.clone();
        let trigger_for_outer = trigger.clone();

        tokio::spawn(async move {
            let submit_result = pool
                .submit(move |pool_ctx| {
                    let ctx = combine_tokens(&gen_token, &pool_ctx);
                    let data_source = data_source.clone();
                    let results = results.clone();
                    let previous_queries = previous_queries.clone();
                    let trigger = trigger_for_submit.clone();
                    let panel_id = panel_id.clone();
                    async move {
                        // Guards, rather than a trailing `trigger.done()`, so
                        // a panic inside `get_metric` still balances the
                        // trigger instead of leaving it stuck mid-countdown.
                        let _done_guard = trigger.done_guard();
                        let emitter = ChannelEmitter { panel_id: panel_id.clone(), results: results.clone() };
                        match data_source.get_metric(ctx, &panel_id, fragment, &emitter).await {
                            Ok(()) => {
                                previous_queries.lock().insert(panel_id, merged);
                            }
                            Err(error) => {
                                let _ = results.send(MetricResult::error(panel_id, error)).await;
                            }
                        }
                    }
                })
                .await;
            if submit_result.is_err() {
                // Pool was stopped before the closure above ever ran, so no
                // done_guard was constructed to balance this add(); do it
                // here instead.
                trigger_for_outer.done();
            }
        });
    }

    trigger.arm();
}
