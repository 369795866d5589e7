//! Metricboard demo server.
//!
//! Wires the subscription engine to a websocket transport and a synthetic
//! `MetricBoard`. Dashboard/panel metadata lookup, auth, and the real
//! metric data source are all out of scope for the engine itself — this
//! binary exists to prove the wiring, not to be a production deployment.

mod mock_board;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use mb_core::source::{DataSource, MetricBoard};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use mock_board::MockMetricBoard;

/// Two views of the same concrete board: `metadata` for dashboard/panel
/// lookups, `data_source` for the subscription engine. Kept as separate
/// trait objects built directly from the concrete `Arc<MockMetricBoard>`
/// rather than upcast from one to the other.
#[derive(Clone)]
struct AppState {
    metadata: Arc<dyn MetricBoard>,
    data_source: Arc<dyn DataSource>,
}

#[derive(Deserialize)]
struct EntityQuery {
    id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    mb_common::logging::init_logging("mb-server");

    info!("Starting metricboard demo server");

    // 1. Data source: the demo ships a synthetic board; swap in a real
    //    DataSource/MetricBoard implementation for production use.
    let board = Arc::new(MockMetricBoard);
    let state = AppState { metadata: board.clone(), data_source: board };

    // 2. HTTP + websocket routes.
    let app = Router::new()
        .route("/dashboard", get(dashboard_session))
        .route("/panel", get(panel_session))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state);

    // 3. Bind and serve.
    let port: u16 = std::env::var("MB_SERVER_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Listening for websocket sessions");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("metricboard demo server shutdown complete");
    Ok(())
}

async fn dashboard_session(State(state): State<AppState>, Query(query): Query<EntityQuery>, ws: WebSocketUpgrade) -> Response {
    let dashboard = match state.metadata.get_dashboard(tokio_util::sync::CancellationToken::new(), &query.id).await {
        Ok(dashboard) => dashboard,
        Err(error) => {
            tracing::error!(%error, dashboard_id = %query.id, "unable to fetch dashboard details");
            return axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let panel_ids = dashboard.panel_ids();
    let data_source = state.data_source.clone();

    ws.on_upgrade(move |mut socket| async move {
        use axum::extract::ws::Message;
        let dashboard_json = serde_json::to_string(&dashboard).unwrap_or_default();
        if socket.send(Message::Text(dashboard_json)).await.is_err() {
            return;
        }
        ws::run_session(socket, data_source, panel_ids).await;
    })
}

async fn panel_session(State(state): State<AppState>, Query(query): Query<EntityQuery>, ws: WebSocketUpgrade) -> Response {
    let panel = match state.metadata.get_panel(tokio_util::sync::CancellationToken::new(), &query.id).await {
        Ok(panel) => panel,
        Err(error) => {
            tracing::error!(%error, panel_id = %query.id, "unable to fetch panel details");
            return axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let panel_ids = vec![query.id.clone()];
    let data_source = state.data_source.clone();

    ws.on_upgrade(move |mut socket| async move {
        use axum::extract::ws::Message;
        let panel_json = serde_json::to_string(&panel).unwrap_or_default();
        if socket.send(Message::Text(panel_json)).await.is_err() {
            return;
        }
        ws::run_session(socket, data_source, panel_ids).await;
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
