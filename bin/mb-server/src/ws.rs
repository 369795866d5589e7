//! Websocket transport: the one piece of session plumbing the subscription
//! engine itself has no opinion about. Bridges an axum `WebSocket` to the
//! engine's command/result channels and encodes results per the wire
//! format (JSON envelope, then binary timestamp/value frames).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use mb_common::{MetricResult, PanelUpdate, SubscriptionCommand};
use mb_core::codec::{encode_f32, encode_u64};
use mb_core::source::DataSource;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub async fn run_session(mut socket: WebSocket, data_source: Arc<dyn DataSource>, panel_ids: Vec<String>) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<SubscriptionCommand>(32);
    let (res_tx, mut res_rx) = mpsc::channel::<MetricResult>(128);
    let session_token = CancellationToken::new();

    let engine_token = session_token.clone();
    let engine_handle = tokio::spawn(async move {
        mb_core::subscription::run(data_source, panel_ids, cmd_rx, res_tx, engine_token).await;
    });

    loop {
        tokio::select! {
            _ = session_token.cancelled() => break,
            maybe_result = res_rx.recv() => {
                match maybe_result {
                    Some(result) => {
                        if send_result(&mut socket, result).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_msg = socket.recv() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<SubscriptionCommand>(&text) {
                            Ok(cmd) => {
                                if cmd_tx.send(cmd).await.is_err() {
                                    break;
                                }
                            }
                            Err(error) => warn!(%error, "ignoring malformed command"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => debug!("ignoring non-text websocket frame from client"),
                    Some(Err(error)) => {
                        warn!(%error, "websocket read error, ending session");
                        break;
                    }
                }
            }
        }
    }

    session_token.cancel();
    let _ = engine_handle.await;
    let _ = socket.close().await;
}

async fn send_result(socket: &mut WebSocket, result: MetricResult) -> Result<(), axum::Error> {
    match result {
        MetricResult::Metric { panel_id, metric } => {
            let envelope = PanelUpdate { id: Some(panel_id), line_type: Some(metric.line_type), group: metric.group.clone(), labels: metric.labels.clone(), error: None };
            let envelope_json = serde_json::to_string(&envelope).unwrap_or_default();
            socket.send(Message::Text(envelope_json)).await?;
            socket.send(Message::Binary(encode_u64(&metric.timestamps))).await?;
            socket.send(Message::Binary(encode_f32(&metric.values))).await?;
        }
        MetricResult::Error { panel_id, error } => {
            let envelope = PanelUpdate { id: panel_id, error: Some(error), ..Default::default() };
            let envelope_json = serde_json::to_string(&envelope).unwrap_or_default();
            socket.send(Message::Text(envelope_json)).await?;
        }
    }
    Ok(())
}
