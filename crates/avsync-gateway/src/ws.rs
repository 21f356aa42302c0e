//! WebSocket vendor channel
//!
//! Clients connect to /api/v1/ws and exchange vendor requests as JSON
//! frames. A request frame is `{"request": "<name>", "data": {...}}`; the
//! reply is `{"request": "<name>", "response": {...}}`. Unknown request
//! names answer `{"request": "<name>", "error": "Unknown request"}` so a
//! misbehaving client never stalls waiting for a reply.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};

use crate::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Build the reply frame for one request frame.
///
/// Returns `None` for frames that are not JSON objects with a string
/// `request` field; those are silently dropped.
pub(crate) fn reply_for(state: &AppState, frame: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(frame).ok()?;
    let name = parsed.get("request")?.as_str()?.to_string();
    let data = parsed.get("data").cloned().unwrap_or(Value::Null);

    let reply = match state.registry.handle(&name, &data) {
        Some(response) => json!({ "request": name, "response": response }),
        None => {
            tracing::debug!(request = %name, "unknown vendor request over websocket");
            json!({ "request": name, "error": "Unknown request" })
        }
    };
    Some(reply.to_string())
}

/// Handle an individual WebSocket connection
async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(frame) => {
                // start/stop join session threads; keep them off the
                // runtime workers.
                let state = state.clone();
                let frame = frame.to_string();
                let reply =
                    tokio::task::spawn_blocking(move || reply_for(&state, &frame)).await;
                if let Ok(Some(reply)) = reply {
                    if ws_sender.send(Message::Text(reply.into())).await.is_err() {
                        break;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    tracing::debug!("websocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Module;
    use avsync_core::pipeline::{LoopbackPipeline, MediaPipeline};
    use avsync_core::sync::session::SessionConfig;
    use std::sync::Arc;

    fn state() -> AppState {
        let module = Module::load_default();
        let pipeline = Arc::new(LoopbackPipeline::new(&[0], &[0])) as Arc<dyn MediaPipeline>;
        module.post_load(pipeline, SessionConfig::default());
        module.app_state()
    }

    fn reply(state: &AppState, frame: &str) -> Value {
        serde_json::from_str(&reply_for(state, frame).expect("frame should produce a reply"))
            .unwrap()
    }

    #[test]
    fn test_request_frame_round_trip() {
        let state = state();
        let out = reply(&state, r#"{"request": "get_sync_state"}"#);
        assert_eq!(out["request"], "get_sync_state");
        assert_eq!(out["response"]["is_measuring"], false);
        assert_eq!(out["response"]["video_index"], -1);
    }

    #[test]
    fn test_start_and_stop_over_ws() {
        let state = state();
        let started = reply(&state, r#"{"request": "start_measurement", "data": {}}"#);
        assert_eq!(started["response"]["success"], true);

        let stopped = reply(&state, r#"{"request": "stop_measurement"}"#);
        assert_eq!(stopped["response"]["success"], true);
    }

    #[test]
    fn test_unknown_request_gets_error_frame() {
        let state = state();
        let out = reply(&state, r#"{"request": "reboot_host"}"#);
        assert_eq!(out["request"], "reboot_host");
        assert_eq!(out["error"], "Unknown request");
        assert!(out.get("response").is_none());
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        let state = state();
        assert!(reply_for(&state, "not json").is_none());
        assert!(reply_for(&state, r#"{"data": {}}"#).is_none());
        assert!(reply_for(&state, r#"{"request": 42}"#).is_none());
    }
}
