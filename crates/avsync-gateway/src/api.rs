//! REST endpoints for the control gateway
//!
//! Thin HTTP mirror of the vendor requests, under /api/v1/. Responses are
//! byte-for-byte the vendor handlers' responses, so REST callers and
//! vendor-channel callers always observe the same contract.

use axum::extract::State;
use axum::response::Json;
use serde_json::Value;

use crate::AppState;

/// Dispatch a vendor request off the async executor.
///
/// `stop_measurement` joins session threads and `start_measurement` opens
/// output channels; neither belongs on a runtime worker.
pub(crate) async fn dispatch(state: &AppState, name: &'static str) -> Value {
    let registry = state.registry.clone();
    tokio::task::spawn_blocking(move || {
        registry
            .handle(name, &Value::Null)
            .unwrap_or_else(|| Value::Null)
    })
    .await
    .unwrap_or(Value::Null)
}

/// GET /api/v1/sync_state
pub async fn get_sync_state(State(state): State<AppState>) -> Json<Value> {
    Json(dispatch(&state, "get_sync_state").await)
}

/// POST /api/v1/start_measurement
pub async fn start_measurement(State(state): State<AppState>) -> Json<Value> {
    Json(dispatch(&state, "start_measurement").await)
}

/// POST /api/v1/stop_measurement
pub async fn stop_measurement(State(state): State<AppState>) -> Json<Value> {
    Json(dispatch(&state, "stop_measurement").await)
}
