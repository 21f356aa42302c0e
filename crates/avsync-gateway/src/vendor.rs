//! Vendor request registry
//!
//! Remote controllers reach the engine through named request/response
//! handlers: `get_sync_state`, `start_measurement`, `stop_measurement`.
//! Handlers are synchronous, safe to invoke from any thread, and total:
//! they always produce a response, reporting failure through
//! `{ success: false, error: "..." }` rather than ever panicking.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::{json, Value};

use avsync_core::sync::session::SyncDock;
use avsync_core::sync::state::{SyncState, SyncStateStore};

/// A synchronous request handler
pub type VendorHandler = Box<dyn Fn(&Value) -> Value + Send + Sync>;

/// Maps request names to handlers.
///
/// The registry is immutable after module post-load; callers share it via
/// `Arc` and dispatch from whatever thread the transport delivers on.
#[derive(Default)]
pub struct VendorRegistry {
    handlers: HashMap<String, VendorHandler>,
}

impl VendorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a request name
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Box::new(handler));
    }

    /// Dispatch a request; `None` when the name is unknown
    pub fn handle(&self, name: &str, request: &Value) -> Option<Value> {
        self.handlers.get(name).map(|handler| handler(request))
    }

    /// Registered request names
    pub fn request_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

/// State the sync request handlers close over.
///
/// The store exists from module load; the dock slot is filled at post-load
/// once the session owner has been constructed. Requests arriving in
/// between answer "Dock not initialized" instead of failing hard.
#[derive(Clone)]
pub struct GatewayShared {
    /// The engine's shared state store
    pub store: Arc<SyncStateStore>,
    /// Session owner, registered at post-load
    pub dock: Arc<RwLock<Option<Arc<dyn SyncDock>>>>,
}

impl GatewayShared {
    /// Create shared state with an empty dock slot
    pub fn new(store: Arc<SyncStateStore>) -> Self {
        Self {
            store,
            dock: Arc::new(RwLock::new(None)),
        }
    }

    /// Fill the dock slot (module post-load)
    pub fn set_dock(&self, dock: Arc<dyn SyncDock>) {
        *self.dock.write().expect("dock slot lock poisoned") = Some(dock);
    }

    fn dock(&self) -> Option<Arc<dyn SyncDock>> {
        self.dock.read().expect("dock slot lock poisoned").clone()
    }
}

/// Wire form of a state snapshot; unset channels serialize as `-1`
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SyncStateResponse {
    pub latency_ms: f64,
    pub video_index: i64,
    pub audio_index: i64,
    pub frequency: f64,
    pub is_measuring: bool,
    pub has_data: bool,
}

impl From<SyncState> for SyncStateResponse {
    fn from(state: SyncState) -> Self {
        Self {
            latency_ms: state.latency_ms,
            video_index: state.video_index.map_or(-1, |v| v as i64),
            audio_index: state.audio_index.map_or(-1, |v| v as i64),
            frequency: state.frequency,
            is_measuring: state.is_measuring,
            has_data: state.has_data,
        }
    }
}

fn failure(error: &str) -> Value {
    json!({ "success": false, "error": error })
}

/// Register the three sync requests against the registry.
pub fn register_sync_requests(registry: &mut VendorRegistry, shared: &GatewayShared) {
    let state = shared.clone();
    registry.register("get_sync_state", move |_request| {
        // Copy everything out under one snapshot; never hold the state
        // lock while building the response.
        let response = SyncStateResponse::from(state.store.snapshot());
        serde_json::to_value(response).unwrap_or(Value::Null)
    });

    let state = shared.clone();
    registry.register("start_measurement", move |_request| {
        let Some(dock) = state.dock() else {
            tracing::error!("cannot start: dock not initialized");
            return failure("Dock not initialized");
        };
        match dock.start_measurement() {
            Ok(()) => {
                tracing::info!("measurement started via vendor request");
                json!({ "success": true })
            }
            Err(err) => {
                tracing::warn!(error = %err, "start_measurement rejected");
                failure(&err.to_string())
            }
        }
    });

    let state = shared.clone();
    registry.register("stop_measurement", move |_request| {
        let Some(dock) = state.dock() else {
            tracing::error!("cannot stop: dock not initialized");
            return failure("Dock not initialized");
        };
        match dock.stop_measurement() {
            Ok(()) => {
                tracing::info!("measurement stopped via vendor request");
                json!({ "success": true })
            }
            Err(err) => {
                tracing::warn!(error = %err, "stop_measurement rejected");
                failure(&err.to_string())
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use avsync_core::pipeline::{LoopbackPipeline, MediaPipeline};
    use avsync_core::sync::session::{SessionConfig, SessionController};

    fn gateway() -> (VendorRegistry, GatewayShared) {
        let shared = GatewayShared::new(Arc::new(SyncStateStore::new()));
        let mut registry = VendorRegistry::new();
        register_sync_requests(&mut registry, &shared);
        (registry, shared)
    }

    fn with_dock() -> (VendorRegistry, GatewayShared) {
        let (registry, shared) = gateway();
        let pipeline = Arc::new(LoopbackPipeline::new(&[0], &[0])) as Arc<dyn MediaPipeline>;
        let controller = Arc::new(SessionController::new(
            pipeline,
            Arc::clone(&shared.store),
            SessionConfig::default(),
        ));
        shared.set_dock(controller);
        (registry, shared)
    }

    fn call(registry: &VendorRegistry, name: &str) -> Value {
        registry
            .handle(name, &Value::Null)
            .expect("request should be registered")
    }

    #[test]
    fn test_all_requests_registered() {
        let (registry, _) = gateway();
        let mut names = registry.request_names();
        names.sort_unstable();
        assert_eq!(
            names,
            vec!["get_sync_state", "start_measurement", "stop_measurement"]
        );
    }

    #[test]
    fn test_unknown_request_is_none() {
        let (registry, _) = gateway();
        assert!(registry.handle("reboot_host", &Value::Null).is_none());
    }

    #[test]
    fn test_get_sync_state_initial_sentinels() {
        let (registry, _) = gateway();
        let response = call(&registry, "get_sync_state");
        assert_eq!(response["latency_ms"], 0.0);
        assert_eq!(response["video_index"], -1);
        assert_eq!(response["audio_index"], -1);
        assert_eq!(response["frequency"], 0.0);
        assert_eq!(response["is_measuring"], false);
        assert_eq!(response["has_data"], false);
    }

    #[test]
    fn test_state_response_channel_sentinels() {
        let state = SyncState {
            latency_ms: 2.5,
            video_index: Some(1),
            audio_index: None,
            frequency: 1250.0,
            is_measuring: true,
            has_data: true,
        };
        let value = serde_json::to_value(SyncStateResponse::from(state)).unwrap();
        assert_eq!(value["latency_ms"], 2.5);
        assert_eq!(value["video_index"], 1);
        assert_eq!(value["audio_index"], -1);
        assert_eq!(value["frequency"], 1250.0);
        assert_eq!(value["is_measuring"], true);
        assert_eq!(value["has_data"], true);
    }

    #[test]
    fn test_start_without_dock() {
        let (registry, _) = gateway();
        let response = call(&registry, "start_measurement");
        assert_eq!(response["success"], false);
        assert_eq!(response["error"], "Dock not initialized");
    }

    #[test]
    fn test_stop_without_dock() {
        let (registry, _) = gateway();
        let response = call(&registry, "stop_measurement");
        assert_eq!(response["success"], false);
        assert_eq!(response["error"], "Dock not initialized");
    }

    #[test]
    fn test_gateway_parity_after_start() {
        let (registry, _shared) = with_dock();

        let response = call(&registry, "start_measurement");
        assert_eq!(response["success"], true);
        assert!(response.get("error").is_none());

        // State right after start, before any observations
        let state = call(&registry, "get_sync_state");
        assert_eq!(state["is_measuring"], true);
        assert_eq!(state["has_data"], false);

        assert_eq!(call(&registry, "stop_measurement")["success"], true);
    }

    #[test]
    fn test_no_double_session() {
        let (registry, _shared) = with_dock();

        assert_eq!(call(&registry, "start_measurement")["success"], true);
        let second = call(&registry, "start_measurement");
        assert_eq!(second["success"], false);
        assert_eq!(second["error"], "Already measuring");

        // First session untouched by the rejected start
        assert_eq!(call(&registry, "get_sync_state")["is_measuring"], true);
        assert_eq!(call(&registry, "stop_measurement")["success"], true);
    }

    #[test]
    fn test_no_orphan_stop() {
        let (registry, _shared) = with_dock();
        let response = call(&registry, "stop_measurement");
        assert_eq!(response["success"], false);
        assert_eq!(response["error"], "Not measuring");
        assert_eq!(call(&registry, "get_sync_state")["is_measuring"], false);
    }

    #[test]
    fn test_idempotent_reset_over_gateway() {
        let (registry, shared) = with_dock();
        assert_eq!(call(&registry, "start_measurement")["success"], true);

        // Simulate a session having published results
        shared.store.update_video(3, 2250.0);
        shared.store.update_audio(1);
        shared.store.update_latency(12.5, 3);

        assert_eq!(call(&registry, "stop_measurement")["success"], true);
        let state = call(&registry, "get_sync_state");
        assert_eq!(state["is_measuring"], false);
        assert_eq!(state["has_data"], false);
        assert_eq!(state["latency_ms"], 0.0);
        assert_eq!(state["video_index"], -1);
        assert_eq!(state["audio_index"], -1);
        assert_eq!(state["frequency"], 0.0);
    }

    #[test]
    fn test_channel_unavailable_reported() {
        let (registry, shared) = gateway();
        let pipeline = Arc::new(LoopbackPipeline::new(&[], &[0])) as Arc<dyn MediaPipeline>;
        let controller = Arc::new(SessionController::new(
            pipeline,
            Arc::clone(&shared.store),
            SessionConfig::default(),
        ));
        shared.set_dock(controller);

        let response = call(&registry, "start_measurement");
        assert_eq!(response["success"], false);
        assert_eq!(response["error"], "Video channel 0 unavailable");
        assert_eq!(call(&registry, "get_sync_state")["is_measuring"], false);
    }
}
