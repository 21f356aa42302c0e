//! Control gateway for the sync measurement engine
//!
//! Exposes the engine over two transports sharing one vendor request
//! registry: a small REST surface and a WebSocket request/response
//! channel. The [`Module`] type mirrors the host's two-phase plugin
//! lifecycle: `load` reads configuration and builds the registry,
//! `post_load` wires the session owner in once the host's media
//! pipeline is available.

pub mod api;
pub mod vendor;
pub mod ws;

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use avsync_core::config::{ModuleConfig, CONFIG_SECTION};
use avsync_core::pipeline::MediaPipeline;
use avsync_core::sync::session::{SessionConfig, SessionController, SyncDock};
use avsync_core::sync::state::SyncStateStore;

use vendor::{register_sync_requests, GatewayShared, VendorRegistry};

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    /// Vendor request registry, immutable after module load
    pub registry: Arc<VendorRegistry>,
    /// Server configuration
    pub config: ServerConfig,
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind address
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8930,
            bind_addr: "0.0.0.0".to_string(),
        }
    }
}

/// The loaded gateway module.
///
/// Construction is two-phase. `load` runs before any media exists: it
/// reads the module's config section, creates the shared state store and
/// registers the vendor requests. `post_load` runs once the host pipeline
/// is up: it builds the session controller and fills the dock slot, after
/// which `start_measurement` stops answering "Dock not initialized".
pub struct Module {
    config: ModuleConfig,
    shared: GatewayShared,
    registry: Arc<VendorRegistry>,
}

impl Module {
    /// Load the module from a host config file
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let config = ModuleConfig::load_section(config_path, CONFIG_SECTION)?;
        Ok(Self::with_config(config))
    }

    /// Load the module with default configuration
    pub fn load_default() -> Self {
        Self::with_config(ModuleConfig::default())
    }

    fn with_config(config: ModuleConfig) -> Self {
        let shared = GatewayShared::new(Arc::new(SyncStateStore::new()));
        let mut registry = VendorRegistry::new();
        register_sync_requests(&mut registry, &shared);
        tracing::info!(
            version = avsync_core::VERSION,
            list_monitor_sources = config.list_monitor_sources,
            "sync module loaded"
        );
        Self {
            config,
            shared,
            registry: Arc::new(registry),
        }
    }

    /// Finish initialization once the host media pipeline is available.
    ///
    /// Builds the session controller over the pipeline and registers it as
    /// the dock behind the vendor requests. Returns the controller so the
    /// host can feed its monitoring taps.
    pub fn post_load(
        &self,
        pipeline: Arc<dyn MediaPipeline>,
        session: SessionConfig,
    ) -> Arc<SessionController> {
        let controller = Arc::new(SessionController::new(
            pipeline,
            Arc::clone(&self.shared.store),
            session,
        ));
        self.shared
            .set_dock(Arc::clone(&controller) as Arc<dyn SyncDock>);
        tracing::info!("sync dock registered");
        controller
    }

    /// The engine's shared state store
    pub fn store(&self) -> Arc<SyncStateStore> {
        Arc::clone(&self.shared.store)
    }

    /// Module configuration as loaded
    pub fn config(&self) -> ModuleConfig {
        self.config
    }

    /// Application state for the HTTP server, with default server config
    pub fn app_state(&self) -> AppState {
        self.app_state_with(ServerConfig::default())
    }

    /// Application state for the HTTP server
    pub fn app_state_with(&self, config: ServerConfig) -> AppState {
        AppState {
            registry: Arc::clone(&self.registry),
            config,
        }
    }
}

/// Build the Axum router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // REST API
        .route(
            "/api/v1/sync_state",
            axum::routing::get(api::get_sync_state),
        )
        .route(
            "/api/v1/start_measurement",
            axum::routing::post(api::start_measurement),
        )
        .route(
            "/api/v1/stop_measurement",
            axum::routing::post(api::stop_measurement),
        )
        // WebSocket vendor channel
        .route("/api/v1/ws", axum::routing::get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the gateway server
pub async fn start_server(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.bind_addr, state.config.port);
    let app = build_router(state);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "sync gateway listening");

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use avsync_core::pipeline::LoopbackPipeline;
    use std::io::Write;

    #[test]
    fn test_load_reads_config_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "AudioVideoSyncDock": {{ "list_monitor_sources": true }} }}"#
        )
        .unwrap();

        let module = Module::load(file.path()).unwrap();
        assert!(module.config().list_monitor_sources);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let module = Module::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(module.config(), ModuleConfig::default());
    }

    #[test]
    fn test_requests_answer_before_post_load() {
        let module = Module::load_default();
        let state = module.app_state();

        let snapshot = state
            .registry
            .handle("get_sync_state", &serde_json::Value::Null)
            .unwrap();
        assert_eq!(snapshot["is_measuring"], false);

        let started = state
            .registry
            .handle("start_measurement", &serde_json::Value::Null)
            .unwrap();
        assert_eq!(started["error"], "Dock not initialized");
    }

    #[test]
    fn test_post_load_enables_measurement() {
        let module = Module::load_default();
        let pipeline = Arc::new(LoopbackPipeline::new(&[0], &[0])) as Arc<dyn MediaPipeline>;
        let controller = module.post_load(pipeline, SessionConfig::default());
        let state = module.app_state();

        let started = state
            .registry
            .handle("start_measurement", &serde_json::Value::Null)
            .unwrap();
        assert_eq!(started["success"], true);
        assert!(controller.is_measuring());

        let stopped = state
            .registry
            .handle("stop_measurement", &serde_json::Value::Null)
            .unwrap();
        assert_eq!(stopped["success"], true);
    }
}
