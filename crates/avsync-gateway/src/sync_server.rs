//! Standalone gateway server over a loopback pipeline
//!
//! Runs the full module lifecycle against the in-process loopback
//! pipeline: generated markers are pumped straight back into the
//! monitoring taps with a configurable artificial video delay, so the
//! REST and WebSocket surfaces can be exercised without any real media
//! host. Start a measurement and `sync_state` converges on the injected
//! delay.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use avsync_core::pipeline::{LoopbackPipeline, MediaPipeline};
use avsync_core::sync::session::{SessionConfig, SessionController};
use avsync_gateway::{Module, ServerConfig};

/// Loop moving loopback traffic into the session taps, delaying video by
/// `video_delay_ms`. Runs for the process lifetime.
fn pump_loopback(
    controller: Arc<SessionController>,
    pipeline: Arc<LoopbackPipeline>,
    video_delay_ms: f64,
) {
    let video_rx = pipeline.video_frames();
    let audio_rx = pipeline.audio_blocks();

    loop {
        while let Ok(mut frame) = video_rx.try_recv() {
            frame.timestamp_ms += video_delay_ms;
            controller.on_video_frame(&frame);
        }
        while let Ok(block) = audio_rx.try_recv() {
            controller.on_audio_samples(&block);
        }
        thread::sleep(Duration::from_millis(2));
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("avsync=debug".parse().unwrap()),
        )
        .init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8930u16);
    let video_delay_ms = std::env::var("VIDEO_DELAY_MS")
        .ok()
        .and_then(|d| d.parse().ok())
        .unwrap_or(40.0f64);
    let config_path = std::env::var("AVSYNC_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("avsync.json"));

    let module = match Module::load(&config_path) {
        Ok(module) => module,
        Err(err) => {
            tracing::error!(error = %err, "failed to load module config");
            std::process::exit(1);
        }
    };

    let pipeline = Arc::new(LoopbackPipeline::new(&[0], &[0]));
    let controller = module.post_load(
        Arc::clone(&pipeline) as Arc<dyn MediaPipeline>,
        SessionConfig::default(),
    );

    thread::spawn(move || pump_loopback(controller, pipeline, video_delay_ms));

    let state = module.app_state_with(ServerConfig {
        port,
        bind_addr: "127.0.0.1".to_string(),
    });

    tracing::info!(port, video_delay_ms, "loopback sync server starting");

    if let Err(e) = avsync_gateway::start_server(state).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
