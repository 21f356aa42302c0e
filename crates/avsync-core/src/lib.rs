//! AVSync Core - Audio/video synchronization measurement engine
//!
//! This library measures the end-to-end offset between the video and audio
//! paths of a live production pipeline. It injects index-carrying markers
//! into both output paths (a decodable visual grid code and a frequency-
//! stepped tone), decodes them as they re-enter through a monitoring tap,
//! correlates the observations, and publishes the signed latency through a
//! single thread-safe state record.

pub mod config;
pub mod marker;
pub mod pipeline;
pub mod sync;

pub use marker::generator::MarkerGenerator;
pub use marker::tone::ToneDetector;
pub use pipeline::{MediaPipeline, VideoFrame};
pub use sync::correlator::Correlator;
pub use sync::session::{SessionController, SyncDock};
pub use sync::state::{SyncState, SyncStateStore};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default sample rate for audio marker processing
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default marker cadence (one fresh marker index per video frame)
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Lowest audio marker frequency in Hz
pub const TONE_BASE_HZ: f64 = 1000.0;

/// Frequency spacing between adjacent marker steps in Hz
pub const TONE_STEP_HZ: f64 = 250.0;

/// Number of distinct tone steps; the tone encodes `index % TONE_INDEX_PERIOD`
pub const TONE_INDEX_PERIOD: u32 = 24;
