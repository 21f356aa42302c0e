//! Measurement session lifecycle
//!
//! [`SessionController`] owns the `Idle -> Measuring -> Idle` state machine
//! behind the [`SyncDock`] trait. Starting a session opens the configured
//! output channels through the host pipeline, spawns the marker output
//! thread, a bounded video decode worker and the correlator actor, and
//! flips the shared store to measuring. Stopping drains and joins all of
//! them before the store resets, so no stale callback from a torn-down
//! session can touch the record afterwards.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};
use thiserror::Error;

use crate::marker::generator::{GeneratorConfig, MarkerGenerator};
use crate::marker::pattern::decode_marker;
use crate::marker::tone::ToneDetector;
use crate::marker::MarkerObservation;
use crate::pipeline::{AudioOutput, MediaPipeline, PipelineError, VideoFrame, VideoOutput};
use crate::sync::correlator::{Correlator, CorrelatorConfig};
use crate::sync::state::SyncStateStore;

/// Frames queued for the decode worker before arrivals are dropped.
/// Small on purpose: decoding a stale frame is worthless.
const VIDEO_QUEUE_DEPTH: usize = 4;

/// Observation queue into the correlator actor
const CORRELATOR_QUEUE_DEPTH: usize = 64;

/// Errors surfaced by session start/stop
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Already measuring")]
    AlreadyMeasuring,

    #[error("Not measuring")]
    NotMeasuring,

    #[error(transparent)]
    ChannelUnavailable(#[from] PipelineError),
}

/// Session configuration; channel selection is supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Video output channel markers are injected into
    pub video_channel: u32,
    /// Audio output channel markers are injected into
    pub audio_channel: u32,
    /// Marker generator settings
    pub generator: GeneratorConfig,
    /// Correlator tuning
    pub correlator: CorrelatorConfig,
}

/// Start/stop/query surface of the measurement engine.
///
/// This is the only contract the control gateway and the UI depend on.
pub trait SyncDock: Send + Sync {
    /// Begin a measurement session
    fn start_measurement(&self) -> Result<(), SessionError>;

    /// End the current measurement session
    fn stop_measurement(&self) -> Result<(), SessionError>;

    /// Pure query, safe in any state
    fn is_measuring(&self) -> bool;
}

/// Messages into the correlator actor
enum Observation {
    Video(MarkerObservation),
    Audio(MarkerObservation, f64),
}

/// Tone detection state driven by the audio capture thread
struct AudioTap {
    detector: ToneDetector,
    observations: Sender<Observation>,
}

/// A live measurement run: generator thread, decode worker, correlator
/// actor, and the channels between them. Owned exclusively by the
/// controller; destroyed on stop.
struct MeasurementSession {
    running: Arc<AtomicBool>,
    frames: Sender<VideoFrame>,
    audio: Mutex<AudioTap>,
    dropped_frames: Arc<AtomicU64>,
    generator_thread: JoinHandle<()>,
    decode_worker: JoinHandle<()>,
    correlator_thread: JoinHandle<()>,
}

impl MeasurementSession {
    fn spawn(
        config: &SessionConfig,
        video_out: Box<dyn VideoOutput>,
        audio_out: Box<dyn AudioOutput>,
        store: Arc<SyncStateStore>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let (frames_tx, frames_rx) = bounded::<VideoFrame>(VIDEO_QUEUE_DEPTH);
        let (obs_tx, obs_rx) = bounded::<Observation>(CORRELATOR_QUEUE_DEPTH);
        let dropped_frames = Arc::new(AtomicU64::new(0));

        let generator_thread = spawn_generator(
            MarkerGenerator::new(config.generator.clone()),
            video_out,
            audio_out,
            Arc::clone(&running),
        );
        let decode_worker = spawn_decode_worker(frames_rx, obs_tx.clone());
        let correlator_thread = spawn_correlator(
            Correlator::new(
                store,
                config.video_channel,
                config.audio_channel,
                config.correlator.clone(),
            ),
            obs_rx,
        );

        let sample_rate = config.generator.sample_rate;
        Self {
            running,
            frames: frames_tx,
            audio: Mutex::new(AudioTap {
                detector: ToneDetector::new(sample_rate),
                observations: obs_tx,
            }),
            dropped_frames,
            generator_thread,
            decode_worker,
            correlator_thread,
        }
    }

    /// Hand a monitored frame to the decode worker; never blocks the
    /// delivery path. Under backpressure the incoming frame is dropped.
    fn on_video_frame(&self, frame: &VideoFrame) {
        if self.frames.try_send(frame.clone()).is_err() {
            let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::trace!(dropped, "decode queue full, frame dropped");
        }
    }

    /// Run tone detection over a monitored capture block on the caller's
    /// thread; per-block work is bounded by the FFT size.
    fn on_audio_samples(&self, samples: &[f32]) {
        let mut tap = self.audio.lock().expect("audio tap lock poisoned");
        let sample_rate = tap.detector.sample_rate();
        if let Some(tone) = tap.detector.process_block(samples) {
            let obs = MarkerObservation {
                index: tone.step as u64,
                timestamp_ms: tone.onset_ms(sample_rate),
            };
            if tap
                .observations
                .try_send(Observation::Audio(obs, tone.frequency))
                .is_err()
            {
                tracing::trace!("correlator queue full, audio observation dropped");
            }
        }
    }

    /// Stop the generator, drain the decoders, join everything.
    fn shutdown(self) {
        let Self {
            running,
            frames,
            audio,
            dropped_frames,
            generator_thread,
            decode_worker,
            correlator_thread,
        } = self;

        running.store(false, Ordering::SeqCst);
        let _ = generator_thread.join();

        // Closing the frame channel lets the worker drain what is queued
        // and exit; its observation sender drops with it.
        drop(frames);
        let _ = decode_worker.join();

        // The audio tap holds the last observation sender; dropping it
        // closes the correlator's inlet.
        drop(audio);
        let _ = correlator_thread.join();

        let dropped = dropped_frames.load(Ordering::Relaxed);
        if dropped > 0 {
            tracing::debug!(dropped, "frames dropped under decode backpressure");
        }
    }
}

/// Marker output thread: paces the generator at the configured frame rate
/// and pushes each marker into both output paths.
fn spawn_generator(
    mut generator: MarkerGenerator,
    mut video_out: Box<dyn VideoOutput>,
    mut audio_out: Box<dyn AudioOutput>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let interval = generator.frame_interval();
        let mut deadline = Instant::now();
        while running.load(Ordering::SeqCst) {
            let marker = generator.next_marker();
            video_out.submit_frame(&marker.frame);
            audio_out.submit_block(&marker.samples);

            deadline += interval;
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            } else {
                // The output path stalled longer than a frame; re-anchor
                // instead of bursting to catch up.
                deadline = now;
            }
        }
        tracing::debug!(
            last_index = generator.next_index() - 1,
            "marker generator stopped"
        );
    })
}

/// Video decode worker: pulls monitored frames off the bounded queue and
/// forwards decoded observations to the correlator.
fn spawn_decode_worker(
    frames: Receiver<VideoFrame>,
    observations: Sender<Observation>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for frame in frames.iter() {
            let Some(index) = decode_marker(&frame) else {
                continue;
            };
            let obs = MarkerObservation {
                index: index as u64,
                timestamp_ms: frame.timestamp_ms,
            };
            if observations.send(Observation::Video(obs)).is_err() {
                break;
            }
        }
        tracing::debug!("video decode worker stopped");
    })
}

/// Correlator actor: the single thread that owns correlation state, fed by
/// both decoders through one queue.
fn spawn_correlator(mut correlator: Correlator, inbox: Receiver<Observation>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for observation in inbox.iter() {
            match observation {
                Observation::Video(obs) => correlator.observe_video(obs),
                Observation::Audio(obs, frequency) => correlator.observe_audio(obs, frequency),
            }
        }
        tracing::debug!("correlator stopped");
    })
}

/// Owns the session lifecycle and the shared state store reference.
///
/// Construct once per engine instance and share via `Arc`; start/stop
/// transitions are serialized by the session slot lock.
pub struct SessionController {
    config: SessionConfig,
    pipeline: Arc<dyn MediaPipeline>,
    store: Arc<SyncStateStore>,
    session: Mutex<Option<MeasurementSession>>,
}

impl SessionController {
    /// Create an idle controller
    pub fn new(
        pipeline: Arc<dyn MediaPipeline>,
        store: Arc<SyncStateStore>,
        config: SessionConfig,
    ) -> Self {
        Self {
            config,
            pipeline,
            store,
            session: Mutex::new(None),
        }
    }

    /// The shared state store this controller publishes into
    pub fn store(&self) -> &Arc<SyncStateStore> {
        &self.store
    }

    /// Monitoring tap for the video path; no-op while idle
    pub fn on_video_frame(&self, frame: &VideoFrame) {
        let slot = self.session.lock().expect("session lock poisoned");
        if let Some(session) = slot.as_ref() {
            session.on_video_frame(frame);
        }
    }

    /// Monitoring tap for the audio path; no-op while idle
    pub fn on_audio_samples(&self, samples: &[f32]) {
        let slot = self.session.lock().expect("session lock poisoned");
        if let Some(session) = slot.as_ref() {
            session.on_audio_samples(samples);
        }
    }
}

impl SyncDock for SessionController {
    fn start_measurement(&self) -> Result<(), SessionError> {
        let mut slot = self.session.lock().expect("session lock poisoned");
        if slot.is_some() {
            return Err(SessionError::AlreadyMeasuring);
        }

        // Open both channels before any state changes; an unavailable
        // channel leaves the controller exactly as it was.
        let video_out = self.pipeline.open_video_output(self.config.video_channel)?;
        let audio_out = self.pipeline.open_audio_output(self.config.audio_channel)?;

        *slot = Some(MeasurementSession::spawn(
            &self.config,
            video_out,
            audio_out,
            Arc::clone(&self.store),
        ));
        self.store.set_measuring(true);
        tracing::info!(
            video_channel = self.config.video_channel,
            audio_channel = self.config.audio_channel,
            "measurement started"
        );
        Ok(())
    }

    fn stop_measurement(&self) -> Result<(), SessionError> {
        let mut slot = self.session.lock().expect("session lock poisoned");
        let session = slot.take().ok_or(SessionError::NotMeasuring)?;
        session.shutdown();
        self.store.set_measuring(false);
        tracing::info!("measurement stopped");
        Ok(())
    }

    fn is_measuring(&self) -> bool {
        self.store.is_measuring()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::LoopbackPipeline;

    fn controller() -> SessionController {
        let pipeline = Arc::new(LoopbackPipeline::new(&[0], &[0]));
        SessionController::new(
            pipeline,
            Arc::new(SyncStateStore::new()),
            SessionConfig::default(),
        )
    }

    #[test]
    fn test_start_stop_cycle() {
        let controller = controller();
        assert!(!controller.is_measuring());

        controller.start_measurement().unwrap();
        assert!(controller.is_measuring());

        controller.stop_measurement().unwrap();
        assert!(!controller.is_measuring());
    }

    #[test]
    fn test_double_start_rejected() {
        let controller = controller();
        controller.start_measurement().unwrap();

        let err = controller.start_measurement().unwrap_err();
        assert!(matches!(err, SessionError::AlreadyMeasuring));
        // First session untouched
        assert!(controller.is_measuring());

        controller.stop_measurement().unwrap();
    }

    #[test]
    fn test_orphan_stop_rejected() {
        let controller = controller();
        let err = controller.stop_measurement().unwrap_err();
        assert!(matches!(err, SessionError::NotMeasuring));
        assert!(!controller.is_measuring());
    }

    #[test]
    fn test_unavailable_channel_fails_start_cleanly() {
        let pipeline = Arc::new(LoopbackPipeline::new(&[], &[0]));
        let controller = SessionController::new(
            pipeline,
            Arc::new(SyncStateStore::new()),
            SessionConfig::default(),
        );

        let err = controller.start_measurement().unwrap_err();
        assert!(matches!(err, SessionError::ChannelUnavailable(_)));
        assert!(!controller.is_measuring());
        // Engine still usable: a proper stop is still an orphan stop
        assert!(matches!(
            controller.stop_measurement().unwrap_err(),
            SessionError::NotMeasuring
        ));
    }

    #[test]
    fn test_stop_resets_store() {
        let controller = controller();
        controller.start_measurement().unwrap();
        controller.store().update_latency(42.0, 0);
        controller.store().update_audio(0);

        controller.stop_measurement().unwrap();
        let state = controller.store().snapshot();
        assert!(!state.is_measuring);
        assert!(!state.has_data);
        assert_eq!(state.latency_ms, 0.0);
        assert_eq!(state.video_index, None);
        assert_eq!(state.audio_index, None);
        assert_eq!(state.frequency, 0.0);
    }

    #[test]
    fn test_taps_are_noops_while_idle() {
        let controller = controller();
        let frame = VideoFrame::filled(64, 64, 16);
        controller.on_video_frame(&frame);
        controller.on_audio_samples(&[0.0f32; 256]);
        assert!(!controller.store().snapshot().has_data);
    }

    #[test]
    fn test_video_flood_drops_instead_of_blocking() {
        let controller = controller();
        controller.start_measurement().unwrap();

        // Flood the tap far past the decode queue depth. The delivery path
        // must never block: excess frames are dropped and counted.
        let frame = VideoFrame::filled(16, 16, 16);
        let mut dropped = 0;
        for _ in 0..25_000 {
            // Bursts wider than the queue depth
            for _ in 0..2 * VIDEO_QUEUE_DEPTH {
                controller.on_video_frame(&frame);
            }
            let slot = controller.session.lock().unwrap();
            dropped = slot
                .as_ref()
                .unwrap()
                .dropped_frames
                .load(Ordering::Relaxed);
            drop(slot);
            if dropped > 0 {
                break;
            }
        }
        assert!(
            dropped > 0,
            "flooding past the decode queue depth should drop frames"
        );

        // The session is still healthy after backpressure
        controller.stop_measurement().unwrap();
        controller.start_measurement().unwrap();
        assert!(controller.is_measuring());
        controller.stop_measurement().unwrap();
    }

    #[test]
    fn test_restart_after_stop() {
        let controller = controller();
        controller.start_measurement().unwrap();
        controller.stop_measurement().unwrap();
        controller.start_measurement().unwrap();
        assert!(controller.is_measuring());
        controller.stop_measurement().unwrap();
    }
}
