//! Host media-graph boundary
//!
//! The engine never talks to a capture card or media framework directly.
//! It opens output channels through the [`MediaPipeline`] trait and the host
//! feeds monitored frames/samples back into the session taps. The
//! [`LoopbackPipeline`] implementation short-circuits the two for tests and
//! the demo server.

use crossbeam_channel::{bounded, Receiver, Sender};
use thiserror::Error;

/// Errors raised at the pipeline boundary
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Video channel {0} unavailable")]
    VideoChannelUnavailable(u32),

    #[error("Audio channel {0} unavailable")]
    AudioChannelUnavailable(u32),
}

/// A single 8-bit luma video frame with its presentation timestamp
///
/// Chroma carries no marker information, so the engine only ever sees the
/// luma plane. `timestamp_ms` is milliseconds on the session's monotonic
/// clock (output clock when generated, arrival clock when monitored).
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: usize,
    /// Frame height in pixels
    pub height: usize,
    /// Luma plane, row-major, `width * height` bytes
    pub data: Vec<u8>,
    /// Timestamp in milliseconds on the session clock
    pub timestamp_ms: f64,
}

impl VideoFrame {
    /// Create a frame filled with a uniform luma value
    pub fn filled(width: usize, height: usize, luma: u8) -> Self {
        Self {
            width,
            height,
            data: vec![luma; width * height],
            timestamp_ms: 0.0,
        }
    }

    /// Luma value at (x, y); panics if out of bounds
    pub fn luma(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }
}

/// Sink for generated video frames (the host's video output path)
pub trait VideoOutput: Send {
    /// Submit one frame to the output path
    fn submit_frame(&mut self, frame: &VideoFrame);
}

/// Sink for generated audio sample blocks (the host's audio output path)
pub trait AudioOutput: Send {
    /// Submit one block of mono samples to the output path
    fn submit_block(&mut self, samples: &[f32]);
}

/// Host media-graph boundary: opens output channels for marker injection.
///
/// Endpoint discovery is the caller's concern; the engine only asks for the
/// channels it was configured with and treats failure as
/// [`PipelineError::VideoChannelUnavailable`] /
/// [`PipelineError::AudioChannelUnavailable`].
pub trait MediaPipeline: Send + Sync {
    /// Open the video output path for the given channel
    fn open_video_output(&self, channel: u32) -> Result<Box<dyn VideoOutput>, PipelineError>;

    /// Open the audio output path for the given channel
    fn open_audio_output(&self, channel: u32) -> Result<Box<dyn AudioOutput>, PipelineError>;
}

/// Queue depth for loopback traffic (a lagging pump drops, never blocks)
const LOOPBACK_QUEUE_DEPTH: usize = 64;

/// In-process pipeline that queues everything submitted to its outputs.
///
/// The caller drains [`LoopbackPipeline::video_frames`] and
/// [`LoopbackPipeline::audio_blocks`] and pumps them back into the session's
/// monitoring taps, optionally delaying one path to simulate a sync offset.
pub struct LoopbackPipeline {
    video_channels: Vec<u32>,
    audio_channels: Vec<u32>,
    video_tx: Sender<VideoFrame>,
    video_rx: Receiver<VideoFrame>,
    audio_tx: Sender<Vec<f32>>,
    audio_rx: Receiver<Vec<f32>>,
}

impl LoopbackPipeline {
    /// Create a loopback pipeline advertising the given channels
    pub fn new(video_channels: &[u32], audio_channels: &[u32]) -> Self {
        let (video_tx, video_rx) = bounded(LOOPBACK_QUEUE_DEPTH);
        let (audio_tx, audio_rx) = bounded(LOOPBACK_QUEUE_DEPTH);
        Self {
            video_channels: video_channels.to_vec(),
            audio_channels: audio_channels.to_vec(),
            video_tx,
            video_rx,
            audio_tx,
            audio_rx,
        }
    }

    /// Receiver side of the looped-back video path
    pub fn video_frames(&self) -> Receiver<VideoFrame> {
        self.video_rx.clone()
    }

    /// Receiver side of the looped-back audio path
    pub fn audio_blocks(&self) -> Receiver<Vec<f32>> {
        self.audio_rx.clone()
    }
}

struct LoopbackVideoOutput {
    tx: Sender<VideoFrame>,
}

impl VideoOutput for LoopbackVideoOutput {
    fn submit_frame(&mut self, frame: &VideoFrame) {
        // Drop when the pump lags; the output path must never stall.
        if self.tx.try_send(frame.clone()).is_err() {
            tracing::trace!("loopback video queue full, frame dropped");
        }
    }
}

struct LoopbackAudioOutput {
    tx: Sender<Vec<f32>>,
}

impl AudioOutput for LoopbackAudioOutput {
    fn submit_block(&mut self, samples: &[f32]) {
        if self.tx.try_send(samples.to_vec()).is_err() {
            tracing::trace!("loopback audio queue full, block dropped");
        }
    }
}

impl MediaPipeline for LoopbackPipeline {
    fn open_video_output(&self, channel: u32) -> Result<Box<dyn VideoOutput>, PipelineError> {
        if !self.video_channels.contains(&channel) {
            return Err(PipelineError::VideoChannelUnavailable(channel));
        }
        Ok(Box::new(LoopbackVideoOutput {
            tx: self.video_tx.clone(),
        }))
    }

    fn open_audio_output(&self, channel: u32) -> Result<Box<dyn AudioOutput>, PipelineError> {
        if !self.audio_channels.contains(&channel) {
            return Err(PipelineError::AudioChannelUnavailable(channel));
        }
        Ok(Box::new(LoopbackAudioOutput {
            tx: self.audio_tx.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_known_channels() {
        let pipeline = LoopbackPipeline::new(&[0, 1], &[2]);
        assert!(pipeline.open_video_output(0).is_ok());
        assert!(pipeline.open_video_output(1).is_ok());
        assert!(pipeline.open_audio_output(2).is_ok());
    }

    #[test]
    fn test_unknown_channel_unavailable() {
        let pipeline = LoopbackPipeline::new(&[0], &[0]);
        assert!(matches!(
            pipeline.open_video_output(7),
            Err(PipelineError::VideoChannelUnavailable(7))
        ));
        assert!(matches!(
            pipeline.open_audio_output(7),
            Err(PipelineError::AudioChannelUnavailable(7))
        ));
    }

    #[test]
    fn test_loopback_roundtrip() {
        let pipeline = LoopbackPipeline::new(&[0], &[0]);
        let mut video = pipeline.open_video_output(0).unwrap();
        let mut audio = pipeline.open_audio_output(0).unwrap();

        let mut frame = VideoFrame::filled(4, 4, 16);
        frame.timestamp_ms = 33.0;
        video.submit_frame(&frame);
        audio.submit_block(&[0.1, 0.2]);

        let looped = pipeline.video_frames().try_recv().unwrap();
        assert_eq!(looped.width, 4);
        assert_eq!(looped.timestamp_ms, 33.0);
        let block = pipeline.audio_blocks().try_recv().unwrap();
        assert_eq!(block.len(), 2);
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let pipeline = LoopbackPipeline::new(&[0], &[]);
        let mut video = pipeline.open_video_output(0).unwrap();

        let frame = VideoFrame::filled(2, 2, 0);
        for _ in 0..(LOOPBACK_QUEUE_DEPTH + 10) {
            video.submit_frame(&frame);
        }
        // Queue holds exactly its depth; the rest were dropped silently.
        assert_eq!(pipeline.video_frames().len(), LOOPBACK_QUEUE_DEPTH);
    }
}
