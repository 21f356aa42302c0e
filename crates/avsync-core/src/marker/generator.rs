//! Paired marker source
//!
//! Produces, per monotonically increasing index, one video frame carrying
//! the visual marker and one frame-interval block of the matching audio
//! tone, both stamped from the same output clock. The session's output
//! thread pulls markers at the configured frame rate and pushes them into
//! the host's output paths.

use std::time::Duration;

use crate::marker::pattern::render_marker;
use crate::marker::tone::ToneGenerator;
use crate::pipeline::VideoFrame;
use crate::{DEFAULT_FRAME_RATE, DEFAULT_SAMPLE_RATE};

/// Background luma behind the marker square
const BACKGROUND_LUMA: u8 = 16;

/// Marker generator configuration
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Generated frame width in pixels
    pub width: usize,
    /// Generated frame height in pixels
    pub height: usize,
    /// Audio sample rate in Hz
    pub sample_rate: u32,
    /// Marker cadence in frames per second
    pub frame_rate: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }
}

/// One marker instant: the index rendered into both modalities
#[derive(Debug, Clone)]
pub struct Marker {
    /// Marker index carried by both the frame and the tone
    pub index: u64,
    /// Video frame with the rendered grid code
    pub frame: VideoFrame,
    /// One frame interval of the matching tone
    pub samples: Vec<f32>,
}

/// Generates the unbounded marker sequence.
///
/// Restartable: a fresh generator starts over at index 1 with a zeroed
/// output clock, which is what a new measurement session wants.
#[derive(Debug)]
pub struct MarkerGenerator {
    config: GeneratorConfig,
    tone: ToneGenerator,
    samples_per_frame: usize,
    next_index: u64,
    frames_emitted: u64,
}

impl MarkerGenerator {
    /// Create a generator
    pub fn new(config: GeneratorConfig) -> Self {
        let samples_per_frame = (config.sample_rate / config.frame_rate) as usize;
        let tone = ToneGenerator::new(config.sample_rate);
        Self {
            config,
            tone,
            samples_per_frame,
            next_index: 1,
            frames_emitted: 0,
        }
    }

    /// Produce the next marker in the sequence.
    ///
    /// The frame timestamp and the first tone sample refer to the same
    /// instant on the output clock.
    pub fn next_marker(&mut self) -> Marker {
        let index = self.next_index;
        self.next_index += 1;

        let mut frame = VideoFrame::filled(self.config.width, self.config.height, BACKGROUND_LUMA);
        frame.timestamp_ms = self.frames_emitted as f64 * self.frame_interval_ms();
        render_marker(&mut frame, index as u32);

        let mut samples = vec![0.0f32; self.samples_per_frame];
        self.tone.fill_block(&mut samples, index);

        self.frames_emitted += 1;
        Marker {
            index,
            frame,
            samples,
        }
    }

    /// Interval between markers in milliseconds
    pub fn frame_interval_ms(&self) -> f64 {
        1000.0 / self.config.frame_rate as f64
    }

    /// Interval between markers as a `Duration`, for output-thread pacing
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.frame_rate as f64)
    }

    /// Samples of tone emitted per marker
    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    /// Index the next call to [`Self::next_marker`] will emit
    pub fn next_index(&self) -> u64 {
        self.next_index
    }
}
