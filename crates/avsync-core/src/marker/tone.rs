//! Audio marker codec
//!
//! The audio marker is a pure sine tone whose frequency encodes
//! `index % TONE_INDEX_PERIOD` in fixed steps above a base frequency.
//! Detection runs a windowed FFT per sample block, gates on signal level
//! and spectral peak prominence to reject noise, and requires a minimum
//! tone duration before emitting an observation. Onset timestamps come
//! from the sample clock, not block arrival time.

use rustfft::{num_complex::Complex, FftPlanner};

use crate::{TONE_BASE_HZ, TONE_INDEX_PERIOD, TONE_STEP_HZ};

/// Default tone amplitude (-6 dBFS for headroom)
const TONE_AMPLITUDE: f32 = 0.5;

/// RMS below this is treated as silence
const MIN_RMS: f32 = 0.01;

/// Spectral peak must exceed this multiple of the mean magnitude
const MIN_PEAK_RATIO: f32 = 8.0;

/// Frequency of the tone step for a marker index
pub fn index_frequency(index: u64) -> f64 {
    TONE_BASE_HZ + (index % TONE_INDEX_PERIOD as u64) as f64 * TONE_STEP_HZ
}

/// A detected marker tone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneObservation {
    /// Decoded tone step (`index % TONE_INDEX_PERIOD`)
    pub step: u32,
    /// Interpolated peak frequency in Hz
    pub frequency: f64,
    /// Sample-clock position of the tone onset
    pub onset_sample: u64,
}

impl ToneObservation {
    /// Onset position converted to milliseconds on the sample clock
    pub fn onset_ms(&self, sample_rate: u32) -> f64 {
        self.onset_sample as f64 / sample_rate as f64 * 1000.0
    }
}

/// Phase-continuous sine generator for marker tones
#[derive(Debug)]
pub struct ToneGenerator {
    sample_rate: u32,
    amplitude: f32,
    phase: f64,
}

impl ToneGenerator {
    /// Create a generator for the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            amplitude: TONE_AMPLITUDE,
            phase: 0.0,
        }
    }

    /// Fill a block with the tone for `index`, continuing the phase from
    /// the previous block so index changes never click at full amplitude
    /// discontinuities.
    pub fn fill_block(&mut self, buffer: &mut [f32], index: u64) {
        let step = std::f64::consts::TAU * index_frequency(index) / self.sample_rate as f64;
        for sample in buffer.iter_mut() {
            *sample = (self.phase.sin() as f32) * self.amplitude;
            self.phase += step;
        }
        self.phase %= std::f64::consts::TAU;
    }

    /// Set output amplitude (clamped to 0.0..=1.0)
    pub fn set_amplitude(&mut self, amplitude: f32) {
        self.amplitude = amplitude.clamp(0.0, 1.0);
    }

    /// Get sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Reset phase
    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}

/// State of the tone run currently being tracked
#[derive(Debug, Clone, Copy)]
struct ToneRun {
    step: u32,
    onset_sample: u64,
    run_samples: usize,
    emitted: bool,
}

/// FFT-based marker tone detector
///
/// Feed consecutive capture blocks through [`ToneDetector::process_block`];
/// the detector maintains its own sample clock and emits at most one
/// observation per continuous tone run. Missed tones are expected and
/// harmless; the level and prominence gates keep broadband noise from
/// producing false observations.
pub struct ToneDetector {
    sample_rate: u32,
    fft_planner: FftPlanner<f32>,
    /// Samples of sustained tone required before an observation is emitted
    min_run_samples: usize,
    /// Running sample-clock position (samples consumed so far)
    samples_seen: u64,
    run: Option<ToneRun>,
}

impl ToneDetector {
    /// Create a detector; the duration gate defaults to 10 ms of tone.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            fft_planner: FftPlanner::new(),
            min_run_samples: (sample_rate / 100) as usize,
            samples_seen: 0,
            run: None,
        }
    }

    /// Analyze one block of mono samples.
    ///
    /// Returns an observation when a marker tone has been present long
    /// enough to pass the duration gate, once per tone run. Returns `None`
    /// for silence, noise, unrecognized frequencies, and continuations of
    /// an already-reported tone.
    pub fn process_block(&mut self, samples: &[f32]) -> Option<ToneObservation> {
        let block_start = self.samples_seen;
        self.samples_seen += samples.len() as u64;

        if samples.is_empty() {
            return None;
        }

        let rms =
            (samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
        if rms < MIN_RMS {
            self.run = None;
            return None;
        }

        let (frequency, prominence) = self.peak_frequency(samples)?;
        if prominence < MIN_PEAK_RATIO {
            tracing::trace!(frequency, prominence, "peak below prominence gate");
            self.run = None;
            return None;
        }

        let step = match Self::frequency_step(frequency) {
            Some(step) => step,
            None => {
                self.run = None;
                return None;
            }
        };

        match &mut self.run {
            Some(run) if run.step == step => {
                run.run_samples += samples.len();
            }
            _ => {
                let onset_offset = samples
                    .iter()
                    .position(|s| s.abs() >= MIN_RMS)
                    .unwrap_or(0);
                self.run = Some(ToneRun {
                    step,
                    onset_sample: block_start + onset_offset as u64,
                    run_samples: samples.len() - onset_offset,
                    emitted: false,
                });
            }
        }

        let run = self.run.as_mut()?;
        if !run.emitted && run.run_samples >= self.min_run_samples {
            run.emitted = true;
            tracing::debug!(
                step = run.step,
                frequency,
                onset_sample = run.onset_sample,
                "tone_detected"
            );
            return Some(ToneObservation {
                step: run.step,
                frequency,
                onset_sample: run.onset_sample,
            });
        }
        None
    }

    /// Dominant frequency of the block and its peak-to-mean prominence
    fn peak_frequency(&mut self, samples: &[f32]) -> Option<(f64, f32)> {
        let fft_size = samples.len().next_power_of_two().max(256);
        let mut buffer: Vec<Complex<f32>> = samples
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                // Hann window
                let w = 0.5
                    - 0.5
                        * (std::f32::consts::TAU * i as f32 / samples.len() as f32).cos();
                Complex::new(s * w, 0.0)
            })
            .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
            .take(fft_size)
            .collect();

        let fft = self.fft_planner.plan_fft_forward(fft_size);
        fft.process(&mut buffer);

        let half = fft_size / 2;
        let mut peak_bin = 1;
        let mut peak_mag = 0.0f32;
        let mut mag_sum = 0.0f32;
        for (bin, value) in buffer.iter().enumerate().take(half).skip(1) {
            let mag = value.norm();
            mag_sum += mag;
            if mag > peak_mag {
                peak_mag = mag;
                peak_bin = bin;
            }
        }
        let mean = mag_sum / (half - 1) as f32;
        if mean <= f32::EPSILON {
            return None;
        }

        // Parabolic interpolation around the peak for sub-bin precision
        let bin_hz = self.sample_rate as f64 / fft_size as f64;
        let refined = if peak_bin > 1 && peak_bin + 1 < half {
            let l = buffer[peak_bin - 1].norm();
            let c = buffer[peak_bin].norm();
            let r = buffer[peak_bin + 1].norm();
            let denom = l - 2.0 * c + r;
            if denom.abs() > f32::EPSILON {
                peak_bin as f64 + (0.5 * (l - r) / denom) as f64
            } else {
                peak_bin as f64
            }
        } else {
            peak_bin as f64
        };

        Some((refined * bin_hz, peak_mag / mean))
    }

    /// Map a frequency onto a tone step, within a quarter-step tolerance
    fn frequency_step(frequency: f64) -> Option<u32> {
        let raw = (frequency - TONE_BASE_HZ) / TONE_STEP_HZ;
        let step = raw.round();
        if step < 0.0 || step >= TONE_INDEX_PERIOD as f64 {
            return None;
        }
        if (frequency - (TONE_BASE_HZ + step * TONE_STEP_HZ)).abs() > TONE_STEP_HZ / 4.0 {
            return None;
        }
        Some(step as u32)
    }

    /// Current sample-clock position
    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    /// Get sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Reset the detector and its sample clock
    pub fn reset(&mut self) {
        self.samples_seen = 0;
        self.run = None;
    }
}
