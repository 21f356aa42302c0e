//! Marker generation and decoding
//!
//! Markers are deliberately injected, decodable signals carrying an index:
//! - a visual grid code stamped into video frames ([`pattern`])
//! - a frequency-stepped sine tone in the audio path ([`tone`])
//! - a paired source driving both from one output clock ([`generator`])

pub mod generator;
pub mod pattern;
pub mod tone;

/// A decoded marker sighting, handed from a decoder to the correlator.
///
/// `timestamp_ms` is milliseconds on the session's monotonic clock. Video
/// observations carry the full marker index; audio observations carry
/// `index % TONE_INDEX_PERIOD` (the tone can only encode that many steps).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerObservation {
    /// Decoded marker index (or index step for audio)
    pub index: u64,
    /// Arrival/onset timestamp in milliseconds
    pub timestamp_ms: f64,
}
