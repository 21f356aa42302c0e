//! Marker correlation and latency estimation
//!
//! Pairs a decoded video marker with its audio counterpart and publishes
//! the signed offset to the [`SyncStateStore`]. Keeps at most one pending
//! unmatched observation per modality: a newer observation supersedes an
//! unmatched older one, repeated indices are deduplicated, and anything
//! older than the stale timeout is discarded so a fresh observation can
//! never pair with leftover data.

use std::sync::Arc;

use crate::marker::MarkerObservation;
use crate::sync::state::SyncStateStore;
use crate::TONE_INDEX_PERIOD;

/// How video and audio observations are keyed to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKeying {
    /// Match on marker index (modulo the tone period); the default, used
    /// when both modalities carry the index family
    Index,
    /// Match the most recent pairing whose timestamps fall within the
    /// window; fallback for hosts whose markers carry incomparable indices
    TimeWindow,
}

/// Correlator tuning
#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    /// Keying policy
    pub keying: MatchKeying,
    /// Maximum |video - audio| timestamp distance for a valid pair (ms)
    pub match_window_ms: f64,
    /// Pending observations older than this are discarded (ms)
    pub stale_timeout_ms: f64,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            keying: MatchKeying::Index,
            match_window_ms: 200.0,
            stale_timeout_ms: 500.0,
        }
    }
}

/// Matches video/audio marker observations and maintains the most recent
/// correlated result in the shared store.
pub struct Correlator {
    config: CorrelatorConfig,
    store: Arc<SyncStateStore>,
    video_channel: u32,
    audio_channel: u32,
    pending_video: Option<MarkerObservation>,
    pending_audio: Option<MarkerObservation>,
    last_video: Option<MarkerObservation>,
    last_audio: Option<MarkerObservation>,
    last_frequency: f64,
}

impl Correlator {
    /// Create a correlator publishing into `store` for the given channels
    pub fn new(
        store: Arc<SyncStateStore>,
        video_channel: u32,
        audio_channel: u32,
        config: CorrelatorConfig,
    ) -> Self {
        Self {
            config,
            store,
            video_channel,
            audio_channel,
            pending_video: None,
            pending_audio: None,
            last_video: None,
            last_audio: None,
            last_frequency: 0.0,
        }
    }

    /// Feed a decoded video marker
    pub fn observe_video(&mut self, obs: MarkerObservation) {
        // Only the first observation per index is eligible for matching.
        // The dedup key ages out with the stale timeout: indices repeat
        // (the tone only encodes a bounded step range), so after a long
        // enough gap the same index is a fresh marker again.
        if self.is_duplicate_video(&obs) {
            tracing::trace!(index = obs.index, "duplicate video marker ignored");
            return;
        }
        self.last_video = Some(obs);
        self.store.update_video(self.video_channel, self.last_frequency);

        self.expire(obs.timestamp_ms);
        if let Some(audio) = self.pending_audio {
            if self.pair_matches(&obs, &audio) {
                self.publish(&obs, &audio);
                self.pending_audio = None;
                return;
            }
        }
        self.pending_video = Some(obs);
    }

    /// Feed a detected audio marker, with the tone frequency it carried
    pub fn observe_audio(&mut self, obs: MarkerObservation, frequency: f64) {
        if self.is_duplicate_audio(&obs) {
            tracing::trace!(index = obs.index, "duplicate audio marker ignored");
            return;
        }
        self.last_audio = Some(obs);
        self.last_frequency = frequency;
        self.store.update_audio(self.audio_channel);

        self.expire(obs.timestamp_ms);
        if let Some(video) = self.pending_video {
            if self.pair_matches(&video, &obs) {
                self.publish(&video, &obs);
                self.pending_video = None;
                return;
            }
        }
        self.pending_audio = Some(obs);
    }

    /// Repeated sighting of the last video index within the stale timeout.
    /// A duplicate refreshes the dedup clock so a continuously visible
    /// marker never re-fires.
    fn is_duplicate_video(&mut self, obs: &MarkerObservation) -> bool {
        match &mut self.last_video {
            Some(last)
                if last.index == obs.index
                    && obs.timestamp_ms - last.timestamp_ms <= self.config.stale_timeout_ms =>
            {
                last.timestamp_ms = obs.timestamp_ms;
                true
            }
            _ => false,
        }
    }

    /// Audio counterpart of [`Self::is_duplicate_video`]
    fn is_duplicate_audio(&mut self, obs: &MarkerObservation) -> bool {
        match &mut self.last_audio {
            Some(last)
                if last.index == obs.index
                    && obs.timestamp_ms - last.timestamp_ms <= self.config.stale_timeout_ms =>
            {
                last.timestamp_ms = obs.timestamp_ms;
                true
            }
            _ => false,
        }
    }

    /// Discard pending observations that a fresh observation may no longer
    /// legally pair with.
    fn expire(&mut self, now_ms: f64) {
        let timeout = self.config.stale_timeout_ms;
        if let Some(video) = self.pending_video {
            if now_ms - video.timestamp_ms > timeout {
                tracing::trace!(index = video.index, "stale video observation discarded");
                self.pending_video = None;
            }
        }
        if let Some(audio) = self.pending_audio {
            if now_ms - audio.timestamp_ms > timeout {
                tracing::trace!(index = audio.index, "stale audio observation discarded");
                self.pending_audio = None;
            }
        }
    }

    fn pair_matches(&self, video: &MarkerObservation, audio: &MarkerObservation) -> bool {
        let within_window =
            (video.timestamp_ms - audio.timestamp_ms).abs() <= self.config.match_window_ms;
        match self.config.keying {
            MatchKeying::Index => {
                let period = TONE_INDEX_PERIOD as u64;
                video.index % period == audio.index % period && within_window
            }
            MatchKeying::TimeWindow => within_window,
        }
    }

    fn publish(&self, video: &MarkerObservation, audio: &MarkerObservation) {
        // Positive latency: video arrived later than audio
        let latency_ms = video.timestamp_ms - audio.timestamp_ms;
        tracing::debug!(
            video_index = video.index,
            audio_index = audio.index,
            latency_ms = %format!("{:.3}", latency_ms),
            "markers_correlated"
        );
        self.store.update_latency(latency_ms, self.video_channel);
    }

    /// Number of pending unmatched observations (0..=2)
    pub fn pending_count(&self) -> usize {
        self.pending_video.is_some() as usize + self.pending_audio.is_some() as usize
    }
}
