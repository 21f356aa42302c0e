//! Shared sync state store
//!
//! One mutex-guarded record holds the latest measurement results for every
//! consumer: the UI render thread, the control gateway's request handlers,
//! and the decoder/correlator threads that write it. Readers take a
//! point-in-time snapshot under the same lock, so a snapshot is always
//! internally consistent with a single completed update.

use std::sync::{Mutex, MutexGuard};

/// The current measurement state.
///
/// `latency_ms` is only meaningful while `has_data` is true. Channel
/// indices are `None` until a session publishes them.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SyncState {
    /// Signed latency in milliseconds; positive means video arrived later
    pub latency_ms: f64,
    /// Video channel currently measured
    pub video_index: Option<u32>,
    /// Audio channel currently measured
    pub audio_index: Option<u32>,
    /// Last detected audio marker frequency in Hz (0 when unset)
    pub frequency: f64,
    /// True between a successful start and a successful stop
    pub is_measuring: bool,
    /// True once the current session has produced a correlated measurement
    pub has_data: bool,
}

/// Thread-safe store for the [`SyncState`] record.
///
/// Lives for the module lifetime and outlives every session. All mutation
/// happens under one lock; `set_measuring(false)` resets every field as a
/// single atomic transition.
#[derive(Debug, Default)]
pub struct SyncStateStore {
    inner: Mutex<SyncState>,
}

impl SyncStateStore {
    /// Create a store with all fields at their unset sentinels
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.inner.lock().expect("sync state lock poisoned")
    }

    /// Publish a correlated latency measurement
    pub fn update_latency(&self, latency_ms: f64, video_index: u32) {
        let mut state = self.lock();
        state.latency_ms = latency_ms;
        state.video_index = Some(video_index);
        state.has_data = true;
    }

    /// Record the measured video channel and the detected tone frequency
    pub fn update_video(&self, video_index: u32, frequency: f64) {
        let mut state = self.lock();
        state.video_index = Some(video_index);
        state.frequency = frequency;
    }

    /// Record the measured audio channel
    pub fn update_audio(&self, audio_index: u32) {
        let mut state = self.lock();
        state.audio_index = Some(audio_index);
    }

    /// Flip the measuring flag; stopping resets the whole record
    pub fn set_measuring(&self, measuring: bool) {
        let mut state = self.lock();
        state.is_measuring = measuring;
        if !measuring {
            state.has_data = false;
            state.latency_ms = 0.0;
            state.video_index = None;
            state.audio_index = None;
            state.frequency = 0.0;
        }
    }

    /// Consistent point-in-time copy of the record
    pub fn snapshot(&self) -> SyncState {
        *self.lock()
    }

    /// Whether a session is currently active
    pub fn is_measuring(&self) -> bool {
        self.lock().is_measuring
    }
}
