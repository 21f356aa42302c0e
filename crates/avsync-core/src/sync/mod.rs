//! Synchronization measurement
//!
//! - [`state`]: the single mutex-guarded record every consumer reads
//! - [`correlator`]: pairs video and audio marker observations into a latency
//! - [`session`]: start/stop lifecycle wiring generators, decoders and the
//!   correlator together

pub mod correlator;
pub mod session;
pub mod state;
