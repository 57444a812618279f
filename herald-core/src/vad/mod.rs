//! Voice Activity Detection (VAD).
//!
//! The detector turns a stream of canonical frames into edge events:
//! one `SpeechStarted` when energy first rises above the threshold and one
//! `SpeechEnded` once it has stayed below for longer than the configured
//! silence window. Everything in between is silent.

pub mod energy;

pub use energy::EnergyVad;

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::buffering::CanonicalFrame;

/// Speech edge produced by a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VadEvent {
    SpeechStarted,
    SpeechEnded,
}

/// Trait for all VAD implementations.
pub trait VoiceActivityDetector: Send + 'static {
    /// Classify one frame captured at `now`, returning an edge if one occurred.
    fn process_at(&mut self, frame: &CanonicalFrame, now: Instant) -> Option<VadEvent>;

    /// Classify one frame using the current wall clock.
    fn process(&mut self, frame: &CanonicalFrame) -> Option<VadEvent> {
        self.process_at(frame, Instant::now())
    }

    /// Whether the detector currently considers speech in progress.
    fn is_speaking(&self) -> bool;

    /// RMS of the most recently processed frame.
    fn last_rms(&self) -> f32;

    /// Forget any in-progress speech without emitting an event.
    fn reset(&mut self);
}
