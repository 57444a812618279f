//! Energy-based VAD using an RMS threshold and a silence window.
//!
//! ## Algorithm
//!
//! 1. Compute RMS over the frame's samples, normalized to [-1, 1].
//! 2. RMS > threshold → speaking. Emit `SpeechStarted` on the rising edge
//!    and refresh `last_above_threshold`.
//! 3. RMS ≤ threshold while speaking → emit `SpeechEnded` only once more
//!    than `vad_silence_ms` has passed since `last_above_threshold`. A
//!    shorter dip changes nothing.
//!
//! Threshold and silence window come from [`LiveTuning`] on every frame.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{VadEvent, VoiceActivityDetector};
use crate::buffering::CanonicalFrame;
use crate::config::LiveTuning;

/// Energy detector with hysteresis.
#[derive(Debug)]
pub struct EnergyVad {
    tuning: Arc<LiveTuning>,
    speaking: bool,
    last_above_threshold: Option<Instant>,
    last_rms: f32,
}

impl EnergyVad {
    pub fn new(tuning: Arc<LiveTuning>) -> Self {
        Self {
            tuning,
            speaking: false,
            last_above_threshold: None,
            last_rms: 0.0,
        }
    }

    /// Root-mean-square of 16-bit samples, normalized to [0, 1].
    pub fn rms(frame: &CanonicalFrame) -> f32 {
        let count = frame.sample_count();
        if count == 0 {
            return 0.0;
        }
        let sum_sq: f64 = frame
            .samples()
            .map(|s| {
                let x = f64::from(s) / 32_768.0;
                x * x
            })
            .sum();
        (sum_sq / count as f64).sqrt() as f32
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn process_at(&mut self, frame: &CanonicalFrame, now: Instant) -> Option<VadEvent> {
        if frame.sample_count() == 0 {
            return None;
        }

        let energy = Self::rms(frame);
        self.last_rms = energy;

        if energy > self.tuning.vad_threshold() {
            self.last_above_threshold = Some(now);
            if !self.speaking {
                self.speaking = true;
                return Some(VadEvent::SpeechStarted);
            }
            return None;
        }

        if !self.speaking {
            return None;
        }

        let silence = Duration::from_millis(self.tuning.vad_silence_ms());
        let quiet_for = self
            .last_above_threshold
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or(Duration::MAX);
        if quiet_for > silence {
            self.speaking = false;
            return Some(VadEvent::SpeechEnded);
        }
        None
    }

    fn is_speaking(&self) -> bool {
        self.speaking
    }

    fn last_rms(&self) -> f32 {
        self.last_rms
    }

    fn reset(&mut self) {
        self.speaking = false;
        self.last_above_threshold = None;
    }
}
