//! Settings that may change while the engine runs.
//!
//! The VAD and the router read these on every call instead of caching them,
//! so a change from the host applies to the very next audio chunk or
//! transcript. Numeric fields are plain atomics: readers never block the
//! capture path, and concurrent writers resolve last-write-wins.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Serializable seed for [`LiveTuning`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TuningConfig {
    /// RMS level (normalized to [0, 1]) above which a frame counts as speech.
    pub vad_threshold: f32,
    /// Quiet time after the last loud frame before speech is considered over.
    pub vad_silence_ms: u64,
    /// Phrase every command must start with.
    pub wake_phrase: String,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            vad_threshold: 0.01,
            vad_silence_ms: 500,
            wake_phrase: "джарвис".into(),
        }
    }
}

/// Shared, lock-free (for numbers) runtime tuning.
#[derive(Debug)]
pub struct LiveTuning {
    vad_threshold_bits: AtomicU32,
    vad_silence_ms: AtomicU64,
    wake_phrase: RwLock<String>,
}

impl LiveTuning {
    pub fn new(seed: &TuningConfig) -> Self {
        Self {
            vad_threshold_bits: AtomicU32::new(seed.vad_threshold.to_bits()),
            vad_silence_ms: AtomicU64::new(seed.vad_silence_ms),
            wake_phrase: RwLock::new(seed.wake_phrase.clone()),
        }
    }

    pub fn vad_threshold(&self) -> f32 {
        f32::from_bits(self.vad_threshold_bits.load(Ordering::Relaxed))
    }

    pub fn set_vad_threshold(&self, threshold: f32) {
        self.vad_threshold_bits
            .store(threshold.to_bits(), Ordering::Relaxed);
    }

    pub fn vad_silence_ms(&self) -> u64 {
        self.vad_silence_ms.load(Ordering::Relaxed)
    }

    pub fn set_vad_silence_ms(&self, ms: u64) {
        self.vad_silence_ms.store(ms, Ordering::Relaxed);
    }

    pub fn wake_phrase(&self) -> String {
        self.wake_phrase.read().clone()
    }

    pub fn set_wake_phrase(&self, phrase: impl Into<String>) {
        *self.wake_phrase.write() = phrase.into();
    }

    /// Current values as a serializable snapshot.
    pub fn snapshot(&self) -> TuningConfig {
        TuningConfig {
            vad_threshold: self.vad_threshold(),
            vad_silence_ms: self.vad_silence_ms(),
            wake_phrase: self.wake_phrase(),
        }
    }
}

impl Default for LiveTuning {
    fn default() -> Self {
        Self::new(&TuningConfig::default())
    }
}
