//! Source audio formats and conversion into the canonical pipeline format.
//!
//! The capture device decides the sample rate, channel count and sample
//! width. Everything past [`canonical::Canonicalizer`] only ever sees
//! 16 kHz mono 16-bit little-endian PCM.

pub mod canonical;
pub mod resample;

use serde::{Deserialize, Serialize};

pub use canonical::Canonicalizer;

/// Canonical sample rate (Hz).
pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;

/// 16 kHz × 2 bytes × 1 channel.
pub const CANONICAL_BYTES_PER_SEC: u32 = CANONICAL_SAMPLE_RATE * 2;

/// How individual samples are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    /// Integer PCM. 8-bit is unsigned (offset 128), wider widths are signed.
    Int,
    /// IEEE float in [-1.0, 1.0].
    Float,
}

/// Layout of raw PCM bytes delivered by a capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub encoding: SampleEncoding,
}

impl SourceFormat {
    /// 16 kHz, mono, 16-bit signed.
    pub const CANONICAL: SourceFormat = SourceFormat {
        sample_rate: CANONICAL_SAMPLE_RATE,
        channels: 1,
        bits_per_sample: 16,
        encoding: SampleEncoding::Int,
    };

    pub fn int(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
            encoding: SampleEncoding::Int,
        }
    }

    pub fn float(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 32,
            encoding: SampleEncoding::Float,
        }
    }

    pub fn is_canonical(&self) -> bool {
        *self == Self::CANONICAL
    }

    /// Bytes per interleaved frame (one sample for every channel).
    pub fn block_align(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bits_per_sample / 8)
    }
}
