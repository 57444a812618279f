//! Typed audio containers passed from the capture path into the engine.

use std::time::Instant;

use crate::audio::SourceFormat;

/// Raw bytes from the capture device, in whatever format the device delivers.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved PCM bytes as produced by the device.
    pub bytes: Vec<u8>,
    /// Layout of `bytes`.
    pub format: SourceFormat,
    /// When the capture callback produced this chunk.
    pub captured_at: Instant,
}

impl AudioChunk {
    pub fn new(bytes: Vec<u8>, format: SourceFormat) -> Self {
        Self {
            bytes,
            format,
            captured_at: Instant::now(),
        }
    }

    pub fn with_timestamp(bytes: Vec<u8>, format: SourceFormat, captured_at: Instant) -> Self {
        Self {
            bytes,
            format,
            captured_at,
        }
    }

    /// Returns true if the chunk contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// 16 kHz, mono, 16-bit little-endian PCM.
///
/// The length is always a whole number of samples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalFrame(Vec<u8>);

impl CanonicalFrame {
    /// Wrap canonical bytes. A dangling odd byte is dropped.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Self {
        if bytes.len() % 2 == 1 {
            bytes.pop();
        }
        Self(bytes)
    }

    /// Encode i16 samples as little-endian bytes.
    pub fn from_samples(samples: &[i16]) -> Self {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of whole 16-bit samples.
    pub fn sample_count(&self) -> usize {
        self.0.len() / 2
    }

    /// Iterate samples as signed 16-bit values.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.0
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    /// Duration of this frame in milliseconds at 16 kHz.
    pub fn duration_ms(&self) -> u64 {
        (self.sample_count() as u64 * 1000) / 16_000
    }
}
