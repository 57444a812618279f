//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Capture devices usually run at 44.1 or 48 kHz while the pipeline works at
//! 16 kHz. `RateConverter` keeps one rubato session alive across calls so the
//! filter state carries over chunk boundaries; input that does not fill a
//! whole rubato block is held back until the next call.
//!
//! When the source rate already equals the target rate no rubato session is
//! created and samples pass straight through.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{HeraldError, Result};

/// Converts mono f32 audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Samples waiting for a full rubato block.
    pending: Vec<f32>,
    /// Input frames per rubato call.
    chunk_size: usize,
    /// Scratch output: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    source_rate: u32,
    target_rate: u32,
}

impl RateConverter {
    /// Create a converter.
    ///
    /// # Errors
    /// Returns `HeraldError::UnsupportedFormat` for a zero rate or when rubato
    /// rejects the ratio.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 {
            return Err(HeraldError::UnsupportedFormat(format!(
                "sample rate must be non-zero (from={source_rate} to={target_rate})"
            )));
        }

        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                source_rate,
                target_rate,
            });
        }

        let chunk_size = chunk_size.max(1);
        let ratio = target_rate as f64 / source_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| HeraldError::UnsupportedFormat(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        debug!(source_rate, target_rate, chunk_size, max_out, "rate converter created");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; 1],
            source_rate,
            target_rate,
        })
    }

    /// Feed samples and collect whatever output is ready (may be empty).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();

        while self.pending.len() >= self.chunk_size {
            let block = &self.pending[..self.chunk_size];
            match resampler.process_into_buffer(&[block], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    out.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }
            self.pending.drain(..self.chunk_size);
        }

        out
    }

    /// Zero-pad the held-back tail to a full block and convert it.
    ///
    /// Ends a finite signal; the returned tail may include a few frames of
    /// padding that callers trim to the length they expect.
    pub fn flush(&mut self) -> Vec<f32> {
        if self.resampler.is_none() || self.pending.is_empty() {
            return Vec::new();
        }
        let padding = vec![0.0f32; self.chunk_size - self.pending.len()];
        self.process(&padding)
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Samples held back waiting for a full block.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 160).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
    }

    #[test]
    fn downsample_48k_to_16k_keeps_duration() {
        let mut rc = RateConverter::new(48_000, 16_000, 480).unwrap();
        assert!(!rc.is_passthrough());
        let mut total = 0usize;
        for _ in 0..10 {
            total += rc.process(&vec![0.0f32; 480]).len();
        }
        // 100 ms of input → ~1600 samples out
        assert!((total as isize - 1600).unsigned_abs() <= 40, "produced {total}");
    }

    #[test]
    fn short_input_is_held_back() {
        let mut rc = RateConverter::new(44_100, 16_000, 441).unwrap();
        assert!(rc.process(&vec![0.0f32; 200]).is_empty());
        assert_eq!(rc.pending_len(), 200);
        assert!(!rc.process(&vec![0.0f32; 300]).is_empty());
        assert_eq!(rc.pending_len(), 59);
    }

    #[test]
    fn flush_converts_the_held_back_tail() {
        let mut rc = RateConverter::new(48_000, 16_000, 480).unwrap();
        let head = rc.process(&vec![0.25f32; 1_000]).len();
        assert_eq!(rc.pending_len(), 40);
        let tail = rc.flush();
        assert!(!tail.is_empty());
        assert_eq!(rc.pending_len(), 0);
        assert!(rc.flush().is_empty());
        // 1000 input frames plus padding to 1440 → roughly 480 out.
        assert!((head + tail.len()).abs_diff(480) <= 20, "produced {}", head + tail.len());
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(RateConverter::new(0, 16_000, 160).is_err());
    }
}
