//! Conversion of arbitrary device PCM into a [`CanonicalFrame`].
//!
//! ## Stages
//!
//! ```text
//! bytes ─► decode to f32 (per sample width) ─► downmix (channel mean)
//!       ─► RateConverter to 16 kHz ─► quantize to i16 LE
//! ```
//!
//! Canonical input skips every stage and is returned as a fresh copy, so the
//! capture layer may reuse its buffer right after the call.

use tracing::info;

use super::{resample::RateConverter, SampleEncoding, SourceFormat, CANONICAL_SAMPLE_RATE};
use crate::buffering::CanonicalFrame;
use crate::error::{HeraldError, Result};

/// Resampler block length: 10 ms at the source rate.
const BLOCK_MS: u32 = 10;

/// Stateful converter from device PCM to canonical PCM.
///
/// The rubato session is kept while the source rate stays the same, which
/// keeps the filter continuous across capture callbacks.
#[derive(Default)]
pub struct Canonicalizer {
    converter: Option<RateConverter>,
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert `bytes` laid out as `format` into canonical PCM.
    ///
    /// A trailing partial frame is ignored. Output may be shorter than the
    /// input duration while the resampler fills its first block.
    ///
    /// # Errors
    /// `HeraldError::UnsupportedFormat` when the format cannot be decoded.
    pub fn convert(&mut self, bytes: &[u8], format: SourceFormat) -> Result<CanonicalFrame> {
        if bytes.is_empty() {
            return Ok(CanonicalFrame::default());
        }
        if format.is_canonical() {
            return Ok(CanonicalFrame::from_bytes(bytes.to_vec()));
        }

        validate(format)?;
        let interleaved = decode(bytes, format);
        let mono = downmix(&interleaved, usize::from(format.channels));

        let converter = self.converter_for(format.sample_rate)?;
        let resampled = converter.process(&mono);

        let quantized: Vec<i16> = resampled.iter().map(|s| quantize(*s)).collect();
        Ok(CanonicalFrame::from_samples(&quantized))
    }

    fn converter_for(&mut self, source_rate: u32) -> Result<&mut RateConverter> {
        let stale = self
            .converter
            .as_ref()
            .map_or(true, |c| c.source_rate() != source_rate);
        if stale {
            let block = (source_rate / (1000 / BLOCK_MS)).max(1) as usize;
            let converter = RateConverter::new(source_rate, CANONICAL_SAMPLE_RATE, block)?;
            if !converter.is_passthrough() {
                info!(
                    from = source_rate,
                    to = CANONICAL_SAMPLE_RATE,
                    "resampling enabled"
                );
            }
            self.converter = Some(converter);
        }
        self.converter
            .as_mut()
            .ok_or_else(|| HeraldError::UnsupportedFormat("resampler unavailable".into()))
    }
}

fn validate(format: SourceFormat) -> Result<()> {
    if format.channels == 0 {
        return Err(HeraldError::UnsupportedFormat("zero channels".into()));
    }
    if format.sample_rate == 0 {
        return Err(HeraldError::UnsupportedFormat("zero sample rate".into()));
    }
    let supported = match format.encoding {
        SampleEncoding::Int => matches!(format.bits_per_sample, 8 | 16 | 24 | 32),
        SampleEncoding::Float => matches!(format.bits_per_sample, 32 | 64),
    };
    if supported {
        Ok(())
    } else {
        Err(HeraldError::UnsupportedFormat(format!(
            "{}-bit {:?}",
            format.bits_per_sample, format.encoding
        )))
    }
}

/// Decode whole frames into interleaved f32 in [-1.0, 1.0].
fn decode(bytes: &[u8], format: SourceFormat) -> Vec<f32> {
    let width = usize::from(format.bits_per_sample / 8);
    let usable = bytes.len() - bytes.len() % format.block_align();
    let bytes = &bytes[..usable];

    match (format.encoding, width) {
        (SampleEncoding::Int, 1) => bytes.iter().map(|b| (f32::from(*b) - 128.0) / 128.0).collect(),
        (SampleEncoding::Int, 2) => bytes
            .chunks_exact(2)
            .map(|c| f32::from(i16::from_le_bytes([c[0], c[1]])) / 32_768.0)
            .collect(),
        (SampleEncoding::Int, 3) => bytes
            .chunks_exact(3)
            .map(|c| {
                // Sign-extend via the top byte of an i32.
                let v = i32::from_le_bytes([0, c[0], c[1], c[2]]) >> 8;
                v as f32 / 8_388_608.0
            })
            .collect(),
        (SampleEncoding::Int, 4) => bytes
            .chunks_exact(4)
            .map(|c| (i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64 / 2_147_483_648.0) as f32)
            .collect(),
        (SampleEncoding::Float, 4) => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        (SampleEncoding::Float, 8) => bytes
            .chunks_exact(8)
            .map(|c| {
                f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn quantize(sample: f32) -> i16 {
    (sample * 32_768.0).round().clamp(-32_768.0, 32_767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_samples(frame: &CanonicalFrame) -> Vec<i16> {
        frame.samples().collect()
    }

    #[test]
    fn canonical_input_is_copied_verbatim() {
        let mut canon = Canonicalizer::new();
        let mut input: Vec<u8> = (0..640u32).map(|i| (i % 251) as u8).collect();
        let out = canon.convert(&input, SourceFormat::CANONICAL).unwrap();
        assert_eq!(out.as_bytes(), input.as_slice());

        input.iter_mut().for_each(|b| *b = 0);
        assert_ne!(out.as_bytes(), input.as_slice());
        assert_eq!(out.len(), 640);
    }

    #[test]
    fn empty_input_yields_empty_frame() {
        let mut canon = Canonicalizer::new();
        let out = canon.convert(&[], SourceFormat::float(48_000, 2)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn stereo_16k_is_averaged_without_resampling() {
        let mut canon = Canonicalizer::new();
        let mut bytes = Vec::new();
        for (l, r) in [(1000i16, 3000i16), (-200, -400), (i16::MAX, i16::MAX)] {
            bytes.extend_from_slice(&l.to_le_bytes());
            bytes.extend_from_slice(&r.to_le_bytes());
        }
        let out = canon.convert(&bytes, SourceFormat::int(16_000, 2, 16)).unwrap();
        assert_eq!(frame_samples(&out), vec![2000, -300, i16::MAX]);
    }

    #[test]
    fn unsigned_8bit_maps_to_signed_16bit() {
        let mut canon = Canonicalizer::new();
        let out = canon
            .convert(&[128, 255, 0], SourceFormat::int(16_000, 1, 8))
            .unwrap();
        assert_eq!(frame_samples(&out), vec![0, 32_512, -32_768]);
    }

    #[test]
    fn signed_24bit_is_sign_extended() {
        let mut canon = Canonicalizer::new();
        // -1 in 24-bit, then 0x400000 (half scale)
        let bytes = [0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x40];
        let out = canon.convert(&bytes, SourceFormat::int(16_000, 1, 24)).unwrap();
        let samples = frame_samples(&out);
        assert_eq!(samples[0], 0);
        assert_eq!(samples[1], 16_384);
    }

    #[test]
    fn float_48k_stereo_is_resampled_to_16k_mono() {
        let mut canon = Canonicalizer::new();
        let format = SourceFormat::float(48_000, 2);
        // 100 ms of a constant 0.25 on both channels
        let mut bytes = Vec::new();
        for _ in 0..4_800 {
            bytes.extend_from_slice(&0.25f32.to_le_bytes());
            bytes.extend_from_slice(&0.25f32.to_le_bytes());
        }
        let out = canon.convert(&bytes, format).unwrap();
        assert_eq!(out.len() % 2, 0);
        let n = out.sample_count();
        assert!((n as isize - 1_600).unsigned_abs() <= 40, "got {n} samples");
        // Past the filter warm-up the level settles at 0.25 full scale.
        let tail: Vec<i16> = out.samples().skip(n / 2).collect();
        assert!(tail.iter().all(|s| (i32::from(*s) - 8_192).abs() < 400));
    }

    #[test]
    fn partial_trailing_frame_is_ignored() {
        let mut canon = Canonicalizer::new();
        let bytes = [0x10, 0x00, 0x20, 0x00, 0x30];
        let out = canon.convert(&bytes, SourceFormat::int(16_000, 2, 16)).unwrap();
        assert_eq!(out.sample_count(), 1);
    }

    #[test]
    fn unsupported_width_is_an_error() {
        let mut canon = Canonicalizer::new();
        let err = canon.convert(&[0; 12], SourceFormat::int(16_000, 1, 12));
        assert!(matches!(err, Err(HeraldError::UnsupportedFormat(_))));
    }
}
