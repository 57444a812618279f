//! Response sounds: WAV decoding with hound, output through cpal.

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use herald_core::{audio::resample::RateConverter, error::Result, HeraldError, SoundPlayer};
use parking_lot::Mutex;
use tracing::{debug, error};

/// Extra wait past the clip length before giving up on the drain signal.
const DRAIN_MARGIN: Duration = Duration::from_millis(250);

/// Interleaved f32 samples of a decoded clip.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSound {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl DecodedSound {
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() / usize::from(self.channels.max(1));
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate.max(1)))
    }
}

pub fn decode_wav(path: &Path) -> Result<DecodedSound> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| HeraldError::Sound(format!("{}: {e}", path.display())))?;
    let spec = reader.spec();
    let samples: std::result::Result<Vec<f32>, hound::Error> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect(),
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect()
        }
    };
    Ok(DecodedSound {
        samples: samples.map_err(|e| HeraldError::Sound(e.to_string()))?,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
    })
}

/// Input frames per rubato block when converting a clip.
const RESAMPLE_BLOCK: usize = 1024;

/// Convert to the output layout.
///
/// Matching channel counts are resampled per channel; otherwise the clip is
/// downmixed to mono, resampled once and copied to every output channel.
pub fn adapt(sound: &DecodedSound, out_channels: u16, out_rate: u32) -> Result<Vec<f32>> {
    let in_ch = usize::from(sound.channels.max(1));
    let out_ch = usize::from(out_channels.max(1));
    if sound.samples.len() < in_ch {
        return Ok(Vec::new());
    }

    let planes: Vec<Vec<f32>> = if in_ch == out_ch {
        (0..in_ch)
            .map(|c| sound.samples.iter().skip(c).step_by(in_ch).copied().collect())
            .collect()
    } else {
        vec![sound
            .samples
            .chunks_exact(in_ch)
            .map(|frame| frame.iter().sum::<f32>() / in_ch as f32)
            .collect()]
    };

    let resampled = planes
        .iter()
        .map(|plane| resample_plane(plane, sound.sample_rate, out_rate))
        .collect::<Result<Vec<_>>>()?;
    let frames = resampled.iter().map(Vec::len).min().unwrap_or(0);

    let mut out = Vec::with_capacity(frames * out_ch);
    for frame in 0..frames {
        for c in 0..out_ch {
            out.push(resampled[c.min(resampled.len() - 1)][frame]);
        }
    }
    Ok(out)
}

fn resample_plane(plane: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    let mut converter = RateConverter::new(from, to, RESAMPLE_BLOCK)?;
    if converter.is_passthrough() {
        return Ok(plane.to_vec());
    }
    let expected = (plane.len() as f64 * f64::from(to) / f64::from(from)).round() as usize;
    let mut out = converter.process(plane);
    out.extend(converter.flush());
    out.truncate(expected);
    Ok(out)
}

/// Plays WAV files on the default output device.
#[derive(Debug, Default)]
pub struct WavPlayer;

#[async_trait]
impl SoundPlayer for WavPlayer {
    async fn play(&self, path: &Path) -> Result<()> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || play_blocking(&path))
            .await
            .map_err(|e| HeraldError::Sound(format!("playback task failed: {e}")))?
    }
}

fn play_blocking(path: &Path) -> Result<()> {
    let sound = decode_wav(path)?;
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| HeraldError::Sound("no default output device".into()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| HeraldError::Sound(e.to_string()))?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(HeraldError::Sound(format!(
            "unsupported output sample format {:?}",
            supported.sample_format()
        )));
    }
    let config = supported.config();
    let samples = adapt(&sound, config.channels, config.sample_rate.0)?;
    debug!(path = %path.display(), frames = samples.len(), "playing response sound");

    let queue = Arc::new(Mutex::new(samples.into_iter()));
    let drained = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let stream = device
        .build_output_stream(
            &config,
            {
                let queue = Arc::clone(&queue);
                let drained = Arc::clone(&drained);
                move |out: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let mut remaining = queue.lock();
                    for slot in out.iter_mut() {
                        *slot = remaining.next().unwrap_or(0.0);
                    }
                    if remaining.len() == 0 && !drained.swap(true, Ordering::SeqCst) {
                        let _ = done_tx.send(());
                    }
                }
            },
            |err| error!("audio output error: {err}"),
            None,
        )
        .map_err(|e| HeraldError::Sound(e.to_string()))?;
    stream
        .play()
        .map_err(|e| HeraldError::Sound(e.to_string()))?;

    done_rx
        .recv_timeout(sound.duration() + DRAIN_MARGIN)
        .map_err(|_| HeraldError::Sound("playback did not drain in time".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, spec: hound::WavSpec, samples: &[i16]) {
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn decodes_int_wav_to_unit_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        write_wav(&path, spec, &[0, 16_384, -32_768]);

        let sound = decode_wav(&path).unwrap();
        assert_eq!(sound.channels, 1);
        assert_eq!(sound.sample_rate, 8_000);
        assert_eq!(sound.samples, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn missing_file_is_a_sound_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            decode_wav(&dir.path().join("nope.wav")),
            Err(HeraldError::Sound(_))
        ));
    }

    #[test]
    fn adapt_upmixes_and_resamples() {
        let sound = DecodedSound {
            samples: vec![0.25; 800],
            channels: 1,
            sample_rate: 8_000,
        };
        let out = adapt(&sound, 2, 16_000).unwrap();
        assert_eq!(out.len(), 1_600 * 2);
        // Mid-clip, away from the filter's start-up and the zero padding.
        for frame in out.chunks_exact(2).skip(400).take(800) {
            assert_eq!(frame[0], frame[1]);
            assert!((frame[0] - 0.25).abs() < 1e-3, "sample {}", frame[0]);
        }
    }

    #[test]
    fn adapt_downmixes_stereo() {
        let sound = DecodedSound {
            samples: vec![0.2, 0.4, -0.2, -0.4],
            channels: 2,
            sample_rate: 16_000,
        };
        let out = adapt(&sound, 1, 16_000).unwrap();
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!((out[1] + 0.3).abs() < 1e-6);
    }

    #[test]
    fn adapt_keeps_stereo_channels_apart() {
        let samples: Vec<f32> = (0..4_410).flat_map(|_| [0.5, -0.5]).collect();
        let sound = DecodedSound {
            samples,
            channels: 2,
            sample_rate: 44_100,
        };
        let out = adapt(&sound, 2, 48_000).unwrap();
        assert!(out.len().abs_diff(4_800 * 2) <= 2 * 48, "len {}", out.len());
        let frame = &out[2_000 * 2..2_000 * 2 + 2];
        assert!((frame[0] - 0.5).abs() < 1e-3);
        assert!((frame[1] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn adapt_of_empty_clip_is_empty() {
        let sound = DecodedSound {
            samples: Vec::new(),
            channels: 1,
            sample_rate: 22_050,
        };
        assert!(adapt(&sound, 2, 48_000).unwrap().is_empty());
    }

    #[test]
    fn duration_counts_frames() {
        let sound = DecodedSound {
            samples: vec![0.0; 32_000],
            channels: 2,
            sample_rate: 16_000,
        };
        assert_eq!(sound.duration(), Duration::from_secs(1));
    }
}
