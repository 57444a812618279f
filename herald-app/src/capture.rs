//! Microphone capture via cpal.
//!
//! The device callback converts each buffer to little-endian bytes in the
//! device's own format and hands it to [`HeraldEngine::push_audio`].
//! Canonicalization happens inside the engine.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), so the stream is opened, parked and dropped on one dedicated
//! thread. A sync channel reports the open result back to the caller.

use std::sync::{mpsc, Arc};
use std::thread;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, Stream, StreamConfig,
};
use herald_core::{error::Result, AudioChunk, HeraldEngine, HeraldError, SourceFormat};
use serde::Serialize;
use tracing::{error, info, warn};

/// Metadata about an audio input device.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
}

/// List input devices, default first.
pub fn list_input_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut list: Vec<DeviceInfo> = match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                DeviceInfo {
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    name,
                }
            })
            .collect(),
        Err(e) => {
            warn!("failed to enumerate input devices: {e}");
            Vec::new()
        }
    };
    list.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
    list
}

/// Sample types the capture callback accepts.
trait PcmSample: cpal::SizedSample + Send + 'static {
    fn extend_le(samples: &[Self], out: &mut Vec<u8>);
}

impl PcmSample for f32 {
    fn extend_le(samples: &[Self], out: &mut Vec<u8>) {
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
    }
}

impl PcmSample for i16 {
    fn extend_le(samples: &[Self], out: &mut Vec<u8>) {
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
    }
}

impl PcmSample for u8 {
    fn extend_le(samples: &[Self], out: &mut Vec<u8>) {
        out.extend_from_slice(samples);
    }
}

/// Map a cpal sample format onto the engine's source format.
pub fn source_format_for(format: SampleFormat, sample_rate: u32, channels: u16) -> Result<SourceFormat> {
    match format {
        SampleFormat::F32 => Ok(SourceFormat::float(sample_rate, channels)),
        SampleFormat::I16 => Ok(SourceFormat::int(sample_rate, channels, 16)),
        SampleFormat::U8 => Ok(SourceFormat::int(sample_rate, channels, 8)),
        other => Err(HeraldError::UnsupportedFormat(format!(
            "unsupported sample format: {other:?}"
        ))),
    }
}

/// Running capture. Dropping it stops the stream.
pub struct CaptureHandle {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
    pub device_name: String,
    pub format: SourceFormat,
}

impl CaptureHandle {
    /// Open the preferred device (or the default) and start streaming into `engine`.
    ///
    /// Blocks until the device is confirmed open or has failed.
    ///
    /// # Errors
    /// `HeraldError::NoDefaultInputDevice`, `HeraldError::AudioDevice` or
    /// `HeraldError::AudioStream` when the device cannot be opened.
    pub fn start(engine: Arc<HeraldEngine>, preferred_device: Option<String>) -> Result<Self> {
        let (open_tx, open_rx) = mpsc::channel::<Result<(String, SourceFormat)>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("herald-capture".into())
            .spawn(move || {
                let stream = match open_stream(engine, preferred_device.as_deref()) {
                    Ok((stream, name, format)) => {
                        let _ = open_tx.send(Ok((name, format)));
                        stream
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                // Park until stop() or drop; either way the sender goes away.
                let _ = stop_rx.recv();
                drop(stream);
                info!("capture stream closed");
            })
            .map_err(HeraldError::Io)?;

        match open_rx.recv() {
            Ok(Ok((device_name, format))) => Ok(Self {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
                device_name,
                format,
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(HeraldError::AudioStream(
                "capture thread exited before opening the device".into(),
            )),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn select_device(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
    if let Some(preferred_name) = preferred {
        match host.input_devices() {
            Ok(mut devices) => {
                if let Some(device) = devices.find(|device| {
                    device
                        .name()
                        .map(|name| name == preferred_name)
                        .unwrap_or(false)
                }) {
                    return Ok(device);
                }
                warn!(
                    "preferred input device '{}' not found, falling back",
                    preferred_name
                );
            }
            Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
        }
    }

    if let Some(default) = host.default_input_device() {
        return Ok(default);
    }
    let mut devices = host
        .input_devices()
        .map_err(|e| HeraldError::AudioDevice(e.to_string()))?;
    let fallback = devices.next().ok_or(HeraldError::NoDefaultInputDevice)?;
    warn!("no default input device, falling back to first available input");
    Ok(fallback)
}

fn open_stream(
    engine: Arc<HeraldEngine>,
    preferred: Option<&str>,
) -> Result<(Stream, String, SourceFormat)> {
    let host = cpal::default_host();
    let device = select_device(&host, preferred)?;
    let name = device.name().unwrap_or_default();
    info!(device = name.as_str(), "opening input device");

    let supported = device
        .default_input_config()
        .map_err(|e| HeraldError::AudioDevice(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let format = source_format_for(supported.sample_format(), sample_rate, channels)?;
    info!(sample_rate, channels, sample_format = ?supported.sample_format(), "audio config selected");

    let config = StreamConfig {
        channels,
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, format, engine),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, format, engine),
        SampleFormat::U8 => build_stream::<u8>(&device, &config, format, engine),
        other => Err(HeraldError::UnsupportedFormat(format!("{other:?}"))),
    }?;

    stream
        .play()
        .map_err(|e| HeraldError::AudioStream(e.to_string()))?;
    Ok((stream, name, format))
}

fn build_stream<T: PcmSample>(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SourceFormat,
    engine: Arc<HeraldEngine>,
) -> Result<Stream> {
    let errors = Arc::clone(&engine);
    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                let mut bytes = Vec::with_capacity(std::mem::size_of_val(data));
                T::extend_le(data, &mut bytes);
                engine.push_audio(AudioChunk::new(bytes, format));
            },
            move |err| {
                error!("audio stream error: {err}");
                errors.report_capture_error(err.to_string());
            },
            None,
        )
        .map_err(|e| HeraldError::AudioStream(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::SampleEncoding;

    #[test]
    fn maps_supported_sample_formats() {
        let f = source_format_for(SampleFormat::F32, 48_000, 2).unwrap();
        assert_eq!(f.encoding, SampleEncoding::Float);
        assert_eq!((f.sample_rate, f.channels, f.bits_per_sample), (48_000, 2, 32));

        let i = source_format_for(SampleFormat::I16, 16_000, 1).unwrap();
        assert!(i.is_canonical());

        let u = source_format_for(SampleFormat::U8, 8_000, 1).unwrap();
        assert_eq!(u.bits_per_sample, 8);
    }

    #[test]
    fn rejects_other_sample_formats() {
        assert!(matches!(
            source_format_for(SampleFormat::I64, 48_000, 1),
            Err(HeraldError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn samples_serialize_little_endian() {
        let mut out = Vec::new();
        i16::extend_le(&[1, -2], &mut out);
        assert_eq!(out, [0x01, 0x00, 0xFE, 0xFF]);

        out.clear();
        f32::extend_le(&[1.0], &mut out);
        assert_eq!(out, 1.0f32.to_le_bytes());

        out.clear();
        u8::extend_le(&[0, 128, 255], &mut out);
        assert_eq!(out, [0, 128, 255]);
    }
}
