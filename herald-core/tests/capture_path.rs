use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use herald_core::collab::stub::{StubRecognizer, StubWakeDetector};
use herald_core::{
    AudioChunk, CanonicalFrame, Collaborators, EngineConfig, HeraldEngine, SessionState,
    SourceFormat,
};

fn engine() -> HeraldEngine {
    HeraldEngine::new(
        EngineConfig::default(),
        Collaborators {
            wake: Arc::new(StubWakeDetector::new()),
            recognizer: Arc::new(StubRecognizer::new()),
            executors: Vec::new(),
            sound: None,
            status: None,
        },
    )
}

/// 10 ms of interleaved stereo f32 at 48 kHz.
fn stereo_float_chunk(index: usize, amplitude: f32) -> Vec<u8> {
    let frames = 480;
    let mut bytes = Vec::with_capacity(frames * 2 * 4);
    for n in 0..frames {
        let t = (index * frames + n) as f32 / 48_000.0;
        let sample = amplitude * (TAU * 440.0 * t).sin();
        bytes.extend_from_slice(&sample.to_le_bytes());
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

#[tokio::test]
async fn device_audio_is_canonicalized_before_buffering() {
    let engine = engine();
    let mut activity = engine.subscribe_activity();
    engine.start().unwrap();

    let format = SourceFormat::float(48_000, 2);
    for i in 0..100 {
        engine.push_audio(AudioChunk::new(stereo_float_chunk(i, 0.5), format));
    }

    let snap = engine.diagnostics_snapshot();
    assert_eq!(snap.chunks_in, 100);
    assert_eq!(snap.conversion_errors, 0);
    // One second of 16 kHz mono i16, give or take the resampler's rounding.
    assert!(
        (30_000..=32_000).contains(&snap.canonical_bytes),
        "canonical bytes: {}",
        snap.canonical_bytes
    );
    assert_eq!(snap.speech_started, 1);

    let mut saw_speech = false;
    while let Ok(event) = activity.try_recv() {
        saw_speech |= event.is_speech;
    }
    assert!(saw_speech);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn live_threshold_change_applies_to_next_chunk() {
    let engine = engine();
    engine.start().unwrap();
    engine.tuning().set_vad_threshold(0.9);

    let format = SourceFormat::float(48_000, 2);
    for i in 0..20 {
        engine.push_audio(AudioChunk::new(stereo_float_chunk(i, 0.5), format));
    }
    assert_eq!(engine.diagnostics_snapshot().speech_started, 0);

    engine.tuning().set_vad_threshold(0.01);
    engine.push_audio(AudioChunk::new(stereo_float_chunk(20, 0.5), format));
    assert_eq!(engine.diagnostics_snapshot().speech_started, 1);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn capture_errors_are_counted() {
    let engine = engine();
    engine.report_capture_error("device unplugged");
    engine.report_capture_error("device unplugged");
    assert_eq!(engine.diagnostics_snapshot().capture_errors, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_opening_mid_capture_forwards_every_chunk_once() {
    const CHUNKS: usize = 250;
    const CHUNK_BYTES: usize = 640;

    let recognizer = Arc::new(StubRecognizer::new());
    let engine = Arc::new(HeraldEngine::new(
        EngineConfig {
            wake_window_ms: 100,
            wake_confirm_ms: 30_000,
            command_max_ms: 30_000,
            conduit_capacity: 10_000,
            ..EngineConfig::default()
        },
        Collaborators {
            wake: Arc::new(StubWakeDetector::always()),
            recognizer: recognizer.clone(),
            executors: Vec::new(),
            sound: None,
            status: None,
        },
    ));
    engine.start().unwrap();

    // Capture keeps running on its own thread while the session opens, so
    // chunks race the pre-roll snapshot.
    let capture = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || {
            let samples: Vec<i16> = (0..CHUNK_BYTES / 2)
                .map(|i| if i % 2 == 0 { 8_000 } else { -8_000 })
                .collect();
            let bytes = CanonicalFrame::from_samples(&samples).into_bytes();
            for _ in 0..CHUNKS {
                engine.push_audio(AudioChunk::new(bytes.clone(), SourceFormat::CANONICAL));
                std::thread::sleep(Duration::from_millis(2));
            }
        })
    };
    capture.await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(engine.state(), SessionState::Active);
    let snap = engine.diagnostics_snapshot();
    assert_eq!(snap.sessions_opened, 1);
    assert_eq!(snap.conduit_dropped, 0);
    // Everything captured fits in the pre-roll window, so the recognizer
    // must see each chunk exactly once.
    assert_eq!(recognizer.bytes_received(), CHUNKS * CHUNK_BYTES);
    engine.shutdown().await.unwrap();
}
