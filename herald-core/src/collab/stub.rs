//! Stand-in collaborators used before real engines are wired.
//!
//! `StubWakeDetector` answers wake checks from a flag the host can arm, and
//! `StubRecognizer` swallows audio and emits whatever transcripts are
//! injected into it. Together they let the full session flow be exercised
//! from a console.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use super::{RecognizerEvent, Recognizer, TranscriptEvent, WakeDetector, WakeResult};
use crate::buffering::CanonicalFrame;
use crate::error::Result;

/// Recognizer event channel depth.
const EVENT_CAP: usize = 64;

/// Wake detector that reports a wake only while armed.
#[derive(Debug, Default)]
pub struct StubWakeDetector {
    armed: AtomicBool,
    /// Keep reporting wakes after the first one.
    sticky: bool,
    checks: AtomicUsize,
}

impl StubWakeDetector {
    /// Never wakes until [`arm`](Self::arm) is called; disarms after one wake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes on every check.
    pub fn always() -> Self {
        Self {
            armed: AtomicBool::new(true),
            sticky: true,
            checks: AtomicUsize::new(0),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Number of `detect` calls so far.
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WakeDetector for StubWakeDetector {
    async fn detect(&self, window: CanonicalFrame) -> Result<WakeResult> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let is_wake = if self.sticky {
            self.armed.load(Ordering::SeqCst)
        } else {
            self.armed.swap(false, Ordering::SeqCst)
        };
        debug!(bytes = window.len(), is_wake, "StubWakeDetector::detect");
        Ok(WakeResult {
            is_wake,
            text: format!("[stub: {} ms]", window.duration_ms()),
        })
    }
}

/// Recognizer that accepts audio and emits injected transcripts.
#[derive(Debug)]
pub struct StubRecognizer {
    events: broadcast::Sender<RecognizerEvent>,
    streaming: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    bytes_received: AtomicUsize,
}

impl StubRecognizer {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAP);
        Self {
            events,
            streaming: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            bytes_received: AtomicUsize::new(0),
        }
    }

    /// Emit a transcript as if the remote service had produced it.
    pub fn inject(&self, transcript: TranscriptEvent) {
        let _ = self.events.send(RecognizerEvent::Transcript(transcript));
    }

    /// Emit an out-of-band stream error.
    pub fn inject_error(&self, message: impl Into<String>) {
        let _ = self.events.send(RecognizerEvent::Error(message.into()));
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Audio bytes accepted while streaming.
    pub fn bytes_received(&self) -> usize {
        self.bytes_received.load(Ordering::SeqCst)
    }
}

impl Default for StubRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Recognizer for StubRecognizer {
    async fn start_stream(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.streaming.store(true, Ordering::SeqCst);
        debug!("StubRecognizer::start_stream");
        Ok(())
    }

    async fn stop_stream(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.streaming.store(false, Ordering::SeqCst);
        debug!("StubRecognizer::stop_stream");
        Ok(())
    }

    async fn send_audio(&self, audio: Vec<u8>) -> Result<()> {
        if self.streaming.load(Ordering::SeqCst) {
            self.bytes_received.fetch_add(audio.len(), Ordering::SeqCst);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RecognizerEvent> {
        self.events.subscribe()
    }
}
