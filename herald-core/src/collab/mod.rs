//! Contracts for the collaborators the engine drives.
//!
//! Wake detection, streaming recognition, action execution, sound playback
//! and status display all live outside this crate. The engine only relies on
//! the narrow traits below, which keeps the session logic testable with
//! scripted doubles.

pub mod stub;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::buffering::CanonicalFrame;
use crate::error::Result;

/// Outcome of one wake evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WakeResult {
    pub is_wake: bool,
    /// What the detector heard, for logging.
    pub text: String,
}

/// One recognizer hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    pub confidence: f32,
}

impl TranscriptEvent {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            confidence: 0.0,
        }
    }

    pub fn final_text(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            confidence,
        }
    }
}

/// Everything a recognizer reports asynchronously.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    Transcript(TranscriptEvent),
    /// Out-of-band stream failure.
    Error(String),
}

/// Short local inference pass over the last few hundred milliseconds.
#[async_trait]
pub trait WakeDetector: Send + Sync + 'static {
    /// # Errors
    /// Any error is treated by the engine as "no wake".
    async fn detect(&self, window: CanonicalFrame) -> Result<WakeResult>;
}

/// Remote streaming speech recognizer.
///
/// Must tolerate repeated start/stop cycles; `send_audio` after
/// `stop_stream` must be a harmless no-op.
#[async_trait]
pub trait Recognizer: Send + Sync + 'static {
    async fn start_stream(&self) -> Result<()>;
    async fn stop_stream(&self) -> Result<()>;
    async fn send_audio(&self, audio: Vec<u8>) -> Result<()>;

    /// Transcripts and errors. The engine subscribes once at start.
    fn subscribe(&self) -> broadcast::Receiver<RecognizerEvent>;
}

/// Structured result of an action. Never an `Err`: failures are data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
}

impl ActionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Performs one kind of skill action, keyed by [`ActionExecutor::action_type`].
#[async_trait]
pub trait ActionExecutor: Send + Sync + 'static {
    fn action_type(&self) -> &str;
    async fn execute(&self, args: &HashMap<String, String>) -> ActionOutcome;
}

/// Plays a skill's response sound to completion.
#[async_trait]
pub trait SoundPlayer: Send + Sync + 'static {
    async fn play(&self, path: &Path) -> Result<()>;
}

/// Receives the state name on every transition (tray icon, console, ...).
pub trait StatusSink: Send + Sync + 'static {
    fn publish(&self, state: &str) -> Result<()>;
}

/// The full set of collaborators handed to the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub wake: std::sync::Arc<dyn WakeDetector>,
    pub recognizer: std::sync::Arc<dyn Recognizer>,
    pub executors: Vec<std::sync::Arc<dyn ActionExecutor>>,
    pub sound: Option<std::sync::Arc<dyn SoundPlayer>>,
    pub status: Option<std::sync::Arc<dyn StatusSink>>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field(
                "executors",
                &self.executors.iter().map(|e| e.action_type().to_string()).collect::<Vec<_>>(),
            )
            .field("sound", &self.sound.is_some())
            .field("status", &self.status.is_some())
            .finish_non_exhaustive()
    }
}
