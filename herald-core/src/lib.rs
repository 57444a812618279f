//! # herald-core
//!
//! Voice command engine: wake detection, streaming recognition and skill
//! dispatch behind a single session state machine.
//!
//! ## Architecture
//!
//! ```text
//! capture callback ─► HeraldEngine::push_audio
//!                        │ Canonicalizer (16 kHz mono i16)
//!                        ├─► RingBuffer (pre-roll history)
//!                        ├─► EnergyVad ──edges──► session actor
//!                        └─► AudioConduit ──────► Recognizer (while ACTIVE)
//!
//! session actor: IDLE ─► ACTIVE ─► EXECUTE ─► COOLDOWN ─► IDLE
//!                  │        ▲          │
//!            WakeDetector   │    ActionExecutor + SoundPlayer
//!                   transcripts ─► CommandRouter ─► SkillIndex
//! ```
//!
//! The capture path never blocks on I/O. All slow work runs on tokio tasks
//! whose results are posted back to the actor.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod collab;
pub mod config;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod skills;
pub mod text;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::{SampleEncoding, SourceFormat};
pub use buffering::{AudioChunk, CanonicalFrame, RingBuffer};
pub use collab::{
    ActionExecutor, ActionOutcome, Collaborators, Recognizer, RecognizerEvent, SoundPlayer,
    StatusSink, TranscriptEvent, WakeDetector, WakeResult,
};
pub use config::{LiveTuning, TuningConfig};
pub use engine::{diagnostics::DiagnosticsSnapshot, EngineConfig, HeraldEngine};
pub use error::HeraldError;
pub use ipc::events::{AudioActivityEvent, CommandEvent, SessionState, SessionStatusEvent};
pub use skills::{SkillAction, SkillIndex, SkillManifest};
