//! Events broadcast by the engine to the host.
//!
//! | Event | Accessor |
//! |-------|----------|
//! | `SessionStatusEvent` | `HeraldEngine::subscribe_status` |
//! | `CommandEvent` | `HeraldEngine::subscribe_commands` |
//! | `AudioActivityEvent` | `HeraldEngine::subscribe_activity` |
//!
//! All types serialize with camelCase fields so a UI can consume them as JSON.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// The assistant's session state. Exactly one is current at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionState {
    /// Listening for speech; wake checks run here.
    Idle,
    /// Wake detected; streaming to the recognizer.
    Active,
    /// Running a matched command.
    Execute,
    /// Quiet period after a command.
    Cooldown,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "IDLE",
            SessionState::Active => "ACTIVE",
            SessionState::Execute => "EXECUTE",
            SessionState::Cooldown => "COOLDOWN",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted on every state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub state: SessionState,
    /// Generation minted when this state was entered.
    pub generation: u64,
    /// Why the transition happened (e.g. "silence timeout").
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Emitted after a matched command has run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEvent {
    pub skill_id: String,
    pub action_type: String,
    /// Normalized command text that matched.
    pub command: String,
    pub success: bool,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Audio activity
// ---------------------------------------------------------------------------

/// Emitted for each processed audio chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioActivityEvent {
    pub seq: u64,
    /// RMS level of the chunk in [0.0, 1.0].
    pub rms: f32,
    pub is_speech: bool,
}
