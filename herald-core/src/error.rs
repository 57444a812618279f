use thiserror::Error;

/// All errors produced by herald-core.
#[derive(Debug, Error)]
pub enum HeraldError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("unsupported source format: {0}")]
    UnsupportedFormat(String),

    #[error("wake detection error: {0}")]
    WakeDetection(String),

    #[error("recognizer error: {0}")]
    Recognizer(String),

    #[error("sound playback error: {0}")]
    Sound(String),

    #[error("status sink error: {0}")]
    StatusSink(String),

    #[error("invalid skill manifest: {0}")]
    InvalidSkill(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HeraldError>;
