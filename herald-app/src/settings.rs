//! Persistent host settings (JSON file in the user data directory).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use herald_core::{error::Result, EngineConfig, TuningConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub wake_phrase: String,
    pub vad_threshold: f32,
    pub vad_silence_ms: u64,
    pub ring_buffer_ms: u64,
    pub wake_window_ms: u64,
    pub pre_roll_ms: u64,
    pub silence_stop_ms: u64,
    pub command_max_ms: u64,
    pub cooldown_ms: u64,
    pub skills_dir: PathBuf,
    /// BCP-47 tag passed to the recognizer.
    pub language_code: String,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            preferred_input_device: None,
            wake_phrase: engine.tuning.wake_phrase,
            vad_threshold: engine.tuning.vad_threshold,
            vad_silence_ms: engine.tuning.vad_silence_ms,
            ring_buffer_ms: engine.ring_buffer_ms,
            wake_window_ms: engine.wake_window_ms,
            pre_roll_ms: engine.pre_roll_ms,
            silence_stop_ms: engine.silence_stop_ms,
            command_max_ms: engine.command_max_ms,
            cooldown_ms: engine.cooldown_ms,
            skills_dir: PathBuf::from("skills"),
            language_code: "ru-RU".into(),
            log_filter: "herald=info".into(),
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        let defaults = Self::default();

        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.wake_phrase = non_empty_or(&self.wake_phrase, &defaults.wake_phrase);
        self.language_code = non_empty_or(&self.language_code, &defaults.language_code);
        self.log_filter = non_empty_or(&self.log_filter, &defaults.log_filter);
        if self.skills_dir.as_os_str().is_empty() {
            self.skills_dir = defaults.skills_dir;
        }

        if !self.vad_threshold.is_finite() {
            self.vad_threshold = defaults.vad_threshold;
        }
        self.vad_threshold = self.vad_threshold.clamp(0.0005, 0.5);
        self.vad_silence_ms = self.vad_silence_ms.clamp(100, 5_000);
        self.ring_buffer_ms = self.ring_buffer_ms.clamp(500, 10_000);
        self.wake_window_ms = self.wake_window_ms.clamp(200, self.ring_buffer_ms);
        self.pre_roll_ms = self.pre_roll_ms.min(self.ring_buffer_ms);
        self.silence_stop_ms = self.silence_stop_ms.clamp(200, 10_000);
        self.command_max_ms = self.command_max_ms.clamp(1_000, 60_000);
        self.silence_stop_ms = self.silence_stop_ms.min(self.command_max_ms);
        self.cooldown_ms = self.cooldown_ms.min(10_000);
    }

    /// Project onto the engine configuration; unlisted fields keep their defaults.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            ring_buffer_ms: self.ring_buffer_ms,
            wake_window_ms: self.wake_window_ms,
            pre_roll_ms: self.pre_roll_ms,
            silence_stop_ms: self.silence_stop_ms,
            command_max_ms: self.command_max_ms,
            cooldown_ms: self.cooldown_ms,
            tuning: TuningConfig {
                vad_threshold: self.vad_threshold,
                vad_silence_ms: self.vad_silence_ms,
                wake_phrase: self.wake_phrase.clone(),
            },
            ..EngineConfig::default()
        }
    }
}

fn non_empty_or(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Per-user Herald directory holding `settings.json` and, by default, `skills/`.
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    let base = std::env::var_os("APPDATA").map(PathBuf::from);
    #[cfg(not(target_os = "windows"))]
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")));

    match base {
        Some(base) if cfg!(target_os = "windows") => base.join("Herald"),
        Some(base) => base.join("herald"),
        None => PathBuf::from("."),
    }
}

pub fn default_settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

impl AppSettings {
    /// Skills directory with a relative `skills_dir` anchored next to the
    /// settings file rather than the process working directory.
    pub fn skills_dir_for(&self, settings_path: &Path) -> PathBuf {
        if self.skills_dir.is_absolute() {
            return self.skills_dir.clone();
        }
        settings_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| self.skills_dir.clone(), |parent| parent.join(&self.skills_dir))
    }
}

/// Read and normalize settings. A missing file is a first run; an unreadable
/// or malformed one is logged and replaced by defaults in memory only.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<AppSettings>(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "settings file is invalid, using defaults");
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
            AppSettings::default()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "settings file is unreadable, using defaults");
            AppSettings::default()
        }
    };
    settings.normalize();
    settings
}

/// Write through a sibling temp file and rename, so a crash mid-write never
/// leaves a truncated settings file behind.
pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, json)?;
    fs::rename(&staging, path)?;
    Ok(())
}
