//! Herald headless host.
//!
//! Wires the microphone, skills directory, built-in executors and response
//! sounds to a [`HeraldEngine`], then serves console commands on stdin until
//! `quit` or Ctrl-C.
//!
//! The settings file comes from the first CLI argument, falling back to the
//! per-user data directory.

mod capture;
mod console;
mod executors;
mod playback;
mod settings;
mod skill_loader;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use herald_core::{
    collab::stub::{StubRecognizer, StubWakeDetector},
    Collaborators, HeraldEngine, TranscriptEvent,
};
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::capture::CaptureHandle;
use crate::console::{ConsoleCommand, ConsoleStatus, HELP};

struct Host {
    engine: Arc<HeraldEngine>,
    wake: Arc<StubWakeDetector>,
    recognizer: Arc<StubRecognizer>,
    settings: AppSettings,
    settings_path: PathBuf,
}

impl Host {
    fn reload_skills(&self) -> usize {
        let dir = self.settings.skills_dir_for(&self.settings_path);
        let skills = skill_loader::load_skills(&dir);
        let loaded = skills.len();
        let phrases = self.engine.reload_skills(skills);
        info!(skills = loaded, phrases, dir = %dir.display(), "skills loaded");
        loaded
    }

    fn persist(&self) {
        if let Err(e) = save_settings(&self.settings_path, &self.settings) {
            warn!(path = %self.settings_path.display(), error = %e, "failed to save settings");
        }
    }

    /// Returns `false` when the console should exit.
    fn handle(&mut self, command: ConsoleCommand) -> bool {
        match command {
            ConsoleCommand::Quit => return false,
            ConsoleCommand::Empty => {}
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Invalid(msg) => println!("{msg}; type 'help'"),
            ConsoleCommand::Status => {
                let diagnostics = serde_json::to_string(&self.engine.diagnostics_snapshot())
                    .unwrap_or_else(|e| format!("<unserializable: {e}>"));
                println!(
                    "state={} skills={} wake_phrase='{}'",
                    self.engine.state(),
                    self.engine.skills().read().len(),
                    self.engine.tuning().wake_phrase()
                );
                println!("{diagnostics}");
            }
            ConsoleCommand::Devices => {
                for device in capture::list_input_devices() {
                    let marker = if device.is_default { "*" } else { " " };
                    println!("{marker} {}", device.name);
                }
            }
            ConsoleCommand::Reload => {
                let loaded = self.reload_skills();
                println!("{loaded} skill(s) loaded");
            }
            ConsoleCommand::Arm => self.wake.arm(),
            ConsoleCommand::Say(text) => self.recognizer.inject(TranscriptEvent::final_text(text, 1.0)),
            ConsoleCommand::SetThreshold(value) => {
                self.settings.vad_threshold = value;
                self.settings.normalize();
                self.engine.tuning().set_vad_threshold(self.settings.vad_threshold);
                self.persist();
                println!("vad threshold = {}", self.settings.vad_threshold);
            }
            ConsoleCommand::SetWakePhrase(phrase) => {
                self.settings.wake_phrase = phrase;
                self.settings.normalize();
                self.engine.tuning().set_wake_phrase(self.settings.wake_phrase.clone());
                self.persist();
                println!("wake phrase = '{}'", self.settings.wake_phrase);
            }
        }
        true
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();
    info!(
        path = %settings_path.display(),
        language = settings.language_code.as_str(),
        "Herald starting"
    );

    let wake = Arc::new(StubWakeDetector::new());
    let recognizer = Arc::new(StubRecognizer::new());
    let collab = Collaborators {
        wake: wake.clone(),
        recognizer: recognizer.clone(),
        executors: executors::builtin(),
        sound: Some(Arc::new(playback::WavPlayer)),
        status: Some(Arc::new(ConsoleStatus)),
    };
    let engine = Arc::new(HeraldEngine::new(settings.engine_config(), collab));

    let mut host = Host {
        engine: Arc::clone(&engine),
        wake,
        recognizer,
        settings,
        settings_path,
    };
    host.reload_skills();
    engine.start().context("start engine")?;

    let capture = match CaptureHandle::start(
        Arc::clone(&engine),
        host.settings.preferred_input_device.clone(),
    ) {
        Ok(handle) => {
            info!(device = handle.device_name.as_str(), format = ?handle.format, "capture running");
            Some(handle)
        }
        Err(e) => {
            warn!("microphone unavailable, running without capture: {e}");
            None
        }
    };

    let mut commands = engine.subscribe_commands();
    tokio::spawn(async move {
        loop {
            match commands.recv().await {
                Ok(event) => {
                    let outcome = if event.success { "ok" } else { "failed" };
                    println!(
                        "[herald] {} '{}' -> {} ({outcome}: {})",
                        event.skill_id, event.command, event.action_type, event.message
                    );
                }
                Err(RecvError::Lagged(n)) => warn!("command log lagged by {n} event(s)"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupt received");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !host.handle(ConsoleCommand::parse(&line)) {
                        break;
                    }
                }
                Ok(None) => {
                    info!("stdin closed, waiting for Ctrl-C");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("stdin read failed: {e}");
                    stdin_open = false;
                }
            },
        }
    }

    if let Some(capture) = capture {
        capture.stop();
    }
    engine.shutdown().await.context("shutdown engine")?;
    info!("Herald stopped");
    Ok(())
}
