//! `HeraldEngine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! HeraldEngine::new(config, collaborators)
//!     └─► start()           → session actor spawned, state = IDLE
//!         ├─► push_audio()  → canonicalize → ring → VAD → (conduit)
//!         └─► shutdown()    → timers/tasks cancelled, bounded wait
//! ```
//!
//! `start()`/`shutdown()` return an error when called in the wrong state
//! rather than panicking.
//!
//! ## Threading
//!
//! `push_audio` is synchronous and never blocks on I/O, so it can be called
//! straight from a device callback thread. Everything slower (wake checks,
//! recognizer calls, executors, sound) runs on tokio tasks owned by the
//! session actor.

pub mod conduit;
pub mod diagnostics;
mod session;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    audio::Canonicalizer,
    buffering::{AudioChunk, RingBuffer},
    collab::{Collaborators, RecognizerEvent},
    config::{LiveTuning, TuningConfig},
    error::{HeraldError, Result},
    ipc::events::{AudioActivityEvent, CommandEvent, SessionState, SessionStatusEvent},
    skills::{SkillIndex, SkillManifest},
    text::CommandRouter,
    vad::{EnergyVad, VadEvent, VoiceActivityDetector},
};

use conduit::{AudioConduit, PushOutcome};
use diagnostics::{DiagnosticsSnapshot, EngineDiagnostics};
use session::{SessionActor, SessionContext, SessionMsg};

/// Broadcast channel capacity for host-facing events.
const BROADCAST_CAP: usize = 256;

/// Configuration for `HeraldEngine`. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Pre-roll history kept by the ring buffer. Default: 2500.
    pub ring_buffer_ms: u64,
    /// Audio handed to the wake detector, and the delay after speech start
    /// before the check runs. Default: 1200.
    pub wake_window_ms: u64,
    /// History replayed to the recognizer when a session opens. Default: 2000.
    pub pre_roll_ms: u64,
    /// Quiet time after speech ends before an ACTIVE session closes. Default: 900.
    pub silence_stop_ms: u64,
    /// Quiet period after a command. Default: 500.
    pub cooldown_ms: u64,
    /// Deadline for a transcript confirming the wake phrase. Default: 3000.
    pub wake_confirm_ms: u64,
    /// Hard limit on one ACTIVE session. Default: 6000.
    pub command_max_ms: u64,
    /// Chunks queued for the recognizer before the oldest is dropped. Default: 50.
    pub conduit_capacity: usize,
    pub stream_start_timeout_ms: u64,
    pub teardown_timeout_ms: u64,
    pub action_timeout_ms: u64,
    pub sound_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    /// Initial values for [`LiveTuning`].
    pub tuning: TuningConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_buffer_ms: 2_500,
            wake_window_ms: 1_200,
            pre_roll_ms: 2_000,
            silence_stop_ms: 900,
            cooldown_ms: 500,
            wake_confirm_ms: 3_000,
            command_max_ms: 6_000,
            conduit_capacity: 50,
            stream_start_timeout_ms: 3_000,
            teardown_timeout_ms: 500,
            action_timeout_ms: 10_000,
            sound_timeout_ms: 5_000,
            shutdown_timeout_ms: 800,
            tuning: TuningConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn silence_stop(&self) -> Duration {
        Duration::from_millis(self.silence_stop_ms)
    }

    pub fn wake_confirm(&self) -> Duration {
        Duration::from_millis(self.wake_confirm_ms)
    }

    pub fn stream_start_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_start_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn sound_timeout(&self) -> Duration {
        Duration::from_millis(self.sound_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// State touched on every captured chunk.
struct CapturePath {
    canonicalizer: Canonicalizer,
    vad: EnergyVad,
    seq: u64,
    /// Set while the session actor is running.
    session: Option<mpsc::UnboundedSender<SessionMsg>>,
}

struct RunHandle {
    tx: mpsc::UnboundedSender<SessionMsg>,
    actor: JoinHandle<()>,
    relay: JoinHandle<()>,
    cancel: CancellationToken,
}

/// The top-level engine handle.
///
/// `HeraldEngine` is `Send + Sync`; all fields use interior mutability.
/// Wrap in `Arc<HeraldEngine>` to share it between the capture callback and
/// the host's async tasks.
pub struct HeraldEngine {
    config: EngineConfig,
    collab: Collaborators,
    tuning: Arc<LiveTuning>,
    ring: Arc<RingBuffer>,
    skills: Arc<RwLock<SkillIndex>>,
    router: CommandRouter,
    capture: Mutex<CapturePath>,
    conduit: Arc<Mutex<Option<AudioConduit>>>,
    run: Mutex<Option<RunHandle>>,
    running: AtomicBool,
    state_tx: Arc<watch::Sender<SessionState>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    command_tx: broadcast::Sender<CommandEvent>,
    activity_tx: broadcast::Sender<AudioActivityEvent>,
    diagnostics: Arc<EngineDiagnostics>,
}

impl HeraldEngine {
    /// Create a new engine. Does not start the session actor; call `start()`.
    pub fn new(config: EngineConfig, collab: Collaborators) -> Self {
        let tuning = Arc::new(LiveTuning::new(&config.tuning));
        let skills = Arc::new(RwLock::new(SkillIndex::new()));
        let router = CommandRouter::new(Arc::clone(&skills), Arc::clone(&tuning));
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (command_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            ring: Arc::new(RingBuffer::new(config.ring_buffer_ms)),
            capture: Mutex::new(CapturePath {
                canonicalizer: Canonicalizer::new(),
                vad: EnergyVad::new(Arc::clone(&tuning)),
                seq: 0,
                session: None,
            }),
            config,
            collab,
            tuning,
            skills,
            router,
            conduit: Arc::new(Mutex::new(None)),
            run: Mutex::new(None),
            running: AtomicBool::new(false),
            state_tx: Arc::new(state_tx),
            status_tx,
            command_tx,
            activity_tx,
            diagnostics: Arc::new(EngineDiagnostics::default()),
        }
    }

    /// Spawn the session actor and the recognizer event relay.
    ///
    /// # Errors
    /// - `HeraldError::AlreadyRunning` if already started.
    /// - `HeraldError::Other` when called outside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut run = self.run.lock();
        if run.is_some() {
            return Err(HeraldError::AlreadyRunning);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HeraldError::Other(anyhow::anyhow!("no tokio runtime: {e}")))?;

        self.diagnostics.reset();
        self.state_tx.send_replace(SessionState::Idle);

        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = SessionContext {
            config: self.config.clone(),
            ring: Arc::clone(&self.ring),
            router: self.router.clone(),
            collab: self.collab.clone(),
            conduit: Arc::clone(&self.conduit),
            state_tx: Arc::clone(&self.state_tx),
            status_tx: self.status_tx.clone(),
            command_tx: self.command_tx.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        };
        let actor = runtime.spawn(SessionActor::new(ctx, tx.clone(), rx).run());

        let cancel = CancellationToken::new();
        let relay = runtime.spawn(relay_recognizer_events(
            self.collab.recognizer.subscribe(),
            tx.clone(),
            cancel.clone(),
        ));

        {
            let mut capture = self.capture.lock();
            capture.vad.reset();
            capture.session = Some(tx.clone());
        }

        *run = Some(RunHandle {
            tx,
            actor,
            relay,
            cancel,
        });
        self.running.store(true, Ordering::SeqCst);
        info!(skills = self.skills.read().len(), "engine started; listening");
        Ok(())
    }

    /// Cancel every timer and task and wait (bounded) for the actor to stop.
    ///
    /// # Errors
    /// - `HeraldError::NotRunning` if not currently running.
    pub async fn shutdown(&self) -> Result<()> {
        let run = self.run.lock().take();
        let Some(run) = run else {
            return Err(HeraldError::NotRunning);
        };

        self.running.store(false, Ordering::SeqCst);
        self.capture.lock().session = None;
        run.cancel.cancel();

        let (ack_tx, ack_rx) = oneshot::channel();
        let _ = run.tx.send(SessionMsg::Shutdown(ack_tx));
        if timeout(self.config.shutdown_timeout(), ack_rx).await.is_err() {
            warn!(
                timeout_ms = self.config.shutdown_timeout_ms,
                "session actor did not stop in time; aborting"
            );
            run.actor.abort();
        }
        run.relay.abort();

        if let Some(conduit) = self.conduit.lock().take() {
            conduit.close();
        }
        self.state_tx.send_replace(SessionState::Idle);
        info!("engine stopped");
        Ok(())
    }

    /// Feed one captured chunk through the capture path.
    ///
    /// Canonicalizes, appends to the ring buffer, runs the VAD and, while a
    /// session is ACTIVE, queues the chunk for the recognizer. Chunks pushed
    /// while the engine is stopped are discarded.
    pub fn push_audio(&self, chunk: AudioChunk) {
        if chunk.is_empty() {
            return;
        }
        let mut guard = self.capture.lock();
        let capture = &mut *guard;
        let Some(session) = capture.session.as_ref() else {
            return;
        };
        EngineDiagnostics::bump(&self.diagnostics.chunks_in);

        let frame = match capture.canonicalizer.convert(&chunk.bytes, chunk.format) {
            Ok(frame) => frame,
            Err(e) => {
                EngineDiagnostics::bump(&self.diagnostics.conversion_errors);
                warn!(error = %e, "dropping chunk that could not be canonicalized");
                return;
            }
        };
        if frame.is_empty() {
            return;
        }
        self.diagnostics
            .canonical_bytes
            .fetch_add(frame.len(), Ordering::Relaxed);

        {
            let conduit = self.conduit.lock();
            self.ring.add(frame.as_bytes());
            if let Some(conduit) = conduit.as_ref() {
                if conduit.push(frame.as_bytes().to_vec()) == PushOutcome::DroppedOldest {
                    EngineDiagnostics::bump(&self.diagnostics.conduit_dropped);
                }
            }
        }

        if let Some(event) = capture.vad.process_at(&frame, chunk.captured_at) {
            match event {
                VadEvent::SpeechStarted => {
                    EngineDiagnostics::bump(&self.diagnostics.speech_started)
                }
                VadEvent::SpeechEnded => EngineDiagnostics::bump(&self.diagnostics.speech_ended),
            }
            debug!(?event, rms = capture.vad.last_rms(), "vad edge");
            let _ = session.send(SessionMsg::Vad(event));
        }

        capture.seq += 1;
        let _ = self.activity_tx.send(AudioActivityEvent {
            seq: capture.seq,
            rms: capture.vad.last_rms(),
            is_speech: capture.vad.is_speaking(),
        });
    }

    /// Record a capture-side failure. Capture is not restarted.
    pub fn report_capture_error(&self, message: impl AsRef<str>) {
        EngineDiagnostics::bump(&self.diagnostics.capture_errors);
        warn!(error = message.as_ref(), "audio capture error");
    }

    /// Swap in a new skill set. Returns the number of indexed phrases.
    pub fn reload_skills(&self, manifests: Vec<SkillManifest>) -> usize {
        let skills = manifests.len();
        let mut index = self.skills.write();
        index.replace_all(manifests);
        info!(skills, phrases = index.len(), "skills reloaded");
        index.len()
    }

    /// Runtime-adjustable tuning shared with the VAD and router.
    pub fn tuning(&self) -> &Arc<LiveTuning> {
        &self.tuning
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn skills(&self) -> &Arc<RwLock<SkillIndex>> {
        &self.skills
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current session state (snapshot).
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watch session state changes; always holds the latest value.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to every state transition.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to executed commands.
    pub fn subscribe_commands(&self) -> broadcast::Receiver<CommandEvent> {
        self.command_tx.subscribe()
    }

    /// Subscribe to live level / speech activity.
    pub fn subscribe_activity(&self) -> broadcast::Receiver<AudioActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Snapshot of engine counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

/// Forward recognizer notifications into the session queue.
async fn relay_recognizer_events(
    mut events: broadcast::Receiver<RecognizerEvent>,
    tx: mpsc::UnboundedSender<SessionMsg>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let msg = match event {
            Ok(RecognizerEvent::Transcript(transcript)) => SessionMsg::Transcript(transcript),
            Ok(RecognizerEvent::Error(message)) => SessionMsg::RecognizerError(message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "recognizer events lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if tx.send(msg).is_err() {
            break;
        }
    }
    debug!("recognizer relay stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SourceFormat;
    use crate::collab::stub::{StubRecognizer, StubWakeDetector};

    fn stub_collaborators() -> Collaborators {
        Collaborators {
            wake: Arc::new(StubWakeDetector::new()),
            recognizer: Arc::new(StubRecognizer::new()),
            executors: Vec::new(),
            sound: None,
            status: None,
        }
    }

    #[test]
    fn config_fills_missing_fields_with_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"cooldownMs": 250, "tuning": {"wakePhrase": "компьютер"}}"#)
                .unwrap();
        assert_eq!(cfg.cooldown_ms, 250);
        assert_eq!(cfg.wake_window_ms, 1_200);
        assert_eq!(cfg.conduit_capacity, 50);
        assert_eq!(cfg.tuning.wake_phrase, "компьютер");
        assert_eq!(cfg.tuning.vad_silence_ms, 500);
    }

    #[test]
    fn start_outside_runtime_is_an_error() {
        let engine = HeraldEngine::new(EngineConfig::default(), stub_collaborators());
        assert!(matches!(engine.start(), Err(HeraldError::Other(_))));
        assert!(!engine.is_running());
    }

    #[test]
    fn audio_before_start_is_discarded() {
        let engine = HeraldEngine::new(EngineConfig::default(), stub_collaborators());
        engine.push_audio(AudioChunk::new(vec![0; 640], SourceFormat::CANONICAL));
        assert_eq!(engine.diagnostics_snapshot().chunks_in, 0);
        assert_eq!(engine.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn start_twice_and_stop_twice_are_errors() {
        let engine = HeraldEngine::new(EngineConfig::default(), stub_collaborators());
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(HeraldError::AlreadyRunning)));
        engine.shutdown().await.unwrap();
        assert!(matches!(engine.shutdown().await, Err(HeraldError::NotRunning)));
    }

    #[tokio::test]
    async fn push_audio_fills_ring_and_reports_activity() {
        let engine = HeraldEngine::new(EngineConfig::default(), stub_collaborators());
        let mut activity = engine.subscribe_activity();
        engine.start().unwrap();

        engine.push_audio(AudioChunk::new(vec![0; 640], SourceFormat::CANONICAL));

        let event = activity.recv().await.unwrap();
        assert_eq!(event.seq, 1);
        assert!(!event.is_speech);
        let snap = engine.diagnostics_snapshot();
        assert_eq!(snap.chunks_in, 1);
        assert_eq!(snap.canonical_bytes, 640);
        assert_eq!(engine.ring.len(), 640);

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_format_is_counted_not_fatal() {
        let engine = HeraldEngine::new(EngineConfig::default(), stub_collaborators());
        engine.start().unwrap();
        let twelve_bit = SourceFormat {
            bits_per_sample: 12,
            ..SourceFormat::CANONICAL
        };
        engine.push_audio(AudioChunk::new(vec![0; 64], twelve_bit));
        assert_eq!(engine.diagnostics_snapshot().conversion_errors, 1);
        assert!(engine.ring.is_empty());
        engine.shutdown().await.unwrap();
    }
}
