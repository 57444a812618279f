//! The session actor.
//!
//! One task owns [`SessionState`] and applies every trigger in arrival
//! order: VAD edges from the capture path, recognizer transcripts, timer
//! expiries and results posted back by background work. Nothing else mutates
//! the state, so transitions never interleave.
//!
//! Every state entry mints a new generation. Timers and background tasks
//! carry the generation they were created under and their messages are
//! dropped once it is no longer current.
//!
//! ```text
//!  IDLE ──wake──► ACTIVE ──command──► EXECUTE ──done──► COOLDOWN
//!   ▲               │                                      │
//!   └── silence / mismatch / timeout ◄──────── elapsed ────┘
//! ```

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use super::conduit::AudioConduit;
use super::diagnostics::EngineDiagnostics;
use super::EngineConfig;
use crate::buffering::{CanonicalFrame, RingBuffer};
use crate::collab::{
    ActionExecutor, ActionOutcome, Collaborators, Recognizer, SoundPlayer, TranscriptEvent,
    WakeResult,
};
use crate::error::Result;
use crate::ipc::events::{CommandEvent, SessionState, SessionStatusEvent};
use crate::text::{CommandRouter, RouteMatch, WakeCheck};
use crate::vad::VadEvent;

/// Everything the actor reacts to.
#[derive(Debug)]
pub(crate) enum SessionMsg {
    Vad(VadEvent),
    WakeCheckDue { run: u64 },
    WakeChecked { generation: u64, result: Result<WakeResult> },
    Transcript(TranscriptEvent),
    RecognizerError(String),
    StreamFailed { generation: u64, reason: String },
    SilenceElapsed { generation: u64 },
    ConfirmDeadline { generation: u64 },
    SessionCap { generation: u64 },
    ExecutionFinished { generation: u64 },
    CooldownElapsed { generation: u64 },
    Shutdown(oneshot::Sender<()>),
}

/// Handles shared between the engine and the actor.
pub(crate) struct SessionContext {
    pub config: EngineConfig,
    pub ring: Arc<RingBuffer>,
    pub router: CommandRouter,
    pub collab: Collaborators,
    /// Conduit the capture path feeds while a session is ACTIVE.
    pub conduit: Arc<Mutex<Option<AudioConduit>>>,
    pub state_tx: Arc<watch::Sender<SessionState>>,
    pub status_tx: broadcast::Sender<SessionStatusEvent>,
    pub command_tx: broadcast::Sender<CommandEvent>,
    pub diagnostics: Arc<EngineDiagnostics>,
}

struct Forwarder {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub(crate) struct SessionActor {
    ctx: SessionContext,
    executors: HashMap<String, Arc<dyn ActionExecutor>>,
    tx: mpsc::UnboundedSender<SessionMsg>,
    rx: mpsc::UnboundedReceiver<SessionMsg>,

    state: SessionState,
    generation: u64,
    entered_at: Instant,
    /// Bumped on every SpeechStarted seen while IDLE.
    speech_run: u64,
    wake_checked: bool,
    wake_confirmed: bool,

    wake_timer: Option<JoinHandle<()>>,
    silence_timer: Option<JoinHandle<()>>,
    /// Timers scoped to the current state; aborted on every transition.
    state_timers: Vec<JoinHandle<()>>,
    forwarder: Option<Forwarder>,
    /// Wake checks and command executions.
    tasks: JoinSet<()>,
    span: Span,
}

impl SessionActor {
    pub(crate) fn new(
        ctx: SessionContext,
        tx: mpsc::UnboundedSender<SessionMsg>,
        rx: mpsc::UnboundedReceiver<SessionMsg>,
    ) -> Self {
        let mut executors: HashMap<String, Arc<dyn ActionExecutor>> = HashMap::new();
        for executor in &ctx.collab.executors {
            let key = executor.action_type().to_string();
            if executors.insert(key.clone(), Arc::clone(executor)).is_some() {
                warn!(action_type = %key, "duplicate executor registered; last one wins");
            }
        }

        Self {
            ctx,
            executors,
            tx,
            rx,
            state: SessionState::Idle,
            generation: 0,
            entered_at: Instant::now(),
            speech_run: 0,
            wake_checked: false,
            wake_confirmed: false,
            wake_timer: None,
            silence_timer: None,
            state_timers: Vec::new(),
            forwarder: None,
            tasks: JoinSet::new(),
            span: Span::none(),
        }
    }

    pub(crate) async fn run(mut self) {
        info!(executors = self.executors.len(), "session actor started");
        self.publish("engine started");

        loop {
            tokio::select! {
                msg = self.rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let SessionMsg::Shutdown(ack) = msg {
                        self.shutdown().await;
                        let _ = ack.send(());
                        break;
                    }
                    self.handle(msg).await;
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            warn!("session background task panicked");
                        }
                    }
                }
            }
        }

        info!("session actor stopped");
    }

    async fn handle(&mut self, msg: SessionMsg) {
        match msg {
            SessionMsg::Vad(event) => self.on_vad(event),
            SessionMsg::WakeCheckDue { run } => self.on_wake_check_due(run),
            SessionMsg::WakeChecked { generation, result } => {
                self.on_wake_checked(generation, result).await
            }
            SessionMsg::Transcript(transcript) => self.on_transcript(transcript).await,
            SessionMsg::RecognizerError(message) => {
                EngineDiagnostics::bump(&self.ctx.diagnostics.recognizer_errors);
                warn!(parent: &self.span, state = %self.state, error = %message, "recognizer reported an error");
            }
            SessionMsg::StreamFailed { generation, reason } => {
                if self.is_current(generation, SessionState::Active) {
                    warn!(parent: &self.span, %reason, "recognizer stream failed to start");
                    self.transition(SessionState::Idle, "recognizer unavailable").await;
                }
            }
            SessionMsg::SilenceElapsed { generation } => {
                if self.is_current(generation, SessionState::Active) {
                    self.transition(SessionState::Idle, "silence timeout").await;
                }
            }
            SessionMsg::ConfirmDeadline { generation } => {
                if self.is_current(generation, SessionState::Active) && !self.wake_confirmed {
                    self.transition(SessionState::Idle, "wake confirmation timeout").await;
                }
            }
            SessionMsg::SessionCap { generation } => {
                if self.is_current(generation, SessionState::Active) {
                    self.transition(SessionState::Idle, "session time limit").await;
                }
            }
            SessionMsg::ExecutionFinished { generation } => {
                if self.is_current(generation, SessionState::Execute) {
                    self.transition(SessionState::Cooldown, "command finished").await;
                }
            }
            SessionMsg::CooldownElapsed { generation } => {
                if self.is_current(generation, SessionState::Cooldown) {
                    self.transition(SessionState::Idle, "cooldown elapsed").await;
                }
            }
            SessionMsg::Shutdown(ack) => {
                let _ = ack.send(());
            }
        }
    }

    fn is_current(&self, generation: u64, state: SessionState) -> bool {
        let current = generation == self.generation && self.state == state;
        if !current {
            debug!(
                generation,
                current_generation = self.generation,
                state = %self.state,
                "ignoring stale session message"
            );
        }
        current
    }

    // ── Triggers ────────────────────────────────────────────────────────────

    fn on_vad(&mut self, event: VadEvent) {
        match (event, self.state) {
            (VadEvent::SpeechStarted, SessionState::Idle) => {
                if let Some(timer) = self.wake_timer.take() {
                    timer.abort();
                }
                self.wake_checked = false;
                self.speech_run += 1;
                let window = Duration::from_millis(self.ctx.config.wake_window_ms);
                self.wake_timer = Some(self.schedule(
                    window,
                    SessionMsg::WakeCheckDue {
                        run: self.speech_run,
                    },
                ));
                debug!(run = self.speech_run, "speech started; wake check armed");
            }
            (VadEvent::SpeechStarted, SessionState::Active) => {
                if let Some(timer) = self.silence_timer.take() {
                    timer.abort();
                }
            }
            (VadEvent::SpeechEnded, SessionState::Active) => {
                if let Some(timer) = self.silence_timer.take() {
                    timer.abort();
                }
                self.silence_timer = Some(self.schedule(
                    self.ctx.config.silence_stop(),
                    SessionMsg::SilenceElapsed {
                        generation: self.generation,
                    },
                ));
            }
            _ => {}
        }
    }

    fn on_wake_check_due(&mut self, run: u64) {
        self.wake_timer = None;
        if run != self.speech_run || self.state != SessionState::Idle || self.wake_checked {
            debug!(run, state = %self.state, "wake check skipped");
            return;
        }

        let window = self
            .ctx
            .ring
            .get_last(i64::try_from(self.ctx.config.wake_window_ms).unwrap_or(i64::MAX));
        if window.is_empty() {
            debug!("wake window empty; skipping check");
            return;
        }

        self.wake_checked = true;
        EngineDiagnostics::bump(&self.ctx.diagnostics.wake_checks);

        let wake = Arc::clone(&self.ctx.collab.wake);
        let tx = self.tx.clone();
        let generation = self.generation;
        self.tasks.spawn(async move {
            let result = wake.detect(CanonicalFrame::from_bytes(window)).await;
            let _ = tx.send(SessionMsg::WakeChecked { generation, result });
        });
    }

    async fn on_wake_checked(&mut self, generation: u64, result: Result<WakeResult>) {
        if !self.is_current(generation, SessionState::Idle) {
            return;
        }
        match result {
            Ok(wake) if wake.is_wake => {
                EngineDiagnostics::bump(&self.ctx.diagnostics.wake_hits);
                info!(heard = %wake.text, "wake word detected");
                self.transition(SessionState::Active, "wake word detected").await;
            }
            Ok(wake) => debug!(heard = %wake.text, "no wake word"),
            Err(e) => {
                EngineDiagnostics::bump(&self.ctx.diagnostics.wake_errors);
                warn!(error = %e, "wake detection failed; treating as no wake");
            }
        }
    }

    async fn on_transcript(&mut self, transcript: TranscriptEvent) {
        if self.state != SessionState::Active {
            debug!(state = %self.state, text = %transcript.text, "transcript outside ACTIVE ignored");
            return;
        }
        EngineDiagnostics::bump(&self.ctx.diagnostics.transcripts);
        debug!(
            parent: &self.span,
            text = %transcript.text,
            is_final = transcript.is_final,
            confidence = transcript.confidence,
            "transcript"
        );

        if !self.wake_confirmed {
            if self.entered_at.elapsed() > self.ctx.config.wake_confirm() {
                self.transition(SessionState::Idle, "wake confirmation timeout")
                    .await;
                return;
            }
            match self.ctx.router.check_wake(&transcript.text) {
                WakeCheck::Noise => return,
                WakeCheck::Partial => {
                    debug!(parent: &self.span, text = %transcript.text, "partial wake phrase; waiting");
                    return;
                }
                WakeCheck::Mismatch => {
                    info!(parent: &self.span, text = %transcript.text, "transcript does not start with wake phrase");
                    self.transition(SessionState::Idle, "wake phrase mismatch")
                        .await;
                    return;
                }
                WakeCheck::Confirmed => {
                    info!(
                        parent: &self.span,
                        elapsed_ms = self.entered_at.elapsed().as_millis() as u64,
                        "wake phrase confirmed"
                    );
                    self.wake_confirmed = true;
                }
            }
        }

        if let Some(route) = self.ctx.router.route(&transcript.text) {
            self.begin_execution(route).await;
        }
    }

    // ── Transitions ─────────────────────────────────────────────────────────

    async fn transition(&mut self, to: SessionState, reason: &str) {
        if to == self.state {
            debug!(state = %to, "already in requested state");
            return;
        }

        let from = self.state;
        let dwell_ms = self.entered_at.elapsed().as_millis() as u64;
        if from == SessionState::Active {
            self.end_active_session().await;
        }
        for timer in self.state_timers.drain(..) {
            timer.abort();
        }

        self.generation += 1;
        self.state = to;
        self.entered_at = Instant::now();
        info!(
            from = %from,
            to = %to,
            generation = self.generation,
            elapsed_ms = dwell_ms,
            reason,
            "session transition"
        );

        match to {
            SessionState::Active => self.begin_active_session(),
            SessionState::Cooldown => {
                let timer = self.schedule(
                    Duration::from_millis(self.ctx.config.cooldown_ms),
                    SessionMsg::CooldownElapsed {
                        generation: self.generation,
                    },
                );
                self.state_timers.push(timer);
            }
            SessionState::Idle | SessionState::Execute => {}
        }

        self.publish(reason);
    }

    fn begin_active_session(&mut self) {
        EngineDiagnostics::bump(&self.ctx.diagnostics.sessions_opened);
        self.wake_confirmed = false;
        self.span = info_span!("session", generation = self.generation);

        let conduit = AudioConduit::bounded(self.ctx.config.conduit_capacity);
        {
            // The capture path writes the ring under this same lock, so every
            // chunk lands either in the pre-roll or behind it, exactly once.
            let mut slot = self.ctx.conduit.lock();
            let pre_roll = self
                .ctx
                .ring
                .get_last(i64::try_from(self.ctx.config.pre_roll_ms).unwrap_or(i64::MAX));
            debug!(parent: &self.span, bytes = pre_roll.len(), "queueing pre-roll");
            if !pre_roll.is_empty() {
                conduit.push(pre_roll);
            }
            *slot = Some(conduit.clone());
        }

        let cancel = CancellationToken::new();
        let forward = forward_audio(ForwardTask {
            recognizer: Arc::clone(&self.ctx.collab.recognizer),
            conduit,
            cancel: cancel.clone(),
            start_timeout: self.ctx.config.stream_start_timeout(),
            tx: self.tx.clone(),
            generation: self.generation,
        });
        let handle = tokio::spawn(forward.instrument(self.span.clone()));
        self.forwarder = Some(Forwarder { cancel, handle });

        let generation = self.generation;
        let confirm = self.schedule(
            self.ctx.config.wake_confirm(),
            SessionMsg::ConfirmDeadline { generation },
        );
        let cap = self.schedule(
            Duration::from_millis(self.ctx.config.command_max_ms),
            SessionMsg::SessionCap { generation },
        );
        self.state_timers.extend([confirm, cap]);
    }

    /// Best-effort teardown; each await is bounded by the teardown timeout.
    async fn end_active_session(&mut self) {
        if let Some(conduit) = self.ctx.conduit.lock().take() {
            conduit.close();
        }
        if let Some(timer) = self.silence_timer.take() {
            timer.abort();
        }

        let teardown = self.ctx.config.teardown_timeout();
        if let Some(Forwarder { cancel, mut handle }) = self.forwarder.take() {
            cancel.cancel();
            if timeout(teardown, &mut handle).await.is_err() {
                warn!(parent: &self.span, "audio forwarder did not stop in time; aborting");
                handle.abort();
            }
        }

        match timeout(teardown, self.ctx.collab.recognizer.stop_stream()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(parent: &self.span, error = %e, "failed to stop recognizer stream"),
            Err(_) => warn!(parent: &self.span, "recognizer stop timed out"),
        }

        self.wake_confirmed = false;
        self.span = Span::none();
    }

    async fn begin_execution(&mut self, route: RouteMatch) {
        EngineDiagnostics::bump(&self.ctx.diagnostics.commands_matched);
        info!(
            parent: &self.span,
            skill_id = %route.manifest.id,
            command = %route.command,
            action_type = %route.action().action_type,
            elapsed_ms = self.entered_at.elapsed().as_millis() as u64,
            "command matched"
        );
        let span = self.span.clone();

        self.transition(SessionState::Execute, "command matched").await;

        let job = CommandJob {
            executor: self.executors.get(&route.action().action_type).cloned(),
            route,
            sound: self.ctx.collab.sound.clone(),
            action_timeout: self.ctx.config.action_timeout(),
            sound_timeout: self.ctx.config.sound_timeout(),
            command_tx: self.ctx.command_tx.clone(),
            diagnostics: Arc::clone(&self.ctx.diagnostics),
        };
        let tx = self.tx.clone();
        let generation = self.generation;
        self.tasks.spawn(
            async move {
                job.run().await;
                let _ = tx.send(SessionMsg::ExecutionFinished { generation });
            }
            .instrument(span),
        );
    }

    async fn shutdown(&mut self) {
        info!(state = %self.state, "session actor shutting down");
        if self.state == SessionState::Active {
            self.end_active_session().await;
        }
        for timer in self
            .state_timers
            .drain(..)
            .chain(self.wake_timer.take())
            .chain(self.silence_timer.take())
        {
            timer.abort();
        }
        self.tasks.abort_all();
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    fn schedule(&self, delay: Duration, msg: SessionMsg) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(msg);
        })
    }

    fn publish(&self, detail: &str) {
        self.ctx.state_tx.send_replace(self.state);
        let _ = self.ctx.status_tx.send(SessionStatusEvent {
            state: self.state,
            generation: self.generation,
            detail: Some(detail.to_string()),
        });

        if let Some(sink) = &self.ctx.collab.status {
            match catch_unwind(AssertUnwindSafe(|| sink.publish(self.state.as_str()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "status sink rejected update"),
                Err(_) => warn!("status sink panicked"),
            }
        }
    }
}

// ── Audio forwarding ────────────────────────────────────────────────────────

struct ForwardTask {
    recognizer: Arc<dyn Recognizer>,
    conduit: AudioConduit,
    cancel: CancellationToken,
    start_timeout: Duration,
    tx: mpsc::UnboundedSender<SessionMsg>,
    generation: u64,
}

/// Opens the recognizer stream, then relays conduit chunks one at a time.
async fn forward_audio(task: ForwardTask) {
    let ForwardTask {
        recognizer,
        conduit,
        cancel,
        start_timeout,
        tx,
        generation,
    } = task;

    let started = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        r = timeout(start_timeout, recognizer.start_stream()) => r,
    };
    let failure = match started {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("start timed out after {} ms", start_timeout.as_millis())),
    };
    if let Some(reason) = failure {
        let _ = tx.send(SessionMsg::StreamFailed { generation, reason });
        return;
    }
    debug!("recognizer stream open");

    let mut forwarded = 0usize;
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            chunk = conduit.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };
        let len = chunk.len();
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = recognizer.send_audio(chunk) => sent,
        };
        match sent {
            Ok(()) => forwarded += len,
            Err(e) => warn!(error = %e, "failed to send audio to recognizer"),
        }
    }
    debug!(bytes = forwarded, "audio forwarder finished");
}

// ── Command execution ───────────────────────────────────────────────────────

struct CommandJob {
    route: RouteMatch,
    executor: Option<Arc<dyn ActionExecutor>>,
    sound: Option<Arc<dyn SoundPlayer>>,
    action_timeout: Duration,
    sound_timeout: Duration,
    command_tx: broadcast::Sender<CommandEvent>,
    diagnostics: Arc<EngineDiagnostics>,
}

impl CommandJob {
    async fn run(self) {
        let action = self.route.action();
        let started = Instant::now();

        let outcome = match &self.executor {
            None => {
                warn!(action_type = %action.action_type, "no executor registered for action type");
                ActionOutcome::failed(format!(
                    "no executor for action type '{}'",
                    action.action_type
                ))
            }
            Some(executor) => {
                let executor = Arc::clone(executor);
                let args = action.args.clone();
                let mut call = tokio::spawn(async move { executor.execute(&args).await });
                match timeout(self.action_timeout, &mut call).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => ActionOutcome::failed(format!("executor crashed: {e}")),
                    Err(_) => {
                        call.abort();
                        ActionOutcome::failed("executor timed out")
                    }
                }
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if outcome.success {
            info!(skill_id = %self.route.manifest.id, elapsed_ms, message = %outcome.message, "action executed");
        } else {
            EngineDiagnostics::bump(&self.diagnostics.actions_failed);
            warn!(skill_id = %self.route.manifest.id, elapsed_ms, message = %outcome.message, "action failed");
        }

        if let (Some(path), Some(player)) = (
            self.route.manifest.response_sound.as_deref(),
            self.sound.as_ref(),
        ) {
            let player = Arc::clone(player);
            let sound_path = PathBuf::from(path);
            let mut playback = tokio::spawn(async move { player.play(&sound_path).await });
            match timeout(self.sound_timeout, &mut playback).await {
                Ok(Ok(Ok(()))) => debug!(path, "response sound played"),
                Ok(Ok(Err(e))) => warn!(path, error = %e, "response sound failed"),
                Ok(Err(e)) => warn!(path, error = %e, "response sound player crashed"),
                Err(_) => {
                    playback.abort();
                    warn!(path, "response sound timed out");
                }
            }
        }

        let _ = self.command_tx.send(CommandEvent {
            skill_id: self.route.manifest.id.clone(),
            action_type: action.action_type.clone(),
            command: self.route.command.clone(),
            success: outcome.success,
            message: outcome.message,
        });
    }
}
