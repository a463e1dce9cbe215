//! Streaming Orchestrator: one [`Session`] per pitch attempt.
//!
//! A session owns its avatar channel, the avatar's audio-input stream, the
//! voice connection, the capture adapter, the admission slot and the timer.
//! Everything that happens to it arrives through one ordered inbox:
//!
//! ```text
//! voice reader task ──ChannelEvent──┐
//! capture thread ─────PCM frame─────┤
//! session timer ──────tick/expiry───┼─▶ inbox ─▶ Session::dispatch
//! SessionHandle ──────user command──┘
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! initialize: fetch credentials → open avatar → stream to render target
//!             → create audio input → settle                       [Ready]
//! start:      auto-start delay or SessionHandle::start
//! connect:    submit to AdmissionQueue (wait, cancellable)
//!             → open voice channel (release slot on failure)     [Connecting]
//! Ready event → timer + capture                                  [Active]
//! end:        intentional flag → cancel timer → stop capture → close voice
//!             → stop avatar → release slot → clear render target
//!             → grace phases → hand-off                          [Terminated]
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Instant};

use crate::audio::{CaptureAdapter, FrameSink};
use crate::channel::{
    AudioFormat, AudioInputStream, AvatarChannel, AvatarConnector, ChannelEvent, ConfigSource,
    DisconnectReason, EventSink, SessionCredentials, VoiceChannel, VoiceConnectRequest,
    VoiceConnection,
};
use crate::config::{AppConfig, SessionConfig, SessionKind};
use crate::queue::{AdmissionQueue, SlotId, Ticket};

use super::error::SessionError;
use super::state::{SessionState, SessionStatus};
use super::timer::SessionTimer;
use super::transcript::{classify, reduce, Connection, Transcript};

pub const SAVING_MESSAGE: &str = "Saving your pitch...";
pub const GENERATING_MESSAGE: &str = "Generating feedback...";

/// Notified once a session reaches `terminated` through a normal ending.
pub trait Handoff: Send + Sync {
    fn session_ended(&self);
}

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    Start,
    Stop,
    /// Start when not connected, stop when connected.
    Toggle,
    /// Navigation away: silent cleanup, no grace, no hand-off.
    Unmount,
}

#[derive(Debug)]
pub enum SessionInput {
    Channel(ChannelEvent),
    Frame(Vec<u8>),
    Tick(u64),
    TimerExpired,
    Command(UserCommand),
}

impl SessionInput {
    fn name(&self) -> &'static str {
        match self {
            SessionInput::Channel(event) => event.name(),
            SessionInput::Frame(_) => "capture-frame",
            SessionInput::Tick(_) => "tick",
            SessionInput::TimerExpired => "timer-expired",
            SessionInput::Command(_) => "command",
        }
    }
}

impl From<ChannelEvent> for SessionInput {
    fn from(event: ChannelEvent) -> Self {
        SessionInput::Channel(event)
    }
}

impl From<Vec<u8>> for SessionInput {
    fn from(pcm: Vec<u8>) -> Self {
        SessionInput::Frame(pcm)
    }
}

/// Cloneable remote control for a running session.  Every method returns
/// `false` once the session is gone.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionInput>,
}

impl SessionHandle {
    pub fn start(&self) -> bool {
        self.send(UserCommand::Start)
    }

    pub fn stop(&self) -> bool {
        self.send(UserCommand::Stop)
    }

    pub fn toggle(&self) -> bool {
        self.send(UserCommand::Toggle)
    }

    pub fn unmount(&self) -> bool {
        self.send(UserCommand::Unmount)
    }

    fn send(&self, command: UserCommand) -> bool {
        self.tx.send(SessionInput::Command(command)).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// External collaborators a session is built from.
pub struct SessionDeps {
    pub queue: AdmissionQueue,
    pub config_source: Arc<dyn ConfigSource>,
    pub avatars: Arc<dyn AvatarConnector>,
    pub voice: Arc<dyn VoiceChannel>,
    pub capture: Box<dyn CaptureAdapter>,
    pub handoff: Arc<dyn Handoff>,
}

/// How a session finished.
#[derive(Debug)]
pub struct SessionReport {
    pub state: SessionState,
    pub transcript: Transcript,
    pub error: Option<SessionError>,
}

#[derive(Debug)]
enum EndKind {
    /// Stop or expiry: grace phases, then hand-off.
    Complete,
    /// Unmount: teardown only.
    Silent,
    Failed(SessionError),
}

enum Admission {
    Granted(SlotId),
    Cancelled(EndKind),
}

pub struct Session {
    kind: SessionKind,
    settings: SessionConfig,
    audio_format: AudioFormat,
    deps: SessionDeps,

    state: SessionState,
    status: watch::Sender<SessionStatus>,
    transcript: Transcript,
    connection: Connection,
    error: Option<SessionError>,
    notice_deadline: Option<Instant>,

    credentials: Option<SessionCredentials>,
    initial_agent_message: Option<String>,
    avatar: Option<Box<dyn AvatarChannel>>,
    audio_input: Option<Box<dyn AudioInputStream>>,
    voice: Option<Box<dyn VoiceConnection>>,
    slot: Option<SlotId>,
    timer: Option<SessionTimer>,
    intentional_disconnect: bool,

    inbox_tx: mpsc::UnboundedSender<SessionInput>,
    inbox_rx: mpsc::UnboundedReceiver<SessionInput>,
}

impl Session {
    pub fn new(kind: SessionKind, config: &AppConfig, deps: SessionDeps) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(SessionStatus::new(config.session.duration_secs()));

        Self {
            kind,
            settings: config.session.clone(),
            audio_format: AudioFormat::from_config(&config.audio),
            deps,
            state: SessionState::Idle,
            status,
            transcript: Transcript::new(),
            connection: Connection::default(),
            error: None,
            notice_deadline: None,
            credentials: None,
            initial_agent_message: None,
            avatar: None,
            audio_input: None,
            voice: None,
            slot: None,
            timer: None,
            intentional_disconnect: false,
            inbox_tx,
            inbox_rx,
        }
    }

    /// Have the agent speak `message` as soon as the conversation starts.
    pub fn with_initial_agent_message(mut self, message: impl Into<String>) -> Self {
        self.initial_agent_message = Some(message.into());
        self
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.inbox_tx.clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    /// Drive the whole lifecycle and report how it ended.
    pub async fn run(mut self) -> SessionReport {
        if self.state == SessionState::Idle {
            if let Err(e) = self.initialize().await {
                self.error = Some(e);
                return self.into_report();
            }
        }

        if let Some(end) = self.wait_for_start().await {
            self.end(end).await;
            return self.into_report();
        }

        match self.connect().await {
            Ok(None) => self.converse().await,
            Ok(Some(end)) => self.end(end).await,
            Err(e) => self.error = Some(e),
        }
        self.into_report()
    }

    /// Avatar pre-warm: `idle -> initializing -> ready`.
    pub async fn initialize(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Initializing)?;
        match self.prewarm().await {
            Ok(()) => self.transition(SessionState::Ready),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn prewarm(&mut self) -> Result<(), SessionError> {
        let credentials = self.deps.config_source.fetch(self.kind).await?;
        let mut avatar = self
            .deps
            .avatars
            .open(&credentials.avatar_session_token)
            .await?;
        avatar
            .stream_to_render_target(&self.settings.render_target)
            .await?;
        let audio_input = avatar.create_audio_input_stream(&self.audio_format);
        log::info!(
            "session: avatar streaming to '{}' ({} {} Hz)",
            self.settings.render_target,
            self.audio_format.encoding,
            self.audio_format.sample_rate
        );

        self.avatar = Some(avatar);
        self.audio_input = Some(audio_input);
        self.credentials = Some(credentials);
        self.status.send_modify(|s| s.show_video = true);

        if self.settings.avatar_settle_ms > 0 {
            sleep(Duration::from_millis(self.settings.avatar_settle_ms)).await;
        }
        Ok(())
    }

    /// `None` means start; anything else is how to end instead.
    async fn wait_for_start(&mut self) -> Option<EndKind> {
        let auto_start = self.settings.auto_start.then(|| {
            Instant::now() + Duration::from_millis(self.settings.auto_start_delay_ms)
        });

        loop {
            let input = tokio::select! {
                _ = sleep_until_opt(auto_start) => return None,
                input = self.inbox_rx.recv() => input,
            };
            match input {
                Some(SessionInput::Command(UserCommand::Start | UserCommand::Toggle)) => {
                    return None
                }
                Some(SessionInput::Command(UserCommand::Stop)) => return Some(EndKind::Complete),
                Some(SessionInput::Command(UserCommand::Unmount)) | None => {
                    return Some(EndKind::Silent)
                }
                Some(other) => log::debug!("session: ignoring {} before start", other.name()),
            }
        }
    }

    /// `ready -> connecting`, then admission and the voice connection.
    /// `Ok(Some(_))` when the user stopped or left while queued.
    async fn connect(&mut self) -> Result<Option<EndKind>, SessionError> {
        let agent_id = match &self.credentials {
            Some(c) => c.voice_agent_id.clone(),
            None => return Err(SessionError::NotInitialized),
        };
        self.transition(SessionState::Connecting)?;

        let slot = match self.admit().await {
            Ok(Admission::Granted(slot)) => slot,
            Ok(Admission::Cancelled(end)) => return Ok(Some(end)),
            Err(e) => return Err(self.fail(e).await),
        };

        let request = VoiceConnectRequest {
            agent_id,
            initial_agent_message: self.initial_agent_message.clone(),
        };
        let events = EventSink::from_sender(self.inbox_tx.clone());

        match self.deps.voice.connect(request, events).await {
            Ok(connection) => {
                self.voice = Some(connection);
                self.slot = Some(slot);
                Ok(None)
            }
            Err(e) => {
                self.deps.queue.release(slot);
                Err(self.fail(e.into()).await)
            }
        }
    }

    async fn admit(&mut self) -> Result<Admission, SessionError> {
        let pending = self.deps.queue.submit(self.kind).await?;
        if let Ticket::Queued { position, .. } = pending.ticket() {
            log::info!("session: waiting for admission at position {position}");
            self.status.send_modify(|s| s.queue_position = Some(position));
        }

        let granted = pending.granted();
        tokio::pin!(granted);

        let admission = loop {
            tokio::select! {
                biased;
                result = &mut granted => break Admission::Granted(result?),
                input = self.inbox_rx.recv() => match input {
                    Some(SessionInput::Command(UserCommand::Stop)) => {
                        break Admission::Cancelled(EndKind::Complete)
                    }
                    Some(SessionInput::Command(UserCommand::Unmount)) | None => {
                        break Admission::Cancelled(EndKind::Silent)
                    }
                    Some(other) => log::debug!("session: ignoring {} while queued", other.name()),
                },
            }
        };

        self.status.send_modify(|s| s.queue_position = None);
        Ok(admission)
    }

    /// Bridge inbox traffic until the session ends.
    async fn converse(&mut self) {
        loop {
            let input = tokio::select! {
                input = self.inbox_rx.recv() => input,
                _ = sleep_until_opt(self.notice_deadline) => {
                    self.clear_notice();
                    continue;
                }
            };
            let Some(input) = input else {
                break;
            };
            if let Some(end) = self.dispatch(input) {
                self.end(end).await;
                break;
            }
        }
    }

    fn dispatch(&mut self, input: SessionInput) -> Option<EndKind> {
        match input {
            SessionInput::Channel(event) => self.on_channel_event(event),
            SessionInput::Frame(pcm) => {
                self.forward_frame(&pcm);
                None
            }
            SessionInput::Tick(remaining) => {
                self.status.send_modify(|s| s.time_remaining = remaining);
                None
            }
            SessionInput::TimerExpired => {
                if self.state != SessionState::Active {
                    return None;
                }
                log::info!("session: time's up");
                Some(EndKind::Complete)
            }
            SessionInput::Command(UserCommand::Start) => None,
            SessionInput::Command(UserCommand::Stop) => Some(EndKind::Complete),
            SessionInput::Command(UserCommand::Toggle) => {
                self.connection.is_connected.then_some(EndKind::Complete)
            }
            SessionInput::Command(UserCommand::Unmount) => Some(EndKind::Silent),
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) -> Option<EndKind> {
        let teardown = self.intentional_disconnect;
        self.connection.apply(&event, teardown);
        self.transcript = reduce(std::mem::take(&mut self.transcript), &event);

        let end = match &event {
            ChannelEvent::Ready => {
                self.on_ready();
                None
            }
            ChannelEvent::AudioChunk(bytes) => {
                if let Some(input) = self.audio_input.as_mut() {
                    input.send_chunk(bytes);
                }
                None
            }
            ChannelEvent::UserTranscript(_) => None,
            ChannelEvent::AgentResponse(_) => {
                if let Some(input) = self.audio_input.as_mut() {
                    input.end_utterance();
                }
                None
            }
            ChannelEvent::Interruption => {
                if let Some(avatar) = self.avatar.as_mut() {
                    avatar.interrupt();
                }
                if let Some(input) = self.audio_input.as_mut() {
                    input.end_utterance();
                }
                None
            }
            ChannelEvent::Disconnect(reason) => match classify(*reason, teardown) {
                DisconnectReason::Intentional => {
                    log::debug!("session: voice channel closed by teardown");
                    None
                }
                DisconnectReason::Unexpected => {
                    log::error!("session: voice channel closed unexpectedly");
                    Some(EndKind::Failed(SessionError::Disconnected))
                }
            },
            ChannelEvent::Error(message) => {
                log::warn!("session: channel error: {message}");
                self.show_notice(message.clone());
                None
            }
        };

        self.publish_projection();
        end
    }

    fn on_ready(&mut self) {
        if self.state != SessionState::Connecting {
            return;
        }
        self.enter(SessionState::Active);

        let duration = self.settings.duration_secs();
        let tick_tx = self.inbox_tx.clone();
        let expire_tx = self.inbox_tx.clone();
        self.timer = Some(SessionTimer::start(
            duration,
            move |remaining| {
                let _ = tick_tx.send(SessionInput::Tick(remaining));
            },
            move || {
                let _ = expire_tx.send(SessionInput::TimerExpired);
            },
        ));
        self.status.send_modify(|s| s.time_remaining = duration);

        if let Err(e) = self
            .deps
            .capture
            .start(FrameSink::from_sender(self.inbox_tx.clone()))
        {
            log::error!("session: microphone unavailable: {e}");
            self.show_notice(format!("Microphone unavailable: {e}"));
        }
    }

    fn forward_frame(&mut self, pcm: &[u8]) {
        if self.state != SessionState::Active {
            return;
        }
        if let Some(voice) = self.voice.as_mut() {
            if let Err(e) = voice.send_audio_frame(pcm) {
                log::debug!("session: dropped capture frame: {e}");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Ending
    // -----------------------------------------------------------------------

    async fn end(&mut self, end: EndKind) {
        match end {
            EndKind::Complete => {
                self.enter(SessionState::Ending);
                self.teardown().await;

                let phase = Duration::from_millis(self.settings.ending_phase_ms);
                for message in [SAVING_MESSAGE, GENERATING_MESSAGE] {
                    self.status
                        .send_modify(|s| s.ending_message = Some(message.to_string()));
                    sleep(phase).await;
                }

                log::info!("session: handing off to feedback");
                self.deps.handoff.session_ended();
                self.release_handles();
                self.enter(SessionState::Terminated);
            }
            EndKind::Silent => {
                if !matches!(
                    self.state,
                    SessionState::Idle | SessionState::Initializing
                ) {
                    self.enter(SessionState::Ending);
                }
                self.teardown().await;
                self.release_handles();
                self.enter(SessionState::Terminated);
            }
            EndKind::Failed(e) => {
                self.show_notice(e.to_string());
                self.enter(SessionState::Ending);
                self.teardown().await;
                self.release_handles();
                self.enter(SessionState::Failed);
                self.error = Some(e);
            }
        }
    }

    /// Surface `e`, clean up whatever was acquired and move to `failed`.
    async fn fail(&mut self, e: SessionError) -> SessionError {
        log::error!("session: {e}");
        self.show_notice(e.to_string());
        self.teardown().await;
        self.release_handles();
        self.enter(SessionState::Failed);
        e
    }

    /// Ordered teardown shared by every ending.  Failures are logged, never
    /// propagated.
    async fn teardown(&mut self) {
        self.intentional_disconnect = true;

        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
        self.deps.capture.stop();

        if let Some(voice) = self.voice.as_mut() {
            voice.close().await;
        }
        self.absorb_pending_events();

        if let Some(avatar) = self.avatar.as_mut() {
            if let Err(e) = avatar.stop_streaming().await {
                log::warn!("session: failed to stop avatar stream: {e}");
            }
        }
        if let Some(slot) = self.slot.take() {
            self.deps.queue.release(slot);
        }

        self.connection.is_connected = false;
        self.status.send_modify(|s| {
            s.show_video = false;
            s.is_connected = false;
        });
    }

    /// Fold channel events already queued when teardown began; frames and
    /// commands are dropped.
    fn absorb_pending_events(&mut self) {
        while let Ok(input) = self.inbox_rx.try_recv() {
            match input {
                SessionInput::Channel(event) => {
                    log::debug!("session: {} arrived during teardown", event.name());
                    self.connection.apply(&event, true);
                    self.transcript = reduce(std::mem::take(&mut self.transcript), &event);
                }
                other => log::trace!("session: dropped {} during teardown", other.name()),
            }
        }
        self.publish_projection();
    }

    fn release_handles(&mut self) {
        self.audio_input = None;
        self.avatar = None;
        self.voice = None;
        self.credentials = None;
    }

    // -----------------------------------------------------------------------
    // State / status
    // -----------------------------------------------------------------------

    fn transition(&mut self, to: SessionState) -> Result<(), SessionError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            log::warn!("session: rejected transition {from} -> {to}");
            return Err(SessionError::InvalidTransition { from, to });
        }
        log::info!("session: {from} -> {to}");
        self.state = to;
        self.status.send_modify(|s| s.state = to);
        Ok(())
    }

    /// Transition along a path the orchestrator itself guarantees; a
    /// rejection is already logged by [`transition`](Self::transition).
    fn enter(&mut self, to: SessionState) {
        let _ = self.transition(to);
    }

    fn publish_projection(&mut self) {
        let is_connected = self.connection.is_connected;
        let transcript_len = self.transcript.len();
        self.status.send_modify(|s| {
            s.is_connected = is_connected;
            s.transcript_len = transcript_len;
        });
    }

    fn show_notice(&mut self, message: String) {
        self.notice_deadline =
            Some(Instant::now() + Duration::from_secs(self.settings.error_notice_secs));
        self.status.send_modify(|s| s.notice = Some(message));
    }

    fn clear_notice(&mut self) {
        self.notice_deadline = None;
        self.status.send_modify(|s| s.notice = None);
    }

    fn into_report(self) -> SessionReport {
        SessionReport {
            state: self.state,
            transcript: self.transcript,
            error: self.error,
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
