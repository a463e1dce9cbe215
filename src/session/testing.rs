//! Test doubles for driving a [`Session`](super::Session) without real
//! providers or a microphone.  Every double writes into one shared
//! [`CallLog`] so tests can assert on cross-channel ordering.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::audio::{CaptureAdapter, CaptureError, FrameSink};
use crate::channel::{
    AudioFormat, AudioInputStream, AvatarChannel, AvatarConnector, ChannelError, ChannelEvent,
    ConfigSource, DisconnectReason, EventSink, SessionCredentials, SetupError, VoiceChannel,
    VoiceConnectRequest, VoiceConnection,
};
use crate::config::{AppConfig, SessionKind};
use crate::queue::AdmissionQueue;

use super::orchestrator::{Handoff, Session, SessionDeps};

// ---------------------------------------------------------------------------
// CallLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, call: &str) -> bool {
        self.entries().iter().any(|c| c == call)
    }

    pub fn count(&self, call: &str) -> usize {
        self.entries().iter().filter(|c| *c == call).count()
    }

    /// Index of the first occurrence of `call`.
    pub fn position(&self, call: &str) -> Option<usize> {
        self.entries().iter().position(|c| c == call)
    }
}

// ---------------------------------------------------------------------------
// Config source
// ---------------------------------------------------------------------------

pub fn credentials() -> SessionCredentials {
    SessionCredentials {
        avatar_session_token: "tok-test".into(),
        voice_agent_id: "agent-test".into(),
    }
}

pub struct FailingConfigSource;

#[async_trait]
impl ConfigSource for FailingConfigSource {
    async fn fetch(&self, _kind: SessionKind) -> Result<SessionCredentials, SetupError> {
        Err(SetupError::Status {
            status: 500,
            body: "token service down".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Avatar
// ---------------------------------------------------------------------------

pub struct RecordingConnector {
    log: CallLog,
}

struct RecordingAvatar {
    log: CallLog,
}

struct RecordingAudioInput {
    log: CallLog,
}

#[async_trait]
impl AvatarConnector for RecordingConnector {
    async fn open(&self, session_token: &str) -> Result<Box<dyn AvatarChannel>, ChannelError> {
        self.log.record(format!("avatar.open:{session_token}"));
        Ok(Box::new(RecordingAvatar {
            log: self.log.clone(),
        }))
    }
}

#[async_trait]
impl AvatarChannel for RecordingAvatar {
    async fn stream_to_render_target(&mut self, target: &str) -> Result<(), ChannelError> {
        self.log.record(format!("avatar.stream:{target}"));
        Ok(())
    }

    fn create_audio_input_stream(&mut self, format: &AudioFormat) -> Box<dyn AudioInputStream> {
        self.log.record(format!(
            "avatar.audio_input:{}/{}/{}",
            format.encoding, format.sample_rate, format.channels
        ));
        Box::new(RecordingAudioInput {
            log: self.log.clone(),
        })
    }

    fn interrupt(&mut self) {
        self.log.record("avatar.interrupt");
    }

    async fn stop_streaming(&mut self) -> Result<(), ChannelError> {
        self.log.record("avatar.stop");
        Ok(())
    }
}

impl AudioInputStream for RecordingAudioInput {
    fn send_chunk(&mut self, bytes: &[u8]) {
        self.log.record(format!("audio.chunk:{}", bytes.len()));
    }

    fn end_utterance(&mut self) {
        self.log.record("audio.end_utterance");
    }
}

// ---------------------------------------------------------------------------
// Voice
// ---------------------------------------------------------------------------

/// Emits `Ready` followed by a fixed script on connect.  The sink stays
/// reachable through [`emit`](Self::emit) for events a test injects later.
pub struct ScriptedVoice {
    log: CallLog,
    script: Vec<ChannelEvent>,
    fail_connect: bool,
    on_close: Option<DisconnectReason>,
    sink: Arc<Mutex<Option<EventSink>>>,
}

impl ScriptedVoice {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            script: Vec::new(),
            fail_connect: false,
            on_close: Some(DisconnectReason::Intentional),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_script(mut self, script: Vec<ChannelEvent>) -> Self {
        self.script = script;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// What the connection reports when closed locally.
    pub fn reporting_on_close(mut self, reason: DisconnectReason) -> Self {
        self.on_close = Some(reason);
        self
    }

    pub fn emit(&self, event: ChannelEvent) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }
}

#[async_trait]
impl VoiceChannel for ScriptedVoice {
    async fn connect(
        &self,
        request: VoiceConnectRequest,
        events: EventSink,
    ) -> Result<Box<dyn VoiceConnection>, ChannelError> {
        self.log.record(format!("voice.connect:{}", request.agent_id));
        if let Some(message) = &request.initial_agent_message {
            self.log.record(format!("voice.initial:{message}"));
        }
        if self.fail_connect {
            return Err(ChannelError::Connect("agent unavailable".into()));
        }

        events.emit(ChannelEvent::Ready);
        for event in &self.script {
            events.emit(event.clone());
        }
        *self.sink.lock().unwrap() = Some(events.clone());

        Ok(Box::new(ScriptedConnection {
            log: self.log.clone(),
            events,
            on_close: self.on_close,
            closed: false,
        }))
    }
}

struct ScriptedConnection {
    log: CallLog,
    events: EventSink,
    on_close: Option<DisconnectReason>,
    closed: bool,
}

#[async_trait]
impl VoiceConnection for ScriptedConnection {
    fn send_audio_frame(&mut self, pcm: &[u8]) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        self.log.record(format!("voice.frame:{}", pcm.len()));
        Ok(())
    }

    fn inject_agent_message(&mut self, text: &str) -> bool {
        self.log.record(format!("voice.inject:{text}"));
        !self.closed
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.log.record("voice.close");
        if let Some(reason) = self.on_close {
            self.events.emit(ChannelEvent::Disconnect(reason));
        }
    }
}

// ---------------------------------------------------------------------------
// Capture / hand-off
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FakeCapture {
    log: CallLog,
    sink: Arc<Mutex<Option<FrameSink>>>,
}

impl FakeCapture {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    /// Deliver a frame as if the microphone produced it.
    pub fn push(&self, pcm: Vec<u8>) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.emit(pcm),
            None => false,
        }
    }
}

impl CaptureAdapter for FakeCapture {
    fn start(&mut self, frames: FrameSink) -> Result<(), CaptureError> {
        self.log.record("capture.start");
        *self.sink.lock().unwrap() = Some(frames);
        Ok(())
    }

    fn stop(&mut self) {
        if self.sink.lock().unwrap().take().is_some() {
            self.log.record("capture.stop");
        }
    }

    fn is_running(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }
}

#[derive(Debug, Default)]
pub struct CountingHandoff(AtomicUsize);

impl CountingHandoff {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl Handoff for CountingHandoff {
    fn session_ended(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// One session wired to doubles, plus handles to inspect them.
pub struct Fixture {
    pub log: CallLog,
    pub queue: AdmissionQueue,
    pub voice: Arc<ScriptedVoice>,
    pub capture: FakeCapture,
    pub handoff: Arc<CountingHandoff>,
}

impl Fixture {
    pub fn new(voice: impl FnOnce(&CallLog) -> ScriptedVoice) -> Self {
        let log = CallLog::default();
        let (queue, _worker) = AdmissionQueue::spawn(&AppConfig::default().queue);
        Self {
            voice: Arc::new(voice(&log)),
            capture: FakeCapture::new(&log),
            handoff: Arc::new(CountingHandoff::default()),
            queue,
            log,
        }
    }

    pub fn session(&self, config: &AppConfig) -> Session {
        self.session_with(config, Arc::new(crate::channel::StaticConfigSource::new(credentials())))
    }

    pub fn session_with(&self, config: &AppConfig, source: Arc<dyn ConfigSource>) -> Session {
        let deps = SessionDeps {
            queue: self.queue.clone(),
            config_source: source,
            avatars: Arc::new(RecordingConnector {
                log: self.log.clone(),
            }),
            voice: self.voice.clone(),
            capture: Box::new(self.capture.clone()),
            handoff: self.handoff.clone(),
        };
        Session::new(SessionKind::Pitch, config, deps)
    }
}
