//! Doubles shared by the end-to-end session scenarios.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pitch_session::audio::{CaptureAdapter, CaptureError, FrameSink};
use pitch_session::channel::{
    AudioFormat, AudioInputStream, AvatarChannel, AvatarConnector, ChannelError, ChannelEvent,
    DisconnectReason, EventSink, SessionCredentials, StaticConfigSource, VoiceChannel,
    VoiceConnectRequest, VoiceConnection,
};
use pitch_session::config::{AppConfig, SessionKind};
use pitch_session::queue::AdmissionQueue;
use pitch_session::session::{Handoff, Session, SessionDeps};

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.entries().iter().filter(|c| *c == call).count()
    }
}

// ---------------------------------------------------------------------------
// Avatar
// ---------------------------------------------------------------------------

pub struct Avatars(pub CallLog);

struct Avatar(CallLog);

struct AudioInput(CallLog);

#[async_trait]
impl AvatarConnector for Avatars {
    async fn open(&self, session_token: &str) -> Result<Box<dyn AvatarChannel>, ChannelError> {
        self.0.record(format!("avatar.open:{session_token}"));
        Ok(Box::new(Avatar(self.0.clone())))
    }
}

#[async_trait]
impl AvatarChannel for Avatar {
    async fn stream_to_render_target(&mut self, target: &str) -> Result<(), ChannelError> {
        self.0.record(format!("avatar.stream:{target}"));
        Ok(())
    }

    fn create_audio_input_stream(&mut self, _format: &AudioFormat) -> Box<dyn AudioInputStream> {
        Box::new(AudioInput(self.0.clone()))
    }

    fn interrupt(&mut self) {
        self.0.record("avatar.interrupt");
    }

    async fn stop_streaming(&mut self) -> Result<(), ChannelError> {
        self.0.record("avatar.stop");
        Ok(())
    }
}

impl AudioInputStream for AudioInput {
    fn send_chunk(&mut self, bytes: &[u8]) {
        self.0.record(format!("audio.chunk:{}", bytes.len()));
    }

    fn end_utterance(&mut self) {
        self.0.record("audio.end_utterance");
    }
}

// ---------------------------------------------------------------------------
// Voice whose close is reported as a remote hang-up
// ---------------------------------------------------------------------------

pub struct HangUpOnCloseVoice(pub CallLog);

struct HangUpOnCloseConnection {
    log: CallLog,
    events: EventSink,
}

#[async_trait]
impl VoiceChannel for HangUpOnCloseVoice {
    async fn connect(
        &self,
        request: VoiceConnectRequest,
        events: EventSink,
    ) -> Result<Box<dyn VoiceConnection>, ChannelError> {
        self.0.record(format!("voice.connect:{}", request.agent_id));
        events.emit(ChannelEvent::Ready);
        Ok(Box::new(HangUpOnCloseConnection {
            log: self.0.clone(),
            events,
        }))
    }
}

#[async_trait]
impl VoiceConnection for HangUpOnCloseConnection {
    fn send_audio_frame(&mut self, _pcm: &[u8]) -> Result<(), ChannelError> {
        Ok(())
    }

    fn inject_agent_message(&mut self, _text: &str) -> bool {
        true
    }

    async fn close(&mut self) {
        self.log.record("voice.close");
        self.events
            .emit(ChannelEvent::Disconnect(DisconnectReason::Unexpected));
    }
}

// ---------------------------------------------------------------------------
// Capture / hand-off
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SilentCapture {
    running: bool,
}

impl CaptureAdapter for SilentCapture {
    fn start(&mut self, _frames: FrameSink) -> Result<(), CaptureError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
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
// Wiring
// ---------------------------------------------------------------------------

pub fn credentials() -> SessionCredentials {
    SessionCredentials {
        avatar_session_token: "tok-e2e".into(),
        voice_agent_id: "agent-e2e".into(),
    }
}

pub fn session(
    config: &AppConfig,
    queue: &AdmissionQueue,
    log: &CallLog,
    voice: Arc<dyn VoiceChannel>,
    handoff: Arc<CountingHandoff>,
) -> Session {
    let deps = SessionDeps {
        queue: queue.clone(),
        config_source: Arc::new(StaticConfigSource::new(credentials())),
        avatars: Arc::new(Avatars(log.clone())),
        voice,
        capture: Box::new(SilentCapture::default()),
        handoff,
    };
    Session::new(SessionKind::Pitch, config, deps)
}
