//! Application entry point: headless driver for a pitch session.
//!
//! Connects the voice client to the provider over a WebSocket, or plays a
//! recorded provider log (one JSON frame per line) when one is given.  The
//! admission queue and session state machine are the real ones; the avatar
//! is replaced by a connector that only logs what it would render.
//!
//! ```text
//! pitch-session [recorded.jsonl] [--hang-up] [--feedback]
//! ```
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Read the recorded provider log, if any.
//! 4. Create [`tokio`] runtime (multi-thread, 2 workers).
//! 5. Spawn the [`AdmissionQueue`] worker.
//! 6. Build the session from the voice channel, the logging avatar and the
//!    default microphone.
//! 7. Run the session until it ends, the provider hangs up or Ctrl-C stops it.
//! 8. Print the transcript.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use pitch_session::{
    audio::MicrophoneCapture,
    channel::{
        AudioFormat, AudioInputStream, AvatarChannel, AvatarConnector, ChannelError,
        ConfigSource, HttpConfigSource, SessionCredentials, StaticConfigSource,
    },
    config::{AppConfig, SessionKind},
    queue::AdmissionQueue,
    session::{Handoff, Session, SessionDeps, SessionReport, SessionState},
    voice::{ConvaiChannel, FrameTransport, ReplayTransport, WebSocketTransport},
};

/// Delay between replayed provider frames.
const REPLAY_PACE: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

const USAGE: &str = "usage: pitch-session [recorded.jsonl] [--hang-up] [--feedback]";

struct Args {
    replay_path: Option<std::path::PathBuf>,
    hang_up: bool,
    kind: SessionKind,
}

fn parse_args() -> Result<Args> {
    let mut replay_path = None;
    let mut hang_up = false;
    let mut kind = SessionKind::Pitch;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--hang-up" => hang_up = true,
            "--feedback" => kind = SessionKind::Feedback,
            flag if flag.starts_with("--") => bail!("unknown flag: {flag}\n{USAGE}"),
            _ if replay_path.is_some() => bail!("only one recorded log may be given\n{USAGE}"),
            path => replay_path = Some(std::path::PathBuf::from(path)),
        }
    }

    Ok(Args {
        replay_path,
        hang_up,
        kind,
    })
}

// ---------------------------------------------------------------------------
// Logging avatar
// ---------------------------------------------------------------------------

/// Avatar stand-in: accepts every call and logs it.
struct LoggingAvatarConnector;

struct LoggingAvatar {
    token: String,
}

struct LoggingAudioInput {
    bytes: usize,
}

#[async_trait]
impl AvatarConnector for LoggingAvatarConnector {
    async fn open(&self, session_token: &str) -> Result<Box<dyn AvatarChannel>, ChannelError> {
        log::info!("avatar: opened with token '{session_token}'");
        Ok(Box::new(LoggingAvatar {
            token: session_token.to_string(),
        }))
    }
}

#[async_trait]
impl AvatarChannel for LoggingAvatar {
    async fn stream_to_render_target(&mut self, target: &str) -> Result<(), ChannelError> {
        log::info!("avatar: streaming to '{target}'");
        Ok(())
    }

    fn create_audio_input_stream(&mut self, format: &AudioFormat) -> Box<dyn AudioInputStream> {
        log::info!(
            "avatar: audio input {} {} Hz x{}",
            format.encoding,
            format.sample_rate,
            format.channels
        );
        Box::new(LoggingAudioInput { bytes: 0 })
    }

    fn interrupt(&mut self) {
        log::info!("avatar: interrupted");
    }

    async fn stop_streaming(&mut self) -> Result<(), ChannelError> {
        log::info!("avatar: stopped");
        Ok(())
    }

    fn session_id(&self) -> Option<String> {
        Some(self.token.clone())
    }
}

impl AudioInputStream for LoggingAudioInput {
    fn send_chunk(&mut self, bytes: &[u8]) {
        self.bytes += bytes.len();
    }

    fn end_utterance(&mut self) {
        log::info!("avatar: utterance complete ({} bytes)", self.bytes);
        self.bytes = 0;
    }
}

struct LogHandoff;

impl Handoff for LogHandoff {
    fn session_ended(&self) {
        log::info!("hand-off: session complete, feedback would open now");
    }
}

// ---------------------------------------------------------------------------
// Session driver
// ---------------------------------------------------------------------------

async fn run_session(
    config: AppConfig,
    args: Args,
    transport: Arc<dyn FrameTransport>,
) -> SessionReport {
    let (queue, _worker) = AdmissionQueue::spawn(&config.queue);

    // A configured token endpoint is used for real; otherwise the
    // configured persona's agent id is used with a placeholder avatar token.
    let config_source: Arc<dyn ConfigSource> = if config.provider.auth_uri.is_empty() {
        let persona = config.provider.persona(args.kind);
        let agent_id = if persona.voice_agent_id.is_empty() {
            "dry-run-agent".to_string()
        } else {
            persona.voice_agent_id.clone()
        };
        Arc::new(StaticConfigSource::new(SessionCredentials {
            avatar_session_token: "dry-run".into(),
            voice_agent_id: agent_id,
        }))
    } else {
        log::info!("Fetching session token from {}", config.provider.auth_uri);
        Arc::new(HttpConfigSource::from_config(&config.provider))
    };

    let deps = SessionDeps {
        queue: queue.clone(),
        config_source,
        avatars: Arc::new(LoggingAvatarConnector),
        voice: Arc::new(ConvaiChannel::new(transport, &config.provider)),
        capture: Box::new(MicrophoneCapture::new(&config.audio)),
        handoff: Arc::new(LogHandoff),
    };

    let session = Session::new(args.kind, &config, deps);
    let handle = session.handle();
    let mut status = session.subscribe();
    let mut task = tokio::spawn(session.run());
    let mut watching = true;

    let report = loop {
        tokio::select! {
            result = &mut task => break result,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Ctrl-C received; stopping session");
                handle.stop();
            }
            changed = status.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                let s = status.borrow_and_update().clone();
                log::debug!(
                    "status: {} connected={} remaining={}",
                    s.state,
                    s.is_connected,
                    s.countdown()
                );
            }
        }
    };

    queue.shutdown();
    match report {
        Ok(report) => report,
        Err(e) => {
            log::error!("session task failed: {e}");
            SessionReport {
                state: SessionState::Failed,
                transcript: Default::default(),
                error: None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("pitch-session starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Recorded provider log
    let args = parse_args()?;
    let transport: Arc<dyn FrameTransport> = match &args.replay_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let mut replay = ReplayTransport::from_jsonl(&text).with_pace(REPLAY_PACE);
            if args.hang_up {
                replay = replay.hang_up_at_end();
            }
            log::info!("Replaying {} frames from {}", replay.len(), path.display());
            Arc::new(replay)
        }
        None => {
            if args.hang_up {
                log::warn!("--hang-up only applies to a recorded log; ignoring");
            }
            log::info!("No recorded log given; connecting to the provider");
            Arc::new(WebSocketTransport::new())
        }
    };

    // 4. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    // 5-7. Queue, session, run
    let report = rt.block_on(run_session(config, args, transport));

    // 8. Transcript
    for entry in report.transcript.entries() {
        println!("{entry}");
    }
    log::info!("Session ended in state '{}'", report.state);
    if let Some(e) = report.error {
        log::error!("Session error: {e}");
    }
    Ok(())
}
