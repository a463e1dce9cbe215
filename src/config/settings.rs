//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Secrets never live here: a persona only names the environment variable
//! that holds its API key.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// SessionKind
// ---------------------------------------------------------------------------

/// The closed set of use-cases that compete for a voice-channel slot.
///
/// Also selects which persona (avatar + voice agent) a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// The user pitches to the investor persona.
    Pitch,
    /// The coach persona walks the user through their feedback.
    Feedback,
}

impl SessionKind {
    pub fn label(&self) -> &'static str {
        match self {
            SessionKind::Pitch => "pitch",
            SessionKind::Feedback => "feedback",
        }
    }
}

impl Default for SessionKind {
    fn default() -> Self {
        Self::Pitch
    }
}

// ---------------------------------------------------------------------------
// QueueConfig
// ---------------------------------------------------------------------------

/// Settings for the admission queue in front of the voice provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Provider concurrency ceiling (K).  The current plan allows one live
    /// voice session.
    pub max_concurrent: usize,
    /// Waiting requests older than this are rejected with a timeout.
    pub stale_after_secs: u64,
    /// How often the background sweep runs.  `0` disables it.
    pub sweep_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            stale_after_secs: 10 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl QueueConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// `None` when the periodic sweep is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Lifecycle timings for one conversation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Planned conversation length in minutes.
    pub duration_minutes: u32,
    /// Connect the voice channel as soon as the avatar is ready.
    pub auto_start: bool,
    /// Pause between `ready` and auto-start so the user sees the avatar
    /// before the agent speaks.
    pub auto_start_delay_ms: u64,
    /// Hold after the avatar starts streaming to let it settle.
    pub avatar_settle_ms: u64,
    /// Length of each of the two ending phases shown before hand-off.
    pub ending_phase_ms: u64,
    /// Lifetime of a transient error notice.
    pub error_notice_secs: u64,
    /// Identifier of the element the avatar renders into.
    pub render_target: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_minutes: 2,
            auto_start: true,
            auto_start_delay_ms: 500,
            avatar_settle_ms: 1_000,
            ending_phase_ms: 2_000,
            error_notice_secs: 5,
            render_target: "anam-video".into(),
        }
    }
}

impl SessionConfig {
    pub fn duration_secs(&self) -> u64 {
        u64::from(self.duration_minutes) * 60
    }
}

// ---------------------------------------------------------------------------
// ProviderConfig
// ---------------------------------------------------------------------------

/// One avatar + voice-agent pairing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Name of the environment variable holding the avatar API key.
    pub api_key_env: String,
    /// Avatar identifier sent in the session-token request.
    pub avatar_id: String,
    /// Conversational voice agent the session connects to.
    pub voice_agent_id: String,
}

/// Endpoints and personas for the two external real-time services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Avatar session-token endpoint.  Empty until configured.
    pub auth_uri: String,
    /// Conversational voice endpoint; the agent id is appended as a query
    /// parameter.
    pub voice_url: String,
    /// Per-request timeout for the token fetch.
    pub request_timeout_secs: u64,
    /// Investor persona used for pitch sessions.
    pub pitch: PersonaConfig,
    /// Coach persona used for feedback sessions.
    pub feedback: PersonaConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            auth_uri: String::new(),
            voice_url: "wss://api.elevenlabs.io/v1/convai/conversation".into(),
            request_timeout_secs: 10,
            pitch: PersonaConfig {
                api_key_env: "ANAM_INVESTOR_API_KEY".into(),
                ..Default::default()
            },
            feedback: PersonaConfig {
                api_key_env: "ANAM_COACH_API_KEY".into(),
                ..Default::default()
            },
        }
    }
}

impl ProviderConfig {
    pub fn persona(&self, kind: SessionKind) -> &PersonaConfig {
        match kind {
            SessionKind::Pitch => &self.pitch,
            SessionKind::Feedback => &self.feedback,
        }
    }

    /// Full voice endpoint URL for `agent_id`.
    pub fn voice_endpoint(&self, agent_id: &str) -> String {
        format!("{}?agent_id={}", self.voice_url, agent_id)
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Capture and avatar audio-input format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Fixed rate both providers expect (16 000 Hz).
    pub sample_rate: u32,
    /// Channel count of the PCM sent to either provider.
    pub channels: u16,
    /// Encoding label given to the avatar's audio-input stream.
    pub encoding: String,
    /// Apply software automatic gain to captured frames.
    pub auto_gain: bool,
    /// Zero frames whose RMS is below `noise_gate_threshold`.
    pub noise_gate: bool,
    pub noise_gate_threshold: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            encoding: "pcm_s16le".into(),
            auto_gain: true,
            noise_gate: true,
            noise_gate_threshold: 0.01,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use pitch_session::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// assert_eq!(config.queue.max_concurrent, 1);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub queue: QueueConfig,
    pub session: SessionConfig,
    pub provider: ProviderConfig,
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// so callers never need to special-case a missing file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
