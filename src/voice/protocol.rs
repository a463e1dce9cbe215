//! JSON wire protocol of the conversational voice provider.
//!
//! Incoming frames are objects tagged by `"type"`; each carries its payload
//! in a `<something>_event` field.  Outgoing audio is a bare
//! `{"user_audio_chunk": "<base64 pcm_s16le>"}` object, keep-alive replies
//! are `{"type":"pong","event_id":N}`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use thiserror::Error;

use crate::channel::ChannelEvent;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid audio payload: {0}")]
    Audio(#[from] base64::DecodeError),
}

// ---------------------------------------------------------------------------
// Incoming
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InitiationMetadata {
    conversation_id: Option<String>,
    agent_output_audio_format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AudioEvent {
    audio_base_64: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AgentResponseEvent {
    agent_response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserTranscriptionEvent {
    user_transcript: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PingEvent {
    event_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    ConversationInitiationMetadata {
        conversation_initiation_metadata_event: Option<InitiationMetadata>,
    },
    Audio {
        audio_event: Option<AudioEvent>,
    },
    AgentResponse {
        agent_response_event: Option<AgentResponseEvent>,
    },
    UserTranscript {
        user_transcription_event: Option<UserTranscriptionEvent>,
    },
    Interruption {},
    Ping {
        ping_event: Option<PingEvent>,
    },
    #[serde(other)]
    Unknown,
}

/// A decoded incoming frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// The provider finished setting up the conversation; audio may flow.
    Initiated {
        conversation_id: Option<String>,
        audio_format: Option<String>,
    },
    /// Something the session dispatches.
    Event(ChannelEvent),
    /// Keep-alive that must be answered with [`Outbound::Pong`].
    Ping { event_id: Option<u64> },
    /// A message type this client does not handle, by name.
    Unknown(String),
    /// A known type with an empty payload.
    Ignored,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

/// Decode one text frame.
pub fn decode(frame: &str) -> Result<Inbound, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(frame)?;
    let msg = ServerMessage::deserialize(&value)?;

    let inbound = match msg {
        ServerMessage::ConversationInitiationMetadata {
            conversation_initiation_metadata_event: meta,
        } => {
            let (conversation_id, audio_format) = meta
                .map(|m| (m.conversation_id, m.agent_output_audio_format))
                .unwrap_or_default();
            Inbound::Initiated {
                conversation_id,
                audio_format,
            }
        }
        ServerMessage::Audio { audio_event } => {
            match non_empty(audio_event.and_then(|a| a.audio_base_64)) {
                Some(b64) => Inbound::Event(ChannelEvent::AudioChunk(BASE64.decode(b64)?)),
                None => Inbound::Ignored,
            }
        }
        ServerMessage::AgentResponse {
            agent_response_event,
        } => match non_empty(agent_response_event.and_then(|e| e.agent_response)) {
            Some(text) => Inbound::Event(ChannelEvent::AgentResponse(text)),
            None => Inbound::Ignored,
        },
        ServerMessage::UserTranscript {
            user_transcription_event,
        } => match non_empty(user_transcription_event.and_then(|e| e.user_transcript)) {
            Some(text) => Inbound::Event(ChannelEvent::UserTranscript(text)),
            None => Inbound::Ignored,
        },
        ServerMessage::Interruption {} => Inbound::Event(ChannelEvent::Interruption),
        ServerMessage::Ping { ping_event } => Inbound::Ping {
            event_id: ping_event.and_then(|p| p.event_id),
        },
        ServerMessage::Unknown => Inbound::Unknown(
            value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
        ),
    };

    Ok(inbound)
}

// ---------------------------------------------------------------------------
// Outgoing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    UserAudioChunk(Vec<u8>),
    Pong { event_id: Option<u64> },
    /// Preferred shape for asking the agent to speak a given text.
    SynthesizeAndPlay(String),
    /// Fallback shape some deployments accept instead.
    AgentResponseInjection(String),
}

impl Outbound {
    /// Both frames that make up a best-effort "say this" request.
    pub fn speak(text: &str) -> [Outbound; 2] {
        [
            Outbound::SynthesizeAndPlay(text.to_string()),
            Outbound::AgentResponseInjection(text.to_string()),
        ]
    }

    pub fn to_frame(&self) -> String {
        let value = match self {
            Outbound::UserAudioChunk(pcm) => serde_json::json!({
                "user_audio_chunk": BASE64.encode(pcm)
            }),
            Outbound::Pong { event_id } => serde_json::json!({
                "type": "pong",
                "event_id": event_id
            }),
            Outbound::SynthesizeAndPlay(text) => serde_json::json!({
                "type": "synthesize_and_play",
                "text": text
            }),
            Outbound::AgentResponseInjection(text) => serde_json::json!({
                "type": "agent_response_injection",
                "agent_response": text
            }),
        };
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
