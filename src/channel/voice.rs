//! Conversational voice channel: a persistent duplex connection to one
//! voice agent.

use async_trait::async_trait;

use super::{ChannelError, EventSink};

/// Parameters for opening a voice connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceConnectRequest {
    pub agent_id: String,
    /// Spoken by the agent once the provider has initialised the
    /// conversation (e.g. a feedback summary).
    pub initial_agent_message: Option<String>,
}

impl VoiceConnectRequest {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            initial_agent_message: None,
        }
    }
}

/// An open voice connection.  Events flow out through the [`EventSink`]
/// given to [`VoiceChannel::connect`].
#[async_trait]
pub trait VoiceConnection: Send {
    /// Push one captured PCM frame upstream.  Frames sent before the
    /// provider is ready may be dropped.
    fn send_audio_frame(&mut self, pcm: &[u8]) -> Result<(), ChannelError>;

    /// Best-effort request for the agent to speak `text`.  Returns `false`
    /// when the connection is not open.
    fn inject_agent_message(&mut self, text: &str) -> bool;

    /// Close the connection.  The resulting disconnect event is reported as
    /// intentional.
    async fn close(&mut self);
}

#[async_trait]
pub trait VoiceChannel: Send + Sync {
    /// Resolves once the provider acknowledges the connection.
    async fn connect(
        &self,
        request: VoiceConnectRequest,
        events: EventSink,
    ) -> Result<Box<dyn VoiceConnection>, ChannelError>;
}
