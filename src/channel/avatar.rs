//! Avatar rendering channel: the remote video stream driven by agent audio.
//!
//! Only the initial stream start is awaited by the orchestrator; every other
//! call is fire-and-forget from its point of view.

use async_trait::async_trait;

use crate::config::AudioConfig;

use super::ChannelError;

/// PCM layout the avatar expects on its audio-input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            encoding: config.encoding.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
        }
    }
}

/// Audio input bound to one avatar channel.  Feeding it drives lip and
/// motion sync.
pub trait AudioInputStream: Send {
    fn send_chunk(&mut self, bytes: &[u8]);
    /// Flush buffered audio for rendering; marks the end of one utterance.
    fn end_utterance(&mut self);
}

/// A live avatar session.
#[async_trait]
pub trait AvatarChannel: Send {
    /// Start streaming video into `target`.  Awaited during pre-warm.
    async fn stream_to_render_target(&mut self, target: &str) -> Result<(), ChannelError>;

    /// Create (but do not feed) an audio-input stream bound to this channel.
    fn create_audio_input_stream(&mut self, format: &AudioFormat) -> Box<dyn AudioInputStream>;

    /// Cut off the utterance currently being rendered.
    fn interrupt(&mut self);

    async fn stop_streaming(&mut self) -> Result<(), ChannelError>;

    /// Provider-side session id, when one is known.
    fn session_id(&self) -> Option<String> {
        None
    }
}

/// Opens avatar channels from a session token.
#[async_trait]
pub trait AvatarConnector: Send + Sync {
    async fn open(&self, session_token: &str) -> Result<Box<dyn AvatarChannel>, ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_follows_audio_config() {
        let format = AudioFormat::from_config(&AudioConfig::default());
        assert_eq!(
            format,
            AudioFormat {
                encoding: "pcm_s16le".into(),
                sample_rate: 16_000,
                channels: 1,
            }
        );
    }

    #[test]
    fn traits_are_object_safe() {
        fn _avatar(_: Box<dyn AvatarChannel>) {}
        fn _stream(_: Box<dyn AudioInputStream>) {}
        fn _connector(_: std::sync::Arc<dyn AvatarConnector>) {}
    }
}
