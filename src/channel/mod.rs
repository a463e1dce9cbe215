//! Interfaces to the external real-time services.
//!
//! * [`AvatarConnector`] / [`AvatarChannel`] / [`AudioInputStream`]: the
//!   avatar rendering channel.
//! * [`VoiceChannel`] / [`VoiceConnection`]: the conversational voice
//!   channel; its events arrive as [`ChannelEvent`]s through an
//!   [`EventSink`].
//! * [`ConfigSource`]: the once-per-pre-warm configuration fetch.
//!
//! Close codes and reasons from either provider are opaque; callers only
//! ever see [`ChannelError`] or a [`DisconnectReason`].

pub mod avatar;
pub mod events;
pub mod setup;
pub mod voice;

use thiserror::Error;

pub use avatar::{AudioFormat, AudioInputStream, AvatarChannel, AvatarConnector};
pub use events::{ChannelEvent, DisconnectReason, EventSink, Sink};
pub use setup::{ConfigSource, HttpConfigSource, SessionCredentials, SetupError, StaticConfigSource};
pub use voice::{VoiceChannel, VoiceConnectRequest, VoiceConnection};

/// Errors raised by either channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("failed to send: {0}")]
    Send(String),

    #[error("channel is closed")]
    Closed,
}
