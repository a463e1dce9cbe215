//! The event union both external channels feed into a session, and the
//! [`Sink`] producers use to push into the session's single inbox.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// ChannelEvent
// ---------------------------------------------------------------------------

/// Who closed the voice channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The orchestrator's own teardown closed the channel.
    Intentional,
    /// Provider- or network-initiated close.
    Unexpected,
}

/// One message from the voice channel, consumed exactly once by the
/// session's dispatch step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Ready,
    /// Agent speech to forward verbatim to the avatar.
    AudioChunk(Vec<u8>),
    UserTranscript(String),
    AgentResponse(String),
    Interruption,
    Disconnect(DisconnectReason),
    Error(String),
}

impl ChannelEvent {
    /// Short name for logs; never includes payloads.
    pub fn name(&self) -> &'static str {
        match self {
            ChannelEvent::Ready => "ready",
            ChannelEvent::AudioChunk(_) => "audio-chunk",
            ChannelEvent::UserTranscript(_) => "user-transcript",
            ChannelEvent::AgentResponse(_) => "agent-response",
            ChannelEvent::Interruption => "interruption",
            ChannelEvent::Disconnect(_) => "disconnect",
            ChannelEvent::Error(_) => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Cloneable, type-erased push end of a session inbox.
///
/// Producers (voice reader task, capture thread) only see `Sink<T>`; the
/// session decides how `T` is wrapped into its own inbox message.
/// [`emit`](Self::emit) returns `false` once the inbox is gone.
pub struct Sink<T> {
    inner: Arc<dyn Fn(T) -> bool + Send + Sync>,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Sink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink").finish_non_exhaustive()
    }
}

impl<T: 'static> Sink<T> {
    pub fn new(f: impl Fn(T) -> bool + Send + Sync + 'static) -> Self {
        Self { inner: Arc::new(f) }
    }

    /// Forward into an unbounded channel whose message type wraps `T`.
    pub fn from_sender<M>(tx: mpsc::UnboundedSender<M>) -> Self
    where
        M: From<T> + Send + 'static,
    {
        Self::new(move |value| tx.send(M::from(value)).is_ok())
    }

    pub fn emit(&self, value: T) -> bool {
        (self.inner)(value)
    }
}

/// Sink for voice-channel events.
pub type EventSink = Sink<ChannelEvent>;
