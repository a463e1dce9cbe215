//! Transcript Reducer.
//!
//! [`reduce`] folds one [`ChannelEvent`] into an append-only [`Transcript`].
//! It never reorders or rewrites entries, so replaying the same ordered
//! events always yields the same transcript.
//!
//! [`Connection`] is the connected flag folded from the same events.
//! Error text reaches the user through the session's notice instead.

use std::fmt;

use crate::channel::{ChannelEvent, DisconnectReason};

pub const CONNECTED_MESSAGE: &str = "Connected. Start pitching your startup...";
pub const INTERRUPTED_MESSAGE: &str = "Interrupted";
pub const CONNECTION_LOST_MESSAGE: &str = "Connection lost unexpectedly";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Agent,
    System,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
}

impl TranscriptEntry {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

impl fmt::Display for TranscriptEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.role.label(), self.text)
    }
}

/// Ordered, append-only conversation log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn append(mut self, role: Role, text: &str) -> Self {
        self.entries.push(TranscriptEntry::new(role, text));
        self
    }
}

/// `(transcript, event) -> transcript'`.
pub fn reduce(transcript: Transcript, event: &ChannelEvent) -> Transcript {
    match event {
        ChannelEvent::Ready => transcript.append(Role::System, CONNECTED_MESSAGE),
        ChannelEvent::UserTranscript(text) => transcript.append(Role::User, text),
        ChannelEvent::AgentResponse(text) => transcript.append(Role::Agent, text),
        ChannelEvent::Interruption => transcript.append(Role::System, INTERRUPTED_MESSAGE),
        ChannelEvent::AudioChunk(_) | ChannelEvent::Disconnect(_) | ChannelEvent::Error(_) => {
            transcript
        }
    }
}

pub fn replay<'a>(events: impl IntoIterator<Item = &'a ChannelEvent>) -> Transcript {
    events.into_iter().fold(Transcript::new(), reduce)
}

// ---------------------------------------------------------------------------
// Connection projection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connection {
    pub is_connected: bool,
}

impl Connection {
    /// `teardown_in_flight` is the session's intentional-disconnect flag;
    /// while it is set no disconnect counts as unexpected.
    pub fn apply(&mut self, event: &ChannelEvent, teardown_in_flight: bool) {
        match event {
            ChannelEvent::Ready => self.is_connected = true,
            ChannelEvent::Disconnect(reason) => {
                if classify(*reason, teardown_in_flight) == DisconnectReason::Unexpected {
                    self.is_connected = false;
                }
            }
            _ => {}
        }
    }
}

/// A close seen while teardown is in flight is ours, whatever the channel
/// reported.
pub fn classify(reported: DisconnectReason, teardown_in_flight: bool) -> DisconnectReason {
    if teardown_in_flight {
        DisconnectReason::Intentional
    } else {
        reported
    }
}
