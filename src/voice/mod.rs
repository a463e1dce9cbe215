//! Conversational voice provider client.
//!
//! [`protocol`] is the JSON frame codec and [`transport`] the text-frame
//! seam, with [`WebSocketTransport`] as its live implementation.
//! [`ConvaiChannel`] is the [`crate::channel::VoiceChannel`] built on them.

pub mod convai;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use convai::ConvaiChannel;
pub use protocol::{decode, Inbound, Outbound, ProtocolError};
pub use transport::{FrameReader, FrameTransport, FrameWriter, ReplayTransport};
pub use websocket::WebSocketTransport;
