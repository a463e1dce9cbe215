//! [`WebSocketTransport`]: the live provider connection.
//!
//! The socket is split into a sink half driven by the writer task and a
//! stream half driven by the reader task.  A close frame from the provider
//! ends the stream the same way a dropped connection does.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::channel::ChannelError;

use super::transport::{FrameReader, FrameTransport, FrameWriter};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FrameTransport for WebSocketTransport {
    async fn open(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>), ChannelError> {
        log::debug!("convai: opening websocket to {url}");
        let (socket, response) = connect_async(url)
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        log::debug!("convai: websocket handshake status {}", response.status());

        let (sink, stream) = socket.split();
        Ok((
            Box::new(WebSocketWriter { sink }),
            Box::new(WebSocketReader { stream }),
        ))
    }
}

// ---------------------------------------------------------------------------
// Halves
// ---------------------------------------------------------------------------

struct WebSocketWriter {
    sink: SplitSink<Socket, Message>,
}

#[async_trait]
impl FrameWriter for WebSocketWriter {
    async fn send(&mut self, frame: String) -> Result<(), ChannelError> {
        self.sink
            .send(Message::Text(frame))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            log::debug!("convai: websocket close: {e}");
        }
    }
}

struct WebSocketReader {
    stream: SplitStream<Socket>,
}

#[async_trait]
impl FrameReader for WebSocketReader {
    async fn next_frame(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => log::warn!("convai: dropping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    log::debug!("convai: provider closed the socket ({frame:?})");
                    return None;
                }
                // Control frames are answered by tungstenite itself.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(ChannelError::Stream(e.to_string()))),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
