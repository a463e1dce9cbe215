//! Text-frame transports the voice channel runs over.
//!
//! A transport opens a duplex connection to a URL and splits it into a
//! [`FrameWriter`] and a [`FrameReader`].  The live deployment plugs in a
//! WebSocket client here; [`ReplayTransport`] plays back a recorded
//! provider log for dry runs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::channel::ChannelError;

#[async_trait]
pub trait FrameWriter: Send {
    async fn send(&mut self, frame: String) -> Result<(), ChannelError>;
    async fn close(&mut self);
}

#[async_trait]
pub trait FrameReader: Send {
    /// Next incoming frame; `None` once the remote side has closed.
    async fn next_frame(&mut self) -> Option<Result<String, ChannelError>>;
}

#[async_trait]
pub trait FrameTransport: Send + Sync {
    async fn open(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>), ChannelError>;
}

// ---------------------------------------------------------------------------
// ReplayTransport
// ---------------------------------------------------------------------------

/// Plays a fixed list of provider frames, one every `pace`.
///
/// Frames written by the client are kept and can be inspected with
/// [`sent`](Self::sent).  After the last frame the connection stays open
/// until closed locally, unless [`hang_up_at_end`](Self::hang_up_at_end)
/// was requested.
#[derive(Debug, Clone)]
pub struct ReplayTransport {
    frames: Vec<String>,
    pace: Duration,
    hang_up: bool,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ReplayTransport {
    pub fn new(frames: Vec<String>) -> Self {
        Self {
            frames,
            pace: Duration::ZERO,
            hang_up: false,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Parse a JSON-lines log; blank lines and `#` comments are skipped.
    pub fn from_jsonl(text: &str) -> Self {
        let frames = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();
        Self::new(frames)
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// Close from the remote side once every frame has been delivered.
    pub fn hang_up_at_end(mut self) -> Self {
        self.hang_up = true;
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Every frame the client has written so far.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

struct ReplayReader {
    frames: std::vec::IntoIter<String>,
    pace: Duration,
    hang_up: bool,
}

#[async_trait]
impl FrameReader for ReplayReader {
    async fn next_frame(&mut self) -> Option<Result<String, ChannelError>> {
        match self.frames.next() {
            Some(frame) => {
                if !self.pace.is_zero() {
                    tokio::time::sleep(self.pace).await;
                }
                Some(Ok(frame))
            }
            None if self.hang_up => None,
            None => std::future::pending().await,
        }
    }
}

struct ReplayWriter {
    sent: Arc<Mutex<Vec<String>>>,
    closed: bool,
}

#[async_trait]
impl FrameWriter for ReplayWriter {
    async fn send(&mut self, frame: String) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(frame);
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[async_trait]
impl FrameTransport for ReplayTransport {
    async fn open(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>), ChannelError> {
        log::debug!("convai: replaying {} frames for {url}", self.frames.len());
        let reader = ReplayReader {
            frames: self.frames.clone().into_iter(),
            pace: self.pace,
            hang_up: self.hang_up,
        };
        let writer = ReplayWriter {
            sent: Arc::clone(&self.sent),
            closed: false,
        };
        Ok((Box::new(writer), Box::new(reader)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonl_skips_blank_and_comment_lines() {
        let log = "# recorded 2024-05-01\n{\"type\":\"ping\"}\n\n  {\"type\":\"interruption\"}  \n";
        let replay = ReplayTransport::from_jsonl(log);
        assert_eq!(replay.len(), 2);
        assert!(!replay.is_empty());
    }

    #[tokio::test]
    async fn reader_yields_frames_then_hangs_up() {
        let replay = ReplayTransport::new(vec!["a".into(), "b".into()]).hang_up_at_end();
        let (_w, mut r) = replay.open("ws://test").await.unwrap();
        assert_eq!(r.next_frame().await.unwrap().unwrap(), "a");
        assert_eq!(r.next_frame().await.unwrap().unwrap(), "b");
        assert!(r.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn writer_records_frames_until_closed() {
        let replay = ReplayTransport::new(Vec::new());
        let (mut w, _r) = replay.open("ws://test").await.unwrap();
        w.send("one".into()).await.unwrap();
        w.close().await;
        assert_eq!(w.send("two".into()).await, Err(ChannelError::Closed));
        assert_eq!(replay.sent(), vec!["one".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn reader_stays_open_without_hang_up() {
        let replay = ReplayTransport::new(Vec::new());
        let (_w, mut r) = replay.open("ws://test").await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(60), r.next_frame()).await;
        assert!(next.is_err());
    }
}
