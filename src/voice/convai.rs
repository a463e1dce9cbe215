//! [`ConvaiChannel`]: the conversational voice channel over a text-frame
//! transport.
//!
//! Each connection runs two tasks:
//!
//! ```text
//! reader task:  transport frames ─▶ protocol::decode ─▶ EventSink
//!                                   └─ ping ─▶ pong ─┐
//! writer task:  outbound queue ◀─ send_audio_frame ──┴─▶ transport
//! ```
//!
//! Audio is only forwarded once the provider has sent its initiation
//! metadata; earlier frames are dropped.  The disconnect event is emitted
//! exactly once, tagged [`DisconnectReason::Intentional`] when the close
//! came from [`VoiceConnection::close`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::channel::{
    ChannelError, ChannelEvent, DisconnectReason, EventSink, VoiceChannel, VoiceConnectRequest,
    VoiceConnection,
};
use crate::config::ProviderConfig;

use super::protocol::{self, Inbound, Outbound};
use super::transport::{FrameReader, FrameTransport, FrameWriter};

enum WriterCommand {
    Frame(String),
    Close,
}

#[derive(Default)]
struct ConnectionFlags {
    initialized: AtomicBool,
    closing: AtomicBool,
    audio_chunks_sent: AtomicUsize,
    audio_chunks_received: AtomicUsize,
}

impl ConnectionFlags {
    fn close_reason(&self) -> DisconnectReason {
        if self.closing.load(Ordering::SeqCst) {
            DisconnectReason::Intentional
        } else {
            DisconnectReason::Unexpected
        }
    }
}

// ---------------------------------------------------------------------------
// ConvaiChannel
// ---------------------------------------------------------------------------

pub struct ConvaiChannel {
    transport: Arc<dyn FrameTransport>,
    provider: ProviderConfig,
}

impl ConvaiChannel {
    pub fn new(transport: Arc<dyn FrameTransport>, provider: &ProviderConfig) -> Self {
        Self {
            transport,
            provider: provider.clone(),
        }
    }
}

#[async_trait]
impl VoiceChannel for ConvaiChannel {
    async fn connect(
        &self,
        request: VoiceConnectRequest,
        events: EventSink,
    ) -> Result<Box<dyn VoiceConnection>, ChannelError> {
        let url = self.provider.voice_endpoint(&request.agent_id);
        let (writer, reader) = self.transport.open(&url).await?;
        log::info!("convai: connected to agent {}", request.agent_id);

        let flags = Arc::new(ConnectionFlags::default());
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let writer_task = tokio::spawn(write_loop(writer, out_rx));

        // Ready goes out before the reader can emit anything else.
        events.emit(ChannelEvent::Ready);

        let reader_task = tokio::spawn(read_loop(
            reader,
            events,
            out_tx.clone(),
            Arc::clone(&flags),
            request.initial_agent_message,
            stop_rx,
        ));

        Ok(Box::new(ConvaiConnection {
            out: out_tx,
            flags,
            stop: stop_tx,
            reader_task: Some(reader_task),
            writer_task: Some(writer_task),
        }))
    }
}

async fn write_loop(mut writer: Box<dyn FrameWriter>, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriterCommand::Frame(frame) => {
                if let Err(e) = writer.send(frame).await {
                    log::warn!("convai: failed to send frame: {e}");
                }
            }
            WriterCommand::Close => break,
        }
    }
    writer.close().await;
}

async fn read_loop(
    mut reader: Box<dyn FrameReader>,
    events: EventSink,
    out: mpsc::UnboundedSender<WriterCommand>,
    flags: Arc<ConnectionFlags>,
    mut pending_message: Option<String>,
    mut stop: watch::Receiver<bool>,
) {
    let reason = loop {
        let frame = tokio::select! {
            biased;
            _ = stop.changed() => break DisconnectReason::Intentional,
            frame = reader.next_frame() => frame,
        };

        let text = match frame {
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                log::error!("convai: transport error: {e}");
                events.emit(ChannelEvent::Error(e.to_string()));
                break flags.close_reason();
            }
            None => break flags.close_reason(),
        };

        match protocol::decode(&text) {
            Ok(Inbound::Initiated {
                conversation_id,
                audio_format,
            }) => {
                flags.initialized.store(true, Ordering::SeqCst);
                log::info!(
                    "convai: conversation initiated (id={}, format={})",
                    conversation_id.as_deref().unwrap_or("-"),
                    audio_format.as_deref().unwrap_or("-"),
                );
                if let Some(message) = pending_message.take() {
                    log::debug!("convai: speaking initial agent message");
                    for msg in Outbound::speak(&message) {
                        let _ = out.send(WriterCommand::Frame(msg.to_frame()));
                    }
                }
            }
            Ok(Inbound::Event(event)) => {
                if matches!(event, ChannelEvent::AudioChunk(_)) {
                    flags.audio_chunks_received.fetch_add(1, Ordering::SeqCst);
                }
                if !events.emit(event) {
                    log::debug!("convai: event sink closed, stopping reader");
                    break DisconnectReason::Intentional;
                }
            }
            Ok(Inbound::Ping { event_id }) => {
                let _ = out.send(WriterCommand::Frame(
                    Outbound::Pong { event_id }.to_frame(),
                ));
            }
            Ok(Inbound::Unknown(kind)) => {
                log::debug!("convai: ignoring unknown message type '{kind}'")
            }
            Ok(Inbound::Ignored) => log::trace!("convai: ignoring empty payload"),
            Err(e) => log::warn!("convai: dropping frame: {e}"),
        }
    };

    flags.initialized.store(false, Ordering::SeqCst);
    log::info!(
        "convai: connection closed ({reason:?}), {} audio chunks received, {} sent",
        flags.audio_chunks_received.load(Ordering::SeqCst),
        flags.audio_chunks_sent.load(Ordering::SeqCst)
    );
    events.emit(ChannelEvent::Disconnect(reason));
}

// ---------------------------------------------------------------------------
// ConvaiConnection
// ---------------------------------------------------------------------------

struct ConvaiConnection {
    out: mpsc::UnboundedSender<WriterCommand>,
    flags: Arc<ConnectionFlags>,
    stop: watch::Sender<bool>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
}

impl ConvaiConnection {
    fn is_open(&self) -> bool {
        !self.flags.closing.load(Ordering::SeqCst) && !self.out.is_closed()
    }
}

#[async_trait]
impl VoiceConnection for ConvaiConnection {
    fn send_audio_frame(&mut self, pcm: &[u8]) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        if !self.flags.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.out
            .send(WriterCommand::Frame(
                Outbound::UserAudioChunk(pcm.to_vec()).to_frame(),
            ))
            .map_err(|_| ChannelError::Closed)?;
        self.flags.audio_chunks_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn inject_agent_message(&mut self, text: &str) -> bool {
        if !self.is_open() {
            return false;
        }
        Outbound::speak(text)
            .into_iter()
            .all(|msg| self.out.send(WriterCommand::Frame(msg.to_frame())).is_ok())
    }

    async fn close(&mut self) {
        if self.flags.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.stop.send(true);
        let _ = self.out.send(WriterCommand::Close);
        if let Some(task) = self.reader_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.writer_task.take() {
            let _ = task.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
