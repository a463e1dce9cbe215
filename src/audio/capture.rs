//! Capture Adapter: microphone frames for the voice channel.
//!
//! [`CaptureAdapter`] is the seam the session drives: `start` with a
//! [`FrameSink`], `stop` when tearing down.  [`MicrophoneCapture`] is the
//! `cpal` implementation.  Because a `cpal::Stream` is not `Send` on every
//! platform it lives on a dedicated capture thread; `stop` signals that
//! thread and joins it, which drops the stream.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::channel::Sink;
use crate::config::AudioConfig;

use super::conditioning::FrameConditioner;

/// Receives conditioned PCM frames (`pcm_s16le`, mono, fixed rate).
pub type FrameSink = Sink<Vec<u8>>;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("capture thread failed: {0}")]
    Thread(String),
}

// ---------------------------------------------------------------------------
// CaptureAdapter
// ---------------------------------------------------------------------------

pub trait CaptureAdapter: Send {
    /// Begin delivering frames to `frames`.  Starting a running adapter is
    /// a no-op.
    fn start(&mut self, frames: FrameSink) -> Result<(), CaptureError>;

    /// Stop delivering frames.  Idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

// ---------------------------------------------------------------------------
// MicrophoneCapture
// ---------------------------------------------------------------------------

struct Running {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Default input device of the default `cpal` host.
pub struct MicrophoneCapture {
    config: AudioConfig,
    running: Option<Running>,
}

impl MicrophoneCapture {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            config: config.clone(),
            running: None,
        }
    }

    /// Build and play the stream; runs on the capture thread.
    fn open_stream(config: &AudioConfig, frames: FrameSink) -> Result<cpal::Stream, CaptureError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;
        let supported = device.default_input_config()?;

        let rate = supported.sample_rate().0;
        let channels = supported.channels();
        let stream_config: cpal::StreamConfig = supported.into();
        log::info!(
            "capture: {} @ {rate} Hz x{channels} -> {} Hz mono",
            device.name().unwrap_or_else(|_| "input device".into()),
            config.sample_rate
        );

        let mut conditioner = FrameConditioner::new(rate, channels, config);
        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let pcm = conditioner.process(data);
                if !pcm.is_empty() {
                    // The session may already be gone; frames are dropped then.
                    let _ = frames.emit(pcm);
                }
            },
            |err: cpal::StreamError| {
                log::error!("capture: stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        Ok(stream)
    }
}

impl CaptureAdapter for MicrophoneCapture {
    fn start(&mut self, frames: FrameSink) -> Result<(), CaptureError> {
        if self.running.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), CaptureError>>();
        let config = self.config.clone();

        let thread = std::thread::Builder::new()
            .name("pitch-capture".into())
            .spawn(move || match Self::open_stream(&config, frames) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Blocks until stop() sends or drops the sender.
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| CaptureError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.running = Some(Running { stop_tx, thread });
                log::info!("capture: started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::Thread("capture thread exited during start".into()))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop_tx.send(());
            if running.thread.join().is_err() {
                log::warn!("capture: capture thread panicked");
            }
            log::info!("capture: stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
