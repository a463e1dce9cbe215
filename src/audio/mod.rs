//! Capture Adapter and the audio conditioning behind it.
//!
//! ```text
//! Microphone → cpal callback (capture thread)
//!   → downmix_to_mono → resample → AutoGain → NoiseGate → pcm_s16le
//!   → FrameSink (session inbox) → voice connection
//! ```

pub mod capture;
pub mod conditioning;
pub mod resample;

pub use capture::{CaptureAdapter, CaptureError, FrameSink, MicrophoneCapture};
pub use conditioning::{AutoGain, FrameConditioner, NoiseGate};
pub use resample::{downmix_to_mono, encode_pcm16le, resample};
