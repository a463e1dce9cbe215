//! Session orchestration for live, voice-first conversations with an AI
//! persona rendered as an avatar.
//!
//! * [`queue`]: admission queue gating access to the voice provider.
//! * [`session`]: per-attempt state machine, event bridging, transcript
//!   and countdown.
//! * [`channel`]: avatar / voice channel seams and the configuration fetch.
//! * [`voice`]: the conversational voice provider client.
//! * [`audio`]: microphone capture.
//! * [`config`]: settings and their TOML persistence.

pub mod audio;
pub mod channel;
pub mod config;
pub mod queue;
pub mod session;
pub mod voice;
