//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the queue,
//! session lifecycle, providers and audio, `AppPaths` for the platform
//! config directory, and TOML persistence via `AppConfig::load` /
//! `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, AudioConfig, PersonaConfig, ProviderConfig, QueueConfig, SessionConfig,
    SessionKind,
};
