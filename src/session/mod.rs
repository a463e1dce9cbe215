//! Session orchestration: the lifecycle state machine, the Transcript
//! Reducer, the Session Timer and the Streaming Orchestrator that ties them
//! to the admission queue and both channels.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pitch_session::config::{AppConfig, SessionKind};
//! use pitch_session::session::{Session, SessionDeps};
//! # fn deps() -> SessionDeps { unimplemented!() }
//!
//! # async fn example() {
//! let config = AppConfig::default();
//! let session = Session::new(SessionKind::Pitch, &config, deps());
//! let handle = session.handle();
//! let status = session.subscribe();
//!
//! let report = tokio::spawn(session.run());
//! // ... later, from the UI:
//! handle.stop();
//! let report = report.await.unwrap();
//! println!("{} entries, ended {}", report.transcript.len(), report.state);
//! # let _ = status;
//! # }
//! ```

pub mod error;
pub mod orchestrator;
pub mod state;
pub mod timer;
pub mod transcript;

#[cfg(test)]
pub(crate) mod testing;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use error::SessionError;
pub use orchestrator::{
    Handoff, Session, SessionDeps, SessionHandle, SessionInput, SessionReport, UserCommand,
    GENERATING_MESSAGE, SAVING_MESSAGE,
};
pub use state::{format_countdown, SessionState, SessionStatus};
pub use timer::SessionTimer;
pub use transcript::{
    reduce, replay, Connection, Role, Transcript, TranscriptEntry, CONNECTED_MESSAGE,
    CONNECTION_LOST_MESSAGE, INTERRUPTED_MESSAGE,
};
