use thiserror::Error;

use crate::channel::{ChannelError, SetupError};
use crate::queue::AdmissionError;

use super::state::SessionState;
use super::transcript::CONNECTION_LOST_MESSAGE;

/// Errors surfaced by a session.
///
/// Setup and admission errors halt progression before `active`; once
/// active only [`SessionError::Disconnected`] ends a session with an error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session setup failed: {0}")]
    Setup(#[from] SetupError),

    #[error("admission failed: {0}")]
    Admission(#[from] AdmissionError),

    #[error("voice or avatar channel failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("{}", CONNECTION_LOST_MESSAGE)]
    Disconnected,

    #[error("session has not been initialized")]
    NotInitialized,

    #[error("invalid session transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
}
