//! Error types for the page-lock protocol

use crate::state::LockState;
use thiserror::Error;

/// Protocol error types
///
/// Denials are deliberately absent: a denied handshake is normal control
/// flow, not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Participant ID outside the flag bank
    #[error("participant id {id} out of range, the flag bank holds {max} slots")]
    InvalidParticipant { id: u8, max: usize },

    /// Both sides of a pair resolved to the same flag slot
    #[error("participants must differ, both sides are id {id}")]
    IdenticalParticipants { id: u8 },

    /// State machine moved in a way the protocol does not allow
    #[error("invalid lock transition from {from:?} to {to:?}")]
    InvalidTransition { from: LockState, to: LockState },
}

/// Convenience type alias for Results
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl ProtocolError {
    /// Whether the error is a startup configuration problem (reportable
    /// before any region access) rather than a protocol misuse at runtime
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidParticipant { .. } | ProtocolError::IdenticalParticipants { .. }
        )
    }
}
