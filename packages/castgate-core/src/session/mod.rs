//! Cast session lifecycle.
//!
//! [`SessionMachine`] owns the single session record and decides, for every
//! inbound event, the next state, the collaborator commands to issue and the
//! watchdogs to arm or cancel.

mod gate;
mod machine;
mod types;

#[cfg(test)]
mod tests;

pub use machine::{SessionConfig, SessionDeps, SessionMachine};
pub use types::{
    Ack, ConnectionDecision, LaunchContext, PeerIdentity, PendingPeer, PlayerState,
    SessionEvent, SessionSnapshot, SessionState, StopReason,
};

use thiserror::Error;

/// Failures of boundary operations. None of them mutates the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Invalid decision '{0}': expected \"Accept\" or \"Reject\"")]
    InvalidDecision(String),

    #[error("Unknown player state '{0}'")]
    InvalidPlayerState(String),

    /// The request is well-formed but not allowed in the current state.
    #[error("{0}")]
    PolicyViolation(String),

    #[error("Invalid MAC/name: {mac} / {name} does not match the connected peer")]
    IdentityMismatch { mac: String, name: String },
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
