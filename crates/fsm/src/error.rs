//! Error types for state-machine operations.

use thiserror::Error;

/// Errors that can occur while defining or driving a state machine.
#[derive(Debug, Error)]
pub enum FsmError {
    #[error("unknown event {0}")]
    UnknownEvent(String),

    #[error("event {event} is not allowed in state {state}")]
    InvalidTransition { event: String, state: String },

    #[error("event {0} is internal and cannot be dispatched from outside")]
    InternalEvent(String),

    #[error("unknown participant index {0}")]
    InvalidParticipant(u32),

    #[error("malformed request: {0}")]
    InvalidRequest(String),

    #[error("{0} phase is not initialized")]
    PhaseNotInitialized(&'static str),

    #[error("auto transition chain exceeded {0} steps")]
    TransitionChainTooLong(usize),

    #[error("snapshot is corrupt: {0}")]
    StoreCorrupt(String),
}
