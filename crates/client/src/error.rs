//! Error types for the online node.

use thiserror::Error;

use coldsign_fsm::FsmError;
use coldsign_storage::StorageError;
use coldsign_types::OperationCheckError;

/// Errors that can occur in the client loop and its admin surface.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Log(#[from] StorageError),

    #[error("state store failure: {0}")]
    State(String),

    #[error("state store is corrupt: {0}")]
    StoreCorrupt(String),

    #[error(transparent)]
    Fsm(#[from] FsmError),

    #[error("invalid message signature from {0}")]
    InvalidSignature(String),

    #[error("unknown sender {0}")]
    UnknownSender(String),

    #[error("unknown operation {0}")]
    UnknownOperation(String),

    #[error(transparent)]
    OperationMismatch(#[from] OperationCheckError),

    #[error("unknown DKG round {0}")]
    UnknownRound(String),

    #[error("keystore failure: {0}")]
    KeyStore(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether the loop must stop: silent continuation over corrupt local
    /// state could diverge from the rest of the quorum.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::State(_)
                | ClientError::StoreCorrupt(_)
                | ClientError::Fsm(FsmError::StoreCorrupt(_))
        )
    }
}
