//! Error types for the air-gapped machine.

use thiserror::Error;

use coldsign_dkg::DkgError;

use crate::store::StoreError;

/// Errors that can occur inside the air-gapped machine.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("store is corrupt: {0}")]
    StoreCorrupt(String),

    #[error("encryption failed: {0}")]
    EncryptFailed(String),

    #[error("failed to decrypt stored keys: {0}")]
    DecryptFailed(String),

    #[error("unsupported operation type {0}")]
    UnsupportedOperation(String),

    #[error("malformed operation payload: {0}")]
    MalformedPayload(String),

    #[error("this node ({0}) is not in the quorum")]
    NotInQuorum(String),

    #[error("no DKG session for round {0}")]
    MissingSession(String),

    #[error(transparent)]
    Dkg(#[from] DkgError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
