//! Error types for DKG and threshold-signing operations.

use thiserror::Error;

/// Errors that can occur during DKG and threshold signing.
#[derive(Debug, Error)]
pub enum DkgError {
    #[error("invalid G2 point encoding")]
    InvalidG2Point,

    #[error("invalid scalar encoding")]
    InvalidScalar,

    #[error("deal is addressed to participant {got}, not {expected}")]
    WrongRecipient { expected: u32, got: u32 },

    #[error("no commits stored for dealer {0}")]
    MissingCommits(u32),

    #[error("deal commitments do not match dealer {0}'s broadcast commits")]
    CommitMismatch(u32),

    #[error("share from dealer {0} fails commitment verification")]
    InvalidShare(u32),

    #[error("encryption failed: {0}")]
    EncryptFailed(String),

    #[error("decryption failed: {0}")]
    DecryptFailed(String),

    #[error("dealer {dealer} was rejected by verifier {verifier}")]
    ComplaintReceived { dealer: u32, verifier: u32 },

    #[error("insufficient partial signatures: need {required}, got {got}")]
    InsufficientShares { required: usize, got: usize },

    #[error("duplicate share index {0}")]
    DuplicateShareIndex(u32),

    #[error("Lagrange interpolation failed")]
    LagrangeInterpolationFailed,

    #[error("protocol not complete")]
    ProtocolIncomplete,

    #[error("recovered signature fails verification against the master key")]
    InvalidRecoveredSignature,
}
