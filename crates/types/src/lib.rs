//! Core type definitions for the threshold-signature coordinator.
//!
//! This crate provides the shared data structures used by both halves of the
//! system: curve point wrappers, the broadcast-log message with its canonical
//! signing encoding, the operation work tickets handed to the air-gapped
//! machine, and reconstructed signature records.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

pub mod message;
pub mod operation;

pub use message::Message;
pub use operation::{Operation, OperationCheckError};

/// Event name under which reconstructed signatures are broadcast.
///
/// This is a client-level event: it never enters a state machine, every node
/// simply persists the carried signature record.
pub const SIGNATURE_RECONSTRUCTED: &str = "signature_reconstructed";

// =========================
// CRYPTOGRAPHIC PRIMITIVES
// =========================

/// Compressed G2 point on BLS12-381 (96 bytes)
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct G2Point(#[serde_as(as = "[_; 96]")] pub [u8; 96]);

impl Default for G2Point {
    fn default() -> Self {
        Self([0u8; 96])
    }
}

// =========================
// SIGNATURES
// =========================

/// A reconstructed threshold signature, broadcast by the signing initiator
/// and persisted by every participant under `(dkg_round_id, signing_id)`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructedSignature {
    /// Identifier of the signing session inside the DKG round.
    pub signing_id: String,
    /// The payload that was signed.
    #[serde(default)]
    pub src_payload: Vec<u8>,
    /// The recovered BLS signature (empty until reconstruction happened).
    #[serde(default)]
    pub signature: Vec<u8>,
    /// Stamped from the enclosing message's sender, never from the payload.
    #[serde(skip)]
    pub username: String,
    /// Stamped from the enclosing message's round, never from the payload.
    #[serde(skip)]
    pub dkg_round_id: String,
}

// =========================
// HELPER FUNCTIONS
// =========================

/// Compute SHA-256 hash
pub fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    Sha256::digest(data).into()
}

/// Derive an opaque DKG round identifier from an initiating request body.
pub fn dkg_round_id(body: &[u8]) -> String {
    let mut id = hex::encode(sha256(body));
    id.truncate(32);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_id_is_stable_and_distinct() {
        let a = dkg_round_id(b"proposal body one");
        let b = dkg_round_id(b"proposal body two");

        assert_eq!(a, dkg_round_id(b"proposal body one"));
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_g2_point_serialization() {
        let point = G2Point([42u8; 96]);
        let encoded = serde_json::to_vec(&point).unwrap();
        let decoded: G2Point = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(point, decoded);
    }

    #[test]
    fn test_reconstructed_signature_decodes_signing_start_payload() {
        // A signing-start message carries no signature yet; the record must
        // still decode so the payload can be inspected through the CLI.
        let raw = serde_json::json!({
            "signing_id": "sig-1",
            "src_payload": [1, 2, 3],
            "participant_id": 0,
            "created_at": "2024-01-01T00:00:00Z",
        });
        let sig: ReconstructedSignature = serde_json::from_value(raw).unwrap();
        assert_eq!(sig.signing_id, "sig-1");
        assert_eq!(sig.src_payload, vec![1, 2, 3]);
        assert!(sig.signature.is_empty());
    }
}
