//! Operation work tickets.
//!
//! An operation is created by the online node when a state machine enters an
//! await state that expects this node's cryptographic contribution. It crosses
//! the air gap, comes back with result messages, and is deleted once those
//! messages reached the broadcast log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::message::Message;

/// Mismatch between a stored operation and the processed copy returned from
/// the air-gapped machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OperationCheckError {
    #[error("operation id mismatch: stored {stored}, got {got}")]
    IdMismatch { stored: String, got: String },

    #[error("operation type mismatch: stored {stored}, got {got}")]
    TypeMismatch { stored: String, got: String },

    #[error("operation payload mismatch")]
    PayloadMismatch,

    #[error("DKG identifier mismatch: stored {stored}, got {got}")]
    DkgIdentifierMismatch { stored: String, got: String },
}

/// A work ticket for the air-gapped machine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    /// Name of the await state that produced this operation.
    #[serde(rename = "type")]
    pub op_type: String,
    /// JSON encoding of the state-machine response data.
    pub payload: Vec<u8>,
    /// Raw result bytes, set by the air-gapped machine.
    #[serde(default)]
    pub result: Vec<u8>,
    /// Messages produced offline, to be signed and broadcast by the client.
    #[serde(default)]
    pub result_msgs: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub dkg_identifier: String,
}

impl Operation {
    pub fn new(
        op_type: impl Into<String>,
        payload: Vec<u8>,
        dkg_identifier: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            op_type: op_type.into(),
            payload,
            result: Vec::new(),
            result_msgs: Vec::new(),
            created_at,
            dkg_identifier: dkg_identifier.into(),
        }
    }

    /// Verify that a processed operation matches this stored one. Result
    /// fields are free to differ; identity fields are not.
    pub fn check(&self, processed: &Operation) -> Result<(), OperationCheckError> {
        if self.id != processed.id {
            return Err(OperationCheckError::IdMismatch {
                stored: self.id.clone(),
                got: processed.id.clone(),
            });
        }
        if self.op_type != processed.op_type {
            return Err(OperationCheckError::TypeMismatch {
                stored: self.op_type.clone(),
                got: processed.op_type.clone(),
            });
        }
        if self.payload != processed.payload {
            return Err(OperationCheckError::PayloadMismatch);
        }
        if self.dkg_identifier != processed.dkg_identifier {
            return Err(OperationCheckError::DkgIdentifierMismatch {
                stored: self.dkg_identifier.clone(),
                got: processed.dkg_identifier.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Operation {
        Operation::new(
            "state_dkg_commits_await_confirmations",
            br#"{"participants":[]}"#.to_vec(),
            "round-1",
            Utc::now(),
        )
    }

    #[test]
    fn test_check_accepts_differing_results() {
        let stored = sample();
        let mut processed = stored.clone();
        processed.result = vec![1, 2, 3];
        processed.result_msgs.push(Message::default());

        assert_eq!(stored.check(&processed), Ok(()));
    }

    #[test]
    fn test_check_rejects_identity_changes() {
        let stored = sample();

        let mut other = stored.clone();
        other.id = Uuid::new_v4().to_string();
        assert!(matches!(
            stored.check(&other),
            Err(OperationCheckError::IdMismatch { .. })
        ));

        let mut other = stored.clone();
        other.op_type = "state_dkg_deals_await_confirmations".into();
        assert!(matches!(
            stored.check(&other),
            Err(OperationCheckError::TypeMismatch { .. })
        ));

        let mut other = stored.clone();
        other.payload = b"{}".to_vec();
        assert_eq!(stored.check(&other), Err(OperationCheckError::PayloadMismatch));

        let mut other = stored.clone();
        other.dkg_identifier = "round-2".into();
        assert!(matches!(
            stored.check(&other),
            Err(OperationCheckError::DkgIdentifierMismatch { .. })
        ));
    }

    #[test]
    fn test_fresh_ids_are_unique() {
        assert_ne!(sample().id, sample().id);
    }
}
