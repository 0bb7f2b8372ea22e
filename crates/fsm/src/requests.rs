//! Typed event requests.
//!
//! Log messages carry JSON payloads; [`FsmRequest::from_message`] maps the
//! wire event name to the concrete request shape so callbacks never touch raw
//! bytes. Timestamps always come from the request; handlers never read the
//! clock, which keeps replays byte-identical across nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dkg_proposal;
use crate::error::FsmError;
use crate::signature_proposal;
use crate::signing_proposal;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DefaultRequest {
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignatureProposalParticipantsEntry {
    pub addr: String,
    /// Ed25519 public key (32 bytes).
    pub pub_key: Vec<u8>,
    /// Pairing-suite public key, if already known at proposal time.
    #[serde(default)]
    pub dkg_pub_key: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignatureProposalParticipantsListRequest {
    pub participants: Vec<SignatureProposalParticipantsEntry>,
    pub signing_threshold: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignatureProposalParticipantRequest {
    pub participant_id: u32,
    #[serde(default)]
    pub dkg_pub_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DkgProposalPubKeyConfirmationRequest {
    pub participant_id: u32,
    pub pub_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DkgProposalCommitConfirmationRequest {
    pub participant_id: u32,
    pub commit: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DkgProposalDealConfirmationRequest {
    pub participant_id: u32,
    pub deal: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DkgProposalResponseConfirmationRequest {
    pub participant_id: u32,
    pub response: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DkgProposalMasterKeyConfirmationRequest {
    pub participant_id: u32,
    pub master_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DkgProposalConfirmationErrorRequest {
    pub participant_id: u32,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningProposalStartRequest {
    pub signing_id: String,
    /// Index of the initiator.
    pub participant_id: u32,
    pub src_payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningProposalParticipantRequest {
    pub signing_id: String,
    pub participant_id: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningProposalPartialSignRequest {
    pub signing_id: String,
    pub participant_id: u32,
    pub partial_sign: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Tagged union over every request kind a machine callback can receive.
#[derive(Clone, Debug)]
pub enum FsmRequest {
    Default(DefaultRequest),
    ProposalInit(SignatureProposalParticipantsListRequest),
    ProposalConfirm(SignatureProposalParticipantRequest),
    DkgPubKeyConfirm(DkgProposalPubKeyConfirmationRequest),
    DkgCommitConfirm(DkgProposalCommitConfirmationRequest),
    DkgDealConfirm(DkgProposalDealConfirmationRequest),
    DkgResponseConfirm(DkgProposalResponseConfirmationRequest),
    DkgMasterKeyConfirm(DkgProposalMasterKeyConfirmationRequest),
    DkgError(DkgProposalConfirmationErrorRequest),
    SigningStart(SigningProposalStartRequest),
    SigningConfirm(SigningProposalParticipantRequest),
    SigningPartialSign(SigningProposalPartialSignRequest),
}

impl FsmRequest {
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            FsmRequest::Default(r) => r.created_at,
            FsmRequest::ProposalInit(r) => r.created_at,
            FsmRequest::ProposalConfirm(r) => r.created_at,
            FsmRequest::DkgPubKeyConfirm(r) => r.created_at,
            FsmRequest::DkgCommitConfirm(r) => r.created_at,
            FsmRequest::DkgDealConfirm(r) => r.created_at,
            FsmRequest::DkgResponseConfirm(r) => r.created_at,
            FsmRequest::DkgMasterKeyConfirm(r) => r.created_at,
            FsmRequest::DkgError(r) => r.created_at,
            FsmRequest::SigningStart(r) => r.created_at,
            FsmRequest::SigningConfirm(r) => r.created_at,
            FsmRequest::SigningPartialSign(r) => r.created_at,
        }
    }

    /// Decode the JSON payload of a log message into the request shape the
    /// named event expects.
    pub fn from_message(event: &str, data: &[u8]) -> Result<FsmRequest, FsmError> {
        fn decode<'a, T: Deserialize<'a>>(event: &str, data: &'a [u8]) -> Result<T, FsmError> {
            serde_json::from_slice(data)
                .map_err(|e| FsmError::InvalidRequest(format!("{event}: {e}")))
        }

        let request = match event {
            e if e == signature_proposal::EVENT_INIT_PROPOSAL.as_str() => {
                FsmRequest::ProposalInit(decode(event, data)?)
            }
            e if e == signature_proposal::EVENT_CONFIRM_PROPOSAL.as_str()
                || e == signature_proposal::EVENT_DECLINE_PROPOSAL.as_str() =>
            {
                FsmRequest::ProposalConfirm(decode(event, data)?)
            }
            e if e == dkg_proposal::EVENT_DKG_PUB_KEY_CONFIRMATION_RECEIVED.as_str() => {
                FsmRequest::DkgPubKeyConfirm(decode(event, data)?)
            }
            e if e == dkg_proposal::EVENT_DKG_COMMIT_CONFIRMATION_RECEIVED.as_str() => {
                FsmRequest::DkgCommitConfirm(decode(event, data)?)
            }
            e if e == dkg_proposal::EVENT_DKG_DEAL_CONFIRMATION_RECEIVED.as_str() => {
                FsmRequest::DkgDealConfirm(decode(event, data)?)
            }
            e if e == dkg_proposal::EVENT_DKG_RESPONSE_CONFIRMATION_RECEIVED.as_str() => {
                FsmRequest::DkgResponseConfirm(decode(event, data)?)
            }
            e if e == dkg_proposal::EVENT_DKG_MASTER_KEY_CONFIRMATION_RECEIVED.as_str() => {
                FsmRequest::DkgMasterKeyConfirm(decode(event, data)?)
            }
            e if e == dkg_proposal::EVENT_DKG_PUB_KEY_CONFIRMATION_ERROR.as_str()
                || e == dkg_proposal::EVENT_DKG_COMMIT_CONFIRMATION_ERROR.as_str()
                || e == dkg_proposal::EVENT_DKG_DEAL_CONFIRMATION_ERROR.as_str()
                || e == dkg_proposal::EVENT_DKG_RESPONSE_CONFIRMATION_ERROR.as_str()
                || e == dkg_proposal::EVENT_DKG_MASTER_KEY_CONFIRMATION_ERROR.as_str() =>
            {
                FsmRequest::DkgError(decode(event, data)?)
            }
            e if e == signing_proposal::EVENT_SIGNING_START.as_str() => {
                FsmRequest::SigningStart(decode(event, data)?)
            }
            e if e == signing_proposal::EVENT_CONFIRM_SIGNING.as_str()
                || e == signing_proposal::EVENT_DECLINE_SIGNING.as_str() =>
            {
                FsmRequest::SigningConfirm(decode(event, data)?)
            }
            e if e == signing_proposal::EVENT_SIGNING_PARTIAL_SIGN_RECEIVED.as_str() => {
                FsmRequest::SigningPartialSign(decode(event, data)?)
            }
            e if e == dkg_proposal::EVENT_DKG_INIT_PROCESS.as_str()
                || e == signing_proposal::EVENT_SIGNING_INIT.as_str()
                || e == signing_proposal::EVENT_SIGNING_RESTART.as_str() =>
            {
                FsmRequest::Default(decode(event, data)?)
            }
            other => return Err(FsmError::UnknownEvent(other.to_owned())),
        };
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_message_maps_confirmation_events() {
        let data = serde_json::to_vec(&SignatureProposalParticipantRequest {
            participant_id: 1,
            dkg_pub_key: vec![7; 96],
            created_at: Utc::now(),
        })
        .unwrap();

        let request = FsmRequest::from_message(
            signature_proposal::EVENT_CONFIRM_PROPOSAL.as_str(),
            &data,
        )
        .unwrap();
        assert!(matches!(
            request,
            FsmRequest::ProposalConfirm(ref r) if r.participant_id == 1
        ));
    }

    #[test]
    fn test_from_message_rejects_unknown_event() {
        let err = FsmRequest::from_message("event_that_does_not_exist", b"{}").unwrap_err();
        assert!(matches!(err, FsmError::UnknownEvent(_)));
    }

    #[test]
    fn test_from_message_rejects_malformed_payload() {
        let err = FsmRequest::from_message(
            dkg_proposal::EVENT_DKG_COMMIT_CONFIRMATION_RECEIVED.as_str(),
            b"not json",
        )
        .unwrap_err();
        assert!(matches!(err, FsmError::InvalidRequest(_)));
    }
}
