//! Typed event responses.
//!
//! When a machine enters a state that awaits this node's cryptographic
//! contribution, the response data becomes the payload of an operation for
//! the air-gapped machine. The variants make the "downcast by response kind"
//! checks in the client explicit.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureProposalInvitationEntry {
    pub participant_id: u32,
    pub addr: String,
    pub threshold: u32,
}

/// Roster sent to every participant for participation confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureProposalParticipantInvitationsResponse {
    pub participants: Vec<SignatureProposalInvitationEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgProposalPubKeysEntry {
    pub participant_id: u32,
    pub addr: String,
    pub dkg_pub_key: Vec<u8>,
}

/// Full pub-key roster plus threshold; the air-gapped machine instantiates
/// its DKG session from this.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgProposalPubKeysParticipantResponse {
    pub participants: Vec<DkgProposalPubKeysEntry>,
    pub threshold: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgProposalCommitsEntry {
    pub participant_id: u32,
    pub addr: String,
    pub commit: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgProposalCommitsParticipantResponse {
    pub participants: Vec<DkgProposalCommitsEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgProposalDealsEntry {
    pub participant_id: u32,
    pub addr: String,
    pub deal: Vec<u8>,
}

/// The deals addressed to this node, one per dealer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgProposalDealsParticipantResponse {
    pub participants: Vec<DkgProposalDealsEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgProposalResponsesEntry {
    pub participant_id: u32,
    pub addr: String,
    pub response: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgProposalResponsesParticipantResponse {
    pub participants: Vec<DkgProposalResponsesEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningProposalEntry {
    pub participant_id: u32,
    pub addr: String,
}

/// Invitation to confirm participation in a signing session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningProposalParticipantInvitationsResponse {
    pub signing_id: String,
    pub initiator_id: u32,
    pub src_payload: Vec<u8>,
    pub participants: Vec<SigningProposalEntry>,
}

/// Request for partial signatures over the session payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningPartialSignsParticipantInvitationsResponse {
    pub signing_id: String,
    pub initiator_id: u32,
    pub src_payload: Vec<u8>,
    pub participants: Vec<SigningProposalEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningProcessEntry {
    pub participant_id: u32,
    pub addr: String,
    pub partial_sign: Vec<u8>,
}

/// Everything the initiator needs to recover the full signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningProcessParticipantResponse {
    pub signing_id: String,
    pub initiator_id: u32,
    pub src_payload: Vec<u8>,
    pub participants: Vec<SigningProcessEntry>,
}

/// Tagged union over every response kind a callback can produce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FsmResponseData {
    SigProposalInvitations(SignatureProposalParticipantInvitationsResponse),
    DkgPubKeys(DkgProposalPubKeysParticipantResponse),
    DkgCommits(DkgProposalCommitsParticipantResponse),
    DkgDeals(DkgProposalDealsParticipantResponse),
    DkgResponses(DkgProposalResponsesParticipantResponse),
    SigningInvitations(SigningProposalParticipantInvitationsResponse),
    SigningPartialSigns(SigningPartialSignsParticipantInvitationsResponse),
    SigningProcess(SigningProcessParticipantResponse),
}

impl FsmResponseData {
    /// JSON of the inner response; this is the operation payload byte-for-byte,
    /// so the air-gapped machine decodes the concrete shape by operation type.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            FsmResponseData::SigProposalInvitations(r) => serde_json::to_vec(r),
            FsmResponseData::DkgPubKeys(r) => serde_json::to_vec(r),
            FsmResponseData::DkgCommits(r) => serde_json::to_vec(r),
            FsmResponseData::DkgDeals(r) => serde_json::to_vec(r),
            FsmResponseData::DkgResponses(r) => serde_json::to_vec(r),
            FsmResponseData::SigningInvitations(r) => serde_json::to_vec(r),
            FsmResponseData::SigningPartialSigns(r) => serde_json::to_vec(r),
            FsmResponseData::SigningProcess(r) => serde_json::to_vec(r),
        }
    }
}
