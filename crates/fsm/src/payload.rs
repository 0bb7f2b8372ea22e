//! Per-round machine payload: the three confirmation blocks and their
//! quorums.
//!
//! Quorums are index-keyed `BTreeMap`s. Insertion order is fixed when the
//! proposal is collected and the ordered keys make snapshot serialization
//! deterministic on every node.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FsmError;

// =========================
// SIGNATURE PROPOSAL
// =========================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureProposalStatus {
    AwaitConfirmation,
    Confirmed,
    Declined,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureProposalParticipant {
    pub addr: String,
    /// Ed25519 public key used to authenticate this participant's messages.
    pub pub_key: Vec<u8>,
    /// Pairing-suite public key, delivered with the participation
    /// confirmation from the air-gapped machine.
    #[serde(default)]
    pub dkg_pub_key: Vec<u8>,
    pub status: SignatureProposalStatus,
    pub threshold: u32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureConfirmation {
    pub quorum: BTreeMap<u32, SignatureProposalParticipant>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SignatureConfirmation {
    pub fn is_expired(&self) -> bool {
        self.expires_at < self.updated_at
    }

    pub fn all_confirmed(&self) -> bool {
        self.quorum
            .values()
            .all(|p| p.status == SignatureProposalStatus::Confirmed)
    }
}

// =========================
// DKG PROPOSAL
// =========================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DkgParticipantStatus {
    PubKeyAwaitConfirmation,
    PubKeyConfirmed,
    CommitAwaitConfirmation,
    CommitConfirmed,
    DealAwaitConfirmation,
    DealConfirmed,
    ResponseAwaitConfirmation,
    ResponseConfirmed,
    MasterKeyAwaitConfirmation,
    MasterKeyConfirmed,
    ConfirmationError,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgProposalParticipant {
    pub addr: String,
    #[serde(default)]
    pub dkg_pub_key: Vec<u8>,
    #[serde(default)]
    pub commit: Vec<u8>,
    #[serde(default)]
    pub deal: Vec<u8>,
    #[serde(default)]
    pub response: Vec<u8>,
    #[serde(default)]
    pub master_key: Vec<u8>,
    pub status: DkgParticipantStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgConfirmation {
    pub quorum: BTreeMap<u32, DkgProposalParticipant>,
    pub threshold: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DkgConfirmation {
    pub fn is_expired(&self) -> bool {
        self.expires_at < self.updated_at
    }

    pub fn all_in_status(&self, status: DkgParticipantStatus) -> bool {
        self.quorum.values().all(|p| p.status == status)
    }

    pub fn set_all_statuses(&mut self, status: DkgParticipantStatus) {
        for participant in self.quorum.values_mut() {
            participant.status = status;
        }
    }
}

// =========================
// SIGNING PROPOSAL
// =========================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningParticipantStatus {
    AwaitConfirmation,
    Confirmed,
    Declined,
    AwaitPartialSign,
    PartialSignConfirmed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningProposalParticipant {
    pub addr: String,
    pub status: SigningParticipantStatus,
    #[serde(default)]
    pub partial_sign: Vec<u8>,
    #[serde(default)]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningConfirmation {
    pub signing_id: String,
    pub initiator_id: u32,
    /// Signing threshold carried over from the DKG: this many partial signs
    /// complete the session.
    pub threshold: u32,
    #[serde(default)]
    pub src_payload: Vec<u8>,
    pub quorum: BTreeMap<u32, SigningProposalParticipant>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SigningConfirmation {
    pub fn is_expired(&self) -> bool {
        self.expires_at < self.updated_at
    }

    pub fn all_in_status(&self, status: SigningParticipantStatus) -> bool {
        self.quorum.values().all(|p| p.status == status)
    }

    pub fn count_in_status(&self, status: SigningParticipantStatus) -> usize {
        self.quorum.values().filter(|p| p.status == status).count()
    }
}

// =========================
// ROUND PAYLOAD
// =========================

/// The dumped machine state for one DKG round: everything the three
/// sub-machines accumulated, serialized as one tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundPayload {
    pub dkg_round_id: String,
    #[serde(default)]
    pub signature_proposal: Option<SignatureConfirmation>,
    #[serde(default)]
    pub dkg_proposal: Option<DkgConfirmation>,
    #[serde(default)]
    pub signing_proposal: Option<SigningConfirmation>,
}

impl RoundPayload {
    pub fn new(dkg_round_id: impl Into<String>) -> Self {
        Self {
            dkg_round_id: dkg_round_id.into(),
            signature_proposal: None,
            dkg_proposal: None,
            signing_proposal: None,
        }
    }

    pub fn signature_proposal(&self) -> Result<&SignatureConfirmation, FsmError> {
        self.signature_proposal
            .as_ref()
            .ok_or(FsmError::PhaseNotInitialized("signature proposal"))
    }

    pub fn signature_proposal_mut(&mut self) -> Result<&mut SignatureConfirmation, FsmError> {
        self.signature_proposal
            .as_mut()
            .ok_or(FsmError::PhaseNotInitialized("signature proposal"))
    }

    pub fn dkg_proposal(&self) -> Result<&DkgConfirmation, FsmError> {
        self.dkg_proposal
            .as_ref()
            .ok_or(FsmError::PhaseNotInitialized("DKG proposal"))
    }

    pub fn dkg_proposal_mut(&mut self) -> Result<&mut DkgConfirmation, FsmError> {
        self.dkg_proposal
            .as_mut()
            .ok_or(FsmError::PhaseNotInitialized("DKG proposal"))
    }

    pub fn signing_proposal(&self) -> Result<&SigningConfirmation, FsmError> {
        self.signing_proposal
            .as_ref()
            .ok_or(FsmError::PhaseNotInitialized("signing proposal"))
    }

    pub fn signing_proposal_mut(&mut self) -> Result<&mut SigningConfirmation, FsmError> {
        self.signing_proposal
            .as_mut()
            .ok_or(FsmError::PhaseNotInitialized("signing proposal"))
    }

    /// Ed25519 key of a participant, looked up by address in the signature
    /// proposal quorum. Used by the client to authenticate inbound messages.
    pub fn pub_key_by_addr(&self, addr: &str) -> Option<&[u8]> {
        self.signature_proposal
            .as_ref()?
            .quorum
            .values()
            .find(|p| p.addr == addr)
            .map(|p| p.pub_key.as_slice())
    }
}
