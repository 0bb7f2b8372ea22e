//! The air-gapped machine.
//!
//! Consumes operations from the online node, performs the cryptographic step
//! each one stands for, and returns the messages to broadcast. The machine
//! never touches the network: operations arrive and leave through an
//! out-of-band transport.
//!
//! Every accepted operation is appended to the per-round operation log
//! before its result leaves the machine, and the per-round randomness is
//! derived from the persisted base seed, so replaying the log after a crash
//! rebuilds the in-memory DKG session, secret share included, without the
//! share ever being persisted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bls12_381::{G1Affine, G2Affine, G2Projective, Scalar};
use ff::Field;
use group::Curve;
use hkdf::Hkdf;
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use coldsign_dkg::session::DealResponse;
use coldsign_dkg::{partial_sign, recover_signature, verify_signature, Deal, DkgError, DkgSession};
use coldsign_fsm::requests::{
    DkgProposalCommitConfirmationRequest, DkgProposalConfirmationErrorRequest,
    DkgProposalDealConfirmationRequest, DkgProposalMasterKeyConfirmationRequest,
    DkgProposalResponseConfirmationRequest, SignatureProposalParticipantRequest,
    SigningProposalParticipantRequest, SigningProposalPartialSignRequest,
};
use coldsign_fsm::responses::{
    DkgProposalCommitsParticipantResponse, DkgProposalDealsParticipantResponse,
    DkgProposalPubKeysParticipantResponse, DkgProposalResponsesParticipantResponse,
    SignatureProposalParticipantInvitationsResponse,
    SigningPartialSignsParticipantInvitationsResponse, SigningProcessParticipantResponse,
    SigningProposalParticipantInvitationsResponse,
};
use coldsign_fsm::{dkg_proposal, signature_proposal, signing_proposal};
use coldsign_types::{
    G2Point, Message, Operation, ReconstructedSignature, SIGNATURE_RECONSTRUCTED,
};

use crate::encryption;
use crate::error::MachineError;
use crate::store::KeyValueStore;

const BASE_SEED_KEY: &[u8] = b"base_seed_key";
const PUB_KEY_KEY: &[u8] = b"public_key";
const PRIVATE_KEY_KEY: &[u8] = b"private_key";
const SALT_KEY: &[u8] = b"salt_key";
const OPERATIONS_LOG_KEY: &[u8] = b"operations_log";

const SEED_SIZE: usize = 32;
const SALT_SIZE: usize = 32;

type RoundOperationLog = BTreeMap<String, Vec<Operation>>;

/// Stateful holder of the suite keypair and the per-round DKG sessions.
pub struct Machine {
    store: Arc<dyn KeyValueStore>,
    encryption_key: Zeroizing<Vec<u8>>,
    participant_addr: String,
    base_seed: [u8; SEED_SIZE],
    pub_key: Option<G2Affine>,
    sec_key: Option<Scalar>,
    sessions: HashMap<String, DkgSession>,
    replaying: bool,
}

impl Machine {
    /// Open the machine over its key store. Loads or generates the base
    /// seed; loads and decrypts the suite keypair if one was saved.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        encryption_key: Vec<u8>,
        participant_addr: impl Into<String>,
    ) -> Result<Self, MachineError> {
        let mut machine = Self {
            store,
            encryption_key: Zeroizing::new(encryption_key),
            participant_addr: participant_addr.into(),
            base_seed: [0u8; SEED_SIZE],
            pub_key: None,
            sec_key: None,
            sessions: HashMap::new(),
            replaying: false,
        };
        machine.load_base_seed()?;
        machine.load_keys()?;
        Ok(machine)
    }

    pub fn participant_addr(&self) -> &str {
        &self.participant_addr
    }

    /// The suite public key, if the keypair was generated already.
    pub fn suite_public_key(&self) -> Option<G2Point> {
        self.pub_key.map(|pk| G2Point(pk.to_compressed()))
    }

    // =========================
    // PERSISTED STATE
    // =========================

    fn load_base_seed(&mut self) -> Result<(), MachineError> {
        match self.store.get(BASE_SEED_KEY)? {
            Some(raw) => {
                self.base_seed = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| MachineError::StoreCorrupt("base seed has wrong length".into()))?;
            }
            None => {
                info!("base seed not initialized, generating a new one");
                OsRng.fill_bytes(&mut self.base_seed);
                self.store.put(BASE_SEED_KEY, &self.base_seed)?;
            }
        }
        Ok(())
    }

    fn load_keys(&mut self) -> Result<(), MachineError> {
        let Some(pub_blob) = self.store.get(PUB_KEY_KEY)? else {
            return Ok(());
        };
        let priv_blob = self
            .store
            .get(PRIVATE_KEY_KEY)?
            .ok_or_else(|| MachineError::StoreCorrupt("public key present without private key".into()))?;
        let salt = self
            .store
            .get(SALT_KEY)?
            .ok_or_else(|| MachineError::StoreCorrupt("public key present without salt".into()))?;

        let pub_raw = encryption::decrypt(&self.encryption_key, &salt, &pub_blob)?;
        let priv_raw = encryption::decrypt(&self.encryption_key, &salt, &priv_blob)?;

        let pub_bytes: [u8; 96] = pub_raw
            .as_slice()
            .try_into()
            .map_err(|_| MachineError::StoreCorrupt("stored public key has wrong length".into()))?;
        let priv_bytes: [u8; 32] = priv_raw
            .as_slice()
            .try_into()
            .map_err(|_| MachineError::StoreCorrupt("stored private key has wrong length".into()))?;

        self.pub_key = Some(
            G2Affine::from_compressed(&pub_bytes)
                .into_option()
                .ok_or_else(|| MachineError::StoreCorrupt("stored public key is not on curve".into()))?,
        );
        self.sec_key = Some(
            Scalar::from_bytes(&priv_bytes)
                .into_option()
                .ok_or_else(|| MachineError::StoreCorrupt("stored private key is not a scalar".into()))?,
        );
        Ok(())
    }

    /// Write the keypair under a freshly sampled salt, all three keys in one
    /// transaction.
    fn save_keys(&self, pub_key: &G2Affine, sec_key: &Scalar) -> Result<(), MachineError> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        let pub_blob = encryption::encrypt(&self.encryption_key, &salt, &pub_key.to_compressed())?;
        let priv_blob = encryption::encrypt(&self.encryption_key, &salt, &sec_key.to_bytes())?;

        let mut tx = self.store.as_ref().open_transaction();
        tx.put(PUB_KEY_KEY, &pub_blob);
        tx.put(PRIVATE_KEY_KEY, &priv_blob);
        tx.put(SALT_KEY, &salt);
        tx.commit()?;
        Ok(())
    }

    /// The suite keypair, generated and persisted on first use, reused for
    /// every subsequent round.
    fn ensure_keypair(&mut self) -> Result<(G2Affine, Scalar), MachineError> {
        if let (Some(pub_key), Some(sec_key)) = (self.pub_key, self.sec_key) {
            return Ok((pub_key, sec_key));
        }

        let sec_key = Scalar::random(&mut OsRng);
        let pub_key = (G2Projective::generator() * sec_key).to_affine();
        self.save_keys(&pub_key, &sec_key)?;
        self.pub_key = Some(pub_key);
        self.sec_key = Some(sec_key);
        info!("generated a new suite keypair");
        Ok((pub_key, sec_key))
    }

    /// Replace the suite keypair. Explicit operator action; the old deals
    /// encrypted to the previous key become undecryptable.
    pub fn rotate_keypair(&mut self) -> Result<G2Point, MachineError> {
        let sec_key = Scalar::random(&mut OsRng);
        let pub_key = (G2Projective::generator() * sec_key).to_affine();
        self.save_keys(&pub_key, &sec_key)?;
        self.pub_key = Some(pub_key);
        self.sec_key = Some(sec_key);
        warn!("suite keypair rotated");
        Ok(G2Point(pub_key.to_compressed()))
    }

    /// Deterministic per-round randomness for the dealing polynomial: the
    /// same base seed and round id always yield the same stream.
    fn round_rng(&self, round_id: &str) -> Result<StdRng, MachineError> {
        let hk = Hkdf::<Sha256>::new(Some(round_id.as_bytes()), &self.base_seed);
        let mut seed = [0u8; 32];
        hk.expand(b"ROUND-POLYNOMIAL", &mut seed)
            .map_err(|_| MachineError::EncryptFailed("round seed derivation failed".into()))?;
        Ok(StdRng::from_seed(seed))
    }

    // =========================
    // OPERATION LOG
    // =========================

    fn load_operation_log(&self) -> Result<RoundOperationLog, MachineError> {
        match self.store.get(OPERATIONS_LOG_KEY)? {
            Some(raw) => serde_json::from_slice(&raw)
                .map_err(|e| MachineError::StoreCorrupt(format!("operations log: {e}"))),
            None => Ok(RoundOperationLog::new()),
        }
    }

    fn append_operation_log(&self, operation: &Operation) -> Result<(), MachineError> {
        let mut log = self.load_operation_log()?;
        log.entry(operation.dkg_identifier.clone())
            .or_default()
            .push(operation.clone());
        self.store.put(OPERATIONS_LOG_KEY, &serde_json::to_vec(&log)?)?;
        Ok(())
    }

    /// The accepted operations of one round, in acceptance order.
    pub fn round_operation_log(&self, round_id: &str) -> Result<Vec<Operation>, MachineError> {
        Ok(self.load_operation_log()?.get(round_id).cloned().unwrap_or_default())
    }

    /// Drop one round's operation log and its in-memory session. After this
    /// the round's share cannot be rebuilt, so the caller decides when a
    /// round is truly complete.
    pub fn drop_round_operation_log(&mut self, round_id: &str) -> Result<(), MachineError> {
        let mut log = self.load_operation_log()?;
        log.remove(round_id);
        self.store.put(OPERATIONS_LOG_KEY, &serde_json::to_vec(&log)?)?;
        self.sessions.remove(round_id);
        info!(round_id, "dropped round operation log");
        Ok(())
    }

    /// Re-execute one round's logged operations to rebuild the session.
    pub fn replay_operations_log(&mut self, round_id: &str) -> Result<(), MachineError> {
        let operations = self.round_operation_log(round_id)?;
        if operations.is_empty() {
            return Ok(());
        }
        info!(round_id, count = operations.len(), "replaying operation log");

        self.replaying = true;
        for operation in &operations {
            if let Err(err) = self.handle_operation(operation) {
                self.replaying = false;
                return Err(err);
            }
        }
        self.replaying = false;
        Ok(())
    }

    // =========================
    // OPERATION HANDLING
    // =========================

    /// Process one operation and return the messages to broadcast. The
    /// operation is appended to the round log before the result leaves.
    pub fn process_operation(&mut self, operation: &Operation) -> Result<Vec<Message>, MachineError> {
        info!(
            operation_id = %operation.id,
            op_type = %operation.op_type,
            round_id = %operation.dkg_identifier,
            "processing operation"
        );
        let messages = self.handle_operation(operation)?;
        self.append_operation_log(operation)?;
        Ok(messages)
    }

    /// Process an operation and return the copy that travels back through
    /// the out-of-band transport, result fields filled in.
    pub fn process(&mut self, operation: &Operation) -> Result<Operation, MachineError> {
        let messages = self.process_operation(operation)?;
        let mut processed = operation.clone();
        processed.result = serde_json::to_vec(&messages)?;
        processed.result_msgs = messages;
        Ok(processed)
    }

    fn handle_operation(&mut self, operation: &Operation) -> Result<Vec<Message>, MachineError> {
        let op_type = operation.op_type.as_str();
        if op_type == signature_proposal::STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS.as_str() {
            self.handle_participation(operation)
        } else if op_type == dkg_proposal::STATE_DKG_COMMITS_AWAIT_CONFIRMATIONS.as_str() {
            self.handle_commits(operation)
        } else if op_type == dkg_proposal::STATE_DKG_DEALS_AWAIT_CONFIRMATIONS.as_str() {
            self.handle_deals(operation)
        } else if op_type == dkg_proposal::STATE_DKG_RESPONSES_AWAIT_CONFIRMATIONS.as_str() {
            self.handle_responses(operation)
        } else if op_type == dkg_proposal::STATE_DKG_MASTER_KEY_AWAIT_CONFIRMATIONS.as_str() {
            self.handle_master_key(operation)
        } else if op_type == signing_proposal::STATE_SIGNING_AWAIT_CONFIRMATIONS.as_str() {
            self.handle_signing_confirmation(operation)
        } else if op_type == signing_proposal::STATE_SIGNING_AWAIT_PARTIAL_SIGNS.as_str() {
            self.handle_partial_sign(operation)
        } else if op_type == signing_proposal::STATE_SIGNING_PARTIAL_SIGNS_COLLECTED.as_str() {
            self.handle_reconstruct(operation)
        } else {
            Err(MachineError::UnsupportedOperation(operation.op_type.clone()))
        }
    }

    /// Confirm participation: make sure the suite keypair exists and attach
    /// its public half to the confirmation.
    fn handle_participation(&mut self, operation: &Operation) -> Result<Vec<Message>, MachineError> {
        let payload: SignatureProposalParticipantInvitationsResponse = decode_payload(operation)?;
        let own = payload
            .participants
            .iter()
            .find(|p| p.addr == self.participant_addr)
            .ok_or_else(|| MachineError::NotInQuorum(self.participant_addr.clone()))?;
        let participant_id = own.participant_id;

        let (pub_key, _) = self.ensure_keypair()?;
        let request = SignatureProposalParticipantRequest {
            participant_id,
            dkg_pub_key: pub_key.to_compressed().to_vec(),
            created_at: operation.created_at,
        };

        Ok(vec![self.result_message(
            operation,
            signature_proposal::EVENT_CONFIRM_PROPOSAL.as_str(),
            serde_json::to_vec(&request)?,
            String::new(),
        )])
    }

    /// Instantiate the round's DKG session and broadcast our commits.
    fn handle_commits(&mut self, operation: &Operation) -> Result<Vec<Message>, MachineError> {
        let payload: DkgProposalPubKeysParticipantResponse = decode_payload(operation)?;
        let own = payload
            .participants
            .iter()
            .find(|p| p.addr == self.participant_addr)
            .ok_or_else(|| MachineError::NotInQuorum(self.participant_addr.clone()))?;
        let participant_id = own.participant_id;

        let mut pubkeys = BTreeMap::new();
        for entry in &payload.participants {
            pubkeys.insert(entry.participant_id, decode_g2(&entry.dkg_pub_key)?);
        }

        let (_, sec_key) = self.ensure_keypair()?;
        let mut session = DkgSession::new(
            operation.dkg_identifier.clone(),
            participant_id,
            payload.threshold,
            pubkeys,
            sec_key,
        );
        let mut rng = self.round_rng(&operation.dkg_identifier)?;
        let commits = session.generate_commits(&mut rng);
        self.sessions.insert(operation.dkg_identifier.clone(), session);

        let request = DkgProposalCommitConfirmationRequest {
            participant_id,
            commit: serde_json::to_vec(&commits)?,
            created_at: operation.created_at,
        };

        Ok(vec![self.result_message(
            operation,
            dkg_proposal::EVENT_DKG_COMMIT_CONFIRMATION_RECEIVED.as_str(),
            serde_json::to_vec(&request)?,
            String::new(),
        )])
    }

    /// Store the quorum's commits and deal an encrypted share to every
    /// participant, self included.
    fn handle_deals(&mut self, operation: &Operation) -> Result<Vec<Message>, MachineError> {
        let payload: DkgProposalCommitsParticipantResponse = decode_payload(operation)?;

        let (participant_id, deals) = {
            let session = self.session_mut(&operation.dkg_identifier)?;
            for entry in &payload.participants {
                let commits: Vec<G2Point> = serde_json::from_slice(&entry.commit)
                    .map_err(|e| MachineError::MalformedPayload(format!("commits: {e}")))?;
                session.store_commits(entry.participant_id, commits)?;
            }
            (session.participant_index(), session.make_deals(&mut OsRng)?)
        };

        let mut messages = Vec::with_capacity(deals.len());
        for (recipient, deal) in deals {
            let addr = payload
                .participants
                .iter()
                .find(|p| p.participant_id == recipient)
                .map(|p| p.addr.clone())
                .ok_or_else(|| {
                    MachineError::MalformedPayload(format!("no address for participant {recipient}"))
                })?;
            let request = DkgProposalDealConfirmationRequest {
                participant_id,
                deal: serde_json::to_vec(&deal)?,
                created_at: operation.created_at,
            };
            messages.push(self.result_message(
                operation,
                dkg_proposal::EVENT_DKG_DEAL_CONFIRMATION_RECEIVED.as_str(),
                serde_json::to_vec(&request)?,
                addr,
            ));
        }
        Ok(messages)
    }

    /// Verify the deals addressed to this node and respond. A deal whose
    /// embedded commitments differ from the dealer's broadcast commits is
    /// reported as a per-deal error instead of a response.
    fn handle_responses(&mut self, operation: &Operation) -> Result<Vec<Message>, MachineError> {
        let payload: DkgProposalDealsParticipantResponse = decode_payload(operation)?;

        let (participant_id, responses, failures) = {
            let session = self.session_mut(&operation.dkg_identifier)?;
            let mut responses: Vec<DealResponse> = Vec::new();
            let mut failures: Vec<(u32, String)> = Vec::new();
            for entry in &payload.participants {
                let deal: Deal = serde_json::from_slice(&entry.deal)
                    .map_err(|e| MachineError::MalformedPayload(format!("deal: {e}")))?;
                match session.process_deal(&deal) {
                    Ok(response) => responses.push(response),
                    Err(err @ (DkgError::CommitMismatch(_)
                    | DkgError::DecryptFailed(_)
                    | DkgError::InvalidShare(_)
                    | DkgError::InvalidG2Point
                    | DkgError::InvalidScalar
                    | DkgError::WrongRecipient { .. })) => {
                        warn!(dealer = entry.participant_id, error = %err, "deal rejected");
                        failures.push((entry.participant_id, err.to_string()));
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            (session.participant_index(), responses, failures)
        };

        if !failures.is_empty() {
            let mut messages = Vec::with_capacity(failures.len());
            for (dealer, error) in failures {
                let request = DkgProposalConfirmationErrorRequest {
                    participant_id: dealer,
                    error,
                    created_at: operation.created_at,
                };
                messages.push(self.result_message(
                    operation,
                    dkg_proposal::EVENT_DKG_DEAL_CONFIRMATION_ERROR.as_str(),
                    serde_json::to_vec(&request)?,
                    String::new(),
                ));
            }
            return Ok(messages);
        }

        let request = DkgProposalResponseConfirmationRequest {
            participant_id,
            response: serde_json::to_vec(&responses)?,
            created_at: operation.created_at,
        };
        Ok(vec![self.result_message(
            operation,
            dkg_proposal::EVENT_DKG_RESPONSE_CONFIRMATION_RECEIVED.as_str(),
            serde_json::to_vec(&request)?,
            String::new(),
        )])
    }

    /// Check everyone's responses, finalize the distributed share, and
    /// broadcast the derived master public key.
    fn handle_master_key(&mut self, operation: &Operation) -> Result<Vec<Message>, MachineError> {
        let payload: DkgProposalResponsesParticipantResponse = decode_payload(operation)?;

        let (participant_id, master_key) = {
            let session = self.session_mut(&operation.dkg_identifier)?;
            for entry in &payload.participants {
                let responses: Vec<DealResponse> = serde_json::from_slice(&entry.response)
                    .map_err(|e| MachineError::MalformedPayload(format!("responses: {e}")))?;
                session.process_responses(&responses)?;
            }
            let share = session.finalize()?;
            (share.index, share.master_public_key.clone())
        };

        let request = DkgProposalMasterKeyConfirmationRequest {
            participant_id,
            master_key: master_key.0.to_vec(),
            created_at: operation.created_at,
        };
        Ok(vec![self.result_message(
            operation,
            dkg_proposal::EVENT_DKG_MASTER_KEY_CONFIRMATION_RECEIVED.as_str(),
            serde_json::to_vec(&request)?,
            String::new(),
        )])
    }

    /// Confirm participation in a signing session.
    fn handle_signing_confirmation(
        &mut self,
        operation: &Operation,
    ) -> Result<Vec<Message>, MachineError> {
        let payload: SigningProposalParticipantInvitationsResponse = decode_payload(operation)?;
        let own = payload
            .participants
            .iter()
            .find(|p| p.addr == self.participant_addr)
            .ok_or_else(|| MachineError::NotInQuorum(self.participant_addr.clone()))?;

        let request = SigningProposalParticipantRequest {
            signing_id: payload.signing_id.clone(),
            participant_id: own.participant_id,
            created_at: operation.created_at,
        };
        Ok(vec![self.result_message(
            operation,
            signing_proposal::EVENT_CONFIRM_SIGNING.as_str(),
            serde_json::to_vec(&request)?,
            String::new(),
        )])
    }

    /// Sign the session payload with this node's share.
    fn handle_partial_sign(&mut self, operation: &Operation) -> Result<Vec<Message>, MachineError> {
        let payload: SigningPartialSignsParticipantInvitationsResponse = decode_payload(operation)?;

        let share = {
            let session = self.session_mut(&operation.dkg_identifier)?;
            session.finalize()?.clone()
        };
        let signature = partial_sign(&share.share, &payload.src_payload);

        let request = SigningProposalPartialSignRequest {
            signing_id: payload.signing_id.clone(),
            participant_id: share.index,
            partial_sign: signature.to_compressed().to_vec(),
            created_at: operation.created_at,
        };
        Ok(vec![self.result_message(
            operation,
            signing_proposal::EVENT_SIGNING_PARTIAL_SIGN_RECEIVED.as_str(),
            serde_json::to_vec(&request)?,
            String::new(),
        )])
    }

    /// Initiator only: recover the group signature from the collected
    /// partial signs and verify it against the master public key.
    fn handle_reconstruct(&mut self, operation: &Operation) -> Result<Vec<Message>, MachineError> {
        let payload: SigningProcessParticipantResponse = decode_payload(operation)?;

        let (threshold, master_key) = {
            let session = self.session_mut(&operation.dkg_identifier)?;
            let threshold = session.threshold();
            let share = session.finalize()?;
            (threshold, share.master_public_key.clone())
        };

        // Participants that never signed ride along with an empty share.
        let mut partials: Vec<(u32, G1Affine)> = Vec::with_capacity(payload.participants.len());
        for entry in &payload.participants {
            if entry.partial_sign.is_empty() {
                continue;
            }
            partials.push((entry.participant_id, decode_g1(&entry.partial_sign)?));
        }

        let signature = recover_signature(&partials, threshold as usize)?;
        let master_pub = decode_g2(&master_key.0)?;
        if !verify_signature(&master_pub, &payload.src_payload, &signature) {
            return Err(DkgError::InvalidRecoveredSignature.into());
        }
        info!(signing_id = %payload.signing_id, "signature reconstructed and verified");

        let record = ReconstructedSignature {
            signing_id: payload.signing_id.clone(),
            src_payload: payload.src_payload.clone(),
            signature: signature.to_compressed().to_vec(),
            username: String::new(),
            dkg_round_id: String::new(),
        };
        Ok(vec![self.result_message(
            operation,
            SIGNATURE_RECONSTRUCTED,
            serde_json::to_vec(&record)?,
            String::new(),
        )])
    }

    // =========================
    // HELPERS
    // =========================

    fn session_mut(&mut self, round_id: &str) -> Result<&mut DkgSession, MachineError> {
        if !self.sessions.contains_key(round_id) && !self.replaying {
            self.replay_operations_log(round_id)?;
        }
        self.sessions
            .get_mut(round_id)
            .ok_or_else(|| MachineError::MissingSession(round_id.to_owned()))
    }

    fn result_message(
        &self,
        operation: &Operation,
        event: &str,
        data: Vec<u8>,
        recipient_addr: String,
    ) -> Message {
        Message {
            id: Uuid::new_v4().to_string(),
            dkg_round_id: operation.dkg_identifier.clone(),
            offset: 0,
            event: event.to_owned(),
            data,
            signature: Vec::new(),
            sender_addr: self.participant_addr.clone(),
            recipient_addr,
        }
    }
}

fn decode_payload<T: DeserializeOwned>(operation: &Operation) -> Result<T, MachineError> {
    serde_json::from_slice(&operation.payload)
        .map_err(|e| MachineError::MalformedPayload(format!("{}: {e}", operation.op_type)))
}

fn decode_g2(bytes: &[u8]) -> Result<G2Affine, MachineError> {
    let raw: [u8; 96] = bytes
        .try_into()
        .map_err(|_| MachineError::MalformedPayload("G2 point has wrong length".into()))?;
    G2Affine::from_compressed(&raw)
        .into_option()
        .ok_or_else(|| MachineError::MalformedPayload("invalid G2 point".into()))
}

fn decode_g1(bytes: &[u8]) -> Result<G1Affine, MachineError> {
    let raw: [u8; 48] = bytes
        .try_into()
        .map_err(|_| MachineError::MalformedPayload("G1 point has wrong length".into()))?;
    G1Affine::from_compressed(&raw)
        .into_option()
        .ok_or_else(|| MachineError::MalformedPayload("invalid G1 point".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKeyValueStore;
    use chrono::Utc;
    use coldsign_fsm::responses::{
        DkgProposalPubKeysEntry, SignatureProposalInvitationEntry,
    };

    const ENCRYPTION_KEY: [u8; 32] = [0x42; 32];

    fn machine_over(store: Arc<dyn KeyValueStore>) -> Machine {
        Machine::new(store, ENCRYPTION_KEY.to_vec(), "node-0").unwrap()
    }

    fn participation_operation() -> Operation {
        let payload = SignatureProposalParticipantInvitationsResponse {
            participants: vec![
                SignatureProposalInvitationEntry {
                    participant_id: 0,
                    addr: "node-0".into(),
                    threshold: 2,
                },
                SignatureProposalInvitationEntry {
                    participant_id: 1,
                    addr: "node-1".into(),
                    threshold: 2,
                },
            ],
        };
        Operation::new(
            signature_proposal::STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS.as_str(),
            serde_json::to_vec(&payload).unwrap(),
            "round-1",
            Utc::now(),
        )
    }

    fn commits_operation(own_pub: &[u8]) -> Operation {
        let other = (G2Projective::generator() * Scalar::from(7u64)).to_affine();
        let payload = DkgProposalPubKeysParticipantResponse {
            participants: vec![
                DkgProposalPubKeysEntry {
                    participant_id: 0,
                    addr: "node-0".into(),
                    dkg_pub_key: own_pub.to_vec(),
                },
                DkgProposalPubKeysEntry {
                    participant_id: 1,
                    addr: "node-1".into(),
                    dkg_pub_key: other.to_compressed().to_vec(),
                },
            ],
            threshold: 2,
        };
        Operation::new(
            dkg_proposal::STATE_DKG_COMMITS_AWAIT_CONFIRMATIONS.as_str(),
            serde_json::to_vec(&payload).unwrap(),
            "round-1",
            Utc::now(),
        )
    }

    #[test]
    fn test_keypair_is_generated_once_and_persisted_encrypted() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());

        let mut machine = machine_over(store.clone());
        assert!(machine.suite_public_key().is_none());

        let messages = machine.process_operation(&participation_operation()).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].event,
            signature_proposal::EVENT_CONFIRM_PROPOSAL.as_str()
        );
        let pub_key = machine.suite_public_key().unwrap();

        // The keypair reloads across restarts.
        let reopened = machine_over(store.clone());
        assert_eq!(reopened.suite_public_key().unwrap(), pub_key);

        // The stored blob is ciphertext, not the raw point.
        let raw = store.get(PUB_KEY_KEY).unwrap().unwrap();
        assert_ne!(raw, pub_key.0.to_vec());
    }

    #[test]
    fn test_wrong_encryption_key_fails_to_open() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        let mut machine = machine_over(store.clone());
        machine.process_operation(&participation_operation()).unwrap();

        let result = Machine::new(store, vec![0x43; 32], "node-0");
        assert!(matches!(result, Err(MachineError::DecryptFailed(_))));
    }

    #[test]
    fn test_node_outside_the_quorum_is_rejected() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        let mut machine =
            Machine::new(store, ENCRYPTION_KEY.to_vec(), "stranger").unwrap();

        let err = machine.process_operation(&participation_operation()).unwrap_err();
        assert!(matches!(err, MachineError::NotInQuorum(_)));
    }

    #[test]
    fn test_commits_are_deterministic_per_round() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());

        let mut machine = machine_over(store.clone());
        machine.process_operation(&participation_operation()).unwrap();
        let own_pub = machine.suite_public_key().unwrap().0.to_vec();

        let operation = commits_operation(&own_pub);
        let first = machine.process_operation(&operation).unwrap();

        // A machine rebuilt over the same store derives the same polynomial
        // for the same round, so the commit broadcast is identical.
        let mut rebuilt = machine_over(store);
        let second = rebuilt.process_operation(&operation).unwrap();
        assert_eq!(first[0].data, second[0].data);
    }

    #[test]
    fn test_operation_log_appends_and_drops() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        let mut machine = machine_over(store);

        assert!(machine.round_operation_log("round-1").unwrap().is_empty());

        let operation = participation_operation();
        machine.process_operation(&operation).unwrap();
        let logged = machine.round_operation_log("round-1").unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].id, operation.id);

        machine.drop_round_operation_log("round-1").unwrap();
        assert!(machine.round_operation_log("round-1").unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_operation_type_is_rejected() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        let mut machine = machine_over(store);

        let operation = Operation::new("state_that_never_existed", vec![], "round-1", Utc::now());
        let err = machine.process_operation(&operation).unwrap_err();
        assert!(matches!(err, MachineError::UnsupportedOperation(_)));
    }
}
