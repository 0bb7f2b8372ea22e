//! The online node.
//!
//! Polls the broadcast log, authenticates each message against the round's
//! quorum, drives the per-round state machines, materializes operations for
//! the air-gapped machine, and re-broadcasts signed results. Every transition
//! is a pure function of the log, so replaying from an earlier offset after a
//! crash reproduces the same snapshots.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use coldsign_fsm::requests::{DefaultRequest, SigningProposalStartRequest};
use coldsign_fsm::{
    dkg_proposal, resolve_event, signature_proposal, signing_proposal, FsmError, FsmInstance,
    FsmRequest, FsmResponse, FsmResponseData, State as FsmState, GLOBAL_IDLE,
};
use coldsign_storage::LogStorage;
use coldsign_types::{
    dkg_round_id, Message, Operation, ReconstructedSignature, SIGNATURE_RECONSTRUCTED,
};

use crate::error::ClientError;
use crate::keystore::{verify_signature, KeyPair, KeyStore};
use crate::state::State;

/// How often the worker polls the log.
pub const POLLING_PERIOD: Duration = Duration::from_secs(1);

/// The states that await this node's cryptographic contribution; entering
/// one with response data materializes an operation.
const OPERATION_STATES: [FsmState; 8] = [
    signature_proposal::STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS,
    dkg_proposal::STATE_DKG_COMMITS_AWAIT_CONFIRMATIONS,
    dkg_proposal::STATE_DKG_DEALS_AWAIT_CONFIRMATIONS,
    dkg_proposal::STATE_DKG_RESPONSES_AWAIT_CONFIRMATIONS,
    dkg_proposal::STATE_DKG_MASTER_KEY_AWAIT_CONFIRMATIONS,
    signing_proposal::STATE_SIGNING_AWAIT_CONFIRMATIONS,
    signing_proposal::STATE_SIGNING_AWAIT_PARTIAL_SIGNS,
    signing_proposal::STATE_SIGNING_PARTIAL_SIGNS_COLLECTED,
];

/// One participant's online node.
pub struct Client {
    username: String,
    keypair: KeyPair,
    state: Box<dyn State>,
    storage: Box<dyn LogStorage>,
}

impl Client {
    pub fn new(
        username: impl Into<String>,
        keystore: &dyn KeyStore,
        state: Box<dyn State>,
        storage: Box<dyn LogStorage>,
    ) -> Result<Self, ClientError> {
        let username = username.into();
        let keypair = keystore.load_keys(&username)?;
        Ok(Self { username, keypair, state, storage })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_bytes()
    }

    // =========================
    // POLL LOOP
    // =========================

    /// One poll tick: fetch everything past the stored offset and process
    /// the messages addressed to this node in log order.
    pub fn poll_once(&self) -> Result<(), ClientError> {
        let offset = self.state.load_offset()?;
        let messages = self.storage.get_messages(offset)?;

        for message in messages {
            if !message.addressed_to(&self.username) {
                continue;
            }
            debug!(offset = message.offset, event = %message.event, "handling message");
            self.process_message(message)?;
        }
        Ok(())
    }

    /// Process one log message. Byzantine input (bad signatures, unknown
    /// participants, events in the wrong state) is logged and skipped with
    /// the offset advanced; only local-state corruption propagates.
    pub fn process_message(&self, message: Message) -> Result<(), ClientError> {
        match self.apply_message(&message) {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(
                    offset = message.offset,
                    event = %message.event,
                    sender = %message.sender_addr,
                    error = %err,
                    "message dropped"
                );
                self.state.save_offset(message.offset + 1)?;
                Ok(())
            }
        }
    }

    fn apply_message(&self, message: &Message) -> Result<(), ClientError> {
        // Reconstructed signatures are stored by every node and never enter
        // a state machine.
        if message.event == SIGNATURE_RECONSTRUCTED {
            self.process_signature(message)?;
            self.state.save_offset(message.offset + 1)?;
            return Ok(());
        }
        // Signing-start payloads are stored alongside signatures so pending
        // signing data is inspectable before reconstruction.
        if message.event == signing_proposal::EVENT_SIGNING_START.as_str() {
            self.process_signature(message)?;
        }

        let event = resolve_event(&message.event)
            .ok_or_else(|| FsmError::UnknownEvent(message.event.clone()))?;
        let is_init = event == signature_proposal::EVENT_INIT_PROPOSAL;

        let mut fsm = match self.state.load_fsm(&message.dkg_round_id)? {
            Some(dump) => FsmInstance::from_dump(&dump)?,
            None if is_init => {
                let fsm = FsmInstance::create(&message.dkg_round_id);
                self.state.save_fsm(&message.dkg_round_id, &fsm.dump()?)?;
                fsm
            }
            // Only an init proposal may open a round; anything else would
            // materialize an empty snapshot and then fail anyway.
            None => {
                return Err(FsmError::InvalidTransition {
                    event: message.event.clone(),
                    state: GLOBAL_IDLE.as_str().to_owned(),
                }
                .into())
            }
        };

        // The init proposal is unauthenticated: the quorum's keys are not
        // known before it.
        if !is_init {
            self.verify_message(&fsm, message)?;
        }

        let request = FsmRequest::from_message(&message.event, &message.data)?;
        let created_at = request.created_at();
        let mut response = fsm.do_event(event, &request)?;
        info!(
            event = %message.event,
            sender = %message.sender_addr,
            state = %response.state,
            "message done"
        );

        // Hand off between the chained machines.
        if response.state == signature_proposal::STATE_SIGNATURE_PROPOSAL_COLLECTED {
            response = fsm.do_event(
                dkg_proposal::EVENT_DKG_INIT_PROCESS,
                &FsmRequest::Default(DefaultRequest { created_at }),
            )?;
        }
        if response.state == dkg_proposal::STATE_DKG_MASTER_KEY_COLLECTED {
            response = fsm.do_event(
                signing_proposal::EVENT_SIGNING_INIT,
                &FsmRequest::Default(DefaultRequest { created_at }),
            )?;
        }

        let operation = self.build_operation(&response, &message.dkg_round_id, created_at)?;

        if response.state == signing_proposal::STATE_SIGNING_PARTIAL_SIGNS_COLLECTED {
            fsm.do_event(
                signing_proposal::EVENT_SIGNING_RESTART,
                &FsmRequest::Default(DefaultRequest { created_at }),
            )?;
        }

        if let Some(operation) = operation {
            info!(operation_id = %operation.id, op_type = %operation.op_type, "operation created");
            self.state.put_operation(&operation)?;
        }
        self.state.save_offset(message.offset + 1)?;
        self.state.save_fsm(&message.dkg_round_id, &fsm.dump()?)?;
        Ok(())
    }

    fn build_operation(
        &self,
        response: &FsmResponse,
        dkg_round_id: &str,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<Operation>, ClientError> {
        if !OPERATION_STATES.contains(&response.state) {
            debug!(state = %response.state, "state does not require an operation");
            return Ok(None);
        }
        let Some(data) = &response.data else {
            return Ok(None);
        };

        match data {
            // The signing initiator does not confirm its own proposal.
            FsmResponseData::SigningInvitations(invitations) => {
                let initiator = invitations
                    .participants
                    .iter()
                    .find(|p| p.participant_id == invitations.initiator_id);
                if initiator.map(|p| p.addr.as_str()) == Some(self.username.as_str()) {
                    return Ok(None);
                }
            }
            // Only the initiator reconstructs the full signature.
            FsmResponseData::SigningProcess(process) => {
                let initiator = process
                    .participants
                    .iter()
                    .find(|p| p.participant_id == process.initiator_id);
                if initiator.map(|p| p.addr.as_str()) != Some(self.username.as_str()) {
                    return Ok(None);
                }
            }
            _ => {}
        }

        Ok(Some(Operation::new(
            response.state.as_str(),
            data.to_json()?,
            dkg_round_id,
            created_at,
        )))
    }

    fn verify_message(&self, fsm: &FsmInstance, message: &Message) -> Result<(), ClientError> {
        let pub_key = fsm
            .pub_key_by_addr(&message.sender_addr)
            .ok_or_else(|| ClientError::UnknownSender(message.sender_addr.clone()))?;

        // The log assigns the offset only after the author signed, so the
        // canonical form is recomputed at its pre-append value.
        let mut authored = message.clone();
        authored.offset = 0;
        if !verify_signature(pub_key, &authored.bytes(), &message.signature) {
            return Err(ClientError::InvalidSignature(message.sender_addr.clone()));
        }
        Ok(())
    }

    fn process_signature(&self, message: &Message) -> Result<(), ClientError> {
        let mut signature: ReconstructedSignature = serde_json::from_slice(&message.data)?;
        signature.username = message.sender_addr.clone();
        signature.dkg_round_id = message.dkg_round_id.clone();
        self.state.save_signature(signature)
    }

    // =========================
    // OPERATIONS
    // =========================

    /// Intake of an operation processed by the air-gapped machine: check it
    /// against the stored one, sign and broadcast its result messages, and
    /// drop it from the pool.
    pub fn handle_processed_operation(&self, operation: Operation) -> Result<(), ClientError> {
        let stored = self
            .state
            .get_operation(&operation.id)?
            .ok_or_else(|| ClientError::UnknownOperation(operation.id.clone()))?;
        stored.check(&operation)?;

        let mut messages = operation.result_msgs;
        for message in &mut messages {
            message.sender_addr = self.username.clone();
            message.signature = self.keypair.sign(&message.bytes());
        }

        self.storage.send_batch(messages)?;
        self.state.delete_operation(&operation.id)?;
        info!(operation_id = %operation.id, "operation completed and removed from the pool");
        Ok(())
    }

    pub fn operations(&self) -> Result<std::collections::BTreeMap<String, Operation>, ClientError> {
        self.state.operations()
    }

    pub fn operation(&self, operation_id: &str) -> Result<Option<Operation>, ClientError> {
        self.state.get_operation(operation_id)
    }

    pub fn signatures(
        &self,
        dkg_round_id: &str,
    ) -> Result<std::collections::BTreeMap<String, Vec<ReconstructedSignature>>, ClientError> {
        self.state.signatures(dkg_round_id)
    }

    pub fn fsm_dump(&self, dkg_round_id: &str) -> Result<Option<Vec<u8>>, ClientError> {
        self.state.load_fsm(dkg_round_id)
    }

    // =========================
    // OUTBOUND
    // =========================

    /// Author and sign a message for the log.
    pub fn build_message(
        &self,
        dkg_round_id: impl Into<String>,
        event: impl Into<String>,
        data: Vec<u8>,
    ) -> Message {
        let mut message = Message {
            id: Uuid::new_v4().to_string(),
            dkg_round_id: dkg_round_id.into(),
            offset: 0,
            event: event.into(),
            data,
            signature: Vec::new(),
            sender_addr: self.username.clone(),
            recipient_addr: String::new(),
        };
        message.signature = self.keypair.sign(&message.bytes());
        message
    }

    pub fn send_message(&self, message: Message) -> Result<u64, ClientError> {
        Ok(self.storage.send(message)?)
    }

    /// Kick off a new DKG round from an init-proposal body. The round id is
    /// derived from the body, so every node computes the same identifier.
    pub fn start_dkg(&self, body: &[u8]) -> Result<String, ClientError> {
        let round_id = dkg_round_id(body);
        let message = self.build_message(
            round_id.clone(),
            signature_proposal::EVENT_INIT_PROPOSAL.as_str(),
            body.to_vec(),
        );
        self.send_message(message)?;
        info!(round_id = %round_id, "DKG round proposed");
        Ok(round_id)
    }

    /// Propose signing `data` in an established round, with this node as
    /// the initiator.
    pub fn propose_sign_message(
        &self,
        dkg_round_id: &str,
        data: Vec<u8>,
    ) -> Result<String, ClientError> {
        let dump = self
            .state
            .load_fsm(dkg_round_id)?
            .ok_or_else(|| ClientError::UnknownRound(dkg_round_id.to_owned()))?;
        let fsm = FsmInstance::from_dump(&dump)?;

        let participant_id = fsm
            .payload()
            .dkg_proposal
            .as_ref()
            .and_then(|confirmation| {
                confirmation
                    .quorum
                    .iter()
                    .find(|(_, p)| p.addr == self.username)
                    .map(|(index, _)| *index)
            })
            .ok_or_else(|| ClientError::UnknownSender(self.username.clone()))?;

        let signing_id = Uuid::new_v4().to_string();
        let request = SigningProposalStartRequest {
            signing_id: signing_id.clone(),
            participant_id,
            src_payload: data,
            created_at: chrono::Utc::now(),
        };
        let message = self.build_message(
            dkg_round_id,
            signing_proposal::EVENT_SIGNING_START.as_str(),
            serde_json::to_vec(&request)?,
        );
        self.send_message(message)?;
        info!(signing_id = %signing_id, round_id = %dkg_round_id, "signing proposed");
        Ok(signing_id)
    }
}

/// Drive the poll loop until shutdown. The client is shared with the HTTP
/// surface through a single mutex; nothing else may write local state.
pub async fn run_poll_loop(
    client: Arc<Mutex<Client>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ClientError> {
    let mut interval = tokio::time::interval(POLLING_PERIOD);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let result = client.lock().poll_once();
                if let Err(err) = result {
                    if err.is_fatal() {
                        return Err(err);
                    }
                    warn!(error = %err, "poll failed, retrying next tick");
                }
            }
            _ = shutdown.changed() => {
                info!("shutdown signal received, stop polling");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::InMemoryKeyStore;
    use crate::state::InMemoryState;
    use chrono::Utc;
    use coldsign_fsm::requests::{
        SignatureProposalParticipantsEntry, SignatureProposalParticipantsListRequest,
    };
    use coldsign_storage::InMemoryLog;

    fn client_with_keystore(username: &str, keystore: &InMemoryKeyStore, log: InMemoryLog) -> Client {
        Client::new(
            username,
            keystore,
            Box::new(InMemoryState::new()),
            Box::new(log),
        )
        .unwrap()
    }

    fn init_proposal_body(keystore: &InMemoryKeyStore, users: &[&str]) -> Vec<u8> {
        let request = SignatureProposalParticipantsListRequest {
            participants: users
                .iter()
                .map(|user| SignatureProposalParticipantsEntry {
                    addr: (*user).to_owned(),
                    pub_key: keystore.load_keys(user).unwrap().public_bytes().to_vec(),
                    dkg_pub_key: vec![],
                })
                .collect(),
            signing_threshold: 2,
            created_at: Utc::now(),
        };
        serde_json::to_vec(&request).unwrap()
    }

    #[test]
    fn test_init_proposal_creates_fsm_and_operation() {
        let keystore = InMemoryKeyStore::new();
        let log = InMemoryLog::new();
        let client = client_with_keystore("node-0", &keystore, log.clone());

        let round_id = client
            .start_dkg(&init_proposal_body(&keystore, &["node-0", "node-1", "node-2"]))
            .unwrap();

        let message = log.get_messages(0).unwrap().remove(0);
        client.process_message(message).unwrap();

        assert_eq!(client.state.load_offset().unwrap(), 1);
        assert!(client.fsm_dump(&round_id).unwrap().is_some());

        let operations = client.operations().unwrap();
        assert_eq!(operations.len(), 1);
        let operation = operations.values().next().unwrap();
        assert_eq!(
            operation.op_type,
            signature_proposal::STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS.as_str()
        );
        assert_eq!(operation.dkg_identifier, round_id);
    }

    #[test]
    fn test_non_init_event_on_unknown_round_is_dropped_with_offset_advanced() {
        let keystore = InMemoryKeyStore::new();
        let log = InMemoryLog::new();
        let client = client_with_keystore("node-0", &keystore, log.clone());

        let message = Message {
            id: "m-1".into(),
            dkg_round_id: "round-that-never-started".into(),
            offset: 0,
            event: dkg_proposal::EVENT_DKG_COMMIT_CONFIRMATION_RECEIVED
                .as_str()
                .to_owned(),
            data: b"{}".to_vec(),
            signature: vec![0; 64],
            sender_addr: "node-1".into(),
            recipient_addr: String::new(),
        };

        client.process_message(message).unwrap();
        assert_eq!(client.state.load_offset().unwrap(), 1);
        assert!(client.fsm_dump("round-that-never-started").unwrap().is_none());
        assert!(client.operations().unwrap().is_empty());
    }

    #[test]
    fn test_processed_operation_roundtrip() {
        let keystore = InMemoryKeyStore::new();
        let log = InMemoryLog::new();
        let client = client_with_keystore("node-0", &keystore, log.clone());

        client
            .start_dkg(&init_proposal_body(&keystore, &["node-0", "node-1"]))
            .unwrap();
        let message = log.get_messages(0).unwrap().remove(0);
        client.process_message(message).unwrap();

        let mut processed = client.operations().unwrap().into_values().next().unwrap();
        processed.result_msgs.push(Message {
            id: "result-1".into(),
            dkg_round_id: processed.dkg_identifier.clone(),
            event: signature_proposal::EVENT_CONFIRM_PROPOSAL.as_str().to_owned(),
            data: b"{}".to_vec(),
            ..Message::default()
        });

        client.handle_processed_operation(processed.clone()).unwrap();

        // The result was signed, attributed, and broadcast; the pool is empty.
        let broadcast = log.get_messages(1).unwrap().remove(0);
        assert_eq!(broadcast.sender_addr, "node-0");
        assert!(!broadcast.signature.is_empty());
        assert!(client.operations().unwrap().is_empty());

        // A second intake of the same operation is unknown.
        let err = client.handle_processed_operation(processed).unwrap_err();
        assert!(matches!(err, ClientError::UnknownOperation(_)));
    }

    #[test]
    fn test_processed_operation_with_tampered_payload_is_rejected() {
        let keystore = InMemoryKeyStore::new();
        let log = InMemoryLog::new();
        let client = client_with_keystore("node-0", &keystore, log.clone());

        client
            .start_dkg(&init_proposal_body(&keystore, &["node-0", "node-1"]))
            .unwrap();
        let message = log.get_messages(0).unwrap().remove(0);
        client.process_message(message).unwrap();

        let mut processed = client.operations().unwrap().into_values().next().unwrap();
        processed.payload = b"{}".to_vec();

        let err = client.handle_processed_operation(processed).unwrap_err();
        assert!(matches!(err, ClientError::OperationMismatch(_)));
    }
}
