//! Composite per-round machine.
//!
//! One `FsmInstance` drives a DKG round through the three chained machines.
//! Events are routed to whichever machine defines them; the shared payload
//! makes the handoffs (proposal collected → DKG init, master key collected →
//! signing init) plain state transitions.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::dkg_proposal;
use crate::error::FsmError;
use crate::machine::{Event, State, StateMachine, GLOBAL_DONE, GLOBAL_IDLE};
use crate::payload::RoundPayload;
use crate::requests::FsmRequest;
use crate::responses::FsmResponseData;
use crate::signature_proposal;
use crate::signing_proposal;

static SIGNATURE_PROPOSAL: Lazy<StateMachine<RoundPayload>> =
    Lazy::new(signature_proposal::machine);
static DKG_PROPOSAL: Lazy<StateMachine<RoundPayload>> = Lazy::new(dkg_proposal::machine);
static SIGNING_PROPOSAL: Lazy<StateMachine<RoundPayload>> = Lazy::new(signing_proposal::machine);

fn machines() -> [&'static StateMachine<RoundPayload>; 3] {
    [&SIGNATURE_PROPOSAL, &DKG_PROPOSAL, &SIGNING_PROPOSAL]
}

/// Resolve a wire event name against the composed machines.
pub fn resolve_event(name: &str) -> Option<Event> {
    machines()
        .iter()
        .flat_map(|m| m.events())
        .find(|desc| desc.name.as_str() == name)
        .map(|desc| desc.name)
}

/// Resolve a persisted state name against the composed machines.
pub fn resolve_state(name: &str) -> Option<State> {
    if name == GLOBAL_IDLE.as_str() {
        return Some(GLOBAL_IDLE);
    }
    if name == GLOBAL_DONE.as_str() {
        return Some(GLOBAL_DONE);
    }
    machines()
        .iter()
        .flat_map(|m| m.states())
        .find(|state| state.as_str() == name)
}

/// Result of one event dispatch: the state the round landed in and the
/// response data, if the executed callbacks produced any.
#[derive(Debug)]
pub struct FsmResponse {
    pub state: State,
    pub data: Option<FsmResponseData>,
}

#[derive(Serialize, Deserialize)]
struct RawDump {
    state: String,
    payload: RoundPayload,
}

/// The per-round state machine composition.
#[derive(Clone, Debug)]
pub struct FsmInstance {
    state: State,
    payload: RoundPayload,
}

impl FsmInstance {
    /// Fresh instance for a round that has seen no events yet.
    pub fn create(dkg_round_id: impl Into<String>) -> Self {
        Self {
            state: GLOBAL_IDLE,
            payload: RoundPayload::new(dkg_round_id),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn payload(&self) -> &RoundPayload {
        &self.payload
    }

    /// Dispatch one external event. Atomic per the machine contract.
    pub fn do_event(
        &mut self,
        event: Event,
        request: &FsmRequest,
    ) -> Result<FsmResponse, FsmError> {
        let machine = machines()
            .into_iter()
            .find(|m| m.handles(event))
            .ok_or_else(|| FsmError::UnknownEvent(event.as_str().to_owned()))?;

        let data = machine.dispatch(&mut self.state, &mut self.payload, event, request)?;
        Ok(FsmResponse { state: self.state, data })
    }

    /// Serialize `(state, payload)`. Snapshots are deterministic: quorums are
    /// index-keyed maps and timestamps come from the log.
    pub fn dump(&self) -> Result<Vec<u8>, FsmError> {
        serde_json::to_vec(&RawDump {
            state: self.state.as_str().to_owned(),
            payload: self.payload.clone(),
        })
        .map_err(|e| FsmError::StoreCorrupt(format!("failed to serialize snapshot: {e}")))
    }

    /// Reconstruct an instance from a snapshot produced by [`Self::dump`].
    pub fn from_dump(raw: &[u8]) -> Result<Self, FsmError> {
        let dump: RawDump = serde_json::from_slice(raw)
            .map_err(|e| FsmError::StoreCorrupt(format!("failed to parse snapshot: {e}")))?;
        let state = resolve_state(&dump.state)
            .ok_or_else(|| FsmError::StoreCorrupt(format!("unknown state {}", dump.state)))?;
        Ok(Self { state, payload: dump.payload })
    }

    /// Ed25519 key of a round participant, for message authentication.
    pub fn pub_key_by_addr(&self, addr: &str) -> Option<&[u8]> {
        self.payload.pub_key_by_addr(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requests::{
        SignatureProposalParticipantRequest, SignatureProposalParticipantsEntry,
        SignatureProposalParticipantsListRequest,
    };
    use chrono::{TimeZone, Utc};

    fn ts(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn init_request() -> FsmRequest {
        FsmRequest::ProposalInit(SignatureProposalParticipantsListRequest {
            participants: (0..3)
                .map(|i| SignatureProposalParticipantsEntry {
                    addr: format!("node-{i}"),
                    pub_key: vec![i as u8; 32],
                    dkg_pub_key: vec![],
                })
                .collect(),
            signing_threshold: 2,
            created_at: ts(500),
        })
    }

    #[test]
    fn test_events_route_across_machines() {
        let mut fsm = FsmInstance::create("round-1");
        assert_eq!(fsm.state(), GLOBAL_IDLE);

        let response = fsm
            .do_event(signature_proposal::EVENT_INIT_PROPOSAL, &init_request())
            .unwrap();
        assert_eq!(
            response.state,
            signature_proposal::STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS
        );

        // A DKG event in a signature proposal state is rejected without
        // touching the instance.
        let err = fsm
            .do_event(
                dkg_proposal::EVENT_DKG_INIT_PROCESS,
                &FsmRequest::Default(crate::requests::DefaultRequest { created_at: ts(501) }),
            )
            .unwrap_err();
        assert!(matches!(err, FsmError::InvalidTransition { .. }));
        assert_eq!(
            fsm.state(),
            signature_proposal::STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS
        );
    }

    #[test]
    fn test_dump_roundtrip_is_byte_identical() {
        let mut fsm = FsmInstance::create("round-1");
        fsm.do_event(signature_proposal::EVENT_INIT_PROPOSAL, &init_request())
            .unwrap();
        fsm.do_event(
            signature_proposal::EVENT_CONFIRM_PROPOSAL,
            &FsmRequest::ProposalConfirm(SignatureProposalParticipantRequest {
                participant_id: 1,
                dkg_pub_key: vec![0xAB; 96],
                created_at: ts(501),
            }),
        )
        .unwrap();

        let dump = fsm.dump().unwrap();
        let restored = FsmInstance::from_dump(&dump).unwrap();
        assert_eq!(restored.state(), fsm.state());
        assert_eq!(restored.dump().unwrap(), dump);
    }

    #[test]
    fn test_corrupt_dump_is_rejected() {
        assert!(matches!(
            FsmInstance::from_dump(b"not json"),
            Err(FsmError::StoreCorrupt(_))
        ));

        let unknown_state =
            br#"{"state":"state_that_never_existed","payload":{"dkg_round_id":"r"}}"#;
        assert!(matches!(
            FsmInstance::from_dump(unknown_state),
            Err(FsmError::StoreCorrupt(_))
        ));
    }

    #[test]
    fn test_resolve_event_covers_wire_names() {
        assert!(resolve_event("event_sig_proposal_init").is_some());
        assert!(resolve_event("event_dkg_commit_confirm_received").is_some());
        assert!(resolve_event("event_signing_partial_sign_received").is_some());
        assert!(resolve_event("event_no_such_thing").is_none());
    }

    #[test]
    fn test_pub_key_lookup_by_addr() {
        let mut fsm = FsmInstance::create("round-1");
        fsm.do_event(signature_proposal::EVENT_INIT_PROPOSAL, &init_request())
            .unwrap();

        assert_eq!(fsm.pub_key_by_addr("node-1"), Some(&[1u8; 32][..]));
        assert_eq!(fsm.pub_key_by_addr("stranger"), None);
    }
}
