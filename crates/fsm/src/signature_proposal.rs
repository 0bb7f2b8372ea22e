//! Signature proposal machine.
//!
//! Collects the participant roster from an unauthenticated init proposal and
//! waits until every listed participant confirmed with its pairing-suite
//! public key. The collected state hands over to the DKG proposal machine.

use std::collections::BTreeMap;

use chrono::Duration;

use crate::error::FsmError;
use crate::machine::{
    AutoMode, CallbackOutcome, Event, EventDesc, State, StateMachine, GLOBAL_IDLE,
};
use crate::payload::{
    RoundPayload, SignatureConfirmation, SignatureProposalParticipant, SignatureProposalStatus,
};
use crate::requests::FsmRequest;
use crate::responses::{
    FsmResponseData, SignatureProposalInvitationEntry,
    SignatureProposalParticipantInvitationsResponse,
};

pub const FSM_NAME: &str = "signature_proposal_fsm";

pub const STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS: State =
    State("state_sig_proposal_await_participants_confirmations");
pub const STATE_PROPOSAL_DECLINED: State = State("state_sig_proposal_declined");
pub const STATE_PROPOSAL_CANCELED_BY_TIMEOUT: State =
    State("state_sig_proposal_canceled_by_timeout");
pub const STATE_SIGNATURE_PROPOSAL_COLLECTED: State = State("state_sig_proposal_collected");

pub const EVENT_INIT_PROPOSAL: Event = Event("event_sig_proposal_init");
pub const EVENT_CONFIRM_PROPOSAL: Event = Event("event_sig_proposal_confirm_by_participant");
pub const EVENT_DECLINE_PROPOSAL: Event = Event("event_sig_proposal_decline_by_participant");

const EVENT_VALIDATE_PROPOSAL_INTERNAL: Event = Event("event_sig_proposal_validate_internal");
const EVENT_PROPOSAL_CONFIRMED_INTERNAL: Event = Event("event_sig_proposal_confirmed_internal");
const EVENT_PROPOSAL_CANCELED_BY_TIMEOUT_INTERNAL: Event =
    Event("event_sig_proposal_canceled_by_timeout_internal");

/// How long a proposal stays open for confirmations.
const PROPOSAL_LIFETIME_HOURS: i64 = 24;

pub fn machine() -> StateMachine<RoundPayload> {
    StateMachine::new(
        FSM_NAME,
        vec![
            (
                EventDesc::external(
                    EVENT_INIT_PROPOSAL,
                    &[GLOBAL_IDLE],
                    STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS,
                ),
                Some(action_init_proposal),
            ),
            (
                EventDesc::external(
                    EVENT_CONFIRM_PROPOSAL,
                    &[STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS],
                    STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS,
                ),
                Some(action_confirmation_received),
            ),
            (
                EventDesc::external(
                    EVENT_DECLINE_PROPOSAL,
                    &[STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS],
                    STATE_PROPOSAL_DECLINED,
                ),
                Some(action_proposal_declined),
            ),
            (
                EventDesc::auto(
                    EVENT_VALIDATE_PROPOSAL_INTERNAL,
                    &[STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS],
                    STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS,
                    AutoMode::After,
                ),
                Some(action_validate_proposal),
            ),
            (
                EventDesc::internal(
                    EVENT_PROPOSAL_CONFIRMED_INTERNAL,
                    &[STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS],
                    STATE_SIGNATURE_PROPOSAL_COLLECTED,
                ),
                None,
            ),
            (
                EventDesc::internal(
                    EVENT_PROPOSAL_CANCELED_BY_TIMEOUT_INTERNAL,
                    &[STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS],
                    STATE_PROPOSAL_CANCELED_BY_TIMEOUT,
                ),
                None,
            ),
        ],
    )
}

fn action_init_proposal(
    payload: &mut RoundPayload,
    request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let FsmRequest::ProposalInit(request) = request else {
        return Err(FsmError::InvalidRequest("participants list expected".into()));
    };

    if request.participants.len() < 2 {
        return Err(FsmError::InvalidRequest(
            "a proposal needs at least two participants".into(),
        ));
    }
    let n = request.participants.len() as u32;
    if request.signing_threshold < 2 || request.signing_threshold > n {
        return Err(FsmError::InvalidRequest(format!(
            "signing threshold {} out of range for {} participants",
            request.signing_threshold, n
        )));
    }

    let mut quorum = BTreeMap::new();
    for (index, entry) in request.participants.iter().enumerate() {
        quorum.insert(
            index as u32,
            SignatureProposalParticipant {
                addr: entry.addr.clone(),
                pub_key: entry.pub_key.clone(),
                dkg_pub_key: entry.dkg_pub_key.clone(),
                status: SignatureProposalStatus::AwaitConfirmation,
                threshold: request.signing_threshold,
                updated_at: request.created_at,
            },
        );
    }

    let participants = quorum
        .iter()
        .map(|(index, p)| SignatureProposalInvitationEntry {
            participant_id: *index,
            addr: p.addr.clone(),
            threshold: p.threshold,
        })
        .collect();

    payload.signature_proposal = Some(SignatureConfirmation {
        quorum,
        created_at: request.created_at,
        updated_at: request.created_at,
        expires_at: request.created_at + Duration::hours(PROPOSAL_LIFETIME_HOURS),
    });

    Ok(CallbackOutcome::with_data(
        FsmResponseData::SigProposalInvitations(SignatureProposalParticipantInvitationsResponse {
            participants,
        }),
    ))
}

fn action_confirmation_received(
    payload: &mut RoundPayload,
    request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let FsmRequest::ProposalConfirm(request) = request else {
        return Err(FsmError::InvalidRequest("participant confirmation expected".into()));
    };

    let confirmation = payload.signature_proposal_mut()?;
    let participant = confirmation
        .quorum
        .get_mut(&request.participant_id)
        .ok_or(FsmError::InvalidParticipant(request.participant_id))?;

    // A re-broadcast confirmation is a no-op.
    if participant.status == SignatureProposalStatus::Confirmed {
        return Ok(CallbackOutcome::none());
    }

    if !request.dkg_pub_key.is_empty() {
        participant.dkg_pub_key = request.dkg_pub_key.clone();
    }
    participant.status = SignatureProposalStatus::Confirmed;
    participant.updated_at = request.created_at;
    confirmation.updated_at = request.created_at;

    Ok(CallbackOutcome::none())
}

fn action_proposal_declined(
    payload: &mut RoundPayload,
    request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let FsmRequest::ProposalConfirm(request) = request else {
        return Err(FsmError::InvalidRequest("participant confirmation expected".into()));
    };

    let confirmation = payload.signature_proposal_mut()?;
    let participant = confirmation
        .quorum
        .get_mut(&request.participant_id)
        .ok_or(FsmError::InvalidParticipant(request.participant_id))?;

    participant.status = SignatureProposalStatus::Declined;
    participant.updated_at = request.created_at;
    confirmation.updated_at = request.created_at;

    Ok(CallbackOutcome::none())
}

fn action_validate_proposal(
    payload: &mut RoundPayload,
    _request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let confirmation = payload.signature_proposal()?;

    if confirmation.is_expired() {
        return Ok(CallbackOutcome::with_raise(
            EVENT_PROPOSAL_CANCELED_BY_TIMEOUT_INTERNAL,
        ));
    }
    if confirmation.all_confirmed() {
        return Ok(CallbackOutcome::with_raise(EVENT_PROPOSAL_CONFIRMED_INTERNAL));
    }
    Ok(CallbackOutcome::none())
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

    fn init_request(n: usize, threshold: u32) -> FsmRequest {
        FsmRequest::ProposalInit(SignatureProposalParticipantsListRequest {
            participants: (0..n)
                .map(|i| SignatureProposalParticipantsEntry {
                    addr: format!("node-{i}"),
                    pub_key: vec![i as u8; 32],
                    dkg_pub_key: vec![],
                })
                .collect(),
            signing_threshold: threshold,
            created_at: ts(1_000),
        })
    }

    fn confirm(participant_id: u32, at: i64) -> FsmRequest {
        FsmRequest::ProposalConfirm(SignatureProposalParticipantRequest {
            participant_id,
            dkg_pub_key: vec![0xAB; 96],
            created_at: ts(at),
        })
    }

    #[test]
    fn test_full_confirmation_reaches_collected() {
        let m = machine();
        let mut state = GLOBAL_IDLE;
        let mut payload = RoundPayload::new("round-1");

        let data = m
            .dispatch(&mut state, &mut payload, EVENT_INIT_PROPOSAL, &init_request(3, 2))
            .unwrap();
        assert_eq!(state, STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS);
        assert!(matches!(data, Some(FsmResponseData::SigProposalInvitations(_))));

        for id in 0..3 {
            m.dispatch(&mut state, &mut payload, EVENT_CONFIRM_PROPOSAL, &confirm(id, 1_001))
                .unwrap();
        }
        assert_eq!(state, STATE_SIGNATURE_PROPOSAL_COLLECTED);

        let quorum = &payload.signature_proposal.unwrap().quorum;
        assert!(quorum.values().all(|p| !p.dkg_pub_key.is_empty()));
    }

    #[test]
    fn test_duplicate_confirmation_is_a_noop() {
        let m = machine();
        let mut state = GLOBAL_IDLE;
        let mut payload = RoundPayload::new("round-1");

        m.dispatch(&mut state, &mut payload, EVENT_INIT_PROPOSAL, &init_request(3, 2))
            .unwrap();
        m.dispatch(&mut state, &mut payload, EVENT_CONFIRM_PROPOSAL, &confirm(0, 1_001))
            .unwrap();
        let snapshot = payload.clone();

        m.dispatch(&mut state, &mut payload, EVENT_CONFIRM_PROPOSAL, &confirm(0, 1_002))
            .unwrap();
        assert_eq!(payload, snapshot);
        assert_eq!(state, STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS);
    }

    #[test]
    fn test_unknown_participant_is_rejected() {
        let m = machine();
        let mut state = GLOBAL_IDLE;
        let mut payload = RoundPayload::new("round-1");

        m.dispatch(&mut state, &mut payload, EVENT_INIT_PROPOSAL, &init_request(3, 2))
            .unwrap();
        let err = m
            .dispatch(&mut state, &mut payload, EVENT_CONFIRM_PROPOSAL, &confirm(9, 1_001))
            .unwrap_err();
        assert!(matches!(err, FsmError::InvalidParticipant(9)));
    }

    #[test]
    fn test_late_confirmation_cancels_by_timeout() {
        let m = machine();
        let mut state = GLOBAL_IDLE;
        let mut payload = RoundPayload::new("round-1");

        m.dispatch(&mut state, &mut payload, EVENT_INIT_PROPOSAL, &init_request(2, 2))
            .unwrap();

        // Confirmation lands a month after the proposal opened.
        let late = 1_000 + 31 * 24 * 3600;
        m.dispatch(&mut state, &mut payload, EVENT_CONFIRM_PROPOSAL, &confirm(0, late))
            .unwrap();
        assert_eq!(state, STATE_PROPOSAL_CANCELED_BY_TIMEOUT);
    }

    #[test]
    fn test_decline_cancels_the_proposal() {
        let m = machine();
        let mut state = GLOBAL_IDLE;
        let mut payload = RoundPayload::new("round-1");

        m.dispatch(&mut state, &mut payload, EVENT_INIT_PROPOSAL, &init_request(3, 2))
            .unwrap();
        m.dispatch(&mut state, &mut payload, EVENT_DECLINE_PROPOSAL, &confirm(1, 1_001))
            .unwrap();
        assert_eq!(state, STATE_PROPOSAL_DECLINED);
    }

    #[test]
    fn test_threshold_bounds_are_validated() {
        let m = machine();
        let mut state = GLOBAL_IDLE;
        let mut payload = RoundPayload::new("round-1");

        let err = m
            .dispatch(&mut state, &mut payload, EVENT_INIT_PROPOSAL, &init_request(3, 5))
            .unwrap_err();
        assert!(matches!(err, FsmError::InvalidRequest(_)));
        assert_eq!(state, GLOBAL_IDLE);
    }
}
