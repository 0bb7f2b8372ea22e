//! Signing proposal machine.
//!
//! On demand after the master key is collected. Each signing session walks
//! idle → await confirmations → await partial signs → collected, then the
//! client restarts the machine to idle for the next session. The initiator is
//! confirmed implicitly by starting the session.

use std::collections::BTreeMap;

use chrono::Duration;

use crate::dkg_proposal::STATE_DKG_MASTER_KEY_COLLECTED;
use crate::error::FsmError;
use crate::machine::{AutoMode, CallbackOutcome, Event, EventDesc, State, StateMachine};
use crate::payload::{
    RoundPayload, SigningConfirmation, SigningParticipantStatus, SigningProposalParticipant,
};
use crate::requests::FsmRequest;
use crate::responses::{
    FsmResponseData, SigningPartialSignsParticipantInvitationsResponse, SigningProcessEntry,
    SigningProcessParticipantResponse, SigningProposalEntry,
    SigningProposalParticipantInvitationsResponse,
};

pub const FSM_NAME: &str = "signing_proposal_fsm";

pub const STATE_SIGNING_IDLE: State = State("state_signing_idle");
pub const STATE_SIGNING_AWAIT_CONFIRMATIONS: State = State("state_signing_await_confirmations");
pub const STATE_SIGNING_CONFIRMATIONS_CANCELED_BY_PARTICIPANT: State =
    State("state_signing_confirmations_await_canceled_by_participant");
pub const STATE_SIGNING_CONFIRMATIONS_CANCELED_BY_TIMEOUT: State =
    State("state_signing_confirmations_await_canceled_by_timeout");
pub const STATE_SIGNING_AWAIT_PARTIAL_SIGNS: State = State("state_signing_await_partial_signs");
pub const STATE_SIGNING_PARTIAL_SIGNS_CANCELED_BY_TIMEOUT: State =
    State("state_signing_partial_signs_await_canceled_by_timeout");
pub const STATE_SIGNING_PARTIAL_SIGNS_COLLECTED: State =
    State("state_signing_partial_signs_collected");

/// Dispatched by the client once the master key is collected.
pub const EVENT_SIGNING_INIT: Event = Event("event_signing_init");
pub const EVENT_SIGNING_START: Event = Event("event_signing_start");
pub const EVENT_CONFIRM_SIGNING: Event = Event("event_signing_proposal_confirm_by_participant");
pub const EVENT_DECLINE_SIGNING: Event = Event("event_signing_proposal_decline_by_participant");
pub const EVENT_SIGNING_PARTIAL_SIGN_RECEIVED: Event =
    Event("event_signing_partial_sign_received");
/// Dispatched by the client after partial signs were collected.
pub const EVENT_SIGNING_RESTART: Event = Event("event_signing_restart");

const EVENT_SIGNING_VALIDATE_CONFIRMATIONS_INTERNAL: Event =
    Event("event_signing_confirmations_validate_internal");
const EVENT_SIGNING_CONFIRMED_INTERNAL: Event = Event("event_signing_confirmed_internal");
const EVENT_SIGNING_CONFIRMATIONS_CANCELED_BY_TIMEOUT_INTERNAL: Event =
    Event("event_signing_confirmations_canceled_by_timeout_internal");
const EVENT_SIGNING_VALIDATE_PARTIAL_SIGNS_INTERNAL: Event =
    Event("event_signing_partial_signs_validate_internal");
const EVENT_SIGNING_PARTIAL_SIGNS_COLLECTED_INTERNAL: Event =
    Event("event_signing_partial_signs_collected_internal");
const EVENT_SIGNING_PARTIAL_SIGNS_CANCELED_BY_TIMEOUT_INTERNAL: Event =
    Event("event_signing_partial_signs_canceled_by_timeout_internal");

const SIGNING_LIFETIME_HOURS: i64 = 2;

pub fn machine() -> StateMachine<RoundPayload> {
    StateMachine::new(
        FSM_NAME,
        vec![
            (
                EventDesc::external(
                    EVENT_SIGNING_INIT,
                    &[STATE_DKG_MASTER_KEY_COLLECTED],
                    STATE_SIGNING_IDLE,
                ),
                None,
            ),
            (
                EventDesc::external(
                    EVENT_SIGNING_START,
                    &[STATE_SIGNING_IDLE],
                    STATE_SIGNING_AWAIT_CONFIRMATIONS,
                ),
                Some(action_signing_start),
            ),
            (
                EventDesc::external(
                    EVENT_CONFIRM_SIGNING,
                    &[STATE_SIGNING_AWAIT_CONFIRMATIONS],
                    STATE_SIGNING_AWAIT_CONFIRMATIONS,
                ),
                Some(action_signing_confirmation_received),
            ),
            (
                EventDesc::external(
                    EVENT_DECLINE_SIGNING,
                    &[STATE_SIGNING_AWAIT_CONFIRMATIONS],
                    STATE_SIGNING_CONFIRMATIONS_CANCELED_BY_PARTICIPANT,
                ),
                Some(action_signing_declined),
            ),
            (
                EventDesc::auto(
                    EVENT_SIGNING_VALIDATE_CONFIRMATIONS_INTERNAL,
                    &[STATE_SIGNING_AWAIT_CONFIRMATIONS],
                    STATE_SIGNING_AWAIT_CONFIRMATIONS,
                    AutoMode::After,
                ),
                Some(action_validate_signing_confirmations),
            ),
            (
                EventDesc::internal(
                    EVENT_SIGNING_CONFIRMED_INTERNAL,
                    &[STATE_SIGNING_AWAIT_CONFIRMATIONS],
                    STATE_SIGNING_AWAIT_PARTIAL_SIGNS,
                ),
                Some(action_signing_confirmed),
            ),
            (
                EventDesc::internal(
                    EVENT_SIGNING_CONFIRMATIONS_CANCELED_BY_TIMEOUT_INTERNAL,
                    &[STATE_SIGNING_AWAIT_CONFIRMATIONS],
                    STATE_SIGNING_CONFIRMATIONS_CANCELED_BY_TIMEOUT,
                ),
                None,
            ),
            (
                EventDesc::external(
                    EVENT_SIGNING_PARTIAL_SIGN_RECEIVED,
                    &[STATE_SIGNING_AWAIT_PARTIAL_SIGNS],
                    STATE_SIGNING_AWAIT_PARTIAL_SIGNS,
                ),
                Some(action_partial_sign_received),
            ),
            (
                EventDesc::auto(
                    EVENT_SIGNING_VALIDATE_PARTIAL_SIGNS_INTERNAL,
                    &[STATE_SIGNING_AWAIT_PARTIAL_SIGNS],
                    STATE_SIGNING_AWAIT_PARTIAL_SIGNS,
                    AutoMode::After,
                ),
                Some(action_validate_partial_signs),
            ),
            (
                EventDesc::internal(
                    EVENT_SIGNING_PARTIAL_SIGNS_COLLECTED_INTERNAL,
                    &[STATE_SIGNING_AWAIT_PARTIAL_SIGNS],
                    STATE_SIGNING_PARTIAL_SIGNS_COLLECTED,
                ),
                Some(action_partial_signs_collected),
            ),
            (
                EventDesc::internal(
                    EVENT_SIGNING_PARTIAL_SIGNS_CANCELED_BY_TIMEOUT_INTERNAL,
                    &[STATE_SIGNING_AWAIT_PARTIAL_SIGNS],
                    STATE_SIGNING_PARTIAL_SIGNS_CANCELED_BY_TIMEOUT,
                ),
                None,
            ),
            (
                EventDesc::external(
                    EVENT_SIGNING_RESTART,
                    &[STATE_SIGNING_PARTIAL_SIGNS_COLLECTED],
                    STATE_SIGNING_IDLE,
                ),
                Some(action_signing_restart),
            ),
        ],
    )
}

fn action_signing_start(
    payload: &mut RoundPayload,
    request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let FsmRequest::SigningStart(request) = request else {
        return Err(FsmError::InvalidRequest("signing start expected".into()));
    };

    let dkg = payload.dkg_proposal()?;
    if !dkg.quorum.contains_key(&request.participant_id) {
        return Err(FsmError::InvalidParticipant(request.participant_id));
    }
    let threshold = dkg.threshold;

    // The signing quorum mirrors the DKG quorum; the initiator never
    // self-confirms.
    let mut quorum = BTreeMap::new();
    for (index, p) in &dkg.quorum {
        let status = if *index == request.participant_id {
            SigningParticipantStatus::Confirmed
        } else {
            SigningParticipantStatus::AwaitConfirmation
        };
        quorum.insert(
            *index,
            SigningProposalParticipant {
                addr: p.addr.clone(),
                status,
                partial_sign: Vec::new(),
                error: None,
                updated_at: request.created_at,
            },
        );
    }

    let participants = quorum
        .iter()
        .map(|(index, p)| SigningProposalEntry {
            participant_id: *index,
            addr: p.addr.clone(),
        })
        .collect();

    payload.signing_proposal = Some(SigningConfirmation {
        signing_id: request.signing_id.clone(),
        initiator_id: request.participant_id,
        threshold,
        src_payload: request.src_payload.clone(),
        quorum,
        created_at: request.created_at,
        updated_at: request.created_at,
        expires_at: request.created_at + Duration::hours(SIGNING_LIFETIME_HOURS),
    });

    Ok(CallbackOutcome::with_data(FsmResponseData::SigningInvitations(
        SigningProposalParticipantInvitationsResponse {
            signing_id: request.signing_id.clone(),
            initiator_id: request.participant_id,
            src_payload: request.src_payload.clone(),
            participants,
        },
    )))
}

fn action_signing_confirmation_received(
    payload: &mut RoundPayload,
    request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let FsmRequest::SigningConfirm(request) = request else {
        return Err(FsmError::InvalidRequest("signing confirmation expected".into()));
    };

    let confirmation = payload.signing_proposal_mut()?;
    let participant = confirmation
        .quorum
        .get_mut(&request.participant_id)
        .ok_or(FsmError::InvalidParticipant(request.participant_id))?;

    if participant.status == SigningParticipantStatus::Confirmed {
        return Ok(CallbackOutcome::none());
    }

    participant.status = SigningParticipantStatus::Confirmed;
    participant.updated_at = request.created_at;
    confirmation.updated_at = request.created_at;

    Ok(CallbackOutcome::none())
}

fn action_signing_declined(
    payload: &mut RoundPayload,
    request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let FsmRequest::SigningConfirm(request) = request else {
        return Err(FsmError::InvalidRequest("signing confirmation expected".into()));
    };

    let confirmation = payload.signing_proposal_mut()?;
    let participant = confirmation
        .quorum
        .get_mut(&request.participant_id)
        .ok_or(FsmError::InvalidParticipant(request.participant_id))?;

    participant.status = SigningParticipantStatus::Declined;
    participant.updated_at = request.created_at;
    confirmation.updated_at = request.created_at;

    Ok(CallbackOutcome::none())
}

fn action_validate_signing_confirmations(
    payload: &mut RoundPayload,
    _request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let confirmation = payload.signing_proposal()?;
    if confirmation.is_expired() {
        return Ok(CallbackOutcome::with_raise(
            EVENT_SIGNING_CONFIRMATIONS_CANCELED_BY_TIMEOUT_INTERNAL,
        ));
    }
    if confirmation.all_in_status(SigningParticipantStatus::Confirmed) {
        return Ok(CallbackOutcome::with_raise(EVENT_SIGNING_CONFIRMED_INTERNAL));
    }
    Ok(CallbackOutcome::none())
}

fn action_signing_confirmed(
    payload: &mut RoundPayload,
    _request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let confirmation = payload.signing_proposal_mut()?;
    for participant in confirmation.quorum.values_mut() {
        participant.status = SigningParticipantStatus::AwaitPartialSign;
    }

    let participants = confirmation
        .quorum
        .iter()
        .map(|(index, p)| SigningProposalEntry {
            participant_id: *index,
            addr: p.addr.clone(),
        })
        .collect();

    Ok(CallbackOutcome::with_data(FsmResponseData::SigningPartialSigns(
        SigningPartialSignsParticipantInvitationsResponse {
            signing_id: confirmation.signing_id.clone(),
            initiator_id: confirmation.initiator_id,
            src_payload: confirmation.src_payload.clone(),
            participants,
        },
    )))
}

fn action_partial_sign_received(
    payload: &mut RoundPayload,
    request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let FsmRequest::SigningPartialSign(request) = request else {
        return Err(FsmError::InvalidRequest("partial sign expected".into()));
    };

    let confirmation = payload.signing_proposal_mut()?;
    let participant = confirmation
        .quorum
        .get_mut(&request.participant_id)
        .ok_or(FsmError::InvalidParticipant(request.participant_id))?;

    if participant.status == SigningParticipantStatus::PartialSignConfirmed {
        return Ok(CallbackOutcome::none());
    }

    participant.partial_sign = request.partial_sign.clone();
    participant.status = SigningParticipantStatus::PartialSignConfirmed;
    participant.updated_at = request.created_at;
    confirmation.updated_at = request.created_at;

    Ok(CallbackOutcome::none())
}

fn action_validate_partial_signs(
    payload: &mut RoundPayload,
    _request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let confirmation = payload.signing_proposal()?;
    if confirmation.is_expired() {
        return Ok(CallbackOutcome::with_raise(
            EVENT_SIGNING_PARTIAL_SIGNS_CANCELED_BY_TIMEOUT_INTERNAL,
        ));
    }
    // Any t shares recover the signature; waiting for the full quorum would
    // let a single silent participant block signing forever.
    let collected =
        confirmation.count_in_status(SigningParticipantStatus::PartialSignConfirmed);
    if collected >= confirmation.threshold as usize {
        return Ok(CallbackOutcome::with_raise(
            EVENT_SIGNING_PARTIAL_SIGNS_COLLECTED_INTERNAL,
        ));
    }
    Ok(CallbackOutcome::none())
}

fn action_partial_signs_collected(
    payload: &mut RoundPayload,
    _request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let confirmation = payload.signing_proposal()?;

    // The full quorum rides along so the initiator stays identifiable;
    // participants that never signed carry an empty share.
    let participants = confirmation
        .quorum
        .iter()
        .map(|(index, p)| SigningProcessEntry {
            participant_id: *index,
            addr: p.addr.clone(),
            partial_sign: p.partial_sign.clone(),
        })
        .collect();

    Ok(CallbackOutcome::with_data(FsmResponseData::SigningProcess(
        SigningProcessParticipantResponse {
            signing_id: confirmation.signing_id.clone(),
            initiator_id: confirmation.initiator_id,
            src_payload: confirmation.src_payload.clone(),
            participants,
        },
    )))
}

fn action_signing_restart(
    payload: &mut RoundPayload,
    _request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    // The collected partial signs live on in the broadcast signature record;
    // the scratch is cleared for the next session.
    payload.signing_proposal = None;
    Ok(CallbackOutcome::none())
}
