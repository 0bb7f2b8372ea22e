//! DKG proposal machine.
//!
//! Five linear await phases (pub keys, commits, deals, responses, master
//! key), each confirmed when every quorum entry reached the phase's
//! confirmed status. Confirmation advances through an auto-validate event
//! that inspects the quorum and raises the internal phase-confirmed event.
//!
//! The pub-keys phase is usually confirmed instantly: the keys were already
//! gathered with the participation confirmations, so its validate advances
//! straight to the commits phase on the init-process event.

use chrono::Duration;

use crate::error::FsmError;
use crate::machine::{AutoMode, CallbackOutcome, Event, EventDesc, State, StateMachine};
use crate::payload::{
    DkgConfirmation, DkgParticipantStatus, DkgProposalParticipant, RoundPayload,
};
use crate::requests::FsmRequest;
use crate::responses::{
    DkgProposalCommitsEntry, DkgProposalCommitsParticipantResponse, DkgProposalDealsEntry,
    DkgProposalDealsParticipantResponse, DkgProposalPubKeysEntry,
    DkgProposalPubKeysParticipantResponse, DkgProposalResponsesEntry,
    DkgProposalResponsesParticipantResponse, FsmResponseData,
};
use crate::signature_proposal::STATE_SIGNATURE_PROPOSAL_COLLECTED;

pub const FSM_NAME: &str = "dkg_proposal_fsm";

pub const STATE_DKG_PUB_KEYS_AWAIT_CONFIRMATIONS: State =
    State("state_dkg_pub_keys_await_confirmations");
pub const STATE_DKG_PUB_KEYS_AWAIT_CANCELED: State = State("state_dkg_pub_keys_await_canceled");
pub const STATE_DKG_PUB_KEYS_AWAIT_CANCELED_BY_TIMEOUT: State =
    State("state_dkg_pub_keys_await_canceled_by_timeout");

pub const STATE_DKG_COMMITS_AWAIT_CONFIRMATIONS: State =
    State("state_dkg_commits_await_confirmations");
pub const STATE_DKG_COMMITS_AWAIT_CANCELED: State = State("state_dkg_commits_await_canceled");
pub const STATE_DKG_COMMITS_AWAIT_CANCELED_BY_TIMEOUT: State =
    State("state_dkg_commits_await_canceled_by_timeout");

pub const STATE_DKG_DEALS_AWAIT_CONFIRMATIONS: State =
    State("state_dkg_deals_await_confirmations");
pub const STATE_DKG_DEALS_AWAIT_CANCELED: State = State("state_dkg_deals_await_canceled");
pub const STATE_DKG_DEALS_AWAIT_CANCELED_BY_TIMEOUT: State =
    State("state_dkg_deals_await_canceled_by_timeout");

pub const STATE_DKG_RESPONSES_AWAIT_CONFIRMATIONS: State =
    State("state_dkg_responses_await_confirmations");
pub const STATE_DKG_RESPONSES_AWAIT_CANCELED: State = State("state_dkg_responses_await_canceled");
pub const STATE_DKG_RESPONSES_AWAIT_CANCELED_BY_TIMEOUT: State =
    State("state_dkg_responses_await_canceled_by_timeout");

pub const STATE_DKG_MASTER_KEY_AWAIT_CONFIRMATIONS: State =
    State("state_dkg_master_key_await_confirmations");
pub const STATE_DKG_MASTER_KEY_AWAIT_CANCELED: State =
    State("state_dkg_master_key_await_canceled");
pub const STATE_DKG_MASTER_KEY_AWAIT_CANCELED_BY_TIMEOUT: State =
    State("state_dkg_master_key_await_canceled_by_timeout");
pub const STATE_DKG_MASTER_KEY_COLLECTED: State = State("state_dkg_master_key_collected");

/// Dispatched by the client once the signature proposal is collected.
pub const EVENT_DKG_INIT_PROCESS: Event = Event("event_dkg_init_process");

pub const EVENT_DKG_PUB_KEY_CONFIRMATION_RECEIVED: Event =
    Event("event_dkg_pub_key_confirm_received");
pub const EVENT_DKG_PUB_KEY_CONFIRMATION_ERROR: Event =
    Event("event_dkg_pub_key_confirm_canceled_by_error");
pub const EVENT_DKG_COMMIT_CONFIRMATION_RECEIVED: Event =
    Event("event_dkg_commit_confirm_received");
pub const EVENT_DKG_COMMIT_CONFIRMATION_ERROR: Event =
    Event("event_dkg_commit_confirm_canceled_by_error");
pub const EVENT_DKG_DEAL_CONFIRMATION_RECEIVED: Event = Event("event_dkg_deal_confirm_received");
pub const EVENT_DKG_DEAL_CONFIRMATION_ERROR: Event =
    Event("event_dkg_deal_confirm_canceled_by_error");
pub const EVENT_DKG_RESPONSE_CONFIRMATION_RECEIVED: Event =
    Event("event_dkg_response_confirm_received");
pub const EVENT_DKG_RESPONSE_CONFIRMATION_ERROR: Event =
    Event("event_dkg_response_confirm_canceled_by_error");
pub const EVENT_DKG_MASTER_KEY_CONFIRMATION_RECEIVED: Event =
    Event("event_dkg_master_key_confirm_received");
pub const EVENT_DKG_MASTER_KEY_CONFIRMATION_ERROR: Event =
    Event("event_dkg_master_key_confirm_canceled_by_error");

const EVENT_DKG_PUB_KEYS_VALIDATE_INTERNAL: Event = Event("event_dkg_pub_keys_validate_internal");
const EVENT_DKG_PUB_KEYS_CONFIRMED_INTERNAL: Event =
    Event("event_dkg_pub_keys_confirmed_internal");
const EVENT_DKG_PUB_KEYS_CANCELED_BY_TIMEOUT_INTERNAL: Event =
    Event("event_dkg_pub_keys_confirm_canceled_by_timeout_internal");

const EVENT_DKG_COMMITS_VALIDATE_INTERNAL: Event = Event("event_dkg_commits_validate_internal");
const EVENT_DKG_COMMITS_CONFIRMED_INTERNAL: Event = Event("event_dkg_commits_confirmed_internal");
const EVENT_DKG_COMMITS_CANCELED_BY_TIMEOUT_INTERNAL: Event =
    Event("event_dkg_commits_confirm_canceled_by_timeout_internal");

const EVENT_DKG_DEALS_VALIDATE_INTERNAL: Event = Event("event_dkg_deals_validate_internal");
const EVENT_DKG_DEALS_CONFIRMED_INTERNAL: Event = Event("event_dkg_deals_confirmed_internal");
const EVENT_DKG_DEALS_CANCELED_BY_TIMEOUT_INTERNAL: Event =
    Event("event_dkg_deals_confirm_canceled_by_timeout_internal");

const EVENT_DKG_RESPONSES_VALIDATE_INTERNAL: Event =
    Event("event_dkg_responses_validate_internal");
const EVENT_DKG_RESPONSES_CONFIRMED_INTERNAL: Event =
    Event("event_dkg_responses_confirmed_internal");
const EVENT_DKG_RESPONSES_CANCELED_BY_TIMEOUT_INTERNAL: Event =
    Event("event_dkg_responses_confirm_canceled_by_timeout_internal");

const EVENT_DKG_MASTER_KEY_VALIDATE_INTERNAL: Event =
    Event("event_dkg_master_key_validate_internal");
const EVENT_DKG_MASTER_KEY_CONFIRMED_INTERNAL: Event =
    Event("event_dkg_master_key_confirmed_internal");
const EVENT_DKG_MASTER_KEY_CANCELED_BY_TIMEOUT_INTERNAL: Event =
    Event("event_dkg_master_key_confirm_canceled_by_timeout_internal");
const EVENT_DKG_MASTER_KEY_MISMATCH_INTERNAL: Event =
    Event("event_dkg_master_key_confirm_canceled_by_error_internal");

const DKG_LIFETIME_HOURS: i64 = 24;

pub fn machine() -> StateMachine<RoundPayload> {
    StateMachine::new(
        FSM_NAME,
        vec![
            (
                EventDesc::external(
                    EVENT_DKG_INIT_PROCESS,
                    &[STATE_SIGNATURE_PROPOSAL_COLLECTED],
                    STATE_DKG_PUB_KEYS_AWAIT_CONFIRMATIONS,
                ),
                Some(action_dkg_init_process),
            ),
            // Pub keys
            (
                EventDesc::external(
                    EVENT_DKG_PUB_KEY_CONFIRMATION_RECEIVED,
                    &[STATE_DKG_PUB_KEYS_AWAIT_CONFIRMATIONS],
                    STATE_DKG_PUB_KEYS_AWAIT_CONFIRMATIONS,
                ),
                Some(action_pub_key_confirmation_received),
            ),
            (
                EventDesc::external(
                    EVENT_DKG_PUB_KEY_CONFIRMATION_ERROR,
                    &[STATE_DKG_PUB_KEYS_AWAIT_CONFIRMATIONS],
                    STATE_DKG_PUB_KEYS_AWAIT_CANCELED,
                ),
                Some(action_confirmation_error),
            ),
            (
                EventDesc::auto(
                    EVENT_DKG_PUB_KEYS_VALIDATE_INTERNAL,
                    &[STATE_DKG_PUB_KEYS_AWAIT_CONFIRMATIONS],
                    STATE_DKG_PUB_KEYS_AWAIT_CONFIRMATIONS,
                    AutoMode::After,
                ),
                Some(action_validate_pub_keys),
            ),
            (
                EventDesc::internal(
                    EVENT_DKG_PUB_KEYS_CONFIRMED_INTERNAL,
                    &[STATE_DKG_PUB_KEYS_AWAIT_CONFIRMATIONS],
                    STATE_DKG_COMMITS_AWAIT_CONFIRMATIONS,
                ),
                Some(action_pub_keys_confirmed),
            ),
            (
                EventDesc::internal(
                    EVENT_DKG_PUB_KEYS_CANCELED_BY_TIMEOUT_INTERNAL,
                    &[STATE_DKG_PUB_KEYS_AWAIT_CONFIRMATIONS],
                    STATE_DKG_PUB_KEYS_AWAIT_CANCELED_BY_TIMEOUT,
                ),
                None,
            ),
            // Commits
            (
                EventDesc::external(
                    EVENT_DKG_COMMIT_CONFIRMATION_RECEIVED,
                    &[STATE_DKG_COMMITS_AWAIT_CONFIRMATIONS],
                    STATE_DKG_COMMITS_AWAIT_CONFIRMATIONS,
                ),
                Some(action_commit_confirmation_received),
            ),
            (
                EventDesc::external(
                    EVENT_DKG_COMMIT_CONFIRMATION_ERROR,
                    &[STATE_DKG_COMMITS_AWAIT_CONFIRMATIONS],
                    STATE_DKG_COMMITS_AWAIT_CANCELED,
                ),
                Some(action_confirmation_error),
            ),
            (
                EventDesc::auto(
                    EVENT_DKG_COMMITS_VALIDATE_INTERNAL,
                    &[STATE_DKG_COMMITS_AWAIT_CONFIRMATIONS],
                    STATE_DKG_COMMITS_AWAIT_CONFIRMATIONS,
                    AutoMode::After,
                ),
                Some(action_validate_commits),
            ),
            (
                EventDesc::internal(
                    EVENT_DKG_COMMITS_CONFIRMED_INTERNAL,
                    &[STATE_DKG_COMMITS_AWAIT_CONFIRMATIONS],
                    STATE_DKG_DEALS_AWAIT_CONFIRMATIONS,
                ),
                Some(action_commits_confirmed),
            ),
            (
                EventDesc::internal(
                    EVENT_DKG_COMMITS_CANCELED_BY_TIMEOUT_INTERNAL,
                    &[STATE_DKG_COMMITS_AWAIT_CONFIRMATIONS],
                    STATE_DKG_COMMITS_AWAIT_CANCELED_BY_TIMEOUT,
                ),
                None,
            ),
            // Deals
            (
                EventDesc::external(
                    EVENT_DKG_DEAL_CONFIRMATION_RECEIVED,
                    &[STATE_DKG_DEALS_AWAIT_CONFIRMATIONS],
                    STATE_DKG_DEALS_AWAIT_CONFIRMATIONS,
                ),
                Some(action_deal_confirmation_received),
            ),
            // A commit mismatch only surfaces once the verifier's own deal
            // phase completed, so the error is accepted from the responses
            // phase as well.
            (
                EventDesc::external(
                    EVENT_DKG_DEAL_CONFIRMATION_ERROR,
                    &[
                        STATE_DKG_DEALS_AWAIT_CONFIRMATIONS,
                        STATE_DKG_RESPONSES_AWAIT_CONFIRMATIONS,
                    ],
                    STATE_DKG_DEALS_AWAIT_CANCELED,
                ),
                Some(action_confirmation_error),
            ),
            (
                EventDesc::auto(
                    EVENT_DKG_DEALS_VALIDATE_INTERNAL,
                    &[STATE_DKG_DEALS_AWAIT_CONFIRMATIONS],
                    STATE_DKG_DEALS_AWAIT_CONFIRMATIONS,
                    AutoMode::After,
                ),
                Some(action_validate_deals),
            ),
            (
                EventDesc::internal(
                    EVENT_DKG_DEALS_CONFIRMED_INTERNAL,
                    &[STATE_DKG_DEALS_AWAIT_CONFIRMATIONS],
                    STATE_DKG_RESPONSES_AWAIT_CONFIRMATIONS,
                ),
                Some(action_deals_confirmed),
            ),
            (
                EventDesc::internal(
                    EVENT_DKG_DEALS_CANCELED_BY_TIMEOUT_INTERNAL,
                    &[STATE_DKG_DEALS_AWAIT_CONFIRMATIONS],
                    STATE_DKG_DEALS_AWAIT_CANCELED_BY_TIMEOUT,
                ),
                None,
            ),
            // Responses
            (
                EventDesc::external(
                    EVENT_DKG_RESPONSE_CONFIRMATION_RECEIVED,
                    &[STATE_DKG_RESPONSES_AWAIT_CONFIRMATIONS],
                    STATE_DKG_RESPONSES_AWAIT_CONFIRMATIONS,
                ),
                Some(action_response_confirmation_received),
            ),
            (
                EventDesc::external(
                    EVENT_DKG_RESPONSE_CONFIRMATION_ERROR,
                    &[STATE_DKG_RESPONSES_AWAIT_CONFIRMATIONS],
                    STATE_DKG_RESPONSES_AWAIT_CANCELED,
                ),
                Some(action_confirmation_error),
            ),
            (
                EventDesc::auto(
                    EVENT_DKG_RESPONSES_VALIDATE_INTERNAL,
                    &[STATE_DKG_RESPONSES_AWAIT_CONFIRMATIONS],
                    STATE_DKG_RESPONSES_AWAIT_CONFIRMATIONS,
                    AutoMode::After,
                ),
                Some(action_validate_responses),
            ),
            (
                EventDesc::internal(
                    EVENT_DKG_RESPONSES_CONFIRMED_INTERNAL,
                    &[STATE_DKG_RESPONSES_AWAIT_CONFIRMATIONS],
                    STATE_DKG_MASTER_KEY_AWAIT_CONFIRMATIONS,
                ),
                Some(action_responses_confirmed),
            ),
            (
                EventDesc::internal(
                    EVENT_DKG_RESPONSES_CANCELED_BY_TIMEOUT_INTERNAL,
                    &[STATE_DKG_RESPONSES_AWAIT_CONFIRMATIONS],
                    STATE_DKG_RESPONSES_AWAIT_CANCELED_BY_TIMEOUT,
                ),
                None,
            ),
            // Master key
            (
                EventDesc::external(
                    EVENT_DKG_MASTER_KEY_CONFIRMATION_RECEIVED,
                    &[STATE_DKG_MASTER_KEY_AWAIT_CONFIRMATIONS],
                    STATE_DKG_MASTER_KEY_AWAIT_CONFIRMATIONS,
                ),
                Some(action_master_key_confirmation_received),
            ),
            (
                EventDesc::external(
                    EVENT_DKG_MASTER_KEY_CONFIRMATION_ERROR,
                    &[STATE_DKG_MASTER_KEY_AWAIT_CONFIRMATIONS],
                    STATE_DKG_MASTER_KEY_AWAIT_CANCELED,
                ),
                Some(action_confirmation_error),
            ),
            (
                EventDesc::auto(
                    EVENT_DKG_MASTER_KEY_VALIDATE_INTERNAL,
                    &[STATE_DKG_MASTER_KEY_AWAIT_CONFIRMATIONS],
                    STATE_DKG_MASTER_KEY_AWAIT_CONFIRMATIONS,
                    AutoMode::After,
                ),
                Some(action_validate_master_key),
            ),
            (
                EventDesc::internal(
                    EVENT_DKG_MASTER_KEY_CONFIRMED_INTERNAL,
                    &[STATE_DKG_MASTER_KEY_AWAIT_CONFIRMATIONS],
                    STATE_DKG_MASTER_KEY_COLLECTED,
                ),
                None,
            ),
            (
                EventDesc::internal(
                    EVENT_DKG_MASTER_KEY_CANCELED_BY_TIMEOUT_INTERNAL,
                    &[STATE_DKG_MASTER_KEY_AWAIT_CONFIRMATIONS],
                    STATE_DKG_MASTER_KEY_AWAIT_CANCELED_BY_TIMEOUT,
                ),
                None,
            ),
            (
                EventDesc::internal(
                    EVENT_DKG_MASTER_KEY_MISMATCH_INTERNAL,
                    &[STATE_DKG_MASTER_KEY_AWAIT_CONFIRMATIONS],
                    STATE_DKG_MASTER_KEY_AWAIT_CANCELED,
                ),
                None,
            ),
        ],
    )
}

fn action_dkg_init_process(
    payload: &mut RoundPayload,
    request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let created_at = request.created_at();
    let signature_proposal = payload.signature_proposal()?;

    let threshold = signature_proposal
        .quorum
        .values()
        .next()
        .map(|p| p.threshold)
        .ok_or_else(|| FsmError::InvalidRequest("empty signature quorum".into()))?;

    // Indices carry over from the signature proposal quorum; they stay
    // stable across all three machines of the round.
    let quorum = signature_proposal
        .quorum
        .iter()
        .map(|(index, p)| {
            let confirmed = !p.dkg_pub_key.is_empty();
            (
                *index,
                DkgProposalParticipant {
                    addr: p.addr.clone(),
                    dkg_pub_key: p.dkg_pub_key.clone(),
                    commit: Vec::new(),
                    deal: Vec::new(),
                    response: Vec::new(),
                    master_key: Vec::new(),
                    status: if confirmed {
                        DkgParticipantStatus::PubKeyConfirmed
                    } else {
                        DkgParticipantStatus::PubKeyAwaitConfirmation
                    },
                    error: None,
                    updated_at: created_at,
                },
            )
        })
        .collect();

    payload.dkg_proposal = Some(DkgConfirmation {
        quorum,
        threshold,
        created_at,
        updated_at: created_at,
        expires_at: created_at + Duration::hours(DKG_LIFETIME_HOURS),
    });

    Ok(CallbackOutcome::none())
}

fn action_pub_key_confirmation_received(
    payload: &mut RoundPayload,
    request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let FsmRequest::DkgPubKeyConfirm(request) = request else {
        return Err(FsmError::InvalidRequest("pub key confirmation expected".into()));
    };

    let confirmation = payload.dkg_proposal_mut()?;
    let participant = confirmation
        .quorum
        .get_mut(&request.participant_id)
        .ok_or(FsmError::InvalidParticipant(request.participant_id))?;

    if participant.status == DkgParticipantStatus::PubKeyConfirmed {
        return Ok(CallbackOutcome::none());
    }

    participant.dkg_pub_key = request.pub_key.clone();
    participant.status = DkgParticipantStatus::PubKeyConfirmed;
    participant.updated_at = request.created_at;
    confirmation.updated_at = request.created_at;

    Ok(CallbackOutcome::none())
}

fn action_commit_confirmation_received(
    payload: &mut RoundPayload,
    request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let FsmRequest::DkgCommitConfirm(request) = request else {
        return Err(FsmError::InvalidRequest("commit confirmation expected".into()));
    };

    let confirmation = payload.dkg_proposal_mut()?;
    let participant = confirmation
        .quorum
        .get_mut(&request.participant_id)
        .ok_or(FsmError::InvalidParticipant(request.participant_id))?;

    if participant.status == DkgParticipantStatus::CommitConfirmed {
        return Ok(CallbackOutcome::none());
    }

    participant.commit = request.commit.clone();
    participant.status = DkgParticipantStatus::CommitConfirmed;
    participant.updated_at = request.created_at;
    confirmation.updated_at = request.created_at;

    Ok(CallbackOutcome::none())
}

fn action_deal_confirmation_received(
    payload: &mut RoundPayload,
    request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let FsmRequest::DkgDealConfirm(request) = request else {
        return Err(FsmError::InvalidRequest("deal confirmation expected".into()));
    };

    let confirmation = payload.dkg_proposal_mut()?;
    let participant = confirmation
        .quorum
        .get_mut(&request.participant_id)
        .ok_or(FsmError::InvalidParticipant(request.participant_id))?;

    if participant.status == DkgParticipantStatus::DealConfirmed {
        return Ok(CallbackOutcome::none());
    }

    participant.deal = request.deal.clone();
    participant.status = DkgParticipantStatus::DealConfirmed;
    participant.updated_at = request.created_at;
    confirmation.updated_at = request.created_at;

    Ok(CallbackOutcome::none())
}

fn action_response_confirmation_received(
    payload: &mut RoundPayload,
    request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let FsmRequest::DkgResponseConfirm(request) = request else {
        return Err(FsmError::InvalidRequest("response confirmation expected".into()));
    };

    let confirmation = payload.dkg_proposal_mut()?;
    let participant = confirmation
        .quorum
        .get_mut(&request.participant_id)
        .ok_or(FsmError::InvalidParticipant(request.participant_id))?;

    if participant.status == DkgParticipantStatus::ResponseConfirmed {
        return Ok(CallbackOutcome::none());
    }

    participant.response = request.response.clone();
    participant.status = DkgParticipantStatus::ResponseConfirmed;
    participant.updated_at = request.created_at;
    confirmation.updated_at = request.created_at;

    Ok(CallbackOutcome::none())
}

fn action_master_key_confirmation_received(
    payload: &mut RoundPayload,
    request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let FsmRequest::DkgMasterKeyConfirm(request) = request else {
        return Err(FsmError::InvalidRequest("master key confirmation expected".into()));
    };

    let confirmation = payload.dkg_proposal_mut()?;
    let participant = confirmation
        .quorum
        .get_mut(&request.participant_id)
        .ok_or(FsmError::InvalidParticipant(request.participant_id))?;

    if participant.status == DkgParticipantStatus::MasterKeyConfirmed {
        return Ok(CallbackOutcome::none());
    }

    participant.master_key = request.master_key.clone();
    participant.status = DkgParticipantStatus::MasterKeyConfirmed;
    participant.updated_at = request.created_at;
    confirmation.updated_at = request.created_at;

    Ok(CallbackOutcome::none())
}

fn action_confirmation_error(
    payload: &mut RoundPayload,
    request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let FsmRequest::DkgError(request) = request else {
        return Err(FsmError::InvalidRequest("confirmation error expected".into()));
    };

    let confirmation = payload.dkg_proposal_mut()?;
    let participant = confirmation
        .quorum
        .get_mut(&request.participant_id)
        .ok_or(FsmError::InvalidParticipant(request.participant_id))?;

    participant.status = DkgParticipantStatus::ConfirmationError;
    participant.error = Some(request.error.clone());
    participant.updated_at = request.created_at;
    confirmation.updated_at = request.created_at;

    Ok(CallbackOutcome::none())
}

fn validate_phase(
    payload: &RoundPayload,
    confirmed: DkgParticipantStatus,
    on_confirmed: Event,
    on_timeout: Event,
) -> Result<CallbackOutcome, FsmError> {
    let confirmation = payload.dkg_proposal()?;
    if confirmation.is_expired() {
        return Ok(CallbackOutcome::with_raise(on_timeout));
    }
    if confirmation.all_in_status(confirmed) {
        return Ok(CallbackOutcome::with_raise(on_confirmed));
    }
    Ok(CallbackOutcome::none())
}

fn action_validate_pub_keys(
    payload: &mut RoundPayload,
    _request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    validate_phase(
        payload,
        DkgParticipantStatus::PubKeyConfirmed,
        EVENT_DKG_PUB_KEYS_CONFIRMED_INTERNAL,
        EVENT_DKG_PUB_KEYS_CANCELED_BY_TIMEOUT_INTERNAL,
    )
}

fn action_validate_commits(
    payload: &mut RoundPayload,
    _request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    validate_phase(
        payload,
        DkgParticipantStatus::CommitConfirmed,
        EVENT_DKG_COMMITS_CONFIRMED_INTERNAL,
        EVENT_DKG_COMMITS_CANCELED_BY_TIMEOUT_INTERNAL,
    )
}

fn action_validate_deals(
    payload: &mut RoundPayload,
    _request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    validate_phase(
        payload,
        DkgParticipantStatus::DealConfirmed,
        EVENT_DKG_DEALS_CONFIRMED_INTERNAL,
        EVENT_DKG_DEALS_CANCELED_BY_TIMEOUT_INTERNAL,
    )
}

fn action_validate_responses(
    payload: &mut RoundPayload,
    _request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    validate_phase(
        payload,
        DkgParticipantStatus::ResponseConfirmed,
        EVENT_DKG_RESPONSES_CONFIRMED_INTERNAL,
        EVENT_DKG_RESPONSES_CANCELED_BY_TIMEOUT_INTERNAL,
    )
}

fn action_validate_master_key(
    payload: &mut RoundPayload,
    _request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let confirmation = payload.dkg_proposal_mut()?;
    if confirmation.is_expired() {
        return Ok(CallbackOutcome::with_raise(
            EVENT_DKG_MASTER_KEY_CANCELED_BY_TIMEOUT_INTERNAL,
        ));
    }
    if !confirmation.all_in_status(DkgParticipantStatus::MasterKeyConfirmed) {
        return Ok(CallbackOutcome::none());
    }

    // Every participant must have derived the same master key.
    let reference = confirmation
        .quorum
        .values()
        .next()
        .map(|p| p.master_key.clone())
        .unwrap_or_default();
    let mut mismatch = false;
    for participant in confirmation.quorum.values_mut() {
        if participant.master_key != reference {
            participant.status = DkgParticipantStatus::ConfirmationError;
            participant.error = Some("master key differs from the quorum".into());
            mismatch = true;
        }
    }
    if mismatch {
        return Ok(CallbackOutcome::with_raise(EVENT_DKG_MASTER_KEY_MISMATCH_INTERNAL));
    }
    Ok(CallbackOutcome::with_raise(EVENT_DKG_MASTER_KEY_CONFIRMED_INTERNAL))
}

fn action_pub_keys_confirmed(
    payload: &mut RoundPayload,
    _request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let confirmation = payload.dkg_proposal_mut()?;
    confirmation.set_all_statuses(DkgParticipantStatus::CommitAwaitConfirmation);

    let participants = confirmation
        .quorum
        .iter()
        .map(|(index, p)| DkgProposalPubKeysEntry {
            participant_id: *index,
            addr: p.addr.clone(),
            dkg_pub_key: p.dkg_pub_key.clone(),
        })
        .collect();

    Ok(CallbackOutcome::with_data(FsmResponseData::DkgPubKeys(
        DkgProposalPubKeysParticipantResponse {
            participants,
            threshold: confirmation.threshold,
        },
    )))
}

fn action_commits_confirmed(
    payload: &mut RoundPayload,
    _request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let confirmation = payload.dkg_proposal_mut()?;
    confirmation.set_all_statuses(DkgParticipantStatus::DealAwaitConfirmation);

    let participants = confirmation
        .quorum
        .iter()
        .map(|(index, p)| DkgProposalCommitsEntry {
            participant_id: *index,
            addr: p.addr.clone(),
            commit: p.commit.clone(),
        })
        .collect();

    Ok(CallbackOutcome::with_data(FsmResponseData::DkgCommits(
        DkgProposalCommitsParticipantResponse { participants },
    )))
}

fn action_deals_confirmed(
    payload: &mut RoundPayload,
    _request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let confirmation = payload.dkg_proposal_mut()?;
    confirmation.set_all_statuses(DkgParticipantStatus::ResponseAwaitConfirmation);

    let participants = confirmation
        .quorum
        .iter()
        .map(|(index, p)| DkgProposalDealsEntry {
            participant_id: *index,
            addr: p.addr.clone(),
            deal: p.deal.clone(),
        })
        .collect();

    Ok(CallbackOutcome::with_data(FsmResponseData::DkgDeals(
        DkgProposalDealsParticipantResponse { participants },
    )))
}

fn action_responses_confirmed(
    payload: &mut RoundPayload,
    _request: &FsmRequest,
) -> Result<CallbackOutcome, FsmError> {
    let confirmation = payload.dkg_proposal_mut()?;
    confirmation.set_all_statuses(DkgParticipantStatus::MasterKeyAwaitConfirmation);

    let participants = confirmation
        .quorum
        .iter()
        .map(|(index, p)| DkgProposalResponsesEntry {
            participant_id: *index,
            addr: p.addr.clone(),
            response: p.response.clone(),
        })
        .collect();

    Ok(CallbackOutcome::with_data(FsmResponseData::DkgResponses(
        DkgProposalResponsesParticipantResponse { participants },
    )))
}
