//! Lockstep state machines for the DKG round lifecycle.
//!
//! Every online node feeds the same ordered log into the same machines, so a
//! round's state is a pure function of the message sequence. The crate is
//! split into the generic framework ([`machine`]) and the three composed
//! round machines:
//!
//! 1. [`signature_proposal`]: collects the participant roster and per
//!    participant confirmations.
//! 2. [`dkg_proposal`]: five await phases from pub keys to the master key.
//! 3. [`signing_proposal`]: on-demand signing sessions over the generated
//!    share, restartable per session.
//!
//! [`instance::FsmInstance`] composes the three over one payload and adds
//! snapshot/restore.

pub mod dkg_proposal;
pub mod error;
pub mod instance;
pub mod machine;
pub mod payload;
pub mod requests;
pub mod responses;
pub mod signature_proposal;
pub mod signing_proposal;

pub use error::FsmError;
pub use instance::{resolve_event, resolve_state, FsmInstance, FsmResponse};
pub use machine::{
    AutoMode, Callback, CallbackOutcome, Event, EventDesc, State, StateMachine, GLOBAL_DONE,
    GLOBAL_IDLE,
};
pub use payload::RoundPayload;
pub use requests::FsmRequest;
pub use responses::FsmResponseData;
