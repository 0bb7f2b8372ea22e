//! Event-driven state machine framework.
//!
//! A machine is a static table of event descriptors plus a callback per
//! event. The mutable parts, the current state and the payload, live
//! outside the machine, so one definition drives any number of rounds and a
//! snapshot is nothing more than `(state, payload)`.
//!
//! # Transition contract
//!
//! [`StateMachine::dispatch`] is atomic: either the callback chain succeeds
//! and the state advances to the descriptor's destination, or both state and
//! payload are left exactly as they were. Internal events can only be raised
//! by callbacks; auto events fire on their own whenever the machine enters
//! (or, for [`AutoMode::Before`], is about to leave) a matching state.

use std::fmt;

use crate::error::FsmError;
use crate::requests::FsmRequest;
use crate::responses::FsmResponseData;

/// Reserved initial state shared by every machine composition.
pub const GLOBAL_IDLE: State = State("__idle");
/// Reserved terminal state.
pub const GLOBAL_DONE: State = State("__done");

/// Upper bound on callback-raised transitions per dispatched event. The
/// longest legitimate chain is an external confirmation followed by a
/// validate and a phase handoff per remaining phase.
const MAX_TRANSITION_CHAIN: usize = 16;

/// A machine state, identified by its stable wire name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct State(pub &'static str);

impl State {
    pub fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A machine event, identified by its stable wire name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event(pub &'static str);

impl Event {
    pub fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// When an auto event fires relative to the state it is attached to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AutoMode {
    /// Not an auto event.
    None,
    /// Fires before an event is processed from a matching source state.
    Before,
    /// Fires after the machine lands in a matching state.
    After,
}

/// Descriptor of a single event: where it can fire from, where it leads, and
/// whether it is caller-visible.
#[derive(Clone, Copy, Debug)]
pub struct EventDesc {
    pub name: Event,
    pub src: &'static [State],
    pub dst: State,
    pub internal: bool,
    pub auto: AutoMode,
}

impl EventDesc {
    pub const fn external(name: Event, src: &'static [State], dst: State) -> Self {
        Self { name, src, dst, internal: false, auto: AutoMode::None }
    }

    pub const fn internal(name: Event, src: &'static [State], dst: State) -> Self {
        Self { name, src, dst, internal: true, auto: AutoMode::None }
    }

    pub const fn auto(name: Event, src: &'static [State], dst: State, mode: AutoMode) -> Self {
        Self { name, src, dst, internal: true, auto: mode }
    }
}

/// What a callback did: optional response data for the caller and an optional
/// internal event to raise next.
#[derive(Default)]
pub struct CallbackOutcome {
    pub data: Option<FsmResponseData>,
    pub raise: Option<Event>,
}

impl CallbackOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_data(data: FsmResponseData) -> Self {
        Self { data: Some(data), raise: None }
    }

    pub fn with_raise(event: Event) -> Self {
        Self { data: None, raise: Some(event) }
    }
}

/// Event handler: mutates the payload and reports what happened.
pub type Callback<P> = fn(&mut P, &FsmRequest) -> Result<CallbackOutcome, FsmError>;

/// A state machine definition over payload type `P`.
pub struct StateMachine<P> {
    name: &'static str,
    events: Vec<(EventDesc, Option<Callback<P>>)>,
}

impl<P: Clone> StateMachine<P> {
    /// Build a machine from its event table.
    ///
    /// Panics on duplicate event names or an empty source list; definitions
    /// are static program data, not runtime input.
    pub fn new(name: &'static str, events: Vec<(EventDesc, Option<Callback<P>>)>) -> Self {
        for (i, (desc, _)) in events.iter().enumerate() {
            assert!(
                !desc.src.is_empty(),
                "machine {name}: event {} has no source states",
                desc.name
            );
            assert!(
                events[..i].iter().all(|(other, _)| other.name != desc.name),
                "machine {name}: duplicate event {}",
                desc.name
            );
        }
        Self { name, events }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn handles(&self, event: Event) -> bool {
        self.find(event).is_some()
    }

    /// All event descriptors of this machine.
    pub fn events(&self) -> impl Iterator<Item = &EventDesc> {
        self.events.iter().map(|(desc, _)| desc)
    }

    /// Every state mentioned by this machine's table.
    pub fn states(&self) -> Vec<State> {
        let mut states = Vec::new();
        for (desc, _) in &self.events {
            for state in desc.src.iter().chain(std::iter::once(&desc.dst)) {
                if !states.contains(state) {
                    states.push(*state);
                }
            }
        }
        states
    }

    fn find(&self, event: Event) -> Option<&(EventDesc, Option<Callback<P>>)> {
        self.events.iter().find(|(desc, _)| desc.name == event)
    }

    /// Dispatch an external event. Atomic: on any error the state and payload
    /// are restored to their values at entry.
    pub fn dispatch(
        &self,
        state: &mut State,
        payload: &mut P,
        event: Event,
        request: &FsmRequest,
    ) -> Result<Option<FsmResponseData>, FsmError> {
        let (desc, _) = self
            .find(event)
            .ok_or_else(|| FsmError::UnknownEvent(event.as_str().to_owned()))?;
        if desc.internal {
            return Err(FsmError::InternalEvent(event.as_str().to_owned()));
        }

        let saved_state = *state;
        let saved_payload = payload.clone();
        match self.run(state, payload, event, request) {
            Ok(data) => Ok(data),
            Err(err) => {
                *state = saved_state;
                *payload = saved_payload;
                Err(err)
            }
        }
    }

    fn run(
        &self,
        state: &mut State,
        payload: &mut P,
        event: Event,
        request: &FsmRequest,
    ) -> Result<Option<FsmResponseData>, FsmError> {
        let mut data = None;
        let mut depth = 0usize;

        self.run_autos(AutoMode::Before, state, payload, request, &mut data, &mut depth)?;
        self.fire(state, payload, event, request, &mut data, &mut depth)?;
        self.run_autos(AutoMode::After, state, payload, request, &mut data, &mut depth)?;
        Ok(data)
    }

    fn fire(
        &self,
        state: &mut State,
        payload: &mut P,
        event: Event,
        request: &FsmRequest,
        data: &mut Option<FsmResponseData>,
        depth: &mut usize,
    ) -> Result<(), FsmError> {
        *depth += 1;
        if *depth > MAX_TRANSITION_CHAIN {
            return Err(FsmError::TransitionChainTooLong(MAX_TRANSITION_CHAIN));
        }

        let (desc, callback) = self
            .find(event)
            .ok_or_else(|| FsmError::UnknownEvent(event.as_str().to_owned()))?;
        if !desc.src.contains(state) {
            return Err(FsmError::InvalidTransition {
                event: event.as_str().to_owned(),
                state: state.as_str().to_owned(),
            });
        }

        let outcome = match callback {
            Some(callback) => callback(payload, request)?,
            None => CallbackOutcome::none(),
        };

        if *state != desc.dst {
            tracing::debug!(machine = self.name, event = %event, from = %state, to = %desc.dst, "transition");
        }
        *state = desc.dst;
        if let Some(response) = outcome.data {
            *data = Some(response);
        }
        if let Some(next) = outcome.raise {
            self.fire(state, payload, next, request, data, depth)?;
        }
        Ok(())
    }

    /// Run auto events for the current state, following the machine as long
    /// as they keep moving it.
    fn run_autos(
        &self,
        mode: AutoMode,
        state: &mut State,
        payload: &mut P,
        request: &FsmRequest,
        data: &mut Option<FsmResponseData>,
        depth: &mut usize,
    ) -> Result<(), FsmError> {
        loop {
            let entered = *state;
            let autos: Vec<Event> = self
                .events
                .iter()
                .filter(|(desc, _)| desc.auto == mode && desc.src.contains(&entered))
                .map(|(desc, _)| desc.name)
                .collect();

            for event in autos {
                self.fire(state, payload, event, request, data, depth)?;
                if *state != entered {
                    break;
                }
            }
            if *state == entered {
                return Ok(());
            }
        }
    }
}
