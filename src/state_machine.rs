//! Execution state machine
//!
//! Elm-style: a pure [`transition`] maps the current [`ExecutionState`] and an
//! [`Event`] to a new state plus a list of [`Effect`]s. The session executes
//! the effects; nothing in here performs I/O.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{ExecutionPhase, ExecutionState, Generation};
pub use transition::{transition, TransitionError, TransitionResult, MAX_RECONNECT_MESSAGE};
