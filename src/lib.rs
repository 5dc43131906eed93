//! Superego session - client-side streaming execution for a conversational
//! agent UI
//!
//! A [`Session`] owns the execution state of one UI session: which
//! conversation is active, the live output stream, the transcript and any tool
//! invocations awaiting approval. State changes go through a pure state
//! machine; I/O lives behind the traits in [`transport`].

pub mod accumulator;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod ledger;
pub mod session;
pub mod state_machine;
pub mod transport;

pub use accumulator::PartialOutput;
pub use config::{SessionConfig, TransportConfig};
pub use confirmation::{Decision, PendingToolConfirmation, ToolDecision};
pub use error::{ErrorKind, SessionError};
pub use ledger::{Step, StepLedger, StepRole};
pub use session::{CancelHandle, Session, SessionView};
pub use state_machine::{ExecutionPhase, ExecutionState, Generation};
pub use transport::http::HttpTransport;
pub use transport::{
    ConnectionHandle, EventSink, FeedbackSink, StreamRequest, StreamTransport, Transcript, TranscriptLoader,
    TracingFeedback,
};
