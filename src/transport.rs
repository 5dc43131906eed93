//! Trait abstractions for the session's external collaborators
//!
//! The stream transport, transcript loader and UI feedback sinks sit behind
//! these traits so the session can be driven by mocks in tests.

pub mod http;

#[cfg(test)]
pub mod testing;

use crate::confirmation::PendingToolConfirmation;
use crate::error::SessionError;
use crate::ledger::Step;
use crate::session::Inbound;
use crate::state_machine::{Event, Generation};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// What to stream: one user message against one conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub conversation_id: String,
    /// Selected conversation instance, when one is known
    pub instance_id: Option<String>,
    pub message: String,
}

/// A persisted transcript as returned by the loader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub steps: Vec<Step>,
    /// Owning conversation, when the backend states it explicitly
    pub conversation_id: Option<String>,
}

impl Transcript {
    #[must_use]
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            conversation_id: None,
        }
    }
}

/// Control handle for one live stream
pub trait ConnectionHandle: Send + Sync {
    /// Terminate the stream and cancel any pending reconnect timer.
    /// Idempotent; no event is delivered from this handle after it returns.
    fn close(&self);

    /// Re-establish the stream with the same conversation and message
    fn reconnect(&self);
}

/// Opens live output streams
pub trait StreamTransport: Send + Sync {
    /// Start streaming `request`; events are delivered through `sink`.
    ///
    /// Returns as soon as the connection attempt is under way.
    ///
    /// # Errors
    ///
    /// Only failures that stop the attempt from starting at all; anything
    /// later arrives on `sink`.
    fn open(&self, request: StreamRequest, sink: EventSink) -> Result<Box<dyn ConnectionHandle>, SessionError>;
}

/// Loads persisted transcripts
#[async_trait]
pub trait TranscriptLoader: Send + Sync {
    /// # Errors
    ///
    /// [`SessionError::TranscriptLoad`] when the history cannot be fetched or read.
    async fn load_transcript(&self, instance_id: &str) -> Result<Transcript, SessionError>;
}

/// Process-wide UI feedback, fire-and-forget
pub trait FeedbackSink: Send + Sync {
    fn report_error(&self, message: &str);
    fn set_loading(&self, loading: bool);
}

// ============================================================================
// Event Sink
// ============================================================================

/// Sender handed to the transport for one connection.
///
/// Every event is tagged with the connection's generation; the session drops
/// anything from a generation that is no longer bound. Send methods return
/// `false` once the session is gone.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: Generation,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl EventSink {
    pub(crate) fn new(generation: Generation, tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { generation, tx }
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn partial_output(&self, text: impl Into<String>, complete: bool) -> bool {
        self.send(Event::PartialOutput {
            generation: self.generation,
            text: text.into(),
            complete,
        })
    }

    pub fn complete_step(&self, step: Step) -> bool {
        self.send(Event::StepCompleted {
            generation: self.generation,
            step,
        })
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.send(Event::StreamError {
            generation: self.generation,
            message: message.into(),
        })
    }

    pub fn reconnecting(&self, attempt: u32, max_attempts: u32, delay: Duration) -> bool {
        self.send(Event::Reconnecting {
            generation: self.generation,
            attempt,
            max_attempts,
            delay,
        })
    }

    pub fn max_reconnect_attempts_reached(&self) -> bool {
        self.send(Event::MaxReconnectAttemptsReached {
            generation: self.generation,
        })
    }

    pub fn finished(&self) -> bool {
        self.send(Event::Finished {
            generation: self.generation,
        })
    }

    pub fn confirmation_requested(&self, confirmation: PendingToolConfirmation) -> bool {
        self.send(Event::ToolConfirmationRequested {
            generation: self.generation,
            confirmation,
        })
    }

    fn send(&self, event: Event) -> bool {
        self.tx.send(Inbound::Machine(event)).is_ok()
    }
}

// ============================================================================
// Tracing feedback
// ============================================================================

/// Feedback sink that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFeedback;

impl FeedbackSink for TracingFeedback {
    fn report_error(&self, message: &str) {
        tracing::error!(error = %message, "Session error");
    }

    fn set_loading(&self, loading: bool) {
        tracing::debug!(loading, "Loading indicator changed");
    }
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

impl<T: StreamTransport + ?Sized> StreamTransport for Arc<T> {
    fn open(&self, request: StreamRequest, sink: EventSink) -> Result<Box<dyn ConnectionHandle>, SessionError> {
        (**self).open(request, sink)
    }
}

#[async_trait]
impl<T: TranscriptLoader + ?Sized> TranscriptLoader for Arc<T> {
    async fn load_transcript(&self, instance_id: &str) -> Result<Transcript, SessionError> {
        (**self).load_transcript(instance_id).await
    }
}

impl<T: FeedbackSink + ?Sized> FeedbackSink for Arc<T> {
    fn report_error(&self, message: &str) {
        (**self).report_error(message);
    }

    fn set_loading(&self, loading: bool) {
        (**self).set_loading(loading);
    }
}
