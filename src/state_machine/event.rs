//! Events that drive the execution state machine

use super::state::Generation;
use crate::confirmation::PendingToolConfirmation;
use crate::ledger::Step;
use std::time::Duration;

/// Events that trigger state transitions.
///
/// Stream events carry the generation of the connection that produced them so
/// late deliveries from a superseded connection can be rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // User events
    Begin {
        conversation_id: String,
        generation: Generation,
        /// Local echo of the message, already timestamped
        user_step: Step,
    },
    /// `generation: None` cancels whatever is bound
    Cancel {
        generation: Option<Generation>,
    },
    Reset,

    // Transport events
    Opened {
        generation: Generation,
    },
    PartialOutput {
        generation: Generation,
        text: String,
        complete: bool,
    },
    StepCompleted {
        generation: Generation,
        step: Step,
    },
    StreamError {
        generation: Generation,
        message: String,
    },
    Reconnecting {
        generation: Generation,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    MaxReconnectAttemptsReached {
        generation: Generation,
    },
    /// Server ended the stream normally
    Finished {
        generation: Generation,
    },
    ToolConfirmationRequested {
        generation: Generation,
        confirmation: PendingToolConfirmation,
    },

    // Selector events
    TranscriptAttached {
        conversation_id: String,
    },
}

impl Event {
    /// Generation this event is bound to, if any
    #[must_use]
    pub fn generation(&self) -> Option<Generation> {
        match self {
            Event::Begin { generation, .. }
            | Event::Opened { generation }
            | Event::PartialOutput { generation, .. }
            | Event::StepCompleted { generation, .. }
            | Event::StreamError { generation, .. }
            | Event::Reconnecting { generation, .. }
            | Event::MaxReconnectAttemptsReached { generation }
            | Event::Finished { generation }
            | Event::ToolConfirmationRequested { generation, .. } => Some(*generation),
            Event::Cancel { generation } => *generation,
            Event::Reset | Event::TranscriptAttached { .. } => None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Event::Begin { .. } => "begin",
            Event::Cancel { .. } => "cancel",
            Event::Reset => "reset",
            Event::Opened { .. } => "opened",
            Event::PartialOutput { .. } => "partial_output",
            Event::StepCompleted { .. } => "complete_step",
            Event::StreamError { .. } => "error",
            Event::Reconnecting { .. } => "reconnecting",
            Event::MaxReconnectAttemptsReached { .. } => "max_reconnect_attempts_reached",
            Event::Finished { .. } => "finished",
            Event::ToolConfirmationRequested { .. } => "tool_confirmation_requested",
            Event::TranscriptAttached { .. } => "transcript_attached",
        }
    }
}
