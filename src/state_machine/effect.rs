//! Effects produced by state transitions

use super::state::Generation;
use crate::accumulator::OutputEvent;
use crate::confirmation::PendingToolConfirmation;
use crate::ledger::Step;

/// Effects to be executed by the session after a state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a stream and bind its handle to `generation`
    OpenStream {
        generation: Generation,
        conversation_id: String,
        message: String,
    },

    /// Close and release the handle bound to `generation`
    CloseConnection { generation: Generation },

    /// Append a step to the ledger
    AppendStep(Step),

    /// Feed the output accumulator
    UpdateOutput(OutputEvent),

    /// Surface an error through the feedback sink
    ReportError { message: String },

    /// Queue a tool confirmation for the user
    EnqueueConfirmation(PendingToolConfirmation),

    /// Empty the ledger
    ClearTranscript,

    /// Drop every pending confirmation
    ClearConfirmations,
}

impl Effect {
    #[must_use]
    pub fn output(event: OutputEvent) -> Self {
        Effect::UpdateOutput(event)
    }

    #[must_use]
    pub fn close(generation: Generation) -> Self {
        Effect::CloseConnection { generation }
    }

    #[must_use]
    pub fn report_error(message: impl Into<String>) -> Self {
        Effect::ReportError {
            message: message.into(),
        }
    }
}
