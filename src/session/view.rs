//! Read-only projections for the rendering layer

use crate::accumulator::PartialOutput;
use crate::confirmation::{ConfirmationQueue, PendingToolConfirmation};
use crate::ledger::{Step, StepLedger};
use crate::state_machine::{ExecutionPhase, ExecutionState};
use serde::Serialize;

/// Snapshot of everything the UI renders, recomputed after every operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub phase: ExecutionPhase,
    pub is_executing: bool,
    pub execution_error: Option<String>,
    pub current_conversation_id: Option<String>,
    pub current_instance_id: Option<String>,
    pub latest_step: Option<Step>,
    pub current_streaming_text: String,
    pub is_streaming_complete: bool,
    pub step_count: usize,
    pub pending_confirmations: Vec<PendingToolConfirmation>,
    pub loading: bool,
}

impl Default for SessionView {
    fn default() -> Self {
        Self::project(
            &ExecutionState::default(),
            &PartialOutput::default(),
            &StepLedger::new(),
            &ConfirmationQueue::new(),
            None,
            false,
        )
    }
}

impl SessionView {
    pub(crate) fn project(
        state: &ExecutionState,
        output: &PartialOutput,
        ledger: &StepLedger,
        confirmations: &ConfirmationQueue,
        instance_id: Option<&str>,
        loading: bool,
    ) -> Self {
        Self {
            phase: state.phase.clone(),
            is_executing: state.is_executing(),
            execution_error: state.error.clone(),
            current_conversation_id: state.conversation_id.clone(),
            current_instance_id: instance_id.map(str::to_string),
            latest_step: ledger.latest_step().cloned(),
            current_streaming_text: output.text.clone(),
            is_streaming_complete: output.complete,
            step_count: ledger.len(),
            pending_confirmations: confirmations.iter().cloned().collect(),
            loading,
        }
    }

    /// Oldest confirmation still waiting on the user
    #[must_use]
    pub fn next_confirmation(&self) -> Option<&PendingToolConfirmation> {
        self.pending_confirmations.first()
    }
}
