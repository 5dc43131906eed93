//! Pure state transition function

use super::{Effect, Event, ExecutionPhase, ExecutionState, Generation};
use crate::accumulator::OutputEvent;
use crate::error::{ErrorKind, SessionError};
use thiserror::Error;

/// Terminal message when the transport gives up reconnecting
pub const MAX_RECONNECT_MESSAGE: &str = "Connection lost: maximum reconnection attempts reached";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ExecutionState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    #[must_use]
    pub fn new(state: ExecutionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    /// State unchanged, nothing to do
    #[must_use]
    pub fn unchanged(state: &ExecutionState) -> Self {
        Self::new(state.clone())
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    #[must_use]
    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("{event} for connection {generation} ignored (bound: {})", describe(.current))]
    StaleGeneration {
        event: &'static str,
        generation: Generation,
        current: Option<Generation>,
    },
    #[error("connection {generation} is not newer than bound connection {current}")]
    GenerationNotMonotonic {
        generation: Generation,
        current: Generation,
    },
}

fn describe(current: &Option<Generation>) -> String {
    current.map_or_else(|| "none".to_string(), |g| g.to_string())
}

impl From<TransitionError> for SessionError {
    fn from(err: TransitionError) -> Self {
        SessionError::CallerMisuse(err.to_string())
    }
}

/// Pure transition function.
///
/// Given the same inputs it always produces the same outputs. Every arm
/// preserves `state.connection.is_some() == state.is_executing()`.
///
/// # Errors
///
/// Events tagged with a superseded generation, and a `Begin` whose generation
/// does not advance past the bound one.
pub fn transition(state: &ExecutionState, event: Event) -> Result<TransitionResult, TransitionError> {
    let event_name = event.name();
    let stale = |generation: Generation| TransitionError::StaleGeneration {
        event: event_name,
        generation,
        current: state.connection,
    };

    match event {
        // ============================================================
        // Starting an execution
        // ============================================================
        Event::Begin {
            conversation_id,
            generation,
            user_step,
        } => {
            let mut result = TransitionResult::new(ExecutionState {
                phase: ExecutionPhase::Starting,
                error: None,
                conversation_id: Some(conversation_id.clone()),
                connection: Some(generation),
            });

            // A live handle is force-closed before the new one is opened
            if let Some(current) = state.connection {
                if generation <= current {
                    return Err(TransitionError::GenerationNotMonotonic {
                        generation,
                        current,
                    });
                }
                result = result.with_effect(Effect::close(current));
            }

            let message = user_step.input.clone().unwrap_or_default();
            Ok(result
                .with_effect(Effect::output(OutputEvent::Started))
                .with_effect(Effect::AppendStep(user_step))
                .with_effect(Effect::OpenStream {
                    generation,
                    conversation_id,
                    message,
                }))
        }

        Event::Opened { generation } if state.is_current(generation) => {
            if state.phase == ExecutionPhase::Starting {
                Ok(TransitionResult::new(ExecutionState {
                    phase: ExecutionPhase::Streaming,
                    ..state.clone()
                }))
            } else {
                Ok(TransitionResult::unchanged(state))
            }
        }

        // ============================================================
        // Stream output
        // ============================================================
        Event::PartialOutput {
            generation,
            text,
            complete,
        } if state.is_current(generation) => Ok(TransitionResult::new(streaming(state))
            .with_effect(Effect::output(OutputEvent::Partial { text, complete }))),

        // The step is recorded even if an error follows in the same batch:
        // events are applied strictly in arrival order.
        Event::StepCompleted { generation, step } if state.is_current(generation) => {
            Ok(TransitionResult::new(streaming(state))
                .with_effect(Effect::output(OutputEvent::Completed {
                    originator_id: step.originator_id.clone(),
                }))
                .with_effect(Effect::AppendStep(step)))
        }

        Event::ToolConfirmationRequested {
            generation,
            confirmation,
        } if state.is_current(generation) => {
            Ok(TransitionResult::unchanged(state).with_effect(Effect::EnqueueConfirmation(confirmation)))
        }

        // ============================================================
        // Transport failures and recovery
        // ============================================================
        Event::Reconnecting {
            generation,
            attempt,
            max_attempts,
            ..
        } if state.is_current(generation) => Ok(TransitionResult::new(ExecutionState {
            phase: ExecutionPhase::Reconnecting {
                attempt,
                max_attempts,
            },
            ..state.clone()
        })),

        Event::StreamError {
            generation,
            message,
        } if state.is_current(generation) => Ok(fail(state, generation, ErrorKind::Transport, message)),

        Event::MaxReconnectAttemptsReached { generation } if state.is_current(generation) => Ok(fail(
            state,
            generation,
            ErrorKind::MaxReconnectExceeded,
            MAX_RECONNECT_MESSAGE.to_string(),
        )),

        // ============================================================
        // Completion and cancellation
        // ============================================================
        Event::Finished { generation } if state.is_current(generation) => Ok(release(state, generation)),

        Event::Cancel { generation: None } => match state.connection {
            Some(current) => Ok(release(state, current)),
            None => Ok(TransitionResult::unchanged(state)),
        },

        Event::Cancel {
            generation: Some(generation),
        } if state.is_current(generation) => Ok(release(state, generation)),

        Event::Reset => {
            let closing = state.connection.map(Effect::close);
            Ok(TransitionResult::new(ExecutionState::default())
                .with_effects(closing)
                .with_effect(Effect::output(OutputEvent::Reset))
                .with_effect(Effect::ClearTranscript)
                .with_effect(Effect::ClearConfirmations))
        }

        // ============================================================
        // Instance selection
        // ============================================================
        Event::TranscriptAttached { conversation_id } => {
            if state.conversation_id.is_some() {
                Ok(TransitionResult::unchanged(state))
            } else {
                Ok(TransitionResult::new(ExecutionState {
                    conversation_id: Some(conversation_id),
                    ..state.clone()
                }))
            }
        }

        // ============================================================
        // Events from a connection that is no longer bound
        // ============================================================
        Event::Opened { generation }
        | Event::PartialOutput { generation, .. }
        | Event::StepCompleted { generation, .. }
        | Event::ToolConfirmationRequested { generation, .. }
        | Event::Reconnecting { generation, .. }
        | Event::StreamError { generation, .. }
        | Event::MaxReconnectAttemptsReached { generation }
        | Event::Finished { generation }
        | Event::Cancel {
            generation: Some(generation),
        } => Err(stale(generation)),
    }
}

// Helper functions

/// Data is flowing again: any reconnect or start phase becomes streaming
fn streaming(state: &ExecutionState) -> ExecutionState {
    ExecutionState {
        phase: ExecutionPhase::Streaming,
        ..state.clone()
    }
}

/// Release the connection and return to idle
fn release(state: &ExecutionState, generation: Generation) -> TransitionResult {
    TransitionResult::new(ExecutionState {
        phase: ExecutionPhase::Idle,
        connection: None,
        ..state.clone()
    })
    .with_effect(Effect::close(generation))
    .with_effect(Effect::output(OutputEvent::Settled))
}

/// Release the connection and surface a terminal error
fn fail(state: &ExecutionState, generation: Generation, error_kind: ErrorKind, message: String) -> TransitionResult {
    TransitionResult::new(ExecutionState {
        phase: ExecutionPhase::Failed { error_kind },
        error: Some(message.clone()),
        connection: None,
        conversation_id: state.conversation_id.clone(),
    })
    .with_effect(Effect::close(generation))
    .with_effect(Effect::output(OutputEvent::Settled))
    .with_effect(Effect::report_error(message))
}
