//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across arbitrary event sequences.

use super::state::*;
use super::transition::*;
use super::*;
use crate::accumulator::{reduce, PartialOutput};
use crate::confirmation::PendingToolConfirmation;
use crate::error::ErrorKind;
use crate::ledger::{Step, StepLedger, StepRole};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::time::Duration;

// ============================================================================
// Test Helpers
// ============================================================================

fn fixed_step(id: String, originator: String) -> Step {
    Step {
        id,
        originator_id: originator,
        timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        role: StepRole::Assistant,
        input: None,
        response: "ok".to_string(),
        next_originator: None,
    }
}

/// Minimal effect interpreter: the parts of the session that are pure
struct Model {
    state: ExecutionState,
    output: PartialOutput,
    ledger: StepLedger,
    reported: usize,
}

impl Model {
    fn new() -> Self {
        Self {
            state: ExecutionState::default(),
            output: PartialOutput::default(),
            ledger: StepLedger::new(),
            reported: 0,
        }
    }

    fn apply(&mut self, event: Event) {
        let Ok(result) = transition(&self.state, event) else {
            return;
        };
        self.state = result.new_state;
        for effect in result.effects {
            match effect {
                Effect::AppendStep(step) => self.ledger.append(step),
                Effect::UpdateOutput(event) => self.output = reduce(&self.output, event),
                Effect::ReportError { .. } => self.reported += 1,
                Effect::ClearTranscript => self.ledger.clear(),
                Effect::OpenStream { .. }
                | Effect::CloseConnection { .. }
                | Effect::EnqueueConfirmation(_)
                | Effect::ClearConfirmations => {}
            }
        }
    }
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_generation() -> impl Strategy<Value = Generation> {
    (1u64..6).prop_map(Generation)
}

fn arb_step() -> impl Strategy<Value = Step> {
    ("[a-z]{8}", "[a-z_]{1,12}").prop_map(|(id, originator)| fixed_step(id, originator))
}

fn arb_begin() -> impl Strategy<Value = Event> {
    ("[a-z0-9]{1,8}", arb_generation(), "[a-zA-Z ]{1,20}").prop_map(|(conv, generation, message)| {
        Event::Begin {
            conversation_id: conv,
            generation,
            user_step: Step::user("user", message, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
        }
    })
}

fn arb_stream_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        arb_generation().prop_map(|generation| Event::Opened { generation }),
        (arb_generation(), "[a-zA-Z ]{0,30}", any::<bool>()).prop_map(|(generation, text, complete)| {
            Event::PartialOutput {
                generation,
                text,
                complete,
            }
        }),
        (arb_generation(), arb_step()).prop_map(|(generation, step)| Event::StepCompleted { generation, step }),
        (arb_generation(), "[a-z ]{1,20}").prop_map(|(generation, message)| Event::StreamError { generation, message }),
        (arb_generation(), 1u32..4).prop_map(|(generation, attempt)| Event::Reconnecting {
            generation,
            attempt,
            max_attempts: 3,
            delay: Duration::from_millis(u64::from(attempt) * 100),
        }),
        arb_generation().prop_map(|generation| Event::MaxReconnectAttemptsReached { generation }),
        arb_generation().prop_map(|generation| Event::Finished { generation }),
        (arb_generation(), "[a-z]{6}").prop_map(|(generation, id)| Event::ToolConfirmationRequested {
            generation,
            confirmation: PendingToolConfirmation {
                tool_execution_id: Some(id.clone()),
                id,
                tool_name: "calculator".to_string(),
                tool_input: serde_json::json!({}),
                timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            },
        }),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        3 => arb_stream_event(),
        1 => arb_begin(),
        1 => proptest::option::of(arb_generation()).prop_map(|generation| Event::Cancel { generation }),
        1 => Just(Event::Reset),
        1 => "[a-z0-9]{1,8}".prop_map(|conversation_id| Event::TranscriptAttached { conversation_id }),
    ]
}

fn arb_state() -> impl Strategy<Value = ExecutionState> {
    let idle = Just(ExecutionState::default());
    let active = (
        prop_oneof![
            Just(ExecutionPhase::Starting),
            Just(ExecutionPhase::Streaming),
            (1u32..4).prop_map(|attempt| ExecutionPhase::Reconnecting {
                attempt,
                max_attempts: 3
            }),
        ],
        arb_generation(),
        "[a-z0-9]{1,8}",
    )
        .prop_map(|(phase, generation, conv)| ExecutionState {
            phase,
            error: None,
            conversation_id: Some(conv),
            connection: Some(generation),
        });
    let failed = ("[a-z ]{1,20}", "[a-z0-9]{1,8}").prop_map(|(message, conv)| ExecutionState {
        phase: ExecutionPhase::Failed {
            error_kind: ErrorKind::Transport,
        },
        error: Some(message),
        conversation_id: Some(conv),
        connection: None,
    });
    prop_oneof![idle, active, failed]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    /// Invariant: a handle is bound exactly while executing, after every transition
    #[test]
    fn prop_connection_bound_iff_executing(state in arb_state(), event in arb_event()) {
        prop_assume!(state.is_consistent());
        if let Ok(result) = transition(&state, event) {
            prop_assert!(
                result.new_state.is_consistent(),
                "inconsistent state {:?}",
                result.new_state
            );
        }
    }

    /// Invariant: the invariant survives whole sequences
    #[test]
    fn prop_connection_invariant_over_sequences(events in proptest::collection::vec(arb_event(), 1..40)) {
        let mut model = Model::new();
        for event in events {
            model.apply(event);
            prop_assert!(model.state.is_consistent());
        }
    }

    /// Events for a generation other than the bound one never change anything
    #[test]
    fn prop_stale_events_rejected(state in arb_state(), event in arb_stream_event()) {
        let generation = event.generation().unwrap();
        prop_assume!(!state.is_current(generation));
        prop_assert!(
            matches!(
                transition(&state, event),
                Err(TransitionError::StaleGeneration { .. })
            ),
            "expected stale rejection"
        );
    }

    /// Streaming text always equals the most recent partial and stays incomplete
    /// until a chunk says otherwise
    #[test]
    fn prop_streaming_text_tracks_latest_partial(
        chunks in proptest::collection::vec("[a-zA-Z ]{0,30}", 1..20)
    ) {
        let mut model = Model::new();
        model.apply(Event::Begin {
            conversation_id: "flow42".to_string(),
            generation: Generation(1),
            user_step: Step::user("user", "hi", Utc::now()),
        });
        model.apply(Event::Opened { generation: Generation(1) });

        for chunk in &chunks {
            model.apply(Event::PartialOutput {
                generation: Generation(1),
                text: chunk.clone(),
                complete: false,
            });
            prop_assert_eq!(&model.output.text, chunk);
            prop_assert!(!model.output.complete);
        }
    }

    /// A cancel captured for an older execution never disturbs the newer one
    #[test]
    fn prop_stale_cancel_leaves_newer_execution(first in 1u64..100, gap in 1u64..10) {
        let mut model = Model::new();
        let older = Generation(first);
        let newer = Generation(first + gap);

        for generation in [older, newer] {
            model.apply(Event::Begin {
                conversation_id: "flow42".to_string(),
                generation,
                user_step: Step::user("user", "go", Utc::now()),
            });
        }
        model.apply(Event::Cancel { generation: Some(older) });

        prop_assert!(model.state.is_executing());
        prop_assert_eq!(model.state.connection, Some(newer));
    }

    /// Reset always yields the initial tuple regardless of history
    #[test]
    fn prop_reset_yields_initial_values(events in proptest::collection::vec(arb_event(), 0..30)) {
        let mut model = Model::new();
        for event in events {
            model.apply(event);
        }
        model.apply(Event::Reset);

        prop_assert_eq!(&model.state, &ExecutionState::default());
        prop_assert_eq!(&model.output, &PartialOutput::default());
        prop_assert!(model.ledger.is_empty());
    }

    /// Accumulator is only incomplete while a stream is bound
    #[test]
    fn prop_incomplete_output_only_while_streaming(events in proptest::collection::vec(arb_event(), 1..40)) {
        let mut model = Model::new();
        for event in events {
            model.apply(event);
            if !model.output.complete {
                prop_assert!(model.state.is_executing());
            }
        }
    }

    /// Cancel with nothing active never reports and never changes state
    #[test]
    fn prop_double_cancel_is_silent(events in proptest::collection::vec(arb_event(), 0..20)) {
        let mut model = Model::new();
        for event in events {
            model.apply(event);
        }
        model.apply(Event::Cancel { generation: None });
        let settled = model.state.clone();
        let reported = model.reported;

        model.apply(Event::Cancel { generation: None });
        prop_assert_eq!(&model.state, &settled);
        prop_assert_eq!(model.reported, reported);
        prop_assert!(!model.state.is_executing());
    }
}

#[test]
fn test_user_step_then_completed_step_order() {
    let mut model = Model::new();
    model.apply(Event::Begin {
        conversation_id: "flow42".to_string(),
        generation: Generation(1),
        user_step: Step::user("user", "hello", Utc::now()),
    });
    model.apply(Event::Opened { generation: Generation(1) });
    let completed = fixed_step("s-1".to_string(), "assistant".to_string());
    model.apply(Event::StepCompleted {
        generation: Generation(1),
        step: completed.clone(),
    });

    let steps = model.ledger.as_slice();
    assert_eq!(steps.len(), 2);
    assert!(steps[0].is_user());
    assert_eq!(model.ledger.latest_step(), Some(&completed));
}

#[test]
fn test_step_then_error_in_same_batch_keeps_step() {
    let mut model = Model::new();
    model.apply(Event::Begin {
        conversation_id: "flow42".to_string(),
        generation: Generation(1),
        user_step: Step::user("user", "hello", Utc::now()),
    });
    let completed = fixed_step("final".to_string(), "assistant".to_string());
    model.apply(Event::StepCompleted {
        generation: Generation(1),
        step: completed.clone(),
    });
    model.apply(Event::StreamError {
        generation: Generation(1),
        message: "connection reset".to_string(),
    });

    assert_eq!(model.ledger.latest_step(), Some(&completed));
    assert_eq!(model.state.error.as_deref(), Some("connection reset"));
    assert!(!model.state.is_executing());
    assert_eq!(model.reported, 1);
}
