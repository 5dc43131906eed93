//! Session: owns the execution state and executes state machine effects
//!
//! All mutation happens on whichever task owns the [`Session`]. Transport
//! callbacks, cancel capabilities and transcript loads only ever enqueue an
//! [`Inbound`] message; the owner applies them in arrival order through
//! [`Session::process_next`] or [`Session::drain_pending`].

mod selector;
mod view;


pub use selector::parse_conversation_id;
pub use view::SessionView;

use crate::accumulator::{reduce, PartialOutput};
use crate::config::SessionConfig;
use crate::confirmation::{ConfirmationQueue, Decision, ToolDecision};
use crate::error::SessionError;
use crate::ledger::{Step, StepLedger};
use crate::state_machine::{transition, Effect, Event, ExecutionState, Generation};
use crate::transport::{
    ConnectionHandle, EventSink, FeedbackSink, StreamRequest, StreamTransport, Transcript, TranscriptLoader,
};
use chrono::Utc;
use selector::Selection;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Messages delivered to the session from outside the owning task
#[derive(Debug)]
pub enum Inbound {
    Machine(Event),
    TranscriptLoaded {
        selection: u64,
        instance_id: String,
        result: Result<Transcript, SessionError>,
    },
}

/// Cancels one specific execution.
///
/// Bound to the connection generation that was current when it was issued;
/// once a newer execution has begun, cancelling through it does nothing.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    generation: Generation,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl CancelHandle {
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Request cancellation; applied the next time the session drains its queue
    pub fn cancel(&self) {
        let _ = self.tx.send(Inbound::Machine(Event::Cancel {
            generation: Some(self.generation),
        }));
    }
}

struct BoundConnection {
    generation: Generation,
    handle: Box<dyn ConnectionHandle>,
}

/// One UI session: execution state, transcript, streaming output and
/// pending tool confirmations
pub struct Session<T, L, F>
where
    T: StreamTransport,
    L: TranscriptLoader + 'static,
    F: FeedbackSink,
{
    config: SessionConfig,
    state: ExecutionState,
    output: PartialOutput,
    ledger: StepLedger,
    confirmations: ConfirmationQueue,
    connection: Option<BoundConnection>,
    last_generation: Generation,
    selection: Selection,
    transport: T,
    loader: Arc<L>,
    feedback: F,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: mpsc::UnboundedReceiver<Inbound>,
    view_tx: watch::Sender<SessionView>,
}

impl<T, L, F> Session<T, L, F>
where
    T: StreamTransport,
    L: TranscriptLoader + 'static,
    F: FeedbackSink,
{
    #[must_use]
    pub fn new(config: SessionConfig, transport: T, loader: L, feedback: F) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (view_tx, _) = watch::channel(SessionView::default());
        Self {
            config,
            state: ExecutionState::default(),
            output: PartialOutput::default(),
            ledger: StepLedger::new(),
            confirmations: ConfirmationQueue::new(),
            connection: None,
            last_generation: Generation(0),
            selection: Selection::default(),
            transport,
            loader: Arc::new(loader),
            feedback,
            inbox_tx,
            inbox_rx,
            view_tx,
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Send `message` to `conversation_id` and start streaming the reply.
    ///
    /// A live execution is force-closed first.
    pub fn begin_execution(&mut self, conversation_id: impl Into<String>, message: impl Into<String>) -> CancelHandle {
        let generation = self.last_generation.next();
        self.last_generation = generation;
        let conversation_id = conversation_id.into();

        tracing::info!(%conversation_id, %generation, "Beginning execution");
        let user_step = Step::user(&self.config.user_originator, message, Utc::now());
        self.process(Event::Begin {
            conversation_id,
            generation,
            user_step,
        });

        CancelHandle {
            generation,
            tx: self.inbox_tx.clone(),
        }
    }

    /// Cancel whatever is running. A no-op when idle.
    pub fn cancel_execution(&mut self) {
        self.process(Event::Cancel { generation: None });
    }

    /// Cancel through a captured capability, immediately
    pub fn cancel(&mut self, handle: &CancelHandle) {
        self.process(Event::Cancel {
            generation: Some(handle.generation),
        });
    }

    /// Ask the bound connection to re-establish its stream
    pub fn reconnect(&self) {
        match &self.connection {
            Some(bound) => {
                tracing::info!(generation = %bound.generation, "Reconnect requested");
                bound.handle.reconnect();
            }
            None => tracing::debug!("Reconnect requested with no live connection"),
        }
    }

    /// Cancel and return every piece of state to its initial value
    pub fn reset_current_flow(&mut self) {
        self.cancel_execution();
        if self.selection.invalidate() {
            self.feedback.set_loading(false);
        }
        self.process(Event::Reset);
    }

    /// Record the user's answer to a pending tool confirmation
    pub fn resolve_confirmation(&mut self, id: &str, decision: Decision) -> Option<ToolDecision> {
        let resolved = self.confirmations.resolve(id, decision);
        match &resolved {
            Some(resolved) => tracing::info!(
                id,
                tool = %resolved.confirmation.tool_name,
                confirmed = resolved.confirmed(),
                "Tool confirmation resolved"
            ),
            None => tracing::debug!(id, "No pending confirmation with this id"),
        }
        self.publish();
        resolved
    }

    /// Wait for the next inbound message and apply it
    pub async fn process_next(&mut self) {
        if let Some(inbound) = self.inbox_rx.recv().await {
            self.handle_inbound(inbound);
        }
    }

    /// Apply everything already queued without waiting. Returns how many
    /// messages were handled.
    pub fn drain_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(inbound) = self.inbox_rx.try_recv() {
            self.handle_inbound(inbound);
            handled += 1;
        }
        handled
    }

    /// Close any live stream and drop the session
    pub fn teardown(mut self) {
        self.reset_current_flow();
        tracing::info!("Session torn down");
    }

    // ========================================================================
    // Read access
    // ========================================================================

    /// Receiver of [`SessionView`] snapshots
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_tx.subscribe()
    }

    #[must_use]
    pub fn view(&self) -> SessionView {
        SessionView::project(
            &self.state,
            &self.output,
            &self.ledger,
            &self.confirmations,
            self.selection.instance_id(),
            self.selection.is_loading(),
        )
    }

    #[must_use]
    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.state.is_executing()
    }

    #[must_use]
    pub fn partial_output(&self) -> &PartialOutput {
        &self.output
    }

    #[must_use]
    pub fn ledger(&self) -> &StepLedger {
        &self.ledger
    }

    #[must_use]
    pub fn latest_step(&self) -> Option<&Step> {
        self.ledger.latest_step()
    }

    #[must_use]
    pub fn confirmations(&self) -> &ConfirmationQueue {
        &self.confirmations
    }

    #[must_use]
    pub fn selected_instance(&self) -> Option<&str> {
        self.selection.instance_id()
    }

    // ========================================================================
    // Event loop internals
    // ========================================================================

    fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Machine(event) => self.process(event),
            Inbound::TranscriptLoaded {
                selection,
                instance_id,
                result,
            } => self.on_transcript_loaded(selection, &instance_id, result),
        }
    }

    /// Run `event` through the state machine, executing effects and any
    /// events they generate, then publish the new view.
    fn process(&mut self, event: Event) {
        let mut events_to_process = VecDeque::from([event]);

        while let Some(current_event) = events_to_process.pop_front() {
            if let Event::Reconnecting {
                generation,
                attempt,
                max_attempts,
                delay,
            } = &current_event
            {
                tracing::debug!(%generation, attempt, max_attempts, ?delay, "Transport reconnecting");
            }

            let result = match transition(&self.state, current_event) {
                Ok(result) => result,
                Err(e) => {
                    // Late deliveries from superseded connections land here
                    tracing::debug!(error = %e, "Event rejected");
                    continue;
                }
            };

            if result.new_state.phase != self.state.phase {
                tracing::debug!(
                    from = self.state.phase.label(),
                    to = result.new_state.phase.label(),
                    "Execution phase changed"
                );
            }
            self.state = result.new_state;

            for effect in result.effects {
                if let Some(generated) = self.execute_effect(effect) {
                    events_to_process.push_back(generated);
                }
            }
        }

        self.publish();
    }

    fn execute_effect(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::OpenStream {
                generation,
                conversation_id,
                message,
            } => {
                let request = StreamRequest {
                    conversation_id,
                    instance_id: self.selection.instance_id().map(str::to_string),
                    message,
                };
                let sink = EventSink::new(generation, self.inbox_tx.clone());
                match self.transport.open(request, sink) {
                    Ok(handle) => {
                        self.connection = Some(BoundConnection { generation, handle });
                        Some(Event::Opened { generation })
                    }
                    Err(e) => {
                        tracing::warn!(%generation, error = %e, "Failed to open stream");
                        Some(Event::StreamError {
                            generation,
                            message: e.to_string(),
                        })
                    }
                }
            }

            Effect::CloseConnection { generation } => {
                match self.connection.take() {
                    Some(bound) if bound.generation == generation => {
                        tracing::debug!(%generation, "Closing connection");
                        bound.handle.close();
                    }
                    other => self.connection = other,
                }
                None
            }

            Effect::AppendStep(step) => {
                tracing::debug!(step_id = %step.id, originator = %step.originator_id, "Step recorded");
                self.ledger.append(step);
                None
            }

            Effect::UpdateOutput(event) => {
                self.output = reduce(&self.output, event);
                None
            }

            Effect::ReportError { message } => {
                tracing::error!(error = %message, "Execution failed");
                self.feedback.report_error(&message);
                None
            }

            Effect::EnqueueConfirmation(confirmation) => {
                let id = confirmation.id.clone();
                if self.confirmations.enqueue(confirmation) {
                    tracing::info!(%id, "Tool confirmation requested");
                } else {
                    tracing::debug!(%id, "Duplicate tool confirmation ignored");
                }
                None
            }

            Effect::ClearTranscript => {
                self.ledger.clear();
                None
            }

            Effect::ClearConfirmations => {
                self.confirmations.clear();
                None
            }
        }
    }

    fn publish(&self) {
        let view = self.view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }
}
