//! Switching the active conversation instance

use super::{Inbound, Session};
use crate::error::SessionError;
use crate::state_machine::Event;
use crate::transport::{FeedbackSink, StreamTransport, Transcript, TranscriptLoader};
use std::sync::Arc;

/// Which instance is selected, and whether its transcript is still loading.
///
/// Every selection bumps `counter`; load results carry the counter value they
/// were started under and are dropped if it moved on.
#[derive(Debug, Default)]
pub(super) struct Selection {
    counter: u64,
    instance_id: Option<String>,
    loading: bool,
}

impl Selection {
    /// Start a new selection and return its token
    fn begin(&mut self, instance_id: Option<&str>) -> u64 {
        self.counter += 1;
        self.instance_id = instance_id.map(str::to_string);
        self.loading = instance_id.is_some();
        self.counter
    }

    /// Forget the current selection. Returns true if a load was pending.
    pub(super) fn invalidate(&mut self) -> bool {
        let was_loading = self.loading;
        self.begin(None);
        was_loading
    }

    fn is_current(&self, token: u64) -> bool {
        self.counter == token
    }

    pub(super) fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub(super) fn is_loading(&self) -> bool {
        self.loading
    }
}

/// Owning conversation of an instance: the leading segment before the first
/// `separator` (`"flow42-abc123"` belongs to `"flow42"`).
#[must_use]
pub fn parse_conversation_id(instance_id: &str, separator: char) -> Option<&str> {
    instance_id.split(separator).next().filter(|head| !head.is_empty())
}

impl<T, L, F> Session<T, L, F>
where
    T: StreamTransport,
    L: TranscriptLoader + 'static,
    F: FeedbackSink,
{
    /// Switch to `instance_id` (or to nothing), tearing down any live stream
    /// and loading the instance's persisted transcript.
    pub fn select_instance(&mut self, instance_id: Option<&str>) {
        tracing::info!(instance_id = ?instance_id, "Selecting instance");
        self.cancel_execution();
        let was_loading = self.selection.is_loading();
        self.process(Event::Reset);

        let token = self.selection.begin(instance_id);
        let Some(instance_id) = instance_id else {
            if was_loading {
                self.feedback.set_loading(false);
            }
            self.publish();
            return;
        };

        if !was_loading {
            self.feedback.set_loading(true);
        }
        self.publish();

        let instance_id = instance_id.to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let loader = Arc::clone(&self.loader);
                let tx = self.inbox_tx.clone();
                runtime.spawn(async move {
                    let result = loader.load_transcript(&instance_id).await;
                    let _ = tx.send(Inbound::TranscriptLoaded {
                        selection: token,
                        instance_id,
                        result,
                    });
                });
            }
            Err(e) => {
                let error = SessionError::transcript_load(&instance_id, format!("no async runtime: {e}"));
                self.on_transcript_loaded(token, &instance_id, Err(error));
            }
        }
    }

    pub(super) fn on_transcript_loaded(
        &mut self,
        token: u64,
        instance_id: &str,
        result: Result<Transcript, SessionError>,
    ) {
        if !self.selection.is_current(token) {
            tracing::debug!(instance_id, "Dropping transcript for superseded selection");
            return;
        }
        self.selection.loading = false;
        self.feedback.set_loading(false);

        match result {
            Ok(transcript) => {
                let loaded = transcript.steps.len();
                let conversation_id = transcript.conversation_id.or_else(|| {
                    parse_conversation_id(instance_id, self.config.instance_separator).map(str::to_string)
                });

                // Loaded history goes before anything that arrived meanwhile
                let arrived = self.ledger.take();
                self.ledger.replace_all(transcript.steps);
                for step in arrived {
                    self.ledger.append(step);
                }
                tracing::info!(instance_id, steps = loaded, "Transcript loaded");

                if loaded > 0 {
                    if let Some(conversation_id) = conversation_id {
                        self.process(Event::TranscriptAttached { conversation_id });
                    }
                }
            }
            Err(e) => {
                tracing::error!(instance_id, error = %e, "Failed to load transcript");
                self.feedback.report_error(&e.to_string());
            }
        }
        self.publish();
    }
}
