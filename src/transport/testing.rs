//! Mock implementations for testing
//!
//! These mocks let session tests drive streams and loads without real I/O.

use super::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

// ============================================================================
// Mock Transport
// ============================================================================

#[derive(Debug, Default)]
pub struct HandleCounters {
    closes: AtomicUsize,
    reconnects: AtomicUsize,
}

impl HandleCounters {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

struct MockHandle {
    counters: Arc<HandleCounters>,
}

impl ConnectionHandle for MockHandle {
    fn close(&self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn reconnect(&self) {
        self.counters.reconnects.fetch_add(1, Ordering::SeqCst);
    }
}

struct OpenedStream {
    request: StreamRequest,
    sink: EventSink,
    counters: Arc<HandleCounters>,
}

/// Records every open and hands the sink back to the test
#[derive(Default)]
pub struct MockTransport {
    opened: Mutex<Vec<OpenedStream>>,
    fail_next: Mutex<Option<SessionError>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` fail synchronously
    pub fn fail_next_open(&self, error: SessionError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    /// Sink for the `index`th stream opened
    pub fn sink(&self, index: usize) -> EventSink {
        self.opened.lock().unwrap()[index].sink.clone()
    }

    pub fn request(&self, index: usize) -> StreamRequest {
        self.opened.lock().unwrap()[index].request.clone()
    }

    pub fn counters(&self, index: usize) -> Arc<HandleCounters> {
        Arc::clone(&self.opened.lock().unwrap()[index].counters)
    }

    pub fn close_count(&self, index: usize) -> usize {
        self.counters(index).closes()
    }
}

impl StreamTransport for MockTransport {
    fn open(&self, request: StreamRequest, sink: EventSink) -> Result<Box<dyn ConnectionHandle>, SessionError> {
        if let Some(error) = self.fail_next.lock().unwrap().take() {
            return Err(error);
        }
        let counters = Arc::new(HandleCounters::default());
        self.opened.lock().unwrap().push(OpenedStream {
            request,
            sink,
            counters: Arc::clone(&counters),
        });
        Ok(Box::new(MockHandle { counters }))
    }
}

// ============================================================================
// Mock Transcript Loader
// ============================================================================

/// Returns canned transcripts by instance id
#[derive(Default)]
pub struct MockLoader {
    transcripts: Mutex<HashMap<String, Result<Transcript, SessionError>>>,
    pub requests: Mutex<Vec<String>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, instance_id: &str, transcript: Transcript) {
        self.transcripts
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), Ok(transcript));
    }

    pub fn insert_error(&self, instance_id: &str, error: SessionError) {
        self.transcripts
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), Err(error));
    }
}

#[async_trait]
impl TranscriptLoader for MockLoader {
    async fn load_transcript(&self, instance_id: &str) -> Result<Transcript, SessionError> {
        self.requests.lock().unwrap().push(instance_id.to_string());
        self.transcripts
            .lock()
            .unwrap()
            .get(instance_id)
            .cloned()
            .unwrap_or_else(|| Err(SessionError::transcript_load(instance_id, "not found")))
    }
}

// ============================================================================
// Recording Feedback
// ============================================================================

/// Remembers everything surfaced to the user
#[derive(Default)]
pub struct RecordingFeedback {
    pub errors: Mutex<Vec<String>>,
    pub loading: Mutex<Vec<bool>>,
}

impl RecordingFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn loading_changes(&self) -> Vec<bool> {
        self.loading.lock().unwrap().clone()
    }
}

impl FeedbackSink for RecordingFeedback {
    fn report_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn set_loading(&self, loading: bool) {
        self.loading.lock().unwrap().push(loading);
    }
}
