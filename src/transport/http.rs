//! HTTP transport: server-sent event streams and history loading

use super::{ConnectionHandle, EventSink, StreamRequest, StreamTransport, Transcript, TranscriptLoader};
use crate::config::TransportConfig;
use crate::confirmation::{PendingToolConfirmation, ToolDecision};
use crate::error::SessionError;
use crate::ledger::Step;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use rand::Rng;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// `next_agent` marker on a step that is waiting for the user to approve a tool
pub const AWAITING_TOOL_CONFIRMATION: &str = "AWAITING_TOOL_CONFIRMATION";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Streams flow output over SSE and loads transcripts over plain HTTP
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built (TLS backend initialisation).
    pub fn new(config: TransportConfig) -> Result<Self, SessionError> {
        // No overall timeout: it would cut long-running streams
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SessionError::transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Start a fresh conversation instance of `flow_id`.
    ///
    /// The backend refuses to execute against an instance it has not created,
    /// so a new conversation starts here before the first message is sent.
    ///
    /// # Errors
    ///
    /// Transport errors, non-success statuses (404 for an unknown flow), and
    /// replies without an instance id.
    pub async fn create_instance(&self, flow_id: &str) -> Result<CreatedInstance, SessionError> {
        let response = self
            .client
            .post(self.url("flow/create_instance"))
            .timeout(self.config.request_timeout)
            .json(&CreateInstanceRequest { flow_id })
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SessionError::network(format!("Failed to read response: {e}")))?;
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let created: CreatedInstance = serde_json::from_str(&text)
            .map_err(|e| SessionError::transport(format!("Failed to parse created instance: {e}")))?;
        tracing::info!(flow_id, instance_id = %created.id, "Created conversation instance");
        Ok(created)
    }

    /// Forward the user's decision on a pending tool invocation.
    ///
    /// # Errors
    ///
    /// Refuses without any request when the stream never carried a backend
    /// tool execution id: the step-derived fallback id is unknown to the
    /// backend and would only earn a 404. Otherwise transport errors,
    /// non-success statuses and `{"status": "error"}` replies.
    pub async fn confirm_tool(&self, instance_id: &str, decision: &ToolDecision) -> Result<String, SessionError> {
        let Some(tool_execution_id) = decision.confirmation.tool_execution_id.as_deref() else {
            return Err(SessionError::transport(format!(
                "Cannot confirm {}: the backend did not supply a tool execution id",
                decision.confirmation.tool_name
            )));
        };
        let body = ConfirmToolRequest {
            tool_execution_id,
            confirmed: decision.confirmed(),
        };
        let response = self
            .client
            .post(self.url(&format!("flow/{instance_id}/confirm_tool")))
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SessionError::network(format!("Failed to read response: {e}")))?;
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let reply: ConfirmToolResponse = serde_json::from_str(&text)
            .map_err(|e| SessionError::transport(format!("Failed to parse confirmation reply: {e}")))?;
        if reply.status == "error" {
            return Err(SessionError::transport(reply.message));
        }
        tracing::info!(
            instance_id,
            tool_execution_id,
            confirmed = decision.confirmed(),
            "Tool confirmation accepted"
        );
        Ok(reply.message)
    }
}

impl StreamTransport for HttpTransport {
    fn open(&self, request: StreamRequest, sink: EventSink) -> Result<Box<dyn ConnectionHandle>, SessionError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SessionError::transport(format!("No async runtime for stream: {e}")))?;

        let connection = HttpConnection::new();
        let worker = StreamWorker {
            client: self.client.clone(),
            url: self.url("flow/execute"),
            request,
            sink,
            max_attempts: self.config.max_reconnect_attempts,
            base_delay: self.config.reconnect_base_delay,
            cancel: connection.cancel.clone(),
            reconnect: Arc::clone(&connection.reconnect),
        };
        tracing::debug!(
            generation = %worker.sink.generation(),
            conversation_id = %worker.request.conversation_id,
            "Opening stream"
        );
        runtime.spawn(worker.run());
        Ok(Box::new(connection))
    }
}

#[async_trait]
impl TranscriptLoader for HttpTransport {
    async fn load_transcript(&self, instance_id: &str) -> Result<Transcript, SessionError> {
        let response = self
            .client
            .get(self.url(&format!("flow/instance/{instance_id}")))
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| SessionError::transcript_load(instance_id, e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SessionError::transcript_load(instance_id, e.to_string()))?;
        if !status.is_success() {
            return Err(SessionError::transcript_load(instance_id, format!("HTTP {status}: {text}")));
        }

        let history: Value =
            serde_json::from_str(&text).map_err(|e| SessionError::transcript_load(instance_id, e.to_string()))?;
        let steps = parse_history(instance_id, history)?;
        tracing::debug!(instance_id, steps = steps.len(), "Loaded transcript");
        Ok(Transcript::new(steps))
    }
}

// ============================================================================
// Connection
// ============================================================================

struct HttpConnection {
    cancel: CancellationToken,
    reconnect: Arc<Notify>,
}

impl HttpConnection {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            reconnect: Arc::new(Notify::new()),
        }
    }
}

impl ConnectionHandle for HttpConnection {
    fn close(&self) {
        self.cancel.cancel();
    }

    fn reconnect(&self) {
        if !self.cancel.is_cancelled() {
            self.reconnect.notify_one();
        }
    }
}

impl Drop for HttpConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum StreamOutcome {
    /// Server ended the stream
    Finished,
    /// Connection dropped; may be retried
    Dropped { error: SessionError, received: bool },
    /// Not worth retrying
    Fatal(String),
}

struct StreamWorker {
    client: Client,
    url: String,
    request: StreamRequest,
    sink: EventSink,
    max_attempts: u32,
    base_delay: Duration,
    cancel: CancellationToken,
    reconnect: Arc<Notify>,
}

impl StreamWorker {
    async fn run(self) {
        let generation = self.sink.generation();
        let mut attempt = 0u32;

        loop {
            let outcome = tokio::select! {
                () = self.cancel.cancelled() => break,
                () = self.reconnect.notified() => {
                    tracing::info!(%generation, "Manual reconnect requested");
                    attempt = 0;
                    continue;
                }
                outcome = self.stream_once() => outcome,
            };

            match outcome {
                StreamOutcome::Finished => {
                    self.emit(|sink| sink.finished());
                    break;
                }
                StreamOutcome::Fatal(message) => {
                    tracing::warn!(%generation, error = %message, "Stream failed");
                    self.emit(|sink| sink.error(message));
                    break;
                }
                StreamOutcome::Dropped { error, received } => {
                    if received {
                        attempt = 0;
                    }
                    if attempt >= self.max_attempts {
                        tracing::warn!(%generation, error = %error, "Giving up on stream");
                        self.emit(EventSink::max_reconnect_attempts_reached);
                        break;
                    }
                    attempt += 1;
                    let delay = retry_delay(self.base_delay, attempt);
                    tracing::warn!(
                        %generation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Stream dropped, reconnecting"
                    );
                    self.emit(|sink| sink.reconnecting(attempt, self.max_attempts, delay));

                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = self.reconnect.notified() => attempt = 0,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        tracing::debug!(%generation, "Stream worker stopped");
    }

    async fn stream_once(&self) -> StreamOutcome {
        let mut builder = self.client.get(&self.url).query(&[
            ("flow_id", self.request.conversation_id.as_str()),
            ("input", self.request.message.as_str()),
        ]);
        // Without an instance the backend answers 400 and names the problem
        if let Some(instance_id) = &self.request.instance_id {
            builder = builder.query(&[("instance_id", instance_id.as_str())]);
        }
        let sent = builder.header(ACCEPT, "text/event-stream").send().await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                let error = classify_request_error(e);
                return if error.is_retryable() {
                    StreamOutcome::Dropped { error, received: false }
                } else {
                    StreamOutcome::Fatal(error.to_string())
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = classify_status(status, &body);
            return if error.is_retryable() {
                StreamOutcome::Dropped { error, received: false }
            } else {
                StreamOutcome::Fatal(error.to_string())
            };
        }

        let mut events = response.bytes_stream().eventsource();
        let mut received = false;
        while let Some(item) = events.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    return StreamOutcome::Dropped {
                        error: SessionError::network(format!("Stream interrupted: {e}")),
                        received,
                    }
                }
            };
            received = true;

            let messages = match parse_stream_event(&event.event, &event.data) {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(event = %event.event, error = %e, "Skipping malformed stream event");
                    continue;
                }
            };
            for message in messages {
                match message {
                    StreamMessage::Partial { text, complete } => {
                        self.emit(|sink| sink.partial_output(text, complete));
                    }
                    StreamMessage::Step(step) => {
                        self.emit(|sink| sink.complete_step(*step));
                    }
                    StreamMessage::Confirmation(confirmation) => {
                        self.emit(|sink| sink.confirmation_requested(confirmation));
                    }
                    StreamMessage::Error(message) => return StreamOutcome::Fatal(message),
                }
            }
        }
        StreamOutcome::Finished
    }

    /// Deliver unless the handle was closed
    fn emit(&self, send: impl FnOnce(&EventSink) -> bool) {
        if self.cancel.is_cancelled() {
            return;
        }
        if !send(&self.sink) {
            self.cancel.cancel();
        }
    }
}

/// Exponential backoff (`base * 2^(attempt-1)`) with up to 10% jitter
#[must_use]
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = base.saturating_mul(1 << exponent);
    let jitter = rand::thread_rng().gen_range(0.0..=0.1);
    delay.saturating_add(delay.mul_f64(jitter))
}

fn classify_request_error(e: reqwest::Error) -> SessionError {
    if e.is_timeout() {
        SessionError::network(format!("Request timeout: {e}"))
    } else if e.is_connect() {
        SessionError::network(format!("Connection failed: {e}"))
    } else if e.is_builder() {
        SessionError::transport(format!("Invalid request: {e}"))
    } else {
        SessionError::network(format!("Request failed: {e}"))
    }
}

fn classify_status(status: StatusCode, body: &str) -> SessionError {
    let message = format!("HTTP {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SessionError::network(message)
    } else {
        SessionError::transport(message)
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Serialize)]
struct ConfirmToolRequest<'a> {
    tool_execution_id: &'a str,
    confirmed: bool,
}

#[derive(Serialize)]
struct CreateInstanceRequest<'a> {
    flow_id: &'a str,
}

/// Reply to `POST /flow/create_instance`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedInstance {
    pub id: String,
    pub flow_id: String,
    #[serde(default)]
    pub flow_name: Option<String>,
}

#[derive(Deserialize)]
struct ConfirmToolResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PartialPayload {
    #[serde(default)]
    partial_output: String,
    #[serde(default)]
    complete: bool,
}

#[derive(Debug, Deserialize)]
struct ToolUsage {
    #[serde(alias = "name")]
    tool_name: String,
    #[serde(default, alias = "tool_input")]
    input: Value,
    #[serde(default)]
    requires_confirmation: bool,
    #[serde(default)]
    tool_execution_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireStep {
    #[serde(flatten)]
    step: Step,
    #[serde(default)]
    tool_usage: Option<ToolUsage>,
}

impl WireStep {
    fn pending_confirmation(&self) -> Option<PendingToolConfirmation> {
        if self.step.next_originator.as_deref() != Some(AWAITING_TOOL_CONFIRMATION) {
            return None;
        }
        let usage = self.tool_usage.as_ref().filter(|u| u.requires_confirmation)?;
        Some(PendingToolConfirmation {
            id: usage
                .tool_execution_id
                .clone()
                .unwrap_or_else(|| self.step.id.clone()),
            tool_execution_id: usage.tool_execution_id.clone(),
            tool_name: usage.tool_name.clone(),
            tool_input: usage.input.clone(),
            timestamp: self.step.timestamp,
        })
    }
}

/// One decoded stream event
#[derive(Debug, Clone, PartialEq)]
enum StreamMessage {
    Partial { text: String, complete: bool },
    Step(Box<Step>),
    Confirmation(PendingToolConfirmation),
    Error(String),
}

/// Decode one SSE event. Payloads are `{"type": ..., "data": ...}`; the SSE
/// event name is used when the payload carries no type.
fn parse_stream_event(event: &str, data: &str) -> Result<Vec<StreamMessage>, serde_json::Error> {
    let value: Value = serde_json::from_str(data)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(event)
        .to_string();
    let body = match value.get("data") {
        Some(inner) if !inner.is_null() => inner.clone(),
        _ => value,
    };

    match kind.as_str() {
        "partial_output" => {
            let payload: PartialPayload = serde_json::from_value(body)?;
            Ok(vec![StreamMessage::Partial {
                text: payload.partial_output,
                complete: payload.complete,
            }])
        }
        "complete_step" => {
            let wire: WireStep = serde_json::from_value(body)?;
            let confirmation = wire.pending_confirmation();
            let mut messages = vec![StreamMessage::Step(Box::new(wire.step))];
            messages.extend(confirmation.map(StreamMessage::Confirmation));
            Ok(messages)
        }
        "error" => {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| body.as_str())
                .unwrap_or("Unknown stream error")
                .to_string();
            Ok(vec![StreamMessage::Error(message)])
        }
        other => {
            tracing::trace!(event = other, "Ignoring stream event");
            Ok(Vec::new())
        }
    }
}

/// History arrives as a bare array of steps or wrapped in `{"steps": [...]}`
fn parse_history(instance_id: &str, history: Value) -> Result<Vec<Step>, SessionError> {
    let entries = match history {
        Value::Array(entries) => entries,
        Value::Object(mut map) => match map.remove("steps").or_else(|| map.remove("history")) {
            Some(Value::Array(entries)) => entries,
            _ => return Err(SessionError::transcript_load(instance_id, "response has no step list")),
        },
        _ => return Err(SessionError::transcript_load(instance_id, "unexpected history shape")),
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<Step>(entry) {
            Ok(step) => Some(step),
            Err(e) => {
                tracing::warn!(instance_id, error = %e, "Skipping unreadable history entry");
                None
            }
        })
        .collect())
}
