//! superego-chat - line-oriented client for a superego flow backend
//!
//! Plain lines are sent as messages; `/help` lists the commands.

use futures::StreamExt;
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use superego_session::{
    Decision, ExecutionPhase, HttpTransport, Session, SessionConfig, SessionView, TracingFeedback, TransportConfig,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::{LinesStream, WatchStream};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type ChatSession = Session<Arc<HttpTransport>, Arc<HttpTransport>, TracingFeedback>;

const HELP: &str = "\
commands:
  <text>            send a message
  /open <instance>  load a conversation instance
  /close            deselect the current instance
  /cancel           stop the running execution
  /reconnect        restart the live stream
  /reset            clear everything
  /approve <id>     allow a pending tool call
  /deny <id>        refuse a pending tool call
  /quit            exit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let session_config = SessionConfig::from_env();
    let transport_config = TransportConfig::from_env();
    tracing::info!(
        base_url = %transport_config.base_url,
        flow_id = ?transport_config.default_flow_id,
        "Starting superego-chat"
    );

    let http = Arc::new(HttpTransport::new(transport_config)?);
    let mut session: ChatSession = Session::new(session_config, Arc::clone(&http), Arc::clone(&http), TracingFeedback);
    let mut views = WatchStream::new(session.subscribe());
    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let mut renderer = Renderer::default();

    println!("{HELP}");
    loop {
        let line = tokio::select! {
            line = lines.next() => line,
            () = session.process_next() => continue,
            Some(view) = views.next() => {
                renderer.render(&view);
                continue;
            }
        };

        match line {
            Some(Ok(line)) => {
                if !handle_command(&mut session, &http, line.trim()).await {
                    break;
                }
            }
            Some(Err(e)) => return Err(e.into()),
            None => break,
        }
    }

    session.teardown();
    Ok(())
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "superego_session=info".into());
    let json = std::env::var("SUPEREGO_LOG_FORMAT").is_ok_and(|format| format == "json");

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Returns false when the user asked to quit
async fn handle_command(session: &mut ChatSession, http: &HttpTransport, line: &str) -> bool {
    let (command, argument) = match line.split_once(' ') {
        Some((command, argument)) => (command, argument.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "/quit" | "/exit" => return false,
        "/help" => println!("{HELP}"),
        "/open" if !argument.is_empty() => session.select_instance(Some(argument)),
        "/close" => session.select_instance(None),
        "/cancel" => session.cancel_execution(),
        "/reconnect" => session.reconnect(),
        "/reset" => session.reset_current_flow(),
        "/approve" | "/deny" if !argument.is_empty() => {
            let decision = if command == "/approve" {
                Decision::Approve
            } else {
                Decision::Deny
            };
            confirm(session, http, argument, decision).await;
        }
        _ if command.starts_with('/') => eprintln!("unknown command {line:?}; try /help"),
        _ => send(session, http, line).await,
    }
    true
}

async fn send(session: &mut ChatSession, http: &HttpTransport, line: &str) {
    let flow_id = session
        .state()
        .conversation_id
        .clone()
        .or_else(|| http.config().default_flow_id.clone());
    let Some(flow_id) = flow_id else {
        eprintln!("no conversation: /open an instance or set SUPEREGO_FLOW_ID");
        return;
    };

    // The backend only executes against instances it created
    if session.selected_instance().is_none() {
        match http.create_instance(&flow_id).await {
            Ok(created) => {
                println!("[instance {}]", created.id);
                session.select_instance(Some(&created.id));
            }
            Err(e) => {
                eprintln!("could not start a conversation: {e}");
                return;
            }
        }
    }
    session.begin_execution(flow_id, line);
}

async fn confirm(session: &mut ChatSession, http: &HttpTransport, id: &str, decision: Decision) {
    let Some(resolved) = session.resolve_confirmation(id, decision) else {
        eprintln!("no pending tool call {id:?}");
        return;
    };
    let instance_id = session
        .selected_instance()
        .map(str::to_string)
        .or_else(|| session.state().conversation_id.clone());
    let Some(instance_id) = instance_id else {
        eprintln!("no conversation instance to confirm against");
        return;
    };

    match http.confirm_tool(&instance_id, &resolved).await {
        Ok(message) if !message.is_empty() => println!("[tool] {message}"),
        Ok(_) => {}
        Err(e) => eprintln!("confirmation failed: {e}"),
    }
}

/// Prints what changed between successive views
#[derive(Default)]
struct Renderer {
    streamed: String,
    last_step: Option<String>,
    last_error: Option<String>,
    last_phase: Option<ExecutionPhase>,
    announced: HashSet<String>,
    loading: bool,
}

impl Renderer {
    fn render(&mut self, view: &SessionView) {
        let mut out = std::io::stdout().lock();

        if view.loading != self.loading {
            if view.loading {
                let _ = writeln!(out, "[loading transcript]");
            } else {
                let _ = writeln!(out, "[{} steps]", view.step_count);
            }
            self.loading = view.loading;
        }

        if self.last_phase.as_ref() != Some(&view.phase) {
            if let ExecutionPhase::Reconnecting { attempt, max_attempts } = view.phase {
                let _ = writeln!(out, "\n[reconnecting {attempt}/{max_attempts}]");
            }
            self.last_phase = Some(view.phase.clone());
        }

        let text = &view.current_streaming_text;
        if *text != self.streamed {
            match text.strip_prefix(self.streamed.as_str()) {
                Some(suffix) if !self.streamed.is_empty() => {
                    let _ = write!(out, "{suffix}");
                }
                _ if !text.is_empty() => {
                    let _ = write!(out, "\n{text}");
                }
                _ => {}
            }
            self.streamed.clone_from(text);
        }

        if let Some(step) = &view.latest_step {
            if self.last_step.as_deref() != Some(step.id.as_str()) {
                if !step.is_user() && step.response != self.streamed {
                    let _ = write!(out, "\n[{}] {}", step.originator_id, step.response);
                }
                let _ = writeln!(out);
                self.last_step = Some(step.id.clone());
            }
        }

        if view.execution_error != self.last_error {
            if let Some(error) = &view.execution_error {
                let _ = writeln!(out, "\nerror: {error}");
            }
            self.last_error.clone_from(&view.execution_error);
        }

        for pending in &view.pending_confirmations {
            if self.announced.insert(pending.id.clone()) {
                let _ = writeln!(
                    out,
                    "[tool] {} wants to run with {}: /approve {} or /deny {}",
                    pending.tool_name, pending.tool_input, pending.id, pending.id
                );
            }
        }

        let _ = out.flush();
    }
}
