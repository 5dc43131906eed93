//! Output accumulator for the in-flight agent response

use serde::Serialize;

/// Most recent in-flight agent response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialOutput {
    pub text: String,
    pub originator_id: Option<String>,
    pub complete: bool,
}

impl Default for PartialOutput {
    fn default() -> Self {
        Self {
            text: String::new(),
            originator_id: None,
            complete: true,
        }
    }
}

/// Inputs to [`reduce`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// A new execution opened; nothing received yet
    Started,
    /// Latest partial text from the stream (replaces, does not append)
    Partial { text: String, complete: bool },
    /// A whole step arrived; the partial response is done
    Completed { originator_id: String },
    /// The stream was released; whatever text arrived stays visible
    Settled,
    /// Back to the initial value
    Reset,
}

/// Pure reducer: `(state, event) -> state`
#[must_use]
pub fn reduce(state: &PartialOutput, event: OutputEvent) -> PartialOutput {
    match event {
        OutputEvent::Started => PartialOutput {
            complete: false,
            ..PartialOutput::default()
        },
        OutputEvent::Partial { text, complete } => PartialOutput {
            text,
            originator_id: state.originator_id.clone(),
            complete,
        },
        OutputEvent::Completed { originator_id } => PartialOutput {
            text: state.text.clone(),
            originator_id: Some(originator_id),
            complete: true,
        },
        OutputEvent::Settled => PartialOutput {
            complete: true,
            ..state.clone()
        },
        OutputEvent::Reset => PartialOutput::default(),
    }
}
