//! Execution state types

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Generation - identity of one connection handle
// ============================================================================

/// Monotonic identity of a stream connection.
///
/// Every `beginExecution` mints a new generation. Events and cancel requests
/// carry the generation they were issued for and are rejected once it is no
/// longer the bound one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl Generation {
    #[must_use]
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Execution State
// ============================================================================

/// Lifecycle phase of the current execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionPhase {
    /// Nothing running; either never started, cancelled or completed
    #[default]
    Idle,

    /// Execution requested, connection being opened
    Starting,

    /// Connection open, events flowing
    Streaming,

    /// Transport dropped and is retrying; the user still sees "working"
    Reconnecting { attempt: u32, max_attempts: u32 },

    /// Terminal error surfaced, connection released
    Failed { error_kind: ErrorKind },
}

impl ExecutionPhase {
    /// Phases in which a connection is bound
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ExecutionPhase::Starting | ExecutionPhase::Streaming | ExecutionPhase::Reconnecting { .. }
        )
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionPhase::Idle => "idle",
            ExecutionPhase::Starting => "starting",
            ExecutionPhase::Streaming => "streaming",
            ExecutionPhase::Reconnecting { .. } => "reconnecting",
            ExecutionPhase::Failed { .. } => "failed",
        }
    }
}

/// Single source of truth for "is a stream active, for which conversation,
/// on which connection, and what went wrong".
///
/// `connection` is `Some` exactly when the phase is active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ExecutionState {
    pub phase: ExecutionPhase,
    pub error: Option<String>,
    pub conversation_id: Option<String>,
    pub connection: Option<Generation>,
}

impl ExecutionState {
    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.phase.is_active()
    }

    /// Whether `generation` is the currently bound connection
    #[must_use]
    pub fn is_current(&self, generation: Generation) -> bool {
        self.connection == Some(generation)
    }

    /// Check the connection/phase invariant
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.connection.is_some() == self.is_executing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_initial_tuple() {
        let state = ExecutionState::default();
        assert!(!state.is_executing());
        assert!(state.error.is_none());
        assert!(state.conversation_id.is_none());
        assert!(state.connection.is_none());
        assert!(state.is_consistent());
    }

    #[test]
    fn test_phase_serializes_tagged() {
        let phase = ExecutionPhase::Reconnecting {
            attempt: 2,
            max_attempts: 3,
        };
        let json = serde_json::to_value(&phase).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "reconnecting", "attempt": 2, "max_attempts": 3 })
        );
    }

    #[test]
    fn test_generation_ordering() {
        let first = Generation(1);
        assert!(first.next() > first);
        assert_eq!(first.next().to_string(), "#2");
    }
}
