//! Queue of tool invocations awaiting human approval

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// An agent's request to run a side-effecting tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingToolConfirmation {
    pub id: String,
    /// Backend id of the parked tool execution; `None` when the stream
    /// did not carry one and `id` was derived from the step instead
    #[serde(default)]
    pub tool_execution_id: Option<String>,
    pub tool_name: String,
    pub tool_input: Value,
    pub timestamp: DateTime<Utc>,
}

/// The user's answer to a pending confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Deny,
}

/// A resolved confirmation, ready to forward to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDecision {
    pub confirmation: PendingToolConfirmation,
    pub decision: Decision,
}

impl ToolDecision {
    #[must_use]
    pub fn confirmed(&self) -> bool {
        self.decision == Decision::Approve
    }
}

/// FIFO of pending confirmations; entries are removed on resolution, never edited
#[derive(Debug, Clone, Default)]
pub struct ConfirmationQueue {
    pending: VecDeque<PendingToolConfirmation>,
}

impl ConfirmationQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request. Returns false if one with the same id is already queued.
    pub fn enqueue(&mut self, confirmation: PendingToolConfirmation) -> bool {
        if self.pending.iter().any(|p| p.id == confirmation.id) {
            return false;
        }
        self.pending.push_back(confirmation);
        true
    }

    /// Oldest unresolved request
    #[must_use]
    pub fn front(&self) -> Option<&PendingToolConfirmation> {
        self.pending.front()
    }

    pub fn resolve(&mut self, id: &str, decision: Decision) -> Option<ToolDecision> {
        let index = self.pending.iter().position(|p| p.id == id)?;
        let confirmation = self.pending.remove(index)?;
        Some(ToolDecision {
            confirmation,
            decision,
        })
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &PendingToolConfirmation> {
        self.pending.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(id: &str, tool: &str) -> PendingToolConfirmation {
        PendingToolConfirmation {
            id: id.to_string(),
            tool_execution_id: Some(id.to_string()),
            tool_name: tool.to_string(),
            tool_input: json!({ "expression": "2+2" }),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = ConfirmationQueue::new();
        queue.enqueue(request("a", "calculator"));
        queue.enqueue(request("b", "web_fetch"));

        assert_eq!(queue.front().map(|p| p.id.as_str()), Some("a"));
        let ids: Vec<_> = queue.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_resolve_removes_out_of_order() {
        let mut queue = ConfirmationQueue::new();
        queue.enqueue(request("a", "calculator"));
        queue.enqueue(request("b", "web_fetch"));

        let decision = queue.resolve("b", Decision::Deny).unwrap();
        assert_eq!(decision.confirmation.tool_name, "web_fetch");
        assert!(!decision.confirmed());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.front().map(|p| p.id.as_str()), Some("a"));
    }

    #[test]
    fn test_resolve_unknown_id_is_none() {
        let mut queue = ConfirmationQueue::new();
        queue.enqueue(request("a", "calculator"));
        assert!(queue.resolve("missing", Decision::Approve).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_duplicate_ids_are_ignored() {
        let mut queue = ConfirmationQueue::new();
        assert!(queue.enqueue(request("a", "calculator")));
        assert!(!queue.enqueue(request("a", "calculator")));
        assert_eq!(queue.len(), 1);

        queue.clear();
        assert!(queue.is_empty());
    }
}
