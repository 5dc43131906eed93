//! Step ledger: the authoritative, append-only transcript
//!
//! Steps are immutable once recorded and kept in arrival order, which is the
//! causal order observed by this session (not necessarily wall-clock order).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a step
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepRole {
    User,
    Assistant,
    Superego,
    System,
    Other(String),
}

impl From<String> for StepRole {
    fn from(value: String) -> Self {
        match value.as_str() {
            "user" => StepRole::User,
            "assistant" => StepRole::Assistant,
            "superego" => StepRole::Superego,
            "system" => StepRole::System,
            _ => StepRole::Other(value),
        }
    }
}

impl From<StepRole> for String {
    fn from(role: StepRole) -> Self {
        match role {
            StepRole::User => "user".to_string(),
            StepRole::Assistant => "assistant".to_string(),
            StepRole::Superego => "superego".to_string(),
            StepRole::System => "system".to_string(),
            StepRole::Other(other) => other,
        }
    }
}

/// One turn in the transcript, in the backend's wire shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "step_id", default = "new_step_id")]
    pub id: String,
    #[serde(rename = "agent_id")]
    pub originator_id: String,
    #[serde(with = "timestamp", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub role: StepRole,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub response: String,
    #[serde(rename = "next_agent", default)]
    pub next_originator: Option<String>,
}

fn new_step_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Step {
    /// Local echo of a message the user just sent
    #[must_use]
    pub fn user(
        originator_id: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let message = message.into();
        Self {
            id: new_step_id(),
            originator_id: originator_id.into(),
            timestamp,
            role: StepRole::User,
            input: Some(message.clone()),
            response: message,
            next_originator: None,
        }
    }

    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role == StepRole::User
    }
}

/// Ordered log of conversation steps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepLedger {
    steps: Vec<Step>,
}

impl StepLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Replace the whole transcript, e.g. with one loaded from storage
    pub fn replace_all(&mut self, steps: Vec<Step>) {
        self.steps = steps;
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// Take every recorded step, leaving the ledger empty
    pub fn take(&mut self) -> Vec<Step> {
        std::mem::take(&mut self.steps)
    }

    /// Last recorded step; `None` is the empty sentinel
    #[must_use]
    pub fn latest_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.steps.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Step] {
        &self.steps
    }
}

impl<'a> IntoIterator for &'a StepLedger {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

/// Timestamps arrive either as RFC 3339 or as naive ISO-8601 local times
/// (`datetime.isoformat()`); naive values are taken as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp {raw:?}: {e}"))
    }
}
