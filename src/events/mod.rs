//! Project events and the in-memory bus that fans them out.

mod bus;

pub use bus::{EventBus, EventReceiver, Subscription};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of a project event, serialized as its snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    StatusChanged,
    Log,
    PreviewReady,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::StatusChanged => "status_changed",
            EventKind::Log => "log",
            EventKind::PreviewReady => "preview_ready",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of something that happened to a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEvent {
    pub project_id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    /// Always a JSON object
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl ProjectEvent {
    pub fn new(project_id: impl Into<String>, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            kind,
            message: message.into(),
            payload: Value::Object(Map::new()),
            timestamp: Utc::now(),
        }
    }

    /// Attach a payload. Anything other than a JSON object is wrapped as
    /// `{"value": ...}` so consumers can always index by key.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = match payload {
            Value::Object(_) => payload,
            Value::Null => Value::Object(Map::new()),
            other => serde_json::json!({ "value": other }),
        };
        self
    }
}
