//! Shared value types used across the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier of a stored flow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct FlowKey(pub String);

impl FlowKey {
    /// Borrow the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FlowKey {
    fn from(key: &str) -> Self {
        FlowKey(key.to_string())
    }
}

impl From<String> for FlowKey {
    fn from(key: String) -> Self {
        FlowKey(key)
    }
}

/// Authenticated caller identity passed into a flow invocation.
///
/// Authentication itself happens outside the engine; this is only the
/// identity the host decided to hand through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    /// Stable identifier of the caller
    pub id: String,

    /// Display name, if the host knows one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Actor {
    /// Create an actor from its identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Format a timestamp at second precision (`YYYY-MM-DD HH:MM:SS`, UTC).
///
/// This is the representation external authoring tools track and the one
/// the upload protocol's optimistic-lock comparison is defined over.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}
