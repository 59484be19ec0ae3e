use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{format_timestamp, FlowKey};

/// A stored, runnable fragment of business logic.
///
/// Flows are rows, not compiled code: the `source` column holds the body of
/// an async JavaScript function and is executed on demand by the sandbox.
/// Flows are never hard-deleted; deactivation flips `enabled` instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flow {
    /// Unique key of the flow; immutable after creation and never reused
    pub key: FlowKey,

    /// Human-readable name
    pub name: String,

    /// Free-text grouping (e.g. "orders", "customers")
    pub category: Option<String>,

    /// What the flow does
    pub description: Option<String>,

    /// Source text: the body of a single async function taking `context`
    pub source: String,

    /// Disabled flows are invisible to execution but still readable
    pub enabled: bool,

    /// Identity that created the flow
    pub created_by: Option<String>,

    /// Identity that last modified the flow
    pub updated_by: Option<String>,

    /// Free-form operator note
    pub remark: Option<String>,

    /// Creation time (server clock)
    pub created_at: DateTime<Utc>,

    /// Last modification time; advances on every mutating save except the
    /// publish-status path, and anchors both cache staleness and the upload
    /// optimistic lock
    pub updated_at: DateTime<Utc>,

    /// When this version last went live, recorded separately from
    /// `updated_at` so publishing never invalidates the optimistic lock
    pub published_at: Option<DateTime<Utc>>,
}

impl Flow {
    /// Metadata-only projection, as returned by listing
    pub fn summary(&self) -> FlowSummary {
        FlowSummary {
            key: self.key.clone(),
            name: self.name.clone(),
            category: self.category.clone(),
            description: self.description.clone(),
            enabled: self.enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// The store's `updated_at` at second precision, as compared against an
    /// author's last-known modification time during upload reconciliation
    pub fn modified_stamp(&self) -> String {
        format_timestamp(&self.updated_at)
    }
}

/// Input for creating a flow row; the store stamps the timestamps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFlow {
    /// Unique key to create the flow under
    pub key: FlowKey,
    /// Human-readable name
    pub name: String,
    /// Free-text grouping
    pub category: Option<String>,
    /// What the flow does
    pub description: Option<String>,
    /// Source text
    pub source: String,
    /// Whether the flow is immediately runnable
    pub enabled: bool,
    /// Identity creating the flow
    pub created_by: Option<String>,
    /// Free-form operator note
    pub remark: Option<String>,
}

/// Partial update of a flow; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowPatch {
    /// New name
    pub name: Option<String>,
    /// New category
    pub category: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New source text
    pub source: Option<String>,
    /// New remark
    pub remark: Option<String>,
    /// Identity applying the update
    pub updated_by: Option<String>,
}

impl FlowPatch {
    /// True if the patch carries no field at all
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.category.is_none()
            && self.description.is_none()
            && self.source.is_none()
            && self.remark.is_none()
            && self.updated_by.is_none()
    }
}

/// Metadata-only view of a flow, as returned by listing (no source text)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlowSummary {
    /// Unique key
    pub key: FlowKey,
    /// Human-readable name
    pub name: String,
    /// Free-text grouping
    pub category: Option<String>,
    /// What the flow does
    pub description: Option<String>,
    /// Whether the flow is runnable
    pub enabled: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

/// Listing filter; listings are always ordered by category, then key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowFilter {
    /// Only flows in this category
    pub category: Option<String>,
    /// Only enabled flows
    pub enabled_only: bool,
}

/// Starter source for flows created without source text.
///
/// Mirrors what the authoring tool expects to pull down: a header block it
/// can re-upload, context destructuring, and a result shape.
pub fn default_source_template(key: &FlowKey, name: &str, description: &str) -> String {
    format!(
        r#"/**
 * @flowKey {key}
 * @flowName {name}
 * @description {description}
 * @updateTime {update_time}
 */

const {{ repositories, params, actor }} = context;

// Validate input
if (params === undefined || params === null) {{
  throw new Error("params must be provided");
}}

// Business logic goes here

return {{
  success: true,
  data: {{}},
}};
"#,
        key = key,
        name = name,
        description = if description.is_empty() {
            name
        } else {
            description
        },
        update_time = format_timestamp(&Utc::now()),
    )
}
