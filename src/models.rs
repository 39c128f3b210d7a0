//! Core data models.
//!
//! The raw entity shapes deserialized from the Azure DevOps REST API live
//! next to the normalized [`Document`] that the pipeline emits, so the whole
//! data flow is visible in one place.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Normalized, sink-ready record derived from one entity.
///
/// `id` is deterministic over stable source fields only, so re-syncing an
/// unchanged entity produces the same id and the downstream indexer upserts
/// instead of duplicating.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    /// One document may bundle several text fields as separate sections.
    pub sections: Vec<Section>,
    pub semantic_identifier: String,
    /// Always UTC, truncated to whole seconds.
    pub updated_at: DateTime<Utc>,
    pub owners: Vec<Owner>,
    /// Keys are present only when the source provided a value.
    pub metadata: BTreeMap<String, MetadataValue>,
}

/// A (link, text) pair inside a [`Document`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub link: String,
    pub text: String,
}

/// Identity reference attached to a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Owner {
    pub display_name: String,
}

/// Metadata values are scalar strings or string lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    List(Vec<String>),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

/// Inclusive `(start, end)` window bounding an incremental poll. The entry
/// points pass `None` for a full load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    /// Build a window from the epoch seconds handed to `poll`. A
    /// non-positive start means no prior cursor exists, which is a full
    /// load, not a window starting at the epoch.
    pub fn from_epoch_seconds(start: i64, end: i64) -> Option<Self> {
        if start <= 0 {
            return None;
        }
        let start = Utc.timestamp_opt(start, 0).single()?;
        let end = Utc.timestamp_opt(end, 0).single()?;
        Some(Self { start, end })
    }
}

/// Repository record from `_apis/git/repositories/{name}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: String,
    pub name: String,
    /// Clone URL. For test fixtures this may be a local path.
    pub remote_url: String,
    /// Browser-facing URL; document links and ids are built from it.
    pub web_url: String,
}

/// Pull request record from the repository's `pullrequests` listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub pull_request_id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub creation_date: String,
    #[serde(default)]
    pub created_by: Option<Identity>,
}

/// Identity object as the platform embeds it in other entities.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Work item with its full field map (`$expand=all`). Field keys are the
/// platform's reference names, e.g. `System.ChangedDate`.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}
