//! Wire types for the Sync Gateway / CouchDB REST replication API.
//!
//! Pull reads `GET {db}/_changes?include_docs=true&since=..`; push writes
//! `POST {db}/_bulk_docs`. Documents carry their id in `_id` and revision in
//! `_rev`; every other `_`-prefixed key is server metadata.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::PendingChange;

/// Response of the `_changes` feed (normal or longpoll).
#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    #[serde(default)]
    pub results: Vec<ChangeEntry>,
    pub last_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangeEntry {
    pub seq: Value,
    pub id: String,
    #[serde(default)]
    pub changes: Vec<ChangeRev>,
    #[serde(default)]
    pub deleted: bool,
    /// Set when the document left the user's channels; treated as a deletion.
    #[serde(default)]
    pub removed: Option<Vec<String>>,
    #[serde(default)]
    pub doc: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRev {
    pub rev: String,
}

/// A remote revision ready to apply locally. `body == None` is a deletion.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRevision {
    pub id: String,
    pub rev: String,
    pub body: Option<Map<String, Value>>,
}

impl ChangeEntry {
    /// Converts a feed entry into a revision to apply.
    ///
    /// Returns `None` for design / local documents and for entries without a
    /// revision.
    pub fn into_revision(self) -> Option<RemoteRevision> {
        if self.id.starts_with("_design/") || self.id.starts_with("_local/") {
            return None;
        }

        let doc_rev = self
            .doc
            .as_ref()
            .and_then(|d| d.get("_rev"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let rev = doc_rev.or_else(|| self.changes.first().map(|c| c.rev.clone()))?;

        let doc_deleted = self
            .doc
            .as_ref()
            .and_then(|d| d.get("_deleted"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let deleted = self.deleted || doc_deleted || self.removed.is_some();

        let body = if deleted {
            None
        } else {
            Some(strip_metadata(self.doc?))
        };

        Some(RemoteRevision {
            id: self.id,
            rev,
            body,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct BulkDocsRequest {
    pub docs: Vec<Value>,
}

/// Per-document outcome of `_bulk_docs`.
#[derive(Debug, Deserialize)]
pub struct BulkDocsResult {
    pub id: String,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl BulkDocsResult {
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|error| match &self.reason {
            Some(reason) => format!("{}: {}", error, reason),
            None => error.clone(),
        })
    }
}

/// Builds the `_bulk_docs` entry for a pending local change.
pub fn outgoing_doc(change: &PendingChange) -> Value {
    let mut doc = Map::new();
    doc.insert("_id".to_string(), Value::String(change.id.clone()));
    if let Some(rev) = &change.remote_rev {
        doc.insert("_rev".to_string(), Value::String(rev.clone()));
    }
    if change.deleted {
        doc.insert("_deleted".to_string(), Value::Bool(true));
    } else {
        for (key, value) in &change.body {
            if !key.starts_with('_') {
                doc.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(doc)
}

/// Sequence values may be numbers or strings; checkpoints keep them as text.
pub fn seq_to_string(seq: &Value) -> String {
    match seq {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn strip_metadata(mut doc: Map<String, Value>) -> Map<String, Value> {
    doc.retain(|key, _| !key.starts_with('_'));
    doc
}
