//! JSON document store on top of SQLite.
//!
//! Documents live in the `documents` table, keyed by `(collection, id)`, with
//! the body stored as JSON text. Every local write takes the next value of the
//! store-wide sequence; the replicator pushes everything whose `sequence` is
//! ahead of its `pushed_sequence`.
//!
//! Write transactions always start with the sequence bump so SQLite takes the
//! write lock before any read happens inside the transaction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::watch;

use super::error::StoreError;

/// Collection used for every document in this application.
pub const DEFAULT_COLLECTION: &str = "_default";

/// A live (non-deleted) document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub body: Map<String, Value>,
    /// Local revision, bumped on every write.
    pub revision: i64,
    /// Store sequence of the last write.
    pub sequence: i64,
}

/// A local change that has not been pushed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    pub id: String,
    pub body: Map<String, Value>,
    pub sequence: i64,
    /// Revision last acknowledged by the remote, if the remote has seen the document.
    pub remote_rev: Option<String>,
    pub deleted: bool,
}

/// Equality predicate on a top-level body field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    field: String,
    value: FilterValue,
}

#[derive(Debug, Clone, PartialEq)]
enum FilterValue {
    Bool(bool),
    Text(String),
}

impl Filter {
    pub fn bool(field: impl Into<String>, value: bool) -> Self {
        Self {
            field: field.into(),
            value: FilterValue::Bool(value),
        }
    }

    pub fn text(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: FilterValue::Text(value.into()),
        }
    }

    fn json_path(&self) -> String {
        format!("$.\"{}\"", self.field)
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    body: String,
    revision: i64,
    sequence: i64,
}

#[derive(sqlx::FromRow)]
struct PendingRow {
    id: String,
    body: String,
    sequence: i64,
    remote_rev: Option<String>,
    deleted: bool,
}

/// Handle to an opened store. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
    path: PathBuf,
    collection: String,
    local_changes: Arc<watch::Sender<i64>>,
}

impl DocumentStore {
    pub(crate) fn new(pool: SqlitePool, path: PathBuf) -> Self {
        let (local_changes, _) = watch::channel(0);
        Self {
            pool,
            path,
            collection: DEFAULT_COLLECTION.to_string(),
            local_changes: Arc::new(local_changes),
        }
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Closes the connection pool. Later operations on any clone fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Receives the sequence of every local write (not remote applies).
    pub fn subscribe_local_changes(&self) -> watch::Receiver<i64> {
        self.local_changes.subscribe()
    }

    /// Creates or replaces a document.
    pub async fn save(&self, id: &str, body: &Map<String, Value>) -> Result<Document, StoreError> {
        let body_json = encode_body(id, body)?;
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        let sequence = next_sequence(&mut tx).await?;

        let row: DocumentRow = sqlx::query_as(
            r#"
            INSERT INTO documents (collection, id, body, revision, sequence, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT(collection, id) DO UPDATE SET
                body = excluded.body,
                revision = documents.revision + 1,
                sequence = excluded.sequence,
                deleted = 0,
                updated_at = excluded.updated_at
            RETURNING id, body, revision, sequence
            "#,
        )
        .bind(&self.collection)
        .bind(id)
        .bind(&body_json)
        .bind(sequence)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        self.local_changes.send_replace(sequence);
        tracing::debug!(id, sequence, "saved document");

        decode_row(row)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let row: Option<DocumentRow> = sqlx::query_as(
            "SELECT id, body, revision, sequence FROM documents \
             WHERE collection = ? AND id = ? AND deleted = 0",
        )
        .bind(&self.collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_row).transpose()
    }

    /// All live documents matching the filter, in store scan order.
    pub async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let query = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, body, revision, sequence FROM documents \
             WHERE collection = ? AND deleted = 0 AND json_extract(body, ?) = ? \
             ORDER BY rowid",
        )
        .bind(&self.collection)
        .bind(filter.json_path());

        let query = match &filter.value {
            FilterValue::Bool(value) => query.bind(*value),
            FilterValue::Text(value) => query.bind(value.as_str()),
        };

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(decode_row).collect()
    }

    /// Live document ids, in store scan order.
    pub async fn ids(&self) -> Result<Vec<String>, StoreError> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM documents WHERE collection = ? AND deleted = 0 ORDER BY rowid",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Merges `patch` into the stored body in a single statement.
    ///
    /// Fields absent from the patch keep their stored value. Fails with
    /// `NotFound` if the document does not exist.
    pub async fn patch(&self, id: &str, patch: &Map<String, Value>) -> Result<Document, StoreError> {
        let patch_json = encode_body(id, patch)?;
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        let sequence = next_sequence(&mut tx).await?;

        let row: Option<DocumentRow> = sqlx::query_as(
            r#"
            UPDATE documents
            SET body = json_patch(body, ?),
                revision = revision + 1,
                sequence = ?,
                updated_at = ?
            WHERE collection = ? AND id = ? AND deleted = 0
            RETURNING id, body, revision, sequence
            "#,
        )
        .bind(&patch_json)
        .bind(sequence)
        .bind(&now)
        .bind(&self.collection)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let row = row.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        tx.commit().await?;
        self.local_changes.send_replace(sequence);
        tracing::debug!(id, sequence, "patched document");

        decode_row(row)
    }

    /// Deletes a document, leaving a tombstone behind.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        let sequence = next_sequence(&mut tx).await?;

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET body = '{}', deleted = 1, revision = revision + 1, sequence = ?, updated_at = ?
            WHERE collection = ? AND id = ? AND deleted = 0
            "#,
        )
        .bind(sequence)
        .bind(&now)
        .bind(&self.collection)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        tx.commit().await?;
        self.local_changes.send_replace(sequence);
        tracing::debug!(id, sequence, "deleted document");
        Ok(())
    }

    /// Returns true if any live document has the given `type` field.
    pub async fn has_document_of_type(&self, doc_type: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM documents \
             WHERE collection = ? AND deleted = 0 AND json_extract(body, '$.type') = ?)",
        )
        .bind(&self.collection)
        .bind(doc_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Local changes not yet acknowledged by the remote, oldest first.
    pub async fn pending_changes(&self, limit: usize) -> Result<Vec<PendingChange>, StoreError> {
        let rows: Vec<PendingRow> = sqlx::query_as(
            "SELECT id, body, sequence, remote_rev, deleted FROM documents \
             WHERE collection = ? AND sequence > pushed_sequence \
             ORDER BY sequence LIMIT ?",
        )
        .bind(&self.collection)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let body = decode_body(&row.id, &row.body)?;
                Ok(PendingChange {
                    id: row.id,
                    body,
                    sequence: row.sequence,
                    remote_rev: row.remote_rev,
                    deleted: row.deleted,
                })
            })
            .collect()
    }

    /// Number of local changes waiting to be pushed.
    pub async fn pending_count(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE collection = ? AND sequence > pushed_sequence",
        )
        .bind(&self.collection)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Records that the change at `sequence` reached the remote as `rev`.
    ///
    /// A later local write keeps the document pending; it will be pushed on
    /// top of `rev`.
    pub async fn mark_pushed(
        &self,
        id: &str,
        sequence: i64,
        rev: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE documents \
             SET pushed_sequence = MAX(pushed_sequence, ?), remote_rev = COALESCE(?, remote_rev) \
             WHERE collection = ? AND id = ?",
        )
        .bind(sequence)
        .bind(rev)
        .bind(&self.collection)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Applies a revision pulled from the remote. `body == None` is a deletion.
    ///
    /// Returns false when the revision is already known locally (typically the
    /// echo of our own push) or when deleting a document we never had.
    /// Otherwise the remote revision replaces local state.
    pub async fn apply_remote(
        &self,
        id: &str,
        body: Option<&Map<String, Value>>,
        rev: &str,
    ) -> Result<bool, StoreError> {
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        let sequence = next_sequence(&mut tx).await?;

        let existing: Option<(Option<String>, bool)> = sqlx::query_as(
            "SELECT remote_rev, deleted FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(&self.collection)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((Some(known_rev), _)) = &existing {
            if known_rev == rev {
                return Ok(false);
            }
        }

        match body {
            Some(body) => {
                let body_json = encode_body(id, body)?;
                sqlx::query(
                    r#"
                    INSERT INTO documents
                        (collection, id, body, revision, sequence, pushed_sequence, remote_rev, deleted, updated_at)
                    VALUES (?, ?, ?, 1, ?, ?, ?, 0, ?)
                    ON CONFLICT(collection, id) DO UPDATE SET
                        body = excluded.body,
                        revision = documents.revision + 1,
                        sequence = excluded.sequence,
                        pushed_sequence = excluded.pushed_sequence,
                        remote_rev = excluded.remote_rev,
                        deleted = 0,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&self.collection)
                .bind(id)
                .bind(&body_json)
                .bind(sequence)
                .bind(sequence)
                .bind(rev)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                match existing {
                    None => return Ok(false),
                    Some((_, true)) => {
                        // Deleted on both sides: adopt the remote tombstone so
                        // the local one is no longer pushed
                        sqlx::query(
                            r#"
                            UPDATE documents
                            SET remote_rev = ?, pushed_sequence = sequence
                            WHERE collection = ? AND id = ?
                            "#,
                        )
                        .bind(rev)
                        .bind(&self.collection)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                        tx.commit().await?;
                        return Ok(false);
                    }
                    Some((_, false)) => {}
                }
                sqlx::query(
                    r#"
                    UPDATE documents
                    SET body = '{}', deleted = 1, revision = revision + 1,
                        sequence = ?, pushed_sequence = ?, remote_rev = ?, updated_at = ?
                    WHERE collection = ? AND id = ?
                    "#,
                )
                .bind(sequence)
                .bind(sequence)
                .bind(rev)
                .bind(&now)
                .bind(&self.collection)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        tracing::debug!(id, rev, deleted = body.is_none(), "applied remote revision");
        Ok(true)
    }

    /// Last remote sequence recorded for a replication endpoint.
    pub async fn checkpoint(&self, key: &str) -> Result<Option<String>, StoreError> {
        let last_seq = sqlx::query_scalar(
            "SELECT last_seq FROM replication_checkpoints WHERE endpoint = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(last_seq)
    }

    pub async fn set_checkpoint(&self, key: &str, last_seq: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO replication_checkpoints (endpoint, last_seq, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(endpoint) DO UPDATE SET last_seq = excluded.last_seq, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(last_seq)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn reset_checkpoint(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM replication_checkpoints WHERE endpoint = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

async fn next_sequence(tx: &mut Transaction<'_, Sqlite>) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("UPDATE store_sequence SET value = value + 1 WHERE id = 1 RETURNING value")
        .fetch_one(&mut **tx)
        .await
}

fn encode_body(id: &str, body: &Map<String, Value>) -> Result<String, StoreError> {
    serde_json::to_string(body).map_err(|e| StoreError::Malformed {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn decode_body(id: &str, body: &str) -> Result<Map<String, Value>, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Malformed {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn decode_row(row: DocumentRow) -> Result<Document, StoreError> {
    let body = decode_body(&row.id, &row.body)?;
    Ok(Document {
        id: row.id,
        body,
        revision: row.revision,
        sequence: row.sequence,
    })
}
