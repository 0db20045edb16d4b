//! Sync orchestration.
//!
//! Drives one incremental pass for one owner: read cursor → list new
//! messages → fetch and parse → clean → embed → upsert → advance cursor.
//! No intermediate state is persisted; a crash mid-run loses the partial
//! progress and the next run re-fetches the same window. Upserts use a
//! point id derived from (owner, message id), so a re-run overwrites
//! instead of duplicating.
//!
//! Failure semantics: a bad message drops that message, not the run. Only
//! two failures abort a sync and reach the caller — an authentication
//! rejection from the mail API, and a cursor read/write failure.
//!
//! # Cursor folding
//!
//! The new cursor is `max(previous cursor, timestamps folded this run)`,
//! and only two kinds of message fold their timestamp in:
//! - fully embedded and upserted, or
//! - permanently skippable (empty body), where a re-fetch cannot help.
//!
//! A message whose embedding came back absent is left out of the fold, so
//! it stays inside the next run's window and is re-attempted.

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clean::clean_record;
use crate::embedding::Embedder;
use crate::mail::{AuthError, MailFetcher};
use crate::models::CleanedDocument;
use crate::vector_store::VectorStore;

/// Fatal sync failure, surfaced to the caller.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("cursor store failure for owner {owner}")]
    Cursor {
        owner: i64,
        #[source]
        source: sqlx::Error,
    },
}

/// One sync pipeline instance. Clients are injected once at construction
/// and shared by every run; there is no process-global state.
pub struct SyncEngine {
    fetcher: MailFetcher,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    pool: SqlitePool,
    collection: String,
    max_results: usize,
}

impl SyncEngine {
    pub fn new(
        fetcher: MailFetcher,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        pool: SqlitePool,
        collection: String,
        max_results: usize,
    ) -> Self {
        Self {
            fetcher,
            embedder,
            store,
            pool,
            collection,
            max_results,
        }
    }

    /// Run one incremental sync for `owner_id`, starting from the stored
    /// cursor. Returns the new cursor.
    ///
    /// Runs for the same owner must not execute concurrently; the caller
    /// serializes them.
    pub async fn sync(&self, owner_id: i64) -> Result<i64, SyncError> {
        let last_sync_at = get_cursor(&self.pool, owner_id)
            .await
            .map_err(|source| SyncError::Cursor {
                owner: owner_id,
                source,
            })?;
        self.sync_from(owner_id, last_sync_at).await
    }

    /// Run one incremental sync for `owner_id` from an explicit cursor.
    pub async fn sync_from(&self, owner_id: i64, last_sync_at: i64) -> Result<i64, SyncError> {
        let query = format!("after:{}", last_sync_at);
        let refs = self
            .fetcher
            .list_messages(&query, self.max_results)
            .await?;
        info!(owner_id, count = refs.len(), "listed new messages");

        let mut new_cursor = last_sync_at;
        let mut ingested = 0u64;
        let mut dropped = 0u64;
        let mut deferred = 0u64;

        for msg_ref in &refs {
            let parsed = self.fetcher.get_message(msg_ref).await?;
            if parsed.is_empty() {
                dropped += 1;
                continue;
            }

            let doc = clean_record(parsed);
            let timestamp = doc.date.map(|d| d.timestamp());

            if doc.body.trim().is_empty() {
                // Nothing to embed, and a re-fetch cannot change that.
                dropped += 1;
                fold_cursor(&mut new_cursor, timestamp);
                continue;
            }

            let Some(vector) = self.embedder.embed(&doc.body).await else {
                deferred += 1;
                continue;
            };

            let point_id = point_id(owner_id, &doc.id);
            match self
                .store
                .upsert(
                    &self.collection,
                    owner_id,
                    &point_id,
                    document_payload(&doc),
                    vector,
                )
                .await
            {
                Ok(()) => {
                    ingested += 1;
                    fold_cursor(&mut new_cursor, timestamp);
                }
                Err(err) => {
                    warn!(owner_id, message_id = %doc.id, error = %err, "upsert failed, deferring message");
                    deferred += 1;
                }
            }
        }

        set_cursor(&self.pool, owner_id, new_cursor)
            .await
            .map_err(|source| SyncError::Cursor {
                owner: owner_id,
                source,
            })?;

        info!(
            owner_id,
            ingested, dropped, deferred, cursor = new_cursor, "sync complete"
        );
        Ok(new_cursor)
    }
}

fn fold_cursor(cursor: &mut i64, timestamp: Option<i64>) {
    if let Some(ts) = timestamp {
        if ts > *cursor {
            *cursor = ts;
        }
    }
}

/// Deterministic point id for (owner, message): the same message always
/// maps to the same point, so a re-sync overwrites instead of duplicating.
pub fn point_id(owner_id: i64, message_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner_id.to_le_bytes());
    hasher.update(message_id.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// The payload stored alongside the vector: the cleaned document minus the
/// attachment bytes. The store adds `owner_id`.
fn document_payload(doc: &CleanedDocument) -> serde_json::Value {
    serde_json::json!({
        "id": doc.id,
        "thread_id": doc.thread_id,
        "labels": doc.labels,
        "snippet": doc.snippet,
        "from": doc.sender,
        "to": doc.recipient,
        "subject": doc.subject,
        "date": doc.date.map(|d| d.timestamp()),
        "body": doc.body,
        "attachments": doc.attachments.iter().map(|a| serde_json::json!({
            "filename": a.filename,
            "content_type": a.content_type,
            "size": a.size,
        })).collect::<Vec<_>>(),
    })
}

/// Read the stored cursor for an owner; owners never synced start at 0.
pub async fn get_cursor(pool: &SqlitePool, owner_id: i64) -> Result<i64, sqlx::Error> {
    let row: Option<i64> =
        sqlx::query_scalar("SELECT last_sync_at FROM sync_cursors WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.unwrap_or(0))
}

/// Persist the cursor for an owner. The MAX in the upsert keeps the stored
/// value monotonic even if a stale run writes last.
pub async fn set_cursor(pool: &SqlitePool, owner_id: i64, cursor: i64) -> Result<(), sqlx::Error> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO sync_cursors (owner_id, last_sync_at, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(owner_id) DO UPDATE SET
            last_sync_at = MAX(sync_cursors.last_sync_at, excluded.last_sync_at),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(owner_id)
    .bind(cursor)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_id_is_deterministic() {
        assert_eq!(point_id(1, "m1"), point_id(1, "m1"));
    }

    #[test]
    fn point_id_differs_per_owner_and_message() {
        assert_ne!(point_id(1, "m1"), point_id(2, "m1"));
        assert_ne!(point_id(1, "m1"), point_id(1, "m2"));
    }

    #[test]
    fn fold_cursor_never_regresses() {
        let mut cursor = 100;
        fold_cursor(&mut cursor, Some(50));
        assert_eq!(cursor, 100);
        fold_cursor(&mut cursor, Some(200));
        assert_eq!(cursor, 200);
        fold_cursor(&mut cursor, None);
        assert_eq!(cursor, 200);
    }
}
