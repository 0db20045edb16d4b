//! Owner-scoped semantic search over ingested mail.
//!
//! Embeds the query text and runs a nearest-neighbor search restricted to
//! the owner's partition of the collection.

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::models::SearchHit;
use crate::vector_store::VectorStore;

/// Search one owner's documents. Fails when the query cannot be embedded
/// (search without a vector is meaningless, unlike ingestion where a
/// missing embedding just skips a document).
pub async fn search_documents(
    embedder: &Arc<dyn Embedder>,
    store: &Arc<dyn VectorStore>,
    collection: &str,
    owner_id: i64,
    query: &str,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let Some(query_vector) = embedder.embed(query).await else {
        bail!("failed to embed search query");
    };

    store
        .search(collection, owner_id, &query_vector, limit)
        .await
}

/// One-line summary of a hit for CLI output.
pub fn format_hit(hit: &SearchHit) -> String {
    let subject = hit.payload["subject"].as_str().unwrap_or("(no subject)");
    let from = hit.payload["from"].as_str().unwrap_or("(unknown sender)");
    let snippet = hit.payload["snippet"].as_str().unwrap_or("");
    format!("{:.4}  {}  —  {}  {}", hit.score, subject, from, snippet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledEmbedder;
    use crate::vector_store::MemoryStore;

    #[tokio::test]
    async fn search_fails_without_query_embedding() {
        let embedder: Arc<dyn Embedder> = Arc::new(DisabledEmbedder);
        let store: Arc<dyn VectorStore> = Arc::new(MemoryStore::new());
        let result = search_documents(&embedder, &store, "emails", 1, "anything", 5).await;
        assert!(result.is_err());
    }

    #[test]
    fn formats_hit_with_missing_fields() {
        let hit = SearchHit {
            id: "x".into(),
            score: 0.5,
            payload: serde_json::json!({}),
        };
        let line = format_hit(&hit);
        assert!(line.contains("(no subject)"));
    }
}
