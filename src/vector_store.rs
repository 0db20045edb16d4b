//! Owner-partitioned vector storage.
//!
//! The [`VectorStore`] trait defines the three operations the pipeline
//! needs: collection bootstrap, point upsert, and owner-scoped search.
//! Every record belongs to exactly one owner and every query is filtered
//! by owner; cross-owner leakage is a correctness violation, enforced at
//! the storage layer by a tenant payload index on `owner_id`.
//!
//! Implementations:
//! - **[`QdrantStore`]** — talks to the Qdrant REST API directly with
//!   `reqwest`; no vendor SDK required.
//! - **[`MemoryStore`]** — brute-force in-memory implementation for tests.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use crate::models::SearchHit;

/// Abstract owner-partitioned vector storage backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection and its owner payload index if missing.
    /// Must be called before the first upsert or search. Idempotent.
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()>;

    /// Insert or overwrite one point. Re-upserting the same `point_id`
    /// replaces the record rather than duplicating it.
    async fn upsert(
        &self,
        collection: &str,
        owner_id: i64,
        point_id: &str,
        payload: serde_json::Value,
        vector: Vec<f32>,
    ) -> Result<()>;

    /// Nearest-neighbor search scoped to `owner_id`.
    async fn search(
        &self,
        collection: &str,
        owner_id: i64,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>>;
}

// ============ Qdrant (REST) ============

/// Vector store backed by a Qdrant instance, via its REST API.
pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    distance: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    points: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
    payload: Option<serde_json::Value>,
}

impl QdrantStore {
    pub fn new(base_url: &str, distance: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            distance: distance.to_string(),
        }
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        let url = format!("{}/collections/{}", self.base_url, collection);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("check collection '{}'", collection))?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()> {
        if self.collection_exists(collection).await? {
            debug!(collection, "collection already exists");
            return Ok(());
        }

        // Disable the global HNSW graph and build per-tenant links instead;
        // all queries carry an owner filter.
        let url = format!("{}/collections/{}", self.base_url, collection);
        let body = serde_json::json!({
            "vectors": { "size": dims, "distance": self.distance },
            "hnsw_config": { "payload_m": 42, "m": 0 },
        });
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("create collection '{}'", collection))?;
        if !response.status().is_success() {
            bail!(
                "create collection '{}' failed: {}",
                collection,
                response.status()
            );
        }

        let url = format!("{}/collections/{}/index", self.base_url, collection);
        let body = serde_json::json!({
            "field_name": "owner_id",
            "field_schema": { "type": "keyword", "is_tenant": true },
        });
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("create owner index on '{}'", collection))?;
        if !response.status().is_success() {
            bail!(
                "create owner index on '{}' failed: {}",
                collection,
                response.status()
            );
        }

        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        owner_id: i64,
        point_id: &str,
        mut payload: serde_json::Value,
        vector: Vec<f32>,
    ) -> Result<()> {
        if let Some(map) = payload.as_object_mut() {
            map.insert(
                "owner_id".to_string(),
                serde_json::Value::String(owner_id.to_string()),
            );
        }

        let url = format!("{}/collections/{}/points?wait=true", self.base_url, collection);
        let body = serde_json::json!({
            "points": [{ "id": point_id, "payload": payload, "vector": vector }],
        });
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("upsert point into '{}'", collection))?;
        if !response.status().is_success() {
            bail!(
                "upsert point into '{}' failed: {}",
                collection,
                response.status()
            );
        }

        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        owner_id: i64,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let url = format!("{}/collections/{}/points/query", self.base_url, collection);
        let body = serde_json::json!({
            "query": query_vector,
            "filter": {
                "must": [{ "key": "owner_id", "match": { "value": owner_id.to_string() } }],
            },
            "limit": limit,
            "with_payload": true,
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("query collection '{}'", collection))?;
        if !response.status().is_success() {
            bail!("query '{}' failed: {}", collection, response.status());
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .with_context(|| "decode query response")?;

        Ok(parsed
            .result
            .points
            .into_iter()
            .map(|p| SearchHit {
                id: match p.id {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                },
                score: p.score,
                payload: p.payload.unwrap_or(serde_json::Value::Null),
            })
            .collect())
    }
}

// ============ In-memory ============

struct StoredPoint {
    id: String,
    owner_id: i64,
    payload: serde_json::Value,
    vector: Vec<f32>,
}

/// In-memory store for tests. Brute-force dot product over all points.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<StoredPoint>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Total number of points in a collection, across all owners.
    pub fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap()
            .get(collection)
            .map_or(0, |points| points.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, collection: &str, _dims: usize) -> Result<()> {
        self.collections
            .write()
            .unwrap()
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        owner_id: i64,
        point_id: &str,
        mut payload: serde_json::Value,
        vector: Vec<f32>,
    ) -> Result<()> {
        if let Some(map) = payload.as_object_mut() {
            map.insert(
                "owner_id".to_string(),
                serde_json::Value::String(owner_id.to_string()),
            );
        }

        let mut collections = self.collections.write().unwrap();
        let points = collections.entry(collection.to_string()).or_default();

        let point = StoredPoint {
            id: point_id.to_string(),
            owner_id,
            payload,
            vector,
        };
        match points.iter_mut().find(|p| p.id == point_id) {
            Some(existing) => *existing = point,
            None => points.push(point),
        }

        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        owner_id: i64,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let collections = self.collections.read().unwrap();
        let Some(points) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<SearchHit> = points
            .iter()
            .filter(|p| p.owner_id == owner_id)
            .map(|p| SearchHit {
                id: p.id.clone(),
                score: dot(&p.vector, query_vector),
                payload: p.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_never_crosses_owners() {
        let store = MemoryStore::new();
        store.ensure_collection("emails", 3).await.unwrap();

        let vector = vec![1.0, 0.0, 0.0];
        store
            .upsert("emails", 1, "a", serde_json::json!({"id": "a"}), vector.clone())
            .await
            .unwrap();
        store
            .upsert("emails", 2, "b", serde_json::json!({"id": "b"}), vector.clone())
            .await
            .unwrap();

        let hits = store.search("emails", 1, &vector, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");

        let hits = store.search("emails", 2, &vector, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn upsert_same_id_overwrites() {
        let store = MemoryStore::new();
        store.ensure_collection("emails", 2).await.unwrap();

        store
            .upsert("emails", 1, "a", serde_json::json!({"v": 1}), vec![1.0, 0.0])
            .await
            .unwrap();
        store
            .upsert("emails", 1, "a", serde_json::json!({"v": 2}), vec![0.0, 1.0])
            .await
            .unwrap();

        assert_eq!(store.point_count("emails"), 1);
        let hits = store.search("emails", 1, &[0.0, 1.0], 10).await.unwrap();
        assert_eq!(hits[0].payload["v"], 2);
    }

    #[tokio::test]
    async fn search_ranks_by_dot_product() {
        let store = MemoryStore::new();
        store.ensure_collection("emails", 2).await.unwrap();

        store
            .upsert("emails", 1, "near", serde_json::json!({}), vec![1.0, 0.0])
            .await
            .unwrap();
        store
            .upsert("emails", 1, "far", serde_json::json!({}), vec![0.1, 0.9])
            .await
            .unwrap();

        let hits = store.search("emails", 1, &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits[0].id, "near");
        assert_eq!(hits[1].id, "far");
    }

    #[tokio::test]
    async fn search_respects_limit() {
        let store = MemoryStore::new();
        store.ensure_collection("emails", 1).await.unwrap();
        for i in 0..5 {
            store
                .upsert("emails", 1, &format!("p{}", i), serde_json::json!({}), vec![i as f32])
                .await
                .unwrap();
        }
        let hits = store.search("emails", 1, &[1.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
    }
}
