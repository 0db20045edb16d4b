//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]** — always returns `None`; used when embeddings
//!   are not configured.
//! - **[`OpenAiEmbedder`]** — calls the OpenAI embeddings API through the
//!   [`Backoff`] executor.
//!
//! Embedding failure is absence, not an error: `embed` returns `None` and
//! logs the cause. Callers must treat "no vector" as "skip this document" —
//! a missing vector is never the same thing as a zero vector.
//!
//! # Provider Selection
//!
//! Use [`create_embedder`] to instantiate the appropriate provider based
//! on the configuration.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::backoff::{Backoff, RemoteError};
use crate::config::EmbeddingConfig;

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a single text. Returns `None` on any failure.
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

/// A no-op embedder used when `embedding.provider = "disabled"`.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }
}

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable. Transient API failures (429, 5xx,
/// network) are retried by the backoff executor; whatever survives retry is
/// logged and mapped to `None`.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    api_key: String,
    backoff: Backoff,
}

impl OpenAiEmbedder {
    /// Create a new OpenAI embedder from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig, backoff: Backoff) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key.trim().to_string(),
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model: config.model.clone(),
            dims: config.dims,
            api_key,
            backoff,
        })
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>, RemoteError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(RemoteError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::from_status(status.as_u16()));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RemoteError::Fatal(format!("decode embeddings response: {}", e)))?;

        parse_embedding_response(&json)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            return None;
        }

        match self
            .backoff
            .execute(|| self.request_embedding(text))
            .await
        {
            Ok(vector) => Some(vector),
            Err(err) => {
                warn!(model = %self.model, error = %err, "embedding failed, document will be skipped");
                None
            }
        }
    }
}

/// Extract the first `data[].embedding` array from an embeddings response.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>, RemoteError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| RemoteError::Fatal("missing embedding in response".into()))?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

/// Create the appropriate [`Embedder`] based on configuration.
///
/// # Errors
///
/// Returns an error for unknown provider names or if the OpenAI provider
/// cannot be initialized (missing API key).
pub fn create_embedder(config: &EmbeddingConfig, backoff: Backoff) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config, backoff)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_embedder_returns_none() {
        let embedder = DisabledEmbedder;
        assert!(embedder.embed("some text").await.is_none());
        assert_eq!(embedder.model_name(), "disabled");
        assert_eq!(embedder.dims(), 0);
    }

    #[test]
    fn parses_embedding_response() {
        let json = serde_json::json!({
            "data": [{"embedding": [0.25, -1.5, 3.0]}]
        });
        let vector = parse_embedding_response(&json).unwrap();
        assert_eq!(vector, vec![0.25, -1.5, 3.0]);
    }

    #[test]
    fn rejects_malformed_response() {
        let json = serde_json::json!({"data": []});
        assert!(parse_embedding_response(&json).is_err());
    }
}
