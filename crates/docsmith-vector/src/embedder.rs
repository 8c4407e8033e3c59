use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, VectorError};

/// `embed(text) → vector` contract. The dimension is fixed at configuration
/// time; implementations must reject anything else.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;
}

/// Embedding provider speaking the common `/v1/embeddings` wire shape.
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    /// The client is built by the caller so the operator's IPv4 preference
    /// and the 20 s embedding deadline apply.
    pub fn new(
        client: reqwest::Client,
        api_key: String,
        base_url: String,
        model: String,
        dimension: usize,
    ) -> Self {
        Self {
            client,
            api_key,
            base_url,
            model,
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let url = format!("{}/v1/embeddings", self.base_url);
        debug!(count = texts.len(), model = %self.model, "embedding request");

        let resp = self
            .client
            .post(&url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(VectorError::Api { status, message });
        }

        let api_resp: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| VectorError::Parse(e.to_string()))?;

        let mut vectors = Vec::with_capacity(api_resp.data.len());
        for item in api_resp.data {
            if item.embedding.len() != self.dimension {
                return Err(VectorError::DimensionMismatch {
                    expected: self.dimension,
                    got: item.embedding.len(),
                });
            }
            vectors.push(item.embedding);
        }
        if vectors.len() != texts.len() {
            return Err(VectorError::Embedding(format!(
                "provider returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}
