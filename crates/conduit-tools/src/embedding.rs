//! Embedding client shared by the vector catalog
//!
//! Generates vector embeddings for `"<toolName>: <description>"` strings so
//! the router's per-app tool search (spec §4.7) can run cosine similarity.

use tracing::warn;

/// Embedding dimension fixed by spec §4.7
pub const EMBEDDING_DIM: usize = 1536;

#[derive(Clone)]
pub struct EmbeddingClient {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(api_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Generate an embedding for a single text. Fails open with a zero
    /// vector on any API error so vector search degrades rather than
    /// blocking the turn.
    pub async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": &self.model,
                "input": text,
                "encoding_format": "float",
            }))
            .send()
            .await;

        match response {
            Ok(resp) => {
                if resp.status().is_success() {
                    let json: serde_json::Value = resp.json().await?;
                    if let Some(embedding) = json["data"][0]["embedding"].as_array() {
                        let vec: Vec<f32> = embedding
                            .iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect();

                        if vec.len() == EMBEDDING_DIM {
                            return Ok(vec);
                        }
                        warn!(
                            "unexpected embedding dimension: {} (expected {})",
                            vec.len(),
                            EMBEDDING_DIM
                        );
                    }
                }
                warn!("embedding API returned non-success status");
                Ok(zero_embedding())
            }
            Err(e) => {
                warn!("failed to generate embedding: {}", e);
                Ok(zero_embedding())
            }
        }
    }

    /// Generate embeddings for multiple texts in one request (ingestion batching)
    pub async fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": &self.model,
                "input": texts,
                "encoding_format": "float",
            }))
            .send()
            .await;

        match response {
            Ok(resp) => {
                if resp.status().is_success() {
                    let json: serde_json::Value = resp.json().await?;
                    if let Some(data) = json["data"].as_array() {
                        let embeddings: Vec<Vec<f32>> = data
                            .iter()
                            .filter_map(|item| {
                                item["embedding"].as_array().map(|arr| {
                                    arr.iter()
                                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                                        .collect()
                                })
                            })
                            .collect();

                        if embeddings.len() == texts.len() {
                            return Ok(embeddings);
                        }
                    }
                }
                warn!("batch embedding API call failed, using zero embeddings");
                Ok(texts.iter().map(|_| zero_embedding()).collect())
            }
            Err(e) => {
                warn!("failed to generate batch embeddings: {}", e);
                Ok(texts.iter().map(|_| zero_embedding()).collect())
            }
        }
    }
}

fn zero_embedding() -> Vec<f32> {
    vec![0.0; EMBEDDING_DIM]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_embedding_has_expected_dimension() {
        let emb = zero_embedding();
        assert_eq!(emb.len(), EMBEDDING_DIM);
        assert!(emb.iter().all(|&x| x == 0.0));
    }
}
