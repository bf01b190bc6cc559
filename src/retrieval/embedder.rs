use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::RunError;

/// Embedding backend used by the retrieval index
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Configuration for an OpenAI-compatible embeddings endpoint
#[derive(Debug, Clone)]
pub struct OpenAiEmbedderConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

pub const EMBEDDING_KEY_VARIABLE: &str = "OPENAI_API_KEY";

impl OpenAiEmbedderConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self, RunError> {
        Self::from_key(std::env::var(EMBEDDING_KEY_VARIABLE).ok())
    }

    /// Blank keys count as missing
    pub fn from_key(api_key: Option<String>) -> Result<Self, RunError> {
        api_key
            .filter(|k| !k.trim().is_empty())
            .map(Self::new)
            .ok_or_else(|| RunError::MissingCredential {
                variable: EMBEDDING_KEY_VARIABLE.to_string(),
            })
    }

    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "text-embedding-3-large".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

/// Embeddings over HTTP (`POST {base_url}/embeddings`)
pub struct OpenAiEmbedder {
    client: Client,
    config: OpenAiEmbedderConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiEmbedderConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to embeddings API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embeddings API error: {} - {}", status, body);
        }

        let mut response: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embeddings API response")?;

        if response.data.len() != texts.len() {
            anyhow::bail!(
                "Embeddings API returned {} vectors for {} inputs",
                response.data.len(),
                texts.len()
            );
        }

        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Deterministic bag-of-words feature hashing, for offline runs and tests
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimensions: 256 }
    }
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(head) % self.dimensions as u64) as usize;
            // Sign from a separate byte so it is independent of the bucket
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashing_embedder_deterministic_and_normalized() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed_one("Waiting for the doctor");
        let b = embedder.embed_one("waiting FOR the doctor!");
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hashing_embedder_shared_words_score_higher() {
        let embedder = HashingEmbedder::default();
        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        let care = embedder.embed_one("caring for my mother");
        let close = embedder.embed_one("caring for mother");
        let far = embedder.embed_one("weather forecast tomorrow");

        assert!(dot(&care, &close) > dot(&care, &far));
    }

    #[test]
    fn test_embedder_config_requires_key() {
        let missing = OpenAiEmbedderConfig::from_key(None).unwrap_err();
        assert_eq!(
            missing,
            RunError::MissingCredential {
                variable: "OPENAI_API_KEY".to_string()
            }
        );
        assert!(OpenAiEmbedderConfig::from_key(Some("   ".to_string())).is_err());

        let config = OpenAiEmbedderConfig::from_key(Some("sk-test".to_string())).unwrap();
        assert_eq!(config.api_key, "sk-test");
    }

    #[test]
    fn test_hashing_embedder_empty_text_is_zero() {
        let embedder = HashingEmbedder::new(8);
        assert!(embedder.embed_one("   ").iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_hashing_embedder_batch() {
        let embedder = HashingEmbedder::new(16);
        let vectors = embedder
            .embed(&["one".to_string(), "two".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 16);
    }
}
