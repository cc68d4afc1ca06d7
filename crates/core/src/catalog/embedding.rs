//! # Embedders
//!
//! Turn text into vectors for the action index.
//!
//! - [`HashingEmbedder`]: local feature hashing, no network. Deterministic, so
//!   catalogs built with it can be queried offline and in tests.
//! - [`OpenAiEmbedder`]: OpenAI-compatible `/embeddings` endpoint.
//!
//! The same embedder must be used to build a catalog and to query it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::IndexError;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError>;

    /// Identifier stored alongside catalog rows
    fn name(&self) -> String;
}

/// Build the embedder selected by the configuration.
///
/// `api_key` is only used by the remote embedder; the caller resolves it once
/// at startup.
pub fn from_config(
    config: &EmbeddingConfig,
    timeout: Duration,
    api_key: Option<String>,
) -> Box<dyn Embedder> {
    match config {
        EmbeddingConfig::Hashing { dimensions } => Box::new(HashingEmbedder::new(*dimensions)),
        EmbeddingConfig::OpenAi { model, base_url } => {
            let mut embedder = OpenAiEmbedder::new(model.clone()).with_timeout(timeout);
            if let Some(key) = api_key {
                embedder = embedder.with_api_key(key);
            }
            if let Some(url) = base_url {
                embedder = embedder.with_base_url(url.clone());
            }
            Box::new(embedder)
        }
    }
}

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "of", "to", "into", "from", "in", "on", "for", "with", "them",
    "it", "each", "then", "is",
];

/// Bag-of-words feature hashing with light suffix stemming
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(512)
    }
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        for token in tokens(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        Ok(self.vectorize(text))
    }

    fn name(&self) -> String {
        format!("hashing-{}", self.dimensions)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .map(|t| stem(&t))
}

fn stem(token: &str) -> String {
    let len = token.len();
    if len > 4 && token.ends_with("ies") {
        format!("{}y", &token[..len - 3])
    } else if len > 5 && token.ends_with("ing") {
        token[..len - 3].to_string()
    } else if len > 4 && token.ends_with("ed") {
        token[..len - 2].to_string()
    } else if len > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..len - 1].to_string()
    } else {
        token.to_string()
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity clamped to `[0, 1]`; zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Client for an OpenAI-compatible embeddings endpoint
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            model: model.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into()).filter(|key| !key.trim().is_empty());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    #[tracing::instrument(skip(self, text), fields(model = %self.model, chars = text.len()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| IndexError::unavailable("no API key configured for the embedding endpoint"))?;

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(&EmbeddingRequest {
                input: text,
                model: &self.model,
            })
            .send()
            .await
            .map_err(|e| IndexError::unavailable(format!("embedding request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::unavailable(format!(
                "embedding endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| IndexError::unavailable(format!("invalid embedding response: {}", e)))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| IndexError::unavailable("embedding response contained no vectors"))
    }

    fn name(&self) -> String {
        format!("openai-{}", self.model)
    }
}
