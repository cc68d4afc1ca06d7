//! # Configuration
//!
//! `FlowPilotConfig` is handed to the core at construction time. The core
//! never reads configuration files on its own; the transport shell decides
//! where the config comes from and passes in the embedding API key. Model
//! provider keys are resolved by radkit when a client is created.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::catalog::Platform;
use crate::generator::RetryPolicy;
use crate::models::{LlmProvider, ModelConfig};

/// Secondary ranking pass applied to index candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankMode {
    /// Accept the top candidate when it clears the acceptance threshold
    #[default]
    Threshold,
    /// Ask the generator to pick among the candidates, then apply the threshold
    Model,
}

/// How the first diagram draft is produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Local Mermaid emitter; the generator is only used for repairs
    #[default]
    Deterministic,
    /// Generator renders from the graph JSON
    Model,
}

/// Embedding backend used for query vectors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum EmbeddingConfig {
    Hashing {
        #[serde(default = "default_hashing_dimensions")]
        dimensions: usize,
    },
    OpenAi {
        #[serde(default = "default_embedding_model")]
        model: String,
        #[serde(default)]
        base_url: Option<String>,
    },
}

fn default_hashing_dimensions() -> usize {
    512
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig::Hashing {
            dimensions: default_hashing_dimensions(),
        }
    }
}

/// Top-level configuration for the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowPilotConfig {
    /// Global LLM provider (default: Anthropic)
    pub provider: LlmProvider,
    /// Global model; falls back to the provider default
    pub model: Option<String>,
    /// Base URL override for OpenAI-compatible endpoints
    pub base_url: Option<String>,
    /// Per-stage model overrides (stage id -> model name)
    pub per_stage_models: HashMap<String, String>,
    /// Per-stage provider overrides (stage id -> provider)
    pub per_stage_providers: HashMap<String, LlmProvider>,
    /// Minimum similarity for a mapping to be accepted
    pub acceptance_threshold: f32,
    /// Candidates fetched per step
    pub top_k: usize,
    /// Results returned by the catalog search pass-through
    pub search_limit: usize,
    pub rerank: RerankMode,
    pub render: RenderMode,
    /// Corrective re-issues after a schema violation
    pub decomposition_retries: u32,
    /// Repair iterations after a diagram fails validation
    pub repair_attempts: u32,
    /// Backoff for transient external-call failures
    pub retry: RetryPolicy,
    pub generator_timeout_secs: u64,
    pub embedding_timeout_secs: u64,
    /// Platform used when a query carries no hint; `None` searches all platforms
    pub default_platform: Option<Platform>,
    /// SQLite catalog file
    pub catalog_path: String,
    pub embedding: EmbeddingConfig,
    /// Fallback log level when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for FlowPilotConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            model: None,
            base_url: None,
            per_stage_models: HashMap::new(),
            per_stage_providers: HashMap::new(),
            acceptance_threshold: 0.75,
            top_k: 5,
            search_limit: 10,
            rerank: RerankMode::Threshold,
            render: RenderMode::Deterministic,
            decomposition_retries: 2,
            repair_attempts: 2,
            retry: RetryPolicy::default(),
            generator_timeout_secs: 60,
            embedding_timeout_secs: 15,
            default_platform: None,
            catalog_path: ".flowpilot/catalog.db".to_string(),
            embedding: EmbeddingConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl FlowPilotConfig {
    /// Load from a JSON file; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.acceptance_threshold) {
            anyhow::bail!(
                "acceptance_threshold must be within [0, 1], got {}",
                self.acceptance_threshold
            );
        }
        if self.top_k == 0 {
            anyhow::bail!("top_k must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Resolve the model for a stage: per-stage override -> global -> provider default
    pub fn model_config(&self, stage: &str) -> ModelConfig {
        let provider = self
            .per_stage_providers
            .get(stage)
            .cloned()
            .unwrap_or_else(|| self.provider.clone());

        let model = self
            .per_stage_models
            .get(stage)
            .or(self.model.as_ref())
            .cloned()
            .unwrap_or_else(|| provider.default_model().to_string());

        let base_url = if provider.supports_base_url() {
            self.base_url.clone()
        } else {
            None
        };

        ModelConfig {
            provider,
            model,
            base_url,
        }
    }

    pub fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator_timeout_secs)
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs)
    }

    /// Explicit hint wins, then the configured default, then all platforms.
    pub fn resolve_platform(&self, hint: Option<Platform>) -> Option<Platform> {
        hint.or(self.default_platform)
    }
}
