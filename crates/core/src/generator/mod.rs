//! # Structured Generator
//!
//! Capability boundary around every generative call in the pipeline.
//!
//! ```text
//! Decomposer ──decompose()──────┐
//! ToolMapper ──rerank()─────────┼──▶ StructuredGenerator ──▶ LlmGenerator (radkit)
//! Synthesizer ─render_diagram()─┘                        └─▶ ScriptedGenerator (tests)
//! ```
//!
//! Each method returns a typed draft; the calling stage validates it and
//! decides whether to retry.

pub mod llm;
pub mod retry;
pub mod scripted;

use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::GenerationError;

pub use llm::LlmGenerator;
pub use retry::{with_backoff, RetryPolicy};
pub use scripted::{GeneratorCall, ScriptedGenerator};

/// A single step as proposed by the model
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput, PartialEq)]
pub struct DraftStep {
    /// One-sentence description of the step
    pub description: String,
    /// Imperative verb, lowercase (e.g. "extract", "send")
    pub verb: String,
    /// Object the verb acts on (e.g. "invoice PDF")
    pub target: String,
    /// Condition text for branching or looping steps ("if ...", "for each ...", "while ...")
    #[serde(default)]
    pub condition: Option<String>,
    /// Number of following steps governed by the condition (default 1)
    #[serde(default)]
    pub scope: Option<u32>,
}

impl DraftStep {
    pub fn new(
        verb: impl Into<String>,
        target: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            verb: verb.into(),
            target: target.into(),
            condition: None,
            scope: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>, scope: u32) -> Self {
        self.condition = Some(condition.into());
        self.scope = Some(scope);
        self
    }
}

/// Output of the decomposition call
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput, PartialEq)]
pub struct DecompositionDraft {
    /// Steps in execution order; empty when the request is not actionable
    pub steps: Vec<DraftStep>,
}

/// Output of the re-rank call
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput, PartialEq)]
pub struct RerankDraft {
    /// Chosen candidate id, or null when none of the candidates fits
    #[serde(default)]
    pub action_id: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Output of the diagram render/repair call
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput, PartialEq)]
pub struct DiagramDraft {
    /// Complete Mermaid flowchart source
    pub source: String,
}

/// Generative capability used by the pipeline stages
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    async fn decompose(&self, prompt: &str) -> Result<DecompositionDraft, GenerationError>;

    async fn rerank(&self, prompt: &str) -> Result<RerankDraft, GenerationError>;

    async fn render_diagram(&self, prompt: &str) -> Result<DiagramDraft, GenerationError>;
}

/// Bound an external call; an elapsed timer counts as a transient failure.
pub async fn with_timeout<T, Fut>(limit: Duration, call: Fut) -> Result<T, GenerationError>
where
    Fut: Future<Output = Result<T, GenerationError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GenerationError::Transient(format!(
            "call timed out after {}s",
            limit.as_secs_f32()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let result: Result<(), GenerationError> = with_timeout(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(result.unwrap_err().is_transient());
    }

    #[test]
    fn test_draft_step_accepts_missing_optionals() {
        let step: DraftStep =
            serde_json::from_str(r#"{"description": "Open Excel", "verb": "open", "target": "Excel"}"#)
                .unwrap();
        assert!(step.condition.is_none());
        assert!(step.scope.is_none());
    }
}
