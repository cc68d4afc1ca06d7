//! radkit-backed [`StructuredGenerator`].

use async_trait::async_trait;

use super::{DecompositionDraft, DiagramDraft, RerankDraft, StructuredGenerator};
use crate::config::FlowPilotConfig;
use crate::error::GenerationError;
use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::skills::prompts;

/// Stage ids used for per-stage model overrides
pub const DECOMPOSER_STAGE: &str = "decomposer";
pub const MAPPER_STAGE: &str = "tool_mapper";
pub const DIAGRAM_STAGE: &str = "diagram";

/// Generator that calls a hosted LLM through radkit's `LlmFunction`
#[derive(Debug, Clone)]
pub struct LlmGenerator {
    decomposer: ModelConfig,
    mapper: ModelConfig,
    diagram: ModelConfig,
}

impl LlmGenerator {
    pub fn new(decomposer: ModelConfig, mapper: ModelConfig, diagram: ModelConfig) -> Self {
        Self {
            decomposer,
            mapper,
            diagram,
        }
    }

    pub fn from_config(config: &FlowPilotConfig) -> Self {
        Self::new(
            config.model_config(DECOMPOSER_STAGE),
            config.model_config(MAPPER_STAGE),
            config.model_config(DIAGRAM_STAGE),
        )
    }

    /// API key variables the configured providers read, without duplicates
    pub fn key_vars(&self) -> Vec<&'static str> {
        let mut vars: Vec<&'static str> = Vec::new();
        for config in [&self.decomposer, &self.mapper, &self.diagram] {
            let var = config.provider.env_var();
            if !vars.contains(&var) {
                vars.push(var);
            }
        }
        vars
    }
}

fn classify(err: anyhow::Error) -> GenerationError {
    GenerationError::classify(&format!("{:#}", err))
}

#[async_trait]
impl StructuredGenerator for LlmGenerator {
    #[tracing::instrument(skip_all, fields(model = %self.decomposer.model))]
    async fn decompose(&self, prompt: &str) -> Result<DecompositionDraft, GenerationError> {
        let result: anyhow::Result<DecompositionDraft> = async {
            run_llm_function!(
                &self.decomposer,
                DecompositionDraft,
                prompts::DECOMPOSER,
                prompt
            )
        }
        .await;
        result.map_err(classify)
    }

    #[tracing::instrument(skip_all, fields(model = %self.mapper.model))]
    async fn rerank(&self, prompt: &str) -> Result<RerankDraft, GenerationError> {
        let result: anyhow::Result<RerankDraft> = async {
            run_llm_function!(&self.mapper, RerankDraft, prompts::TOOL_MAPPER, prompt)
        }
        .await;
        result.map_err(classify)
    }

    #[tracing::instrument(skip_all, fields(model = %self.diagram.model))]
    async fn render_diagram(&self, prompt: &str) -> Result<DiagramDraft, GenerationError> {
        let result: anyhow::Result<DiagramDraft> = async {
            run_llm_function!(&self.diagram, DiagramDraft, prompts::DIAGRAM, prompt)
        }
        .await;
        result.map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LlmProvider;

    #[test]
    fn test_from_config_resolves_each_stage() {
        let mut config = FlowPilotConfig::default();
        config
            .per_stage_models
            .insert(MAPPER_STAGE.into(), "claude-3-5-haiku-latest".into());
        let generator = LlmGenerator::from_config(&config);
        assert_eq!(generator.decomposer.provider, LlmProvider::Anthropic);
        assert_eq!(generator.mapper.model, "claude-3-5-haiku-latest");
        assert_eq!(generator.diagram.model, LlmProvider::Anthropic.default_model());
    }

    #[test]
    fn test_key_vars_follow_stage_providers() {
        let mut config = FlowPilotConfig::default();
        assert_eq!(LlmGenerator::from_config(&config).key_vars(), vec!["ANTHROPIC_API_KEY"]);

        config
            .per_stage_providers
            .insert(DIAGRAM_STAGE.into(), LlmProvider::Gemini);
        config
            .per_stage_providers
            .insert(MAPPER_STAGE.into(), LlmProvider::Gemini);
        assert_eq!(
            LlmGenerator::from_config(&config).key_vars(),
            vec!["ANTHROPIC_API_KEY", "GEMINI_API_KEY"]
        );
    }
}
