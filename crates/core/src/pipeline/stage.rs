//! # Pipeline Stages
//!
//! Per-request stage state machine.
//!
//! ```text
//! Decomposing ─▶ Mapping ─▶ Synthesizing ─▶ Complete
//!      └────────────┴─────────────┴───────▶ Failed
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Breaking the request into steps
    Decomposing,
    /// Resolving steps against the action catalog
    Mapping,
    /// Building and validating the diagram
    Synthesizing,
    Complete,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Decomposing => "decomposing",
            PipelineStage::Mapping => "mapping",
            PipelineStage::Synthesizing => "synthesizing",
            PipelineStage::Complete => "complete",
            PipelineStage::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pipeline state machine
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub stage: PipelineStage,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            stage: PipelineStage::Decomposing,
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to the next stage
    pub fn advance(&mut self) {
        self.stage = match self.stage {
            PipelineStage::Decomposing => PipelineStage::Mapping,
            PipelineStage::Mapping => PipelineStage::Synthesizing,
            PipelineStage::Synthesizing => PipelineStage::Complete,
            PipelineStage::Complete => PipelineStage::Complete,
            PipelineStage::Failed => PipelineStage::Failed,
        };
    }

    /// Skip the remaining stages
    pub fn finish(&mut self) {
        if self.stage != PipelineStage::Failed {
            self.stage = PipelineStage::Complete;
        }
    }

    pub fn fail(&mut self) {
        self.stage = PipelineStage::Failed;
    }

    /// Check if pipeline is complete
    pub fn is_complete(&self) -> bool {
        matches!(self.stage, PipelineStage::Complete | PipelineStage::Failed)
    }

    /// Check if pipeline succeeded
    pub fn is_success(&self) -> bool {
        self.stage == PipelineStage::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_advance() {
        let mut pipeline = Pipeline::new();
        assert_eq!(pipeline.stage, PipelineStage::Decomposing);

        pipeline.advance();
        assert_eq!(pipeline.stage, PipelineStage::Mapping);

        pipeline.advance();
        pipeline.advance();
        assert!(pipeline.is_success());

        pipeline.advance();
        assert_eq!(pipeline.stage, PipelineStage::Complete);
    }

    #[test]
    fn test_failure_is_terminal() {
        let mut pipeline = Pipeline::new();
        pipeline.advance();
        pipeline.fail();
        assert!(pipeline.is_complete());
        assert!(!pipeline.is_success());

        pipeline.advance();
        pipeline.finish();
        assert_eq!(pipeline.stage, PipelineStage::Failed);
    }

    #[test]
    fn test_stage_display_matches_serde() {
        assert_eq!(PipelineStage::Synthesizing.to_string(), "synthesizing");
        assert_eq!(
            serde_json::to_string(&PipelineStage::Mapping).unwrap(),
            "\"mapping\""
        );
    }
}
