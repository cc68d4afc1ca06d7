//! Request and result types for a pipeline run.

use serde::{Deserialize, Serialize};

use crate::catalog::Platform;
use crate::skills::decomposer_skill::Step;
use crate::skills::diagram_skill::DiagramDocument;
use crate::skills::mapper_skill::Mapping;

/// A user's automation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    /// Restrict mapping to one platform; `None` defers to configuration
    #[serde(default)]
    pub platform: Option<Platform>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            platform: None,
        }
    }

    pub fn with_platform(text: impl Into<String>, platform: Platform) -> Self {
        Self {
            text: text.into(),
            platform: Some(platform),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Complete,
    /// The request contained nothing to automate
    NoActionableSteps,
    /// Steps and mappings are usable but the diagram failed validation
    DiagramInvalid,
}

/// Everything produced for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub status: WorkflowStatus,
    pub steps: Vec<Step>,
    pub mappings: Vec<Mapping>,
    #[serde(default)]
    pub diagram: Option<DiagramDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_error: Option<String>,
}

impl WorkflowResult {
    pub fn empty() -> Self {
        Self {
            status: WorkflowStatus::NoActionableSteps,
            steps: Vec::new(),
            mappings: Vec::new(),
            diagram: None,
            diagram_error: None,
        }
    }

    pub fn diagram_source(&self) -> Option<&str> {
        self.diagram.as_ref().map(|d| d.source.as_str())
    }

    pub fn diagram_valid(&self) -> bool {
        self.diagram.as_ref().map(|d| d.valid).unwrap_or(false)
    }

    pub fn unresolved_count(&self) -> usize {
        self.mappings.iter().filter(|m| !m.is_resolved()).count()
    }
}
