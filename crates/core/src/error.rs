//! # Errors
//!
//! Typed failures for every pipeline stage.
//!
//! ```text
//! GenerationError ──(retries exhausted)──▶ PipelineError::DecompositionFailed
//! IndexError ──────(during mapping)──────▶ PipelineError::MappingFailed
//! IndexError ──────(during search)───────▶ PipelineError::IndexUnavailable
//! DiagramError ────(non-fatal)───────────▶ WorkflowResult::diagram_error
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::PipelineStage;

/// Failure of the retrieval backend (store or embedding service)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("action index unavailable: {0}")]
    Unavailable(String),
}

impl IndexError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        IndexError::Unavailable(reason.into())
    }
}

/// Failure reported by a [`StructuredGenerator`](crate::generator::StructuredGenerator)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// Timeouts, rate limits and upstream 5xx; retried with backoff
    #[error("transient generator failure: {0}")]
    Transient(String),
    /// Output did not match the requested schema; retried with a corrective prompt
    #[error("generator output violated the schema: {0}")]
    Schema(String),
    #[error("generator failure: {0}")]
    Fatal(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }

    /// Map a provider error message onto a retry class.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        let transient = [
            "timeout",
            "timed out",
            "rate limit",
            "ratelimit",
            "429",
            "overloaded",
            "502",
            "503",
            "504",
            "connection reset",
            "connection refused",
            "temporarily unavailable",
        ];
        let schema = [
            "json", "parse", "schema", "deserializ", "missing field", "invalid type", "expected",
        ];

        if transient.iter().any(|needle| lower.contains(needle)) {
            GenerationError::Transient(message.to_string())
        } else if schema.iter().any(|needle| lower.contains(needle)) {
            GenerationError::Schema(message.to_string())
        } else {
            GenerationError::Fatal(message.to_string())
        }
    }
}

/// Diagram synthesis could not produce a valid document
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiagramError {
    #[error("diagram invalid after {attempts} render attempt(s): {reason}")]
    Invalid { attempts: u32, reason: String },
}

/// Fatal pipeline failure, tagged with the stage that produced it
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("decomposition failed after {attempts} attempt(s): {reason}")]
    DecompositionFailed { attempts: u32, reason: String },

    #[error(transparent)]
    IndexUnavailable(IndexError),

    #[error("tool mapping failed at step {step_ordinal}: {source}")]
    MappingFailed {
        step_ordinal: usize,
        #[source]
        source: IndexError,
    },

    #[error("request cancelled before the {stage} stage")]
    Cancelled { stage: PipelineStage },
}

impl PipelineError {
    /// Stable machine-readable tag
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::DecompositionFailed { .. } => "decomposition_failed",
            PipelineError::IndexUnavailable(_) => "index_unavailable",
            PipelineError::MappingFailed { .. } => "mapping_failed",
            PipelineError::Cancelled { .. } => "cancelled",
        }
    }

    /// Stage that failed; `None` for the search pass-through
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            PipelineError::DecompositionFailed { .. } => Some(PipelineStage::Decomposing),
            PipelineError::IndexUnavailable(_) => None,
            PipelineError::MappingFailed { .. } => Some(PipelineStage::Mapping),
            PipelineError::Cancelled { stage } => Some(*stage),
        }
    }

    pub fn step_ordinal(&self) -> Option<usize> {
        match self {
            PipelineError::MappingFailed { step_ordinal, .. } => Some(*step_ordinal),
            _ => None,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from(self)
    }
}

/// Serializable form of a [`PipelineError`] for transport shells
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorReport {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<PipelineStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_ordinal: Option<usize>,
    pub message: String,
}

impl From<&PipelineError> for ErrorReport {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind().to_string(),
            stage: err.stage(),
            step_ordinal: err.step_ordinal(),
            message: err.to_string(),
        }
    }
}
