//! # Pipeline Events
//!
//! Progress events emitted on a request's optional event channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::PipelineStage;

/// Kind of pipeline event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEventKind {
    PipelineStarted,
    StageStarted,
    StageCompleted,
    StageFailed,
    /// A step was left without an action
    StepUnresolved,
    /// The diagram failed validation and a repair was requested
    DiagramRepairAttempted,
    /// The diagram is still invalid after all repairs
    DiagramInvalid,
    PipelineCompleted,
    PipelineCancelled,
}

/// An event in a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Unique event ID
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: PipelineEventKind,
    /// Stage that produced this event
    pub stage: PipelineStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_ordinal: Option<usize>,
    /// Associated data (JSON)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl PipelineEvent {
    pub fn new(kind: PipelineEventKind, stage: PipelineStage) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            stage,
            step_ordinal: None,
            data: None,
        }
    }

    /// Add data to the event
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_step(mut self, ordinal: usize) -> Self {
        self.step_ordinal = Some(ordinal);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = PipelineEvent::new(PipelineEventKind::StepUnresolved, PipelineStage::Mapping)
            .with_step(3)
            .with_data(serde_json::json!({"best_confidence": 0.4}));

        assert_eq!(event.step_ordinal, Some(3));
        assert_eq!(event.stage, PipelineStage::Mapping);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "step_unresolved");
        assert_eq!(json["stage"], "mapping");
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = PipelineEvent::new(PipelineEventKind::StageStarted, PipelineStage::Decomposing);
        let b = PipelineEvent::new(PipelineEventKind::StageStarted, PipelineStage::Decomposing);
        assert_ne!(a.id, b.id);
    }
}
