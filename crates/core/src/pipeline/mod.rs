//! # Pipeline
//!
//! Sequences the FlowPilot stages for one query.
//!
//! ## Pipeline Flow
//!
//! ```text
//! Query → Decomposer → Tool Mapper → Diagram Synthesizer → WorkflowResult
//! ```

pub mod controller;
pub mod events;
pub mod stage;
pub mod types;

pub use controller::{Controller, RequestContext};
pub use events::{PipelineEvent, PipelineEventKind};
pub use stage::{Pipeline, PipelineStage};
pub use types::{Query, WorkflowResult, WorkflowStatus};
