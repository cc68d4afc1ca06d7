//! # FlowPilot Skills
//!
//! The three generation stages, each a thin policy layer over the
//! [`StructuredGenerator`](crate::generator::StructuredGenerator).
//!
//! ```text
//! Query ─▶ Decomposer ─▶ [Step] ─▶ ToolMapper ─▶ [Mapping] ─▶ DiagramSynthesizer ─▶ DiagramDocument
//!                                      │
//!                                      └── ActionSearch (catalog index)
//! ```

pub mod llm_helpers;
pub mod prompts;

pub mod decomposer_skill;
pub mod diagram_skill;
pub mod mapper_skill;

pub use decomposer_skill::{classify_condition, ConditionKind, Decomposer, Step};
pub use diagram_skill::{DiagramDocument, DiagramSynthesizer, SynthesisReport};
pub use mapper_skill::{Mapping, MappingOutcome, MappingRecord, ToolMapper};
