//! # FlowPilot Core
//!
//! Turns a natural-language automation request into an ordered list of
//! steps, maps each step onto a platform action, and renders the result as
//! a validated Mermaid flowchart.
//!
//! ## Architecture
//!
//! - `catalog/` - Action descriptors, embeddings, the SQLite store and the semantic index
//! - `generator/` - Structured LLM calls behind the `StructuredGenerator` capability
//! - `skills/` - Decomposer, ToolMapper and DiagramSynthesizer
//! - `tools/` - Workflow graph construction and Mermaid rendering/validation
//! - `pipeline/` - Stage sequencing, events and result types
//! - `models` / `config` - Provider and pipeline configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use flowpilot_core::pipeline::{Controller, Query};
//!
//! let controller = Controller::new(config, generator, index);
//! let result = controller.process(&Query::new("Email me new invoices")).await?;
//! println!("{}", result.diagram_source().unwrap_or_default());
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod generator;
pub mod models;
pub mod pipeline;
pub mod skills;
pub mod tools;

pub use catalog::{ActionDescriptor, ActionIndex, ActionSearch, ActionSummary, Platform};
pub use config::FlowPilotConfig;
pub use error::{DiagramError, GenerationError, IndexError, PipelineError};
pub use pipeline::{Controller, Query, RequestContext, WorkflowResult, WorkflowStatus};
