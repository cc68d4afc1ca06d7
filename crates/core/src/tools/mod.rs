//! # Diagram Tools
//!
//! Deterministic machinery behind the diagram stage.
//!
//! - `graph` - control-flow graph builder with structural invariant checks
//! - `mermaid` - Mermaid emitter and syntax validator
//! - `syntax` - bundled syntax reference looked up during repairs

pub mod graph;
pub mod mermaid;
pub mod syntax;

pub use graph::{build_graph, EdgeKind, GraphEdge, GraphNode, NodeId, NodeKind, NodeLabel, WorkflowGraph};
pub use mermaid::{render, validate, validate_for, SyntaxError};
pub use syntax::{SyntaxReference, SyntaxSection};
