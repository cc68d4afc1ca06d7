//! # Diagram Skill
//!
//! Builds the workflow graph over mapped steps and renders it to Mermaid,
//! repairing invalid source through the generator.
//!
//! ```text
//! steps + mappings ─▶ labels ─▶ build_graph ─▶ render (local | model)
//!                                                   │
//!                                   validate ◀──────┘
//!                                      │ invalid
//!                                      ▼
//!        generator.render_diagram(source + error + syntax section)  × repair_attempts
//! ```
//!
//! Never fails the request: an unrepairable diagram comes back with
//! `valid = false` and a [`DiagramError`].

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{FlowPilotConfig, RenderMode};
use crate::error::{DiagramError, GenerationError};
use crate::generator::{with_backoff, with_timeout, RetryPolicy, StructuredGenerator};
use crate::skills::decomposer_skill::Step;
use crate::skills::mapper_skill::{Mapping, MappingOutcome};
use crate::tools::graph::{build_graph, NodeLabel, WorkflowGraph};
use crate::tools::mermaid::{self, mermaid_id, SyntaxError};
use crate::tools::syntax::{SyntaxReference, SyntaxSection};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramDocument {
    pub source: String,
    /// Always `"mermaid"`
    pub format: String,
    pub valid: bool,
}

impl DiagramDocument {
    pub fn mermaid(source: String, valid: bool) -> Self {
        Self {
            source,
            format: "mermaid".to_string(),
            valid,
        }
    }
}

/// Outcome of a synthesis run
#[derive(Debug, Clone)]
pub struct SynthesisReport {
    pub document: DiagramDocument,
    pub graph: Option<WorkflowGraph>,
    /// Set when the document is invalid
    pub issue: Option<DiagramError>,
    /// Repair iterations performed
    pub repairs: u32,
}

impl SynthesisReport {
    fn invalid(source: String, graph: Option<WorkflowGraph>, issue: DiagramError, repairs: u32) -> Self {
        Self {
            document: DiagramDocument::mermaid(source, false),
            graph,
            issue: Some(issue),
            repairs,
        }
    }
}

pub const MANUAL_NOTE: &str = "Needs manual configuration";

/// Node labels for each step; fails when steps and mappings are misaligned.
pub fn node_labels(steps: &[Step], mappings: &[Mapping]) -> Result<Vec<NodeLabel>, String> {
    if steps.len() != mappings.len() {
        return Err(format!(
            "{} steps but {} mappings",
            steps.len(),
            mappings.len()
        ));
    }

    steps
        .iter()
        .zip(mappings)
        .map(|(step, mapping)| {
            if step.ordinal != mapping.step_ordinal {
                return Err(format!(
                    "step {} is paired with a mapping for step {}",
                    step.ordinal, mapping.step_ordinal
                ));
            }
            let heading = step.condition.as_deref().unwrap_or(&step.description);
            Ok(match &mapping.outcome {
                MappingOutcome::Resolved { action_id, .. } => {
                    NodeLabel::new(format!("{}\nAction: {}", heading, action_id))
                }
                MappingOutcome::Unresolved { .. } => {
                    NodeLabel::manual(format!("{}\n{}", heading, MANUAL_NOTE))
                }
            })
        })
        .collect()
}

pub struct DiagramSynthesizer {
    generator: Arc<dyn StructuredGenerator>,
    repair_attempts: u32,
    render_mode: RenderMode,
    retry: RetryPolicy,
    timeout: Duration,
    syntax: Arc<SyntaxReference>,
}

impl DiagramSynthesizer {
    pub fn new(generator: Arc<dyn StructuredGenerator>) -> Self {
        Self {
            generator,
            repair_attempts: 2,
            render_mode: RenderMode::Deterministic,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
            syntax: SyntaxReference::bundled(),
        }
    }

    pub fn from_config(generator: Arc<dyn StructuredGenerator>, config: &FlowPilotConfig) -> Self {
        Self::new(generator)
            .with_repair_attempts(config.repair_attempts)
            .with_render_mode(config.render)
            .with_retry_policy(config.retry.clone())
            .with_timeout(config.generator_timeout())
    }

    pub fn with_repair_attempts(mut self, repair_attempts: u32) -> Self {
        self.repair_attempts = repair_attempts;
        self
    }

    pub fn with_render_mode(mut self, render_mode: RenderMode) -> Self {
        self.render_mode = render_mode;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_syntax_reference(mut self, syntax: Arc<SyntaxReference>) -> Self {
        self.syntax = syntax;
        self
    }

    #[tracing::instrument(skip_all, fields(steps = steps.len(), mode = ?self.render_mode))]
    pub async fn synthesize(&self, steps: &[Step], mappings: &[Mapping]) -> SynthesisReport {
        let labels = match node_labels(steps, mappings) {
            Ok(labels) => labels,
            Err(reason) => {
                tracing::error!(%reason, "Steps and mappings are misaligned");
                return SynthesisReport::invalid(
                    String::new(),
                    None,
                    DiagramError::Invalid { attempts: 0, reason },
                    0,
                );
            }
        };

        let graph = match build_graph(steps, &labels) {
            Ok(graph) => graph,
            Err(err) => {
                tracing::error!(error = %err, "Workflow graph could not be built");
                return SynthesisReport::invalid(
                    String::new(),
                    None,
                    DiagramError::Invalid {
                        attempts: 0,
                        reason: err.to_string(),
                    },
                    0,
                );
            }
        };

        let mut source = self.initial_render(&graph).await;
        let mut error = match mermaid::validate_for(&source, &graph) {
            Ok(()) => {
                return SynthesisReport {
                    document: DiagramDocument::mermaid(source, true),
                    graph: Some(graph),
                    issue: None,
                    repairs: 0,
                };
            }
            Err(err) => err,
        };

        let mut repairs = 0;
        while repairs < self.repair_attempts {
            repairs += 1;
            tracing::warn!(repair = repairs, error = %error, "Diagram failed validation, requesting repair");

            let section = self.syntax.best(&error.message);
            if let Some(section) = section {
                tracing::debug!(section = %section.title, "Attaching syntax reference");
            }
            match self.generate(&repair_prompt(&graph, &source, &error, section)).await {
                Ok(candidate) => {
                    source = candidate;
                    match mermaid::validate_for(&source, &graph) {
                        Ok(()) => {
                            tracing::info!(repairs, "Diagram repaired");
                            return SynthesisReport {
                                document: DiagramDocument::mermaid(source, true),
                                graph: Some(graph),
                                issue: None,
                                repairs,
                            };
                        }
                        Err(err) => error = err,
                    }
                }
                Err(err) => {
                    tracing::warn!(repair = repairs, error = %err, "Diagram repair call failed");
                }
            }
        }

        let issue = DiagramError::Invalid {
            attempts: repairs + 1,
            reason: error.to_string(),
        };
        tracing::warn!(%issue, "Returning invalid diagram");
        SynthesisReport::invalid(source, Some(graph), issue, repairs)
    }

    async fn initial_render(&self, graph: &WorkflowGraph) -> String {
        match self.render_mode {
            RenderMode::Deterministic => mermaid::render(graph),
            RenderMode::Model => match self.generate(&render_prompt(graph)).await {
                Ok(source) => source,
                Err(err) => {
                    tracing::warn!(error = %err, "Model render failed, using local renderer");
                    mermaid::render(graph)
                }
            },
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let generator = &self.generator;
        let timeout = self.timeout;
        with_backoff(
            &self.retry,
            "render_diagram",
            |err: &GenerationError| err.is_transient(),
            move |_| with_timeout(timeout, generator.render_diagram(prompt)),
        )
        .await
        .map(|draft| draft.source)
    }
}

/// Graph in the shape the render prompt describes, keyed by Mermaid ids
fn graph_json(graph: &WorkflowGraph) -> String {
    let nodes: Vec<_> = graph
        .nodes
        .iter()
        .map(|n| {
            json!({
                "id": mermaid_id(n),
                "kind": n.kind,
                "label": n.label,
                "manual": n.manual,
            })
        })
        .collect();
    let edges: Vec<_> = graph
        .edges
        .iter()
        .filter_map(|e| {
            let from = graph.node(e.from)?;
            let to = graph.node(e.to)?;
            Some(json!({
                "from": mermaid_id(from),
                "to": mermaid_id(to),
                "kind": e.kind,
            }))
        })
        .collect();
    serde_json::to_string_pretty(&json!({ "nodes": nodes, "edges": edges })).unwrap_or_default()
}

fn render_prompt(graph: &WorkflowGraph) -> String {
    format!(
        "Render this workflow graph as a Mermaid flowchart.\n\nGraph:\n{}\n",
        graph_json(graph)
    )
}

fn repair_prompt(
    graph: &WorkflowGraph,
    source: &str,
    error: &SyntaxError,
    section: Option<&SyntaxSection>,
) -> String {
    let reference = section
        .map(|s| format!("Syntax reference:\n{}\n\n", s.snippet()))
        .unwrap_or_default();
    format!(
        "The Mermaid source below failed validation.\n\nValidator error: {}\n\n{}Source:\n{}\n\nGraph:\n{}\n\nReturn the corrected source.\n",
        error,
        reference,
        source,
        graph_json(graph)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{GeneratorCall, ScriptedGenerator};
    use crate::tools::graph::NodeKind;

    fn invoice_steps() -> Vec<Step> {
        vec![
            Step::conditional(0, "iterate", "invoices", "For each invoice", 2),
            Step::action(1, "extract", "line items", "Extract line items from the PDF"),
            Step::action(2, "enter", "spreadsheet", "Enter line items into the spreadsheet"),
        ]
    }

    fn invoice_mappings() -> Vec<Mapping> {
        vec![
            Mapping::resolved(0, "power_automate:for-each", 0.81),
            Mapping::resolved(1, "power_automate:extract-tables-from-pdf", 0.88),
            Mapping::unresolved(2, 0.42),
        ]
    }

    fn valid_source() -> String {
        let labels = node_labels(&invoice_steps(), &invoice_mappings()).unwrap();
        mermaid::render(&build_graph(&invoice_steps(), &labels).unwrap())
    }

    #[tokio::test]
    async fn test_deterministic_render_is_valid_without_model_calls() {
        let generator = Arc::new(ScriptedGenerator::new());
        let synthesizer = DiagramSynthesizer::new(generator.clone());
        let report = synthesizer
            .synthesize(&invoice_steps(), &invoice_mappings())
            .await;

        assert!(report.document.valid);
        assert_eq!(report.document.format, "mermaid");
        assert!(report.issue.is_none());
        assert!(report.document.source.contains("step2 -.->|repeat| step0"));
        assert_eq!(generator.calls(GeneratorCall::RenderDiagram), 0);

        let graph = report.graph.unwrap();
        assert_eq!(graph.step(0).unwrap().kind, NodeKind::Decision);
        let manual = graph.step(2).unwrap();
        assert!(manual.manual);
        assert!(manual.label.contains(MANUAL_NOTE));
    }

    #[tokio::test]
    async fn test_misaligned_mappings_are_reported_not_panicked() {
        let synthesizer = DiagramSynthesizer::new(Arc::new(ScriptedGenerator::new()));
        let report = synthesizer
            .synthesize(&invoice_steps(), &invoice_mappings()[..2])
            .await;
        assert!(!report.document.valid);
        assert!(matches!(
            report.issue,
            Some(DiagramError::Invalid { attempts: 0, .. })
        ));

        let mut shuffled = invoice_mappings();
        shuffled.swap(0, 1);
        let report = synthesizer.synthesize(&invoice_steps(), &shuffled).await;
        assert!(!report.document.valid);
    }

    #[tokio::test]
    async fn test_model_render_is_repaired() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_diagram("graph TD\n    step0{\"For each invoice\"} --> step1\n")
                .with_diagram(valid_source()),
        );
        let synthesizer = DiagramSynthesizer::new(generator.clone())
            .with_render_mode(RenderMode::Model)
            .with_retry_policy(RetryPolicy::immediate(1));

        let report = synthesizer
            .synthesize(&invoice_steps(), &invoice_mappings())
            .await;

        assert!(report.document.valid);
        assert_eq!(report.repairs, 1);
        let prompts = generator.prompts(GeneratorCall::RenderDiagram);
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("\"id\": \"step0\""));
        assert!(prompts[1].contains("Validator error: line 2: edge references undeclared node `step1`"));
        assert!(prompts[1].contains("Syntax reference:\n## Edges and links\n"));
        assert!(prompts[1].contains("`-.->` dotted"));
    }

    #[tokio::test]
    async fn test_repair_prompt_names_the_broken_rule() {
        let reserved = "flowchart TD\n    begin([\"Start\"]) --> end([\"End\"])\n";
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_diagram(reserved)
                .with_diagram(valid_source()),
        );
        let synthesizer = DiagramSynthesizer::new(generator.clone())
            .with_render_mode(RenderMode::Model)
            .with_retry_policy(RetryPolicy::immediate(1));

        let report = synthesizer
            .synthesize(&invoice_steps(), &invoice_mappings())
            .await;

        assert!(report.document.valid);
        let prompts = generator.prompts(GeneratorCall::RenderDiagram);
        assert!(prompts[1].contains("## Reserved words"));
        assert!(!prompts[1].contains("## Edges and links"));
    }

    #[tokio::test]
    async fn test_repair_without_reference_omits_section() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_diagram("graph TD\n    step0{\"For each invoice\"} --> step1\n")
                .with_diagram(valid_source()),
        );
        let synthesizer = DiagramSynthesizer::new(generator.clone())
            .with_render_mode(RenderMode::Model)
            .with_retry_policy(RetryPolicy::immediate(1))
            .with_syntax_reference(Arc::new(SyntaxReference::parse("")));

        synthesizer
            .synthesize(&invoice_steps(), &invoice_mappings())
            .await;

        let prompts = generator.prompts(GeneratorCall::RenderDiagram);
        assert_eq!(prompts.len(), 2);
        assert!(!prompts[1].contains("Syntax reference"));
        assert!(prompts[1].contains("Validator error:"));
    }

    #[tokio::test]
    async fn test_unrepairable_diagram_is_returned_invalid() {
        let broken = "flowchart TD\n    oops\n";
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_diagram(broken)
                .with_diagram(broken)
                .with_diagram_error(GenerationError::Fatal("model refused".into())),
        );
        let synthesizer = DiagramSynthesizer::new(generator.clone())
            .with_render_mode(RenderMode::Model)
            .with_retry_policy(RetryPolicy::immediate(1));

        let report = synthesizer
            .synthesize(&invoice_steps(), &invoice_mappings())
            .await;

        assert!(!report.document.valid);
        assert_eq!(report.document.source, broken);
        assert_eq!(report.repairs, 2);
        assert!(matches!(
            report.issue,
            Some(DiagramError::Invalid { attempts: 3, .. })
        ));
        assert_eq!(generator.calls(GeneratorCall::RenderDiagram), 3);
    }

    #[tokio::test]
    async fn test_model_render_failure_falls_back_to_local() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_diagram_error(GenerationError::Fatal("no key".into())),
        );
        let synthesizer = DiagramSynthesizer::new(generator)
            .with_render_mode(RenderMode::Model)
            .with_retry_policy(RetryPolicy::immediate(1));

        let report = synthesizer
            .synthesize(&invoice_steps(), &invoice_mappings())
            .await;
        assert!(report.document.valid);
        assert_eq!(report.document.source, valid_source());
    }

    #[test]
    fn test_labels_use_condition_for_decisions() {
        let labels = node_labels(&invoice_steps(), &invoice_mappings()).unwrap();
        assert_eq!(labels[0].text, "For each invoice\nAction: power_automate:for-each");
        assert!(!labels[0].manual);
        assert!(labels[2].manual);
    }
}
