//! # Workflow Graph
//!
//! Control-flow graph over mapped steps, stored as an arena.
//!
//! ```text
//! NodeId(0)        start
//! NodeId(1..=n)    one node per step (ordinal + 1)
//! NodeId(n + 1)    end
//! ```
//!
//! A conditional step becomes a decision node governing the next `scope`
//! steps. Its true branch enters the body, its false branch skips to the
//! step after the body. The last body step of a loop jumps back to the
//! decision instead of falling through.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::skills::decomposer_skill::{ConditionKind, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    Action,
    Decision,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Sequential,
    TrueBranch,
    FalseBranch,
    LoopBack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_ordinal: Option<usize>,
    pub label: String,
    pub kind: NodeKind,
    /// Step has no resolved action and needs manual configuration
    #[serde(default)]
    pub manual: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
}

/// Display text for a step node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLabel {
    pub text: String,
    pub manual: bool,
}

impl NodeLabel {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            manual: false,
        }
    }

    pub fn manual(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            manual: true,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("{steps} steps but {labels} labels")]
    LabelCount { steps: usize, labels: usize },
    #[error("step at position {position} has ordinal {found}")]
    NonContiguousOrdinal { position: usize, found: usize },
    #[error("graph invariant violated: {0}")]
    Invariant(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Where control goes when a block runs off its end
#[derive(Debug, Clone, Copy)]
struct Exit {
    to: NodeId,
    kind: EdgeKind,
}

fn step_node(position: usize) -> NodeId {
    NodeId(position + 1)
}

impl WorkflowGraph {
    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id.0)
    }

    pub fn start(&self) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.kind == NodeKind::Start)
    }

    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.from == id)
    }

    pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.to == id)
    }

    /// Node for the step with `ordinal`
    pub fn step(&self, ordinal: usize) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.step_ordinal == Some(ordinal))
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        self.edges.push(GraphEdge { from, to, kind });
    }

    /// Check the structural rules every rendered graph must satisfy.
    pub fn check_invariants(&self) -> Result<(), GraphError> {
        let violation = |msg: String| Err(GraphError::Invariant(msg));

        for (position, node) in self.nodes.iter().enumerate() {
            if node.id != NodeId(position) {
                return violation(format!("node at {} has id {}", position, node.id.0));
            }
        }
        for edge in &self.edges {
            if edge.from.0 >= self.nodes.len() || edge.to.0 >= self.nodes.len() {
                return violation(format!(
                    "edge {} -> {} points outside the arena",
                    edge.from.0, edge.to.0
                ));
            }
        }

        let mut incoming: HashMap<NodeId, usize> = HashMap::new();
        let mut outgoing: HashMap<NodeId, Vec<EdgeKind>> = HashMap::new();
        for edge in &self.edges {
            *incoming.entry(edge.to).or_default() += 1;
            outgoing.entry(edge.from).or_default().push(edge.kind);
        }
        let in_count = |id: NodeId| incoming.get(&id).copied().unwrap_or(0);
        let out_kinds = |id: NodeId| outgoing.get(&id).cloned().unwrap_or_default();

        let starts: Vec<&GraphNode> = self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Start)
            .collect();
        if starts.len() != 1 {
            return violation(format!("expected one start node, found {}", starts.len()));
        }
        if in_count(starts[0].id) != 0 {
            return violation("start node has incoming edges".to_string());
        }

        let ends: Vec<&GraphNode> = self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::End)
            .collect();
        if ends.is_empty() {
            return violation("graph has no end node".to_string());
        }

        for node in &self.nodes {
            let kinds = out_kinds(node.id);
            match node.kind {
                NodeKind::Start => {}
                _ if in_count(node.id) == 0 => {
                    return violation(format!("node {} is unreachable", node.id.0));
                }
                _ => {}
            }
            match node.kind {
                NodeKind::End if !kinds.is_empty() => {
                    return violation(format!("end node {} has outgoing edges", node.id.0));
                }
                NodeKind::Decision => {
                    let trues = kinds.iter().filter(|k| **k == EdgeKind::TrueBranch).count();
                    let falses = kinds.iter().filter(|k| **k == EdgeKind::FalseBranch).count();
                    if kinds.len() != 2 || trues != 1 || falses != 1 {
                        return violation(format!(
                            "decision {} needs one true and one false edge, has {:?}",
                            node.id.0, kinds
                        ));
                    }
                }
                NodeKind::Start | NodeKind::Action if kinds.len() != 1 => {
                    return violation(format!(
                        "node {} should have exactly one outgoing edge, has {}",
                        node.id.0,
                        kinds.len()
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Build the control-flow graph for `steps`, labelling step nodes with `labels`.
pub fn build_graph(steps: &[Step], labels: &[NodeLabel]) -> Result<WorkflowGraph, GraphError> {
    if steps.len() != labels.len() {
        return Err(GraphError::LabelCount {
            steps: steps.len(),
            labels: labels.len(),
        });
    }
    if let Some((position, step)) = steps
        .iter()
        .enumerate()
        .find(|(position, step)| step.ordinal != *position)
    {
        return Err(GraphError::NonContiguousOrdinal {
            position,
            found: step.ordinal,
        });
    }

    let n = steps.len();
    let mut graph = WorkflowGraph::default();
    graph.nodes.push(GraphNode {
        id: NodeId(0),
        step_ordinal: None,
        label: "Start".to_string(),
        kind: NodeKind::Start,
        manual: false,
    });
    for (step, label) in steps.iter().zip(labels) {
        graph.nodes.push(GraphNode {
            id: step_node(step.ordinal),
            step_ordinal: Some(step.ordinal),
            label: label.text.clone(),
            kind: if step.is_conditional() {
                NodeKind::Decision
            } else {
                NodeKind::Action
            },
            manual: label.manual,
        });
    }
    let end = NodeId(n + 1);
    graph.nodes.push(GraphNode {
        id: end,
        step_ordinal: None,
        label: "End".to_string(),
        kind: NodeKind::End,
        manual: false,
    });

    let first = if n == 0 { end } else { step_node(0) };
    graph.add_edge(NodeId(0), first, EdgeKind::Sequential);
    wire(
        &mut graph,
        steps,
        0,
        n,
        Exit {
            to: end,
            kind: EdgeKind::Sequential,
        },
    );

    graph.check_invariants()?;
    Ok(graph)
}

/// Wire the steps in `lo..hi`; control leaving the block goes to `after`.
fn wire(graph: &mut WorkflowGraph, steps: &[Step], lo: usize, hi: usize, after: Exit) {
    let mut i = lo;
    while i < hi {
        let step = &steps[i];
        let node = step_node(i);

        match step.condition_kind() {
            Some(kind) => {
                let body_end = (i + 1 + step.scope.max(1)).min(hi);
                let follow = if body_end < hi {
                    Exit {
                        to: step_node(body_end),
                        kind: EdgeKind::Sequential,
                    }
                } else {
                    after
                };

                if body_end == i + 1 {
                    graph.add_edge(node, follow.to, EdgeKind::TrueBranch);
                    graph.add_edge(node, follow.to, EdgeKind::FalseBranch);
                } else {
                    graph.add_edge(node, step_node(i + 1), EdgeKind::TrueBranch);
                    graph.add_edge(node, follow.to, EdgeKind::FalseBranch);
                    let body_exit = match kind {
                        ConditionKind::Loop => Exit {
                            to: node,
                            kind: EdgeKind::LoopBack,
                        },
                        ConditionKind::Branch => follow,
                    };
                    wire(graph, steps, i + 1, body_end, body_exit);
                }
                i = body_end;
            }
            None => {
                let next = if i + 1 < hi {
                    Exit {
                        to: step_node(i + 1),
                        kind: EdgeKind::Sequential,
                    }
                } else {
                    after
                };
                graph.add_edge(node, next.to, next.kind);
                i += 1;
            }
        }
    }
}
