//! # Mermaid
//!
//! Deterministic flowchart emitter and a line-oriented syntax validator.
//!
//! The validator covers the subset of Mermaid flowchart syntax the emitter
//! and the repair prompt produce: a `flowchart`/`graph` header, node
//! declarations, single-hop edges (optionally labelled, optionally with
//! inline node shapes), `classDef`/`class`/`style` lines, subgraphs and
//! `%%` comments.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use thiserror::Error;

use super::graph::{EdgeKind, GraphNode, NodeKind, WorkflowGraph};

/// Characters per label line before wrapping
pub const LABEL_WIDTH: usize = 24;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct SyntaxError {
    /// 1-based line number; 0 for document-level problems
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Node id used in the rendered source. `end` is reserved in Mermaid.
pub fn mermaid_id(node: &GraphNode) -> String {
    match (node.kind, node.step_ordinal) {
        (NodeKind::Start, _) => "begin".to_string(),
        (NodeKind::End, _) => "finish".to_string(),
        (_, Some(ordinal)) => format!("step{}", ordinal),
        (_, None) => format!("node{}", node.id.0),
    }
}

/// Replace characters that would terminate a quoted label or a shape.
pub fn escape_label(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '#' => out.push_str("#35;"),
            '"' => out.push_str("#quot;"),
            '<' => out.push_str("#lt;"),
            '>' => out.push_str("#gt;"),
            '[' => out.push_str("#91;"),
            ']' => out.push_str("#93;"),
            '{' => out.push_str("#123;"),
            '}' => out.push_str("#125;"),
            '(' => out.push_str("#40;"),
            ')' => out.push_str("#41;"),
            '|' => out.push_str("#124;"),
            _ => out.push(c),
        }
    }
    out
}

/// Word-wrap each line of `text` at `width` characters and join with `<br/>`.
pub fn wrap_label(text: &str, width: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let escaped = escape_label(word);
            if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&escaped);
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }
    lines.join("<br/>")
}

fn node_line(node: &GraphNode) -> String {
    let label = wrap_label(&node.label, LABEL_WIDTH);
    let id = mermaid_id(node);
    match node.kind {
        NodeKind::Start | NodeKind::End => format!("{}([\"{}\"])", id, label),
        NodeKind::Action => format!("{}[\"{}\"]", id, label),
        NodeKind::Decision => format!("{}{{\"{}\"}}", id, label),
    }
}

/// Render a graph as a Mermaid `flowchart TD` document.
pub fn render(graph: &WorkflowGraph) -> String {
    let mut lines = vec!["flowchart TD".to_string()];

    for node in &graph.nodes {
        lines.push(format!("    {}", node_line(node)));
    }

    for edge in &graph.edges {
        let (Some(from), Some(to)) = (graph.node(edge.from), graph.node(edge.to)) else {
            continue;
        };
        let arrow = match edge.kind {
            EdgeKind::Sequential => "-->",
            EdgeKind::TrueBranch => "-->|yes|",
            EdgeKind::FalseBranch => "-->|no|",
            EdgeKind::LoopBack => "-.->|repeat|",
        };
        lines.push(format!("    {} {} {}", mermaid_id(from), arrow, mermaid_id(to)));
    }

    let manual: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| n.manual)
        .map(mermaid_id)
        .collect();
    if !manual.is_empty() {
        lines.push("    classDef manual fill:#fff4e5,stroke:#d97706,stroke-dasharray: 4 2".to_string());
        lines.push(format!("    class {} manual", manual.join(",")));
    }

    lines.join("\n") + "\n"
}

struct Patterns {
    header: Regex,
    node: Regex,
    edge: Regex,
    text_edge: Regex,
    class_def: Regex,
    class: Regex,
    style: Regex,
    subgraph: Regex,
    direction: Regex,
}

const ID: &str = r"[A-Za-z_][A-Za-z0-9_]*";
const SHAPE: &str = r#"\(\[[^\]]*\]\)|\[\[[^\]]*\]\]|\(\([^)]*\)\)|\[[^\]]*\]|\{[^}]*\}|\([^)]*\)|>[^\]]*\]"#;

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            header: Regex::new(r"^(flowchart|graph)\s+(TD|TB|BT|LR|RL)\s*;?$")?,
            node: Regex::new(&format!(r"^(?P<id>{ID})\s*(?P<shape>{SHAPE})\s*;?$"))?,
            edge: Regex::new(&format!(
                r"^(?P<from>{ID})\s*(?P<from_shape>{SHAPE})?\s*(-\.->|-->|---|==>|-\.-)\s*(\|[^|]*\|)?\s*(?P<to>{ID})\s*(?P<to_shape>{SHAPE})?\s*;?$"
            ))?,
            text_edge: Regex::new(&format!(
                r"^(?P<from>{ID})\s*(?P<from_shape>{SHAPE})?\s*--\s+[^-|>][^>]*?\s+-->\s*(?P<to>{ID})\s*(?P<to_shape>{SHAPE})?\s*;?$"
            ))?,
            class_def: Regex::new(r"^classDef\s+[A-Za-z_][A-Za-z0-9_]*\s+\S.*$")?,
            class: Regex::new(r"^class\s+[A-Za-z0-9_,]+\s+[A-Za-z_][A-Za-z0-9_]*\s*;?$")?,
            style: Regex::new(r"^(style|linkStyle|click)\s+\S.*$")?,
            subgraph: Regex::new(r"^subgraph(\s+.*)?$")?,
            direction: Regex::new(r"^direction\s+(TD|TB|BT|LR|RL)$")?,
        })
    }
}

static PATTERNS: OnceLock<Result<Patterns, String>> = OnceLock::new();

fn patterns() -> Result<&'static Patterns, SyntaxError> {
    PATTERNS
        .get_or_init(|| Patterns::compile().map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| SyntaxError::new(0, format!("validator patterns failed to compile: {}", e)))
}

fn check_id(id: &str, line: usize) -> Result<(), SyntaxError> {
    if id == "end" {
        return Err(SyntaxError::new(
            line,
            "`end` is a reserved word and cannot be used as a node id",
        ));
    }
    Ok(())
}

/// Validate Mermaid flowchart source.
pub fn validate(source: &str) -> Result<(), SyntaxError> {
    validate_ids(source).map(|_| ())
}

/// Validate and return the declared node ids.
fn validate_ids(source: &str) -> Result<HashSet<String>, SyntaxError> {
    let p = patterns()?;
    let mut declared: HashSet<String> = HashSet::new();
    let mut referenced: Vec<(usize, String)> = Vec::new();
    let mut seen_header = false;
    let mut subgraph_depth = 0usize;

    for (index, raw) in source.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with("%%") {
            continue;
        }

        if !seen_header {
            if !p.header.is_match(line) {
                return Err(SyntaxError::new(
                    line_no,
                    format!(
                        "expected a `flowchart TD` (or `graph <dir>`) header, found `{}`",
                        line
                    ),
                ));
            }
            seen_header = true;
            continue;
        }

        if line.matches('"').count() % 2 != 0 {
            return Err(SyntaxError::new(line_no, "unbalanced quotes"));
        }

        if line == "end" {
            if subgraph_depth == 0 {
                return Err(SyntaxError::new(line_no, "`end` without a matching `subgraph`"));
            }
            subgraph_depth -= 1;
            continue;
        }
        if p.subgraph.is_match(line) {
            subgraph_depth += 1;
            continue;
        }
        if p.class_def.is_match(line)
            || p.class.is_match(line)
            || p.style.is_match(line)
            || p.direction.is_match(line)
        {
            continue;
        }

        if let Some(caps) = p.node.captures(line) {
            let id = &caps["id"];
            check_id(id, line_no)?;
            if !declared.insert(id.to_string()) {
                return Err(SyntaxError::new(
                    line_no,
                    format!("node `{}` is declared twice", id),
                ));
            }
            continue;
        }

        if let Some(caps) = p.edge.captures(line).or_else(|| p.text_edge.captures(line)) {
            for (end, shape) in [("from", "from_shape"), ("to", "to_shape")] {
                let id = &caps[end];
                check_id(id, line_no)?;
                if caps.name(shape).is_some() {
                    declared.insert(id.to_string());
                } else {
                    referenced.push((line_no, id.to_string()));
                }
            }
            continue;
        }

        return Err(SyntaxError::new(
            line_no,
            format!("unrecognised statement `{}`", line),
        ));
    }

    if !seen_header {
        return Err(SyntaxError::new(0, "document is empty"));
    }
    if subgraph_depth != 0 {
        return Err(SyntaxError::new(0, "unterminated `subgraph`"));
    }
    if declared.is_empty() {
        return Err(SyntaxError::new(0, "flowchart declares no nodes"));
    }
    if let Some((line_no, id)) = referenced.iter().find(|(_, id)| !declared.contains(id)) {
        return Err(SyntaxError::new(
            *line_no,
            format!("edge references undeclared node `{}`", id),
        ));
    }

    Ok(declared)
}

/// Validate `source` and check that it declares every node of `graph`.
pub fn validate_for(source: &str, graph: &WorkflowGraph) -> Result<(), SyntaxError> {
    let declared = validate_ids(source)?;
    for node in &graph.nodes {
        let id = mermaid_id(node);
        if !declared.contains(&id) {
            return Err(SyntaxError::new(
                0,
                format!("node `{}` ({}) is missing from the diagram", id, node.label),
            ));
        }
    }
    Ok(())
}
