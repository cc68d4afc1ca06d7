//! # Syntax Reference
//!
//! Mermaid flowchart reference split into `## ` sections and ranked against a
//! validator message, so a repair request carries the rule that was broken.

use std::sync::{Arc, OnceLock};

use crate::catalog::embedding::{cosine_similarity, HashingEmbedder};
use crate::skills::prompts;

const DIMENSIONS: usize = 1024;

#[derive(Debug, Clone)]
pub struct SyntaxSection {
    pub title: String,
    pub body: String,
    vector: Vec<f32>,
}

impl SyntaxSection {
    /// Section as it is pasted into a prompt
    pub fn snippet(&self) -> String {
        format!("## {}\n\n{}", self.title, self.body.trim())
    }
}

#[derive(Debug, Clone)]
pub struct SyntaxReference {
    sections: Vec<SyntaxSection>,
    embedder: HashingEmbedder,
}

impl SyntaxReference {
    /// Split markdown at `## ` headings. Text before the first heading is dropped.
    pub fn parse(markdown: &str) -> Self {
        let embedder = HashingEmbedder::new(DIMENSIONS);
        let mut raw: Vec<(String, Vec<&str>)> = Vec::new();
        for line in markdown.lines() {
            if let Some(title) = line.strip_prefix("## ") {
                raw.push((title.trim().to_string(), Vec::new()));
            } else if let Some((_, body)) = raw.last_mut() {
                body.push(line);
            }
        }

        let sections = raw
            .into_iter()
            .filter(|(title, _)| !title.is_empty())
            .map(|(title, body)| {
                let vector = embedder.vectorize(&ranking_text(&title, &body));
                SyntaxSection {
                    title,
                    body: body.join("\n"),
                    vector,
                }
            })
            .collect();

        Self { sections, embedder }
    }

    /// The reference bundled with the crate
    pub fn bundled() -> Arc<SyntaxReference> {
        static BUNDLED: OnceLock<Arc<SyntaxReference>> = OnceLock::new();
        BUNDLED
            .get_or_init(|| Arc::new(SyntaxReference::parse(prompts::MERMAID_SYNTAX)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn titles(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.title.as_str()).collect()
    }

    /// Up to `k` sections sharing vocabulary with `query`, best first.
    /// Ties keep document order.
    pub fn lookup(&self, query: &str, k: usize) -> Vec<&SyntaxSection> {
        let query = self.embedder.vectorize(query);
        let mut scored: Vec<(f32, &SyntaxSection)> = self
            .sections
            .iter()
            .map(|section| (cosine_similarity(&query, &section.vector), section))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().take(k).map(|(_, section)| section).collect()
    }

    pub fn best(&self, query: &str) -> Option<&SyntaxSection> {
        self.lookup(query, 1).into_iter().next()
    }
}

/// Heading plus prose; fenced examples would drown the rule text.
fn ranking_text(title: &str, body: &[&str]) -> String {
    let mut out = vec![title];
    let mut in_fence = false;
    for line in body.iter().copied() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence {
            out.push(line);
        }
    }
    out.join("\n")
}
