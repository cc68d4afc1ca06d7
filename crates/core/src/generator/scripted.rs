//! Scripted [`StructuredGenerator`] that replays queued responses.
//!
//! Used by tests and offline demos: every call pops the next queued response
//! for its method and records the prompt it was given.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{DecompositionDraft, DiagramDraft, RerankDraft, StructuredGenerator};
use crate::error::GenerationError;

/// Which generator method was called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorCall {
    Decompose,
    Rerank,
    RenderDiagram,
}

type Queue<T> = Mutex<VecDeque<Result<T, GenerationError>>>;

#[derive(Default)]
pub struct ScriptedGenerator {
    decompositions: Queue<DecompositionDraft>,
    reranks: Queue<RerankDraft>,
    diagrams: Queue<DiagramDraft>,
    prompts: Mutex<Vec<(GeneratorCall, String)>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decomposition(self, draft: DecompositionDraft) -> Self {
        push(&self.decompositions, Ok(draft));
        self
    }

    pub fn with_decompose_error(self, err: GenerationError) -> Self {
        push(&self.decompositions, Err(err));
        self
    }

    pub fn with_rerank(self, draft: RerankDraft) -> Self {
        push(&self.reranks, Ok(draft));
        self
    }

    pub fn with_rerank_error(self, err: GenerationError) -> Self {
        push(&self.reranks, Err(err));
        self
    }

    pub fn with_diagram(self, source: impl Into<String>) -> Self {
        push(
            &self.diagrams,
            Ok(DiagramDraft {
                source: source.into(),
            }),
        );
        self
    }

    pub fn with_diagram_error(self, err: GenerationError) -> Self {
        push(&self.diagrams, Err(err));
        self
    }

    /// Prompts received by `call`, in order
    pub fn prompts(&self, call: GeneratorCall) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| {
                prompts
                    .iter()
                    .filter(|(c, _)| *c == call)
                    .map(|(_, p)| p.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn calls(&self, call: GeneratorCall) -> usize {
        self.prompts(call).len()
    }

    fn record(&self, call: GeneratorCall, prompt: &str) {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push((call, prompt.to_string()));
        }
    }
}

fn push<T>(queue: &Queue<T>, item: Result<T, GenerationError>) {
    if let Ok(mut queue) = queue.lock() {
        queue.push_back(item);
    }
}

fn pop<T>(queue: &Queue<T>, call: GeneratorCall) -> Result<T, GenerationError> {
    queue
        .lock()
        .map_err(|e| GenerationError::Fatal(format!("scripted queue poisoned: {}", e)))?
        .pop_front()
        .unwrap_or_else(|| {
            Err(GenerationError::Fatal(format!(
                "no scripted response left for {:?}",
                call
            )))
        })
}

#[async_trait]
impl StructuredGenerator for ScriptedGenerator {
    async fn decompose(&self, prompt: &str) -> Result<DecompositionDraft, GenerationError> {
        self.record(GeneratorCall::Decompose, prompt);
        pop(&self.decompositions, GeneratorCall::Decompose)
    }

    async fn rerank(&self, prompt: &str) -> Result<RerankDraft, GenerationError> {
        self.record(GeneratorCall::Rerank, prompt);
        pop(&self.reranks, GeneratorCall::Rerank)
    }

    async fn render_diagram(&self, prompt: &str) -> Result<DiagramDraft, GenerationError> {
        self.record(GeneratorCall::RenderDiagram, prompt);
        pop(&self.diagrams, GeneratorCall::RenderDiagram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_and_records_prompts() {
        let generator = ScriptedGenerator::new()
            .with_diagram_error(GenerationError::Transient("busy".into()))
            .with_diagram("flowchart TD\n    a[\"A\"]");

        assert!(generator.render_diagram("first").await.is_err());
        let draft = generator.render_diagram("second").await.unwrap();
        assert!(draft.source.starts_with("flowchart TD"));
        assert_eq!(
            generator.prompts(GeneratorCall::RenderDiagram),
            vec!["first".to_string(), "second".to_string()]
        );
    }

    #[tokio::test]
    async fn test_exhausted_queue_is_fatal() {
        let generator = ScriptedGenerator::new();
        let err = generator.decompose("anything").await.unwrap_err();
        assert!(matches!(err, GenerationError::Fatal(_)));
        assert_eq!(generator.calls(GeneratorCall::Decompose), 1);
    }
}
