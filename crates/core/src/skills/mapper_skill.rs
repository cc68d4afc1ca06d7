//! # Tool Mapper Skill
//!
//! Resolves each step to a concrete catalog action, or marks it unresolved.
//!
//! ```text
//! step ─▶ "verb target description" ─▶ index.query(k) ─▶ candidates
//!                                                         │
//!                    RerankMode::Threshold ◀──────────────┤
//!                    RerankMode::Model ─▶ generator.rerank (falls back on error)
//!                                                         ▼
//!                              top ≥ threshold ? Resolved : Unresolved
//! ```
//!
//! An unreachable index fails the whole request; no partial mappings.

use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{ActionSearch, Platform, ScoredAction};
use crate::config::{FlowPilotConfig, RerankMode};
use crate::error::{GenerationError, IndexError, PipelineError};
use crate::generator::{with_backoff, with_timeout, RetryPolicy, StructuredGenerator};
use crate::skills::decomposer_skill::Step;

/// Result of mapping a single step
#[derive(Debug, Clone, PartialEq)]
pub enum MappingOutcome {
    Resolved { action_id: String, confidence: f32 },
    Unresolved { best_confidence: f32 },
}

/// Association of one step with a catalog action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "MappingRecord", try_from = "MappingRecord")]
pub struct Mapping {
    pub step_ordinal: usize,
    pub outcome: MappingOutcome,
}

impl Mapping {
    pub fn resolved(step_ordinal: usize, action_id: impl Into<String>, confidence: f32) -> Self {
        Self {
            step_ordinal,
            outcome: MappingOutcome::Resolved {
                action_id: action_id.into(),
                confidence,
            },
        }
    }

    pub fn unresolved(step_ordinal: usize, best_confidence: f32) -> Self {
        Self {
            step_ordinal,
            outcome: MappingOutcome::Unresolved { best_confidence },
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.outcome, MappingOutcome::Resolved { .. })
    }

    pub fn action_id(&self) -> Option<&str> {
        match &self.outcome {
            MappingOutcome::Resolved { action_id, .. } => Some(action_id),
            MappingOutcome::Unresolved { .. } => None,
        }
    }

    pub fn confidence(&self) -> f32 {
        match &self.outcome {
            MappingOutcome::Resolved { confidence, .. } => *confidence,
            MappingOutcome::Unresolved { best_confidence } => *best_confidence,
        }
    }
}

/// Flat wire shape of a [`Mapping`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRecord {
    pub step_ordinal: usize,
    pub action_id: Option<String>,
    pub confidence: f32,
    pub resolved: bool,
}

impl From<Mapping> for MappingRecord {
    fn from(mapping: Mapping) -> Self {
        match mapping.outcome {
            MappingOutcome::Resolved {
                action_id,
                confidence,
            } => MappingRecord {
                step_ordinal: mapping.step_ordinal,
                action_id: Some(action_id),
                confidence,
                resolved: true,
            },
            MappingOutcome::Unresolved { best_confidence } => MappingRecord {
                step_ordinal: mapping.step_ordinal,
                action_id: None,
                confidence: best_confidence,
                resolved: false,
            },
        }
    }
}

impl TryFrom<MappingRecord> for Mapping {
    type Error = String;

    fn try_from(record: MappingRecord) -> Result<Self, Self::Error> {
        if !(0.0..=1.0).contains(&record.confidence) {
            return Err(format!(
                "confidence {} is outside [0, 1]",
                record.confidence
            ));
        }
        match (record.resolved, record.action_id) {
            (true, Some(id)) if !id.trim().is_empty() => {
                Ok(Mapping::resolved(record.step_ordinal, id, record.confidence))
            }
            (true, _) => Err("resolved mapping requires an action_id".to_string()),
            (false, None) => Ok(Mapping::unresolved(record.step_ordinal, record.confidence)),
            (false, Some(_)) => Err("unresolved mapping must not carry an action_id".to_string()),
        }
    }
}

/// Accept the best candidate iff it clears `threshold`.
pub fn threshold_policy(candidates: &[ScoredAction], threshold: f32) -> MappingOutcome {
    let best = candidates.iter().max_by(|a, b| {
        a.similarity
            .total_cmp(&b.similarity)
            .then_with(|| b.id().cmp(a.id()))
    });
    match best {
        Some(top) if top.similarity >= threshold => MappingOutcome::Resolved {
            action_id: top.id().to_string(),
            confidence: top.similarity,
        },
        Some(top) => MappingOutcome::Unresolved {
            best_confidence: top.similarity,
        },
        None => MappingOutcome::Unresolved {
            best_confidence: 0.0,
        },
    }
}

fn best_similarity(candidates: &[ScoredAction]) -> f32 {
    candidates
        .iter()
        .map(|c| c.similarity)
        .fold(0.0, f32::max)
}

pub struct ToolMapper {
    index: Arc<dyn ActionSearch>,
    generator: Arc<dyn StructuredGenerator>,
    threshold: f32,
    top_k: usize,
    rerank: RerankMode,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ToolMapper {
    pub fn new(index: Arc<dyn ActionSearch>, generator: Arc<dyn StructuredGenerator>) -> Self {
        Self {
            index,
            generator,
            threshold: 0.75,
            top_k: 5,
            rerank: RerankMode::Threshold,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(
        index: Arc<dyn ActionSearch>,
        generator: Arc<dyn StructuredGenerator>,
        config: &FlowPilotConfig,
    ) -> Self {
        Self::new(index, generator)
            .with_threshold(config.acceptance_threshold)
            .with_top_k(config.top_k)
            .with_rerank(config.rerank)
            .with_retry_policy(config.retry.clone())
            .with_timeout(config.generator_timeout())
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_rerank(mut self, rerank: RerankMode) -> Self {
        self.rerank = rerank;
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

    /// Map every step, in order. Any index failure aborts the whole request.
    #[tracing::instrument(skip(self, steps), fields(steps = steps.len(), platform = ?platform))]
    pub async fn map(
        &self,
        steps: &[Step],
        platform: Option<Platform>,
    ) -> Result<Vec<Mapping>, PipelineError> {
        let mut mappings = Vec::with_capacity(steps.len());

        for step in steps {
            let candidates = self
                .retrieve(step, platform)
                .await
                .map_err(|source| PipelineError::MappingFailed {
                    step_ordinal: step.ordinal,
                    source,
                })?;

            let outcome = match self.rerank {
                RerankMode::Threshold => threshold_policy(&candidates, self.threshold),
                RerankMode::Model => self.model_rerank(step, &candidates).await,
            };

            match &outcome {
                MappingOutcome::Resolved {
                    action_id,
                    confidence,
                } => tracing::debug!(
                    ordinal = step.ordinal,
                    %action_id,
                    confidence,
                    "Step resolved"
                ),
                MappingOutcome::Unresolved { best_confidence } => tracing::info!(
                    ordinal = step.ordinal,
                    best_confidence,
                    candidates = candidates.len(),
                    "Step left unresolved"
                ),
            }

            mappings.push(Mapping {
                step_ordinal: step.ordinal,
                outcome,
            });
        }

        Ok(mappings)
    }

    async fn retrieve(
        &self,
        step: &Step,
        platform: Option<Platform>,
    ) -> Result<Vec<ScoredAction>, IndexError> {
        let text = step.retrieval_text();
        let index = &self.index;
        let query = text.as_str();
        let k = self.top_k;
        with_backoff(
            &self.retry,
            "index_query",
            |_: &IndexError| true,
            move |_| index.query(query, platform, k),
        )
        .await
    }

    async fn model_rerank(&self, step: &Step, candidates: &[ScoredAction]) -> MappingOutcome {
        if candidates.is_empty() {
            return MappingOutcome::Unresolved {
                best_confidence: 0.0,
            };
        }

        let prompt = rerank_prompt(step, candidates);
        let generator = &self.generator;
        let timeout = self.timeout;
        let current = prompt.as_str();
        let result = with_backoff(
            &self.retry,
            "rerank",
            |err: &GenerationError| err.is_transient(),
            move |_| with_timeout(timeout, generator.rerank(current)),
        )
        .await;

        let draft = match result {
            Ok(draft) => draft,
            Err(err) => {
                tracing::warn!(ordinal = step.ordinal, error = %err, "Re-rank failed, using similarity threshold");
                return threshold_policy(candidates, self.threshold);
            }
        };

        let Some(pick) = draft.action_id.filter(|id| !id.trim().is_empty()) else {
            return MappingOutcome::Unresolved {
                best_confidence: best_similarity(candidates),
            };
        };

        match candidates.iter().find(|c| c.id() == pick) {
            Some(chosen) if chosen.similarity >= self.threshold => MappingOutcome::Resolved {
                action_id: pick,
                confidence: chosen.similarity,
            },
            Some(chosen) => {
                tracing::debug!(
                    ordinal = step.ordinal,
                    %pick,
                    similarity = chosen.similarity,
                    "Re-rank pick is below threshold, using similarity threshold"
                );
                threshold_policy(candidates, self.threshold)
            }
            None => {
                tracing::warn!(ordinal = step.ordinal, %pick, "Re-rank picked an unknown action, using similarity threshold");
                threshold_policy(candidates, self.threshold)
            }
        }
    }
}

fn rerank_prompt(step: &Step, candidates: &[ScoredAction]) -> String {
    let mut prompt = format!(
        "Step: {}\nVerb: {}\nTarget: {}\n",
        step.description, step.verb, step.target
    );
    if let Some(condition) = &step.condition {
        prompt.push_str(&format!("Condition: {}\n", condition));
    }
    prompt.push_str("\nCandidates:\n");
    for c in candidates {
        prompt.push_str(&format!(
            "- id: {}\n  title: {}\n  description: {}\n  similarity: {:.3}\n",
            c.id(),
            c.descriptor.title,
            c.descriptor.description,
            c.similarity
        ));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ActionDescriptor;
    use crate::generator::{GeneratorCall, RerankDraft, ScriptedGenerator};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    /// Replays one queued result per query
    struct QueuedIndex {
        results: Mutex<VecDeque<Result<Vec<ScoredAction>, IndexError>>>,
    }

    impl QueuedIndex {
        fn new(results: Vec<Result<Vec<ScoredAction>, IndexError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
            }
        }
    }

    #[async_trait]
    impl ActionSearch for QueuedIndex {
        async fn query(
            &self,
            _text: &str,
            _platform: Option<Platform>,
            _k: usize,
        ) -> Result<Vec<ScoredAction>, IndexError> {
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        fn len(&self) -> usize {
            0
        }

        fn platforms(&self) -> Vec<Platform> {
            vec![]
        }
    }

    fn scored(id: &str, similarity: f32) -> ScoredAction {
        ScoredAction {
            descriptor: Arc::new(ActionDescriptor {
                id: id.into(),
                platform: Platform::PowerAutomate,
                title: id.into(),
                description: format!("{} action", id),
                parameters: BTreeMap::new(),
                embedding: vec![],
            }),
            similarity,
        }
    }

    fn steps(n: usize) -> Vec<Step> {
        (0..n)
            .map(|i| Step::action(i, "do", "thing", &format!("Do thing {}", i)))
            .collect()
    }

    fn mapper(index: QueuedIndex, generator: ScriptedGenerator) -> ToolMapper {
        ToolMapper::new(Arc::new(index), Arc::new(generator))
            .with_retry_policy(RetryPolicy::immediate(2))
    }

    #[test]
    fn test_threshold_policy() {
        let candidates = vec![scored("a", 0.9), scored("b", 0.5)];
        assert_eq!(
            threshold_policy(&candidates, 0.75),
            MappingOutcome::Resolved {
                action_id: "a".into(),
                confidence: 0.9
            }
        );
        assert_eq!(
            threshold_policy(&candidates, 0.95),
            MappingOutcome::Unresolved {
                best_confidence: 0.9
            }
        );
        assert_eq!(
            threshold_policy(&[], 0.75),
            MappingOutcome::Unresolved {
                best_confidence: 0.0
            }
        );
    }

    #[tokio::test]
    async fn test_one_mapping_per_step_in_order() {
        let index = QueuedIndex::new(vec![
            Ok(vec![scored("open", 0.92)]),
            Ok(vec![scored("weak", 0.4)]),
            Ok(vec![]),
        ]);
        let mappings = mapper(index, ScriptedGenerator::new())
            .map(&steps(3), None)
            .await
            .unwrap();

        assert_eq!(mappings.len(), 3);
        assert_eq!(
            mappings.iter().map(|m| m.step_ordinal).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(mappings[0].action_id(), Some("open"));
        assert_eq!(mappings[1], Mapping::unresolved(1, 0.4));
        assert_eq!(mappings[2], Mapping::unresolved(2, 0.0));
    }

    #[tokio::test]
    async fn test_index_failure_fails_whole_request() {
        let index = QueuedIndex::new(vec![
            Ok(vec![scored("open", 0.92)]),
            Err(IndexError::unavailable("store offline")),
            Err(IndexError::unavailable("store offline")),
        ]);
        let err = mapper(index, ScriptedGenerator::new())
            .map(&steps(3), None)
            .await
            .unwrap_err();

        assert_eq!(err.step_ordinal(), Some(1));
        assert_eq!(err.kind(), "mapping_failed");
    }

    #[tokio::test]
    async fn test_index_failure_recovers_on_retry() {
        let index = QueuedIndex::new(vec![
            Err(IndexError::unavailable("blip")),
            Ok(vec![scored("open", 0.92)]),
        ]);
        let mappings = mapper(index, ScriptedGenerator::new())
            .map(&steps(1), None)
            .await
            .unwrap();
        assert!(mappings[0].is_resolved());
    }

    #[tokio::test]
    async fn test_model_rerank_accepts_valid_pick() {
        let index = QueuedIndex::new(vec![Ok(vec![scored("a", 0.9), scored("b", 0.8)])]);
        let generator = ScriptedGenerator::new().with_rerank(RerankDraft {
            action_id: Some("b".into()),
            rationale: Some("better parameter fit".into()),
        });
        let generator = Arc::new(generator);
        let mapper = ToolMapper::new(Arc::new(index), generator.clone())
            .with_rerank(RerankMode::Model)
            .with_retry_policy(RetryPolicy::immediate(1));

        let mappings = mapper.map(&steps(1), None).await.unwrap();
        assert_eq!(mappings[0], Mapping::resolved(0, "b", 0.8));
        let prompt = &generator.prompts(GeneratorCall::Rerank)[0];
        assert!(prompt.contains("- id: a") && prompt.contains("- id: b"));
    }

    #[tokio::test]
    async fn test_model_rerank_invalid_pick_falls_back() {
        let index = QueuedIndex::new(vec![Ok(vec![scored("a", 0.9)])]);
        let generator = ScriptedGenerator::new().with_rerank(RerankDraft {
            action_id: Some("made-up".into()),
            rationale: None,
        });
        let mappings = mapper(index, generator)
            .with_rerank(RerankMode::Model)
            .map(&steps(1), None)
            .await
            .unwrap();
        assert_eq!(mappings[0], Mapping::resolved(0, "a", 0.9));
    }

    #[tokio::test]
    async fn test_model_rerank_error_falls_back() {
        let index = QueuedIndex::new(vec![Ok(vec![scored("a", 0.6)])]);
        let generator = ScriptedGenerator::new()
            .with_rerank_error(GenerationError::Fatal("provider down".into()));
        let mappings = mapper(index, generator)
            .with_rerank(RerankMode::Model)
            .map(&steps(1), None)
            .await
            .unwrap();
        assert_eq!(mappings[0], Mapping::unresolved(0, 0.6));
    }

    #[tokio::test]
    async fn test_model_rerank_declines() {
        let index = QueuedIndex::new(vec![Ok(vec![scored("a", 0.95)])]);
        let generator = ScriptedGenerator::new().with_rerank(RerankDraft {
            action_id: None,
            rationale: Some("no candidate sends SMS".into()),
        });
        let mappings = mapper(index, generator)
            .with_rerank(RerankMode::Model)
            .map(&steps(1), None)
            .await
            .unwrap();
        assert_eq!(mappings[0], Mapping::unresolved(0, 0.95));
    }

    #[test]
    fn test_mapping_serializes_flat() {
        let json = serde_json::to_value(Mapping::resolved(3, "pa:send-email", 0.8)).unwrap();
        assert_eq!(json["step_ordinal"], 3);
        assert_eq!(json["action_id"], "pa:send-email");
        assert_eq!(json["resolved"], true);

        let json = serde_json::to_value(Mapping::unresolved(1, 0.25)).unwrap();
        assert!(json["action_id"].is_null());
        assert_eq!(json["resolved"], false);
    }

    #[test]
    fn test_mapping_rejects_inconsistent_records() {
        let resolved_without_id =
            r#"{"step_ordinal": 0, "action_id": null, "confidence": 0.9, "resolved": true}"#;
        assert!(serde_json::from_str::<Mapping>(resolved_without_id).is_err());

        let unresolved_with_id =
            r#"{"step_ordinal": 0, "action_id": "x", "confidence": 0.1, "resolved": false}"#;
        assert!(serde_json::from_str::<Mapping>(unresolved_with_id).is_err());

        let out_of_range =
            r#"{"step_ordinal": 0, "action_id": "x", "confidence": 1.5, "resolved": true}"#;
        assert!(serde_json::from_str::<Mapping>(out_of_range).is_err());

        let ok = r#"{"step_ordinal": 2, "action_id": "x", "confidence": 0.8, "resolved": true}"#;
        assert_eq!(
            serde_json::from_str::<Mapping>(ok).unwrap(),
            Mapping::resolved(2, "x", 0.8)
        );
    }
}
