//! # Pipeline Controller
//!
//! Sequences the three stages for one request and assembles the result.
//!
//! ```text
//! Query ─▶ Decomposer ──(empty)──────────────────────────▶ NoActionableSteps
//!              │ steps
//!              ▼
//!          ToolMapper ──(index down)──▶ MappingFailed
//!              │ mappings
//!              ▼
//!       DiagramSynthesizer ──▶ WorkflowResult { Complete | DiagramInvalid }
//! ```
//!
//! Cancellation is checked at every stage boundary and aborts an in-flight
//! stage. The controller holds no per-request state, so one instance serves
//! concurrent requests.

use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::events::{PipelineEvent, PipelineEventKind};
use super::stage::{Pipeline, PipelineStage};
use super::types::{Query, WorkflowResult, WorkflowStatus};
use crate::catalog::{ActionSearch, ActionSummary, Platform};
use crate::config::FlowPilotConfig;
use crate::error::PipelineError;
use crate::generator::StructuredGenerator;
use crate::skills::decomposer_skill::Decomposer;
use crate::skills::diagram_skill::DiagramSynthesizer;
use crate::skills::mapper_skill::{MappingOutcome, ToolMapper};

/// Per-request context: cancellation and an optional event sink
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub cancel: CancellationToken,
    pub events: Option<mpsc::Sender<PipelineEvent>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Set event channel for streaming events
    pub fn with_event_channel(mut self, tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}

pub struct Controller {
    config: FlowPilotConfig,
    index: Arc<dyn ActionSearch>,
    decomposer: Decomposer,
    mapper: ToolMapper,
    synthesizer: DiagramSynthesizer,
}

impl Controller {
    pub fn new(
        config: FlowPilotConfig,
        generator: Arc<dyn StructuredGenerator>,
        index: Arc<dyn ActionSearch>,
    ) -> Self {
        Self {
            decomposer: Decomposer::from_config(generator.clone(), &config),
            mapper: ToolMapper::from_config(index.clone(), generator.clone(), &config),
            synthesizer: DiagramSynthesizer::from_config(generator, &config),
            index,
            config,
        }
    }

    pub fn config(&self) -> &FlowPilotConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<dyn ActionSearch> {
        &self.index
    }

    /// Run the full pipeline without cancellation or events
    pub async fn process(&self, query: &Query) -> Result<WorkflowResult, PipelineError> {
        self.process_with(query, &RequestContext::default()).await
    }

    #[tracing::instrument(
        skip(self, query, ctx),
        fields(query_preview = %query.text.chars().take(50).collect::<String>(), platform = ?query.platform)
    )]
    pub async fn process_with(
        &self,
        query: &Query,
        ctx: &RequestContext,
    ) -> Result<WorkflowResult, PipelineError> {
        let mut pipeline = Pipeline::new();
        let platform = self.config.resolve_platform(query.platform);

        ctx.emit(
            PipelineEvent::new(PipelineEventKind::PipelineStarted, pipeline.stage)
                .with_data(json!({ "platform": platform })),
        )
        .await;

        // Stage 1: decompose
        let steps = self
            .run_stage(ctx, &mut pipeline, self.decomposer.decompose(query))
            .await?;
        ctx.emit(
            PipelineEvent::new(PipelineEventKind::StageCompleted, pipeline.stage)
                .with_data(json!({ "steps": steps.len() })),
        )
        .await;

        if steps.is_empty() {
            pipeline.finish();
            let result = WorkflowResult::empty();
            self.complete(ctx, &pipeline, &result).await;
            return Ok(result);
        }

        // Stage 2: map
        pipeline.advance();
        let mappings = self
            .run_stage(ctx, &mut pipeline, self.mapper.map(&steps, platform))
            .await?;
        for mapping in &mappings {
            if let MappingOutcome::Unresolved { best_confidence } = mapping.outcome {
                ctx.emit(
                    PipelineEvent::new(PipelineEventKind::StepUnresolved, pipeline.stage)
                        .with_step(mapping.step_ordinal)
                        .with_data(json!({ "best_confidence": best_confidence })),
                )
                .await;
            }
        }
        ctx.emit(
            PipelineEvent::new(PipelineEventKind::StageCompleted, pipeline.stage).with_data(json!({
                "mappings": mappings.len(),
                "resolved": mappings.iter().filter(|m| m.is_resolved()).count(),
            })),
        )
        .await;

        // Stage 3: synthesize
        pipeline.advance();
        let synthesis = async { Ok::<_, PipelineError>(self.synthesizer.synthesize(&steps, &mappings).await) };
        let report = self.run_stage(ctx, &mut pipeline, synthesis).await?;

        if report.repairs > 0 {
            ctx.emit(
                PipelineEvent::new(PipelineEventKind::DiagramRepairAttempted, pipeline.stage)
                    .with_data(json!({ "repairs": report.repairs })),
            )
            .await;
        }
        if let Some(issue) = &report.issue {
            ctx.emit(
                PipelineEvent::new(PipelineEventKind::DiagramInvalid, pipeline.stage)
                    .with_data(json!({ "reason": issue.to_string() })),
            )
            .await;
        }
        ctx.emit(PipelineEvent::new(
            PipelineEventKind::StageCompleted,
            pipeline.stage,
        ))
        .await;
        pipeline.advance();

        let status = if report.document.valid {
            WorkflowStatus::Complete
        } else {
            WorkflowStatus::DiagramInvalid
        };
        let result = WorkflowResult {
            status,
            steps,
            mappings,
            diagram: Some(report.document),
            diagram_error: report.issue.map(|issue| issue.to_string()),
        };

        tracing::info!(
            steps = result.steps.len(),
            unresolved = result.unresolved_count(),
            diagram_valid = result.diagram_valid(),
            "Pipeline complete"
        );
        self.complete(ctx, &pipeline, &result).await;
        Ok(result)
    }

    /// Run one stage: boundary cancellation check, events, and failure bookkeeping.
    async fn run_stage<T, Fut>(
        &self,
        ctx: &RequestContext,
        pipeline: &mut Pipeline,
        stage_future: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let stage = pipeline.stage;
        if ctx.cancel.is_cancelled() {
            return Err(self.cancelled(ctx, pipeline).await);
        }

        ctx.emit(PipelineEvent::new(PipelineEventKind::StageStarted, stage))
            .await;

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            result = stage_future => Some(result),
        };

        match outcome {
            None => Err(self.cancelled(ctx, pipeline).await),
            Some(Ok(value)) => Ok(value),
            Some(Err(err)) => {
                pipeline.fail();
                tracing::error!(%stage, kind = err.kind(), error = %err, "Stage failed");
                ctx.emit(
                    PipelineEvent::new(PipelineEventKind::StageFailed, stage)
                        .with_data(json!(err.report())),
                )
                .await;
                Err(err)
            }
        }
    }

    async fn cancelled(&self, ctx: &RequestContext, pipeline: &mut Pipeline) -> PipelineError {
        let stage = pipeline.stage;
        pipeline.fail();
        tracing::info!(%stage, "Request cancelled");
        ctx.emit(PipelineEvent::new(PipelineEventKind::PipelineCancelled, stage))
            .await;
        PipelineError::Cancelled { stage }
    }

    async fn complete(&self, ctx: &RequestContext, pipeline: &Pipeline, result: &WorkflowResult) {
        ctx.emit(
            PipelineEvent::new(PipelineEventKind::PipelineCompleted, pipeline.stage)
                .with_data(json!({ "status": result.status })),
        )
        .await;
    }

    /// Catalog search pass-through, limited to `search_limit` results
    pub async fn search(
        &self,
        text: &str,
        platform: Option<Platform>,
    ) -> Result<Vec<ActionSummary>, PipelineError> {
        self.search_with_limit(text, platform, self.config.search_limit)
            .await
    }

    #[tracing::instrument(skip(self, text), fields(platform = ?platform, k))]
    pub async fn search_with_limit(
        &self,
        text: &str,
        platform: Option<Platform>,
        k: usize,
    ) -> Result<Vec<ActionSummary>, PipelineError> {
        let results = self
            .index
            .query(text, platform, k)
            .await
            .map_err(PipelineError::IndexUnavailable)?;
        Ok(results
            .iter()
            .map(|r| r.descriptor.summary(r.similarity))
            .collect())
    }
}
