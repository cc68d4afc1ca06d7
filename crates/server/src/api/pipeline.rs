//! # Pipeline API
//!
//! Runs the full decompose → map → synthesize pipeline for one query, either
//! as a single JSON response or as a server-sent event stream.

use axum::{
    extract::{Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use flowpilot_core::catalog::Platform;
use flowpilot_core::pipeline::{Query as WorkflowQuery, RequestContext, WorkflowResult, WorkflowStatus};
use flowpilot_core::skills::{Mapping, Step};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use utoipa::{IntoParams, ToSchema};

use super::{ApiError, SharedState};

#[derive(Deserialize, IntoParams)]
pub struct ProcessQueryParams {
    /// Natural-language automation request
    pub query: String,
    /// Target platform slug
    pub tool_choice: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct ProcessRequest {
    pub query: String,
    pub platform: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProcessResponse {
    #[schema(value_type = String)]
    pub status: WorkflowStatus,
    #[schema(value_type = Vec<Object>)]
    pub steps: Vec<Step>,
    #[schema(value_type = Vec<Object>)]
    pub mappings: Vec<Mapping>,
    pub diagram_source: Option<String>,
    pub diagram_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagram_error: Option<String>,
    pub unresolved_steps: usize,
}

impl From<WorkflowResult> for ProcessResponse {
    fn from(result: WorkflowResult) -> Self {
        Self {
            diagram_source: result.diagram_source().map(str::to_string),
            diagram_valid: result.diagram_valid(),
            unresolved_steps: result.unresolved_count(),
            status: result.status,
            diagram_error: result.diagram_error,
            steps: result.steps,
            mappings: result.mappings,
        }
    }
}

fn workflow_query(text: String, platform: Option<&str>) -> Result<WorkflowQuery, ApiError> {
    let platform = Platform::parse_hint(platform).map_err(ApiError::BadRequest)?;
    Ok(WorkflowQuery { text, platform })
}

/// Process a query (query-string form)
#[utoipa::path(
    get,
    path = "/process-query",
    tag = "pipeline",
    params(ProcessQueryParams),
    responses(
        (status = 200, description = "Workflow result", body = ProcessResponse),
        (status = 400, description = "Unknown platform"),
        (status = 422, description = "Decomposition failed"),
        (status = 503, description = "Catalog unavailable")
    )
)]
pub async fn process_query(
    State(state): State<SharedState>,
    Query(params): Query<ProcessQueryParams>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let query = workflow_query(params.query, params.tool_choice.as_deref())?;
    let result = state.controller.process(&query).await?;
    Ok(Json(result.into()))
}

/// Process a query (JSON body)
#[utoipa::path(
    post,
    path = "/api/v1/process",
    tag = "pipeline",
    request_body = ProcessRequest,
    responses(
        (status = 200, description = "Workflow result", body = ProcessResponse),
        (status = 400, description = "Unknown platform"),
        (status = 422, description = "Decomposition failed"),
        (status = 503, description = "Catalog unavailable")
    )
)]
pub async fn process(
    State(state): State<SharedState>,
    Json(req): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let query = workflow_query(req.query, req.platform.as_deref())?;
    let result = state.controller.process(&query).await?;
    Ok(Json(result.into()))
}

/// Stream pipeline events, then a final `result` or `error` event.
///
/// Dropping the connection cancels the request at its next stage boundary.
#[utoipa::path(
    post,
    path = "/api/v1/process/stream",
    tag = "pipeline",
    request_body = ProcessRequest,
    responses(
        (status = 200, description = "Server-sent `pipeline` events followed by one `result` or `error` event", content_type = "text/event-stream", body = String),
        (status = 400, description = "Unknown platform")
    )
)]
pub async fn process_stream(
    State(state): State<SharedState>,
    Json(req): Json<ProcessRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let query = workflow_query(req.query, req.platform.as_deref())?;

    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let ctx = RequestContext::new()
        .with_cancel(cancel.clone())
        .with_event_channel(tx);

    let controller = state.controller.clone();
    let handle = tokio::spawn(async move { controller.process_with(&query, &ctx).await });

    let guard = cancel.drop_guard();
    let outcome = stream::once(async move {
        let _guard = guard;
        let event = match handle.await {
            Ok(Ok(result)) => Event::default().event("result").data(
                serde_json::to_string(&ProcessResponse::from(result)).unwrap_or_default(),
            ),
            Ok(Err(err)) => Event::default()
                .event("error")
                .data(serde_json::to_string(&err.report()).unwrap_or_default()),
            Err(join_err) => Event::default().event("error").data(
                serde_json::json!({ "kind": "internal", "message": join_err.to_string() })
                    .to_string(),
            ),
        };
        Ok(event)
    });

    let events = ReceiverStream::new(rx).map(|event| {
        let json = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().event("pipeline").data(json))
    });

    Ok(Sse::new(events.chain(outcome)).keep_alive(KeepAlive::default()))
}
