//! # Catalog API
//!
//! Welcome, health and action search routes.

use axum::{
    extract::{Query, State},
    response::Json,
};
use flowpilot_core::catalog::{ActionSummary, Platform};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};

use super::{ApiError, SharedState};

#[derive(Serialize, ToSchema)]
pub struct WelcomeResponse {
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    /// Number of indexed actions
    pub actions: usize,
    pub platforms: Vec<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct SearchParams {
    /// Free-text description of the action
    pub query: String,
    /// Platform slug; omitted searches every platform
    pub platform: Option<String>,
    /// Maximum number of results
    pub k: Option<usize>,
}

/// One catalog hit
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchHit {
    pub id: String,
    pub platform: String,
    pub title: String,
    pub description: String,
    pub parameters: BTreeMap<String, String>,
    pub similarity: f32,
}

impl From<ActionSummary> for SearchHit {
    fn from(summary: ActionSummary) -> Self {
        Self {
            id: summary.id,
            platform: summary.platform.slug().to_string(),
            title: summary.title,
            description: summary.description,
            parameters: summary.parameters,
            similarity: summary.similarity,
        }
    }
}

/// Welcome message
#[utoipa::path(
    get,
    path = "/",
    tag = "catalog",
    responses((status = 200, description = "Welcome", body = WelcomeResponse))
)]
pub async fn root() -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: "Welcome to the FlowPilot API".to_string(),
    })
}

/// Index size and platforms
#[utoipa::path(
    get,
    path = "/health",
    tag = "catalog",
    responses((status = 200, description = "Service health", body = HealthResponse))
)]
pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let index = state.controller.index();
    Json(HealthResponse {
        status: "ok".to_string(),
        actions: index.len(),
        platforms: index
            .platforms()
            .into_iter()
            .map(|p| p.slug().to_string())
            .collect(),
    })
}

/// Search the action catalog
#[utoipa::path(
    get,
    path = "/search",
    tag = "catalog",
    params(SearchParams),
    responses(
        (status = 200, description = "Ranked actions", body = [SearchHit]),
        (status = 400, description = "Unknown platform"),
        (status = 503, description = "Index unavailable")
    )
)]
pub async fn search(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    let platform =
        Platform::parse_hint(params.platform.as_deref()).map_err(ApiError::BadRequest)?;
    let k = params.k.unwrap_or(state.controller.config().search_limit);

    let hits = state
        .controller
        .search_with_limit(&params.query, platform, k)
        .await?;
    Ok(Json(hits.into_iter().map(SearchHit::from).collect()))
}
