//! # HTTP API
//!
//! Unversioned routes (`/`, `/health`, `/search`, `/process-query`) plus
//! versioned JSON routes under `/api/v1`.

pub mod catalog;
pub mod error;
pub mod pipeline;

use axum::{
    body::Body,
    http::{header, Response, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use flowpilot_core::pipeline::Controller;
use std::sync::Arc;
use utoipa::OpenApi;

pub use error::ApiError;

/// Application state
pub struct AppState {
    pub controller: Arc<Controller>,
}

pub type SharedState = Arc<AppState>;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "FlowPilot API",
        version = "1.0.0",
        description = "Turns automation requests into platform actions and Mermaid workflow diagrams"
    ),
    paths(
        catalog::root,
        catalog::health,
        catalog::search,
        pipeline::process_query,
        pipeline::process,
        pipeline::process_stream
    ),
    components(
        schemas(
            catalog::WelcomeResponse,
            catalog::HealthResponse,
            catalog::SearchHit,
            pipeline::ProcessRequest,
            pipeline::ProcessResponse
        )
    ),
    tags(
        (name = "catalog", description = "Action catalog search"),
        (name = "pipeline", description = "Query processing")
    )
)]
pub struct ApiDoc;

async fn serve_openapi() -> impl IntoResponse {
    match ApiDoc::openapi().to_json() {
        Ok(doc) => Response::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(doc))
            .unwrap_or_default(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub fn router(state: SharedState) -> Router {
    let v1_routes = Router::new()
        .route("/process", post(pipeline::process))
        .route("/process/stream", post(pipeline::process_stream))
        .route("/search", get(catalog::search))
        .route("/openapi.json", get(serve_openapi));

    Router::new()
        .route("/", get(catalog::root))
        .route("/health", get(catalog::health))
        .route("/search", get(catalog::search))
        .route("/process-query", get(pipeline::process_query))
        .nest("/api/v1", v1_routes)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use flowpilot_core::catalog::{import_actions, parse_export, ActionIndex, HashingEmbedder, Platform};
    use flowpilot_core::config::FlowPilotConfig;
    use flowpilot_core::error::GenerationError;
    use flowpilot_core::generator::{RetryPolicy, ScriptedGenerator};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    const CATALOG: &str = r#"[
        {"tool": "Power Automate", "action": "Send email", "description": "Send an email message"},
        {"tool": "Power Automate", "action": "Read file", "description": "Read the text of a file"}
    ]"#;

    async fn app_with(generator: ScriptedGenerator) -> Router {
        let embedder = HashingEmbedder::default();
        let corpus = import_actions(parse_export(CATALOG).unwrap(), Platform::PowerAutomate, &embedder)
            .await
            .unwrap();
        let index = Arc::new(ActionIndex::build(corpus, Box::new(embedder)));
        let config = FlowPilotConfig {
            retry: RetryPolicy::immediate(1),
            ..FlowPilotConfig::default()
        };
        let controller = Controller::new(config, Arc::new(generator), index);
        router(Arc::new(AppState {
            controller: Arc::new(controller),
        }))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_root_welcome() {
        let (status, body) = get_json(app_with(ScriptedGenerator::new()).await, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Welcome to the FlowPilot API");
    }

    #[tokio::test]
    async fn test_health_reports_index() {
        let (status, body) = get_json(app_with(ScriptedGenerator::new()).await, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["actions"], 2);
        assert_eq!(body["platforms"][0], "power_automate");
    }

    #[tokio::test]
    async fn test_search_ranks_actions() {
        let app = app_with(ScriptedGenerator::new()).await;
        let (status, body) = get_json(app, "/search?query=send%20an%20email&k=1").await;
        assert_eq!(status, StatusCode::OK);
        let hits = body.as_array().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["id"], "power_automate:send-email");
    }

    #[tokio::test]
    async fn test_search_rejects_unknown_platform() {
        let app = app_with(ScriptedGenerator::new()).await;
        let (status, body) = get_json(app, "/search?query=email&platform=zapier").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_request");
    }

    #[tokio::test]
    async fn test_greeting_has_no_diagram() {
        let app = app_with(ScriptedGenerator::new()).await;
        let (status, body) = get_json(app, "/process-query?query=hello&tool_choice=power_automate").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "no_actionable_steps");
        assert_eq!(body["steps"].as_array().unwrap().len(), 0);
        assert!(body["diagram_source"].is_null());
        assert_eq!(body["diagram_valid"], false);
    }

    #[tokio::test]
    async fn test_decomposition_failure_is_422() {
        let generator = ScriptedGenerator::new()
            .with_decompose_error(GenerationError::Fatal("invalid api key".into()));
        let app = app_with(generator).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/process")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"query": "Email me every new invoice"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["kind"], "decomposition_failed");
        assert_eq!(body["stage"], "decomposing");
    }

    #[tokio::test]
    async fn test_stream_ends_with_result_event() {
        let app = app_with(ScriptedGenerator::new()).await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/process/stream")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"query": "hello"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: pipeline"));
        assert!(text.contains("event: result"));
        assert!(text.contains("no_actionable_steps"));
    }

    #[tokio::test]
    async fn test_openapi_lists_routes() {
        let (status, body) =
            get_json(app_with(ScriptedGenerator::new()).await, "/api/v1/openapi.json").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/process-query"].is_object());
        assert!(body["paths"]["/api/v1/process"].is_object());
        assert!(body["paths"]["/api/v1/process/stream"]["post"].is_object());
        assert!(body["paths"]["/api/v1/process/stream"]["post"]["responses"]["200"]["content"]
            ["text/event-stream"]
            .is_object());
    }
}
