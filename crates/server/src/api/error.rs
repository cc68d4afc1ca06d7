//! # API Errors
//!
//! Maps pipeline failures onto HTTP statuses with a JSON `ErrorReport` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use flowpilot_core::error::{ErrorReport, PipelineError};

#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(err) => match err {
                PipelineError::DecompositionFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                PipelineError::IndexUnavailable(_) | PipelineError::MappingFailed { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                PipelineError::Cancelled { .. } => StatusCode::REQUEST_TIMEOUT,
            },
        }
    }

    pub fn report(&self) -> ErrorReport {
        match self {
            ApiError::Pipeline(err) => err.report(),
            ApiError::BadRequest(message) => ErrorReport {
                kind: "invalid_request".to_string(),
                stage: None,
                step_ordinal: None,
                message: message.clone(),
            },
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Pipeline(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let report = self.report();
        if status.is_server_error() {
            tracing::error!(kind = %report.kind, message = %report.message, "Request failed");
        } else {
            tracing::warn!(kind = %report.kind, message = %report.message, "Request rejected");
        }
        (status, Json(report)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpilot_core::error::IndexError;
    use flowpilot_core::pipeline::PipelineStage;

    #[test]
    fn test_status_per_kind() {
        let decomposition = ApiError::from(PipelineError::DecompositionFailed {
            attempts: 3,
            reason: "schema".into(),
        });
        assert_eq!(decomposition.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let mapping = ApiError::from(PipelineError::MappingFailed {
            step_ordinal: 2,
            source: IndexError::unavailable("down"),
        });
        assert_eq!(mapping.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(mapping.report().step_ordinal, Some(2));

        let index = ApiError::from(PipelineError::IndexUnavailable(IndexError::unavailable("down")));
        assert_eq!(index.status(), StatusCode::SERVICE_UNAVAILABLE);

        let cancelled = ApiError::from(PipelineError::Cancelled {
            stage: PipelineStage::Mapping,
        });
        assert_eq!(cancelled.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(cancelled.report().stage, Some(PipelineStage::Mapping));
    }

    #[test]
    fn test_bad_request_report() {
        let err = ApiError::BadRequest("Unknown platform: zapier".into());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.report().kind, "invalid_request");
    }
}
