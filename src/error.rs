use crate::config::ConfigError;
use crate::readiness::router::status_for;
use crate::readiness::{ReadinessError, SnapshotError};
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server error: {0}")]
    Server(#[from] axum::Error),
    #[error("data store error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("feature export error: {0}")]
    Export(#[from] csv::Error),
    #[error("readiness error: {0}")]
    Readiness(#[from] ReadinessError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Readiness(err) => status_for(err),
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Snapshot(_)
            | AppError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::SubjectId;

    #[test]
    fn readiness_errors_keep_their_http_status() {
        let missing = AppError::from(ReadinessError::SubjectNotFound(SubjectId(9)));
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);

        let untrained = AppError::from(ReadinessError::Configuration("no models".into()));
        assert_eq!(untrained.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn infrastructure_errors_are_internal() {
        let io = AppError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(io.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
