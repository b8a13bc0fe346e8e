use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::artifacts::ArtifactStore;
use super::domain::{RoleId, SubjectId};
use super::error::ReadinessError;
use super::repository::{ReadinessRepository, RepositoryError};
use super::service::ReadinessService;

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub subject_id: SubjectId,
    pub role_id: RoleId,
    #[serde(default)]
    pub prefer_ml: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecomputeRequest {
    #[serde(default)]
    pub prefer_ml: Option<bool>,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

/// Router builder exposing scoring, batch recompute, training, and model status.
/// Service calls run on the blocking pool: they take the model publication lock and may
/// read artifacts from disk.
pub fn readiness_router<R, S>(service: Arc<ReadinessService<R, S>>) -> Router
where
    R: ReadinessRepository + 'static,
    S: ArtifactStore + 'static,
{
    Router::new()
        .route("/api/v1/readiness/score", post(score_handler::<R, S>))
        .route("/api/v1/readiness/recompute", post(recompute_handler::<R, S>))
        .route("/api/v1/readiness/train", post(train_handler::<R, S>))
        .route("/api/v1/readiness/models", get(models_handler::<R, S>))
        .with_state(service)
}

/// HTTP status for a pipeline error.
pub fn status_for(error: &ReadinessError) -> StatusCode {
    match error {
        ReadinessError::SubjectNotFound(_)
        | ReadinessError::RoleNotFound(_)
        | ReadinessError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        ReadinessError::Configuration(_)
        | ReadinessError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        ReadinessError::Consistency(_) | ReadinessError::DataIntegrity(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: ReadinessError) -> Response {
    let payload = json!({
        "error": error.to_string(),
    });
    (status_for(&error), axum::Json(payload)).into_response()
}

fn join_failure(error: tokio::task::JoinError) -> Response {
    let payload = json!({
        "error": format!("background task failed: {error}"),
    });
    (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
}

pub(crate) async fn score_handler<R, S>(
    State(service): State<Arc<ReadinessService<R, S>>>,
    axum::Json(request): axum::Json<ScoreRequest>,
) -> Response
where
    R: ReadinessRepository + 'static,
    S: ArtifactStore + 'static,
{
    let prefer_ml = request.prefer_ml.unwrap_or(service.prefer_ml());
    let outcome = tokio::task::spawn_blocking(move || {
        service.compute_score(request.subject_id, request.role_id, prefer_ml)
    })
    .await;
    match outcome {
        Ok(Ok(result)) => (StatusCode::OK, axum::Json(result)).into_response(),
        Ok(Err(error)) => error_response(error),
        Err(join) => join_failure(join),
    }
}

pub(crate) async fn recompute_handler<R, S>(
    State(service): State<Arc<ReadinessService<R, S>>>,
    request: Option<axum::Json<RecomputeRequest>>,
) -> Response
where
    R: ReadinessRepository + 'static,
    S: ArtifactStore + 'static,
{
    let request = request.map(|axum::Json(body)| body).unwrap_or_default();
    let prefer_ml = request.prefer_ml.unwrap_or(service.prefer_ml());
    let deadline = request
        .deadline_ms
        .map(|millis| Instant::now() + Duration::from_millis(millis));

    let outcome =
        tokio::task::spawn_blocking(move || service.recompute_all(prefer_ml, deadline)).await;
    match outcome {
        Ok(Ok(summary)) => (StatusCode::OK, axum::Json(summary)).into_response(),
        Ok(Err(error)) => error_response(error),
        Err(join) => join_failure(join),
    }
}

pub(crate) async fn train_handler<R, S>(
    State(service): State<Arc<ReadinessService<R, S>>>,
) -> Response
where
    R: ReadinessRepository + 'static,
    S: ArtifactStore + 'static,
{
    match tokio::task::spawn_blocking(move || service.train_models()).await {
        Ok(Ok(report)) => {
            let payload = json!({
                "summary": report.flatten(),
                "report": report,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Ok(Err(error)) => error_response(error),
        Err(join) => join_failure(join),
    }
}

pub(crate) async fn models_handler<R, S>(
    State(service): State<Arc<ReadinessService<R, S>>>,
) -> Response
where
    R: ReadinessRepository + 'static,
    S: ArtifactStore + 'static,
{
    match tokio::task::spawn_blocking(move || service.model_report()).await {
        Ok(Ok(report)) => (StatusCode::OK, axum::Json(report)).into_response(),
        Ok(Err(error)) => error_response(error),
        Err(join) => join_failure(join),
    }
}
