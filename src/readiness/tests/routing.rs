use super::common::*;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::readiness::error::{ConsistencyError, ReadinessError};
use crate::readiness::repository::ReadinessRepository;
use crate::readiness::router::{readiness_router, status_for};
use crate::readiness::training::ClassifierKind;
use crate::readiness::{RoleId, SubjectId};

async fn json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .expect("body readable");
    serde_json::from_slice(&body).expect("json body")
}

fn post_json(uri: &str, payload: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .expect("request builds")
}

#[tokio::test]
async fn score_route_returns_rule_based_result() {
    let service = Arc::new(build_service(seeded_store(), ClassifierKind::DecisionTree));
    let router = readiness_router(service);

    let response = router
        .oneshot(post_json(
            "/api/v1/readiness/score",
            json!({ "subject_id": 2, "role_id": 1, "prefer_ml": false }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["score"], json!("17.54"));
    assert_eq!(body["level"], json!("Entry-Level"));
    assert_eq!(body["model_used"], json!("rule_based"));
    assert_eq!(body["missing"][0]["priority"], json!("High"));
    assert!(body.get("ml_error").is_none());
}

#[tokio::test]
async fn score_route_tags_fallback_when_models_are_missing() {
    let service = Arc::new(build_service(seeded_store(), ClassifierKind::DecisionTree));
    let router = readiness_router(service);

    let response = router
        .oneshot(post_json(
            "/api/v1/readiness/score",
            json!({ "subject_id": 1, "role_id": 1 }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["model_used"], json!("rule_based_fallback"));
    assert!(body["ml_error"].is_string());
}

#[tokio::test]
async fn score_route_returns_not_found_for_unknown_subject() {
    let service = Arc::new(build_service(seeded_store(), ClassifierKind::DecisionTree));
    let router = readiness_router(service);

    let response = router
        .oneshot(post_json(
            "/api/v1/readiness/score",
            json!({ "subject_id": 404, "role_id": 1, "prefer_ml": false }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"], json!("subject 404 not found"));
}

#[tokio::test]
async fn recompute_route_accepts_empty_body() {
    let service = Arc::new(
        build_service(seeded_store(), ClassifierKind::DecisionTree).with_prefer_ml(false),
    );
    let router = readiness_router(service.clone());

    let response = router
        .oneshot(
            Request::post("/api/v1/readiness/recompute")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["processed"], json!(9));
    assert_eq!(body["model_used"], json!("rule_based"));
    assert!(service
        .repository()
        .readiness_record(SubjectId(1), RoleId(1))
        .map(|record| record.is_some())
        .unwrap_or(false));
}

#[tokio::test]
async fn ml_recompute_without_models_conflicts() {
    let service = Arc::new(build_service(seeded_store(), ClassifierKind::DecisionTree));
    let router = readiness_router(service);

    let response = router
        .oneshot(post_json(
            "/api/v1/readiness/recompute",
            json!({ "prefer_ml": true }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn train_route_publishes_and_models_route_reports() {
    let service = Arc::new(build_service(training_store(), ClassifierKind::DecisionTree));
    service
        .recompute_all(false, None)
        .expect("rule-based recompute");

    let response = readiness_router(service.clone())
        .oneshot(
            Request::post("/api/v1/readiness/train")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["summary"]["regressor.rmse"].is_number());
    assert_eq!(body["report"]["metadata"]["total_samples"], json!(120));

    let response = readiness_router(service)
        .oneshot(
            Request::get("/api/v1/readiness/models")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], json!("available"));
    assert_eq!(body["classifier"], json!("decision_tree"));
}

// The test runtime has a single thread: a handler that waited on the publication lock
// on that thread would stall the test before the guard is released.
#[tokio::test]
async fn score_and_models_routes_wait_off_the_runtime_while_training_holds_the_lock() {
    let service = Arc::new(build_service(seeded_store(), ClassifierKind::DecisionTree));
    let publication = service.hold_publication();

    let score = tokio::spawn(readiness_router(service.clone()).oneshot(post_json(
        "/api/v1/readiness/score",
        json!({ "subject_id": 2, "role_id": 1, "prefer_ml": false }),
    )));
    let models = tokio::spawn(
        readiness_router(service.clone()).oneshot(
            Request::get("/api/v1/readiness/models")
                .body(Body::empty())
                .expect("request builds"),
        ),
    );
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    assert!(!score.is_finished());
    assert!(!models.is_finished());

    drop(publication);
    let score = score.await.expect("task joins").expect("router responds");
    assert_eq!(score.status(), StatusCode::OK);
    assert_eq!(json_body(score).await["score"], json!("17.54"));
    let models = models.await.expect("task joins").expect("router responds");
    assert_eq!(models.status(), StatusCode::OK);
    assert_eq!(json_body(models).await["status"], json!("unavailable"));
}

#[test]
fn status_mapping_distinguishes_caller_and_server_faults() {
    assert_eq!(
        status_for(&ReadinessError::RoleNotFound(RoleId(1))),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        status_for(&ReadinessError::Consistency(
            ConsistencyError::UnknownLabelIndex(4)
        )),
        StatusCode::UNPROCESSABLE_ENTITY
    );
    assert_eq!(
        status_for(&ReadinessError::Inference("nan".into())),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}
