use super::common::*;

use crate::readiness::artifacts::{
    ArtifactStore, BOOSTING_ARTIFACT, CLASSIFIER_ARTIFACT, LABELS_ARTIFACT, REGRESSOR_ARTIFACT,
};
use crate::readiness::error::ReadinessError;
use crate::readiness::features::FEATURE_COUNT;
use crate::readiness::training::{ClassifierKind, Trainer};

#[test]
fn training_publishes_every_artifact_and_metrics() {
    let service = trained_service(ClassifierKind::DecisionTree);
    let artifacts = service.artifacts();

    for name in [
        REGRESSOR_ARTIFACT,
        CLASSIFIER_ARTIFACT,
        BOOSTING_ARTIFACT,
        LABELS_ARTIFACT,
    ] {
        let artifact = artifacts
            .load_artifact(name)
            .expect("reads")
            .unwrap_or_else(|| panic!("{name} published"));
        assert!(artifact.verify_schema().is_ok(), "{name}");
    }

    let report = artifacts
        .load_metrics()
        .expect("reads")
        .expect("metrics published");
    assert_eq!(report.metadata.total_samples, 120);
    assert_eq!(
        report.metadata.train_samples + report.metadata.test_samples,
        120
    );
    assert_eq!(report.metadata.feature_count, FEATURE_COUNT);
    assert_eq!(
        report.metadata.classes,
        vec!["Developing", "Entry-Level", "Ready"]
    );
    assert_eq!(report.metadata.seed, Some(7));
    assert!(report.classifiers.contains_key("decision_tree"));
    assert!(report.classifiers.contains_key("gradient_boosting"));
    assert!(report.regressor.rmse >= 0.0);
}

#[test]
fn metrics_flatten_into_model_prefixed_keys() {
    let service = trained_service(ClassifierKind::DecisionTree);
    let report = service
        .artifacts()
        .load_metrics()
        .expect("reads")
        .expect("metrics published");

    let flat = report.flatten();
    for key in [
        "regressor.rmse",
        "regressor.r2",
        "decision_tree.accuracy",
        "gradient_boosting.f1_macro",
        "decision_tree.support.Ready",
        "decision_tree.confusion_matrix",
        "metadata.total_samples",
    ] {
        assert!(flat.contains_key(key), "missing {key}");
    }

    let importances = &report.feature_importances["regressor"];
    assert_eq!(importances.len(), FEATURE_COUNT);
    assert!(importances
        .windows(2)
        .all(|pair| pair[0].importance >= pair[1].importance));
}

#[test]
fn seeded_training_is_reproducible() {
    let service = build_service(training_store(), ClassifierKind::DecisionTree);
    service
        .recompute_all(false, None)
        .expect("rule-based recompute");
    let examples = service.training_examples().expect("dataset");

    let trainer = Trainer::new(quick_training());
    let first = trainer.train(&examples).expect("trains");
    let second = trainer.train(&examples).expect("trains");

    assert_eq!(first.regressor, second.regressor);
    assert_eq!(first.classifier, second.classifier);
    assert_eq!(first.boosting, second.boosting);
    assert_eq!(first.labels, second.labels);
}

#[test]
fn training_without_history_is_rejected() {
    let service = build_service(seeded_store(), ClassifierKind::DecisionTree);

    match service.train_models() {
        Err(ReadinessError::Configuration(message)) => {
            assert!(message.contains("recompute"), "{message}")
        }
        other => panic!("expected configuration error, got {other:?}"),
    }
    assert!(service
        .artifacts()
        .load_artifact(REGRESSOR_ARTIFACT)
        .expect("reads")
        .is_none());
}

#[test]
fn single_level_history_is_rejected() {
    let service = build_service(seeded_store(), ClassifierKind::DecisionTree);
    service
        .recompute_all(false, None)
        .expect("rule-based recompute");
    let examples: Vec<_> = service
        .training_examples()
        .expect("dataset")
        .into_iter()
        .filter(|example| example.level.label() == "Entry-Level")
        .collect();
    assert!(examples.len() >= 2);

    let result = Trainer::new(quick_training()).train(&examples);
    assert!(matches!(result, Err(ReadinessError::Configuration(_))));
}

#[test]
fn model_report_tracks_publication() {
    let service = build_service(training_store(), ClassifierKind::GradientBoosting);

    let before = service.model_report().expect("report");
    assert_eq!(before.status, "unavailable");
    assert_eq!(before.missing.len(), 3);
    assert!(before.metrics.is_none());

    service
        .recompute_all(false, None)
        .expect("rule-based recompute");
    service.train_models().expect("trains");

    let after = service.model_report().expect("report");
    assert_eq!(after.status, "available");
    assert_eq!(after.classifier, ClassifierKind::GradientBoosting);
    assert!(after.trained_at.is_some());
    assert!(after.metrics.is_some());
}
