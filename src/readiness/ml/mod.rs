//! Tree-based estimators used by the learned readiness path.

pub mod boosting;
pub mod classifier;
pub mod forest;
pub mod metrics;
pub mod tree;

pub use boosting::{BoostingParams, GradientBoostingClassifier};
pub use classifier::DecisionTreeClassifier;
pub use forest::{ForestParams, RandomForestRegressor};
pub use metrics::{ClassMetrics, ClassificationMetrics, RegressionMetrics};
pub use tree::{DecisionTree, MaxFeatures, TreeParams};

/// Failures while fitting or evaluating an estimator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EstimatorError {
    #[error("cannot fit an estimator on an empty dataset")]
    EmptyDataset,
    #[error("{rows} feature rows but {targets} targets")]
    LengthMismatch { rows: usize, targets: usize },
    #[error("estimator expects {expected} features, received {actual}")]
    FeatureCount { expected: usize, actual: usize },
    #[error("label index {label} outside {n_classes} classes")]
    LabelOutOfRange { label: usize, n_classes: usize },
    #[error("at least two classes are required, found {0}")]
    TooFewClasses(usize),
    #[error("estimator produced a non-finite output")]
    NonFinite,
    #[error("malformed estimator: {0}")]
    Malformed(String),
}

pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (index, value) in values.iter().enumerate() {
        if *value > values[best] {
            best = index;
        }
    }
    best
}

pub(crate) fn average_importances<'a>(
    n_features: usize,
    sources: impl Iterator<Item = &'a [f64]>,
) -> Vec<f64> {
    let mut totals = vec![0.0; n_features];
    for importances in sources {
        for (total, value) in totals.iter_mut().zip(importances) {
            *total += value;
        }
    }
    let sum: f64 = totals.iter().sum();
    if sum > 0.0 {
        for value in &mut totals {
            *value /= sum;
        }
    }
    totals
}
