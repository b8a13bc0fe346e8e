use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::artifacts::{
    Artifact, ArtifactError, ArtifactStore, Estimator, LabelMapping, BOOSTING_ARTIFACT,
    CLASSIFIER_ARTIFACT, LABELS_ARTIFACT, REGRESSOR_ARTIFACT,
};
use super::error::ReadinessError;
use super::features::{TrainingExample, FEATURE_COUNT, FEATURE_NAMES};
use super::ml::{
    BoostingParams, ClassificationMetrics, DecisionTreeClassifier, ForestParams,
    GradientBoostingClassifier, MaxFeatures, RandomForestRegressor, RegressionMetrics,
    TreeParams,
};

/// Which classifier the predictor consults for the readiness level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    #[default]
    DecisionTree,
    GradientBoosting,
}

impl ClassifierKind {
    pub const fn label(self) -> &'static str {
        match self {
            ClassifierKind::DecisionTree => "decision_tree",
            ClassifierKind::GradientBoosting => "gradient_boosting",
        }
    }

    pub const fn artifact_name(self) -> &'static str {
        match self {
            ClassifierKind::DecisionTree => CLASSIFIER_ARTIFACT,
            ClassifierKind::GradientBoosting => BOOSTING_ARTIFACT,
        }
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown classifier '{0}' (expected decision_tree or gradient_boosting)")]
pub struct UnknownClassifier(pub String);

impl FromStr for ClassifierKind {
    type Err = UnknownClassifier;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "decision_tree" | "tree" => Ok(ClassifierKind::DecisionTree),
            "gradient_boosting" | "boosting" => Ok(ClassifierKind::GradientBoosting),
            _ => Err(UnknownClassifier(raw.to_string())),
        }
    }
}

/// Hyper-parameters for one training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub forest: ForestParams,
    pub tree: TreeParams,
    pub balanced_classes: bool,
    pub boosting: BoostingParams,
    pub test_fraction: f64,
    /// Fixed seed for reproducible runs; `None` reseeds from system entropy.
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            forest: ForestParams::default(),
            tree: TreeParams {
                max_depth: 8,
                min_samples_split: 30,
                min_samples_leaf: 15,
                max_features: MaxFeatures::Sqrt,
            },
            balanced_classes: true,
            boosting: BoostingParams::default(),
            test_fraction: 0.2,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetadata {
    pub trained_at: DateTime<Utc>,
    pub total_samples: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub feature_count: usize,
    pub classes: Vec<String>,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Evaluation of every estimator from one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub regressor: RegressionMetrics,
    /// Keyed by [`ClassifierKind::label`].
    pub classifiers: BTreeMap<String, ClassificationMetrics>,
    /// Per model, sorted by descending importance.
    pub feature_importances: BTreeMap<String, Vec<FeatureImportance>>,
    pub metadata: TrainingMetadata,
}

impl EvaluationReport {
    /// Flat `model.metric` document for display surfaces.
    pub fn flatten(&self) -> BTreeMap<String, Value> {
        let mut flat = BTreeMap::new();
        let regressor = &self.regressor;
        for (key, value) in [
            ("mse", regressor.mse),
            ("rmse", regressor.rmse),
            ("mae", regressor.mae),
            ("r2", regressor.r2),
            ("mape", regressor.mape),
            ("mean_error", regressor.mean_error),
            ("median_absolute_error", regressor.median_absolute_error),
        ] {
            flat.insert(format!("regressor.{key}"), json!(value));
        }

        for (model, metrics) in &self.classifiers {
            for (key, value) in [
                ("accuracy", metrics.accuracy),
                ("precision_macro", metrics.precision_macro),
                ("recall_macro", metrics.recall_macro),
                ("f1_macro", metrics.f1_macro),
                ("precision_micro", metrics.precision_micro),
                ("recall_micro", metrics.recall_micro),
                ("f1_micro", metrics.f1_micro),
                ("precision_weighted", metrics.precision_weighted),
                ("recall_weighted", metrics.recall_weighted),
                ("f1_weighted", metrics.f1_weighted),
            ] {
                flat.insert(format!("{model}.{key}"), json!(value));
            }
            for class in &metrics.per_class {
                flat.insert(format!("{model}.support.{}", class.class), json!(class.support));
                flat.insert(format!("{model}.f1.{}", class.class), json!(class.f1));
            }
            flat.insert(
                format!("{model}.confusion_matrix"),
                json!(metrics.confusion_matrix),
            );
        }

        let meta = &self.metadata;
        flat.insert("metadata.trained_at".into(), json!(meta.trained_at.to_rfc3339()));
        flat.insert("metadata.total_samples".into(), json!(meta.total_samples));
        flat.insert("metadata.train_samples".into(), json!(meta.train_samples));
        flat.insert("metadata.test_samples".into(), json!(meta.test_samples));
        flat.insert("metadata.feature_count".into(), json!(meta.feature_count));
        flat.insert("metadata.classes".into(), json!(meta.classes));
        flat
    }
}

/// Output of [`Trainer::train`], ready to publish.
#[derive(Debug, Clone)]
pub struct TrainedModels {
    pub regressor: RandomForestRegressor,
    pub classifier: DecisionTreeClassifier,
    pub boosting: GradientBoostingClassifier,
    pub labels: LabelMapping,
    pub report: EvaluationReport,
}

impl TrainedModels {
    pub fn artifacts(&self) -> Vec<Artifact> {
        let trained_at = self.report.metadata.trained_at;
        vec![
            Artifact::new(
                REGRESSOR_ARTIFACT,
                Estimator::RandomForest(self.regressor.clone()),
                trained_at,
            ),
            Artifact::new(
                CLASSIFIER_ARTIFACT,
                Estimator::DecisionTree(self.classifier.clone()),
                trained_at,
            ),
            Artifact::new(
                BOOSTING_ARTIFACT,
                Estimator::GradientBoosting(self.boosting.clone()),
                trained_at,
            ),
            Artifact::new(
                LABELS_ARTIFACT,
                Estimator::LabelMapping(self.labels.clone()),
                trained_at,
            ),
        ]
    }

    /// Replaces every published artifact, then the metrics document.
    pub fn publish(&self, store: &dyn ArtifactStore) -> Result<(), ArtifactError> {
        for artifact in self.artifacts() {
            store.save_artifact(&artifact)?;
        }
        store.save_metrics(&self.report)
    }
}

/// Fits the regressor and both classifiers from scratch on every call.
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn train(&self, examples: &[TrainingExample]) -> Result<TrainedModels, ReadinessError> {
        if examples.len() < 2 {
            return Err(ReadinessError::Configuration(format!(
                "training needs at least 2 historical readiness records, found {}",
                examples.len()
            )));
        }

        let labels = LabelMapping::fit(examples.iter().map(|example| example.level));
        if labels.len() < 2 {
            return Err(ReadinessError::Configuration(
                "historical records cover a single readiness level; nothing to classify".into(),
            ));
        }

        let started = Instant::now();
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let x: Vec<Vec<f64>> = examples
            .iter()
            .map(|example| example.features.as_slice().to_vec())
            .collect();
        let y: Vec<f64> = examples.iter().map(|example| example.score).collect();
        let encoded: Vec<usize> = examples
            .iter()
            .map(|example| labels.encode(example.level).unwrap_or_default())
            .collect();

        info!(
            samples = examples.len(),
            classes = labels.len(),
            "training readiness models"
        );

        let (reg_train, reg_test) =
            shuffled_split(examples.len(), self.config.test_fraction, &mut rng);
        let regressor = RandomForestRegressor::fit(
            &select(&x, &reg_train),
            &select(&y, &reg_train),
            &self.config.forest,
            &mut rng,
        )?;
        let predicted_scores = reg_test
            .iter()
            .map(|row| regressor.predict(&x[*row]))
            .collect::<Result<Vec<_>, _>>()?;
        let regression = RegressionMetrics::compute(&select(&y, &reg_test), &predicted_scores);

        let (cls_train, cls_test) =
            stratified_split(&encoded, labels.len(), self.config.test_fraction, &mut rng);
        let train_x = select(&x, &cls_train);
        let train_labels = select(&encoded, &cls_train);
        let test_labels = select(&encoded, &cls_test);
        let class_names = labels.class_names();

        let classifier = DecisionTreeClassifier::fit(
            &train_x,
            &train_labels,
            labels.len(),
            &self.config.tree,
            self.config.balanced_classes,
            &mut rng,
        )?;
        let boosting = GradientBoostingClassifier::fit(
            &train_x,
            &train_labels,
            labels.len(),
            &self.config.boosting,
            &mut rng,
        )?;

        let tree_predictions = cls_test
            .iter()
            .map(|row| classifier.predict(&x[*row]))
            .collect::<Result<Vec<_>, _>>()?;
        let boosting_predictions = cls_test
            .iter()
            .map(|row| boosting.predict(&x[*row]))
            .collect::<Result<Vec<_>, _>>()?;

        let mut classifiers = BTreeMap::new();
        classifiers.insert(
            ClassifierKind::DecisionTree.label().to_string(),
            ClassificationMetrics::compute(&test_labels, &tree_predictions, &class_names),
        );
        classifiers.insert(
            ClassifierKind::GradientBoosting.label().to_string(),
            ClassificationMetrics::compute(&test_labels, &boosting_predictions, &class_names),
        );

        let mut feature_importances = BTreeMap::new();
        feature_importances.insert(
            "regressor".to_string(),
            ranked_importances(&regressor.feature_importances()),
        );
        feature_importances.insert(
            ClassifierKind::DecisionTree.label().to_string(),
            ranked_importances(&classifier.feature_importances()),
        );
        feature_importances.insert(
            ClassifierKind::GradientBoosting.label().to_string(),
            ranked_importances(&boosting.feature_importances()),
        );

        let report = EvaluationReport {
            regressor: regression,
            classifiers,
            feature_importances,
            metadata: TrainingMetadata {
                trained_at: Utc::now(),
                total_samples: examples.len(),
                train_samples: cls_train.len(),
                test_samples: cls_test.len(),
                feature_count: FEATURE_COUNT,
                classes: class_names,
                seed: self.config.seed,
            },
        };

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            rmse = report.regressor.rmse,
            r2 = report.regressor.r2,
            "readiness models trained"
        );

        Ok(TrainedModels {
            regressor,
            classifier,
            boosting,
            labels,
            report,
        })
    }
}

fn select<T: Clone>(values: &[T], rows: &[usize]) -> Vec<T> {
    rows.iter().map(|row| values[*row].clone()).collect()
}

fn ranked_importances(importances: &[f64]) -> Vec<FeatureImportance> {
    let mut ranked: Vec<FeatureImportance> = FEATURE_NAMES
        .iter()
        .zip(importances)
        .map(|(feature, importance)| FeatureImportance {
            feature: feature.to_string(),
            importance: *importance,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked
}

/// Test size is `ceil(n * fraction)`, kept within `1..n`.
pub(crate) fn shuffled_split(
    n: usize,
    test_fraction: f64,
    rng: &mut StdRng,
) -> (Vec<usize>, Vec<usize>) {
    let mut rows: Vec<usize> = (0..n).collect();
    rows.shuffle(rng);
    let test = ((n as f64 * test_fraction).ceil() as usize).clamp(1, n.saturating_sub(1).max(1));
    let train = rows.split_off(test);
    (train, rows)
}

/// Per-class split preserving class proportions; every class with two or more rows
/// keeps at least one row on each side.
pub(crate) fn stratified_split(
    labels: &[usize],
    n_classes: usize,
    test_fraction: f64,
    rng: &mut StdRng,
) -> (Vec<usize>, Vec<usize>) {
    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
    for (row, label) in labels.iter().enumerate() {
        by_class[*label].push(row);
    }

    let mut train = Vec::new();
    let mut test = Vec::new();
    for rows in &mut by_class {
        rows.shuffle(rng);
        let count = rows.len();
        let take = if count < 2 {
            0
        } else {
            ((count as f64 * test_fraction).round() as usize).clamp(1, count - 1)
        };
        test.extend_from_slice(&rows[..take]);
        train.extend_from_slice(&rows[take..]);
    }

    if test.is_empty() && train.len() > 1 {
        let row = train.remove(0);
        test.push(row);
    }

    train.shuffle(rng);
    test.shuffle(rng);
    (train, test)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stratified_split_keeps_every_class_in_training() {
        let labels: Vec<usize> = (0..50).map(|i| if i < 40 { 0 } else { 1 }).collect();
        let mut rng = StdRng::seed_from_u64(3);

        let (train, test) = stratified_split(&labels, 2, 0.2, &mut rng);

        assert_eq!(train.len() + test.len(), 50);
        assert_eq!(test.iter().filter(|row| labels[**row] == 0).count(), 8);
        assert_eq!(test.iter().filter(|row| labels[**row] == 1).count(), 2);
    }

    #[test]
    fn shuffled_split_uses_ceiling() {
        let mut rng = StdRng::seed_from_u64(8);
        let (train, test) = shuffled_split(11, 0.2, &mut rng);
        assert_eq!(test.len(), 3);
        assert_eq!(train.len(), 8);
    }

    #[test]
    fn classifier_kind_parses_aliases() {
        assert_eq!(
            "gradient-boosting".parse::<ClassifierKind>(),
            Ok(ClassifierKind::GradientBoosting)
        );
        assert_eq!("Decision_Tree".parse::<ClassifierKind>(), Ok(ClassifierKind::DecisionTree));
        assert!("svm".parse::<ClassifierKind>().is_err());
    }
}
