use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::artifacts::{
    Artifact, ArtifactStore, Estimator, LabelMapping, LABELS_ARTIFACT, REGRESSOR_ARTIFACT,
};
use super::domain::{ReadinessLevel, ReadinessRecord, RoleId, SubjectId};
use super::error::ReadinessError;
use super::features::{FeatureExtractor, FeatureVector, PairContext, FEATURE_COUNT};
use super::ml::{
    DecisionTreeClassifier, EstimatorError, GradientBoostingClassifier, RandomForestRegressor,
};
use super::repository::ReadinessRepository;
use super::scoring::{MissingCompetency, RuleBasedScorer, RuleScore};
use super::training::ClassifierKind;

/// Which computation path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelUsed {
    Ml,
    RuleBased,
    /// Learned path requested but unavailable or failing for this pair.
    RuleBasedFallback,
}

impl ModelUsed {
    pub const fn label(self) -> &'static str {
        match self {
            ModelUsed::Ml => "ml",
            ModelUsed::RuleBased => "rule_based",
            ModelUsed::RuleBasedFallback => "rule_based_fallback",
        }
    }
}

impl fmt::Display for ModelUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Score and level for one pair, with the audit trail of the rule-based matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessResult {
    pub subject_id: SubjectId,
    pub role_id: RoleId,
    pub score: Decimal,
    pub level: ReadinessLevel,
    /// Class membership keyed by level label; empty on the rule-based paths.
    pub probabilities: BTreeMap<String, f64>,
    pub model_used: ModelUsed,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ml_error: Option<String>,
    pub matched_count: u32,
    pub required_count: u32,
    pub gap_count: u32,
    pub missing: Vec<MissingCompetency>,
}

impl ReadinessResult {
    fn from_rule(
        context: &PairContext,
        rule: RuleScore,
        model_used: ModelUsed,
        ml_error: Option<String>,
    ) -> Self {
        Self {
            subject_id: context.subject.id,
            role_id: context.role.id,
            score: rule.score,
            level: rule.level,
            probabilities: BTreeMap::new(),
            model_used,
            ml_error,
            matched_count: rule.matched_count,
            required_count: rule.required_count,
            gap_count: rule.gap_count,
            missing: rule.missing,
        }
    }

    pub fn to_record(&self, computed_at: DateTime<Utc>) -> ReadinessRecord {
        ReadinessRecord {
            subject_id: self.subject_id,
            role_id: self.role_id,
            score: self.score,
            level: self.level,
            matched_count: self.matched_count,
            required_count: self.required_count,
            gap_count: self.gap_count,
            computed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LevelClassifier {
    DecisionTree(DecisionTreeClassifier),
    GradientBoosting(GradientBoostingClassifier),
}

impl LevelClassifier {
    fn predict_proba(&self, row: &[f64]) -> Result<Vec<f64>, EstimatorError> {
        match self {
            LevelClassifier::DecisionTree(model) => model.predict_proba(row),
            LevelClassifier::GradientBoosting(model) => model.predict_proba(row),
        }
    }

    fn n_classes(&self) -> usize {
        match self {
            LevelClassifier::DecisionTree(model) => model.n_classes(),
            LevelClassifier::GradientBoosting(model) => model.n_classes(),
        }
    }

    fn n_features(&self) -> usize {
        match self {
            LevelClassifier::DecisionTree(model) => model.n_features(),
            LevelClassifier::GradientBoosting(model) => model.n_features(),
        }
    }
}

/// Estimators loaded once and shared read-only by every prediction in a call or batch.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModels {
    pub regressor: RandomForestRegressor,
    pub classifier: LevelClassifier,
    pub labels: LabelMapping,
    pub classifier_kind: ClassifierKind,
    pub trained_at: DateTime<Utc>,
}

/// Learned-path output for one feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct MlPrediction {
    pub score: Decimal,
    pub level: ReadinessLevel,
    pub probabilities: BTreeMap<String, f64>,
}

impl LoadedModels {
    /// Estimator failures surface as [`ReadinessError::Inference`]; an output index the
    /// label mapping does not cover is a consistency error.
    pub fn infer(&self, features: &FeatureVector) -> Result<MlPrediction, ReadinessError> {
        let row = features.as_slice();
        let raw = self
            .regressor
            .predict(row)
            .map_err(|err| ReadinessError::Inference(format!("regressor: {err}")))?;
        let clamped = raw.clamp(0.0, 100.0);
        let score = Decimal::from_f64(clamped)
            .ok_or_else(|| ReadinessError::Inference(format!("regressor output {raw}")))?
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            .clamp(Decimal::ZERO, dec!(100));

        let distribution = self
            .classifier
            .predict_proba(row)
            .map_err(|err| ReadinessError::Inference(format!("classifier: {err}")))?;
        let best = super::ml::argmax(&distribution);
        let level = self.labels.decode(best)?;

        let probabilities = distribution
            .iter()
            .enumerate()
            .map(|(index, p)| {
                self.labels
                    .decode(index)
                    .map(|level| (level.label().to_string(), *p))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(MlPrediction {
            score,
            level,
            probabilities,
        })
    }
}

/// Outcome of trying to load the learned models.
#[derive(Debug, Clone)]
pub enum ModelState {
    Available(Arc<LoadedModels>),
    Unavailable { missing: Vec<String> },
    Errored { reason: String },
}

impl ModelState {
    pub fn label(&self) -> &'static str {
        match self {
            ModelState::Available(_) => "available",
            ModelState::Unavailable { .. } => "unavailable",
            ModelState::Errored { .. } => "errored",
        }
    }

    fn fallback_reason(&self) -> Option<String> {
        match self {
            ModelState::Available(_) => None,
            ModelState::Unavailable { missing } => {
                Some(format!("models unavailable: missing {}", missing.join(", ")))
            }
            ModelState::Errored { reason } => Some(reason.clone()),
        }
    }
}

/// Learned predictor that degrades to the rule-based scorer.
pub struct Predictor<S> {
    artifacts: Arc<S>,
    classifier: ClassifierKind,
    scorer: RuleBasedScorer,
}

impl<S> Predictor<S>
where
    S: ArtifactStore,
{
    pub fn new(artifacts: Arc<S>, classifier: ClassifierKind) -> Self {
        Self {
            artifacts,
            classifier,
            scorer: RuleBasedScorer::new(),
        }
    }

    pub fn classifier_kind(&self) -> ClassifierKind {
        self.classifier
    }

    /// Missing artifacts yield `Unavailable`. Unreadable, mistyped or structurally broken
    /// ones, or a set mixing two training runs, yield `Errored`.
    /// An artifact fitted against a different feature schema is returned as an error.
    pub fn load_state(&self) -> Result<ModelState, ReadinessError> {
        let names = [
            REGRESSOR_ARTIFACT,
            self.classifier.artifact_name(),
            LABELS_ARTIFACT,
        ];

        let mut loaded = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match self.artifacts.load_artifact(name) {
                Ok(Some(artifact)) => loaded.push(artifact),
                Ok(None) => missing.push(name.to_string()),
                Err(err) => {
                    warn!(artifact = name, error = %err, "failed to load model artifact");
                    return Ok(ModelState::Errored {
                        reason: err.to_string(),
                    });
                }
            }
        }
        if !missing.is_empty() {
            debug!(missing = ?missing, "model artifacts not published");
            return Ok(ModelState::Unavailable { missing });
        }

        for artifact in &loaded {
            artifact.verify_schema()?;
        }

        match assemble(loaded, self.classifier) {
            Ok(models) => Ok(ModelState::Available(Arc::new(models))),
            Err(reason) => {
                warn!(%reason, "model artifacts are inconsistent");
                Ok(ModelState::Errored { reason })
            }
        }
    }

    /// Rule-based result with no attempt at the learned path.
    pub fn rule_based(&self, context: &PairContext) -> Result<ReadinessResult, ReadinessError> {
        let rule = self.scorer.score(&context.held, &context.requirements)?;
        Ok(ReadinessResult::from_rule(
            context,
            rule,
            ModelUsed::RuleBased,
            None,
        ))
    }

    /// Loads the models and predicts one pair, falling back silently.
    pub fn predict(
        &self,
        repository: &dyn ReadinessRepository,
        subject_id: SubjectId,
        role_id: RoleId,
    ) -> Result<ReadinessResult, ReadinessError> {
        let state = self.load_state()?;
        let extractor = FeatureExtractor::load(repository)?;
        let context = PairContext::load(repository, subject_id, role_id)?;
        self.predict_with(&state, &extractor, &context)
    }

    /// Inference failures and unusable models never reach the caller: the result carries
    /// the rule-based score, a fallback tag, and the reason in `ml_error`.
    pub fn predict_with(
        &self,
        state: &ModelState,
        extractor: &FeatureExtractor,
        context: &PairContext,
    ) -> Result<ReadinessResult, ReadinessError> {
        let rule = self.scorer.score(&context.held, &context.requirements)?;

        let models = match state {
            ModelState::Available(models) => models,
            other => {
                let reason = other.fallback_reason();
                return Ok(ReadinessResult::from_rule(
                    context,
                    rule,
                    ModelUsed::RuleBasedFallback,
                    reason,
                ));
            }
        };

        match infer_pair(models, extractor, context) {
            Ok(prediction) => Ok(ReadinessResult {
                subject_id: context.subject.id,
                role_id: context.role.id,
                score: prediction.score,
                level: prediction.level,
                probabilities: prediction.probabilities,
                model_used: ModelUsed::Ml,
                ml_error: None,
                matched_count: rule.matched_count,
                required_count: rule.required_count,
                gap_count: rule.gap_count,
                missing: rule.missing,
            }),
            Err(ReadinessError::Inference(reason)) => {
                warn!(
                    subject_id = %context.subject.id,
                    role_id = %context.role.id,
                    %reason,
                    "ml inference failed; using rule-based score"
                );
                Ok(ReadinessResult::from_rule(
                    context,
                    rule,
                    ModelUsed::RuleBasedFallback,
                    Some(reason),
                ))
            }
            Err(other) => Err(other),
        }
    }

    /// Predicts every pair against one shared model load. Pairs whose inference fails are
    /// logged and left out; only learned predictions are returned.
    pub fn predict_batch(
        &self,
        models: &LoadedModels,
        repository: &dyn ReadinessRepository,
        extractor: &FeatureExtractor,
        pairs: &[(SubjectId, RoleId)],
    ) -> Result<Vec<ReadinessResult>, ReadinessError> {
        let outcomes: Vec<Result<Option<ReadinessResult>, ReadinessError>> = pairs
            .par_iter()
            .map(|(subject_id, role_id)| {
                let context = PairContext::load(repository, *subject_id, *role_id)?;
                let rule = self.scorer.score(&context.held, &context.requirements)?;
                match infer_pair(models, extractor, &context) {
                    Ok(prediction) => Ok(Some(ReadinessResult {
                        subject_id: *subject_id,
                        role_id: *role_id,
                        score: prediction.score,
                        level: prediction.level,
                        probabilities: prediction.probabilities,
                        model_used: ModelUsed::Ml,
                        ml_error: None,
                        matched_count: rule.matched_count,
                        required_count: rule.required_count,
                        gap_count: rule.gap_count,
                        missing: rule.missing,
                    })),
                    Err(ReadinessError::Inference(reason)) => {
                        warn!(%subject_id, %role_id, %reason, "skipping pair in ml batch");
                        Ok(None)
                    }
                    Err(other) => Err(other),
                }
            })
            .collect();

        let mut results = Vec::with_capacity(pairs.len());
        for outcome in outcomes {
            if let Some(result) = outcome? {
                results.push(result);
            }
        }
        Ok(results)
    }
}

fn infer_pair(
    models: &LoadedModels,
    extractor: &FeatureExtractor,
    context: &PairContext,
) -> Result<MlPrediction, ReadinessError> {
    let features = extractor.extract_context(context)?;
    models.infer(&features)
}

fn assemble(artifacts: Vec<Artifact>, kind: ClassifierKind) -> Result<LoadedModels, String> {
    let mut regressor = None;
    let mut classifier = None;
    let mut labels = None;
    let mut trained_at: Option<DateTime<Utc>> = None;

    for artifact in artifacts {
        if let Some(first) = trained_at.filter(|first| *first != artifact.trained_at) {
            return Err(format!(
                "artifact '{}' was trained at {} but its companions at {}",
                artifact.name, artifact.trained_at, first
            ));
        }
        trained_at = Some(artifact.trained_at);
        let name = artifact.name;
        let malformed = |err: EstimatorError| format!("artifact '{name}' is unusable: {err}");
        match (name.as_str(), artifact.estimator) {
            (REGRESSOR_ARTIFACT, Estimator::RandomForest(model)) => {
                model.validate().map_err(malformed)?;
                regressor = Some(model)
            }
            (LABELS_ARTIFACT, Estimator::LabelMapping(mapping)) => labels = Some(mapping),
            (slot, Estimator::DecisionTree(model))
                if kind == ClassifierKind::DecisionTree && slot == kind.artifact_name() =>
            {
                model.validate().map_err(malformed)?;
                classifier = Some(LevelClassifier::DecisionTree(model))
            }
            (slot, Estimator::GradientBoosting(model))
                if kind == ClassifierKind::GradientBoosting && slot == kind.artifact_name() =>
            {
                model.validate().map_err(malformed)?;
                classifier = Some(LevelClassifier::GradientBoosting(model))
            }
            (_, estimator) => {
                return Err(format!(
                    "artifact '{name}' holds an unexpected {} estimator",
                    estimator.kind()
                ))
            }
        }
    }

    let (Some(regressor), Some(classifier), Some(labels), Some(trained_at)) =
        (regressor, classifier, labels, trained_at)
    else {
        return Err("model artifacts are incomplete".to_string());
    };

    if classifier.n_classes() != labels.len() {
        return Err(format!(
            "classifier predicts {} classes but the label mapping has {}",
            classifier.n_classes(),
            labels.len()
        ));
    }
    if regressor.n_features() != FEATURE_COUNT || classifier.n_features() != FEATURE_COUNT {
        return Err(format!(
            "estimators expect {} and {} features, the extractor produces {FEATURE_COUNT}",
            regressor.n_features(),
            classifier.n_features()
        ));
    }

    Ok(LoadedModels {
        regressor,
        classifier,
        labels,
        classifier_kind: kind,
        trained_at,
    })
}
