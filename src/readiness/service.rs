use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::artifacts::ArtifactStore;
use super::batch::{BatchOptions, BatchOrchestrator, BatchSummary};
use super::domain::{RoleId, SubjectId};
use super::error::ReadinessError;
use super::features::{historical_dataset, FeatureExtractor, PairContext, TrainingExample};
use super::predictor::{ModelState, Predictor, ReadinessResult};
use super::repository::{ReadinessRepository, RepositoryError};
use super::training::{ClassifierKind, EvaluationReport, Trainer, TrainingConfig};

/// Snapshot of the published models for display surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    pub status: String,
    pub classifier: ClassifierKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<EvaluationReport>,
}

/// Service composing the repository, artifact store, predictor, and trainer.
pub struct ReadinessService<R, S> {
    repository: Arc<R>,
    artifacts: Arc<S>,
    predictor: Predictor<S>,
    trainer: Trainer,
    prefer_ml: bool,
    // batches and single scores read the artifacts; training replaces them
    publication: RwLock<()>,
}

impl<R, S> ReadinessService<R, S>
where
    R: ReadinessRepository + 'static,
    S: ArtifactStore + 'static,
{
    pub fn new(
        repository: Arc<R>,
        artifacts: Arc<S>,
        classifier: ClassifierKind,
        training: TrainingConfig,
    ) -> Self {
        let predictor = Predictor::new(artifacts.clone(), classifier);
        Self {
            repository,
            artifacts,
            predictor,
            trainer: Trainer::new(training),
            prefer_ml: true,
            publication: RwLock::new(()),
        }
    }

    /// Default path for callers that do not choose one explicitly.
    pub fn with_prefer_ml(mut self, prefer_ml: bool) -> Self {
        self.prefer_ml = prefer_ml;
        self
    }

    pub fn prefer_ml(&self) -> bool {
        self.prefer_ml
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn artifacts(&self) -> &Arc<S> {
        &self.artifacts
    }

    pub fn predictor(&self) -> &Predictor<S> {
        &self.predictor
    }

    /// Scores one pair; with `prefer_ml` the learned path is tried first.
    pub fn compute_score(
        &self,
        subject_id: SubjectId,
        role_id: RoleId,
        prefer_ml: bool,
    ) -> Result<ReadinessResult, ReadinessError> {
        let _guard = self.read_guard()?;
        if prefer_ml {
            self.predictor.predict(&*self.repository, subject_id, role_id)
        } else {
            let context = PairContext::load(&*self.repository, subject_id, role_id)?;
            self.predictor.rule_based(&context)
        }
    }

    pub fn recompute_all(
        &self,
        prefer_ml: bool,
        deadline: Option<Instant>,
    ) -> Result<BatchSummary, ReadinessError> {
        let _guard = self.read_guard()?;
        BatchOrchestrator::new(&*self.repository, &self.predictor).recompute_all(
            BatchOptions {
                prefer_ml,
                deadline,
            },
        )
    }

    /// Rebuilds every estimator from the stored readiness records and publishes them.
    pub fn train_models(&self) -> Result<EvaluationReport, ReadinessError> {
        let _guard = self.write_guard()?;
        let examples = self.training_examples()?;
        if examples.is_empty() {
            return Err(ReadinessError::Configuration(
                "no historical readiness records to train on; run a rule-based recompute first"
                    .to_string(),
            ));
        }

        let trained = self.trainer.train(&examples)?;
        trained.publish(&*self.artifacts)?;
        info!(
            samples = examples.len(),
            trained_at = %trained.report.metadata.trained_at,
            "published readiness models"
        );
        Ok(trained.report)
    }

    pub fn training_examples(&self) -> Result<Vec<TrainingExample>, ReadinessError> {
        let extractor = FeatureExtractor::load(&*self.repository)?;
        historical_dataset(&*self.repository, &extractor)
    }

    pub fn model_report(&self) -> Result<ModelReport, ReadinessError> {
        let _guard = self.read_guard()?;
        let state = self.predictor.load_state()?;
        let metrics = self.artifacts.load_metrics()?;

        let mut report = ModelReport {
            status: state.label().to_string(),
            classifier: self.predictor.classifier_kind(),
            trained_at: None,
            missing: Vec::new(),
            error: None,
            metrics,
        };
        match state {
            ModelState::Available(models) => report.trained_at = Some(models.trained_at),
            ModelState::Unavailable { missing } => report.missing = missing,
            ModelState::Errored { reason } => report.error = Some(reason),
        }
        Ok(report)
    }

    fn read_guard(&self) -> Result<RwLockReadGuard<'_, ()>, ReadinessError> {
        self.publication.read().map_err(|_| poisoned())
    }

    /// Holds the publication lock as a training run would.
    #[cfg(test)]
    pub(crate) fn hold_publication(&self) -> RwLockWriteGuard<'_, ()> {
        self.write_guard().expect("publication lock")
    }

    fn write_guard(&self) -> Result<RwLockWriteGuard<'_, ()>, ReadinessError> {
        self.publication.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> ReadinessError {
    RepositoryError::Unavailable("model publication lock poisoned".to_string()).into()
}
