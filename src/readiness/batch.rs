use std::time::Instant;

use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::artifacts::ArtifactStore;
use super::domain::{RoleId, SubjectId};
use super::error::ReadinessError;
use super::features::{FeatureExtractor, PairContext};
use super::predictor::{ModelState, ModelUsed, Predictor, ReadinessResult};
use super::repository::{ReadinessRepository, UpsertOutcome};

/// Pairs computed in parallel before their results are written.
const CHUNK_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    pub prefer_ml: bool,
    /// Checked between pairs; an upsert already started always completes.
    pub deadline: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Pairs the learned path could not score.
    pub skipped: usize,
    pub deadline_reached: bool,
    pub model_used: ModelUsed,
}

/// Recomputes the readiness table for every (subject, role) pair.
pub struct BatchOrchestrator<'a, S> {
    repository: &'a dyn ReadinessRepository,
    predictor: &'a Predictor<S>,
}

impl<'a, S> BatchOrchestrator<'a, S>
where
    S: ArtifactStore,
{
    pub fn new(repository: &'a dyn ReadinessRepository, predictor: &'a Predictor<S>) -> Self {
        Self {
            repository,
            predictor,
        }
    }

    pub fn recompute_all(&self, options: BatchOptions) -> Result<BatchSummary, ReadinessError> {
        let pairs = self.pairs()?;
        let extractor = FeatureExtractor::load(self.repository)?;

        let models = if options.prefer_ml {
            match self.predictor.load_state()? {
                ModelState::Available(models) => Some(models),
                ModelState::Unavailable { missing } => {
                    return Err(ReadinessError::Configuration(format!(
                        "no trained models for ml batch (missing {})",
                        missing.join(", ")
                    )))
                }
                ModelState::Errored { reason } => {
                    return Err(ReadinessError::Configuration(format!(
                        "trained models unusable for ml batch: {reason}"
                    )))
                }
            }
        } else {
            None
        };

        let model_used = if models.is_some() {
            ModelUsed::Ml
        } else {
            ModelUsed::RuleBased
        };
        let mut summary = BatchSummary {
            processed: 0,
            inserted: 0,
            updated: 0,
            skipped: 0,
            deadline_reached: false,
            model_used,
        };

        info!(pairs = pairs.len(), %model_used, "recomputing readiness records");

        'chunks: for chunk in pairs.chunks(CHUNK_SIZE) {
            if past(options.deadline) {
                summary.deadline_reached = true;
                break;
            }

            let results = match &models {
                Some(models) => {
                    let results = self.predictor.predict_batch(
                        models,
                        self.repository,
                        &extractor,
                        chunk,
                    )?;
                    summary.skipped += chunk.len() - results.len();
                    results
                }
                None => self.rule_chunk(chunk)?,
            };

            for result in results {
                if past(options.deadline) {
                    summary.deadline_reached = true;
                    break 'chunks;
                }
                match self
                    .repository
                    .upsert_readiness_record(result.to_record(Utc::now()))?
                {
                    UpsertOutcome::Inserted => summary.inserted += 1,
                    UpsertOutcome::Updated => summary.updated += 1,
                }
                summary.processed += 1;
            }
        }

        let produced_nothing = summary.processed == 0 && !pairs.is_empty();
        if models.is_some() && produced_nothing && !summary.deadline_reached {
            return Err(ReadinessError::Configuration(
                "ml batch produced no predictions; rerun with the rule-based path".to_string(),
            ));
        }

        if summary.deadline_reached {
            warn!(
                processed = summary.processed,
                remaining = pairs.len().saturating_sub(summary.processed + summary.skipped),
                "readiness batch stopped at deadline"
            );
        }
        info!(
            processed = summary.processed,
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            "readiness batch complete"
        );
        Ok(summary)
    }

    fn pairs(&self) -> Result<Vec<(SubjectId, RoleId)>, ReadinessError> {
        let roles = self.repository.roles()?;
        Ok(self
            .repository
            .subjects()?
            .iter()
            .flat_map(|subject| roles.iter().map(move |role| (subject.id, role.id)))
            .collect())
    }

    fn rule_chunk(
        &self,
        chunk: &[(SubjectId, RoleId)],
    ) -> Result<Vec<ReadinessResult>, ReadinessError> {
        chunk
            .par_iter()
            .map(|(subject_id, role_id)| {
                let context = PairContext::load(self.repository, *subject_id, *role_id)?;
                self.predictor.rule_based(&context)
            })
            .collect()
    }
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}
