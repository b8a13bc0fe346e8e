//! Role readiness scoring.
//!
//! A weighted rule-based matcher produces an auditable score for every (subject, role)
//! pair. Learned estimators trained on the stored scores can stand in for it; whenever they
//! are missing or fail for a pair the matcher result is returned instead, tagged with the
//! path that produced it.

pub mod artifacts;
pub mod batch;
pub mod domain;
pub mod error;
pub mod features;
pub mod ml;
pub mod predictor;
pub mod proficiency;
pub mod repository;
pub mod router;
pub mod scoring;
pub mod service;
pub mod store;
pub mod training;

#[cfg(test)]
mod tests;

pub use artifacts::{
    Artifact, ArtifactError, ArtifactStore, Estimator, FsArtifactStore, LabelMapping,
    MemoryArtifactStore,
};
pub use batch::{BatchOptions, BatchOrchestrator, BatchSummary};
pub use domain::{
    Competency, CompetencyCategory, CompetencyId, Program, Provenance, ReadinessLevel,
    ReadinessRecord, Role, RoleId, RoleRequirement, Subject, SubjectCompetency, SubjectId,
};
pub use error::{ConsistencyError, ReadinessError};
pub use features::{
    feature_schema, historical_dataset, write_csv, FeatureExtractor, FeatureVector,
    PairContext, TrainingExample, FEATURE_COUNT, FEATURE_NAMES,
};
pub use predictor::{ModelState, ModelUsed, Predictor, ReadinessResult};
pub use proficiency::ProficiencyLevel;
pub use repository::{ReadinessRepository, RepositoryError, UpsertOutcome};
pub use router::readiness_router;
pub use scoring::{GapPriority, MissingCompetency, RuleBasedScorer, RuleScore};
pub use service::{ModelReport, ReadinessService};
pub use store::{MemoryStore, SnapshotError, StoreSnapshot};
pub use training::{ClassifierKind, EvaluationReport, Trainer, TrainingConfig};
