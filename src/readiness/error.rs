use super::artifacts::ArtifactError;
use super::domain::{ProficiencyMismatch, RoleId, SubjectId};
use super::ml::EstimatorError;
use super::repository::RepositoryError;

/// Error raised by the scoring, training, and prediction pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    /// Missing setup the caller must resolve, such as untrained models for an ML-only batch.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Per-pair inference failure; normally absorbed by the rule-based fallback.
    #[error("inference error: {0}")]
    Inference(String),
    #[error("consistency error: {0}")]
    Consistency(#[from] ConsistencyError),
    #[error("data integrity error: {0}")]
    DataIntegrity(String),
    #[error("subject {0} not found")]
    SubjectNotFound(SubjectId),
    #[error("role {0} not found")]
    RoleNotFound(RoleId),
    #[error(transparent)]
    Repository(RepositoryError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("estimator error: {0}")]
    Estimator(#[from] EstimatorError),
}

impl From<RepositoryError> for ReadinessError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::DataIntegrity(detail) => Self::DataIntegrity(detail),
            other => Self::Repository(other),
        }
    }
}

/// Invariant violations that must never be coerced into a result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsistencyError {
    #[error(transparent)]
    Proficiency(#[from] ProficiencyMismatch),
    #[error("artifact '{artifact}' records {actual} features but the extractor produces {expected}")]
    SchemaLength {
        artifact: String,
        expected: usize,
        actual: usize,
    },
    #[error("artifact '{artifact}' feature {index} is '{actual}' but the extractor produces '{expected}'")]
    SchemaOrder {
        artifact: String,
        index: usize,
        expected: String,
        actual: String,
    },
    #[error("label mapping does not cover classifier output index {0}")]
    UnknownLabelIndex(usize),
}
