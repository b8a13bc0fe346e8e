use serde::{Deserialize, Serialize};

use super::domain::{
    Competency, ReadinessRecord, Role, RoleId, RoleRequirement, Subject, SubjectCompetency,
    SubjectId,
};

/// Storage abstraction so the scoring pipeline can be exercised in isolation.
pub trait ReadinessRepository: Send + Sync {
    fn competency_catalog(&self) -> Result<Vec<Competency>, RepositoryError>;
    fn subjects(&self) -> Result<Vec<Subject>, RepositoryError>;
    fn subject(&self, id: SubjectId) -> Result<Option<Subject>, RepositoryError>;
    fn roles(&self) -> Result<Vec<Role>, RepositoryError>;
    fn role(&self, id: RoleId) -> Result<Option<Role>, RepositoryError>;
    fn role_requirements(&self, role_id: RoleId) -> Result<Vec<RoleRequirement>, RepositoryError>;
    fn subject_competencies(
        &self,
        subject_id: SubjectId,
    ) -> Result<Vec<SubjectCompetency>, RepositoryError>;
    fn readiness_record(
        &self,
        subject_id: SubjectId,
        role_id: RoleId,
    ) -> Result<Option<ReadinessRecord>, RepositoryError>;
    /// Insert-or-update keyed on (subject, role); must never create a second row for a pair.
    fn upsert_readiness_record(
        &self,
        record: ReadinessRecord,
    ) -> Result<UpsertOutcome, RepositoryError>;
    fn readiness_records(&self) -> Result<Vec<ReadinessRecord>, RepositoryError>;
}

/// Whether an upsert created a row or replaced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("uniqueness violated: {0}")]
    DataIntegrity(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
