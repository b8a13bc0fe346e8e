use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use super::domain::{
    Competency, CompetencyId, ReadinessRecord, Role, RoleId, RoleRequirement, Subject,
    SubjectCompetency, SubjectId,
};
use super::repository::{ReadinessRepository, RepositoryError, UpsertOutcome};

/// Serializable dump of every table, used to hydrate and persist [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub competencies: Vec<Competency>,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub requirements: Vec<RoleRequirement>,
    #[serde(default)]
    pub subject_competencies: Vec<SubjectCompetency>,
    #[serde(default)]
    pub readiness_records: Vec<ReadinessRecord>,
}

#[derive(Debug, Default)]
struct Tables {
    competencies: BTreeMap<CompetencyId, Competency>,
    subjects: BTreeMap<SubjectId, Subject>,
    roles: BTreeMap<RoleId, Role>,
    requirements: BTreeMap<(RoleId, CompetencyId), RoleRequirement>,
    subject_competencies: BTreeMap<(SubjectId, CompetencyId), SubjectCompetency>,
    readiness: BTreeMap<(SubjectId, RoleId), ReadinessRecord>,
}

/// In-process repository whose keyed tables enforce the pair uniqueness invariants.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self, RepositoryError> {
        let store = Self::new();
        for competency in snapshot.competencies {
            store.insert_competency(competency)?;
        }
        for subject in snapshot.subjects {
            store.insert_subject(subject)?;
        }
        for role in snapshot.roles {
            store.insert_role(role)?;
        }
        for requirement in snapshot.requirements {
            store.insert_requirement(requirement)?;
        }
        for held in snapshot.subject_competencies {
            store.insert_subject_competency(held)?;
        }
        {
            let mut tables = store.lock()?;
            for record in snapshot.readiness_records {
                if tables.readiness.insert(record.key(), record.clone()).is_some() {
                    return Err(RepositoryError::DataIntegrity(format!(
                        "duplicate readiness record for subject {} role {}",
                        record.subject_id, record.role_id
                    )));
                }
            }
        }
        Ok(store)
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot, RepositoryError> {
        let tables = self.lock()?;
        Ok(StoreSnapshot {
            competencies: tables.competencies.values().cloned().collect(),
            subjects: tables.subjects.values().cloned().collect(),
            roles: tables.roles.values().cloned().collect(),
            requirements: tables.requirements.values().cloned().collect(),
            subject_competencies: tables.subject_competencies.values().cloned().collect(),
            readiness_records: tables.readiness.values().cloned().collect(),
        })
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let snapshot: StoreSnapshot = serde_json::from_reader(reader)?;
        debug!(path = %path.display(), subjects = snapshot.subjects.len(), "loaded store snapshot");
        Ok(Self::from_snapshot(snapshot)?)
    }

    /// Persists the snapshot through a sibling temp file so readers never see a partial write.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        let snapshot = self.snapshot()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut temp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, &snapshot)?;
            writer.flush()?;
        }
        temp.persist(path).map_err(|err| SnapshotError::Io(err.error))?;
        Ok(())
    }

    pub fn insert_competency(&self, competency: Competency) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        if tables.competencies.contains_key(&competency.id) {
            return Err(RepositoryError::Conflict);
        }
        tables.competencies.insert(competency.id, competency);
        Ok(())
    }

    pub fn insert_subject(&self, subject: Subject) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        if tables.subjects.contains_key(&subject.id) {
            return Err(RepositoryError::Conflict);
        }
        tables.subjects.insert(subject.id, subject);
        Ok(())
    }

    pub fn insert_role(&self, role: Role) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        if tables.roles.contains_key(&role.id) {
            return Err(RepositoryError::Conflict);
        }
        tables.roles.insert(role.id, role);
        Ok(())
    }

    pub fn insert_requirement(&self, requirement: RoleRequirement) -> Result<(), RepositoryError> {
        if !requirement.has_valid_weight() {
            return Err(RepositoryError::DataIntegrity(format!(
                "role {} competency {}: importance weight {} outside [0, 1]",
                requirement.role_id, requirement.competency_id, requirement.importance_weight
            )));
        }
        let mut tables = self.lock()?;
        let key = (requirement.role_id, requirement.competency_id);
        if tables.requirements.contains_key(&key) {
            return Err(RepositoryError::DataIntegrity(format!(
                "duplicate requirement for role {} competency {}",
                key.0, key.1
            )));
        }
        tables.requirements.insert(key, requirement);
        Ok(())
    }

    pub fn insert_subject_competency(
        &self,
        held: SubjectCompetency,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        let key = (held.subject_id, held.competency_id);
        if tables.subject_competencies.contains_key(&key) {
            return Err(RepositoryError::DataIntegrity(format!(
                "duplicate competency {} for subject {}",
                key.1, key.0
            )));
        }
        tables.subject_competencies.insert(key, held);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }
}

impl ReadinessRepository for MemoryStore {
    fn competency_catalog(&self) -> Result<Vec<Competency>, RepositoryError> {
        Ok(self.lock()?.competencies.values().cloned().collect())
    }

    fn subjects(&self) -> Result<Vec<Subject>, RepositoryError> {
        Ok(self.lock()?.subjects.values().cloned().collect())
    }

    fn subject(&self, id: SubjectId) -> Result<Option<Subject>, RepositoryError> {
        Ok(self.lock()?.subjects.get(&id).cloned())
    }

    fn roles(&self) -> Result<Vec<Role>, RepositoryError> {
        Ok(self.lock()?.roles.values().cloned().collect())
    }

    fn role(&self, id: RoleId) -> Result<Option<Role>, RepositoryError> {
        Ok(self.lock()?.roles.get(&id).cloned())
    }

    fn role_requirements(&self, role_id: RoleId) -> Result<Vec<RoleRequirement>, RepositoryError> {
        let tables = self.lock()?;
        Ok(tables
            .requirements
            .range((role_id, CompetencyId(i64::MIN))..=(role_id, CompetencyId(i64::MAX)))
            .map(|(_, requirement)| requirement.clone())
            .collect())
    }

    fn subject_competencies(
        &self,
        subject_id: SubjectId,
    ) -> Result<Vec<SubjectCompetency>, RepositoryError> {
        let tables = self.lock()?;
        Ok(tables
            .subject_competencies
            .range((subject_id, CompetencyId(i64::MIN))..=(subject_id, CompetencyId(i64::MAX)))
            .map(|(_, held)| held.clone())
            .collect())
    }

    fn readiness_record(
        &self,
        subject_id: SubjectId,
        role_id: RoleId,
    ) -> Result<Option<ReadinessRecord>, RepositoryError> {
        Ok(self.lock()?.readiness.get(&(subject_id, role_id)).cloned())
    }

    fn upsert_readiness_record(
        &self,
        record: ReadinessRecord,
    ) -> Result<UpsertOutcome, RepositoryError> {
        let mut tables = self.lock()?;
        match tables.readiness.insert(record.key(), record) {
            Some(_) => Ok(UpsertOutcome::Updated),
            None => Ok(UpsertOutcome::Inserted),
        }
    }

    fn readiness_records(&self) -> Result<Vec<ReadinessRecord>, RepositoryError> {
        Ok(self.lock()?.readiness.values().cloned().collect())
    }
}

/// Failures while reading or writing a JSON store snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
