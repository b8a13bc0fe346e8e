use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use super::domain::ReadinessLevel;
use super::error::ConsistencyError;
use super::features::{feature_schema, verify_schema};
use super::ml::{DecisionTreeClassifier, GradientBoostingClassifier, RandomForestRegressor};
use super::training::EvaluationReport;

pub const REGRESSOR_ARTIFACT: &str = "readiness_regressor";
pub const CLASSIFIER_ARTIFACT: &str = "readiness_classifier";
pub const BOOSTING_ARTIFACT: &str = "readiness_gradient_boosting";
pub const LABELS_ARTIFACT: &str = "readiness_classifier_label_encoder";
pub const METRICS_FILE: &str = "model_metrics.json";

/// Ordered readiness levels; a classifier's output index is a position in `classes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMapping {
    classes: Vec<ReadinessLevel>,
}

impl LabelMapping {
    /// Distinct levels sorted by label text.
    pub fn fit(levels: impl IntoIterator<Item = ReadinessLevel>) -> Self {
        let mut classes: Vec<ReadinessLevel> = levels.into_iter().collect();
        classes.sort_by_key(|level| level.label());
        classes.dedup();
        Self { classes }
    }

    pub fn classes(&self) -> &[ReadinessLevel] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn encode(&self, level: ReadinessLevel) -> Option<usize> {
        self.classes.iter().position(|candidate| *candidate == level)
    }

    pub fn decode(&self, index: usize) -> Result<ReadinessLevel, ConsistencyError> {
        self.classes
            .get(index)
            .copied()
            .ok_or(ConsistencyError::UnknownLabelIndex(index))
    }

    pub fn class_names(&self) -> Vec<String> {
        self.classes
            .iter()
            .map(|level| level.label().to_string())
            .collect()
    }
}

/// Fitted payload carried by an [`Artifact`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "model", rename_all = "snake_case")]
pub enum Estimator {
    RandomForest(RandomForestRegressor),
    DecisionTree(DecisionTreeClassifier),
    GradientBoosting(GradientBoostingClassifier),
    LabelMapping(LabelMapping),
}

impl Estimator {
    pub fn kind(&self) -> &'static str {
        match self {
            Estimator::RandomForest(_) => "random_forest",
            Estimator::DecisionTree(_) => "decision_tree",
            Estimator::GradientBoosting(_) => "gradient_boosting",
            Estimator::LabelMapping(_) => "label_mapping",
        }
    }
}

/// Persisted estimator versioned by the exact feature list it was fitted against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub feature_names: Vec<String>,
    pub trained_at: DateTime<Utc>,
    pub estimator: Estimator,
}

impl Artifact {
    pub fn new(name: &str, estimator: Estimator, trained_at: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            feature_names: feature_schema(),
            trained_at,
            estimator,
        }
    }

    pub fn verify_schema(&self) -> Result<(), ConsistencyError> {
        verify_schema(&self.name, &self.feature_names)
    }
}

/// Storage for trained estimators and their evaluation report.
pub trait ArtifactStore: Send + Sync {
    /// Publishing replaces any previous artifact of the same name atomically.
    fn save_artifact(&self, artifact: &Artifact) -> Result<(), ArtifactError>;
    fn load_artifact(&self, name: &str) -> Result<Option<Artifact>, ArtifactError>;
    fn save_metrics(&self, report: &EvaluationReport) -> Result<(), ArtifactError>;
    fn load_metrics(&self) -> Result<Option<EvaluationReport>, ArtifactError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact '{name}' could not be (de)serialized: {source}")]
    Serialization {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("artifact store unavailable: {0}")]
    Unavailable(String),
}

/// One pretty-printed JSON file per artifact under a models directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    fn write_json<T: Serialize>(&self, path: &Path, name: &str, value: &T) -> Result<(), ArtifactError> {
        let io_error = |source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(io_error)?;
        let mut temp = NamedTempFile::new_in(&self.dir).map_err(io_error)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, value).map_err(|source| {
                ArtifactError::Serialization {
                    name: name.to_string(),
                    source,
                }
            })?;
            writer.flush().map_err(io_error)?;
        }
        temp.persist(path).map_err(|err| io_error(err.error))?;
        debug!(path = %path.display(), "published artifact");
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path, name: &str) -> Result<Option<T>, ArtifactError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ArtifactError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_reader(BufReader::new(file))
            .map(Some)
            .map_err(|source| ArtifactError::Serialization {
                name: name.to_string(),
                source,
            })
    }
}

impl ArtifactStore for FsArtifactStore {
    fn save_artifact(&self, artifact: &Artifact) -> Result<(), ArtifactError> {
        self.write_json(&self.artifact_path(&artifact.name), &artifact.name, artifact)
    }

    fn load_artifact(&self, name: &str) -> Result<Option<Artifact>, ArtifactError> {
        self.read_json(&self.artifact_path(name), name)
    }

    fn save_metrics(&self, report: &EvaluationReport) -> Result<(), ArtifactError> {
        self.write_json(&self.dir.join(METRICS_FILE), METRICS_FILE, report)
    }

    fn load_metrics(&self) -> Result<Option<EvaluationReport>, ArtifactError> {
        self.read_json(&self.dir.join(METRICS_FILE), METRICS_FILE)
    }
}

/// Process-local artifact store.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<HashMap<String, Artifact>>,
    metrics: Mutex<Option<EvaluationReport>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove(&self, name: &str) -> Result<Option<Artifact>, ArtifactError> {
        Ok(lock(&self.artifacts)?.remove(name))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, ArtifactError> {
    mutex
        .lock()
        .map_err(|_| ArtifactError::Unavailable("artifact mutex poisoned".to_string()))
}

impl ArtifactStore for MemoryArtifactStore {
    fn save_artifact(&self, artifact: &Artifact) -> Result<(), ArtifactError> {
        lock(&self.artifacts)?.insert(artifact.name.clone(), artifact.clone());
        Ok(())
    }

    fn load_artifact(&self, name: &str) -> Result<Option<Artifact>, ArtifactError> {
        Ok(lock(&self.artifacts)?.get(name).cloned())
    }

    fn save_metrics(&self, report: &EvaluationReport) -> Result<(), ArtifactError> {
        *lock(&self.metrics)? = Some(report.clone());
        Ok(())
    }

    fn load_metrics(&self) -> Result<Option<EvaluationReport>, ArtifactError> {
        Ok(lock(&self.metrics)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_mapping_sorts_by_label_text() {
        let mapping = LabelMapping::fit([
            ReadinessLevel::Ready,
            ReadinessLevel::EntryLevel,
            ReadinessLevel::Developing,
            ReadinessLevel::Ready,
        ]);
        assert_eq!(
            mapping.classes(),
            &[
                ReadinessLevel::Developing,
                ReadinessLevel::EntryLevel,
                ReadinessLevel::Ready
            ]
        );
        assert_eq!(mapping.encode(ReadinessLevel::Ready), Some(2));
        assert_eq!(
            mapping.decode(3),
            Err(ConsistencyError::UnknownLabelIndex(3))
        );
    }

    #[test]
    fn fs_store_round_trips_and_reports_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path().join("models"));
        assert!(store.load_artifact(LABELS_ARTIFACT).expect("reads").is_none());

        let artifact = Artifact::new(
            LABELS_ARTIFACT,
            Estimator::LabelMapping(LabelMapping::fit([ReadinessLevel::Ready])),
            Utc::now(),
        );
        store.save_artifact(&artifact).expect("saves");

        let loaded = store
            .load_artifact(LABELS_ARTIFACT)
            .expect("reads")
            .expect("present");
        assert_eq!(loaded, artifact);
        assert!(loaded.verify_schema().is_ok());
    }

    #[test]
    fn corrupt_artifact_is_a_serialization_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path());
        std::fs::write(store.artifact_path(REGRESSOR_ARTIFACT), b"{not json").expect("writes");

        let result = store.load_artifact(REGRESSOR_ARTIFACT);
        assert!(matches!(result, Err(ArtifactError::Serialization { .. })));
    }
}
