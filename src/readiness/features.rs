//! Fixed-order feature vectors shared by training and inference.
//!
//! The position of every feature is part of the artifact contract: estimators persist the
//! exact name list they were fitted against and [`verify_schema`] refuses to pair an
//! estimator with a vector built from a different list. The matched/required ratio is
//! left out on purpose so the learned models cannot lean on a single shortcut column.

use std::collections::HashMap;
use std::io::Write;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::domain::{
    Competency, CompetencyCategory, CompetencyId, Program, Provenance, ReadinessLevel, Role,
    RoleId, RoleRequirement, Subject, SubjectCompetency, SubjectId,
};
use super::error::{ConsistencyError, ReadinessError};
use super::proficiency::ProficiencyLevel;
use super::repository::ReadinessRepository;

pub const FEATURE_COUNT: usize = 29;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "year_of_study",
    "enrollment_year",
    "program_BBA",
    "program_Btech",
    "program_B.Com",
    "total_skills",
    "avg_proficiency",
    "max_proficiency",
    "min_proficiency",
    "skills_Technical",
    "skills_Business",
    "skills_Design",
    "skills_Soft Skills",
    "proficiency_Beginner",
    "proficiency_Intermediate",
    "proficiency_Advanced",
    "proficiency_Expert",
    "source_Course",
    "source_Certification",
    "source_Project",
    "source_Workshop",
    "required_skills_count",
    "matched_skills_count",
    "skill_gap_count",
    "role_Data Analyst",
    "role_Full-Stack Developer",
    "role_Digital Marketer",
    "role_Business Analyst",
    "role_UX/UI Designer",
];

/// Role names with a dedicated one-hot column; any other role encodes as all zeros.
pub const KNOWN_ROLES: [&str; 5] = [
    "Data Analyst",
    "Full-Stack Developer",
    "Digital Marketer",
    "Business Analyst",
    "UX/UI Designer",
];

const PROGRAM_OFFSET: usize = 2;
const PORTFOLIO_OFFSET: usize = 5;
const CATEGORY_OFFSET: usize = 9;
const PROFICIENCY_OFFSET: usize = 13;
const PROVENANCE_OFFSET: usize = 17;
const REQUIREMENT_OFFSET: usize = 21;
const ROLE_OFFSET: usize = 24;

pub fn feature_schema() -> Vec<String> {
    FEATURE_NAMES.iter().map(|name| name.to_string()).collect()
}

/// Rejects an artifact whose recorded feature names differ from [`FEATURE_NAMES`].
pub fn verify_schema(artifact: &str, names: &[String]) -> Result<(), ConsistencyError> {
    if names.len() != FEATURE_COUNT {
        return Err(ConsistencyError::SchemaLength {
            artifact: artifact.to_string(),
            expected: FEATURE_COUNT,
            actual: names.len(),
        });
    }
    for (index, (actual, expected)) in names.iter().zip(FEATURE_NAMES).enumerate() {
        if actual != expected {
            return Err(ConsistencyError::SchemaOrder {
                artifact: artifact.to_string(),
                index,
                expected: expected.to_string(),
                actual: actual.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn new(values: [f64; FEATURE_COUNT]) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|candidate| *candidate == name)
            .map(|index| self.0[index])
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|value| value.to_le_bytes()).collect()
    }
}

/// Builds feature vectors; holds the catalog category lookup.
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    categories: HashMap<CompetencyId, CompetencyCategory>,
}

impl FeatureExtractor {
    pub fn from_catalog(catalog: &[Competency]) -> Self {
        Self {
            categories: catalog
                .iter()
                .map(|competency| (competency.id, competency.category))
                .collect(),
        }
    }

    pub fn load(repository: &dyn ReadinessRepository) -> Result<Self, ReadinessError> {
        Ok(Self::from_catalog(&repository.competency_catalog()?))
    }

    pub fn extract(
        &self,
        subject: &Subject,
        role: &Role,
        held: &[SubjectCompetency],
        requirements: &[RoleRequirement],
    ) -> Result<FeatureVector, ConsistencyError> {
        let mut values = [0.0f64; FEATURE_COUNT];

        values[0] = f64::from(subject.year_of_study);
        values[1] = f64::from(subject.enrollment_year);
        for (slot, program) in Program::ALL.iter().enumerate() {
            values[PROGRAM_OFFSET + slot] = indicator(subject.program == *program);
        }

        if !held.is_empty() {
            let mut sum = Decimal::ZERO;
            let mut max = Decimal::MIN;
            let mut min = Decimal::MAX;
            for record in held {
                record.validate()?;
                sum += record.proficiency_score;
                max = max.max(record.proficiency_score);
                min = min.min(record.proficiency_score);
            }
            let mean = sum / Decimal::from(held.len());
            values[PORTFOLIO_OFFSET] = held.len() as f64;
            values[PORTFOLIO_OFFSET + 1] = decimal_to_f64(mean);
            values[PORTFOLIO_OFFSET + 2] = decimal_to_f64(max);
            values[PORTFOLIO_OFFSET + 3] = decimal_to_f64(min);
        }

        for record in held {
            if let Some(category) = self.categories.get(&record.competency_id) {
                values[CATEGORY_OFFSET + category_slot(*category)] += 1.0;
            }
            values[PROFICIENCY_OFFSET + proficiency_slot(record.level)] += 1.0;
            values[PROVENANCE_OFFSET + provenance_slot(record.provenance)] += 1.0;
        }

        let required = requirements.len();
        let matched = requirements
            .iter()
            .filter(|requirement| {
                held.iter()
                    .any(|record| record.competency_id == requirement.competency_id)
            })
            .count();
        values[REQUIREMENT_OFFSET] = required as f64;
        values[REQUIREMENT_OFFSET + 1] = matched as f64;
        values[REQUIREMENT_OFFSET + 2] = (required - matched) as f64;

        for (slot, name) in KNOWN_ROLES.iter().enumerate() {
            values[ROLE_OFFSET + slot] = indicator(role.name == *name);
        }

        Ok(FeatureVector(values))
    }

    pub fn extract_context(&self, context: &PairContext) -> Result<FeatureVector, ConsistencyError> {
        self.extract(
            &context.subject,
            &context.role,
            &context.held,
            &context.requirements,
        )
    }

    /// Looks up every input for the pair and extracts its vector.
    pub fn extract_pair(
        &self,
        repository: &dyn ReadinessRepository,
        subject_id: SubjectId,
        role_id: RoleId,
    ) -> Result<FeatureVector, ReadinessError> {
        let context = PairContext::load(repository, subject_id, role_id)?;
        Ok(self.extract_context(&context)?)
    }
}

/// Everything scoring and extraction need for one (subject, role) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairContext {
    pub subject: Subject,
    pub role: Role,
    pub held: Vec<SubjectCompetency>,
    pub requirements: Vec<RoleRequirement>,
}

impl PairContext {
    pub fn load(
        repository: &dyn ReadinessRepository,
        subject_id: SubjectId,
        role_id: RoleId,
    ) -> Result<Self, ReadinessError> {
        let subject = repository
            .subject(subject_id)?
            .ok_or(ReadinessError::SubjectNotFound(subject_id))?;
        let role = repository
            .role(role_id)?
            .ok_or(ReadinessError::RoleNotFound(role_id))?;
        Ok(Self {
            held: repository.subject_competencies(subject_id)?,
            requirements: repository.role_requirements(role_id)?,
            subject,
            role,
        })
    }
}

fn indicator(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

fn decimal_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

fn category_slot(category: CompetencyCategory) -> usize {
    match category {
        CompetencyCategory::Technical => 0,
        CompetencyCategory::Business => 1,
        CompetencyCategory::Design => 2,
        CompetencyCategory::SoftSkills => 3,
    }
}

fn proficiency_slot(level: ProficiencyLevel) -> usize {
    match level {
        ProficiencyLevel::Beginner => 0,
        ProficiencyLevel::Intermediate => 1,
        ProficiencyLevel::Advanced => 2,
        ProficiencyLevel::Expert => 3,
    }
}

fn provenance_slot(provenance: Provenance) -> usize {
    match provenance {
        Provenance::Course => 0,
        Provenance::Certification => 1,
        Provenance::Project => 2,
        Provenance::Workshop => 3,
    }
}

/// One historical observation: the vector for a pair and the outcome recorded for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub subject_id: SubjectId,
    pub role_id: RoleId,
    pub features: FeatureVector,
    pub score: f64,
    pub level: ReadinessLevel,
}

/// Rebuilds the training table from stored readiness records using the live portfolio.
pub fn historical_dataset(
    repository: &dyn ReadinessRepository,
    extractor: &FeatureExtractor,
) -> Result<Vec<TrainingExample>, ReadinessError> {
    let mut examples = Vec::new();
    for record in repository.readiness_records()? {
        let features = match extractor.extract_pair(repository, record.subject_id, record.role_id) {
            Ok(features) => features,
            Err(ReadinessError::SubjectNotFound(_) | ReadinessError::RoleNotFound(_)) => {
                warn!(
                    subject_id = %record.subject_id,
                    role_id = %record.role_id,
                    "skipping readiness record with dangling reference"
                );
                continue;
            }
            Err(other) => return Err(other),
        };
        examples.push(TrainingExample {
            subject_id: record.subject_id,
            role_id: record.role_id,
            features,
            score: decimal_to_f64(record.score),
            level: record.level,
        });
    }
    Ok(examples)
}

/// Writes the feature matrix with identifiers and targets as CSV.
pub fn write_csv<W: Write>(examples: &[TrainingExample], writer: W) -> Result<(), csv::Error> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header = vec!["subject_id".to_string(), "role_id".to_string()];
    header.extend(feature_schema());
    header.push("readiness_score".to_string());
    header.push("readiness_level".to_string());
    csv_writer.write_record(&header)?;

    for example in examples {
        let mut row = vec![example.subject_id.to_string(), example.role_id.to_string()];
        row.extend(example.features.as_slice().iter().map(|value| value.to_string()));
        row.push(format!("{:.2}", example.score));
        row.push(example.level.label().to_string());
        csv_writer.write_record(&row)?;
    }

    csv_writer.flush()?;
    Ok(())
}
