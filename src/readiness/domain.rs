use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::proficiency::ProficiencyLevel;

/// Identifier wrapper for assessed individuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectId(pub i64);

/// Identifier wrapper for target roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleId(pub i64);

/// Identifier wrapper for catalog competencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompetencyId(pub i64);

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CompetencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Study programme a subject is enrolled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Program {
    #[serde(rename = "BBA")]
    Bba,
    #[serde(rename = "Btech")]
    Btech,
    #[serde(rename = "B.Com")]
    BCom,
}

impl Program {
    pub const ALL: [Program; 3] = [Program::Bba, Program::Btech, Program::BCom];

    pub const fn label(self) -> &'static str {
        match self {
            Program::Bba => "BBA",
            Program::Btech => "Btech",
            Program::BCom => "B.Com",
        }
    }
}

/// Catalog grouping used for per-category portfolio counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompetencyCategory {
    Technical,
    Business,
    Design,
    #[serde(rename = "Soft Skills")]
    SoftSkills,
}

impl CompetencyCategory {
    pub const ALL: [CompetencyCategory; 4] = [
        CompetencyCategory::Technical,
        CompetencyCategory::Business,
        CompetencyCategory::Design,
        CompetencyCategory::SoftSkills,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            CompetencyCategory::Technical => "Technical",
            CompetencyCategory::Business => "Business",
            CompetencyCategory::Design => "Design",
            CompetencyCategory::SoftSkills => "Soft Skills",
        }
    }
}

/// Where a held competency was acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    Course,
    Certification,
    Project,
    Workshop,
}

impl Provenance {
    pub const ALL: [Provenance; 4] = [
        Provenance::Course,
        Provenance::Certification,
        Provenance::Project,
        Provenance::Workshop,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Provenance::Course => "Course",
            Provenance::Certification => "Certification",
            Provenance::Project => "Project",
            Provenance::Workshop => "Workshop",
        }
    }
}

/// Individual whose readiness is assessed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
    pub program: Program,
    pub year_of_study: u8,
    pub enrollment_year: u16,
}

/// Shared catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competency {
    pub id: CompetencyId,
    pub name: String,
    pub category: CompetencyCategory,
    #[serde(default)]
    pub subcategory: Option<String>,
}

/// A competency held by a subject at a given proficiency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectCompetency {
    pub subject_id: SubjectId,
    pub competency_id: CompetencyId,
    pub level: ProficiencyLevel,
    pub proficiency_score: Decimal,
    pub acquired_on: NaiveDate,
    pub provenance: Provenance,
}

impl SubjectCompetency {
    pub fn new(
        subject_id: SubjectId,
        competency_id: CompetencyId,
        level: ProficiencyLevel,
        acquired_on: NaiveDate,
        provenance: Provenance,
    ) -> Self {
        Self {
            subject_id,
            competency_id,
            level,
            proficiency_score: level.factor(),
            acquired_on,
            provenance,
        }
    }

    /// The stored score is redundant with the level and must agree with it.
    pub fn validate(&self) -> Result<(), ProficiencyMismatch> {
        if self.proficiency_score == self.level.factor() {
            Ok(())
        } else {
            Err(ProficiencyMismatch {
                subject_id: self.subject_id,
                competency_id: self.competency_id,
                level: self.level,
                stored_score: self.proficiency_score,
            })
        }
    }
}

/// Raised when a stored proficiency score disagrees with its level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "subject {subject_id} competency {competency_id}: stored score {stored_score} does not match level {level}"
)]
pub struct ProficiencyMismatch {
    pub subject_id: SubjectId,
    pub competency_id: CompetencyId,
    pub level: ProficiencyLevel,
    pub stored_score: Decimal,
}

/// Target role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// Weighted competency requirement attached to a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRequirement {
    pub role_id: RoleId,
    pub competency_id: CompetencyId,
    pub competency_name: String,
    pub required_level: ProficiencyLevel,
    pub importance_weight: Decimal,
    #[serde(default)]
    pub is_core: bool,
}

impl RoleRequirement {
    pub fn has_valid_weight(&self) -> bool {
        self.importance_weight >= Decimal::ZERO && self.importance_weight <= Decimal::ONE
    }
}

/// Categorical readiness outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReadinessLevel {
    Ready,
    Developing,
    #[serde(rename = "Entry-Level")]
    EntryLevel,
}

impl ReadinessLevel {
    pub const ALL: [ReadinessLevel; 3] = [
        ReadinessLevel::Ready,
        ReadinessLevel::Developing,
        ReadinessLevel::EntryLevel,
    ];

    /// Inclusive lower bounds: 80 for Ready, 50 for Developing.
    pub fn from_score(score: Decimal) -> Self {
        if score >= dec!(80) {
            ReadinessLevel::Ready
        } else if score >= dec!(50) {
            ReadinessLevel::Developing
        } else {
            ReadinessLevel::EntryLevel
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            ReadinessLevel::Ready => "Ready",
            ReadinessLevel::Developing => "Developing",
            ReadinessLevel::EntryLevel => "Entry-Level",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.label() == raw)
    }
}

impl fmt::Display for ReadinessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Persisted readiness outcome, one per (subject, role).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessRecord {
    pub subject_id: SubjectId,
    pub role_id: RoleId,
    pub score: Decimal,
    pub level: ReadinessLevel,
    pub matched_count: u32,
    pub required_count: u32,
    pub gap_count: u32,
    pub computed_at: DateTime<Utc>,
}

impl ReadinessRecord {
    pub fn key(&self) -> (SubjectId, RoleId) {
        (self.subject_id, self.role_id)
    }
}
