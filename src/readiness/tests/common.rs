use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::readiness::artifacts::{
    Artifact, ArtifactStore, Estimator, MemoryArtifactStore, REGRESSOR_ARTIFACT,
};
use crate::readiness::domain::{
    Competency, CompetencyCategory, CompetencyId, Program, Provenance, Role, RoleId,
    RoleRequirement, Subject, SubjectCompetency, SubjectId,
};
use crate::readiness::features::{FeatureExtractor, PairContext};
use crate::readiness::ml::{BoostingParams, ForestParams, MaxFeatures, TreeParams};
use crate::readiness::proficiency::ProficiencyLevel;
use crate::readiness::store::MemoryStore;
use crate::readiness::training::{ClassifierKind, TrainingConfig};
use crate::readiness::ReadinessService;

pub(super) const SQL: CompetencyId = CompetencyId(1);
pub(super) const STATISTICS: CompetencyId = CompetencyId(2);
pub(super) const FIGMA: CompetencyId = CompetencyId(3);

pub(super) const DATA_ANALYST: RoleId = RoleId(1);
pub(super) const DESIGNER: RoleId = RoleId(2);
pub(super) const ARCHIVIST: RoleId = RoleId(3);

pub(super) const FULLY_QUALIFIED: SubjectId = SubjectId(1);
pub(super) const BEGINNER: SubjectId = SubjectId(2);
pub(super) const NEWCOMER: SubjectId = SubjectId(3);

pub(super) type TestService = ReadinessService<MemoryStore, MemoryArtifactStore>;

pub(super) fn acquired() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date")
}

pub(super) fn catalog() -> Vec<Competency> {
    vec![
        competency(SQL, "SQL", CompetencyCategory::Technical),
        competency(STATISTICS, "Statistics", CompetencyCategory::Business),
        competency(FIGMA, "Figma", CompetencyCategory::Design),
    ]
}

fn competency(id: CompetencyId, name: &str, category: CompetencyCategory) -> Competency {
    Competency {
        id,
        name: name.to_string(),
        category,
        subcategory: None,
    }
}

pub(super) fn subject(id: SubjectId, program: Program) -> Subject {
    Subject {
        id,
        name: format!("Subject {}", id.0),
        program,
        year_of_study: 3,
        enrollment_year: 2022,
    }
}

pub(super) fn role(id: RoleId, name: &str) -> Role {
    Role {
        id,
        name: name.to_string(),
        category: None,
    }
}

pub(super) fn requirement(
    role_id: RoleId,
    competency_id: CompetencyId,
    name: &str,
    level: ProficiencyLevel,
    weight: Decimal,
) -> RoleRequirement {
    RoleRequirement {
        role_id,
        competency_id,
        competency_name: name.to_string(),
        required_level: level,
        importance_weight: weight,
        is_core: weight >= dec!(0.8),
    }
}

pub(super) fn held(
    subject_id: SubjectId,
    competency_id: CompetencyId,
    level: ProficiencyLevel,
) -> SubjectCompetency {
    SubjectCompetency::new(
        subject_id,
        competency_id,
        level,
        acquired(),
        Provenance::Course,
    )
}

/// SQL weighted 1.0 at Advanced and Statistics weighted 0.9 at Intermediate.
pub(super) fn analyst_requirements() -> Vec<RoleRequirement> {
    vec![
        requirement(
            DATA_ANALYST,
            SQL,
            "SQL",
            ProficiencyLevel::Advanced,
            dec!(1.0),
        ),
        requirement(
            DATA_ANALYST,
            STATISTICS,
            "Statistics",
            ProficiencyLevel::Intermediate,
            dec!(0.9),
        ),
    ]
}

fn seed_roles(store: &MemoryStore) {
    for competency in catalog() {
        store.insert_competency(competency).expect("catalog entry");
    }
    store
        .insert_role(role(DATA_ANALYST, "Data Analyst"))
        .expect("analyst role");
    store
        .insert_role(role(DESIGNER, "UX/UI Designer"))
        .expect("designer role");
    store
        .insert_role(role(ARCHIVIST, "Archivist"))
        .expect("archivist role");
    for requirement in analyst_requirements() {
        store.insert_requirement(requirement).expect("requirement");
    }
    store
        .insert_requirement(requirement(
            DESIGNER,
            FIGMA,
            "Figma",
            ProficiencyLevel::Advanced,
            dec!(0.7),
        ))
        .expect("designer requirement");
}

/// Three roles and three subjects: one fully qualified analyst, one beginner, one with
/// an empty portfolio.
pub(super) fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    seed_roles(&store);

    store
        .insert_subject(subject(FULLY_QUALIFIED, Program::Btech))
        .expect("subject");
    store
        .insert_subject(subject(BEGINNER, Program::Bba))
        .expect("subject");
    store
        .insert_subject(subject(NEWCOMER, Program::BCom))
        .expect("subject");

    for record in [
        held(FULLY_QUALIFIED, SQL, ProficiencyLevel::Advanced),
        held(FULLY_QUALIFIED, STATISTICS, ProficiencyLevel::Intermediate),
        held(BEGINNER, SQL, ProficiencyLevel::Beginner),
    ] {
        store.insert_subject_competency(record).expect("held competency");
    }
    store
}

/// Forty subjects cycling through four portfolios so the analyst role sees every level.
pub(super) fn training_store() -> MemoryStore {
    let store = MemoryStore::new();
    seed_roles(&store);

    for index in 0..40i64 {
        let id = SubjectId(100 + index);
        let program = Program::ALL[(index % 3) as usize];
        store.insert_subject(subject(id, program)).expect("subject");

        let portfolio = match index % 4 {
            0 => vec![
                held(id, SQL, ProficiencyLevel::Expert),
                held(id, STATISTICS, ProficiencyLevel::Advanced),
                held(id, FIGMA, ProficiencyLevel::Expert),
            ],
            1 => vec![
                held(id, SQL, ProficiencyLevel::Advanced),
                held(id, FIGMA, ProficiencyLevel::Beginner),
            ],
            2 => vec![held(id, SQL, ProficiencyLevel::Beginner)],
            _ => Vec::new(),
        };
        for record in portfolio {
            store.insert_subject_competency(record).expect("held competency");
        }
    }
    store
}

/// Small estimators so the unit tests train in milliseconds.
pub(super) fn quick_training() -> TrainingConfig {
    let tree = TreeParams {
        max_depth: 4,
        min_samples_split: 2,
        min_samples_leaf: 1,
        max_features: MaxFeatures::All,
    };
    TrainingConfig {
        forest: ForestParams {
            n_estimators: 8,
            tree,
            max_samples: 1.0,
        },
        tree,
        balanced_classes: true,
        boosting: BoostingParams {
            n_estimators: 10,
            learning_rate: 0.3,
            tree,
            subsample: 1.0,
        },
        test_fraction: 0.2,
        seed: Some(7),
    }
}

pub(super) fn build_service(store: MemoryStore, classifier: ClassifierKind) -> TestService {
    ReadinessService::new(
        Arc::new(store),
        Arc::new(MemoryArtifactStore::new()),
        classifier,
        quick_training(),
    )
}

pub(super) fn context(
    store: &MemoryStore,
    subject_id: SubjectId,
    role_id: RoleId,
) -> PairContext {
    PairContext::load(store, subject_id, role_id).expect("pair context loads")
}

/// Rule-based recompute over [`training_store`] followed by a published training run.
pub(super) fn trained_service(classifier: ClassifierKind) -> TestService {
    let service = build_service(training_store(), classifier);
    service
        .recompute_all(false, None)
        .expect("rule-based recompute");
    service.train_models().expect("training succeeds");
    service
}

/// Round-trips a published artifact through JSON so a test can edit its raw structure.
pub(super) fn tamper_artifact(
    service: &TestService,
    name: &str,
    edit: impl FnOnce(&mut serde_json::Value),
) {
    let artifacts = service.artifacts();
    let artifact = artifacts
        .load_artifact(name)
        .expect("reads")
        .expect("published");
    let mut raw = serde_json::to_value(&artifact).expect("serializes");
    edit(&mut raw);
    let edited: Artifact = serde_json::from_value(raw).expect("still deserializes");
    artifacts.save_artifact(&edited).expect("saves");
}

/// Writes NaN into the leaf of the first regressor tree that the pair falls into, so
/// inference fails for that pair and any other pair sharing the leaf.
pub(super) fn poison_regressor_leaf(service: &TestService, subject_id: SubjectId, role_id: RoleId) {
    let repository = service.repository();
    let features = FeatureExtractor::load(&**repository)
        .expect("catalog")
        .extract_pair(&**repository, subject_id, role_id)
        .expect("features");

    let artifacts = service.artifacts();
    let mut artifact = artifacts
        .load_artifact(REGRESSOR_ARTIFACT)
        .expect("reads")
        .expect("published");
    let Estimator::RandomForest(forest) = &mut artifact.estimator else {
        panic!("regressor artifact does not hold a random forest");
    };
    let tree = &mut forest.trees_mut()[0];
    let leaf = tree.apply(features.as_slice());
    tree.set_leaf_value(leaf, vec![f64::NAN]);
    artifacts.save_artifact(&artifact).expect("saves");
}
