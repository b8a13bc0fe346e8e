use std::collections::HashMap;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::{CompetencyId, ReadinessLevel, RoleRequirement, SubjectCompetency};
use super::error::ConsistencyError;

/// Urgency attached to a required competency the subject does not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapPriority {
    High,
    Medium,
    Low,
}

impl GapPriority {
    pub fn from_weight(weight: Decimal) -> Self {
        if weight >= dec!(0.8) {
            GapPriority::High
        } else if weight >= dec!(0.5) {
            GapPriority::Medium
        } else {
            GapPriority::Low
        }
    }
}

/// Required competency absent from the subject's portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingCompetency {
    pub competency_id: CompetencyId,
    pub name: String,
    pub importance_weight: Decimal,
    pub priority: GapPriority,
}

/// Auditable output of the weighted matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleScore {
    pub score: Decimal,
    pub level: ReadinessLevel,
    pub matched_count: u32,
    pub required_count: u32,
    pub gap_count: u32,
    pub missing: Vec<MissingCompetency>,
}

impl RuleScore {
    fn empty() -> Self {
        Self {
            score: Decimal::ZERO,
            level: ReadinessLevel::EntryLevel,
            matched_count: 0,
            required_count: 0,
            gap_count: 0,
            missing: Vec::new(),
        }
    }
}

/// Stateless weighted matcher between a portfolio and a role's requirements.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedScorer;

impl RuleBasedScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(
        &self,
        held: &[SubjectCompetency],
        requirements: &[RoleRequirement],
    ) -> Result<RuleScore, ConsistencyError> {
        for record in held {
            record.validate()?;
        }

        if requirements.is_empty() {
            debug!("role has no requirements; scoring as entry level");
            return Ok(RuleScore::empty());
        }

        let portfolio: HashMap<CompetencyId, Decimal> = held
            .iter()
            .map(|record| (record.competency_id, record.proficiency_score))
            .collect();

        let mut total_weight = Decimal::ZERO;
        let mut matched_weight = Decimal::ZERO;
        let mut matched_count = 0u32;
        let mut missing = Vec::new();

        for requirement in requirements {
            let weight = requirement.importance_weight;
            total_weight += weight;

            match portfolio.get(&requirement.competency_id) {
                Some(held_factor) => {
                    matched_weight += proficiency_factor(*held_factor, requirement) * weight;
                    matched_count += 1;
                }
                None => missing.push(MissingCompetency {
                    competency_id: requirement.competency_id,
                    name: requirement.competency_name.clone(),
                    importance_weight: weight,
                    priority: GapPriority::from_weight(weight),
                }),
            }
        }

        let exact = if total_weight > Decimal::ZERO {
            matched_weight / total_weight * dec!(100)
        } else {
            Decimal::ZERO
        };

        // stable sort keeps catalog order among equal weights
        missing.sort_by(|a, b| b.importance_weight.cmp(&a.importance_weight));

        let required_count = requirements.len() as u32;
        // thresholds apply to the exact score; only the reported value is rounded
        Ok(RuleScore {
            score: exact.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            level: ReadinessLevel::from_score(exact),
            matched_count,
            required_count,
            gap_count: required_count - matched_count,
            missing,
        })
    }
}

/// Partial credit for an under-qualified holder, capped at full credit.
pub fn proficiency_factor(held_factor: Decimal, requirement: &RoleRequirement) -> Decimal {
    let required = requirement.required_level.factor();
    (held_factor / required).min(Decimal::ONE)
}
