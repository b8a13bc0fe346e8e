use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Ordinal proficiency label attached to held and required competencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProficiencyLevel {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl ProficiencyLevel {
    pub const ALL: [ProficiencyLevel; 4] = [
        ProficiencyLevel::Beginner,
        ProficiencyLevel::Intermediate,
        ProficiencyLevel::Advanced,
        ProficiencyLevel::Expert,
    ];

    /// Numeric factor in (0, 1] used by the weighted matcher.
    pub fn factor(self) -> Decimal {
        match self {
            ProficiencyLevel::Beginner => dec!(0.25),
            ProficiencyLevel::Intermediate => dec!(0.50),
            ProficiencyLevel::Advanced => dec!(0.75),
            ProficiencyLevel::Expert => dec!(1.00),
        }
    }

    pub fn from_factor(factor: Decimal) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|level| level.factor() == factor)
    }

    pub const fn label(self) -> &'static str {
        match self {
            ProficiencyLevel::Beginner => "Beginner",
            ProficiencyLevel::Intermediate => "Intermediate",
            ProficiencyLevel::Advanced => "Advanced",
            ProficiencyLevel::Expert => "Expert",
        }
    }
}

impl fmt::Display for ProficiencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown proficiency level '{0}'")]
pub struct UnknownProficiency(pub String);

impl FromStr for ProficiencyLevel {
    type Err = UnknownProficiency;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(Self::Beginner),
            "intermediate" => Ok(Self::Intermediate),
            "advanced" => Ok(Self::Advanced),
            "expert" => Ok(Self::Expert),
            _ => Err(UnknownProficiency(raw.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factors_follow_label_order() {
        let factors: Vec<Decimal> = ProficiencyLevel::ALL.iter().map(|l| l.factor()).collect();
        assert_eq!(factors, vec![dec!(0.25), dec!(0.5), dec!(0.75), dec!(1)]);
        assert!(ProficiencyLevel::Beginner < ProficiencyLevel::Expert);
    }

    #[test]
    fn from_factor_ignores_trailing_zero_scale() {
        assert_eq!(
            ProficiencyLevel::from_factor(dec!(0.5)),
            Some(ProficiencyLevel::Intermediate)
        );
        assert_eq!(ProficiencyLevel::from_factor(dec!(0.6)), None);
    }

    #[test]
    fn parses_labels_case_insensitively() {
        assert_eq!(
            " advanced ".parse::<ProficiencyLevel>(),
            Ok(ProficiencyLevel::Advanced)
        );
        assert!("guru".parse::<ProficiencyLevel>().is_err());
    }
}
