//! Statistical audit sampling: Monetary Unit Sampling, classical variables
//! and attribute sampling, per PCAOB AS 2315 / AICPA AU-C 530 conventions.
//!
//! Every function is pure and deterministic given its inputs plus a
//! caller-provided RNG seed, so selections are reproducible in workpapers.

pub mod attribute;
pub mod classical;
pub mod mus;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Risk of incorrect acceptance / over-reliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// 5% risk.
    Low,
    /// 10% risk.
    Moderate,
    /// 20% risk.
    High,
}

impl RiskLevel {
    /// MUS reliability factor for zero expected errors.
    pub fn reliability_factor(&self) -> Decimal {
        match self {
            RiskLevel::Low => Decimal::new(300, 2),      // 3.00
            RiskLevel::Moderate => Decimal::new(231, 2), // 2.31
            RiskLevel::High => Decimal::new(161, 2),     // 1.61
        }
    }

    /// z-score as a decimal, for sample-size arithmetic.
    pub fn z_decimal(&self) -> Decimal {
        match self {
            RiskLevel::Low => Decimal::new(196, 2),      // 1.96
            RiskLevel::Moderate => Decimal::new(1645, 3), // 1.645
            RiskLevel::High => Decimal::new(128, 2),     // 1.28
        }
    }

    /// Two-sided z-score for the matching confidence level.
    pub fn z_score(&self) -> f64 {
        match self {
            RiskLevel::Low => 1.96,
            RiskLevel::Moderate => 1.645,
            RiskLevel::High => 1.28,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    Mus,
    MeanPerUnit,
    RatioEstimation,
    DifferenceEstimation,
    Attribute,
}

/// What a test is trying to establish; drives method selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestObjective {
    Overstatement,
    Understatement,
    Controls,
}

/// Recommend a sampling method for the circumstances: control testing is
/// attribute work; low-error overstatement testing suits MUS; everything
/// else defaults to classical mean-per-unit.
pub fn recommend_method(
    population_size: u32,
    expected_error_rate: Decimal,
    objective: TestObjective,
) -> SamplingMethod {
    if objective == TestObjective::Controls {
        return SamplingMethod::Attribute;
    }
    if expected_error_rate < Decimal::new(5, 2) && objective == TestObjective::Overstatement {
        return SamplingMethod::Mus;
    }
    if population_size < 100 {
        return SamplingMethod::MeanPerUnit;
    }
    SamplingMethod::MeanPerUnit
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn reliability_factors_match_tables() {
        assert_eq!(RiskLevel::Low.reliability_factor(), dec!(3.00));
        assert_eq!(RiskLevel::Moderate.reliability_factor(), dec!(2.31));
        assert_eq!(RiskLevel::High.reliability_factor(), dec!(1.61));
    }

    #[test]
    fn controls_testing_uses_attribute_sampling() {
        assert_eq!(
            recommend_method(5000, dec!(0.0), TestObjective::Controls),
            SamplingMethod::Attribute
        );
    }

    #[test]
    fn low_error_overstatement_uses_mus() {
        assert_eq!(
            recommend_method(5000, dec!(0.01), TestObjective::Overstatement),
            SamplingMethod::Mus
        );
    }

    #[test]
    fn high_error_rates_fall_back_to_classical() {
        assert_eq!(
            recommend_method(5000, dec!(0.10), TestObjective::Overstatement),
            SamplingMethod::MeanPerUnit
        );
        assert_eq!(
            recommend_method(5000, dec!(0.01), TestObjective::Understatement),
            SamplingMethod::MeanPerUnit
        );
    }
}
