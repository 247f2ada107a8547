//! Attribute sampling for control testing.
//!
//! Sample sizes come from the AU-C 530-style lookup table where a row
//! exists, otherwise from the normal approximation to the binomial,
//! finite-population corrected and clamped to [25, N].

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::RiskLevel;
use crate::errors::PipelineError;

const MIN_SAMPLE_SIZE: u32 = 25;

/// (expected rate %, tolerable rate %, risk) -> sample size. Rates are in
/// whole percent, rounded from the caller's decimals.
const SAMPLE_SIZE_TABLE: &[(u32, u32, RiskLevel, u32)] = &[
    (0, 5, RiskLevel::Low, 93),
    (0, 5, RiskLevel::Moderate, 77),
    (0, 10, RiskLevel::Low, 46),
    (0, 10, RiskLevel::Moderate, 38),
    (1, 5, RiskLevel::Low, 156),
    (1, 5, RiskLevel::Moderate, 129),
    (2, 6, RiskLevel::Low, 127),
    (2, 6, RiskLevel::Moderate, 105),
];

fn to_whole_percent(rate: Decimal) -> u32 {
    (rate * Decimal::from(100u32))
        .round()
        .to_u32()
        .unwrap_or(u32::MAX)
}

/// Required sample size for the given deviation-rate parameters.
pub fn calculate_sample_size(
    population_size: u32,
    tolerable_deviation_rate: Decimal,
    expected_deviation_rate: Decimal,
    risk_level: RiskLevel,
) -> Result<u32, PipelineError> {
    if population_size == 0 {
        return Err(PipelineError::Validation(
            "population size must be positive".into(),
        ));
    }
    if tolerable_deviation_rate <= expected_deviation_rate {
        return Err(PipelineError::Validation(
            "tolerable deviation rate must exceed the expected rate".into(),
        ));
    }

    let edr_pct = to_whole_percent(expected_deviation_rate);
    // Rates above 10% use the 10% row, as the tables do.
    let tdr_pct = to_whole_percent(tolerable_deviation_rate).min(10);

    let mut sample_size = SAMPLE_SIZE_TABLE
        .iter()
        .find(|(er, tr, risk, _)| *er == edr_pct && *tr == tdr_pct && *risk == risk_level)
        .map(|(_, _, _, n)| *n);

    if sample_size.is_none() {
        // Normal approximation to the binomial at p = tolerable rate.
        let z = risk_level.z_score();
        let p = tolerable_deviation_rate.to_f64().unwrap_or(0.0);
        let spread = (tolerable_deviation_rate - expected_deviation_rate)
            .to_f64()
            .unwrap_or(f64::MIN_POSITIVE);
        let approx = (z * z * p * (1.0 - p)) / (spread * spread);
        sample_size = Some(approx.ceil() as u32);
    }

    let mut n = sample_size.unwrap_or(MIN_SAMPLE_SIZE);

    // Finite-population correction for small populations.
    if population_size < 10_000 {
        let n_f = f64::from(n);
        let corrected = n_f / (1.0 + n_f / f64::from(population_size));
        n = corrected.ceil() as u32;
    }

    Ok(n.clamp(MIN_SAMPLE_SIZE, population_size))
}

/// Control-instance selection: attribute samples are drawn with equal
/// probability, same scheme as classical selection.
pub fn select_sample(population_size: u32, sample_size: u32, seed: u64) -> Vec<u32> {
    super::classical::select_sample(population_size, sample_size, seed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeConclusion {
    Rely,
    DoNotRely,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeEvaluation {
    pub sample_size: u32,
    pub deviations_found: u32,
    pub sample_deviation_rate: Decimal,
    pub upper_deviation_limit: Decimal,
    pub tolerable_deviation_rate: Decimal,
    pub conclusion: AttributeConclusion,
    pub rationale: String,
}

/// Evaluate an attribute sample: UDL = SDR + z * sqrt(SDR(1-SDR)/n),
/// capped at 1.0; rely on the control iff UDL < tolerable rate.
pub fn evaluate_sample(
    sample_size: u32,
    deviations_found: u32,
    tolerable_deviation_rate: Decimal,
    risk_level: RiskLevel,
) -> Result<AttributeEvaluation, PipelineError> {
    if sample_size == 0 {
        return Err(PipelineError::Validation(
            "sample size must be positive".into(),
        ));
    }
    if deviations_found > sample_size {
        return Err(PipelineError::Validation(
            "deviations cannot exceed the sample size".into(),
        ));
    }

    let sdr = Decimal::from(deviations_found) / Decimal::from(sample_size);

    let p = sdr.to_f64().unwrap_or(0.0);
    let n = f64::from(sample_size);
    let standard_error = (p * (1.0 - p) / n).sqrt();
    let udl_f = p + risk_level.z_score() * standard_error;

    let upper_deviation_limit = Decimal::from_f64(udl_f)
        .unwrap_or_default()
        .min(Decimal::ONE)
        .round_dp(4);

    let conclusion = if upper_deviation_limit < tolerable_deviation_rate {
        AttributeConclusion::Rely
    } else {
        AttributeConclusion::DoNotRely
    };

    let rationale = format!(
        "Upper deviation limit ({upper_deviation_limit}) is {} tolerable rate ({tolerable_deviation_rate}); controls {} be relied upon",
        if conclusion == AttributeConclusion::Rely {
            "less than"
        } else {
            "not less than"
        },
        if conclusion == AttributeConclusion::Rely {
            "can"
        } else {
            "cannot"
        },
    );

    Ok(AttributeEvaluation {
        sample_size,
        deviations_found,
        sample_deviation_rate: sdr.round_dp(4),
        upper_deviation_limit,
        tolerable_deviation_rate,
        conclusion,
        rationale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn table_rows_are_used_for_large_populations() {
        let n = calculate_sample_size(50_000, dec!(0.05), dec!(0.00), RiskLevel::Low).unwrap();
        assert_eq!(n, 93);

        let n = calculate_sample_size(50_000, dec!(0.10), dec!(0.00), RiskLevel::Moderate)
            .unwrap();
        assert_eq!(n, 38);
    }

    #[test]
    fn fallback_formula_covers_missing_rows() {
        // No (0, 8, HIGH) row: z = 1.28, p = 0.08, spread = 0.08.
        // n = ceil(1.6384 * 0.0736 / 0.0064) = ceil(18.84) = 19 -> floor 25.
        let n = calculate_sample_size(50_000, dec!(0.08), dec!(0.00), RiskLevel::High).unwrap();
        assert_eq!(n, 25);
    }

    #[test]
    fn small_populations_get_finite_population_correction() {
        // Table value 93, N = 200: 93 / (1 + 93/200) = 63.48 -> 64.
        let n = calculate_sample_size(200, dec!(0.05), dec!(0.00), RiskLevel::Low).unwrap();
        assert_eq!(n, 64);
    }

    #[test]
    fn sample_size_is_clamped_to_population() {
        let n = calculate_sample_size(30, dec!(0.05), dec!(0.00), RiskLevel::Low).unwrap();
        assert!(n <= 30);
        assert!(n >= 25);
    }

    #[test]
    fn tolerable_rate_must_exceed_expected() {
        assert!(
            calculate_sample_size(1000, dec!(0.05), dec!(0.05), RiskLevel::Low).is_err()
        );
    }

    #[test]
    fn evaluation_matches_worked_example() {
        // n = 93, 2 deviations, TR = 5%, low risk:
        // SDR = 0.0215, UDL ~= 0.0510 > 0.05 -> DO_NOT_RELY.
        let eval = evaluate_sample(93, 2, dec!(0.05), RiskLevel::Low).unwrap();
        assert_eq!(eval.sample_deviation_rate, dec!(0.0215));
        assert!((eval.upper_deviation_limit - dec!(0.0510)).abs() <= dec!(0.0002));
        assert_eq!(eval.conclusion, AttributeConclusion::DoNotRely);
    }

    #[test]
    fn zero_deviations_support_reliance() {
        let eval = evaluate_sample(93, 0, dec!(0.05), RiskLevel::Low).unwrap();
        assert_eq!(eval.sample_deviation_rate, dec!(0.0000));
        assert_eq!(eval.upper_deviation_limit, dec!(0.0000));
        assert_eq!(eval.conclusion, AttributeConclusion::Rely);
    }

    #[test]
    fn udl_is_capped_at_one() {
        let eval = evaluate_sample(4, 4, dec!(0.05), RiskLevel::Low).unwrap();
        assert!(eval.upper_deviation_limit <= Decimal::ONE);
        assert_eq!(eval.conclusion, AttributeConclusion::DoNotRely);
    }

    #[test]
    fn deviations_cannot_exceed_sample() {
        assert!(evaluate_sample(10, 11, dec!(0.05), RiskLevel::Low).is_err());
    }
}
