//! Classical variables sampling (mean-per-unit estimation).
//!
//! Normal-theory estimation: totals stay in decimals; the z * sigma
//! precision math runs in floating point and converts back at the edge.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use super::RiskLevel;
use crate::errors::PipelineError;

const MIN_SAMPLE_SIZE: u32 = 30;

/// n = ceil((N * sigma * z / TM)^2 / (1 + (N * sigma * z / TM)^2 / N)),
/// finite-population corrected, floored at 30.
pub fn mean_per_unit_sample_size(
    population_size: u32,
    population_std_dev: Decimal,
    tolerable_misstatement: Decimal,
    risk_level: RiskLevel,
) -> Result<u32, PipelineError> {
    if population_size == 0 {
        return Err(PipelineError::Validation(
            "population size must be positive".into(),
        ));
    }
    if tolerable_misstatement <= Decimal::ZERO {
        return Err(PipelineError::Validation(
            "tolerable misstatement must be positive".into(),
        ));
    }

    let z = risk_level.z_decimal();
    let numerator = Decimal::from(population_size) * population_std_dev * z;
    let ratio = numerator / tolerable_misstatement;
    let exact = ratio * ratio;

    let corrected = exact / (Decimal::ONE + exact / Decimal::from(population_size));
    let sample_size = corrected
        .ceil()
        .to_u32()
        .unwrap_or(u32::MAX)
        .max(MIN_SAMPLE_SIZE);

    Ok(sample_size.min(population_size))
}

/// Simple random selection without replacement: every unit equally
/// likely. Returns sorted item indices; deterministic for a given seed.
pub fn select_sample(population_size: u32, sample_size: u32, seed: u64) -> Vec<u32> {
    if population_size == 0 || sample_size == 0 {
        return Vec::new();
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let take = sample_size.min(population_size) as usize;
    let mut picked =
        rand::seq::index::sample(&mut rng, population_size as usize, take).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| i as u32).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpuEvaluation {
    pub projected_value: Decimal,
    pub precision: Decimal,
    pub ci_lower: Decimal,
    pub ci_upper: Decimal,
    pub sample_mean: Decimal,
    pub sample_std_dev: Decimal,
    pub sample_size: usize,
}

/// Project the sample mean to the population and compute the allowance for
/// sampling risk: precision = z * s * (N / sqrt(n)) * sqrt((N - n) / N).
pub fn evaluate_mean_per_unit(
    sample_values: &[Decimal],
    population_size: u32,
    risk_level: RiskLevel,
) -> Result<MpuEvaluation, PipelineError> {
    if sample_values.len() < 2 {
        return Err(PipelineError::Validation(
            "mean-per-unit evaluation needs at least two observations".into(),
        ));
    }
    if (population_size as usize) < sample_values.len() {
        return Err(PipelineError::Validation(
            "sample cannot exceed the population".into(),
        ));
    }

    let n = Decimal::from(sample_values.len() as u64);
    let total: Decimal = sample_values.iter().copied().sum();
    let sample_mean = total / n;

    let values_f64: Vec<f64> = sample_values
        .iter()
        .map(|v| v.to_f64().unwrap_or(0.0))
        .collect();
    let sample_std_dev = values_f64.iter().std_dev();

    let projected_value = sample_mean * Decimal::from(population_size);

    let n_f = values_f64.len() as f64;
    let big_n = f64::from(population_size);
    let fpc = ((big_n - n_f) / big_n).max(0.0).sqrt();
    let precision_f = risk_level.z_score() * sample_std_dev * (big_n / n_f.sqrt()) * fpc;
    let precision = Decimal::from_f64(precision_f)
        .unwrap_or_default()
        .round_dp(2);

    Ok(MpuEvaluation {
        projected_value: projected_value.round_dp(2),
        precision,
        ci_lower: (projected_value - precision).round_dp(2),
        ci_upper: (projected_value + precision).round_dp(2),
        sample_mean: sample_mean.round_dp(2),
        sample_std_dev: Decimal::from_f64(sample_std_dev)
            .unwrap_or_default()
            .round_dp(2),
        sample_size: sample_values.len(),
    })
}
