//! Monetary Unit Sampling (probability proportional to size).
//!
//! Sample size: n = ceil(RF * BV / TM), floored at 30. Selection is
//! systematic over cumulative monetary units with a seeded random start.
//! Evaluation projects the tainting sum over the population and adds a
//! 30% sampling-risk allowance.

use std::collections::HashSet;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::RiskLevel;
use crate::errors::PipelineError;

/// Minimum sample size by professional judgment.
const MIN_SAMPLE_SIZE: u32 = 30;

/// Expansion applied to the reliability factor when misstatement is
/// expected, and to projected misstatement as the precision allowance.
fn expansion_factor() -> Decimal {
    Decimal::new(13, 1) // 1.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusPlan {
    pub sample_size: u32,
    pub sampling_interval: Decimal,
    pub reliability_factor: Decimal,
    pub population_value: Decimal,
    pub tolerable_misstatement: Decimal,
    pub expected_misstatement: Decimal,
    pub risk_level: RiskLevel,
}

/// Required sample size and interval for the given population and risk.
pub fn calculate_sample_size(
    population_value: Decimal,
    tolerable_misstatement: Decimal,
    expected_misstatement: Decimal,
    risk_level: RiskLevel,
) -> Result<MusPlan, PipelineError> {
    if population_value <= Decimal::ZERO {
        return Err(PipelineError::Validation(
            "population value must be positive".into(),
        ));
    }
    if tolerable_misstatement <= Decimal::ZERO {
        return Err(PipelineError::Validation(
            "tolerable misstatement must be positive".into(),
        ));
    }

    let mut rf = risk_level.reliability_factor();
    if expected_misstatement > Decimal::ZERO {
        rf *= expansion_factor();
    }

    let exact = (rf * population_value) / tolerable_misstatement;
    let sample_size = exact
        .ceil()
        .to_u32()
        .unwrap_or(u32::MAX)
        .max(MIN_SAMPLE_SIZE);

    let sampling_interval = (population_value / Decimal::from(sample_size)).round_dp(2);

    Ok(MusPlan {
        sample_size,
        sampling_interval,
        reliability_factor: rf,
        population_value,
        tolerable_misstatement,
        expected_misstatement,
        risk_level,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationItem {
    pub id: String,
    pub amount: Decimal,
}

/// Systematic PPS selection with a seeded random start in [0, interval).
/// Items are ordered by id, cumulative amounts computed, and the first
/// item covering each selection point is taken. No duplicates.
pub fn select_sample(
    population: &[PopulationItem],
    sample_size: u32,
    sampling_interval: Decimal,
    seed: u64,
) -> Vec<PopulationItem> {
    if population.is_empty() || sampling_interval <= Decimal::ZERO {
        return Vec::new();
    }

    let mut sorted: Vec<&PopulationItem> = population.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut cumulative = Vec::with_capacity(sorted.len());
    let mut running = Decimal::ZERO;
    for item in &sorted {
        running += item.amount;
        cumulative.push(running);
    }
    let total = running;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let interval_f = sampling_interval.to_f64().unwrap_or(0.0);
    let random_start = Decimal::from_f64(rng.gen_range(0.0..interval_f)).unwrap_or(Decimal::ZERO);

    let mut selected = Vec::new();
    let mut selected_ids: HashSet<&str> = HashSet::new();
    let mut point = random_start;

    for _ in 0..sample_size {
        if point > total {
            break;
        }
        if let Some(idx) = cumulative.iter().position(|cum| *cum >= point) {
            let item = sorted[idx];
            if selected_ids.insert(item.id.as_str()) {
                selected.push(item.clone());
            }
        }
        point += sampling_interval;
    }

    selected
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleResultItem {
    pub id: String,
    pub book_value: Decimal,
    pub audit_value: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tainting {
    pub id: String,
    pub misstatement: Decimal,
    pub tainting: Decimal,
    pub book_value: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MusConclusion {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusEvaluation {
    pub projected_misstatement: Decimal,
    pub upper_misstatement_limit: Decimal,
    pub tolerable_misstatement: Decimal,
    pub misstatements_found: usize,
    pub total_known_misstatement: Decimal,
    pub taintings: Vec<Tainting>,
    pub conclusion: MusConclusion,
    pub rationale: String,
}

/// Project sample findings to the population. With no misstatements the
/// basic projection RF*BV/n applies; otherwise the tainting sum scales the
/// population value. UML adds the precision allowance; accept iff
/// UML < tolerable misstatement.
pub fn evaluate_sample(
    results: &[SampleResultItem],
    population_value: Decimal,
    tolerable_misstatement: Decimal,
    risk_level: RiskLevel,
) -> Result<MusEvaluation, PipelineError> {
    if results.is_empty() {
        return Err(PipelineError::Validation(
            "cannot evaluate an empty sample".into(),
        ));
    }

    let rf = risk_level.reliability_factor();

    let mut taintings = Vec::new();
    let mut total_known = Decimal::ZERO;

    for item in results {
        let misstatement = item.book_value - item.audit_value;
        if misstatement != Decimal::ZERO && item.book_value != Decimal::ZERO {
            let tainting = misstatement / item.book_value;
            taintings.push(Tainting {
                id: item.id.clone(),
                misstatement,
                tainting,
                book_value: item.book_value,
            });
            total_known += misstatement;
        }
    }

    let projected = if taintings.is_empty() {
        (rf * population_value) / Decimal::from(results.len() as u64)
    } else {
        let tainting_sum: Decimal = taintings.iter().map(|t| t.tainting).sum();
        tainting_sum * population_value
    };

    let uml = projected * expansion_factor();
    let conclusion = if uml < tolerable_misstatement {
        MusConclusion::Accept
    } else {
        MusConclusion::Reject
    };

    let rationale = format!(
        "UML ({}) is {} tolerable misstatement ({})",
        uml.round_dp(2),
        if conclusion == MusConclusion::Accept {
            "less than"
        } else {
            "not less than"
        },
        tolerable_misstatement,
    );

    Ok(MusEvaluation {
        projected_misstatement: projected.round_dp(2),
        upper_misstatement_limit: uml.round_dp(2),
        tolerable_misstatement,
        misstatements_found: taintings.len(),
        total_known_misstatement: total_known.round_dp(2),
        taintings,
        conclusion,
        rationale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sample_size_matches_worked_example() {
        // BV = 1,000,000, TM = 50,000, EM = 0, moderate risk:
        // n = ceil(2.31 * 1,000,000 / 50,000) = 47, I ~= 21,276.60.
        let plan = calculate_sample_size(
            dec!(1000000),
            dec!(50000),
            dec!(0),
            RiskLevel::Moderate,
        )
        .unwrap();
        assert_eq!(plan.sample_size, 47);
        assert_eq!(plan.reliability_factor, dec!(2.31));
        assert_eq!(plan.sampling_interval, dec!(21276.60));
    }

    #[test]
    fn sample_size_is_floored_at_thirty() {
        let plan =
            calculate_sample_size(dec!(10000), dec!(50000), dec!(0), RiskLevel::High).unwrap();
        assert_eq!(plan.sample_size, 30);
    }

    #[test]
    fn expected_misstatement_inflates_reliability_factor() {
        let plan = calculate_sample_size(
            dec!(1000000),
            dec!(50000),
            dec!(5000),
            RiskLevel::Moderate,
        )
        .unwrap();
        assert_eq!(plan.reliability_factor, dec!(3.003));
        assert_eq!(plan.sample_size, 61); // ceil(3.003 * 20)
    }

    #[test]
    fn non_positive_inputs_are_rejected() {
        assert!(calculate_sample_size(dec!(0), dec!(1), dec!(0), RiskLevel::Low).is_err());
        assert!(calculate_sample_size(dec!(1), dec!(0), dec!(0), RiskLevel::Low).is_err());
    }

    fn population(n: usize, amount: Decimal) -> Vec<PopulationItem> {
        (0..n)
            .map(|i| PopulationItem {
                id: format!("item-{i:04}"),
                amount,
            })
            .collect()
    }

    #[test]
    fn selection_is_deterministic_for_a_seed() {
        let pop = population(200, dec!(500));
        let a = select_sample(&pop, 20, dec!(5000), 42);
        let b = select_sample(&pop, 20, dec!(5000), 42);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn different_seeds_can_differ() {
        let pop = population(200, dec!(500));
        let a = select_sample(&pop, 20, dec!(5000), 1);
        let b = select_sample(&pop, 20, dec!(5000), 2);
        // Same size either way; the starting offset shifts the picks.
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn selection_never_duplicates_items() {
        // Interval far smaller than the large item forces repeated hits.
        let mut pop = population(5, dec!(10));
        pop.push(PopulationItem {
            id: "item-9999".into(),
            amount: dec!(100000),
        });
        let selected = select_sample(&pop, 30, dec!(1000), 7);
        let mut ids: Vec<&str> = selected.iter().map(|i| i.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), selected.len());
    }

    #[test]
    fn larger_items_are_more_likely_selected() {
        let mut pop = population(50, dec!(100));
        pop.push(PopulationItem {
            id: "zz-whale".into(),
            amount: dec!(500000),
        });
        let total = dec!(100) * dec!(50) + dec!(500000);
        let interval = total / dec!(20);
        let selected = select_sample(&pop, 20, interval, 11);
        assert!(selected.iter().any(|i| i.id == "zz-whale"));
    }

    #[test]
    fn clean_sample_accepts_when_basic_projection_under_tm() {
        // All audited values equal book values; UML = 1.3 * RF*BV/n.
        let results: Vec<SampleResultItem> = (0..47)
            .map(|i| SampleResultItem {
                id: format!("item-{i}"),
                book_value: dec!(1000),
                audit_value: dec!(1000),
            })
            .collect();

        let eval = evaluate_sample(
            &results,
            dec!(1000000),
            dec!(100000),
            RiskLevel::Moderate,
        )
        .unwrap();
        assert_eq!(eval.misstatements_found, 0);
        // Basic projection: 2.31 * 1,000,000 / 47 = 49,148.94
        assert_eq!(eval.projected_misstatement, dec!(49148.94));
        assert_eq!(eval.conclusion, MusConclusion::Accept);
    }

    #[test]
    fn tainted_sample_projects_and_rejects() {
        let mut results: Vec<SampleResultItem> = (0..46)
            .map(|i| SampleResultItem {
                id: format!("item-{i}"),
                book_value: dec!(1000),
                audit_value: dec!(1000),
            })
            .collect();
        // 50% tainting on one item.
        results.push(SampleResultItem {
            id: "item-bad".into(),
            book_value: dec!(1000),
            audit_value: dec!(500),
        });

        let eval =
            evaluate_sample(&results, dec!(1000000), dec!(50000), RiskLevel::Moderate).unwrap();
        assert_eq!(eval.misstatements_found, 1);
        // Projection = 0.5 * 1,000,000 = 500,000; UML = 650,000.
        assert_eq!(eval.projected_misstatement, dec!(500000.00));
        assert_eq!(eval.upper_misstatement_limit, dec!(650000.00));
        assert_eq!(eval.conclusion, MusConclusion::Reject);
    }

    #[test]
    fn empty_sample_is_a_validation_error() {
        let err =
            evaluate_sample(&[], dec!(1000), dec!(100), RiskLevel::Low).unwrap_err();
        assert_eq!(err.reason_code(), "VALIDATION_FAILED");
    }
}
