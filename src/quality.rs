//! Data-quality scoring for anonymized statements.
//!
//! Pure function of the statement payload: completeness is the populated
//! share of fields, consistency applies known accounting identities. All
//! arithmetic runs on fixed-precision decimals.

use rayon::prelude::*;
use rust_decimal::Decimal;
use serde_json::Value;

use chrono::Utc;

use crate::models::{decimal_from_json, QualityAssessment, QualityRating};

/// Relative tolerance for accounting identities: 1% of revenue.
fn tolerance(base: Decimal) -> Decimal {
    base.abs() * Decimal::new(1, 2)
}

/// Assess a single statement payload.
pub fn assess_quality(statement: &Value) -> QualityAssessment {
    let (total, populated) = match statement {
        Value::Object(map) => {
            let considered: Vec<&Value> = map
                .iter()
                .filter(|(k, _)| k.as_str() != "_anonymization")
                .map(|(_, v)| v)
                .collect();
            let populated = considered.iter().filter(|v| !v.is_null()).count();
            (considered.len(), populated)
        }
        _ => (0, 0),
    };

    let completeness = if total > 0 {
        (Decimal::from(populated as u64) / Decimal::from(total as u64)).round_dp(2)
    } else {
        Decimal::ZERO
    };

    let consistency_issues = check_consistency(statement);

    let overall = if completeness >= Decimal::new(9, 1) && consistency_issues.is_empty() {
        QualityRating::Excellent
    } else if completeness >= Decimal::new(75, 2) && consistency_issues.len() <= 1 {
        QualityRating::Good
    } else if completeness >= Decimal::new(5, 1) {
        QualityRating::Fair
    } else {
        QualityRating::Poor
    };

    QualityAssessment {
        overall,
        completeness,
        consistency_issues,
        assessed_at: Utc::now(),
    }
}

/// Apply known cross-field identities; each violation is recorded.
fn check_consistency(statement: &Value) -> Vec<String> {
    let mut issues = Vec::new();

    let field = |name: &str| statement.get(name).and_then(decimal_from_json);

    if let (Some(revenue), Some(cogs), Some(gross_profit)) = (
        field("revenue"),
        field("cost_of_goods_sold"),
        field("gross_profit"),
    ) {
        if (gross_profit - (revenue - cogs)).abs() > tolerance(revenue) {
            issues.push("gross_profit_mismatch".to_string());
        }
    }

    if let (Some(revenue), Some(gross_profit), Some(opex), Some(operating_income)) = (
        field("revenue"),
        field("gross_profit"),
        field("operating_expenses"),
        field("operating_income"),
    ) {
        if (operating_income - (gross_profit - opex)).abs() > tolerance(revenue) {
            issues.push("operating_income_mismatch".to_string());
        }
    }

    issues
}

/// Score a batch of statements. CPU-bound and embarrassingly parallel, so
/// it fans out across the rayon pool.
pub fn assess_quality_batch(statements: &[Value]) -> Vec<QualityAssessment> {
    statements.par_iter().map(assess_quality).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn complete_consistent_statement_is_excellent() {
        let statement = json!({
            "revenue": 1000,
            "cost_of_goods_sold": 600,
            "gross_profit": 400,
            "net_income": 100,
            "reporting_period": "2025-12-31",
        });
        let q = assess_quality(&statement);
        assert_eq!(q.overall, QualityRating::Excellent);
        assert_eq!(q.completeness, dec!(1.00));
        assert!(q.consistency_issues.is_empty());
    }

    #[test]
    fn gross_profit_identity_violation_is_recorded() {
        let statement = json!({
            "revenue": 1000,
            "cost_of_goods_sold": 600,
            "gross_profit": 500,
        });
        let q = assess_quality(&statement);
        assert_eq!(q.consistency_issues, vec!["gross_profit_mismatch"]);
    }

    #[test]
    fn identity_within_one_percent_of_revenue_passes() {
        // Off by 9 against revenue 1000: inside the 1% band.
        let statement = json!({
            "revenue": 1000,
            "cost_of_goods_sold": 600,
            "gross_profit": 409,
        });
        let q = assess_quality(&statement);
        assert!(q.consistency_issues.is_empty());
    }

    #[test]
    fn sparse_statement_rates_poor() {
        let statement = json!({
            "revenue": 1000,
            "cost_of_goods_sold": null,
            "gross_profit": null,
            "operating_expenses": null,
            "net_income": null,
        });
        let q = assess_quality(&statement);
        assert_eq!(q.completeness, dec!(0.20));
        assert_eq!(q.overall, QualityRating::Poor);
    }

    #[test]
    fn half_populated_statement_rates_fair() {
        let statement = json!({
            "revenue": 1000,
            "net_income": 50,
            "gross_profit": null,
            "operating_expenses": null,
        });
        let q = assess_quality(&statement);
        assert_eq!(q.completeness, dec!(0.50));
        assert_eq!(q.overall, QualityRating::Fair);
    }

    #[test]
    fn anonymization_metadata_is_not_counted() {
        let statement = json!({
            "revenue": 1000,
            "_anonymization": {"level": "full", "pii_count": 2},
        });
        let q = assess_quality(&statement);
        assert_eq!(q.completeness, dec!(1.00));
    }

    #[test]
    fn batch_scoring_matches_single_scoring() {
        let statements = vec![
            json!({"revenue": 1000, "net_income": 50}),
            json!({"revenue": 2000, "net_income": null}),
        ];
        let batch = assess_quality_batch(&statements);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].overall, assess_quality(&statements[0]).overall);
        assert_eq!(batch[1].completeness, dec!(0.50));
    }
}
