//! Post-anonymization validator.
//!
//! Proves the negative: serializes the anonymized payload and re-runs the
//! same detectors. Any residual match is a record-blocking issue, not a
//! warning.

use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use super::engine::{BUSINESS_SUFFIXES, PII_PATTERNS};
use crate::models::{AnonymizationCheck, PiiIssue};

/// Re-scan an anonymized payload for residual PII.
pub fn validate_anonymization(value: &Value) -> AnonymizationCheck {
    let serialized = value.to_string();
    let mut issues = Vec::new();

    for (kind, pattern) in PII_PATTERNS.iter() {
        let matches: Vec<&str> = pattern
            .find_iter(&serialized)
            .map(|m| m.as_str())
            .collect();
        if !matches.is_empty() {
            issues.push(PiiIssue {
                kind: kind.as_str().to_string(),
                count: matches.len(),
                examples: matches
                    .iter()
                    .take(3)
                    .map(|m| (*m).to_string())
                    .collect(),
            });
        }
    }

    // Business suffixes adjacent to JSON quoting still count: strip
    // wrapping quotes and trailing punctuation before the lexicon check.
    let mut suffix_hits: Vec<String> = Vec::new();
    for word in serialized.split_whitespace() {
        let lowered = word.to_lowercase();
        let stripped = lowered
            .trim_matches(['"', '\'', '{', '}', '[', ']'])
            .trim_end_matches(['.', ',', ';', ':'])
            .trim_matches(['"', '\'']);
        if BUSINESS_SUFFIXES.contains(stripped) && !suffix_hits.iter().any(|s| s == stripped) {
            suffix_hits.push(stripped.to_string());
        }
    }
    if !suffix_hits.is_empty() {
        issues.push(PiiIssue {
            kind: "potential_company_name".to_string(),
            count: suffix_hits.len(),
            examples: suffix_hits.into_iter().take(3).collect(),
        });
    }

    let check = AnonymizationCheck {
        is_valid: issues.is_empty(),
        issues,
        validated_at: Utc::now(),
    };

    if !check.is_valid {
        warn!(
            issues = check.issues.len(),
            "anonymization validation failed"
        );
    }

    check
}
