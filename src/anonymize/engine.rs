//! PII detection and substitution over JSON-shaped statements.
//!
//! The walk is explicit and recursive over `serde_json::Value`: every
//! string value is scanned, identified fields are replaced atomically,
//! financial fields pass through untouched so ratios and relationships
//! survive training.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::tokens::{deterministic_token, random_token, TokenVault};
use crate::errors::PipelineError;
use crate::models::{AnonymizationLevel, PiiKind};

/// Direct-identifier patterns, applied in this order. Matches are replaced
/// in place before the company-name scan runs.
pub(crate) static PII_PATTERNS: Lazy<Vec<(PiiKind, Regex)>> = Lazy::new(|| {
    vec![
        (
            PiiKind::Email,
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email regex"),
        ),
        (
            PiiKind::Phone,
            Regex::new(r"\b(?:\+?1[-.]?)?\(?[0-9]{3}\)?[-.]?[0-9]{3}[-.]?[0-9]{4}\b")
                .expect("phone regex"),
        ),
        (
            PiiKind::TaxId,
            // EIN (NN-NNNNNNN) or SSN (NNN-NN-NNNN)
            Regex::new(r"\b(?:\d{2}-\d{7}|\d{3}-\d{2}-\d{4})\b").expect("tax id regex"),
        ),
        (
            PiiKind::Url,
            Regex::new(
                r"https?://(?:www\.)?[-a-zA-Z0-9@:%._+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}\b(?:[-a-zA-Z0-9()@:%_+.~#?&/=]*)",
            )
            .expect("url regex"),
        ),
        (
            PiiKind::IpAddress,
            Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("ip regex"),
        ),
    ]
});

/// Business entity suffixes that mark the tail of a company-name span.
pub(crate) static BUSINESS_SUFFIXES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "inc", "incorporated", "corp", "corporation", "llc", "ltd", "limited", "co", "company",
        "lp", "llp", "pa", "pc", "plc", "group", "holdings",
    ]
    .into_iter()
    .collect()
});

/// Fields whose values are identifying by definition; their string values
/// are replaced atomically with a token of the implied kind.
static IDENTIFYING_FIELDS: Lazy<HashMap<&'static str, PiiKind>> = Lazy::new(|| {
    use PiiKind::*;
    [
        ("company_name", CompanyName),
        ("client_name", CompanyName),
        ("entity_name", CompanyName),
        ("business_name", CompanyName),
        ("legal_name", CompanyName),
        ("dba_name", CompanyName),
        ("contact_name", PersonName),
        ("officer_name", PersonName),
        ("director_name", PersonName),
        ("ceo_name", PersonName),
        ("cfo_name", PersonName),
        ("president_name", PersonName),
        ("partner_name", PersonName),
        ("member_name", PersonName),
        ("contact_email", Email),
        ("email", Email),
        ("contact_phone", Phone),
        ("phone", Phone),
        ("fax", Phone),
        ("address", Address),
        ("street_address", Address),
        ("city", Address),
        ("state", Address),
        ("zip_code", Address),
        ("postal_code", Address),
        ("country", Address),
        ("website", Url),
        ("url", Url),
        ("tax_id", TaxId),
        ("ein", TaxId),
        ("ssn", TaxId),
        ("account_number", AccountNumber),
        ("routing_number", AccountNumber),
        ("bank_account", AccountNumber),
    ]
    .into_iter()
    .collect()
});

/// Financial fields are never anonymized; they are the training signal.
static FINANCIAL_FIELDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "total_assets",
        "current_assets",
        "total_liabilities",
        "current_liabilities",
        "total_equity",
        "revenue",
        "expenses",
        "net_income",
        "gross_profit",
        "operating_income",
        "operating_expenses",
        "ebitda",
        "cash",
        "accounts_receivable",
        "inventory",
        "accounts_payable",
        "debt",
        "retained_earnings",
        "common_stock",
        "cost_of_goods_sold",
        "interest_expense",
        "tax_expense",
        "depreciation",
        "amortization",
        "capital_expenditures",
        "free_cash_flow",
        "working_capital",
        "current_ratio",
        "debt_to_equity",
        "return_on_assets",
        "return_on_equity",
        "profit_margin",
        "asset_turnover",
        "operating_cash_flow",
        "investing_cash_flow",
        "financing_cash_flow",
        "financial_year",
        "reporting_period",
        "fiscal_year_end",
    ]
    .into_iter()
    .collect()
});

/// Token pattern, for de-anonymization and round-trip checks.
static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[A-Z_]+_[0-9a-f]{8}\]").expect("token regex"));

/// Metadata block attached to anonymized payloads under `_anonymization`.
#[derive(Debug, Clone, Serialize)]
pub struct AnonymizationMeta {
    pub level: AnonymizationLevel,
    pub anonymized_at: DateTime<Utc>,
    pub pii_kinds_removed: Vec<String>,
    pub pii_count: usize,
}

pub struct Anonymizer {
    secret: String,
    vault: Option<Arc<TokenVault>>,
}

impl Anonymizer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            vault: None,
        }
    }

    /// Attach the reverse-map vault. Without one, reversible levels still
    /// produce deterministic tokens but de-anonymization is unavailable.
    pub fn with_vault(mut self, vault: Arc<TokenVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    /// Anonymize a JSON-shaped statement at the given level. Returns the
    /// rewritten value plus the metadata block that was attached to it.
    pub fn anonymize(
        &self,
        value: &Value,
        level: AnonymizationLevel,
    ) -> Result<(Value, AnonymizationMeta), PipelineError> {
        let mut detections: Vec<PiiKind> = Vec::new();

        let mut out = if level == AnonymizationLevel::None {
            value.clone()
        } else {
            self.walk(value, level, &mut detections)?
        };

        let mut kinds: Vec<String> = detections.iter().map(|k| k.as_str().to_string()).collect();
        kinds.sort();
        kinds.dedup();

        let meta = AnonymizationMeta {
            level,
            anonymized_at: Utc::now(),
            pii_kinds_removed: kinds,
            pii_count: detections.len(),
        };

        if level != AnonymizationLevel::None {
            if let Value::Object(map) = &mut out {
                map.insert(
                    "_anonymization".to_string(),
                    serde_json::to_value(&meta).unwrap_or(Value::Null),
                );
            }
            debug!(
                level = level.as_str(),
                pii_count = meta.pii_count,
                "anonymized statement"
            );
        }

        Ok((out, meta))
    }

    /// Restore plaintext for every vault-backed token and strip the
    /// metadata block. Authorized callers only; reads are audited by the
    /// vault itself.
    pub fn de_anonymize(&self, value: &Value, actor_id: &str) -> Result<Value, PipelineError> {
        let vault = self.vault.as_ref().ok_or_else(|| {
            PipelineError::Anonymization("no reverse-map vault configured".into())
        })?;
        self.restore(value, vault, actor_id)
    }

    fn restore(
        &self,
        value: &Value,
        vault: &TokenVault,
        actor_id: &str,
    ) -> Result<Value, PipelineError> {
        Ok(match value {
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (key, val) in map {
                    if key == "_anonymization" {
                        continue;
                    }
                    out.insert(key.clone(), self.restore(val, vault, actor_id)?);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.restore(item, vault, actor_id))
                    .collect::<Result<_, _>>()?,
            ),
            Value::String(s) => {
                let mut restored = s.clone();
                let tokens: Vec<String> = TOKEN_RE
                    .find_iter(s)
                    .map(|m| m.as_str().to_string())
                    .collect();
                for token in tokens {
                    if let Some(plaintext) = vault.reveal(&token, actor_id)? {
                        restored = restored.replace(&token, &plaintext);
                    }
                }
                Value::String(restored)
            }
            other => other.clone(),
        })
    }

    fn walk(
        &self,
        value: &Value,
        level: AnonymizationLevel,
        detections: &mut Vec<PiiKind>,
    ) -> Result<Value, PipelineError> {
        Ok(match value {
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (key, val) in map {
                    let rewritten = if FINANCIAL_FIELDS.contains(key.as_str()) {
                        val.clone()
                    } else if let (Some(&kind), true) = (
                        IDENTIFYING_FIELDS.get(key.as_str()),
                        level != AnonymizationLevel::Partial,
                    ) {
                        match val {
                            Value::String(s) => {
                                Value::String(self.anonymize_identifying(s, kind, level, detections)?)
                            }
                            nested @ (Value::Object(_) | Value::Array(_)) => {
                                self.walk(nested, level, detections)?
                            }
                            other => other.clone(),
                        }
                    } else {
                        match val {
                            Value::String(s) => {
                                Value::String(self.anonymize_text(s, level, detections)?)
                            }
                            nested @ (Value::Object(_) | Value::Array(_)) => {
                                self.walk(nested, level, detections)?
                            }
                            other => other.clone(),
                        }
                    };
                    out.insert(key.clone(), rewritten);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.walk(item, level, detections))
                    .collect::<Result<_, _>>()?,
            ),
            Value::String(s) => Value::String(self.anonymize_text(s, level, detections)?),
            other => other.clone(),
        })
    }

    /// Identified field: run the text detectors first so the token kind
    /// matches what the value actually is; if nothing fires, replace the
    /// whole value atomically with the kind implied by the field name.
    fn anonymize_identifying(
        &self,
        text: &str,
        field_kind: PiiKind,
        level: AnonymizationLevel,
        detections: &mut Vec<PiiKind>,
    ) -> Result<String, PipelineError> {
        let mut local: Vec<PiiKind> = Vec::new();
        let rewritten = self.anonymize_text(text, level, &mut local)?;

        if local.is_empty() {
            if text.trim().is_empty() {
                return Ok(rewritten);
            }
            let token = self.token_for(field_kind, text, level)?;
            detections.push(field_kind);
            return Ok(token);
        }

        detections.extend(local);
        Ok(rewritten)
    }

    fn anonymize_text(
        &self,
        text: &str,
        level: AnonymizationLevel,
        detections: &mut Vec<PiiKind>,
    ) -> Result<String, PipelineError> {
        if text.is_empty() {
            return Ok(String::new());
        }

        let mut out = text.to_string();

        for (kind, pattern) in PII_PATTERNS.iter() {
            let matches: Vec<String> = pattern
                .find_iter(&out)
                .map(|m| m.as_str().to_string())
                .collect();
            for matched in matches {
                let token = self.token_for(*kind, &matched, level)?;
                out = out.replace(&matched, &token);
                detections.push(*kind);
            }
        }

        // PARTIAL strips direct identifiers only; the company-name scan is
        // part of the full detector set.
        if level != AnonymizationLevel::Partial {
            if let Some(span) = detect_company_span(&out) {
                let token = self.token_for(PiiKind::CompanyName, &span, level)?;
                out = out.replace(&span, &token);
                detections.push(PiiKind::CompanyName);
            }
        }

        Ok(out)
    }

    fn token_for(
        &self,
        kind: PiiKind,
        plaintext: &str,
        level: AnonymizationLevel,
    ) -> Result<String, PipelineError> {
        if level == AnonymizationLevel::Irreversible {
            return Ok(random_token(kind));
        }

        let token = deterministic_token(&self.secret, plaintext, kind);
        if let Some(vault) = &self.vault {
            vault.store(&token, kind, plaintext)?;
        }
        Ok(token)
    }
}

/// Find a company-name span: a business suffix plus up to three words
/// before it.
pub(crate) fn detect_company_span(text: &str) -> Option<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    for (i, word) in words.iter().enumerate() {
        let lowered = word.to_lowercase();
        let stripped = lowered.trim_end_matches(['.', ',', ';', ':']);
        if BUSINESS_SUFFIXES.contains(stripped) {
            let start = i.saturating_sub(3);
            return Some(words[start..=i].join(" "));
        }
    }
    None
}
