//! Shared domain types for the acquisition, anonymization and training-data
//! governance cores.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Type of financial statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementType {
    BalanceSheet,
    IncomeStatement,
    CashFlow,
    Notes,
    CompletePackage,
}

impl StatementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::BalanceSheet => "balance_sheet",
            StatementType::IncomeStatement => "income_statement",
            StatementType::CashFlow => "cash_flow",
            StatementType::Notes => "notes",
            StatementType::CompletePackage => "complete_package",
        }
    }
}

impl FromStr for StatementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balance_sheet" => Ok(StatementType::BalanceSheet),
            "income_statement" => Ok(StatementType::IncomeStatement),
            "cash_flow" => Ok(StatementType::CashFlow),
            "notes" => Ok(StatementType::Notes),
            "complete_package" => Ok(StatementType::CompletePackage),
            other => Err(format!("unknown statement type: {other}")),
        }
    }
}

/// Where a statement came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    ClientUpload,
    ManualEntry,
    ApiImport,
    BulkImport,
    PublicFilings,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::ClientUpload => "client_upload",
            DataSource::ManualEntry => "manual_entry",
            DataSource::ApiImport => "api_import",
            DataSource::BulkImport => "bulk_import",
            DataSource::PublicFilings => "public_filings",
        }
    }
}

impl FromStr for DataSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client_upload" => Ok(DataSource::ClientUpload),
            "manual_entry" => Ok(DataSource::ManualEntry),
            "api_import" => Ok(DataSource::ApiImport),
            "bulk_import" => Ok(DataSource::BulkImport),
            "public_filings" => Ok(DataSource::PublicFilings),
            other => Err(format!("unknown data source: {other}")),
        }
    }
}

/// An SEC-style filing reference. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filing {
    /// Accession number; globally unique.
    pub filing_id: String,
    /// CIK of the issuer, zero-padded to 10 digits.
    pub issuer_id: String,
    pub company_name: String,
    pub form_type: String,
    pub filed_at: DateTime<Utc>,
    pub period_end: Option<NaiveDate>,
    pub primary_doc_uri: String,
    pub xbrl_uri: Option<String>,
    pub size_bytes: Option<u64>,
}

/// A single fact extracted from an XBRL instance document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFact {
    pub filing_id: String,
    /// Namespace-qualified concept name, e.g. `us-gaap:Assets`.
    pub concept: String,
    pub context_ref: Option<String>,
    pub unit_ref: Option<String>,
    pub decimals: Option<String>,
    pub value: FactValue,
    pub period_end: Option<NaiveDate>,
}

/// Parsed fact value. Values that fail numeric parsing are retained as
/// strings with their original unit annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Numeric(Decimal),
    Text(String),
}

impl FactValue {
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FactValue::Numeric(d) => Some(*d),
            FactValue::Text(_) => None,
        }
    }
}

/// A normalized financial statement with canonical field names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub statement_id: String,
    pub filing_id: Option<String>,
    pub statement_type: StatementType,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub currency: String,
    /// Canonical field name -> amount. Missing fields are absent, not zero.
    pub fields: BTreeMap<String, Decimal>,
}

impl Statement {
    pub fn new(statement_type: StatementType) -> Self {
        Self {
            statement_id: uuid::Uuid::new_v4().to_string(),
            filing_id: None,
            statement_type,
            period_start: None,
            period_end: None,
            currency: "USD".to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_filing(mut self, filing_id: impl Into<String>) -> Self {
        self.filing_id = Some(filing_id.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<Decimal> {
        self.fields.get(name).copied()
    }

    /// Flatten into the JSON shape the ingestion boundary accepts.
    pub fn to_ingest_value(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert(
            "statement_type".into(),
            serde_json::Value::String(self.statement_type.as_str().to_string()),
        );
        if let Some(end) = self.period_end {
            map.insert(
                "reporting_period".into(),
                serde_json::Value::String(end.format("%Y-%m-%d").to_string()),
            );
        }
        map.insert(
            "currency".into(),
            serde_json::Value::String(self.currency.clone()),
        );
        for (name, amount) in &self.fields {
            map.insert(name.clone(), decimal_to_json(*amount));
        }
        serde_json::Value::Object(map)
    }
}

/// Parse a JSON scalar into a fixed-precision decimal. Numbers go through
/// their shortest-roundtrip string form so no binary-float drift sneaks in.
pub fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Render a decimal as a JSON number.
pub fn decimal_to_json(d: Decimal) -> serde_json::Value {
    serde_json::Value::Number(
        serde_json::Number::from_str(&d.normalize().to_string())
            .unwrap_or_else(|_| serde_json::Number::from(0)),
    )
}

/// Structural validation outcome for an incoming statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub validated_at: DateTime<Utc>,
}

impl ValidationReport {
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        Self {
            is_valid: issues.is_empty(),
            issues,
            validated_at: Utc::now(),
        }
    }

    pub fn has_issue(&self, kind: &str) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: String,
    pub detail: String,
}

impl ValidationIssue {
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.into(),
        }
    }
}

/// Kinds of personally identifiable information the detector recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    CompanyName,
    PersonName,
    Email,
    Phone,
    Address,
    TaxId,
    AccountNumber,
    Url,
    IpAddress,
}

impl PiiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PiiKind::CompanyName => "company_name",
            PiiKind::PersonName => "person_name",
            PiiKind::Email => "email",
            PiiKind::Phone => "phone",
            PiiKind::Address => "address",
            PiiKind::TaxId => "tax_id",
            PiiKind::AccountNumber => "account_number",
            PiiKind::Url => "url",
            PiiKind::IpAddress => "ip_address",
        }
    }

    /// Upper-cased label used inside token text, e.g. `COMPANY_NAME`.
    pub fn token_label(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }
}

/// How much identifying information is stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnonymizationLevel {
    /// No anonymization (internal use only).
    None,
    /// Direct-identifier regexes only.
    Partial,
    /// All detectors, reversible tokens.
    Full,
    /// All detectors, random tokens; cannot be de-anonymized.
    Irreversible,
}

impl AnonymizationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnonymizationLevel::None => "none",
            AnonymizationLevel::Partial => "partial",
            AnonymizationLevel::Full => "full",
            AnonymizationLevel::Irreversible => "irreversible",
        }
    }
}

/// Residual-PII scan outcome produced by the anonymization validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymizationCheck {
    pub is_valid: bool,
    pub issues: Vec<PiiIssue>,
    pub validated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiIssue {
    pub kind: String,
    pub count: usize,
    /// First few offending spans, for the reviewer.
    pub examples: Vec<String>,
}

/// Data quality tiers for training candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityRating {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityRating::Excellent => "excellent",
            QualityRating::Good => "good",
            QualityRating::Fair => "fair",
            QualityRating::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub overall: QualityRating,
    /// Populated-field count over total-field count, in [0, 1].
    pub completeness: Decimal,
    pub consistency_issues: Vec<String>,
    pub assessed_at: DateTime<Utc>,
}

/// Lifecycle states of a training record. Transitions are owned exclusively
/// by the lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    PendingReview,
    Anonymizing,
    Anonymized,
    Validated,
    ApprovedForTraining,
    InTraining,
    Retired,
    Rejected,
}

impl TrainingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStatus::PendingReview => "pending_review",
            TrainingStatus::Anonymizing => "anonymizing",
            TrainingStatus::Anonymized => "anonymized",
            TrainingStatus::Validated => "validated",
            TrainingStatus::ApprovedForTraining => "approved_for_training",
            TrainingStatus::InTraining => "in_training",
            TrainingStatus::Retired => "retired",
            TrainingStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TrainingStatus::Retired | TrainingStatus::Rejected)
    }
}

impl FromStr for TrainingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_review" => Ok(TrainingStatus::PendingReview),
            "anonymizing" => Ok(TrainingStatus::Anonymizing),
            "anonymized" => Ok(TrainingStatus::Anonymized),
            "validated" => Ok(TrainingStatus::Validated),
            "approved_for_training" => Ok(TrainingStatus::ApprovedForTraining),
            "in_training" => Ok(TrainingStatus::InTraining),
            "retired" => Ok(TrainingStatus::Retired),
            "rejected" => Ok(TrainingStatus::Rejected),
            other => Err(format!("unknown training status: {other}")),
        }
    }
}

/// Reference to a model trained on a dataset containing this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTrainingRef {
    pub model_id: String,
    pub model_name: String,
    pub trained_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// A statement admitted to the training pipeline, plus everything the
/// governance layer knows about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub id: String,
    pub statement_type: StatementType,
    pub source: DataSource,
    pub status: TrainingStatus,
    pub anonymized_statement: serde_json::Value,
    pub validation: ValidationReport,
    pub anonymization_validation: Option<AnonymizationCheck>,
    pub quality: Option<QualityAssessment>,
    pub metadata: serde_json::Value,
    pub tenant_id: Option<String>,
    pub uploaded_by: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub used_in_models: Vec<ModelTrainingRef>,
}

/// A composed training dataset. Membership is immutable after creation;
/// revoking a record's approval later does not rewrite history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    pub purpose: String,
    pub record_ids: Vec<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub models_trained: Vec<ModelTrainingRef>,
}

/// Lineage from a trained model back to every source statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageReport {
    pub model_id: String,
    pub datasets: Vec<LineageDataset>,
    pub records: Vec<LineageRecord>,
    pub sources_breakdown: BTreeMap<String, u32>,
    pub quality_breakdown: BTreeMap<String, u32>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageDataset {
    pub dataset_id: String,
    pub dataset_name: String,
    pub record_count: usize,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageRecord {
    pub record_id: String,
    pub statement_type: StatementType,
    pub source: DataSource,
    pub quality: Option<QualityRating>,
    pub uploaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn statement_type_round_trips() {
        for ty in [
            StatementType::BalanceSheet,
            StatementType::IncomeStatement,
            StatementType::CashFlow,
            StatementType::Notes,
            StatementType::CompletePackage,
        ] {
            assert_eq!(ty.as_str().parse::<StatementType>().unwrap(), ty);
        }
    }

    #[test]
    fn decimal_json_bridge_is_exact() {
        let v = serde_json::json!(1234567.89);
        assert_eq!(decimal_from_json(&v).unwrap(), dec!(1234567.89));

        let back = decimal_to_json(dec!(1000000));
        assert_eq!(back, serde_json::json!(1000000));
    }

    #[test]
    fn ingest_value_carries_reporting_period() {
        let mut stmt = Statement::new(StatementType::BalanceSheet);
        stmt.period_end = NaiveDate::from_ymd_opt(2025, 12, 31);
        stmt.fields.insert("total_assets".into(), dec!(100));

        let v = stmt.to_ingest_value();
        assert_eq!(v["reporting_period"], "2025-12-31");
        assert_eq!(v["statement_type"], "balance_sheet");
        assert_eq!(v["total_assets"], serde_json::json!(100));
    }
}
