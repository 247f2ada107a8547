//! Statement normalization.
//!
//! Maps heterogeneous parsed facts onto a fixed canonical vocabulary per
//! statement type. Source precedence is XBRL > HTML table > derived;
//! fields nobody reported stay absent rather than defaulting to zero.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use crate::models::{
    decimal_from_json, RawFact, Statement, StatementType, ValidationIssue, ValidationReport,
};

/// XBRL concept -> canonical field. Concepts are matched on their local
/// name, namespace prefix stripped.
static XBRL_CONCEPT_MAP: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("Assets", "total_assets"),
        ("AssetsCurrent", "current_assets"),
        ("Liabilities", "total_liabilities"),
        ("LiabilitiesCurrent", "current_liabilities"),
        ("StockholdersEquity", "total_equity"),
        (
            "StockholdersEquityIncludingPortionAttributableToNoncontrollingInterest",
            "total_equity",
        ),
        ("CashAndCashEquivalentsAtCarryingValue", "cash"),
        ("AccountsReceivableNetCurrent", "accounts_receivable"),
        ("InventoryNet", "inventory"),
        ("AccountsPayableCurrent", "accounts_payable"),
        ("RetainedEarningsAccumulatedDeficit", "retained_earnings"),
        ("Revenues", "revenue"),
        (
            "RevenueFromContractWithCustomerExcludingAssessedTax",
            "revenue",
        ),
        ("CostOfRevenue", "cost_of_goods_sold"),
        ("CostOfGoodsAndServicesSold", "cost_of_goods_sold"),
        ("GrossProfit", "gross_profit"),
        ("OperatingExpenses", "operating_expenses"),
        ("OperatingIncomeLoss", "operating_income"),
        ("NetIncomeLoss", "net_income"),
        ("InterestExpense", "interest_expense"),
        ("IncomeTaxExpenseBenefit", "tax_expense"),
        (
            "NetCashProvidedByUsedInOperatingActivities",
            "operating_cash_flow",
        ),
        (
            "NetCashProvidedByUsedInInvestingActivities",
            "investing_cash_flow",
        ),
        (
            "NetCashProvidedByUsedInFinancingActivities",
            "financing_cash_flow",
        ),
        (
            "PaymentsToAcquirePropertyPlantAndEquipment",
            "capital_expenditures",
        ),
    ]
});

/// HTML row-label synonyms, matched by case-insensitive contains.
static LABEL_SYNONYMS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("total assets", "total_assets"),
        ("total current assets", "current_assets"),
        ("total liabilities", "total_liabilities"),
        ("total current liabilities", "current_liabilities"),
        ("stockholders equity", "total_equity"),
        ("stockholders' equity", "total_equity"),
        ("shareholders equity", "total_equity"),
        ("shareholders' equity", "total_equity"),
        ("total equity", "total_equity"),
        ("net revenue", "revenue"),
        ("total revenue", "revenue"),
        ("net sales", "revenue"),
        ("revenue", "revenue"),
        ("cost of revenue", "cost_of_goods_sold"),
        ("cost of goods sold", "cost_of_goods_sold"),
        ("cost of sales", "cost_of_goods_sold"),
        ("gross profit", "gross_profit"),
        ("gross margin", "gross_profit"),
        ("operating expenses", "operating_expenses"),
        ("operating income", "operating_income"),
        ("income from operations", "operating_income"),
        ("net income", "net_income"),
        ("net earnings", "net_income"),
        ("net loss", "net_income"),
        ("cash from operating activities", "operating_cash_flow"),
        ("net cash provided by operating activities", "operating_cash_flow"),
        ("cash from investing activities", "investing_cash_flow"),
        ("net cash used in investing activities", "investing_cash_flow"),
        ("cash from financing activities", "financing_cash_flow"),
        ("net cash used in financing activities", "financing_cash_flow"),
    ]
});

/// Canonical vocabulary per statement type.
pub fn canonical_fields(statement_type: StatementType) -> &'static [&'static str] {
    match statement_type {
        StatementType::BalanceSheet => &[
            "total_assets",
            "current_assets",
            "total_liabilities",
            "current_liabilities",
            "total_equity",
            "cash",
            "accounts_receivable",
            "inventory",
            "accounts_payable",
            "retained_earnings",
        ],
        StatementType::IncomeStatement => &[
            "revenue",
            "cost_of_goods_sold",
            "gross_profit",
            "operating_expenses",
            "operating_income",
            "net_income",
            "interest_expense",
            "tax_expense",
            "expenses",
        ],
        StatementType::CashFlow => &[
            "operating_cash_flow",
            "investing_cash_flow",
            "financing_cash_flow",
            "capital_expenditures",
            "free_cash_flow",
        ],
        StatementType::Notes | StatementType::CompletePackage => &[],
    }
}

/// Map an XBRL concept local name to its canonical field, if known.
pub fn canonical_for_concept(concept: &str) -> Option<&'static str> {
    let local = concept.rsplit(':').next().unwrap_or(concept);
    // Inline documents arrive through an HTML parse that lowercases tag
    // names, so concept matching is case-insensitive.
    XBRL_CONCEPT_MAP
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(local))
        .map(|(_, canonical)| *canonical)
}

/// Map an HTML row label to its canonical field. Longest synonym wins so
/// "total current assets" does not land on "total assets".
pub fn canonical_for_label(label: &str) -> Option<&'static str> {
    let lowered = label.to_lowercase();
    LABEL_SYNONYMS
        .iter()
        .filter(|(syn, _)| lowered.contains(syn))
        .max_by_key(|(syn, _)| syn.len())
        .map(|(_, canonical)| *canonical)
}

/// Normalize XBRL facts plus optional HTML table rows into a canonical
/// statement.
pub fn normalize(
    facts: &[RawFact],
    table_rows: &[(String, Decimal)],
    statement_type: StatementType,
    period_end: Option<NaiveDate>,
) -> Statement {
    let mut statement = Statement::new(statement_type);
    statement.period_end = period_end;

    let mut fields: BTreeMap<String, Decimal> = BTreeMap::new();

    // HTML table values first; XBRL overwrites them (XBRL > HTML).
    for (label, amount) in table_rows {
        if let Some(canonical) = canonical_for_label(label) {
            fields.entry(canonical.to_string()).or_insert(*amount);
        }
    }

    let mut xbrl_seen: BTreeMap<String, bool> = BTreeMap::new();
    for fact in facts {
        let Some(canonical) = canonical_for_concept(&fact.concept) else {
            continue;
        };
        let Some(amount) = fact.value.as_decimal() else {
            continue;
        };

        let matches_period = period_end.is_some() && fact.period_end == period_end;
        let already_matched = xbrl_seen.get(canonical).copied().unwrap_or(false);

        // Multiple periods per concept: the entry matching the filing's
        // declared period wins; otherwise first one in.
        if matches_period || (!already_matched && !xbrl_seen.contains_key(canonical)) {
            fields.insert(canonical.to_string(), amount);
            xbrl_seen.insert(canonical.to_string(), matches_period);
        }
    }

    // Derived values fill remaining gaps (lowest precedence).
    derive_missing(&mut fields, statement_type);

    debug!(
        statement_type = statement_type.as_str(),
        fields = fields.len(),
        "normalized statement"
    );

    statement.fields = fields;
    statement
}

fn derive_missing(fields: &mut BTreeMap<String, Decimal>, statement_type: StatementType) {
    match statement_type {
        StatementType::IncomeStatement => {
            if !fields.contains_key("gross_profit") {
                if let (Some(revenue), Some(cogs)) = (
                    fields.get("revenue").copied(),
                    fields.get("cost_of_goods_sold").copied(),
                ) {
                    fields.insert("gross_profit".into(), revenue - cogs);
                }
            }
            if !fields.contains_key("expenses") {
                if let (Some(cogs), Some(opex)) = (
                    fields.get("cost_of_goods_sold").copied(),
                    fields.get("operating_expenses").copied(),
                ) {
                    fields.insert("expenses".into(), cogs + opex);
                }
            }
        }
        StatementType::CashFlow => {
            if !fields.contains_key("free_cash_flow") {
                if let (Some(ocf), Some(capex)) = (
                    fields.get("operating_cash_flow").copied(),
                    fields.get("capital_expenditures").copied(),
                ) {
                    fields.insert("free_cash_flow".into(), ocf - capex);
                }
            }
        }
        StatementType::BalanceSheet => {
            if !fields.contains_key("total_equity") {
                if let (Some(assets), Some(liabilities)) = (
                    fields.get("total_assets").copied(),
                    fields.get("total_liabilities").copied(),
                ) {
                    fields.insert("total_equity".into(), assets - liabilities);
                }
            }
        }
        _ => {}
    }
}

fn required_fields(statement_type: StatementType) -> &'static [&'static str] {
    match statement_type {
        StatementType::BalanceSheet => &[
            "total_assets",
            "total_liabilities",
            "total_equity",
            "reporting_period",
        ],
        StatementType::IncomeStatement => {
            &["revenue", "expenses", "net_income", "reporting_period"]
        }
        StatementType::CashFlow => &[
            "operating_cash_flow",
            "investing_cash_flow",
            "financing_cash_flow",
            "reporting_period",
        ],
        _ => &["reporting_period"],
    }
}

/// Structural validation of an incoming statement payload. Violations of
/// the balance-sheet identity are flagged, not rejected.
pub fn validate_statement(statement: &Value, statement_type: StatementType) -> ValidationReport {
    let mut issues = Vec::new();

    let missing: Vec<&str> = required_fields(statement_type)
        .iter()
        .filter(|field| {
            statement
                .get(**field)
                .map_or(true, |v| v.is_null())
        })
        .copied()
        .collect();
    if !missing.is_empty() {
        issues.push(ValidationIssue::new(
            "missing_fields",
            missing.join(", "),
        ));
    }

    // Suspicious negatives: balances that should not dip below zero.
    for field in [
        "total_assets",
        "total_liabilities",
        "total_equity",
        "revenue",
    ] {
        if let Some(value) = statement.get(field).and_then(decimal_from_json) {
            if value < Decimal::ZERO {
                issues.push(ValidationIssue::new(
                    "negative_value",
                    format!("{field} = {value}"),
                ));
            }
        }
    }

    if statement_type == StatementType::BalanceSheet {
        if let (Some(assets), Some(liabilities), Some(equity)) = (
            statement.get("total_assets").and_then(decimal_from_json),
            statement.get("total_liabilities").and_then(decimal_from_json),
            statement.get("total_equity").and_then(decimal_from_json),
        ) {
            // 1% of assets covers rounding in source documents.
            let tolerance = assets.abs() * Decimal::new(1, 2);
            if (assets - (liabilities + equity)).abs() > tolerance {
                issues.push(ValidationIssue::new(
                    "balance_sheet_equation_mismatch",
                    format!(
                        "assets {assets} vs liabilities + equity {}",
                        liabilities + equity
                    ),
                ));
            }
        }
    }

    ValidationReport::from_issues(issues)
}
