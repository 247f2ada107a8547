//! XBRL fact extraction.
//!
//! Two wire shapes land here: the SEC companyfacts JSON API and inline
//! XBRL embedded in filing XHTML. Both reduce to the same `RawFact` rows.
//! Values that fail numeric parsing are kept verbatim as strings.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html};
use serde_json::Value;
use tracing::debug;

use crate::models::{decimal_from_json, FactValue, RawFact};

/// Parse result plus diagnostics. `skipped` counts elements in namespaces
/// the pipeline does not map.
#[derive(Debug, Clone)]
pub struct XbrlParse {
    pub facts: Vec<RawFact>,
    pub skipped: usize,
}

/// Strip currency symbols and separators; parenthesized values are
/// negative by accounting convention.
pub fn parse_numeric(raw: &str) -> FactValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return FactValue::Text(String::new());
    }

    let (negative, inner) = if trimmed.starts_with('(') && trimmed.ends_with(')') {
        (true, &trimmed[1..trimmed.len() - 1])
    } else {
        (false, trimmed)
    };

    let cleaned: String = inner
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | ' '))
        .collect();

    match Decimal::from_str(&cleaned) {
        Ok(value) => FactValue::Numeric(if negative { -value } else { value }),
        Err(_) => FactValue::Text(trimmed.to_string()),
    }
}

/// Parse the companyfacts JSON shape:
/// `facts.us-gaap.{concept}.units.{unit}[{end,val,fy,fp,form,accn,start?}]`.
pub fn parse_companyfacts_json(body: &str, fallback_filing_id: &str) -> XbrlParse {
    let mut facts = Vec::new();
    let mut skipped = 0usize;

    let Ok(root) = serde_json::from_str::<Value>(body) else {
        return XbrlParse { facts, skipped };
    };

    let Some(namespaces) = root.get("facts").and_then(Value::as_object) else {
        return XbrlParse { facts, skipped };
    };

    for (namespace, concepts) in namespaces {
        if namespace != "us-gaap" {
            skipped += concepts.as_object().map_or(1, |c| c.len());
            continue;
        }
        let Some(concepts) = concepts.as_object() else {
            continue;
        };

        for (concept, detail) in concepts {
            let Some(units) = detail.get("units").and_then(Value::as_object) else {
                continue;
            };
            for (unit, entries) in units {
                let Some(entries) = entries.as_array() else {
                    continue;
                };
                for entry in entries {
                    let value = match entry.get("val") {
                        Some(Value::String(s)) => parse_numeric(s),
                        Some(v) => match decimal_from_json(v) {
                            Some(d) => FactValue::Numeric(d),
                            None => continue,
                        },
                        None => continue,
                    };
                    let accession = entry
                        .get("accn")
                        .and_then(Value::as_str)
                        .unwrap_or(fallback_filing_id)
                        .to_string();
                    let period_end = entry
                        .get("end")
                        .and_then(Value::as_str)
                        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());

                    facts.push(RawFact {
                        filing_id: accession.clone(),
                        concept: format!("us-gaap:{concept}"),
                        context_ref: Some(accession),
                        unit_ref: Some(unit.clone()),
                        decimals: None,
                        value,
                        period_end,
                    });
                }
            }
        }
    }

    debug!(facts = facts.len(), skipped, "parsed companyfacts json");
    XbrlParse { facts, skipped }
}

/// Parse inline XBRL: every element whose namespace prefix is `us-gaap`
/// becomes a fact; other prefixed namespaces are counted and ignored.
pub fn parse_inline_xbrl(document: &str, filing_id: &str) -> XbrlParse {
    let html = Html::parse_document(document);
    let mut facts = Vec::new();
    let mut skipped = 0usize;

    for node in html.root_element().descendants() {
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };
        let name = element.value().name();
        let Some((prefix, local)) = name.split_once(':') else {
            continue;
        };
        if prefix != "us-gaap" {
            skipped += 1;
            continue;
        }

        let text = element.text().collect::<String>();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let attr = |name: &str| element.value().attr(name).map(str::to_string);

        facts.push(RawFact {
            filing_id: filing_id.to_string(),
            concept: format!("us-gaap:{local}"),
            context_ref: attr("contextref"),
            unit_ref: attr("unitref"),
            decimals: attr("decimals"),
            value: parse_numeric(text),
            period_end: None,
        });
    }

    debug!(facts = facts.len(), skipped, "parsed inline xbrl");
    XbrlParse { facts, skipped }
}
