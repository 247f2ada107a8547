//! Audit-opinion and disclosure-note extraction from annual-report text.
//!
//! Regex-first heuristics: find the auditor's report section, classify the
//! opinion by phrase, and slice numbered notes with their ASC topic
//! references. Input is the flattened document text.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::Filing;

const OPINION_WINDOW: usize = 5000;
const EXCERPT_LIMIT: usize = 2000;
const NOTE_TEXT_LIMIT: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpinionType {
    Unqualified,
    Qualified,
    Adverse,
    Disclaimer,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditOpinion {
    pub filing_id: String,
    pub company_name: String,
    pub fiscal_year: i32,
    pub auditor: String,
    pub opinion_type: OpinionType,
    pub going_concern_emphasis: bool,
    pub internal_control_opinion: Option<String>,
    pub key_audit_matters: Vec<String>,
    pub opinion_date: NaiveDate,
    pub excerpt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisclosureNote {
    pub filing_id: String,
    pub note_number: u32,
    pub title: String,
    pub asc_topic: Option<String>,
    pub text: String,
}

static OPINION_SECTION: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(
        r"Report of Independent (?:Registered Public Accounting Firm|Auditors?)|Independent Auditor'?s'? Report|Opinion on the Financial Statements",
    )
    .case_insensitive(true)
    .build()
    .expect("opinion section regex")
});

static UNQUALIFIED: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"in our opinion.{0,800}?present fairly.{0,200}?in all material respects")
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .expect("unqualified regex")
});

static GOING_CONCERN: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"going concern|substantial doubt.{0,200}?continue.{0,100}?operations")
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .expect("going concern regex")
});

static OPINION_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},\s+\d{4}",
    )
    .expect("opinion date regex")
});

static NOTE_HEADER: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"Note\s+(\d+)[:\s\-]+")
        .case_insensitive(true)
        .build()
        .expect("note header regex")
});

static ASC_TOPIC: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"ASC\s+(\d+(?:-\d+)*)")
        .case_insensitive(true)
        .build()
        .expect("asc topic regex")
});

static IC_EFFECTIVE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"internal control over financial reporting.{0,400}?effective")
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .expect("internal control regex")
});

/// Known audit firms and the aliases they sign under.
static AUDITORS: &[(&str, &[&str])] = &[
    ("Deloitte", &["Deloitte & Touche", "Deloitte LLP", "Deloitte"]),
    ("PwC", &["PricewaterhouseCoopers", "PwC"]),
    ("EY", &["Ernst & Young", "EY LLP"]),
    ("KPMG", &["KPMG"]),
    ("BDO", &["BDO USA", "BDO"]),
    ("Grant Thornton", &["Grant Thornton"]),
    ("RSM", &["RSM US", "RSM"]),
    ("Crowe", &["Crowe"]),
];

/// Extract the audit opinion from an annual report's text. Opinions only
/// appear in annual forms; other filings return `None`.
pub fn extract_audit_opinion(filing: &Filing, text: &str) -> Option<AuditOpinion> {
    if filing.form_type != "10-K" && filing.form_type != "20-F" {
        return None;
    }

    let section_start = match OPINION_SECTION.find(text) {
        Some(m) => m.start(),
        None => {
            warn!(filing_id = %filing.filing_id, "no audit opinion section found");
            return None;
        }
    };
    let end = (section_start + OPINION_WINDOW).min(text.len());
    let opinion_text = slice_at_char_boundaries(text, section_start, end);

    let lowered = opinion_text.to_lowercase();
    let auditor = AUDITORS
        .iter()
        .find(|(_, aliases)| {
            aliases
                .iter()
                .any(|alias| lowered.contains(&alias.to_lowercase()))
        })
        .map_or("Unknown", |(name, _)| name)
        .to_string();

    let opinion_type = if UNQUALIFIED.is_match(opinion_text) {
        OpinionType::Unqualified
    } else if lowered.contains("qualified opinion") {
        OpinionType::Qualified
    } else if lowered.contains("adverse opinion") {
        OpinionType::Adverse
    } else if lowered.contains("disclaimer of opinion") {
        OpinionType::Disclaimer
    } else {
        OpinionType::Unknown
    };

    let going_concern = GOING_CONCERN.is_match(opinion_text);

    let internal_control_opinion = if IC_EFFECTIVE.is_match(opinion_text) {
        Some("Effective".to_string())
    } else if lowered.contains("material weakness") {
        Some("Material Weakness".to_string())
    } else {
        None
    };

    let key_audit_matters = extract_key_audit_matters(opinion_text);

    let opinion_date = OPINION_DATE
        .find(opinion_text)
        .and_then(|m| NaiveDate::parse_from_str(m.as_str(), "%B %d, %Y").ok())
        .unwrap_or_else(|| filing.filed_at.date_naive());

    // Annual reports filed in Q1 cover the previous fiscal year.
    let mut fiscal_year = filing.filed_at.year();
    if filing.filed_at.month() <= 3 {
        fiscal_year -= 1;
    }

    debug!(filing_id = %filing.filing_id, auditor = %auditor, ?opinion_type, "extracted audit opinion");

    Some(AuditOpinion {
        filing_id: filing.filing_id.clone(),
        company_name: filing.company_name.clone(),
        fiscal_year,
        auditor,
        opinion_type,
        going_concern_emphasis: going_concern,
        internal_control_opinion,
        key_audit_matters,
        opinion_date,
        excerpt: truncate_chars(opinion_text, EXCERPT_LIMIT),
    })
}

fn extract_key_audit_matters(opinion_text: &str) -> Vec<String> {
    let lowered = opinion_text.to_lowercase();
    let Some(start) = lowered.find("critical audit matter") else {
        return Vec::new();
    };
    let end = lowered[start..]
        .find("basis for opinion")
        .map_or(opinion_text.len(), |offset| start + offset);
    let kam_text = slice_at_char_boundaries(opinion_text, start, end);

    kam_text
        .split('\u{2022}')
        .skip(1)
        .map(|bullet| truncate_chars(bullet.trim(), 200))
        .filter(|bullet| !bullet.is_empty())
        .collect()
}

/// Slice numbered disclosure notes out of a filing's text. Note bodies run
/// to the next note header.
pub fn extract_disclosure_notes(filing: &Filing, text: &str) -> Vec<DisclosureNote> {
    let headers: Vec<(usize, usize, u32)> = NOTE_HEADER
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps.get(1)?.as_str().parse::<u32>().ok()?;
            Some((whole.start(), whole.end(), number))
        })
        .collect();

    let mut notes = Vec::new();
    for (i, (_, body_start, number)) in headers.iter().enumerate() {
        let body_end = headers
            .get(i + 1)
            .map_or(text.len(), |(next_start, _, _)| *next_start);
        let body = slice_at_char_boundaries(text, *body_start, body_end).trim();
        if body.is_empty() {
            continue;
        }

        let title = body
            .lines()
            .next()
            .map(|line| truncate_chars(line.trim(), 200))
            .unwrap_or_else(|| "Untitled".to_string());

        let asc_topic = ASC_TOPIC
            .captures(body)
            .and_then(|caps| caps.get(1))
            .map(|topic| format!("ASC {}", topic.as_str()));

        notes.push(DisclosureNote {
            filing_id: filing.filing_id.clone(),
            note_number: *number,
            title,
            asc_topic,
            text: truncate_chars(body, NOTE_TEXT_LIMIT),
        });
    }

    debug!(filing_id = %filing.filing_id, notes = notes.len(), "extracted disclosure notes");
    notes
}

fn slice_at_char_boundaries(text: &str, mut start: usize, mut end: usize) -> &str {
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    &text[start.min(text.len())..end.min(text.len())]
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
