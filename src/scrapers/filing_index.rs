//! Filing index parsing: EDGAR Atom listings and HTML document indexes.

use chrono::{NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::debug;

use crate::models::Filing;

static ENTRY_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("entry").expect("entry selector"));
static FILING_DATE_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("filing-date").expect("filing-date selector"));
static ACCESSION_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("accession-number").expect("accession selector"));
static HREF_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("filing-href").expect("filing-href selector"));
static COMPANY_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("company-name").expect("company-name selector"));
static TABLE_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table.tableFile").expect("table selector"));
static ROW_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("tr selector"));
static CELL_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("td selector"));
static LINK_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("a").expect("a selector"));

/// One entry from an EDGAR Atom company-filings feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FilingEntry {
    pub accession: String,
    pub filing_date: NaiveDate,
    pub filing_href: String,
    pub company_name: String,
}

fn element_text(el: scraper::ElementRef<'_>, selector: &Selector) -> Option<String> {
    el.select(selector)
        .next()
        .map(|node| node.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Parse an Atom company-filings index. Entries missing any required field
/// are skipped rather than failing the whole page.
pub fn parse_atom_index(atom: &str, limit: usize) -> Vec<FilingEntry> {
    let document = Html::parse_document(atom);
    let mut entries = Vec::new();

    for entry in document.select(&ENTRY_SEL).take(limit) {
        let Some(date_text) = element_text(entry, &FILING_DATE_SEL) else {
            continue;
        };
        let Ok(filing_date) = NaiveDate::parse_from_str(&date_text, "%Y-%m-%d") else {
            continue;
        };
        let Some(accession) = element_text(entry, &ACCESSION_SEL) else {
            continue;
        };
        let Some(filing_href) = element_text(entry, &HREF_SEL) else {
            continue;
        };
        let company_name = element_text(entry, &COMPANY_SEL).unwrap_or_default();

        entries.push(FilingEntry {
            accession,
            filing_date,
            filing_href,
            company_name,
        });
    }

    debug!(entries = entries.len(), "parsed atom index");
    entries
}

/// Locate the primary document in an EDGAR filing-index page: the row of
/// the document-list table whose declared type matches the requested form.
/// Returns `None` when no matching row exists; callers fall back to the
/// index URL itself.
pub fn parse_document_index(html: &str, form_type: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let table = document.select(&TABLE_SEL).next()?;

    for row in table.select(&ROW_SEL).skip(1) {
        let cells: Vec<scraper::ElementRef<'_>> = row.select(&CELL_SEL).collect();
        if cells.len() < 4 {
            continue;
        }
        let declared_type = cells[3].text().collect::<String>();
        if !declared_type.trim().contains(form_type) {
            continue;
        }
        if let Some(link) = cells[2].select(&LINK_SEL).next() {
            if let Some(href) = link.value().attr("href") {
                return Some(href.to_string());
            }
        }
    }
    None
}

/// Assemble a `Filing` from an index entry plus the resolved document URL.
pub fn filing_from_entry(
    entry: &FilingEntry,
    issuer_id: &str,
    form_type: &str,
    primary_doc_uri: String,
    xbrl_uri: Option<String>,
) -> Filing {
    Filing {
        filing_id: entry.accession.clone(),
        issuer_id: issuer_id.to_string(),
        company_name: entry.company_name.clone(),
        form_type: form_type.to_string(),
        filed_at: Utc
            .from_utc_datetime(&entry.filing_date.and_hms_opt(0, 0, 0).unwrap_or_default()),
        period_end: None,
        primary_doc_uri,
        xbrl_uri,
        size_bytes: None,
    }
}

/// Flatten an HTML document to its visible text.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
}
