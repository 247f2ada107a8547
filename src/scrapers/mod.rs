//! SEC EDGAR acquisition: rate-limited fetching plus filing parsing.

pub mod edgar_client;
pub mod filing_index;
pub mod opinions;
pub mod xbrl;

pub use edgar_client::{EdgarClient, FetchError, FetchedDocument};
pub use filing_index::{parse_atom_index, parse_document_index, FilingEntry};
pub use opinions::{extract_audit_opinion, extract_disclosure_notes, AuditOpinion, DisclosureNote};
pub use xbrl::{parse_companyfacts_json, parse_inline_xbrl, XbrlParse};

/// SEC form types the acquisition pipeline understands.
pub const FORM_TYPES: &[(&str, &str)] = &[
    ("10-K", "Annual Report"),
    ("10-Q", "Quarterly Report"),
    ("8-K", "Current Report"),
    ("S-1", "Registration Statement"),
    ("DEF 14A", "Proxy Statement"),
    ("20-F", "Annual Report (Foreign)"),
    ("6-K", "Current Report (Foreign)"),
];

/// What a fetched document parsed into.
#[derive(Debug, Clone)]
pub enum ParsedFiling {
    /// Atom company-filings index.
    AtomIndex(Vec<FilingEntry>),
    /// XBRL facts, from companyfacts JSON or an inline document.
    Facts(XbrlParse),
    /// HTML document index; the primary-document href when a row matched
    /// the requested form. Callers fall back to the index URL otherwise.
    DocumentIndex { primary_doc: Option<String> },
}

/// Route a fetched body to the right sub-parser by content type, falling
/// back to sniffing the payload.
pub fn parse_filing(
    body: &[u8],
    content_type: Option<&str>,
    filing_id: &str,
    form_type: &str,
) -> ParsedFiling {
    let text = String::from_utf8_lossy(body);
    let content_type = content_type.unwrap_or("").to_ascii_lowercase();

    if content_type.contains("json") || text.trim_start().starts_with('{') {
        return ParsedFiling::Facts(parse_companyfacts_json(&text, filing_id));
    }
    if content_type.contains("atom") || text.contains("<feed") {
        return ParsedFiling::AtomIndex(parse_atom_index(&text, usize::MAX));
    }
    if text.contains("tableFile") {
        return ParsedFiling::DocumentIndex {
            primary_doc: parse_document_index(&text, form_type),
        };
    }
    ParsedFiling::Facts(parse_inline_xbrl(&text, filing_id))
}
