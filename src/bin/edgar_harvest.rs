//! EDGAR Harvest Tool
//!
//! CLI driver for the acquisition core: pull a company's filing index,
//! resolve primary documents, parse XBRL facts and emit normalized
//! statements as JSON artifacts.
//!
//! Usage:
//!   cargo run --bin edgar_harvest -- --cik 0000320193 --form 10-K --limit 5
//!   cargo run --bin edgar_harvest -- --cik 0000320193 --companyfacts --out ./data

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tracing::{info, warn};

use fintrain_backend::config::Settings;
use fintrain_backend::models::StatementType;
use fintrain_backend::normalize::normalize;
use fintrain_backend::scrapers::{
    extract_audit_opinion, extract_disclosure_notes, filing_index, parse_companyfacts_json,
    EdgarClient,
};

const BASE_URL: &str = "https://www.sec.gov";

/// Harvest filings and normalized statements from SEC EDGAR.
#[derive(Parser, Debug)]
#[command(name = "edgar_harvest")]
#[command(about = "Fetch and normalize SEC EDGAR filings")]
struct Cli {
    /// 10-digit CIK of the issuer
    #[arg(long)]
    cik: String,

    /// Form type to harvest
    #[arg(long, default_value = "10-K")]
    form: String,

    /// Maximum filings to process
    #[arg(long, default_value_t = 10)]
    limit: usize,

    /// Also pull the companyfacts JSON API and emit normalized statements
    #[arg(long, default_value_t = false)]
    companyfacts: bool,

    /// Output directory for harvested artifacts
    #[arg(long, default_value = "./data/edgar")]
    out: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.out)
        .with_context(|| format!("create {}", cli.out.display()))?;

    let settings = Settings::from_env().context("invalid configuration")?;
    let client = EdgarClient::new(&settings)?;

    let cik = format!("{:0>10}", cli.cik);

    // Filing index via the Atom feed.
    let index_url = format!(
        "{BASE_URL}/cgi-bin/browse-edgar?action=getcompany&CIK={cik}&type={}&owner=exclude&count={}&output=atom",
        cli.form, cli.limit,
    );
    let index = client.fetch(&index_url).await?;
    let entries = filing_index::parse_atom_index(&index.text(), cli.limit);
    info!(entries = entries.len(), cik = %cik, form = %cli.form, "filing index fetched");

    for entry in &entries {
        // Resolve the primary document from the filing's index page.
        let doc_url = match client.fetch(&entry.filing_href).await {
            Ok(page) => filing_index::parse_document_index(&page.text(), &cli.form)
                .map(|href| format!("{BASE_URL}{href}"))
                .unwrap_or_else(|| entry.filing_href.clone()),
            Err(e) => {
                warn!(accession = %entry.accession, error = %e, "could not resolve primary document");
                entry.filing_href.clone()
            }
        };

        let filing = filing_index::filing_from_entry(entry, &cik, &cli.form, doc_url, None);
        let filing_path = cli.out.join(format!("{}_filing.json", entry.accession));
        std::fs::write(&filing_path, serde_json::to_vec_pretty(&filing)?)?;
        info!(accession = %entry.accession, "filing metadata written");

        // Annual reports also carry the auditor's report and notes.
        if filing.form_type == "10-K" || filing.form_type == "20-F" {
            match client.fetch(&filing.primary_doc_uri).await {
                Ok(document) => {
                    let text = filing_index::html_to_text(&document.text());
                    if let Some(opinion) = extract_audit_opinion(&filing, &text) {
                        let path = cli.out.join(format!("{}_opinion.json", entry.accession));
                        std::fs::write(&path, serde_json::to_vec_pretty(&opinion)?)?;
                        info!(accession = %entry.accession, auditor = %opinion.auditor, "audit opinion extracted");
                    }
                    let notes = extract_disclosure_notes(&filing, &text);
                    if !notes.is_empty() {
                        let path = cli.out.join(format!("{}_notes.json", entry.accession));
                        std::fs::write(&path, serde_json::to_vec_pretty(&notes)?)?;
                    }
                }
                Err(e) => {
                    warn!(accession = %entry.accession, error = %e, "primary document fetch failed");
                }
            }
        }
    }

    if cli.companyfacts {
        let facts_url = format!(
            "https://data.sec.gov/api/xbrl/companyfacts/CIK{cik}.json"
        );
        let body = client.fetch(&facts_url).await?;
        let parsed = parse_companyfacts_json(&body.text(), &cik);
        info!(
            facts = parsed.facts.len(),
            skipped = parsed.skipped,
            "companyfacts parsed"
        );

        for statement_type in [
            StatementType::BalanceSheet,
            StatementType::IncomeStatement,
            StatementType::CashFlow,
        ] {
            let statement = normalize(&parsed.facts, &[], statement_type, None);
            if statement.fields.is_empty() {
                continue;
            }
            let path = cli
                .out
                .join(format!("{cik}_{}.json", statement_type.as_str()));
            std::fs::write(&path, serde_json::to_vec_pretty(&statement)?)?;
            info!(
                statement_type = statement_type.as_str(),
                fields = statement.fields.len(),
                path = %path.display(),
                "normalized statement written"
            );
        }
    }

    Ok(())
}
