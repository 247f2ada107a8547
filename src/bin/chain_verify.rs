//! Audit Chain Verification Tool
//!
//! Recomputes the hash chain end-to-end and reports the first broken
//! link, then optionally archives events past their retention period.
//!
//! Usage:
//!   cargo run --bin chain_verify -- --db-path ./fintrain_audit.db
//!   cargo run --bin chain_verify -- --db-path ./fintrain_audit.db --from 100 --to 500 --archive

use anyhow::{Context, Result};
use clap::Parser;

use fintrain_backend::audit::AuditChain;

/// Verify audit-chain integrity and run retention archival.
#[derive(Parser, Debug)]
#[command(name = "chain_verify")]
#[command(about = "Verify the hash-chained audit log")]
struct Cli {
    /// Path to the audit SQLite database
    #[arg(long, env = "AUDIT_DB_PATH", default_value = "fintrain_audit.db")]
    db_path: String,

    /// First seq to verify (default: 0)
    #[arg(long, default_value_t = 0)]
    from: u64,

    /// Last seq to verify (default: chain tail)
    #[arg(long)]
    to: Option<u64>,

    /// Archive events past their retention period after verification
    #[arg(long, default_value_t = false)]
    archive: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let chain = AuditChain::open(&cli.db_path).context("open audit chain")?;

    let Some(last_seq) = chain.last_seq() else {
        println!("chain is empty; nothing to verify");
        return Ok(());
    };
    let to = cli.to.unwrap_or(last_seq).min(last_seq);

    let verification = chain
        .verify_range(cli.from, to)
        .context("verification query failed")?;

    if verification.ok {
        println!(
            "OK: {} events verified ({}..={}), tail hash {}",
            verification.checked,
            cli.from,
            to,
            chain.tail_hash()
        );
    } else {
        println!(
            "FAILED: chain broken at seq {} ({} events verified before the break)",
            verification
                .first_invalid_seq
                .map_or_else(|| "?".to_string(), |s| s.to_string()),
            verification.checked,
        );
        std::process::exit(1);
    }

    if cli.archive {
        let archived = chain.archive_due().context("retention archival failed")?;
        println!("archived {archived} events past retention");
    }

    Ok(())
}
