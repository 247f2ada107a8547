//! FinTrain - privacy-preserving training-data pipeline for financial AI.
//!
//! Wires the cores together: opens the audit chain, token vault and
//! training store, spawns the ingestion workers, and runs housekeeping
//! (chain verification, retention archival) until shutdown.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenv::dotenv;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

use fintrain_backend::anonymize::{Anonymizer, TokenVault};
use fintrain_backend::audit::{AuditChain, AuditEventType, EventDraft};
use fintrain_backend::config::Settings;
use fintrain_backend::models::{DataSource, StatementType};
use fintrain_backend::pipeline::{IngestJob, IngestPipeline};
use fintrain_backend::training::{TrainingDataService, TrainingStore};

/// How often housekeeping verifies the chain tail and archives
/// past-retention events.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let settings = Settings::from_env().context("invalid configuration")?;
    info!(
        rate_limit = settings.rate_limit_per_second,
        workers = settings.ingest_workers,
        "starting fintrain pipeline"
    );

    let mut audit = AuditChain::open(&settings.audit_db_path).context("open audit chain")?;
    if let Some(spec) = &settings.retention_overrides {
        audit = audit.with_retention(fintrain_backend::audit::RetentionPolicy::from_spec(spec));
    }
    let vault_key = TokenVault::derive_key(
        settings.vault_key_hex.as_deref(),
        &settings.tokenization_secret,
    );
    let vault = TokenVault::open(&settings.token_vault_db_path, &vault_key, Some(audit.clone()))
        .context("open token vault")?;
    let store = TrainingStore::open(&settings.training_db_path).context("open training store")?;

    let anonymizer = Anonymizer::new(settings.tokenization_secret.clone()).with_vault(vault);
    let service = Arc::new(TrainingDataService::new(store, audit.clone(), anonymizer));

    audit.append(EventDraft::new(
        AuditEventType::ServiceStarted,
        "service",
        "fintrain",
        "pipeline started",
    ))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut pipeline = IngestPipeline::start(
        Arc::clone(&service),
        settings.ingest_workers,
        settings.ingest_queue_depth,
        shutdown_rx.clone(),
    );

    // One-shot intake: statements dropped as JSON files before startup.
    if let Ok(intake_dir) = std::env::var("INTAKE_DIR") {
        match enqueue_intake_dir(&pipeline, Path::new(&intake_dir)).await {
            Ok(count) => info!(count, dir = %intake_dir, "queued intake statements"),
            Err(e) => warn!(error = %e, dir = %intake_dir, "intake scan failed"),
        }
    }

    // Drain outcomes so the channel never backs up; failures are already
    // audited, this is operator visibility.
    let outcome_task = tokio::spawn(async move {
        while let Some(outcome) = pipeline.outcomes.recv().await {
            if !outcome.ok {
                warn!(reason = ?outcome.reason, "ingest refused");
            }
        }
        pipeline
    });

    let housekeeping_audit = audit.clone();
    let mut housekeeping_shutdown = shutdown_rx.clone();
    let housekeeping = tokio::spawn(async move {
        let mut tick = interval(HOUSEKEEPING_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Some(last) = housekeeping_audit.last_seq() {
                        match housekeeping_audit.verify_and_log(0, last) {
                            Ok(v) => info!(checked = v.checked, "audit chain verified"),
                            Err(e) => {
                                // Integrity failures halt this store; nothing
                                // to recover locally.
                                error!(error = %e, "audit chain verification FAILED");
                                break;
                            }
                        }
                    }
                    match housekeeping_audit.archive_due() {
                        Ok(0) => {}
                        Ok(n) => info!(archived = n, "archived events past retention"),
                        Err(e) => warn!(error = %e, "retention archival failed"),
                    }
                }
                _ = housekeeping_shutdown.changed() => break,
            }
        }
    });

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("shutdown requested");
    shutdown_tx.send(true).ok();

    let pipeline = outcome_task.await.context("outcome drain task")?;
    pipeline.shutdown().await;
    housekeeping.abort();

    info!("fintrain pipeline stopped");
    Ok(())
}

/// Queue every `*.json` statement file found in the intake directory.
async fn enqueue_intake_dir(pipeline: &IngestPipeline, dir: &Path) -> Result<usize> {
    let mut queued = 0usize;
    let entries = std::fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let body = std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?;
        let statement: Value = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unparseable statement");
                continue;
            }
        };

        let statement_type = statement
            .get("statement_type")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<StatementType>().ok())
            .unwrap_or(StatementType::CompletePackage);

        pipeline
            .jobs
            .send(IngestJob {
                statement,
                statement_type,
                source: DataSource::BulkImport,
                metadata: serde_json::json!({ "intake_file": path.display().to_string() }),
                tenant_id: None,
                user_id: None,
            })
            .await
            .ok();
        queued += 1;
    }

    Ok(queued)
}
