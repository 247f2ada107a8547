//! Ingestion worker pool.
//!
//! Statements arrive on a bounded channel and fan out to workers; each
//! worker drives one statement through the full lifecycle front
//! (validate -> anonymize -> validate anonymization -> quality). Stage
//! boundaries are queue boundaries; a shutdown signal cancels in-flight
//! work cooperatively and rejects the affected records.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::errors::{LifecycleOutcome, PipelineError};
use crate::models::{DataSource, StatementType};
use crate::training::TrainingDataService;

#[derive(Debug, Clone)]
pub struct IngestJob {
    pub statement: Value,
    pub statement_type: StatementType,
    pub source: DataSource,
    pub metadata: Value,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
}

pub struct IngestPipeline {
    pub jobs: mpsc::Sender<IngestJob>,
    pub outcomes: mpsc::UnboundedReceiver<LifecycleOutcome>,
    handles: Vec<JoinHandle<()>>,
}

impl IngestPipeline {
    /// Spawn `workers` ingestion workers sharing one bounded job queue.
    pub fn start(
        service: Arc<TrainingDataService>,
        workers: usize,
        queue_depth: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<IngestJob>(queue_depth.max(1));
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut handles = Vec::with_capacity(workers.max(1));
        for worker_id in 0..workers.max(1) {
            let service = Arc::clone(&service);
            let job_rx = Arc::clone(&job_rx);
            let outcome_tx = outcome_tx.clone();
            let mut shutdown = shutdown.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    let job = {
                        let mut rx = job_rx.lock().await;
                        tokio::select! {
                            job = rx.recv() => job,
                            // Wake blocked workers when shutdown flips (or
                            // the sender is gone at process end).
                            _ = shutdown.changed() => None,
                        }
                    };
                    let Some(job) = job else {
                        break;
                    };

                    let service = Arc::clone(&service);
                    let cancel = shutdown.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        service.ingest_statement_with_cancel(
                            &job.statement,
                            job.statement_type,
                            job.source,
                            job.metadata.clone(),
                            job.tenant_id.clone(),
                            job.user_id.clone(),
                            &|| *cancel.borrow(),
                        )
                    })
                    .await;

                    let outcome = match result {
                        Ok(Ok(record_id)) => {
                            info!(worker_id, record_id = %record_id, "statement ingested");
                            LifecycleOutcome::accepted(record_id)
                        }
                        Ok(Err(err)) => {
                            warn!(worker_id, reason = err.reason_code(), error = %err, "ingest refused");
                            LifecycleOutcome::refused(None, err.reason_code())
                        }
                        Err(join_err) => {
                            error!(worker_id, error = %join_err, "ingest worker task failed");
                            LifecycleOutcome::refused(
                                None,
                                PipelineError::Cancelled.reason_code(),
                            )
                        }
                    };
                    let _ = outcome_tx.send(outcome);
                }
            }));
        }

        Self {
            jobs: job_tx,
            outcomes: outcome_rx,
            handles,
        }
    }

    /// Close the intake and wait for every worker to drain.
    pub async fn shutdown(self) {
        drop(self.jobs);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anonymize::Anonymizer;
    use crate::audit::AuditChain;
    use crate::training::TrainingStore;
    use serde_json::json;

    fn test_service(dir: &tempfile::TempDir) -> Arc<TrainingDataService> {
        let audit = AuditChain::open(dir.path().join("audit.db").to_str().unwrap()).unwrap();
        let store = TrainingStore::open(dir.path().join("training.db").to_str().unwrap()).unwrap();
        Arc::new(TrainingDataService::new(store, audit, Anonymizer::new("s")))
    }

    fn job() -> IngestJob {
        IngestJob {
            statement: json!({
                "company_name": "Acme Inc",
                "total_assets": 1000000,
                "total_liabilities": 600000,
                "total_equity": 400000,
                "reporting_period": "2025-12-31",
            }),
            statement_type: StatementType::BalanceSheet,
            source: DataSource::ApiImport,
            metadata: json!({}),
            tenant_id: None,
            user_id: Some("worker-test".into()),
        }
    }

    #[tokio::test]
    async fn workers_process_queued_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(&dir);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut pipeline = IngestPipeline::start(Arc::clone(&service), 2, 8, shutdown_rx);
        for _ in 0..3 {
            pipeline.jobs.send(job()).await.unwrap();
        }

        let mut accepted = 0;
        for _ in 0..3 {
            let outcome = pipeline.outcomes.recv().await.unwrap();
            assert!(outcome.ok, "reason: {:?}", outcome.reason);
            accepted += 1;
        }
        assert_eq!(accepted, 3);

        pipeline.shutdown().await;
        assert_eq!(service.statistics().unwrap().total_records, 3);
    }

    #[tokio::test]
    async fn invalid_statements_surface_stable_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(&dir);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut pipeline = IngestPipeline::start(service, 1, 8, shutdown_rx);
        let mut bad = job();
        bad.statement = json!({"total_assets": 1});
        pipeline.jobs.send(bad).await.unwrap();

        let outcome = pipeline.outcomes.recv().await.unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.reason.as_deref(), Some("VALIDATION_FAILED"));

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn workers_stop_when_intake_closes() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(&dir);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let pipeline = IngestPipeline::start(service, 2, 4, shutdown_rx);
        pipeline.shutdown().await;
    }
}
