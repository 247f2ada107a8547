//! The training-data lifecycle manager.
//!
//! Owns every TrainingRecord state transition. Each transition checks its
//! precondition, updates the record, and lands an audit event; the
//! transition gate serializes concurrent callers so the second transition
//! on a record always sees the first one's post-state.

use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::lifecycle;
use super::store::TrainingStore;
use crate::anonymize::engine::Anonymizer;
use crate::anonymize::validator::validate_anonymization;
use crate::audit::{AuditChain, AuditEventType, AuditSeverity, EventDraft};
use crate::errors::PipelineError;
use crate::models::{
    AnonymizationLevel, DataSource, Dataset, LineageDataset, LineageRecord, LineageReport,
    ModelTrainingRef, StatementType, TrainingRecord, TrainingStatus,
};
use crate::normalize::validate_statement;
use crate::quality::assess_quality;

#[derive(Debug, Clone, Serialize)]
pub struct TrainingStatistics {
    pub total_records: usize,
    pub approved_for_training: usize,
    pub total_datasets: usize,
    pub status_breakdown: BTreeMap<String, u32>,
    pub quality_breakdown: BTreeMap<String, u32>,
    pub source_breakdown: BTreeMap<String, u32>,
}

pub struct TrainingDataService {
    store: TrainingStore,
    audit: AuditChain,
    anonymizer: Anonymizer,
    /// Serializes all record transitions; per-record linearizability falls
    /// out of a single-writer lock in this single-process pipeline.
    transition_gate: Mutex<()>,
}

impl TrainingDataService {
    pub fn new(store: TrainingStore, audit: AuditChain, anonymizer: Anonymizer) -> Self {
        Self {
            store,
            audit,
            anonymizer,
            transition_gate: Mutex::new(()),
        }
    }

    pub fn audit_chain(&self) -> &AuditChain {
        &self.audit
    }

    /// Ingest a statement and drive it through validation, anonymization,
    /// anonymization validation and quality scoring. On success the record
    /// lands in VALIDATED.
    pub fn ingest_statement(
        &self,
        statement: &Value,
        statement_type: StatementType,
        source: DataSource,
        metadata: Value,
        tenant_id: Option<String>,
        user_id: Option<String>,
    ) -> Result<String, PipelineError> {
        self.ingest_statement_with_cancel(
            statement,
            statement_type,
            source,
            metadata,
            tenant_id,
            user_id,
            &|| false,
        )
    }

    /// Same as [`ingest_statement`], checking `cancelled` at every stage
    /// boundary. A cancellation rejects the in-flight record with reason
    /// CANCELLED.
    #[allow(clippy::too_many_arguments)]
    pub fn ingest_statement_with_cancel(
        &self,
        statement: &Value,
        statement_type: StatementType,
        source: DataSource,
        metadata: Value,
        tenant_id: Option<String>,
        user_id: Option<String>,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<String, PipelineError> {
        let _gate = self.transition_gate.lock();

        let validation = validate_statement(statement, statement_type);
        let mut record = TrainingRecord {
            id: Uuid::new_v4().to_string(),
            statement_type,
            source,
            status: TrainingStatus::PendingReview,
            anonymized_statement: Value::Null,
            validation,
            anonymization_validation: None,
            quality: None,
            metadata,
            tenant_id: tenant_id.clone(),
            uploaded_by: user_id.clone(),
            uploaded_at: Utc::now(),
            approved_by: None,
            approved_at: None,
            last_error: None,
            used_in_models: Vec::new(),
        };

        self.store.upsert_record(&record)?;
        self.audit.append(
            EventDraft::new(
                AuditEventType::RecordCreated,
                "training_record",
                &record.id,
                "record created",
            )
            .tenant(tenant_id.clone())
            .actor(user_id.clone())
            .metadata(json!({
                "statement_type": statement_type.as_str(),
                "source": source.as_str(),
            })),
        )?;

        if !record.validation.is_valid {
            let kinds: Vec<&str> = record
                .validation
                .issues
                .iter()
                .map(|i| i.kind.as_str())
                .collect();
            // Balance-sheet identity violations are flagged, not fatal;
            // anything else blocks the record in PENDING_REVIEW.
            let blocking: Vec<&str> = kinds
                .iter()
                .copied()
                .filter(|k| *k != "balance_sheet_equation_mismatch")
                .collect();
            if !blocking.is_empty() {
                warn!(record_id = %record.id, issues = ?blocking, "statement failed validation");
                return Err(PipelineError::Validation(blocking.join(", ")));
            }
        }

        self.check_cancel(&mut record, cancelled, user_id.as_deref())?;
        self.transition(&mut record, TrainingStatus::Anonymizing, user_id.as_deref())?;

        let (anonymized, meta) = match self
            .anonymizer
            .anonymize(statement, AnonymizationLevel::Full)
        {
            Ok(result) => result,
            Err(err) => {
                // Parked in ANONYMIZING; retryable.
                record.last_error = Some(err.to_string());
                self.store.upsert_record(&record)?;
                return Err(err);
            }
        };

        self.audit.append(
            EventDraft::new(
                AuditEventType::AnonymizationPerformed,
                "training_record",
                &record.id,
                "statement anonymized",
            )
            .tenant(tenant_id.clone())
            .actor(user_id.clone())
            .metadata(json!({
                "level": meta.level.as_str(),
                "pii_count": meta.pii_count,
                "pii_kinds_removed": meta.pii_kinds_removed,
            })),
        )?;

        record.anonymized_statement = anonymized;
        self.transition(&mut record, TrainingStatus::Anonymized, user_id.as_deref())?;
        self.check_cancel(&mut record, cancelled, user_id.as_deref())?;

        let check = validate_anonymization(&record.anonymized_statement);
        record.anonymization_validation = Some(check.clone());
        if !check.is_valid {
            let issue_kinds: Vec<&str> =
                check.issues.iter().map(|i| i.kind.as_str()).collect();
            // Counts only; never the offending plaintext.
            self.audit.append(
                EventDraft::new(
                    AuditEventType::SecurityAlert,
                    "training_record",
                    &record.id,
                    "residual PII detected after anonymization",
                )
                .severity(AuditSeverity::Critical)
                .tenant(tenant_id)
                .actor(user_id.clone())
                .metadata(json!({
                    "issue_kinds": issue_kinds.clone(),
                    "issue_count": check.issues.len(),
                })),
            )?;
            self.transition(&mut record, TrainingStatus::Rejected, user_id.as_deref())?;
            return Err(PipelineError::AnonymizationLeak(issue_kinds.join(", ")));
        }

        record.quality = Some(assess_quality(&record.anonymized_statement));
        self.transition(&mut record, TrainingStatus::Validated, user_id.as_deref())?;

        info!(
            record_id = %record.id,
            quality = record.quality.as_ref().map(|q| q.overall.as_str()).unwrap_or("unknown"),
            "statement ingested"
        );
        Ok(record.id)
    }

    /// Approve a VALIDATED record for training. Refusals (quality floor or
    /// failed anonymization validation) return `false`, leave the record
    /// in VALIDATED, and land an approval-refused event naming the failing
    /// preconditions.
    pub fn approve_for_training(
        &self,
        record_id: &str,
        approver: &str,
    ) -> Result<bool, PipelineError> {
        let _gate = self.transition_gate.lock();
        let mut record = self.require_record(record_id)?;

        if record.status != TrainingStatus::Validated {
            return Err(PipelineError::IllegalTransition {
                from: record.status.as_str().to_string(),
                action: "approve".to_string(),
            });
        }

        let mut failed_preconditions = Vec::new();
        if !record
            .quality
            .as_ref()
            .is_some_and(|q| q.overall != crate::models::QualityRating::Poor)
        {
            failed_preconditions.push("quality_not_poor");
        }
        if !record
            .anonymization_validation
            .as_ref()
            .is_some_and(|c| c.is_valid)
        {
            failed_preconditions.push("anonymization_valid");
        }

        if !failed_preconditions.is_empty() {
            warn!(record_id, ?failed_preconditions, "approval refused");
            self.audit.append(
                EventDraft::new(
                    AuditEventType::ApprovalRefused,
                    "training_record",
                    record_id,
                    "approval refused",
                )
                .severity(AuditSeverity::Warning)
                .actor(Some(approver.to_string()))
                .metadata(json!({ "failed_preconditions": failed_preconditions })),
            )?;
            return Ok(false);
        }

        record.approved_by = Some(approver.to_string());
        record.approved_at = Some(Utc::now());
        self.transition(
            &mut record,
            TrainingStatus::ApprovedForTraining,
            Some(approver),
        )?;
        Ok(true)
    }

    /// Compose a dataset from approved records. All-or-nothing: one
    /// unapproved record rejects the whole operation. Members flip to
    /// IN_TRAINING.
    pub fn create_dataset(
        &self,
        name: &str,
        record_ids: &[String],
        purpose: &str,
        creator: &str,
    ) -> Result<String, PipelineError> {
        let _gate = self.transition_gate.lock();

        if record_ids.is_empty() {
            return Err(PipelineError::Validation(
                "dataset needs at least one record".into(),
            ));
        }

        let mut members = Vec::with_capacity(record_ids.len());
        for record_id in record_ids {
            let record = self.require_record(record_id)?;
            if record.status != TrainingStatus::ApprovedForTraining {
                return Err(PipelineError::Validation(format!(
                    "record {record_id} is not approved for training (status: {})",
                    record.status.as_str()
                )));
            }
            members.push(record);
        }

        let dataset = Dataset {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            purpose: purpose.to_string(),
            record_ids: record_ids.to_vec(),
            created_by: creator.to_string(),
            created_at: Utc::now(),
            models_trained: Vec::new(),
        };
        self.store.upsert_dataset(&dataset)?;

        self.audit.append(
            EventDraft::new(
                AuditEventType::DatasetCreated,
                "dataset",
                &dataset.id,
                "dataset created",
            )
            .actor(Some(creator.to_string()))
            .metadata(json!({
                "name": name,
                "purpose": purpose,
                "record_count": members.len(),
            })),
        )?;

        for mut record in members {
            self.transition(&mut record, TrainingStatus::InTraining, Some(creator))?;
        }

        info!(dataset_id = %dataset.id, records = record_ids.len(), "dataset created");
        Ok(dataset.id)
    }

    /// Record that a model was trained on a dataset. Pure bookkeeping: the
    /// training itself happens elsewhere.
    pub fn track_training(
        &self,
        dataset_id: &str,
        model_id: &str,
        model_name: &str,
        metadata: Value,
    ) -> Result<(), PipelineError> {
        let _gate = self.transition_gate.lock();

        let mut dataset = self
            .store
            .get_dataset(dataset_id)?
            .ok_or(PipelineError::NotFound {
                kind: "dataset",
                id: dataset_id.to_string(),
            })?;

        let training_ref = ModelTrainingRef {
            model_id: model_id.to_string(),
            model_name: model_name.to_string(),
            trained_at: Utc::now(),
            metadata,
        };

        dataset.models_trained.push(training_ref.clone());
        self.store.upsert_dataset(&dataset)?;

        for record_id in &dataset.record_ids {
            if let Some(mut record) = self.store.get_record(record_id)? {
                record.used_in_models.push(training_ref.clone());
                self.store.upsert_record(&record)?;
            }
        }

        self.audit.append(
            EventDraft::new(
                AuditEventType::ModelTrained,
                "dataset",
                dataset_id,
                "model trained on dataset",
            )
            .metadata(json!({
                "model_id": model_id,
                "model_name": model_name,
                "record_count": dataset.record_ids.len(),
            })),
        )?;

        Ok(())
    }

    /// Trace a model back to every dataset and source statement behind it.
    pub fn lineage_of(&self, model_id: &str) -> Result<LineageReport, PipelineError> {
        let mut datasets = Vec::new();
        let mut records: Vec<LineageRecord> = Vec::new();
        let mut seen_records = std::collections::HashSet::new();

        for dataset in self.store.list_datasets()? {
            let Some(trained) = dataset
                .models_trained
                .iter()
                .find(|m| m.model_id == model_id)
            else {
                continue;
            };

            datasets.push(LineageDataset {
                dataset_id: dataset.id.clone(),
                dataset_name: dataset.name.clone(),
                record_count: dataset.record_ids.len(),
                trained_at: trained.trained_at,
            });

            for record_id in &dataset.record_ids {
                if !seen_records.insert(record_id.clone()) {
                    continue;
                }
                if let Some(record) = self.store.get_record(record_id)? {
                    records.push(LineageRecord {
                        record_id: record.id.clone(),
                        statement_type: record.statement_type,
                        source: record.source,
                        quality: record.quality.as_ref().map(|q| q.overall),
                        uploaded_at: record.uploaded_at,
                    });
                }
            }
        }

        let mut sources_breakdown: BTreeMap<String, u32> = BTreeMap::new();
        let mut quality_breakdown: BTreeMap<String, u32> = BTreeMap::new();
        for record in &records {
            *sources_breakdown
                .entry(record.source.as_str().to_string())
                .or_default() += 1;
            if let Some(quality) = record.quality {
                *quality_breakdown
                    .entry(quality.as_str().to_string())
                    .or_default() += 1;
            }
        }

        Ok(LineageReport {
            model_id: model_id.to_string(),
            datasets,
            records,
            sources_breakdown,
            quality_breakdown,
            generated_at: Utc::now(),
        })
    }

    /// Reject a record from any non-terminal state.
    pub fn reject_record(
        &self,
        record_id: &str,
        reason: &str,
        actor: Option<&str>,
    ) -> Result<(), PipelineError> {
        let _gate = self.transition_gate.lock();
        let mut record = self.require_record(record_id)?;
        record.last_error = Some(reason.to_string());
        self.transition(&mut record, TrainingStatus::Rejected, actor)
    }

    /// Retire a record that has been used in training.
    pub fn retire_record(&self, record_id: &str, actor: Option<&str>) -> Result<(), PipelineError> {
        let _gate = self.transition_gate.lock();
        let mut record = self.require_record(record_id)?;
        self.transition(&mut record, TrainingStatus::Retired, actor)
    }

    pub fn get_record(&self, record_id: &str) -> Result<Option<TrainingRecord>, PipelineError> {
        self.store.get_record(record_id)
    }

    pub fn get_dataset(&self, dataset_id: &str) -> Result<Option<Dataset>, PipelineError> {
        self.store.get_dataset(dataset_id)
    }

    pub fn statistics(&self) -> Result<TrainingStatistics, PipelineError> {
        let records = self.store.list_records()?;
        let datasets = self.store.list_datasets()?;

        let mut status_breakdown: BTreeMap<String, u32> = BTreeMap::new();
        let mut quality_breakdown: BTreeMap<String, u32> = BTreeMap::new();
        let mut source_breakdown: BTreeMap<String, u32> = BTreeMap::new();
        for record in &records {
            *status_breakdown
                .entry(record.status.as_str().to_string())
                .or_default() += 1;
            if let Some(quality) = &record.quality {
                *quality_breakdown
                    .entry(quality.overall.as_str().to_string())
                    .or_default() += 1;
            }
            *source_breakdown
                .entry(record.source.as_str().to_string())
                .or_default() += 1;
        }

        Ok(TrainingStatistics {
            total_records: records.len(),
            approved_for_training: records
                .iter()
                .filter(|r| r.status == TrainingStatus::ApprovedForTraining)
                .count(),
            total_datasets: datasets.len(),
            status_breakdown,
            quality_breakdown,
            source_breakdown,
        })
    }

    fn require_record(&self, record_id: &str) -> Result<TrainingRecord, PipelineError> {
        self.store
            .get_record(record_id)?
            .ok_or(PipelineError::NotFound {
                kind: "training record",
                id: record_id.to_string(),
            })
    }

    fn check_cancel(
        &self,
        record: &mut TrainingRecord,
        cancelled: &dyn Fn() -> bool,
        actor: Option<&str>,
    ) -> Result<(), PipelineError> {
        if !cancelled() {
            return Ok(());
        }
        record.last_error = Some("CANCELLED".to_string());
        self.transition(record, TrainingStatus::Rejected, actor)?;
        Err(PipelineError::Cancelled)
    }

    /// The single place a record's status changes.
    fn transition(
        &self,
        record: &mut TrainingRecord,
        to: TrainingStatus,
        actor: Option<&str>,
    ) -> Result<(), PipelineError> {
        if !lifecycle::can_transition(record.status, to) {
            return Err(PipelineError::IllegalTransition {
                from: record.status.as_str().to_string(),
                action: format!("-> {}", to.as_str()),
            });
        }

        let before = record.status;
        record.status = to;
        self.store.upsert_record(record)?;

        let severity = if to == TrainingStatus::Rejected {
            AuditSeverity::Warning
        } else {
            AuditSeverity::Info
        };
        self.audit.append(
            EventDraft::new(
                AuditEventType::RecordStateChanged,
                "training_record",
                &record.id,
                format!("state changed: {} -> {}", before.as_str(), to.as_str()),
            )
            .severity(severity)
            .tenant(record.tenant_id.clone())
            .actor(actor.map(str::to_string))
            .changes(json!({
                "before": before.as_str(),
                "after": to.as_str(),
            })),
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QualityRating;

    fn test_service() -> (tempfile::TempDir, TrainingDataService) {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditChain::open(dir.path().join("audit.db").to_str().unwrap()).unwrap();
        let store = TrainingStore::open(dir.path().join("training.db").to_str().unwrap()).unwrap();
        let service = TrainingDataService::new(store, audit, Anonymizer::new("s"));
        (dir, service)
    }

    fn good_balance_sheet() -> Value {
        json!({
            "company_name": "Acme Inc",
            "contact_email": "cfo@acme.com",
            "total_assets": 1000000,
            "total_liabilities": 600000,
            "total_equity": 400000,
            "cash": 150000,
            "inventory": 80000,
            "retained_earnings": 220000,
            "accounts_receivable": 90000,
            "reporting_period": "2025-12-31",
        })
    }

    fn ingest(service: &TrainingDataService, statement: &Value) -> String {
        service
            .ingest_statement(
                statement,
                StatementType::BalanceSheet,
                DataSource::ClientUpload,
                json!({}),
                Some("tenant-1".into()),
                Some("user-1".into()),
            )
            .unwrap()
    }

    #[test]
    fn ingest_lands_in_validated_with_audit_trail() {
        let (_dir, service) = test_service();
        let record_id = ingest(&service, &good_balance_sheet());

        let record = service.get_record(&record_id).unwrap().unwrap();
        assert_eq!(record.status, TrainingStatus::Validated);
        assert!(record.anonymization_validation.unwrap().is_valid);
        assert!(record.quality.is_some());
        assert!(record.anonymized_statement["company_name"]
            .as_str()
            .unwrap()
            .starts_with("[COMPANY_NAME_"));

        let events = service
            .audit_chain()
            .events_for_resource("training_record", &record_id)
            .unwrap();
        let types: Vec<AuditEventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                AuditEventType::RecordCreated,
                AuditEventType::RecordStateChanged, // -> anonymizing
                AuditEventType::AnonymizationPerformed,
                AuditEventType::RecordStateChanged, // -> anonymized
                AuditEventType::RecordStateChanged, // -> validated
            ]
        );

        // The whole trail verifies end to end.
        let last = service.audit_chain().last_seq().unwrap();
        assert!(service.audit_chain().verify_range(0, last).unwrap().ok);
    }

    #[test]
    fn state_changed_events_carry_before_and_after() {
        let (_dir, service) = test_service();
        let record_id = ingest(&service, &good_balance_sheet());

        let events = service
            .audit_chain()
            .events_for_resource("training_record", &record_id)
            .unwrap();
        let first_change = events
            .iter()
            .find(|e| e.event_type == AuditEventType::RecordStateChanged)
            .unwrap();
        let changes = first_change.changes.as_ref().unwrap();
        assert_eq!(changes["before"], "pending_review");
        assert_eq!(changes["after"], "anonymizing");
    }

    #[test]
    fn missing_required_fields_block_ingest() {
        let (_dir, service) = test_service();
        let err = service
            .ingest_statement(
                &json!({"total_assets": 100}),
                StatementType::BalanceSheet,
                DataSource::ClientUpload,
                json!({}),
                None,
                None,
            )
            .unwrap_err();
        assert_eq!(err.reason_code(), "VALIDATION_FAILED");
    }

    #[test]
    fn balance_sheet_mismatch_is_flagged_but_not_blocking() {
        let (_dir, service) = test_service();
        let statement = json!({
            "total_assets": 100,
            "total_liabilities": 60,
            "total_equity": 30,
            "reporting_period": "2025-12-31",
        });
        let record_id = service
            .ingest_statement(
                &statement,
                StatementType::BalanceSheet,
                DataSource::ClientUpload,
                json!({}),
                None,
                None,
            )
            .unwrap();

        let record = service.get_record(&record_id).unwrap().unwrap();
        assert_eq!(record.status, TrainingStatus::Validated);
        assert!(record.validation.has_issue("balance_sheet_equation_mismatch"));
    }

    #[test]
    fn residual_pii_rejects_the_record() {
        let (_dir, service) = test_service();
        // Ten consecutive digits in a numeric field: the anonymizer only
        // walks strings, but the validator scans the serialized payload.
        let statement = json!({
            "total_assets": 1000000,
            "total_liabilities": 600000,
            "total_equity": 400000,
            "reporting_period": "2025-12-31",
            "contact_number": 4155550100u64,
        });
        let err = service
            .ingest_statement(
                &statement,
                StatementType::BalanceSheet,
                DataSource::ClientUpload,
                json!({}),
                None,
                None,
            )
            .unwrap_err();
        assert_eq!(err.reason_code(), "ANONYMIZATION_LEAK");

        // The record is rejected and a CRITICAL alert landed.
        let stats = service.statistics().unwrap();
        assert_eq!(stats.status_breakdown.get("rejected"), Some(&1));
        let last = service.audit_chain().last_seq().unwrap();
        let events = service.audit_chain().events_in_range(0, last).unwrap();
        assert!(events.iter().any(|e| {
            e.event_type == AuditEventType::SecurityAlert
                && e.severity == AuditSeverity::Critical
        }));
    }

    #[test]
    fn approval_gates_on_quality_floor() {
        let (_dir, service) = test_service();
        // Sparse statement: completeness under 0.5 rates POOR.
        let statement = json!({
            "total_assets": 100,
            "total_liabilities": 60,
            "total_equity": 40,
            "reporting_period": "2025-12-31",
            "cash": null,
            "inventory": null,
            "accounts_receivable": null,
            "accounts_payable": null,
            "retained_earnings": null,
        });
        let record_id = service
            .ingest_statement(
                &statement,
                StatementType::BalanceSheet,
                DataSource::ClientUpload,
                json!({}),
                None,
                None,
            )
            .unwrap();

        let record = service.get_record(&record_id).unwrap().unwrap();
        assert_eq!(record.quality.as_ref().unwrap().overall, QualityRating::Poor);

        let approved = service.approve_for_training(&record_id, "approver-1").unwrap();
        assert!(!approved);

        // Still VALIDATED; an approval-refused event landed, but no state
        // change was recorded for the refusal.
        let record = service.get_record(&record_id).unwrap().unwrap();
        assert_eq!(record.status, TrainingStatus::Validated);

        let last = service.audit_chain().last_seq().unwrap();
        let events = service.audit_chain().events_in_range(0, last).unwrap();
        let refusal = events
            .iter()
            .find(|e| e.event_type == AuditEventType::ApprovalRefused)
            .unwrap();
        assert_eq!(
            refusal.metadata.as_ref().unwrap()["failed_preconditions"][0],
            "quality_not_poor"
        );
        assert_eq!(
            events.last().unwrap().event_type,
            AuditEventType::ApprovalRefused
        );
    }

    #[test]
    fn approval_moves_record_forward() {
        let (_dir, service) = test_service();
        let record_id = ingest(&service, &good_balance_sheet());

        assert!(service.approve_for_training(&record_id, "approver-1").unwrap());
        let record = service.get_record(&record_id).unwrap().unwrap();
        assert_eq!(record.status, TrainingStatus::ApprovedForTraining);
        assert_eq!(record.approved_by.as_deref(), Some("approver-1"));
        assert!(record.approved_at.is_some());
    }

    #[test]
    fn dataset_composition_is_all_or_nothing() {
        let (_dir, service) = test_service();
        let approved = ingest(&service, &good_balance_sheet());
        service.approve_for_training(&approved, "approver-1").unwrap();
        let unapproved = ingest(&service, &good_balance_sheet());

        let err = service
            .create_dataset(
                "mixed",
                &[approved.clone(), unapproved.clone()],
                "fraud detection",
                "user-1",
            )
            .unwrap_err();
        assert_eq!(err.reason_code(), "VALIDATION_FAILED");

        // Nothing moved: the approved record is still approved, not
        // in-training.
        assert_eq!(
            service.get_record(&approved).unwrap().unwrap().status,
            TrainingStatus::ApprovedForTraining
        );
    }

    #[test]
    fn dataset_creation_flips_members_to_in_training() {
        let (_dir, service) = test_service();
        let r1 = ingest(&service, &good_balance_sheet());
        let r2 = ingest(&service, &good_balance_sheet());
        service.approve_for_training(&r1, "approver-1").unwrap();
        service.approve_for_training(&r2, "approver-1").unwrap();

        let dataset_id = service
            .create_dataset(
                "bs-2025",
                &[r1.clone(), r2.clone()],
                "balance sheet modeling",
                "user-1",
            )
            .unwrap();

        for id in [&r1, &r2] {
            assert_eq!(
                service.get_record(id).unwrap().unwrap().status,
                TrainingStatus::InTraining
            );
        }
        let dataset = service.get_dataset(&dataset_id).unwrap().unwrap();
        assert_eq!(dataset.record_ids.len(), 2);
    }

    #[test]
    fn track_training_builds_lineage() {
        let (_dir, service) = test_service();
        let r1 = ingest(&service, &good_balance_sheet());
        service.approve_for_training(&r1, "approver-1").unwrap();
        let dataset_id = service
            .create_dataset("bs-2025", &[r1.clone()], "modeling", "user-1")
            .unwrap();

        service
            .track_training(
                &dataset_id,
                "model-7",
                "fraud-v7",
                json!({"epochs": 3}),
            )
            .unwrap();

        let record = service.get_record(&r1).unwrap().unwrap();
        assert_eq!(record.used_in_models.len(), 1);
        assert_eq!(record.used_in_models[0].model_id, "model-7");

        let lineage = service.lineage_of("model-7").unwrap();
        assert_eq!(lineage.datasets.len(), 1);
        assert_eq!(lineage.records.len(), 1);
        assert_eq!(lineage.records[0].record_id, r1);
        assert_eq!(lineage.sources_breakdown.get("client_upload"), Some(&1));

        // Unknown models have empty lineage.
        assert!(service.lineage_of("model-unknown").unwrap().datasets.is_empty());
    }

    #[test]
    fn retire_only_after_training() {
        let (_dir, service) = test_service();
        let r1 = ingest(&service, &good_balance_sheet());

        let err = service.retire_record(&r1, None).unwrap_err();
        assert_eq!(err.reason_code(), "ILLEGAL_TRANSITION");

        service.approve_for_training(&r1, "approver-1").unwrap();
        let dataset_id = service
            .create_dataset("ds", &[r1.clone()], "p", "u")
            .unwrap();
        service
            .track_training(&dataset_id, "m1", "model", json!({}))
            .unwrap();
        service.retire_record(&r1, None).unwrap();
        assert_eq!(
            service.get_record(&r1).unwrap().unwrap().status,
            TrainingStatus::Retired
        );
    }

    #[test]
    fn cancellation_rejects_in_flight_record() {
        let (_dir, service) = test_service();
        let err = service
            .ingest_statement_with_cancel(
                &good_balance_sheet(),
                StatementType::BalanceSheet,
                DataSource::ClientUpload,
                json!({}),
                None,
                Some("user-1".into()),
                &|| true,
            )
            .unwrap_err();
        assert_eq!(err.reason_code(), "CANCELLED");

        let stats = service.statistics().unwrap();
        assert_eq!(stats.status_breakdown.get("rejected"), Some(&1));
    }

    #[test]
    fn dataset_purity_survives_later_rejection() {
        let (_dir, service) = test_service();
        let r1 = ingest(&service, &good_balance_sheet());
        service.approve_for_training(&r1, "approver-1").unwrap();
        let dataset_id = service
            .create_dataset("ds", &[r1.clone()], "p", "u")
            .unwrap();

        // Rejecting the record afterwards does not rewrite the dataset.
        service.reject_record(&r1, "revoked", None).unwrap();
        let dataset = service.get_dataset(&dataset_id).unwrap().unwrap();
        assert_eq!(dataset.record_ids, vec![r1]);
    }
}
