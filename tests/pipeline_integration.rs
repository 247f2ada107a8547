//! End-to-end pipeline scenarios: ingest through anonymization, quality
//! gating, approval, dataset composition, lineage, and the audit chain's
//! tamper evidence.

use std::sync::Arc;

use rusqlite::Connection;
use rust_decimal_macros::dec;
use serde_json::json;

use fintrain_backend::anonymize::{Anonymizer, TokenVault};
use fintrain_backend::audit::{AuditChain, AuditEventType};
use fintrain_backend::models::{
    AnonymizationLevel, DataSource, StatementType, TrainingStatus,
};
use fintrain_backend::sampling::{attribute, mus, RiskLevel};
use fintrain_backend::training::{TrainingDataService, TrainingStore};

fn service_with_vault(dir: &tempfile::TempDir) -> (TrainingDataService, Arc<TokenVault>, AuditChain) {
    let audit = AuditChain::open(dir.path().join("audit.db").to_str().unwrap()).unwrap();
    let key = TokenVault::derive_key(None, "s");
    let vault = TokenVault::open(
        dir.path().join("vault.db").to_str().unwrap(),
        &key,
        Some(audit.clone()),
    )
    .unwrap();
    let store = TrainingStore::open(dir.path().join("training.db").to_str().unwrap()).unwrap();
    let anonymizer = Anonymizer::new("s").with_vault(Arc::clone(&vault));
    (
        TrainingDataService::new(store, audit.clone(), anonymizer),
        vault,
        audit,
    )
}

fn sample_statement() -> serde_json::Value {
    json!({
        "company_name": "Acme Inc",
        "contact_email": "cfo@acme.com",
        "total_assets": 1000000,
        "total_liabilities": 600000,
        "total_equity": 400000,
        "cash": 150000,
        "accounts_receivable": 90000,
        "inventory": 80000,
        "retained_earnings": 220000,
        "reporting_period": "2025-12-31",
    })
}

#[test]
fn anonymize_and_validate_scenario() {
    // S1: FULL anonymization of a statement with a company name and an
    // email; financial values survive untouched.
    let (anonymized, meta) = Anonymizer::new("s")
        .anonymize(
            &json!({
                "company_name": "Acme Inc",
                "total_assets": 1000000,
                "contact_email": "cfo@acme.com",
            }),
            AnonymizationLevel::Full,
        )
        .unwrap();

    let company = anonymized["company_name"].as_str().unwrap();
    assert!(company.starts_with("[COMPANY_NAME_") && company.ends_with(']'));
    let email = anonymized["contact_email"].as_str().unwrap();
    assert!(email.starts_with("[EMAIL_") && email.ends_with(']'));
    assert_eq!(anonymized["total_assets"], json!(1000000));
    assert_eq!(meta.pii_count, 2);

    let check = fintrain_backend::anonymize::validate_anonymization(&anonymized);
    assert!(check.is_valid, "issues: {:?}", check.issues);
}

#[test]
fn full_lifecycle_with_lineage_and_verified_chain() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _vault, audit) = service_with_vault(&dir);

    let r1 = service
        .ingest_statement(
            &sample_statement(),
            StatementType::BalanceSheet,
            DataSource::ClientUpload,
            json!({"engagement": "fy2025"}),
            Some("tenant-1".into()),
            Some("uploader-1".into()),
        )
        .unwrap();
    let r2 = service
        .ingest_statement(
            &sample_statement(),
            StatementType::BalanceSheet,
            DataSource::PublicFilings,
            json!({}),
            Some("tenant-1".into()),
            Some("uploader-2".into()),
        )
        .unwrap();

    assert!(service.approve_for_training(&r1, "approver-1").unwrap());
    assert!(service.approve_for_training(&r2, "approver-1").unwrap());

    let dataset_id = service
        .create_dataset("bs-fy2025", &[r1.clone(), r2.clone()], "modeling", "ds-lead")
        .unwrap();
    service
        .track_training(&dataset_id, "model-31", "fraud-v31", json!({"epochs": 5}))
        .unwrap();

    // Lineage reaches every source record with its quality and source.
    let lineage = service.lineage_of("model-31").unwrap();
    assert_eq!(lineage.datasets.len(), 1);
    assert_eq!(lineage.records.len(), 2);
    assert_eq!(lineage.sources_breakdown.get("client_upload"), Some(&1));
    assert_eq!(lineage.sources_breakdown.get("public_filings"), Some(&1));

    // Both records are in training and remember the model.
    for id in [&r1, &r2] {
        let record = service.get_record(id).unwrap().unwrap();
        assert_eq!(record.status, TrainingStatus::InTraining);
        assert_eq!(record.used_in_models[0].model_id, "model-31");
    }

    // The entire audit trail verifies, and the expected governance events
    // are all present.
    let last = audit.last_seq().unwrap();
    let verification = audit.verify_range(0, last).unwrap();
    assert!(verification.ok);

    let events = audit.events_in_range(0, last).unwrap();
    for expected in [
        AuditEventType::RecordCreated,
        AuditEventType::RecordStateChanged,
        AuditEventType::AnonymizationPerformed,
        AuditEventType::DatasetCreated,
        AuditEventType::ModelTrained,
    ] {
        assert!(
            events.iter().any(|e| e.event_type == expected),
            "missing {expected:?}"
        );
    }

    // Anonymization events never carry plaintext, only counts.
    let anon_event = events
        .iter()
        .find(|e| e.event_type == AuditEventType::AnonymizationPerformed)
        .unwrap();
    let meta = anon_event.metadata.as_ref().unwrap();
    assert!(meta.get("pii_count").is_some());
    assert!(!meta.to_string().contains("Acme"));
}

#[test]
fn reverse_mapping_round_trips_the_original() {
    let dir = tempfile::tempdir().unwrap();
    let (service, vault, _audit) = service_with_vault(&dir);

    let record_id = service
        .ingest_statement(
            &sample_statement(),
            StatementType::BalanceSheet,
            DataSource::ClientUpload,
            json!({}),
            None,
            Some("uploader-1".into()),
        )
        .unwrap();

    let record = service.get_record(&record_id).unwrap().unwrap();
    let anonymizer = Anonymizer::new("s").with_vault(vault);
    let restored = anonymizer
        .de_anonymize(&record.anonymized_statement, "compliance-auditor")
        .unwrap();

    // Ignoring the injected metadata block (already stripped by
    // de-anonymization), we get the original document back.
    assert_eq!(restored, sample_statement());
}

#[test]
fn tampering_breaks_verification_at_the_exact_seq() {
    // S3: 100 events, storage-level mutation of #42, first failing seq 42.
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("audit.db");
    let audit = AuditChain::open(db_path.to_str().unwrap()).unwrap();

    for i in 0..100 {
        audit
            .append(
                fintrain_backend::audit::EventDraft::new(
                    AuditEventType::DataRead,
                    "document",
                    format!("doc-{i}"),
                    format!("read document {i}"),
                )
                .actor(Some("reader-1".into())),
            )
            .unwrap();
    }
    assert!(audit.verify_range(0, 99).unwrap().ok);

    let raw = Connection::open(&db_path).unwrap();
    raw.execute(
        "UPDATE audit_log SET action = 'read something else' WHERE seq = 42",
        [],
    )
    .unwrap();

    let verification = audit.verify_range(0, 99).unwrap();
    assert!(!verification.ok);
    assert_eq!(verification.first_invalid_seq, Some(42));
    assert_eq!(verification.checked, 42);
}

#[test]
fn mus_plan_select_evaluate_round() {
    // S4 sizing, then a seeded selection and a clean evaluation.
    let plan = mus::calculate_sample_size(
        dec!(1000000),
        dec!(50000),
        dec!(0),
        RiskLevel::Moderate,
    )
    .unwrap();
    assert_eq!(plan.sample_size, 47);
    assert_eq!(plan.sampling_interval, dec!(21276.60));

    let population: Vec<mus::PopulationItem> = (0..500)
        .map(|i| mus::PopulationItem {
            id: format!("inv-{i:05}"),
            amount: dec!(2000),
        })
        .collect();

    let selected = mus::select_sample(&population, plan.sample_size, plan.sampling_interval, 424242);
    assert!(!selected.is_empty());
    assert!(selected.len() <= plan.sample_size as usize);

    // Audit every selected item and find book == audit everywhere.
    let results: Vec<mus::SampleResultItem> = selected
        .iter()
        .map(|item| mus::SampleResultItem {
            id: item.id.clone(),
            book_value: item.amount,
            audit_value: item.amount,
        })
        .collect();

    let eval = mus::evaluate_sample(
        &results,
        dec!(1000000),
        dec!(100000),
        RiskLevel::Moderate,
    )
    .unwrap();
    assert_eq!(eval.misstatements_found, 0);
    assert_eq!(eval.conclusion, mus::MusConclusion::Accept);
}

#[test]
fn attribute_evaluation_scenario() {
    // S5: n=93, 2 deviations, TR=5%, low risk -> DO_NOT_RELY.
    let eval = attribute::evaluate_sample(93, 2, dec!(0.05), RiskLevel::Low).unwrap();
    assert_eq!(eval.sample_deviation_rate, dec!(0.0215));
    assert!(eval.upper_deviation_limit > dec!(0.05));
    assert_eq!(eval.conclusion, attribute::AttributeConclusion::DoNotRely);
}

#[test]
fn quality_floor_blocks_approval_but_not_validation() {
    // S6: POOR-quality record stays VALIDATED; refusal is audited without
    // a state change.
    let dir = tempfile::tempdir().unwrap();
    let (service, _vault, audit) = service_with_vault(&dir);

    let record_id = service
        .ingest_statement(
            &json!({
                "total_assets": 100,
                "total_liabilities": 60,
                "total_equity": 40,
                "reporting_period": "2025-12-31",
                "cash": null,
                "inventory": null,
                "accounts_receivable": null,
                "accounts_payable": null,
                "retained_earnings": null,
            }),
            StatementType::BalanceSheet,
            DataSource::ManualEntry,
            json!({}),
            None,
            None,
        )
        .unwrap();

    assert!(!service.approve_for_training(&record_id, "approver-1").unwrap());
    assert_eq!(
        service.get_record(&record_id).unwrap().unwrap().status,
        TrainingStatus::Validated
    );

    let last = audit.last_seq().unwrap();
    let events = audit.events_in_range(0, last).unwrap();
    assert_eq!(
        events.last().unwrap().event_type,
        AuditEventType::ApprovalRefused
    );
}
