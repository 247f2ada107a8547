//! Error taxonomy for the training-data pipeline.
//!
//! Every lifecycle consequence maps to one of these kinds; callers get a
//! stable `reason_code` they can branch on without string matching.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input failed structural checks. The record is not advanced.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The tokenization step itself failed. Retryable; the record stays
    /// parked in ANONYMIZING with the last error recorded.
    #[error("anonymization failed: {0}")]
    Anonymization(String),

    /// The validator found residual PII in anonymized output. The record
    /// transitions to REJECTED and a CRITICAL audit event is emitted.
    #[error("residual PII detected after anonymization: {0}")]
    AnonymizationLeak(String),

    /// Approval attempted with POOR quality. Approval refused, the record
    /// remains VALIDATED.
    #[error("quality floor not met: {0}")]
    QualityFloor(String),

    /// Fetch retries exhausted. The upstream caller may retry.
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    /// 4xx other than 429. The record is rejected with cause.
    #[error("permanent fetch failure (HTTP {status}): {url}")]
    PermanentFetch { status: u16, url: String },

    /// verify_range detected a broken link. Never recovered locally; the
    /// pipeline halts for the affected store.
    #[error("audit chain integrity violation at seq {first_bad_seq}")]
    ChainIntegrity { first_bad_seq: u64 },

    /// Cooperative cancellation. The in-flight record moves to REJECTED
    /// with reason CANCELLED.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid state-machine transition request.
    #[error("illegal transition from {from} via {action}")]
    IllegalTransition { from: String, action: String },

    /// Referenced record/dataset does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl PipelineError {
    /// Stable machine-readable reason code surfaced in lifecycle outcomes.
    pub fn reason_code(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "VALIDATION_FAILED",
            PipelineError::Anonymization(_) => "ANONYMIZATION_FAILED",
            PipelineError::AnonymizationLeak(_) => "ANONYMIZATION_LEAK",
            PipelineError::QualityFloor(_) => "QUALITY_FLOOR",
            PipelineError::TransientFetch(_) => "TRANSIENT_FETCH",
            PipelineError::PermanentFetch { .. } => "PERMANENT_FETCH",
            PipelineError::ChainIntegrity { .. } => "CHAIN_INTEGRITY",
            PipelineError::Cancelled => "CANCELLED",
            PipelineError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            PipelineError::NotFound { .. } => "NOT_FOUND",
            PipelineError::Storage(_) => "STORAGE",
        }
    }
}

/// Result of a lifecycle call as seen by external services: either the
/// operation took effect, or it reports a stable reason.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LifecycleOutcome {
    pub ok: bool,
    pub record_id: Option<String>,
    pub reason: Option<String>,
}

impl LifecycleOutcome {
    pub fn accepted(record_id: impl Into<String>) -> Self {
        Self {
            ok: true,
            record_id: Some(record_id.into()),
            reason: None,
        }
    }

    pub fn refused(record_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            record_id,
            reason: Some(reason.into()),
        }
    }
}
