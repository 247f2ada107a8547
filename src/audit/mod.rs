//! Hash-chained audit log.
//!
//! Every lifecycle decision in the pipeline lands here as an append-only
//! event; each event embeds the hash of its predecessor so any retroactive
//! edit invalidates every subsequent hash.

pub mod canonical;
pub mod chain;
pub mod retention;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use chain::{AuditChain, ChainVerification};
pub use retention::RetentionPolicy;

/// Everything the platform audits, governance and security alike. The
/// security/authentication kinds exist so the retention classifier covers
/// events recorded by the outer services sharing this chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Authentication
    LoginSuccess,
    LoginFailure,
    Logout,
    PasswordChange,
    MfaEnabled,
    // Data operations
    DataRead,
    DataCreate,
    DataUpdate,
    DataDelete,
    DataExport,
    // Financial operations
    TransactionCreated,
    TransactionApproved,
    PaymentProcessed,
    // Security
    UnauthorizedAccess,
    PrivilegeEscalation,
    SuspiciousActivity,
    SecurityAlert,
    // Training-data governance
    RecordCreated,
    RecordStateChanged,
    AnonymizationPerformed,
    ApprovalRefused,
    DatasetCreated,
    ModelTrained,
    IntegrityCheck,
    TokenMapRead,
    // Operations
    ServiceStarted,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::LoginSuccess => "login_success",
            AuditEventType::LoginFailure => "login_failure",
            AuditEventType::Logout => "logout",
            AuditEventType::PasswordChange => "password_change",
            AuditEventType::MfaEnabled => "mfa_enabled",
            AuditEventType::DataRead => "data_read",
            AuditEventType::DataCreate => "data_create",
            AuditEventType::DataUpdate => "data_update",
            AuditEventType::DataDelete => "data_delete",
            AuditEventType::DataExport => "data_export",
            AuditEventType::TransactionCreated => "transaction_created",
            AuditEventType::TransactionApproved => "transaction_approved",
            AuditEventType::PaymentProcessed => "payment_processed",
            AuditEventType::UnauthorizedAccess => "unauthorized_access",
            AuditEventType::PrivilegeEscalation => "privilege_escalation",
            AuditEventType::SuspiciousActivity => "suspicious_activity",
            AuditEventType::SecurityAlert => "security_alert",
            AuditEventType::RecordCreated => "record_created",
            AuditEventType::RecordStateChanged => "record_state_changed",
            AuditEventType::AnonymizationPerformed => "anonymization_performed",
            AuditEventType::ApprovalRefused => "approval_refused",
            AuditEventType::DatasetCreated => "dataset_created",
            AuditEventType::ModelTrained => "model_trained",
            AuditEventType::IntegrityCheck => "integrity_check",
            AuditEventType::TokenMapRead => "token_map_read",
            AuditEventType::ServiceStarted => "service_started",
        }
    }
}

impl FromStr for AuditEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use AuditEventType::*;
        Ok(match s {
            "login_success" => LoginSuccess,
            "login_failure" => LoginFailure,
            "logout" => Logout,
            "password_change" => PasswordChange,
            "mfa_enabled" => MfaEnabled,
            "data_read" => DataRead,
            "data_create" => DataCreate,
            "data_update" => DataUpdate,
            "data_delete" => DataDelete,
            "data_export" => DataExport,
            "transaction_created" => TransactionCreated,
            "transaction_approved" => TransactionApproved,
            "payment_processed" => PaymentProcessed,
            "unauthorized_access" => UnauthorizedAccess,
            "privilege_escalation" => PrivilegeEscalation,
            "suspicious_activity" => SuspiciousActivity,
            "security_alert" => SecurityAlert,
            "record_created" => RecordCreated,
            "record_state_changed" => RecordStateChanged,
            "anonymization_performed" => AnonymizationPerformed,
            "approval_refused" => ApprovalRefused,
            "dataset_created" => DatasetCreated,
            "model_trained" => ModelTrained,
            "integrity_check" => IntegrityCheck,
            "token_map_read" => TokenMapRead,
            "service_started" => ServiceStarted,
            other => return Err(format!("unknown audit event type: {other}")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "info",
            AuditSeverity::Warning => "warning",
            AuditSeverity::Critical => "critical",
            AuditSeverity::Emergency => "emergency",
        }
    }
}

impl FromStr for AuditSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(AuditSeverity::Info),
            "warning" => Ok(AuditSeverity::Warning),
            "critical" => Ok(AuditSeverity::Critical),
            "emergency" => Ok(AuditSeverity::Emergency),
            other => Err(format!("unknown audit severity: {other}")),
        }
    }
}

/// A persisted, hash-linked audit event. Never mutated after write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub tenant_id: Option<String>,
    pub actor_id: Option<String>,
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub resource_type: String,
    pub resource_id: String,
    pub action: String,
    pub changes: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub prev_hash: String,
    pub self_hash: String,
}

/// What a caller supplies; the chain assigns id, seq, ts and hashes.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub tenant_id: Option<String>,
    pub actor_id: Option<String>,
    pub resource_type: String,
    pub resource_id: String,
    pub action: String,
    pub changes: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

impl EventDraft {
    pub fn new(
        event_type: AuditEventType,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            severity: AuditSeverity::Info,
            tenant_id: None,
            actor_id: None,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            action: action.into(),
            changes: None,
            metadata: None,
        }
    }

    pub fn severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn actor(mut self, actor_id: Option<String>) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn changes(mut self, changes: serde_json::Value) -> Self {
        self.changes = Some(changes);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
