//! Retention classification for audit events.
//!
//! Durations follow the platform's compliance floor: authentication events
//! one to two years, security alerts two years, financial data
//! modifications seven years, and a seven-year default for everything
//! else. Deployments may override individual event types at startup.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use super::AuditEventType;

#[derive(Debug, Clone, Default)]
pub struct RetentionPolicy {
    overrides: HashMap<AuditEventType, Duration>,
}

impl RetentionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an override spec of the form
    /// `login_success=365,security_alert=1095` (days per event type).
    /// Unknown types and unparseable entries are skipped with a warning.
    pub fn from_spec(spec: &str) -> Self {
        let mut overrides = HashMap::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((event_type, days)) = entry.split_once('=') else {
                warn!(entry, "ignoring malformed retention override");
                continue;
            };
            let (Ok(event_type), Ok(days)) = (
                AuditEventType::from_str(event_type.trim()),
                days.trim().parse::<i64>(),
            ) else {
                warn!(entry, "ignoring unparseable retention override");
                continue;
            };
            overrides.insert(event_type, Duration::days(days));
        }
        Self { overrides }
    }

    pub fn with_override(mut self, event_type: AuditEventType, days: i64) -> Self {
        self.overrides.insert(event_type, Duration::days(days));
        self
    }

    /// Retention duration for an event type: the configured override, or
    /// the compiled-in floor.
    pub fn period(&self, event_type: AuditEventType) -> Duration {
        self.overrides
            .get(&event_type)
            .copied()
            .unwrap_or_else(|| Self::default_period(event_type))
    }

    /// An event is an archival candidate once it is older than its
    /// retention duration. Archival moves it to cold storage while
    /// preserving hash linkage; it never deletes.
    pub fn should_archive(&self, event_type: AuditEventType, ts: DateTime<Utc>) -> bool {
        self.should_archive_at(event_type, ts, Utc::now())
    }

    pub fn should_archive_at(
        &self,
        event_type: AuditEventType,
        ts: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        now - ts > self.period(event_type)
    }

    /// The default retention floor.
    pub fn default_period(event_type: AuditEventType) -> Duration {
        use AuditEventType::*;
        let days = match event_type {
            LoginSuccess | Logout => 365,
            LoginFailure | PasswordChange | MfaEnabled => 730,
            SecurityAlert | UnauthorizedAccess | PrivilegeEscalation | SuspiciousActivity => 730,
            DataCreate | DataUpdate | DataDelete | DataExport => 2555,
            TransactionCreated | TransactionApproved | PaymentProcessed => 2555,
            RecordCreated | RecordStateChanged | AnonymizationPerformed | ApprovalRefused
            | DatasetCreated | ModelTrained | TokenMapRead => 2555,
            // Default floor: 7 years.
            _ => 2555,
        };
        Duration::days(days)
    }
}
