//! Startup configuration.
//!
//! Everything comes from the environment (with `.env` support) so the same
//! binary runs in dev and under orchestration without flag soup.

use std::env;
use std::time::Duration;

use anyhow::{bail, Result};

/// SEC fair-access policy ceiling. Configuring anything above this is a
/// startup error, not a warning.
pub const MAX_REQUESTS_PER_SECOND: u32 = 10;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Identification string sent as `User-Agent` on every outbound request.
    /// SEC-style sources reject anonymous crawlers, so this must be set.
    pub identification_header: String,
    pub rate_limit_per_second: u32,
    pub max_retries: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub request_timeout: Duration,
    /// Secret for deterministic tokenization (same input = same token).
    pub tokenization_secret: String,
    /// 32-byte key (hex) for the token reverse-map vault AEAD.
    pub vault_key_hex: Option<String>,
    pub audit_db_path: String,
    pub training_db_path: String,
    pub token_vault_db_path: String,
    /// Retention-table overrides, e.g. `login_success=365,security_alert=1095`.
    pub retention_overrides: Option<String>,
    /// Identifier of the external embedding provider handed to the
    /// contradiction detector's wiring (the core only needs the trait).
    pub embedding_provider: Option<String>,
    /// How many ingestion workers to run.
    pub ingest_workers: usize,
    /// Bounded queue depth between the intake and the workers.
    pub ingest_queue_depth: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let identification_header = env::var("EDGAR_IDENT_HEADER").unwrap_or_default();

        let rate_limit_per_second = env::var("RATE_LIMIT_PER_SECOND")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(MAX_REQUESTS_PER_SECOND);

        let max_retries = env::var("FETCH_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(3);

        let backoff_min_secs = env::var("FETCH_BACKOFF_MIN_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(2);
        let backoff_max_secs = env::var("FETCH_BACKOFF_MAX_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);

        let tokenization_secret = env::var("TOKENIZATION_SECRET")
            .unwrap_or_else(|_| "default_secret_change_in_production".to_string());

        let settings = Self {
            identification_header,
            rate_limit_per_second,
            max_retries,
            backoff_min: Duration::from_secs(backoff_min_secs),
            backoff_max: Duration::from_secs(backoff_max_secs),
            request_timeout: Duration::from_secs(30),
            tokenization_secret,
            vault_key_hex: env::var("TOKEN_VAULT_KEY").ok(),
            audit_db_path: env::var("AUDIT_DB_PATH")
                .unwrap_or_else(|_| "fintrain_audit.db".to_string()),
            training_db_path: env::var("TRAINING_DB_PATH")
                .unwrap_or_else(|_| "fintrain_training.db".to_string()),
            token_vault_db_path: env::var("TOKEN_VAULT_DB_PATH")
                .unwrap_or_else(|_| "fintrain_vault.db".to_string()),
            retention_overrides: env::var("RETENTION_OVERRIDES").ok(),
            embedding_provider: env::var("EMBEDDING_PROVIDER").ok(),
            ingest_workers: env::var("INGEST_WORKERS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|&v| v > 0)
                .unwrap_or(4),
            ingest_queue_depth: env::var("INGEST_QUEUE_DEPTH")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|&v| v > 0)
                .unwrap_or(256),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Fail fast on configurations a remote source would punish at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.identification_header.trim().is_empty() {
            bail!("EDGAR_IDENT_HEADER must be set: SEC-style sources require an identification header");
        }
        if self.rate_limit_per_second == 0 || self.rate_limit_per_second > MAX_REQUESTS_PER_SECOND {
            bail!(
                "RATE_LIMIT_PER_SECOND must be in 1..={} (got {})",
                MAX_REQUESTS_PER_SECOND,
                self.rate_limit_per_second
            );
        }
        if self.backoff_min > self.backoff_max {
            bail!("FETCH_BACKOFF_MIN_SECS must not exceed FETCH_BACKOFF_MAX_SECS");
        }
        Ok(())
    }

    /// Minimum spacing between request starts implied by the rate limit.
    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.rate_limit_per_second.max(1)))
    }
}
