//! Token generation and the reverse-map vault.
//!
//! Tokens are deterministic keyed digests, so the same (secret, plaintext)
//! pair yields the same token in every run and every process. The reverse
//! mapping is itself sensitive: it lives in its own access-mediated store,
//! encrypted with AES-256-GCM under a process-scoped key, and every reveal
//! is written to the audit chain.

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::audit::canonical::format_ts;
use crate::audit::{AuditChain, AuditEventType, AuditSeverity, EventDraft};
use crate::errors::PipelineError;
use crate::models::PiiKind;

/// Deterministic reversible token: `[KIND_hex8(SHA256(secret:plaintext))]`.
pub fn deterministic_token(secret: &str, plaintext: &str, kind: PiiKind) -> String {
    let digest = Sha256::digest(format!("{secret}:{plaintext}").as_bytes());
    let hex8 = &hex::encode(digest)[..8];
    format!("[{}_{}]", kind.token_label(), hex8)
}

/// Irreversible token: random 8-hex suffix, no reverse mapping stored.
pub fn random_token(kind: PiiKind) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("[{}_{}]", kind.token_label(), &suffix[..8])
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS token_map (
    token      TEXT PRIMARY KEY,
    pii_kind   TEXT NOT NULL,
    nonce      BLOB NOT NULL,
    ciphertext BLOB NOT NULL,
    created_at TEXT NOT NULL
);
";

/// Access-restricted keyed store for `token -> ciphertext(plaintext)`.
/// Append-only for new tokens, read-only thereafter.
pub struct TokenVault {
    conn: Mutex<Connection>,
    cipher: Aes256Gcm,
    audit: Option<AuditChain>,
}

impl TokenVault {
    /// Open the vault with a 32-byte AEAD key. Pass the audit chain so
    /// every reverse-map read leaves a trail.
    pub fn open(db_path: &str, key: &[u8; 32], audit: Option<AuditChain>) -> Result<Arc<Self>> {
        let conn = Connection::open(db_path).context("open token vault db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.execute_batch(SCHEMA_SQL).context("create token vault schema")?;

        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
            audit,
        }))
    }

    /// Derive a process-scoped vault key from configuration: an explicit
    /// hex key when provided, otherwise a digest of the tokenization secret.
    pub fn derive_key(vault_key_hex: Option<&str>, tokenization_secret: &str) -> [u8; 32] {
        if let Some(hex_key) = vault_key_hex {
            if let Ok(bytes) = hex::decode(hex_key) {
                if bytes.len() == 32 {
                    let mut key = [0u8; 32];
                    key.copy_from_slice(&bytes);
                    return key;
                }
            }
            warn!("TOKEN_VAULT_KEY is not 32 hex-encoded bytes; deriving from secret instead");
        }
        Sha256::digest(format!("vault-key:{tokenization_secret}").as_bytes()).into()
    }

    /// Record a new token mapping. Idempotent: the same token maps to the
    /// same plaintext by construction, so replays are ignored.
    pub fn store(
        &self,
        token: &str,
        kind: PiiKind,
        plaintext: &str,
    ) -> Result<(), PipelineError> {
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| PipelineError::Anonymization("vault encryption failed".into()))?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO token_map (token, pii_kind, nonce, ciphertext, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                token,
                kind.as_str(),
                nonce_bytes.to_vec(),
                ciphertext,
                format_ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Decrypt the plaintext behind a token. Authorized callers only; the
    /// read itself is an auditable event.
    pub fn reveal(&self, token: &str, actor_id: &str) -> Result<Option<String>, PipelineError> {
        let row: Option<(Vec<u8>, Vec<u8>)> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT nonce, ciphertext FROM token_map WHERE token = ?1",
                params![token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        if let Some(audit) = &self.audit {
            audit.append(
                EventDraft::new(
                    AuditEventType::TokenMapRead,
                    "token_map",
                    token,
                    "reverse mapping read",
                )
                .severity(AuditSeverity::Warning)
                .actor(Some(actor_id.to_string())),
            )?;
        }

        let Some((nonce_bytes, ciphertext)) = row else {
            return Ok(None);
        };

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| PipelineError::Anonymization("vault decryption failed".into()))?;

        Ok(Some(String::from_utf8(plaintext).map_err(|_| {
            PipelineError::Anonymization("vault plaintext is not utf-8".into())
        })?))
    }

    pub fn len(&self) -> Result<usize, PipelineError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM token_map", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, PipelineError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_vault() -> (tempfile::TempDir, Arc<TokenVault>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");
        let key = TokenVault::derive_key(None, "test-secret");
        let vault = TokenVault::open(path.to_str().unwrap(), &key, None).unwrap();
        (dir, vault)
    }

    #[test]
    fn deterministic_tokens_are_stable() {
        let t1 = deterministic_token("s", "Acme Inc", PiiKind::CompanyName);
        let t2 = deterministic_token("s", "Acme Inc", PiiKind::CompanyName);
        assert_eq!(t1, t2);
        assert!(t1.starts_with("[COMPANY_NAME_"));
        assert!(t1.ends_with(']'));
        // [ + label + _ + 8 hex + ]
        assert_eq!(t1.len(), 1 + "COMPANY_NAME".len() + 1 + 8 + 1);
    }

    #[test]
    fn different_secrets_give_different_tokens() {
        let t1 = deterministic_token("s1", "Acme Inc", PiiKind::CompanyName);
        let t2 = deterministic_token("s2", "Acme Inc", PiiKind::CompanyName);
        assert_ne!(t1, t2);
    }

    #[test]
    fn random_tokens_differ() {
        let t1 = random_token(PiiKind::Email);
        let t2 = random_token(PiiKind::Email);
        assert_ne!(t1, t2);
        assert!(t1.starts_with("[EMAIL_"));
    }

    #[test]
    fn vault_round_trips_plaintext() {
        let (_dir, vault) = temp_vault();
        let token = deterministic_token("s", "cfo@acme.com", PiiKind::Email);
        vault.store(&token, PiiKind::Email, "cfo@acme.com").unwrap();

        let revealed = vault.reveal(&token, "auditor-1").unwrap();
        assert_eq!(revealed.as_deref(), Some("cfo@acme.com"));
    }

    #[test]
    fn vault_store_is_idempotent() {
        let (_dir, vault) = temp_vault();
        let token = deterministic_token("s", "Acme Inc", PiiKind::CompanyName);
        vault.store(&token, PiiKind::CompanyName, "Acme Inc").unwrap();
        vault.store(&token, PiiKind::CompanyName, "Acme Inc").unwrap();
        assert_eq!(vault.len().unwrap(), 1);
    }

    #[test]
    fn unknown_token_reveals_nothing() {
        let (_dir, vault) = temp_vault();
        assert!(vault.reveal("[EMAIL_deadbeef]", "auditor-1").unwrap().is_none());
    }

    #[test]
    fn reveal_is_audited() {
        let dir = tempfile::tempdir().unwrap();
        let chain = AuditChain::open(dir.path().join("audit.db").to_str().unwrap()).unwrap();
        let key = TokenVault::derive_key(None, "s");
        let vault = TokenVault::open(
            dir.path().join("vault.db").to_str().unwrap(),
            &key,
            Some(chain.clone()),
        )
        .unwrap();

        let token = deterministic_token("s", "Acme Inc", PiiKind::CompanyName);
        vault.store(&token, PiiKind::CompanyName, "Acme Inc").unwrap();
        vault.reveal(&token, "auditor-1").unwrap();

        let events = chain.events_in_range(0, 0).unwrap();
        assert_eq!(events[0].event_type, AuditEventType::TokenMapRead);
        assert_eq!(events[0].actor_id.as_deref(), Some("auditor-1"));
    }

    #[test]
    fn derive_key_accepts_explicit_hex() {
        let hex_key = "00".repeat(32);
        let key = TokenVault::derive_key(Some(&hex_key), "ignored");
        assert_eq!(key, [0u8; 32]);
    }
}
