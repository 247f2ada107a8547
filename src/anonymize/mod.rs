//! Anonymization core: PII detection, deterministic tokenization, the
//! reverse-map vault, and the post-state validator.

pub mod engine;
pub mod tokens;
pub mod validator;

pub use engine::{AnonymizationMeta, Anonymizer};
pub use tokens::{deterministic_token, random_token, TokenVault};
pub use validator::validate_anonymization;
