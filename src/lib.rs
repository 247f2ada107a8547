//! FinTrain Backend Library
//!
//! Privacy-preserving training-data pipeline for financial AI: filing
//! acquisition, anonymization with a provable PII-free post-state, a
//! hash-chained audit log, training-data lifecycle governance, and the
//! statistical sampling engine.

pub mod anonymize;
pub mod audit;
pub mod config;
pub mod contradiction;
pub mod errors;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod quality;
pub mod sampling;
pub mod scrapers;
pub mod training;

pub use config::Settings;
pub use errors::{LifecycleOutcome, PipelineError};
