//! Contradiction analysis over generated audit text.
//!
//! Three independent analyzers (semantic, numerical, temporal) plus a
//! cross-document pass; their merged findings roll up into a consistency
//! score. Embeddings come from an external provider behind a trait.

pub mod detector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use detector::ContradictionDetector;

/// External embedding capability. The detector never loads a model
/// itself; it only needs vectors to compare.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionSeverity {
    /// Direct logical contradiction; must be resolved.
    Critical,
    /// Likely contradiction; review required.
    High,
    /// Possible contradiction; verify.
    Medium,
    /// Minor inconsistency; consider clarifying.
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    Semantic,
    Numerical,
    Temporal,
    CrossDocument,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocRef {
    pub document_id: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub severity: ContradictionSeverity,
    pub kind: AnalyzerKind,
    pub statement1: String,
    pub statement2: String,
    pub explanation: String,
    pub confidence: f64,
    pub location1: Option<DocRef>,
    pub location2: Option<DocRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContradictionReport {
    pub has_contradictions: bool,
    pub contradiction_count: usize,
    pub critical_count: usize,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    pub contradictions: Vec<Contradiction>,
    /// 0..=1; higher is more internally consistent.
    pub overall_consistency_score: f64,
    pub recommendation: String,
}

impl ContradictionReport {
    pub fn from_contradictions(contradictions: Vec<Contradiction>) -> Self {
        let count_of = |severity| {
            contradictions
                .iter()
                .filter(|c| c.severity == severity)
                .count()
        };
        let critical = count_of(ContradictionSeverity::Critical);
        let high = count_of(ContradictionSeverity::High);
        let medium = count_of(ContradictionSeverity::Medium);
        let low = count_of(ContradictionSeverity::Low);

        let score = 1.0
            - 0.20 * critical as f64
            - 0.10 * high as f64
            - 0.05 * medium as f64
            - 0.02 * low as f64;
        let score = score.clamp(0.0, 1.0);

        let recommendation = if critical > 0 {
            format!(
                "CRITICAL: {critical} critical contradiction(s) detected. Do not finalize until resolved; manual reviewer sign-off required."
            )
        } else if high > 0 {
            format!(
                "WARNING: {high} high-severity contradiction(s) found. Resolve before finalization."
            )
        } else if !contradictions.is_empty() {
            format!(
                "REVIEW: {} potential inconsistency(ies) detected. Review before sign-off.",
                contradictions.len()
            )
        } else {
            format!("PASS: no contradictions detected (score: {score:.3}).")
        };

        Self {
            has_contradictions: !contradictions.is_empty(),
            contradiction_count: contradictions.len(),
            critical_count: critical,
            high_count: high,
            medium_count: medium,
            low_count: low,
            contradictions,
            overall_consistency_score: (score * 1000.0).round() / 1000.0,
            recommendation,
        }
    }
}

/// A document fed to the cross-document analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub title: String,
    pub content: String,
}
