//! The analyzers behind contradiction reports.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use nalgebra::DVector;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tracing::debug;

use super::{
    AnalyzerKind, Contradiction, ContradictionReport, ContradictionSeverity, DocRef,
    EmbeddingProvider, SourceDocument,
};

/// Cosine similarity above which two sentences are "about the same thing".
const SEMANTIC_THRESHOLD: f64 = 0.8;
/// Looser threshold for cross-document conclusion comparison.
const CROSS_DOC_THRESHOLD: f64 = 0.7;
/// Sentences shorter than this carry too little signal to compare.
const MIN_SENTENCE_CHARS: usize = 20;
/// Context window around temporal markers.
const TEMPORAL_WINDOW: usize = 50;
/// Word-overlap ratio above which two contexts share a subject.
const TEMPORAL_OVERLAP: f64 = 0.3;

/// Words that flip the meaning of an assertion.
static NEGATION_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "not", "no", "never", "none", "neither", "nor", "cannot", "can't", "don't", "doesn't",
        "didn't", "won't", "wouldn't", "couldn't", "shouldn't", "hasn't", "haven't", "hadn't",
        "isn't", "aren't", "wasn't", "weren't", "without", "lacking", "absence", "fail", "failed",
    ]
    .into_iter()
    .collect()
});

/// Term pairs that read as opposites in audit prose.
static OPPOSING_PAIRS: &[(&str, &str)] = &[
    ("increase", "decrease"),
    ("gain", "loss"),
    ("profit", "loss"),
    ("asset", "liability"),
    ("credit", "debit"),
    ("overstated", "understated"),
    ("compliant", "non-compliant"),
    ("compliant", "violation"),
    ("adequate", "inadequate"),
    ("sufficient", "insufficient"),
    ("reliable", "unreliable"),
    ("accurate", "inaccurate"),
    ("material", "immaterial"),
    ("significant", "insignificant"),
    ("present", "absent"),
    ("exists", "does not exist"),
    ("confirm", "deny"),
    ("support", "contradict"),
];

static SENTENCE_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+").expect("sentence regex"));

static METRIC_VALUE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(
        r"(\w+(?:\s+\w+){0,3})\s+(?:is|equals?|of|totals?|amounts? to)\s+\$?([\d,]+(?:\.\d{2})?)",
    )
    .case_insensitive(true)
    .build()
    .expect("metric regex")
});

static TEMPORAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?:before|prior to|preceding)\s+[A-Za-z]+ \d{1,2},? \d{4}",
        r"(?:after|following|subsequent to)\s+[A-Za-z]+ \d{1,2},? \d{4}",
        r"(?:on|dated)\s+[A-Za-z]+ \d{1,2},? \d{4}",
        r"(?:in|during)\s+(?:fiscal year|FY|year)\s+\d{4}",
    ]
    .iter()
    .map(|pattern| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("temporal regex")
    })
    .collect()
});

static CONCLUSION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?:Conclusion|Summary|Finding|Opinion|Assessment):\s*([^\n]+)",
        r"We (?:conclude|find|determined) that\s+([^.]+)",
        r"Based on (?:our|the) (?:review|analysis|procedures)[,:]?\s+([^.]+)",
    ]
    .iter()
    .map(|pattern| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("conclusion regex")
    })
    .collect()
});

pub struct ContradictionDetector {
    embeddings: Arc<dyn EmbeddingProvider>,
}

impl ContradictionDetector {
    pub fn new(embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embeddings }
    }

    /// Full analysis of one body of text: semantic + numerical + temporal.
    pub async fn analyze_text(&self, text: &str) -> Result<ContradictionReport> {
        let mut all = Vec::new();

        let sentences: Vec<String> = SENTENCE_SPLIT
            .split(text)
            .map(str::trim)
            .filter(|s| s.len() > MIN_SENTENCE_CHARS)
            .map(str::to_string)
            .collect();
        if sentences.len() >= 2 {
            all.extend(self.semantic_contradictions(&sentences).await?);
        }

        all.extend(numerical_contradictions(text));
        all.extend(temporal_contradictions(text));

        let report = ContradictionReport::from_contradictions(all);
        debug!(
            count = report.contradiction_count,
            score = report.overall_consistency_score,
            "contradiction analysis complete"
        );
        Ok(report)
    }

    /// Compare conclusions across workpapers for inconsistent findings.
    pub async fn analyze_documents(
        &self,
        documents: &[SourceDocument],
    ) -> Result<ContradictionReport> {
        if documents.len() < 2 {
            return Ok(ContradictionReport::from_contradictions(Vec::new()));
        }

        let mut conclusions: Vec<(String, DocRef)> = Vec::new();
        for doc in documents {
            for pattern in CONCLUSION_PATTERNS.iter() {
                for caps in pattern.captures_iter(&doc.content) {
                    if let Some(text) = caps.get(1) {
                        let conclusion = text.as_str().trim();
                        if conclusion.len() > MIN_SENTENCE_CHARS {
                            conclusions.push((
                                conclusion.chars().take(500).collect(),
                                DocRef {
                                    document_id: doc.id.clone(),
                                    title: doc.title.clone(),
                                },
                            ));
                        }
                    }
                }
            }
        }

        if conclusions.len() < 2 {
            return Ok(ContradictionReport::from_contradictions(Vec::new()));
        }

        let texts: Vec<String> = conclusions.iter().map(|(text, _)| text.clone()).collect();
        let vectors = self.embeddings.embed(&texts).await?;

        let mut findings = Vec::new();
        for i in 0..conclusions.len() {
            for j in (i + 1)..conclusions.len() {
                let similarity = cosine_similarity(&vectors[i], &vectors[j]);
                if similarity <= CROSS_DOC_THRESHOLD {
                    continue;
                }
                let (text1, loc1) = &conclusions[i];
                let (text2, loc2) = &conclusions[j];
                if has_negation_mismatch(text1, text2) || has_opposing_terms(text1, text2) {
                    findings.push(Contradiction {
                        severity: ContradictionSeverity::Critical,
                        kind: AnalyzerKind::CrossDocument,
                        statement1: text1.clone(),
                        statement2: text2.clone(),
                        explanation: format!(
                            "Contradictory conclusions between '{}' and '{}'; verify consistency across workpapers.",
                            loc1.title, loc2.title
                        ),
                        confidence: 0.85,
                        location1: Some(loc1.clone()),
                        location2: Some(loc2.clone()),
                    });
                }
            }
        }

        Ok(ContradictionReport::from_contradictions(findings))
    }

    /// Sentence pairs that are semantically close but carry opposing
    /// assertions.
    async fn semantic_contradictions(
        &self,
        sentences: &[String],
    ) -> Result<Vec<Contradiction>> {
        let vectors = self.embeddings.embed(sentences).await?;
        let mut findings = Vec::new();

        for i in 0..sentences.len() {
            for j in (i + 1)..sentences.len() {
                let similarity = cosine_similarity(&vectors[i], &vectors[j]);
                if similarity <= SEMANTIC_THRESHOLD {
                    continue;
                }

                let negation = has_negation_mismatch(&sentences[i], &sentences[j]);
                let opposing = has_opposing_terms(&sentences[i], &sentences[j]);
                if !negation && !opposing {
                    continue;
                }

                let (severity, confidence) = if negation && opposing {
                    (ContradictionSeverity::Critical, 0.95)
                } else if negation {
                    (ContradictionSeverity::High, 0.85)
                } else {
                    (ContradictionSeverity::Medium, 0.70)
                };

                let mut explanation = format!(
                    "Statements are semantically similar ({similarity:.2}) but express opposing meanings. "
                );
                if negation {
                    explanation.push_str("One statement negates what the other asserts. ");
                }
                if opposing {
                    explanation.push_str("Statements contain opposing terms. ");
                }
                explanation.push_str("Review for logical consistency.");

                findings.push(Contradiction {
                    severity,
                    kind: AnalyzerKind::Semantic,
                    statement1: sentences[i].clone(),
                    statement2: sentences[j].clone(),
                    explanation,
                    confidence,
                    location1: None,
                    location2: None,
                });
            }
        }

        Ok(findings)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let va = DVector::from_iterator(a.len(), a.iter().map(|x| f64::from(*x)));
    let vb = DVector::from_iterator(b.len(), b.iter().map(|x| f64::from(*x)));
    let denom = va.norm() * vb.norm();
    if denom == 0.0 {
        return 0.0;
    }
    va.dot(&vb) / denom
}

/// True when exactly one of the two statements carries a negation token.
fn has_negation_mismatch(a: &str, b: &str) -> bool {
    let count = |text: &str| {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|word| NEGATION_WORDS.contains(word))
            .count()
    };
    (count(a) > 0) != (count(b) > 0)
}

/// True when one statement contains a term and the other its opposite.
fn has_opposing_terms(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    OPPOSING_PAIRS.iter().any(|(term1, term2)| {
        (a.contains(term1) && b.contains(term2)) || (a.contains(term2) && b.contains(term1))
    })
}

/// The same metric reported with two different values is a hard error.
pub fn numerical_contradictions(text: &str) -> Vec<Contradiction> {
    let mut seen: HashMap<String, f64> = HashMap::new();
    let mut findings = Vec::new();

    for caps in METRIC_VALUE.captures_iter(text) {
        let (Some(metric), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let metric_key = metric.as_str().trim().to_lowercase();
        let Ok(value_num) = value.as_str().replace(',', "").parse::<f64>() else {
            continue;
        };

        match seen.get(&metric_key) {
            Some(&previous) if (value_num - previous).abs() > 0.01 => {
                findings.push(Contradiction {
                    severity: ContradictionSeverity::Critical,
                    kind: AnalyzerKind::Numerical,
                    statement1: format!("{} is ${previous:.2}", metric.as_str()),
                    statement2: format!("{} is ${value_num:.2}", metric.as_str()),
                    explanation: format!(
                        "Same metric '{}' given two different values; verify which is correct or whether they refer to different periods.",
                        metric.as_str()
                    ),
                    confidence: 0.90,
                    location1: None,
                    location2: None,
                });
            }
            Some(_) => {}
            None => {
                seen.insert(metric_key, value_num);
            }
        }
    }

    findings
}

/// Before/after markers over a shared subject with opposite polarity.
pub fn temporal_contradictions(text: &str) -> Vec<Contradiction> {
    let mut spans: Vec<(String, String)> = Vec::new();
    for pattern in TEMPORAL_PATTERNS.iter() {
        for found in pattern.find_iter(text) {
            let context_start = found.start().saturating_sub(TEMPORAL_WINDOW);
            let context_end = (found.end() + TEMPORAL_WINDOW).min(text.len());
            let context = clamp_to_char_boundaries(text, context_start, context_end);
            spans.push((found.as_str().to_string(), context.to_string()));
        }
    }

    let mut findings = Vec::new();
    for i in 0..spans.len() {
        for j in (i + 1)..spans.len() {
            let (marker1, context1) = &spans[i];
            let (marker2, context2) = &spans[j];

            if word_overlap(context1, context2) <= TEMPORAL_OVERLAP {
                continue;
            }

            let before = ["before", "prior", "preceding"];
            let after = ["after", "following", "subsequent"];
            let m1 = marker1.to_lowercase();
            let m2 = marker2.to_lowercase();
            let has_before = before.iter().any(|w| m1.contains(w));
            let has_after = after.iter().any(|w| m2.contains(w));

            if has_before && has_after {
                findings.push(Contradiction {
                    severity: ContradictionSeverity::High,
                    kind: AnalyzerKind::Temporal,
                    statement1: context1.clone(),
                    statement2: context2.clone(),
                    explanation: "Temporal contradiction: statements indicate conflicting time sequences for the same event or subject.".to_string(),
                    confidence: 0.75,
                    location1: None,
                    location2: None,
                });
            }
        }
    }

    findings
}

fn word_overlap(a: &str, b: &str) -> f64 {
    let words = |text: &str| -> HashSet<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect()
    };
    let wa = words(a);
    let wb = words(b);
    let union = wa.union(&wb).count();
    if union == 0 {
        return 0.0;
    }
    wa.intersection(&wb).count() as f64 / union as f64
}

fn clamp_to_char_boundaries(text: &str, mut start: usize, mut end: usize) -> &str {
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    &text[start.min(text.len())..end.min(text.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Every text maps to the same vector: all pairs are maximally similar.
    struct SameEmbedder;

    #[async_trait]
    impl EmbeddingProvider for SameEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    /// One-hot per index: all pairs are orthogonal.
    struct DistinctEmbedder;

    #[async_trait]
    impl EmbeddingProvider for DistinctEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let dim = texts.len();
            Ok((0..dim)
                .map(|i| {
                    let mut v = vec![0.0; dim];
                    v[i] = 1.0;
                    v
                })
                .collect())
        }
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn negation_mismatch_is_exclusive_or() {
        assert!(has_negation_mismatch(
            "controls are adequate",
            "controls are not adequate"
        ));
        assert!(!has_negation_mismatch(
            "controls are not adequate",
            "evidence is not sufficient"
        ));
        assert!(!has_negation_mismatch("all good", "still good"));
    }

    #[test]
    fn opposing_terms_are_detected_in_either_order() {
        assert!(has_opposing_terms(
            "revenue was overstated",
            "revenue was understated"
        ));
        assert!(has_opposing_terms(
            "reserves are inadequate",
            "reserves are adequate"
        ));
        assert!(!has_opposing_terms("all good", "still fine"));
    }

    #[tokio::test]
    async fn similar_sentences_with_negation_are_high_severity() {
        let detector = ContradictionDetector::new(Arc::new(SameEmbedder));
        let text = "The allowance for doubtful accounts is sufficient overall. \
                    The allowance for doubtful accounts is not sufficient overall.";
        let report = detector.analyze_text(text).await.unwrap();
        assert!(report.has_contradictions);
        // Negation and opposing pair (sufficient/insufficient not both
        // present; negation only) -> HIGH.
        assert!(report.high_count >= 1);
    }

    #[tokio::test]
    async fn dissimilar_sentences_are_not_compared() {
        let detector = ContradictionDetector::new(Arc::new(DistinctEmbedder));
        let text = "The inventory balance is fully adequate today. \
                    The weather in the region was not favorable this year.";
        let report = detector.analyze_text(text).await.unwrap();
        assert_eq!(report.contradiction_count, 0);
        assert_eq!(report.overall_consistency_score, 1.0);
    }

    #[test]
    fn numerical_conflicts_are_critical() {
        let text = "Total revenue is $1,000,000.00 for the year. \
                    Total revenue is $1,250,000.00 per the trial balance.";
        let findings = numerical_contradictions(text);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, ContradictionSeverity::Critical);
    }

    #[test]
    fn consistent_figures_do_not_alarm() {
        let text = "Total revenue is $500.00 for Q1. Total revenue is $500.00 in the recap.";
        assert!(numerical_contradictions(text).is_empty());
    }

    #[test]
    fn temporal_polarity_conflict_is_high() {
        let text = "The impairment charge was recorded before March 15, 2026 according to the controller. \
                    The impairment charge was recorded after March 15, 2026 per the audit trail.";
        let findings = temporal_contradictions(text);
        assert!(!findings.is_empty());
        assert_eq!(findings[0].severity, ContradictionSeverity::High);
    }

    #[tokio::test]
    async fn cross_document_conclusions_conflict() {
        let detector = ContradictionDetector::new(Arc::new(SameEmbedder));
        let docs = vec![
            SourceDocument {
                id: "wp-1".into(),
                title: "Revenue testing".into(),
                content: "Conclusion: revenue recognition controls are adequate and operating effectively".into(),
            },
            SourceDocument {
                id: "wp-2".into(),
                title: "Controls review".into(),
                content: "Conclusion: revenue recognition controls are inadequate and require remediation".into(),
            },
        ];
        let report = detector.analyze_documents(&docs).await.unwrap();
        assert_eq!(report.critical_count, 1);
        let finding = &report.contradictions[0];
        assert_eq!(finding.kind, AnalyzerKind::CrossDocument);
        assert_eq!(
            finding.location1.as_ref().unwrap().document_id,
            "wp-1"
        );
    }

    #[tokio::test]
    async fn score_stays_in_bounds_under_many_findings() {
        let detector = ContradictionDetector::new(Arc::new(SameEmbedder));
        let mut text = String::new();
        for i in 0..6 {
            text.push_str(&format!(
                "The reserve balance for region {i} is completely adequate. "
            ));
            text.push_str(&format!(
                "The reserve balance for region {i} is not adequate at all. "
            ));
        }
        let report = detector.analyze_text(&text).await.unwrap();
        assert!(report.overall_consistency_score >= 0.0);
        assert!(report.overall_consistency_score <= 1.0);
    }
}
