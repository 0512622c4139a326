//! Chart type selection for a prompt.
//!
//! The external classifier is consulted for its signal only; the label comes
//! from keyword rules. Nothing in here can fail a request.

pub mod cache;
pub mod providers;

use serde::Serialize;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::pipeline::sanitizer::SanitizedPrompt;
use cache::LabelCache;
use providers::TextClassifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationLabel {
    Line,
    Bar,
    Histogram,
    Pie,
}

impl VisualizationLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisualizationLabel::Line => "line",
            VisualizationLabel::Bar => "bar",
            VisualizationLabel::Histogram => "histogram",
            VisualizationLabel::Pie => "pie",
        }
    }
}

impl fmt::Display for VisualizationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier disabled")]
    Disabled,

    #[error("classifier request failed: {0}")]
    Request(String),

    #[error("classifier response invalid: {0}")]
    Response(String),

    #[error("classifier configuration error: {0}")]
    Config(String),

    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),
}

const TREND_WORDS: &[&str] = &[
    "trend", "trends", "trending", "evolution", "evolve", "evolves", "evolved", "timeline",
    "growth", "daily", "weekly", "monthly", "quarterly", "yearly", "annually", "historical",
];
const TREND_PHRASES: &[&str] = &["over time", "time series"];

const DISTRIBUTION_WORDS: &[&str] = &[
    "distribution", "distributions", "distributed", "frequency", "frequencies", "histogram",
    "spread",
];

const PROPORTION_WORDS: &[&str] = &[
    "proportion", "proportions", "percentage", "percentages", "percent", "ratio", "ratios",
    "share", "shares", "breakdown", "composition",
];

const COMPARISON_WORDS: &[&str] = &[
    "compare", "compared", "comparing", "comparison", "versus", "vs", "top", "rank", "ranking",
    "highest", "lowest", "best", "worst",
];

/// Keyword rules in precedence order; the first rule with a hit wins.
const RULES: &[(VisualizationLabel, &[&str], &[&str])] = &[
    (VisualizationLabel::Line, TREND_WORDS, TREND_PHRASES),
    (VisualizationLabel::Histogram, DISTRIBUTION_WORDS, &[]),
    (VisualizationLabel::Pie, PROPORTION_WORDS, &["%"]),
    (VisualizationLabel::Bar, COMPARISON_WORDS, &[]),
];

pub const DEFAULT_LABEL: VisualizationLabel = VisualizationLabel::Bar;

/// Deterministic keyword rules, falling back to [`DEFAULT_LABEL`].
pub fn label_from_keywords(prompt: &str) -> VisualizationLabel {
    let lower = prompt.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    RULES
        .iter()
        .find(|(_, keywords, phrases)| {
            words.iter().any(|w| keywords.contains(w)) || phrases.iter().any(|p| lower.contains(p))
        })
        .map(|(label, _, _)| *label)
        .unwrap_or(DEFAULT_LABEL)
}

pub struct VisualizationClassifier {
    classifier: Arc<dyn TextClassifier>,
    cache: LabelCache,
    timeout: Duration,
}

impl VisualizationClassifier {
    pub fn new(
        classifier: Arc<dyn TextClassifier>,
        cache_size: NonZeroUsize,
        timeout: Duration,
    ) -> Self {
        Self {
            classifier,
            cache: LabelCache::new(cache_size),
            timeout,
        }
    }

    pub async fn classify(&self, prompt: &SanitizedPrompt) -> VisualizationLabel {
        if let Some(label) = self.cache.get(prompt.as_str()) {
            debug!("Visualization cache hit: {}", label);
            return label;
        }

        match self.signal(prompt.as_str()).await {
            Ok(output) => debug!(
                "Classifier {} scored prompt as {} ({:.3})",
                self.classifier.name(),
                output.label,
                output.score
            ),
            Err(ClassifierError::Disabled) => {}
            Err(e) => warn!("Text classification unavailable: {}", e),
        }

        let label = label_from_keywords(prompt.as_str());
        self.cache.insert(prompt.as_str(), label);
        label
    }

    pub fn cached_labels(&self) -> usize {
        self.cache.len()
    }

    async fn signal(&self, text: &str) -> Result<providers::ClassifierOutput, ClassifierError> {
        tokio::time::timeout(self.timeout, self.classifier.classify(text))
            .await
            .map_err(|_| ClassifierError::Timeout(self.timeout))?
    }
}
