//! Duplicate-send guard.
//!
//! Before sending, the agent diffs the channel's delivered history against
//! the canonical message sequence and only sends the steps that are not
//! already present. Matching is fingerprint-first (distinctive substrings
//! unique to one step), then exact text, then normalized edit-distance
//! similarity. A false positive here loses content permanently, so
//! price-bearing steps never match on similarity alone.

use herald_data::ChannelMessage;
use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;

/// One step of the canonical outreach sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    /// Known text variants of this step; the first is sent.
    pub variants: Vec<String>,
    /// Distinctive substrings that appear only in this step (e.g. a price
    /// token). Checked before similarity and never across steps.
    #[serde(default)]
    pub fingerprints: Vec<String>,
    /// Steps carrying pricing require a fingerprint or exact match;
    /// similarity alone never marks them as sent.
    #[serde(default)]
    pub price_bearing: bool,
}

impl SequenceStep {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            variants: vec![text.into()],
            fingerprints: Vec::new(),
            price_bearing: false,
        }
    }
}

/// Lowercase and collapse whitespace so formatting differences do not
/// defeat matching.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
pub struct DuplicateGuard {
    similarity_threshold: f64,
}

impl Default for DuplicateGuard {
    fn default() -> Self {
        Self::new(0.85)
    }
}

impl DuplicateGuard {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
        }
    }

    /// Indices of sequence steps NOT yet present in `history`, in
    /// canonical order. Only outbound messages count as sent.
    pub fn diff(&self, history: &[ChannelMessage], sequence: &[SequenceStep]) -> Vec<usize> {
        let sent: Vec<String> = history
            .iter()
            .filter(|m| m.outbound)
            .map(|m| normalize(&m.text))
            .collect();

        sequence
            .iter()
            .enumerate()
            .filter(|(_, step)| !self.step_already_sent(step, &sent))
            .map(|(i, _)| i)
            .collect()
    }

    fn step_already_sent(&self, step: &SequenceStep, sent: &[String]) -> bool {
        // Fingerprints first: cheap, and robust to paraphrased variants.
        for fingerprint in &step.fingerprints {
            let fp = normalize(fingerprint);
            if !fp.is_empty() && sent.iter().any(|text| text.contains(&fp)) {
                return true;
            }
        }

        // Exact variant match.
        for variant in &step.variants {
            let v = normalize(variant);
            if !v.is_empty() && sent.iter().any(|text| *text == v) {
                return true;
            }
        }

        if step.price_bearing {
            return false;
        }

        // Fuzzy match against any variant.
        for variant in &step.variants {
            let v = normalize(variant);
            if v.is_empty() {
                continue;
            }
            if sent
                .iter()
                .any(|text| normalized_levenshtein(text, &v) >= self.similarity_threshold)
            {
                return true;
            }
        }
        false
    }
}
