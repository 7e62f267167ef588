// src/config/relevance.rs
//! Keyword packs, threshold table and override list for the relevance classifier.

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct RelevanceConfig {
    pub anchors: AnchorPacks,
    pub negatives: NegativePack,
    /// `(min_score, level)` rows; the highest level whose `min_score` is reached wins.
    pub thresholds: Vec<LevelThreshold>,
    /// Anchors that keep an item alive even when negatives hit.
    #[serde(default)]
    pub override_anchors: Vec<String>,
    #[serde(default = "default_override_min_level")]
    pub override_min_level: i64,
    /// Extra score for items whose `source.source_group` matches a key.
    #[serde(default)]
    pub source_group_boost: BTreeMap<String, f64>,
    /// Short alphabetic terms (<= 5 chars) must match on word boundaries.
    #[serde(default = "default_true")]
    pub short_term_boundary: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnchorPacks {
    pub core: AnchorPack,
    pub frontier: AnchorPack,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnchorPack {
    #[serde(default = "default_anchor_weight")]
    pub weight: f64,
    pub terms: Vec<String>,
    /// Per-term overrides of `weight`.
    #[serde(default)]
    pub term_weights: BTreeMap<String, f64>,
}

impl AnchorPack {
    pub fn weight_for(&self, term: &str) -> f64 {
        self.term_weights.get(term).copied().unwrap_or(self.weight)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NegativePack {
    #[serde(default = "default_negative_penalty")]
    pub penalty: f64,
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LevelThreshold {
    pub min_score: f64,
    /// Kept signed so a bad table is clamped at classification time rather than rejected.
    pub level: i64,
}

fn default_override_min_level() -> i64 {
    1
}
fn default_true() -> bool {
    true
}
fn default_anchor_weight() -> f64 {
    2.0
}
fn default_negative_penalty() -> f64 {
    1.0
}

impl RelevanceConfig {
    pub(crate) fn validate(&self, diags: &mut Vec<String>) {
        if self.anchors.core.terms.is_empty() && self.anchors.frontier.terms.is_empty() {
            diags.push("relevance.anchors: at least one anchor term is required".into());
        }
        for (name, pack) in [("core", &self.anchors.core), ("frontier", &self.anchors.frontier)] {
            if !pack.weight.is_finite() || pack.weight < 0.0 {
                diags.push(format!("relevance.anchors.{name}.weight must be >= 0"));
            }
            if pack.terms.iter().any(|t| t.trim().is_empty()) {
                diags.push(format!("relevance.anchors.{name}.terms contains an empty term"));
            }
        }
        if !self.negatives.penalty.is_finite() || self.negatives.penalty < 0.0 {
            diags.push("relevance.negatives.penalty must be >= 0".into());
        }
        if self.thresholds.is_empty() {
            diags.push("relevance.thresholds must not be empty".into());
        }
        if self.thresholds.iter().any(|t| !t.min_score.is_finite()) {
            diags.push("relevance.thresholds: min_score must be finite".into());
        }
    }
}
