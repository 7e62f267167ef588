// src/config/scoring.rs
//! Weight tables for the scoring engine and quota/section rules for the selector.
//!
//! Numeric defaults mirror the production tables; keyword lists (signal tiers,
//! whitelisted domains) default to empty and come from the config file.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

use crate::relevance::Track;
use crate::source_weights::SourceBucket;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub base_weights: BTreeMap<SourceBucket, f64>,
    /// Keyed by trust tier letter ("A", "B", "C"). Missing tiers adjust by 0.
    pub trust_tier_adjust: BTreeMap<String, f64>,
    pub source_weight_min: f64,
    pub source_weight_max: f64,
    pub evidence_points: EvidencePoints,
    pub source_points_factor: f64,
    pub recency: RecencyPoints,
    pub completeness: CompletenessPoints,
    pub penalties: PenaltyConfig,
    pub signal_bonus: SignalBonus,
    pub signal_keywords: SignalKeywords,
    /// Raw source categories that are not bucket names, e.g. `government = "regulatory"`.
    pub category_aliases: BTreeMap<String, SourceBucket>,
    /// Fetchers whose output is always treated as aggregated.
    pub aggregator_fetchers: Vec<String>,
    /// Query keys that carry the original link on redirect/aggregator URLs.
    pub redirect_params: Vec<String>,
    pub original_domains: OriginalDomains,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct EvidencePoints {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RecencyPoints {
    pub under_24h: f64,
    pub under_3d: f64,
    pub under_7d: f64,
    pub under_14d: f64,
    pub older: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CompletenessPoints {
    pub summary: f64,
    pub published_at: f64,
    pub source_name: f64,
    pub original_link: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PenaltyConfig {
    /// Magnitudes; the breakdown reports them negated.
    pub aggregator_without_original: f64,
    pub short_summary: f64,
    pub min_summary_len: usize,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SignalBonus {
    pub red: f64,
    pub orange: f64,
    pub yellow: f64,
    pub none: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignalKeywords {
    pub red: Vec<String>,
    pub orange: Vec<String>,
    pub yellow: Vec<String>,
}

/// Domains that upgrade a traced original link to grade A or B.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OriginalDomains {
    pub grade_a: Vec<String>,
    pub grade_b: Vec<String>,
}

impl Default for EvidencePoints {
    fn default() -> Self {
        Self {
            a: 45.0,
            b: 35.0,
            c: 25.0,
            d: 10.0,
        }
    }
}

impl Default for RecencyPoints {
    fn default() -> Self {
        Self {
            under_24h: 15.0,
            under_3d: 10.0,
            under_7d: 6.0,
            under_14d: 2.0,
            older: 0.0,
        }
    }
}

impl Default for CompletenessPoints {
    fn default() -> Self {
        Self {
            summary: 3.0,
            published_at: 3.0,
            source_name: 2.0,
            original_link: 6.0,
            max: 10.0,
        }
    }
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            aggregator_without_original: 12.0,
            short_summary: 6.0,
            min_summary_len: 40,
        }
    }
}

impl Default for SignalBonus {
    fn default() -> Self {
        Self {
            red: 6.0,
            orange: 3.0,
            yellow: 1.0,
            none: 0.0,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        use SourceBucket::*;
        let base_weights = [
            (Regulatory, 1.00),
            (Official, 1.00),
            (Journal, 0.95),
            (Company, 0.90),
            (Preprint, 0.80),
            (MarketResearch, 0.85),
            (Thinktank, 0.85),
            (Media, 0.70),
            (Aggregator, 0.30),
            (Other, 0.70),
        ]
        .into_iter()
        .collect();
        let trust_tier_adjust = [("A", 0.10), ("B", 0.0), ("C", -0.10)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            base_weights,
            trust_tier_adjust,
            source_weight_min: 0.10,
            source_weight_max: 1.10,
            evidence_points: EvidencePoints::default(),
            source_points_factor: 30.0,
            recency: RecencyPoints::default(),
            completeness: CompletenessPoints::default(),
            penalties: PenaltyConfig::default(),
            signal_bonus: SignalBonus::default(),
            signal_keywords: SignalKeywords::default(),
            category_aliases: BTreeMap::new(),
            aggregator_fetchers: vec!["google_news".into(), "rsshub".into()],
            redirect_params: ["url", "u", "target", "source", "article_url"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            original_domains: OriginalDomains::default(),
        }
    }
}

impl ScoringConfig {
    /// Every numeric knob by its config path, for the finiteness check.
    fn numeric_fields(&self) -> Vec<(String, f64)> {
        let (e, r, c, p, b) = (
            &self.evidence_points,
            &self.recency,
            &self.completeness,
            &self.penalties,
            &self.signal_bonus,
        );
        let mut out: Vec<(String, f64)> = vec![
            ("source_weight_min".into(), self.source_weight_min),
            ("source_weight_max".into(), self.source_weight_max),
            ("source_points_factor".into(), self.source_points_factor),
            ("evidence_points.a".into(), e.a),
            ("evidence_points.b".into(), e.b),
            ("evidence_points.c".into(), e.c),
            ("evidence_points.d".into(), e.d),
            ("recency.under_24h".into(), r.under_24h),
            ("recency.under_3d".into(), r.under_3d),
            ("recency.under_7d".into(), r.under_7d),
            ("recency.under_14d".into(), r.under_14d),
            ("recency.older".into(), r.older),
            ("completeness.summary".into(), c.summary),
            ("completeness.published_at".into(), c.published_at),
            ("completeness.source_name".into(), c.source_name),
            ("completeness.original_link".into(), c.original_link),
            ("completeness.max".into(), c.max),
            ("penalties.aggregator_without_original".into(), p.aggregator_without_original),
            ("penalties.short_summary".into(), p.short_summary),
            ("signal_bonus.red".into(), b.red),
            ("signal_bonus.orange".into(), b.orange),
            ("signal_bonus.yellow".into(), b.yellow),
            ("signal_bonus.none".into(), b.none),
        ];
        out.extend(
            self.base_weights
                .iter()
                .map(|(k, v)| (format!("base_weights.{}", k.as_str()), *v)),
        );
        out.extend(
            self.trust_tier_adjust
                .iter()
                .map(|(k, v)| (format!("trust_tier_adjust.{k}"), *v)),
        );
        out
    }

    pub(crate) fn validate(&self, diags: &mut Vec<String>) {
        for (path, v) in self.numeric_fields() {
            if !v.is_finite() {
                diags.push(format!("scoring.{path} must be finite, got {v}"));
            }
        }
        if !(self.source_weight_min <= self.source_weight_max) {
            diags.push(format!(
                "scoring: source_weight_min ({}) must be <= source_weight_max ({})",
                self.source_weight_min, self.source_weight_max
            ));
        }
        if self.completeness.max < 0.0 {
            diags.push("scoring.completeness.max must be >= 0".into());
        }
        if self.penalties.aggregator_without_original < 0.0 || self.penalties.short_summary < 0.0 {
            diags.push("scoring.penalties are magnitudes and must be >= 0".into());
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct Quota {
    pub min: Option<usize>,
    pub max: Option<usize>,
    pub require_original_link: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SectionRule {
    pub name: String,
    #[serde(default)]
    pub track: Option<Track>,
    #[serde(default)]
    pub min_relevance_level: u8,
    #[serde(default)]
    pub max_items: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub top_n: usize,
    /// Keyed by quota category (see `category_of`).
    pub quotas: BTreeMap<String, Quota>,
    /// Bucket -> quota category. Unmapped buckets use their own name.
    pub category_of: BTreeMap<SourceBucket, String>,
    pub sections: Vec<SectionRule>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        use SourceBucket::*;
        let q = |min: Option<usize>, max: Option<usize>, require_original_link: bool| Quota {
            min,
            max,
            require_original_link,
        };
        let quotas = [
            ("regulatory", q(Some(4), None, false)),
            ("journal_preprint", q(Some(4), None, false)),
            ("company", q(Some(4), None, false)),
            ("media", q(None, Some(14), false)),
            ("aggregator", q(None, Some(2), true)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let category_of = [
            (Regulatory, "regulatory"),
            (Official, "regulatory"),
            (Journal, "journal_preprint"),
            (Preprint, "journal_preprint"),
            (Company, "company"),
            (MarketResearch, "media"),
            (Thinktank, "media"),
            (Media, "media"),
            (Other, "media"),
            (Aggregator, "aggregator"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect();
        Self {
            top_n: 20,
            quotas,
            category_of,
            sections: vec![
                SectionRule {
                    name: "core".into(),
                    track: Some(Track::Core),
                    min_relevance_level: 3,
                    max_items: None,
                },
                SectionRule {
                    name: "frontier".into(),
                    track: Some(Track::Frontier),
                    min_relevance_level: 2,
                    max_items: Some(3),
                },
            ],
        }
    }
}

impl SelectionConfig {
    pub fn category_for(&self, bucket: SourceBucket) -> String {
        self.category_of
            .get(&bucket)
            .cloned()
            .unwrap_or_else(|| bucket.as_str().to_string())
    }

    pub(crate) fn validate(&self, diags: &mut Vec<String>) {
        if self.top_n == 0 {
            diags.push("selection.top_n must be > 0".into());
        }
        for (cat, q) in &self.quotas {
            if let (Some(min), Some(max)) = (q.min, q.max) {
                if min > max {
                    diags.push(format!("selection.quotas.{cat}: min {min} > max {max}"));
                }
            }
        }
        let mut seen = HashSet::new();
        for s in &self.sections {
            if s.name.trim().is_empty() {
                diags.push("selection.sections: section name must not be empty".into());
            } else if !seen.insert(s.name.as_str()) {
                diags.push(format!("selection.sections: duplicate section '{}'", s.name));
            }
            if s.min_relevance_level > 4 {
                diags.push(format!(
                    "selection.sections.{}: min_relevance_level must be within 0..=4",
                    s.name
                ));
            }
        }
    }
}
