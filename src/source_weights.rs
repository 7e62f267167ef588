//! # Source Weights
//!
//! Maps an item's source metadata to a coarse *bucket* (regulatory, journal,
//! media, aggregator, ...) and to a trust weight in
//! `[source_weight_min, source_weight_max]` (defaults `[0.10, 1.10]`).
//!
//! - Category tags are normalized (case, dashes, punctuation) before lookup.
//! - Aliases from config map free-form tags onto buckets.
//! - Aggregator fetchers (e.g. `google_news`) force the aggregator bucket.
//! - Weight = base weight of the bucket + trust tier adjustment, clamped.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ScoringConfig;
use crate::ingest::types::SourceMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceBucket {
    Regulatory,
    Official,
    Journal,
    Preprint,
    Company,
    MarketResearch,
    Thinktank,
    Media,
    Aggregator,
    Other,
}

impl SourceBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceBucket::Regulatory => "regulatory",
            SourceBucket::Official => "official",
            SourceBucket::Journal => "journal",
            SourceBucket::Preprint => "preprint",
            SourceBucket::Company => "company",
            SourceBucket::MarketResearch => "market_research",
            SourceBucket::Thinktank => "thinktank",
            SourceBucket::Media => "media",
            SourceBucket::Aggregator => "aggregator",
            SourceBucket::Other => "other",
        }
    }

    fn from_tag(tag: &str) -> Option<SourceBucket> {
        Some(match tag {
            "regulatory" => SourceBucket::Regulatory,
            "official" => SourceBucket::Official,
            "journal" => SourceBucket::Journal,
            "preprint" => SourceBucket::Preprint,
            "company" => SourceBucket::Company,
            "market_research" => SourceBucket::MarketResearch,
            "thinktank" | "think_tank" => SourceBucket::Thinktank,
            "media" => SourceBucket::Media,
            "aggregator" => SourceBucket::Aggregator,
            _ => return None,
        })
    }
}

impl fmt::Display for SourceBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket for a source. Aggregator tags and aggregator fetchers win; then the
/// tag itself; then configured aliases; otherwise `Other`.
pub fn classify_bucket(source: &SourceMeta, cfg: &ScoringConfig) -> SourceBucket {
    let tag = normalize_tag(&source.category);
    let fetcher = source.fetcher.as_deref().map(normalize_tag).unwrap_or_default();

    if tag == "aggregator"
        || (!fetcher.is_empty()
            && cfg
                .aggregator_fetchers
                .iter()
                .any(|f| normalize_tag(f) == fetcher))
    {
        return SourceBucket::Aggregator;
    }
    if let Some(b) = SourceBucket::from_tag(&tag) {
        return b;
    }
    cfg.category_aliases
        .iter()
        .find(|(alias, _)| normalize_tag(alias) == tag)
        .map(|(_, b)| *b)
        .unwrap_or(SourceBucket::Other)
}

/// `clamp(base_weight[bucket] + trust_tier_adjust[tier], min, max)`.
pub fn source_weight(source: &SourceMeta, bucket: SourceBucket, cfg: &ScoringConfig) -> f64 {
    let base = cfg
        .base_weights
        .get(&bucket)
        .or_else(|| cfg.base_weights.get(&SourceBucket::Other))
        .copied()
        .unwrap_or(0.70);
    let tier = source.trust_tier.trim().to_ascii_uppercase();
    let adjust = cfg.trust_tier_adjust.get(&tier).copied().unwrap_or(0.0);
    let w = (base + adjust).clamp(cfg.source_weight_min, cfg.source_weight_max);
    round_to(w, 2)
}

pub(crate) fn round_to(x: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (x * f).round() / f
}

/// Lowercase, separators to `_`, drop other punctuation, collapse repeats.
fn normalize_tag(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.trim().to_ascii_lowercase().chars() {
        let mapped = match ch {
            'a'..='z' | '0'..='9' => Some(ch),
            ' ' | '-' | '_' | '/' | '\u{2013}' | '\u{2014}' => Some('_'),
            _ => None,
        };
        if let Some(c) = mapped {
            if !(c == '_' && (out.is_empty() || out.ends_with('_'))) {
                out.push(c);
            }
        }
    }
    out.trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(category: &str, tier: &str, fetcher: Option<&str>) -> SourceMeta {
        SourceMeta {
            name: "src".into(),
            category: category.into(),
            trust_tier: tier.into(),
            fetcher: fetcher.map(str::to_string),
            source_group: None,
        }
    }

    #[test]
    fn tags_normalize_before_lookup() {
        let c = ScoringConfig::default();
        assert_eq!(classify_bucket(&meta("Market-Research", "B", None), &c), SourceBucket::MarketResearch);
        assert_eq!(classify_bucket(&meta(" JOURNAL ", "B", None), &c), SourceBucket::Journal);
        assert_eq!(classify_bucket(&meta("blog", "B", None), &c), SourceBucket::Other);
    }

    #[test]
    fn aggregator_fetcher_overrides_tag() {
        let c = ScoringConfig::default();
        let m = meta("media", "A", Some("google_news"));
        assert_eq!(classify_bucket(&m, &c), SourceBucket::Aggregator);
    }

    #[test]
    fn aliases_map_free_form_tags() {
        let mut c = ScoringConfig::default();
        c.category_aliases.insert("government".into(), SourceBucket::Regulatory);
        assert_eq!(classify_bucket(&meta("Government", "B", None), &c), SourceBucket::Regulatory);
    }

    #[test]
    fn weight_is_base_plus_tier_clamped() {
        let c = ScoringConfig::default();
        let reg_a = source_weight(&meta("regulatory", "A", None), SourceBucket::Regulatory, &c);
        assert!((reg_a - 1.10).abs() < 1e-9);
        let media_c = source_weight(&meta("media", "C", None), SourceBucket::Media, &c);
        assert!((media_c - 0.60).abs() < 1e-9);
        let agg = source_weight(&meta("aggregator", "z", None), SourceBucket::Aggregator, &c);
        assert!((agg - 0.30).abs() < 1e-9);

        let mut tight = ScoringConfig::default();
        tight.source_weight_max = 0.5;
        let w = source_weight(&meta("journal", "A", None), SourceBucket::Journal, &tight);
        assert!((w - 0.5).abs() < 1e-9);
    }
}
