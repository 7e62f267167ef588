// src/relevance.rs
//! Relevance classifier: anchor/negative keyword packs, threshold table,
//! override anchors, and the validated `RelevanceAnnotation` it produces.

use metrics::counter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::config::RelevanceConfig;
use crate::error::PipelineError;
use crate::ingest::fingerprint::hex_sha256;
use crate::ingest::types::RawItem;

pub const MAX_RELEVANCE_LEVEL: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Core,
    Frontier,
}

impl Track {
    pub fn as_str(&self) -> &'static str {
        match self {
            Track::Core => "core",
            Track::Frontier => "frontier",
        }
    }

    pub fn parse(raw: &str) -> Option<Track> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "core" => Some(Track::Core),
            "frontier" => Some(Track::Frontier),
            _ => None,
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Dev logging gate: RELEVANCE_DEV_LOG=1 AND dev env (debug build or APP_ENV in {local,development,dev})
pub(crate) fn dev_logging_enabled() -> bool {
    let on = std::env::var("RELEVANCE_DEV_LOG").ok().as_deref() == Some("1");
    if !on {
        return false;
    }
    if cfg!(debug_assertions) {
        return true;
    }
    matches!(
        std::env::var("APP_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "local" | "development" | "dev"
    )
}

pub(crate) fn anon_hash(text: &str) -> String {
    hex_sha256(text, 6)
}

/// Minimal, anonymized dev logger for relevance decisions.
fn dev_log_relevance(text: &str, ann: &RelevanceAnnotation) {
    if !dev_logging_enabled() {
        return;
    }
    let id = anon_hash(text);
    // Never log raw text. Only hashed id + short lists.
    info!(
        target: "relevance",
        %id,
        track = %ann.track,
        level = ann.relevance_level,
        score = ann.raw_score,
        anchors = ?truncate_vec(&ann.anchors_hit, 5),
        negatives = ?truncate_vec(&ann.negatives_hit, 5),
        reason = %ann.final_reason
    );
}

pub(crate) fn truncate_vec<T: ToString>(v: &[T], max: usize) -> Vec<String> {
    v.iter().take(max).map(|x| x.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "UncheckedAnnotation")]
pub struct RelevanceAnnotation {
    pub track: Track,
    pub relevance_level: u8,
    pub anchors_hit: Vec<String>,
    pub negatives_hit: Vec<String>,
    pub rules_applied: Vec<String>,
    pub final_reason: String,
    pub raw_score: f64,
    /// Negative terms hit with no anchor and no override: never selected.
    #[serde(default)]
    pub excluded: bool,
    /// Auto-corrections applied to keep track/level in domain.
    #[serde(default)]
    pub corrections: Vec<String>,
}

/// Wire shape before validation (e.g. a ledger line written by an older build).
#[derive(Debug, Clone, Deserialize)]
struct UncheckedAnnotation {
    track: String,
    relevance_level: i64,
    #[serde(default)]
    anchors_hit: Vec<String>,
    #[serde(default)]
    negatives_hit: Vec<String>,
    #[serde(default)]
    rules_applied: Vec<String>,
    #[serde(default)]
    final_reason: String,
    #[serde(default)]
    raw_score: f64,
    #[serde(default)]
    excluded: bool,
    #[serde(default)]
    corrections: Vec<String>,
}

impl From<UncheckedAnnotation> for RelevanceAnnotation {
    fn from(u: UncheckedAnnotation) -> Self {
        let mut ann = RelevanceAnnotation::validated(
            &u.track,
            u.relevance_level,
            u.anchors_hit,
            u.negatives_hit,
            u.rules_applied,
            u.final_reason,
            u.raw_score,
        );
        let mut corrections = u.corrections;
        corrections.append(&mut ann.corrections);
        ann.corrections = corrections;
        ann.excluded = u.excluded;
        ann
    }
}

impl RelevanceAnnotation {
    /// Build an annotation, clamping out-of-domain values.
    ///
    /// Unknown tracks become `core`; levels outside 0..=4 are clamped. Each
    /// correction is recorded on the annotation and logged as a consistency
    /// violation.
    #[allow(clippy::too_many_arguments)]
    pub fn validated(
        track_raw: &str,
        level_raw: i64,
        anchors_hit: Vec<String>,
        negatives_hit: Vec<String>,
        rules_applied: Vec<String>,
        final_reason: String,
        raw_score: f64,
    ) -> Self {
        let mut violations = Vec::new();
        let track = Track::parse(track_raw).unwrap_or_else(|| {
            violations.push(PipelineError::consistency(
                "track",
                format!("unknown track '{track_raw}' replaced with core"),
            ));
            Track::Core
        });
        let clamped = level_raw.clamp(0, MAX_RELEVANCE_LEVEL as i64);
        if clamped != level_raw {
            violations.push(PipelineError::consistency(
                "relevance_level",
                format!("level {level_raw} clamped to {clamped}"),
            ));
        }

        let corrections = violations
            .iter()
            .map(|v| {
                warn!(target: "relevance", error = %v, "auto-corrected annotation");
                match v {
                    PipelineError::ConsistencyViolation { field, detail } => {
                        format!("{field}: {detail}")
                    }
                    other => other.to_string(),
                }
            })
            .collect::<Vec<_>>();
        if !corrections.is_empty() {
            counter!("relevance_corrections_total").increment(corrections.len() as u64);
        }

        Self {
            track,
            relevance_level: clamped as u8,
            anchors_hit,
            negatives_hit,
            rules_applied,
            final_reason,
            raw_score,
            excluded: false,
            corrections,
        }
    }
}

/* ----------------------------
Compiled classifier
---------------------------- */

#[derive(Debug)]
enum TermMatcher {
    /// Short alphabetic term: whole-word match.
    Boundary(Regex),
    /// Lowercased substring.
    Substring(String),
}

#[derive(Debug)]
struct CompiledTerm {
    term: String,
    weight: f64,
    matcher: TermMatcher,
}

impl CompiledTerm {
    fn compile(term: &str, weight: f64, short_term_boundary: bool) -> Self {
        let lower = term.trim().to_lowercase();
        let short_alpha = lower.len() <= 5 && lower.chars().all(|c| c.is_ascii_alphabetic());
        let matcher = if short_term_boundary && short_alpha {
            // Only ASCII letters reach this branch, so the pattern is always valid.
            match Regex::new(&format!(r"\b{}\b", regex::escape(&lower))) {
                Ok(re) => TermMatcher::Boundary(re),
                Err(_) => TermMatcher::Substring(lower),
            }
        } else {
            TermMatcher::Substring(lower)
        };
        Self {
            term: term.trim().to_string(),
            weight,
            matcher,
        }
    }

    /// `haystack` must already be lowercased.
    fn hits(&self, haystack: &str) -> bool {
        match &self.matcher {
            TermMatcher::Boundary(re) => re.is_match(haystack),
            TermMatcher::Substring(s) => !s.is_empty() && haystack.contains(s.as_str()),
        }
    }
}

fn compile_all(terms: &[String], weight_of: impl Fn(&str) -> f64, boundary: bool) -> Vec<CompiledTerm> {
    terms
        .iter()
        .filter(|t| !t.trim().is_empty())
        .map(|t| CompiledTerm::compile(t, weight_of(t), boundary))
        .collect()
}

#[derive(Debug)]
pub struct Classifier {
    cfg: RelevanceConfig,
    core: Vec<CompiledTerm>,
    frontier: Vec<CompiledTerm>,
    negatives: Vec<CompiledTerm>,
    overrides: Vec<CompiledTerm>,
}

impl Classifier {
    pub fn new(cfg: RelevanceConfig) -> Self {
        let b = cfg.short_term_boundary;
        let core = compile_all(&cfg.anchors.core.terms, |t| cfg.anchors.core.weight_for(t), b);
        let frontier = compile_all(
            &cfg.anchors.frontier.terms,
            |t| cfg.anchors.frontier.weight_for(t),
            b,
        );
        let negatives = compile_all(&cfg.negatives.terms, |_| cfg.negatives.penalty, b);
        let overrides = compile_all(&cfg.override_anchors, |_| 0.0, b);
        Self {
            cfg,
            core,
            frontier,
            negatives,
            overrides,
        }
    }

    /// Highest threshold level whose `min_score` is reached, else 0.
    fn level_for(&self, score: f64) -> i64 {
        self.cfg
            .thresholds
            .iter()
            .filter(|t| score >= t.min_score)
            .map(|t| t.level)
            .max()
            .unwrap_or(0)
    }

    pub fn classify(&self, item: &RawItem) -> RelevanceAnnotation {
        let text = format!("{} {} {}", item.title, item.summary, item.normalized_text);
        let hay = text.to_lowercase();

        let core_hits: Vec<&CompiledTerm> = self.core.iter().filter(|t| t.hits(&hay)).collect();
        let frontier_hits: Vec<&CompiledTerm> =
            self.frontier.iter().filter(|t| t.hits(&hay)).collect();
        let negatives_hit: Vec<String> = self
            .negatives
            .iter()
            .filter(|t| t.hits(&hay))
            .map(|t| t.term.clone())
            .collect();
        let override_hit: Option<&CompiledTerm> = self.overrides.iter().find(|t| t.hits(&hay));

        let core_score: f64 = core_hits.iter().map(|t| t.weight).sum();
        let frontier_score: f64 = frontier_hits.iter().map(|t| t.weight).sum();
        let penalty = self.cfg.negatives.penalty * negatives_hit.len() as f64;

        let mut rules_applied = Vec::new();
        if !core_hits.is_empty() {
            rules_applied.push(format!("anchor_pack:core(+{core_score})"));
        }
        if !frontier_hits.is_empty() {
            rules_applied.push(format!("anchor_pack:frontier(+{frontier_score})"));
        }
        if penalty > 0.0 {
            rules_applied.push(format!("negative_penalty(-{penalty})"));
        }

        let boost = item
            .source
            .source_group
            .as_deref()
            .and_then(|g| self.cfg.source_group_boost.get(g).map(|b| (g, *b)));
        let boost_value = boost.map(|(_, b)| b).unwrap_or(0.0);
        if let Some((g, b)) = boost {
            rules_applied.push(format!("source_group_boost:{g}(+{b})"));
        }

        let raw_score = core_score + frontier_score - penalty + boost_value;
        let track = if core_score > frontier_score {
            Track::Core
        } else {
            Track::Frontier
        };

        let anchors_hit: Vec<String> = core_hits
            .iter()
            .chain(frontier_hits.iter())
            .map(|t| t.term.clone())
            .collect();

        let threshold_level = self.level_for(raw_score);
        let mut excluded = false;
        let (level, reason) = if !negatives_hit.is_empty() && override_hit.is_some() {
            let floor = self.cfg.override_min_level;
            let term = override_hit.map(|t| t.term.as_str()).unwrap_or_default();
            rules_applied.push(format!("override_anchor:{term}"));
            (threshold_level.max(floor), "override_anchor".to_string())
        } else if !negatives_hit.is_empty() && anchors_hit.is_empty() {
            rules_applied.push("negative_without_anchor".into());
            excluded = true;
            (0, "negative_without_anchor".to_string())
        } else if anchors_hit.is_empty() {
            (threshold_level, "no_anchor".to_string())
        } else {
            rules_applied.push(format!("threshold:L{threshold_level}"));
            (threshold_level, format!("threshold_L{threshold_level}"))
        };

        let final_reason = format!(
            "{reason}: score={raw_score} anchors=[{}] negatives=[{}]",
            anchors_hit.join(","),
            negatives_hit.join(",")
        );

        let mut ann = RelevanceAnnotation::validated(
            track.as_str(),
            level,
            anchors_hit,
            negatives_hit,
            rules_applied,
            final_reason,
            raw_score,
        );
        ann.excluded = excluded;
        dev_log_relevance(&text, &ann);
        ann
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support;

    fn item(title: &str, summary: &str) -> RawItem {
        serde_json::from_value(serde_json::json!({
            "id": "t1",
            "url": "https://example.com/a",
            "title": title,
            "summary": summary,
        }))
        .unwrap()
    }

    fn classifier() -> Classifier {
        Classifier::new(test_support::config().relevance)
    }

    #[test]
    fn anchors_outweigh_single_negative() {
        let ann = classifier().classify(&item(
            "FDA nod for diagnostic platform",
            "Company also reported quarterly earnings.",
        ));
        assert_eq!(ann.track, Track::Core);
        assert_eq!(ann.relevance_level, 3);
        assert_eq!(ann.anchors_hit, vec!["diagnostic", "FDA"]);
        assert_eq!(ann.negatives_hit, vec!["earnings"]);
        assert!(ann.final_reason.contains("diagnostic,FDA"));
        assert!(ann.final_reason.contains("earnings"));
        assert!(ann.corrections.is_empty());
    }

    #[test]
    fn short_terms_need_word_boundaries() {
        let ann = classifier().classify(&item("The latest roundup", "Nothing to see"));
        assert!(ann.anchors_hit.is_empty());
        assert_eq!(ann.relevance_level, 0);
        let ann = classifier().classify(&item("New PCR test", ""));
        assert_eq!(ann.anchors_hit, vec!["pcr", "test"]);
    }

    #[test]
    fn negatives_without_anchor_exclude_unless_override() {
        let c = classifier();
        let ann = c.classify(&item("Vaccine layoffs announced", ""));
        assert_eq!(ann.relevance_level, 0);
        assert!(ann.excluded);
        assert!(ann.final_reason.starts_with("negative_without_anchor"));

        let ann = c.classify(&item("Vaccine recall widens", ""));
        assert!(!ann.excluded);
        assert_eq!(ann.relevance_level, 1);
        assert!(ann.rules_applied.iter().any(|r| r == "override_anchor:recall"));
    }

    #[test]
    fn tie_goes_to_frontier() {
        let ann = classifier().classify(&item("Spatial assay", ""));
        assert_eq!(ann.track, Track::Frontier);
    }

    #[test]
    fn out_of_domain_values_are_clamped_and_recorded() {
        let ann = RelevanceAnnotation::validated(
            "sideways",
            9,
            vec![],
            vec![],
            vec![],
            "x".into(),
            0.0,
        );
        assert_eq!(ann.track, Track::Core);
        assert_eq!(ann.relevance_level, 4);
        assert_eq!(ann.corrections.len(), 2);

        let reread: RelevanceAnnotation =
            serde_json::from_str(r#"{"track":"frontier","relevance_level":-2}"#).unwrap();
        assert_eq!(reread.relevance_level, 0);
        assert_eq!(reread.corrections.len(), 1);
        assert!(!reread.excluded);
    }

    #[test]
    fn anon_hash_is_stable_and_short() {
        assert_eq!(anon_hash("abc"), anon_hash("abc"));
        assert_eq!(anon_hash("abc").len(), 12);
    }
}
