// src/scoring.rs
//! Quality scoring: evidence grade, source weight, recency, completeness,
//! penalties and signal bonus, combined into a 0..=100 score with every
//! component kept in the breakdown.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ScoringConfig;
use crate::ingest::fingerprint::{url_host, Fingerprint};
use crate::ingest::types::RawItem;
use crate::relevance::RelevanceAnnotation;
use crate::source_weights::{classify_bucket, round_to, source_weight, SourceBucket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidenceGrade {
    A,
    B,
    C,
    D,
}

impl EvidenceGrade {
    /// Higher is stronger evidence.
    pub fn rank(&self) -> u8 {
        match self {
            EvidenceGrade::A => 3,
            EvidenceGrade::B => 2,
            EvidenceGrade::C => 1,
            EvidenceGrade::D => 0,
        }
    }

    pub fn for_bucket(bucket: SourceBucket) -> EvidenceGrade {
        use SourceBucket::*;
        match bucket {
            Regulatory | Official | Journal => EvidenceGrade::A,
            Company | Preprint => EvidenceGrade::B,
            Media | MarketResearch | Thinktank => EvidenceGrade::C,
            Aggregator | Other => EvidenceGrade::D,
        }
    }
}

impl fmt::Display for EvidenceGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalLevel {
    Red,
    Orange,
    Yellow,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub bucket: SourceBucket,
    pub evidence_grade: EvidenceGrade,
    pub evidence_reason: String,
    pub source_weight: f64,
    pub quality_score: f64,
    pub evidence_points: f64,
    pub source_points: f64,
    pub recency_points: f64,
    pub completeness_points: f64,
    /// Sum of applied penalties, reported as a non-positive number.
    pub penalties: f64,
    pub penalty_reasons: Vec<String>,
    pub signal_bonus: f64,
    pub signal_level: SignalLevel,
    pub original_source_url: Option<String>,
}

/// An item with everything computed before clustering. One line of `scored.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item: RawItem,
    pub fingerprint: Fingerprint,
    pub relevance: RelevanceAnnotation,
    pub score: ScoreBreakdown,
}

#[derive(Debug, Clone)]
pub struct Scorer {
    cfg: ScoringConfig,
}

impl Scorer {
    pub fn new(cfg: ScoringConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.cfg
    }

    /// Score one item. Recency is measured against `as_of`, not the wall clock.
    pub fn score(&self, item: &RawItem, as_of: DateTime<Utc>) -> ScoreBreakdown {
        let cfg = &self.cfg;
        let bucket = classify_bucket(&item.source, cfg);
        let base_grade = EvidenceGrade::for_bucket(bucket);

        let original = if bucket == SourceBucket::Aggregator {
            extract_original_source_url(item, cfg)
        } else {
            supplied_original(item)
        };
        let (evidence_grade, evidence_reason) = match (&original, bucket) {
            (Some(orig), SourceBucket::Aggregator) => {
                let (g, why) = upgrade_by_original(orig, cfg);
                (g, format!("bucket:aggregator; {why}"))
            }
            (None, SourceBucket::Aggregator) => {
                (base_grade, "bucket:aggregator; untraceable".to_string())
            }
            _ => (base_grade, format!("bucket:{bucket}")),
        };

        let evidence_points = match evidence_grade {
            EvidenceGrade::A => cfg.evidence_points.a,
            EvidenceGrade::B => cfg.evidence_points.b,
            EvidenceGrade::C => cfg.evidence_points.c,
            EvidenceGrade::D => cfg.evidence_points.d,
        };
        let weight = source_weight(&item.source, bucket, cfg);
        let source_points = round_to(weight * cfg.source_points_factor, 2);
        let recency_points = self.recency_points(item.published_at, as_of);

        let cp = &cfg.completeness;
        let mut completeness: f64 = 0.0;
        if !item.summary.trim().is_empty() {
            completeness += cp.summary;
        }
        if item.published_at.is_some() {
            completeness += cp.published_at;
        }
        if !item.source.name.trim().is_empty() {
            completeness += cp.source_name;
        }
        if original.is_some() {
            completeness += cp.original_link;
        }
        let completeness_points = completeness.min(cp.max);

        let mut penalties = 0.0;
        let mut penalty_reasons = Vec::new();
        if bucket == SourceBucket::Aggregator && original.is_none() {
            penalties -= cfg.penalties.aggregator_without_original;
            penalty_reasons.push("aggregator_without_original".to_string());
        }
        if item.summary.trim().chars().count() < cfg.penalties.min_summary_len {
            penalties -= cfg.penalties.short_summary;
            penalty_reasons.push("short_summary".to_string());
        }

        let (signal_level, signal_bonus) = self.signal(item, evidence_grade);

        let total = evidence_points
            + source_points
            + recency_points
            + completeness_points
            + penalties
            + signal_bonus;
        // clamp passes NaN through; a non-finite total scores 0.
        let total = if total.is_finite() { total } else { 0.0 };
        let quality_score = round_to(total.clamp(0.0, 100.0), 2);

        ScoreBreakdown {
            bucket,
            evidence_grade,
            evidence_reason,
            source_weight: weight,
            quality_score,
            evidence_points,
            source_points,
            recency_points,
            completeness_points,
            penalties,
            penalty_reasons,
            signal_bonus,
            signal_level,
            original_source_url: original,
        }
    }

    fn recency_points(&self, published: Option<DateTime<Utc>>, as_of: DateTime<Utc>) -> f64 {
        let r = &self.cfg.recency;
        let Some(p) = published else {
            return r.older;
        };
        let hours = (as_of - p).num_hours();
        match hours {
            h if h < 24 => r.under_24h,
            h if h < 72 => r.under_3d,
            h if h < 168 => r.under_7d,
            h if h < 336 => r.under_14d,
            _ => r.older,
        }
    }

    fn signal(&self, item: &RawItem, grade: EvidenceGrade) -> (SignalLevel, f64) {
        let b = &self.cfg.signal_bonus;
        if let Some(raw) = item.signal_strength {
            let bonus = raw.clamp(0, 6) as f64;
            let level = if bonus >= b.red {
                SignalLevel::Red
            } else if bonus >= b.orange {
                SignalLevel::Orange
            } else if bonus >= b.yellow && bonus > 0.0 {
                SignalLevel::Yellow
            } else {
                SignalLevel::None
            };
            return (level, bonus);
        }

        let text = format!("{} {}", item.title, item.summary).to_lowercase();
        let hit = |terms: &[String]| {
            terms
                .iter()
                .any(|t| !t.trim().is_empty() && text.contains(&t.to_lowercase()))
        };
        let kw = &self.cfg.signal_keywords;
        if grade.rank() >= EvidenceGrade::A.rank() && hit(&kw.red) {
            (SignalLevel::Red, b.red)
        } else if grade.rank() >= EvidenceGrade::B.rank() && hit(&kw.orange) {
            (SignalLevel::Orange, b.orange)
        } else if grade.rank() >= EvidenceGrade::C.rank() && hit(&kw.yellow) {
            (SignalLevel::Yellow, b.yellow)
        } else {
            (SignalLevel::None, b.none)
        }
    }
}

fn supplied_original(item: &RawItem) -> Option<String> {
    item.original_source_url
        .as_deref()
        .map(str::trim)
        .filter(|u| url_host(u).is_some())
        .map(str::to_string)
}

/// Original link behind an aggregator item: the supplied field, a redirect
/// query parameter on the item URL, or the first foreign URL in the summary.
pub fn extract_original_source_url(item: &RawItem, cfg: &ScoringConfig) -> Option<String> {
    if let Some(u) = supplied_original(item) {
        return Some(u);
    }

    let own_host = url_host(&item.url);
    if let Ok(parsed) = url::Url::parse(item.url.trim()) {
        for (k, v) in parsed.query_pairs() {
            let key = k.to_ascii_lowercase();
            if cfg.redirect_params.iter().any(|p| *p == key) {
                let candidate = v.trim();
                if let Some(h) = url_host(candidate) {
                    if Some(&h) != own_host.as_ref() {
                        return Some(candidate.to_string());
                    }
                }
            }
        }
    }

    static RE_URL: OnceCell<Regex> = OnceCell::new();
    let re = RE_URL.get_or_init(|| Regex::new(r#"https?://[^\s"'<>)\]]+"#).unwrap());
    re.find_iter(&item.summary)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';']))
        .find(|u| {
            url_host(u)
                .map(|h| Some(&h) != own_host.as_ref())
                .unwrap_or(false)
        })
        .map(str::to_string)
}

fn host_matches(host: &str, domains: &[String]) -> bool {
    domains.iter().any(|d| {
        let d = d.trim().trim_start_matches("www.").to_ascii_lowercase();
        !d.is_empty() && (host == d || host.ends_with(&format!(".{d}")))
    })
}

/// A traced original never leaves an aggregator item below grade C.
fn upgrade_by_original(original: &str, cfg: &ScoringConfig) -> (EvidenceGrade, String) {
    let host = url_host(original).unwrap_or_default();
    if host_matches(&host, &cfg.original_domains.grade_a) {
        (EvidenceGrade::A, format!("original_link:{host}->A"))
    } else if host_matches(&host, &cfg.original_domains.grade_b) {
        (EvidenceGrade::B, format!("original_link:{host}->B"))
    } else {
        (EvidenceGrade::C, format!("original_link:{host}->C"))
    }
}
