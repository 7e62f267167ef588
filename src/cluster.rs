// src/cluster.rs
//! Story clustering over one batch.
//!
//! Items are visited in `(arrival_ts, id)` order. Each item probes the
//! variant index (canonical URL, then host/path, then title hash); the first
//! in-window hit wins. State lives in a run-scoped arena that is dropped when
//! `build` returns.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::ingest::fingerprint::{hex_sha256, KeyVariant};
use crate::scoring::ScoredItem;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherSource {
    pub item_id: String,
    pub source_name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    pub from_item_id: String,
    pub to_item_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub story_id: String,
    pub primary_item_id: String,
    pub member_item_ids: Vec<String>,
    pub dedupe_key: String,
    pub dedupe_key_variant: KeyVariant,
    pub dedupe_reason: String,
    pub other_sources: Vec<OtherSource>,
    pub other_sources_dropped: usize,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub promotions: Vec<Promotion>,
}

/// A lower-priority variant pointed at a different story than the one the item joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConflict {
    pub item_id: String,
    pub variant: KeyVariant,
    pub joined_story_id: String,
    pub other_story_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterOutcome {
    pub stories: Vec<Story>,
    pub conflicts: Vec<ClusterConflict>,
}

struct StoryDraft {
    founding_variant: KeyVariant,
    founding_key: String,
    members: Vec<usize>,
    primary: usize,
    min_ts: Option<DateTime<Utc>>,
    max_ts: Option<DateTime<Utc>>,
    attached_via: BTreeSet<KeyVariant>,
    promotions: Vec<Promotion>,
}

impl StoryDraft {
    fn story_id(&self) -> String {
        story_id_for(self.founding_variant, &self.founding_key)
    }

    /// Span after adding `ts` stays within `window_hours`. Undated items always fit.
    fn fits(&self, ts: Option<DateTime<Utc>>, window_hours: i64) -> bool {
        let Some(ts) = ts else { return true };
        let lo = self.min_ts.map_or(ts, |m| m.min(ts));
        let hi = self.max_ts.map_or(ts, |m| m.max(ts));
        (hi - lo) <= chrono::Duration::hours(window_hours)
    }

    fn widen(&mut self, ts: Option<DateTime<Utc>>) {
        if let Some(ts) = ts {
            self.min_ts = Some(self.min_ts.map_or(ts, |m| m.min(ts)));
            self.max_ts = Some(self.max_ts.map_or(ts, |m| m.max(ts)));
        }
    }
}

pub fn story_id_for(variant: KeyVariant, key: &str) -> String {
    hex_sha256(&format!("story::{}:{}", variant.as_str(), key), 8)
}

/// Event time used for window checks.
fn event_ts(it: &ScoredItem) -> Option<DateTime<Utc>> {
    it.item.published_at.or(it.item.collected_at)
}

/// Authority order: `Less` means `a` should lead the story.
pub fn authority_cmp(a: &ScoredItem, b: &ScoredItem) -> Ordering {
    authority_cmp_explained(a, b).0
}

fn authority_cmp_explained(a: &ScoredItem, b: &ScoredItem) -> (Ordering, &'static str) {
    let by_weight = b
        .score
        .source_weight
        .partial_cmp(&a.score.source_weight)
        .unwrap_or(Ordering::Equal);
    if by_weight != Ordering::Equal {
        return (by_weight, "higher source_weight");
    }
    let by_grade = b
        .score
        .evidence_grade
        .rank()
        .cmp(&a.score.evidence_grade.rank());
    if by_grade != Ordering::Equal {
        return (by_grade, "better evidence_grade");
    }
    let by_pub = match (a.item.published_at, b.item.published_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    if by_pub != Ordering::Equal {
        return (by_pub, "earlier published_at");
    }
    (a.item.id.cmp(&b.item.id), "smaller item id")
}

#[derive(Debug, Clone)]
pub struct ClusterBuilder {
    cfg: ClusterConfig,
}

impl ClusterBuilder {
    pub fn new(cfg: ClusterConfig) -> Self {
        Self { cfg }
    }

    pub fn build(&self, items: &[ScoredItem]) -> ClusterOutcome {
        let window = self.cfg.window_hours;

        let mut order: Vec<usize> = (0..items.len()).collect();
        order.sort_by(|&a, &b| {
            let (x, y) = (&items[a].item, &items[b].item);
            match (x.arrival_ts(), y.arrival_ts()) {
                (Some(p), Some(q)) => p.cmp(&q),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then_with(|| x.id.cmp(&y.id))
        });

        let mut arena: Vec<StoryDraft> = Vec::new();
        let mut index: HashMap<(KeyVariant, String), usize> = HashMap::new();
        let mut conflicts = Vec::new();

        for &i in &order {
            let it = &items[i];
            let ts = event_ts(it);
            let probes = it.fingerprint.probes();

            let mut joined: Option<(usize, KeyVariant)> = None;
            for (variant, key) in &probes {
                let Some(&sidx) = index.get(&(*variant, key.clone())) else {
                    continue;
                };
                match joined {
                    None if arena[sidx].fits(ts, window) => joined = Some((sidx, *variant)),
                    None => {
                        debug!(target: "cluster", item = %it.item.id, %variant, "match outside window; probing next variant");
                    }
                    Some((j, _)) if j != sidx => conflicts.push(ClusterConflict {
                        item_id: it.item.id.clone(),
                        variant: *variant,
                        joined_story_id: arena[j].story_id(),
                        other_story_id: arena[sidx].story_id(),
                    }),
                    Some(_) => {}
                }
            }

            match joined {
                Some((sidx, via)) => {
                    let draft = &mut arena[sidx];
                    draft.members.push(i);
                    draft.widen(ts);
                    draft.attached_via.insert(via);
                    let current = &items[draft.primary];
                    let (ord, why) = authority_cmp_explained(it, current);
                    if ord == Ordering::Less {
                        draft.promotions.push(Promotion {
                            from_item_id: current.item.id.clone(),
                            to_item_id: it.item.id.clone(),
                            reason: why.to_string(),
                        });
                        draft.primary = i;
                    }
                    for (variant, key) in probes {
                        index.entry((variant, key)).or_insert(sidx);
                    }
                }
                None => {
                    // Every item has at least the title or a URL probe unless it is
                    // URL-less with a low-confidence title; those get a private key.
                    let (founding_variant, founding_key) = probes
                        .first()
                        .cloned()
                        .unwrap_or((KeyVariant::TitleHash, format!("item:{}", it.item.id)));
                    let sidx = arena.len();
                    let mut draft = StoryDraft {
                        founding_variant,
                        founding_key,
                        members: vec![i],
                        primary: i,
                        min_ts: None,
                        max_ts: None,
                        attached_via: BTreeSet::new(),
                        promotions: Vec::new(),
                    };
                    draft.widen(ts);
                    arena.push(draft);
                    for (variant, key) in probes {
                        index.insert((variant, key), sidx);
                    }
                }
            }
        }

        let stories: Vec<Story> = arena
            .into_iter()
            .map(|d| self.finish(d, items))
            .collect();

        let promotions: usize = stories.iter().map(|s| s.promotions.len()).sum();
        counter!("cluster_stories_total").increment(stories.len() as u64);
        counter!("cluster_conflicts_total").increment(conflicts.len() as u64);
        counter!("cluster_promotions_total").increment(promotions as u64);
        info!(
            target: "cluster",
            items = items.len(),
            stories = stories.len(),
            conflicts = conflicts.len(),
            promotions,
            "clustering complete"
        );

        ClusterOutcome { stories, conflicts }
    }

    fn finish(&self, d: StoryDraft, items: &[ScoredItem]) -> Story {
        let mut ranked: Vec<&ScoredItem> = d.members.iter().map(|&m| &items[m]).collect();
        ranked.sort_by(|a, b| authority_cmp(a, b));
        let primary = &items[d.primary];
        debug_assert_eq!(ranked.first().map(|p| &p.item.id), Some(&primary.item.id));

        let others: Vec<&ScoredItem> = ranked
            .iter()
            .copied()
            .filter(|m| m.item.id != primary.item.id)
            .collect();
        let other_sources_dropped = others.len().saturating_sub(self.cfg.max_other_sources);
        let other_sources = others
            .iter()
            .take(self.cfg.max_other_sources)
            .map(|m| OtherSource {
                item_id: m.item.id.clone(),
                source_name: m.item.source.name.clone(),
                url: m.item.url.clone(),
            })
            .collect();

        let mut member_item_ids: Vec<String> = ranked.iter().map(|m| m.item.id.clone()).collect();
        member_item_ids.sort();

        let mut dedupe_reason = if d.members.len() == 1 {
            "single_item".to_string()
        } else {
            let via = d
                .attached_via
                .iter()
                .map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join("+");
            format!("{via} within {}h", self.cfg.window_hours)
        };
        if let Some(last) = d.promotions.last() {
            dedupe_reason.push_str(&format!(
                "; primary promoted to {} ({})",
                last.to_item_id, last.reason
            ));
        }

        Story {
            story_id: d.story_id(),
            primary_item_id: primary.item.id.clone(),
            member_item_ids,
            dedupe_key: format!("{}:{}", d.founding_variant.as_str(), d.founding_key),
            dedupe_key_variant: d.founding_variant,
            dedupe_reason,
            other_sources,
            other_sources_dropped,
            window_start: d.min_ts,
            window_end: d.max_ts,
            promotions: d.promotions,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::NormalizerConfig;
    use crate::ingest::fingerprint::Fingerprint;
    use crate::ingest::types::{RawItem, SourceMeta};
    use crate::relevance::{RelevanceAnnotation, Track};
    use crate::scoring::{EvidenceGrade, ScoreBreakdown, SignalLevel};
    use crate::source_weights::SourceBucket;
    use chrono::TimeZone;

    pub fn mk_item(id: &str, url: &str, title: &str, hour: u32, weight: f64) -> ScoredItem {
        let item = RawItem {
            id: id.into(),
            source_id: format!("src-{id}"),
            url: url.into(),
            canonical_url: None,
            title: title.into(),
            summary: String::new(),
            published_at: Some(Utc.with_ymd_and_hms(2024, 3, 5, hour, 0, 0).unwrap()),
            collected_at: None,
            raw_text: String::new(),
            normalized_text: String::new(),
            region: None,
            original_source_url: None,
            signal_strength: None,
            source: SourceMeta {
                name: format!("source {id}"),
                ..Default::default()
            },
        };
        let fingerprint = Fingerprint::compute(&item, &NormalizerConfig::default());
        ScoredItem {
            item,
            fingerprint,
            relevance: RelevanceAnnotation::validated(
                Track::Core.as_str(),
                3,
                vec![],
                vec![],
                vec![],
                String::new(),
                3.0,
            ),
            score: ScoreBreakdown {
                bucket: SourceBucket::Media,
                evidence_grade: EvidenceGrade::C,
                evidence_reason: String::new(),
                source_weight: weight,
                quality_score: 50.0,
                evidence_points: 25.0,
                source_points: weight * 30.0,
                recency_points: 0.0,
                completeness_points: 0.0,
                penalties: 0.0,
                penalty_reasons: vec![],
                signal_bonus: 0.0,
                signal_level: SignalLevel::None,
                original_source_url: None,
            },
        }
    }

    pub fn with_canonical(mut it: ScoredItem, canonical: &str) -> ScoredItem {
        it.item.canonical_url = Some(canonical.into());
        it.fingerprint = Fingerprint::compute(&it.item, &NormalizerConfig::default());
        it
    }
}
