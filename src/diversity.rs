// src/diversity.rs
//! Quota-aware story selection and section routing.
//!
//! Relevance-excluded stories are dropped first, then untraceable ones in
//! categories that require an original link.
//! Step 1 fills every category `min` with its best candidates, serving the
//! category with the strongest best candidate first; step 2 fills the rest by
//! global rank under the per-category `max` caps and `top_n`.
//! Shortfalls are reported, never borrowed from other categories.

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use crate::cluster::Story;
use crate::config::{Quota, SectionRule, SelectionConfig};
use crate::scoring::ScoredItem;

/// A story with its primary item, as seen by selection and annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedStory {
    pub story: Story,
    pub primary: ScoredItem,
    pub category: String,
    #[serde(default)]
    pub section: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropRecord {
    pub story_id: String,
    pub category: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub category: String,
    pub target: usize,
    pub actual: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionView {
    pub name: String,
    pub story_ids: Vec<String>,
    /// Explanation when the section ended up empty.
    pub gap: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub selected: Vec<RankedStory>,
    pub dropped: Vec<DropRecord>,
    pub shortfalls: Vec<Shortfall>,
    pub sections: Vec<SectionView>,
}

/// Drop reason for stories whose primary item hit negatives with no anchor.
pub const EXCLUDED_REASON: &str = "relevance_excluded:negative_without_anchor";

/// Quality desc, evidence desc, source weight desc, story_id asc.
pub fn rank_cmp(a: &RankedStory, b: &RankedStory) -> Ordering {
    let (x, y) = (&a.primary.score, &b.primary.score);
    y.quality_score
        .partial_cmp(&x.quality_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| y.evidence_grade.rank().cmp(&x.evidence_grade.rank()))
        .then_with(|| {
            y.source_weight
                .partial_cmp(&x.source_weight)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.story.story_id.cmp(&b.story.story_id))
}

#[derive(Debug, Clone)]
pub struct DiversitySelector {
    cfg: SelectionConfig,
}

impl DiversitySelector {
    pub fn new(cfg: SelectionConfig) -> Self {
        Self { cfg }
    }

    /// Pair each story with its primary item and quota category.
    pub fn candidates(&self, stories: Vec<Story>, items: &[ScoredItem]) -> Vec<RankedStory> {
        let by_id: BTreeMap<&str, &ScoredItem> =
            items.iter().map(|i| (i.item.id.as_str(), i)).collect();
        stories
            .into_iter()
            .filter_map(|story| {
                let primary = (*by_id.get(story.primary_item_id.as_str())?).clone();
                let category = self.cfg.category_for(primary.score.bucket);
                Some(RankedStory {
                    story,
                    primary,
                    category,
                    section: None,
                })
            })
            .collect()
    }

    pub fn select(&self, mut candidates: Vec<RankedStory>) -> Selection {
        candidates.sort_by(rank_cmp);
        let top_n = self.cfg.top_n;
        let mut dropped = Vec::new();

        // Hard filters: relevance exclusion, then untraceable items in categories
        // that require an original link.
        let mut eligible = Vec::with_capacity(candidates.len());
        for c in candidates {
            let q = self.cfg.quotas.get(&c.category).copied().unwrap_or_default();
            if c.primary.relevance.excluded {
                dropped.push(DropRecord {
                    story_id: c.story.story_id.clone(),
                    reason: EXCLUDED_REASON.to_string(),
                    category: c.category,
                });
            } else if q.require_original_link && c.primary.score.original_source_url.is_none() {
                dropped.push(DropRecord {
                    story_id: c.story.story_id.clone(),
                    reason: format!("{}_quota_full_or_untraceable", c.category),
                    category: c.category,
                });
            } else {
                eligible.push(c);
            }
        }

        let mut taken: HashSet<usize> = HashSet::new();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();

        // Step 1: minimums. `eligible` is rank-sorted, so a category's first
        // position is its best candidate; categories without one come last.
        let mut min_order: Vec<(usize, &String, &Quota)> = self
            .cfg
            .quotas
            .iter()
            .filter(|(_, q)| q.min.is_some())
            .map(|(cat, q)| {
                let best = eligible
                    .iter()
                    .position(|c| &c.category == cat)
                    .unwrap_or(usize::MAX);
                (best, cat, q)
            })
            .collect();
        min_order.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        for (_, cat, q) in min_order {
            let Some(min) = q.min else { continue };
            let cap = q.max.map_or(min, |m| m.min(min));
            for (idx, c) in eligible.iter().enumerate() {
                if taken.len() >= top_n || counts.get(cat).copied().unwrap_or(0) >= cap {
                    break;
                }
                if &c.category == cat && !taken.contains(&idx) {
                    taken.insert(idx);
                    *counts.entry(cat.clone()).or_default() += 1;
                }
            }
        }

        // Step 2: global rank under caps.
        for (idx, c) in eligible.iter().enumerate() {
            if taken.contains(&idx) {
                continue;
            }
            let q = self.cfg.quotas.get(&c.category).copied().unwrap_or_default();
            let have = counts.get(&c.category).copied().unwrap_or(0);
            let reason = if taken.len() >= top_n {
                Some("top_n_reached".to_string())
            } else if q.max.is_some_and(|m| have >= m) {
                Some(if q.require_original_link {
                    format!("{}_quota_full_or_untraceable", c.category)
                } else {
                    format!("quota_full:{}", c.category)
                })
            } else {
                None
            };
            match reason {
                Some(reason) => dropped.push(DropRecord {
                    story_id: c.story.story_id.clone(),
                    category: c.category.clone(),
                    reason,
                }),
                None => {
                    taken.insert(idx);
                    *counts.entry(c.category.clone()).or_default() += 1;
                }
            }
        }

        let shortfalls: Vec<Shortfall> = self
            .cfg
            .quotas
            .iter()
            .filter_map(|(cat, q)| {
                let target = q.min?;
                let actual = counts.get(cat).copied().unwrap_or(0);
                (actual < target).then(|| Shortfall {
                    category: cat.clone(),
                    target,
                    actual,
                })
            })
            .collect();

        let mut selected: Vec<RankedStory> = eligible
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| taken.contains(idx))
            .map(|(_, c)| c)
            .collect();
        selected.sort_by(rank_cmp);

        let sections = route_sections(&self.cfg.sections, &mut selected);

        for d in &dropped {
            debug!(target: "diversity", story = %d.story_id, reason = %d.reason, "dropped");
        }
        counter!("diversity_selected_total").increment(selected.len() as u64);
        counter!("diversity_dropped_total").increment(dropped.len() as u64);
        gauge!("diversity_shortfalls").set(shortfalls.len() as f64);
        info!(
            target: "diversity",
            selected = selected.len(),
            dropped = dropped.len(),
            shortfalls = shortfalls.len(),
            "selection complete"
        );

        Selection {
            selected,
            dropped,
            shortfalls,
            sections,
        }
    }
}

/// Route each story to the first section whose track/level rule it meets.
/// A full section leaves the story unsectioned; an empty section gets one gap entry.
fn route_sections(rules: &[SectionRule], selected: &mut [RankedStory]) -> Vec<SectionView> {
    let mut views: Vec<SectionView> = rules
        .iter()
        .map(|r| SectionView {
            name: r.name.clone(),
            story_ids: Vec::new(),
            gap: None,
        })
        .collect();

    for s in selected.iter_mut() {
        let rel = &s.primary.relevance;
        let hit = rules.iter().position(|r| {
            r.track.map_or(true, |t| t == rel.track) && rel.relevance_level >= r.min_relevance_level
        });
        if let Some(pos) = hit {
            let full = rules[pos]
                .max_items
                .is_some_and(|m| views[pos].story_ids.len() >= m);
            if !full {
                views[pos].story_ids.push(s.story.story_id.clone());
                s.section = Some(rules[pos].name.clone());
            }
        }
    }

    for (view, rule) in views.iter_mut().zip(rules) {
        if view.story_ids.is_empty() {
            let track = rule.track.map_or("any".to_string(), |t| t.to_string());
            view.gap = Some(format!(
                "no selected story with track={track} and relevance_level>={}",
                rule.min_relevance_level
            ));
        }
    }
    views
}
