//! # Run audit
//! Explain object emitted with every run: counts for each handled error class
//! plus the gap report (drops, shortfalls, empty sections) and cluster conflicts.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analyze::{AnnotatedStory, AnnotationState};
use crate::cluster::{ClusterConflict, Story};
use crate::diversity::{DropRecord, Selection, SectionView, Shortfall};
use crate::error::PipelineError;
use crate::scoring::ScoredItem;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedLine {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub item_id: String,
    pub detail: String,
}

/// A primary change inside a story, kept even when the story is not selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub story_id: String,
    pub from_item_id: String,
    pub to_item_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunAudit {
    pub items_read: usize,
    pub items_skipped: usize,
    pub skipped_lines: Vec<SkippedLine>,
    /// Items whose title normalized to nothing (no title-hash probe).
    pub low_confidence_items: Vec<String>,
    pub consistency_corrections: usize,
    pub corrections: Vec<CorrectionRecord>,
    pub stories: usize,
    pub selected: usize,
    pub cache_hits: usize,
    pub generated: usize,
    pub fallbacks: usize,
    pub degraded: usize,
    pub conflicts: Vec<ClusterConflict>,
    pub promotions: Vec<PromotionRecord>,
    pub dropped: Vec<DropRecord>,
    pub shortfalls: Vec<Shortfall>,
    pub sections: Vec<SectionView>,
}

impl RunAudit {
    pub fn record_skips(&mut self, skipped: &[PipelineError]) {
        self.items_skipped += skipped.len();
        self.skipped_lines.extend(skipped.iter().map(|e| match e {
            PipelineError::Input { line, message } => SkippedLine {
                line: *line,
                message: message.clone(),
            },
            other => SkippedLine {
                line: 0,
                message: other.to_string(),
            },
        }));
    }

    pub fn absorb_items(&mut self, scored: &[ScoredItem]) {
        for s in scored {
            if s.fingerprint.low_confidence {
                self.low_confidence_items.push(s.item.id.clone());
            }
            for c in &s.relevance.corrections {
                self.corrections.push(CorrectionRecord {
                    item_id: s.item.id.clone(),
                    detail: c.clone(),
                });
            }
        }
        self.consistency_corrections = self.corrections.len();
    }

    /// Story count and promotions, taken before selection can drop any story.
    pub fn absorb_stories(&mut self, stories: &[Story]) {
        self.stories = stories.len();
        self.promotions = stories
            .iter()
            .flat_map(|s| {
                s.promotions.iter().map(|p| PromotionRecord {
                    story_id: s.story_id.clone(),
                    from_item_id: p.from_item_id.clone(),
                    to_item_id: p.to_item_id.clone(),
                    reason: p.reason.clone(),
                })
            })
            .collect();
    }

    pub fn absorb_selection(&mut self, sel: &Selection) {
        self.selected = sel.selected.len();
        self.dropped = sel.dropped.clone();
        self.shortfalls = sel.shortfalls.clone();
        self.sections = sel.sections.clone();
    }

    pub fn absorb_annotations(&mut self, annotated: &[AnnotatedStory]) {
        for a in annotated {
            match a.final_state() {
                AnnotationState::CacheHit => self.cache_hits += 1,
                AnnotationState::Success => {
                    self.generated += 1;
                    if a.analysis.fallback_from.is_some() {
                        self.fallbacks += 1;
                    }
                }
                AnnotationState::Degraded => self.degraded += 1,
                _ => {}
            }
        }
    }

    pub fn log_summary(&self) {
        info!(
            target: "pipeline",
            read = self.items_read,
            skipped = self.items_skipped,
            corrections = self.consistency_corrections,
            stories = self.stories,
            selected = self.selected,
            cache_hits = self.cache_hits,
            generated = self.generated,
            degraded = self.degraded,
            shortfalls = self.shortfalls.len(),
            conflicts = self.conflicts.len(),
            promotions = self.promotions.len(),
            "run audit"
        );
    }
}
