//! # Pipeline engine
//! Wires the stages together: normalize, classify, score, cluster, select, annotate.
//! No file I/O here; readers, the ledger and output writing live at the CLI edge,
//! so a batch can be replayed or tested entirely in memory.
//!
//! Everything except annotation is a pure function of `(items, config, as_of)`.
//! Annotation goes through the cache and the generator, and degrades instead of failing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::analyze::annotator::log_annotation_summary;
use crate::analyze::{AnalysisCache, AnnotatedStory, Annotator, DynGenerator};
use crate::audit::RunAudit;
use crate::cluster::ClusterBuilder;
use crate::config::PipelineConfig;
use crate::diversity::{DiversitySelector, SectionView};
use crate::error::{PipelineError, Result};
use crate::ingest::reader::ReadOutcome;
use crate::ingest::types::RawItem;
use crate::ingest::{normalize_items, NormalizedItem};
use crate::relevance::Classifier;
use crate::scoring::{ScoredItem, Scorer};

/// Result of one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub as_of: DateTime<Utc>,
    /// Selected stories in rank order, each with its analysis.
    pub stories: Vec<AnnotatedStory>,
    pub sections: Vec<SectionView>,
    pub audit: RunAudit,
    /// Every scored item of the batch, for the ledger.
    #[serde(skip)]
    pub scored: Vec<ScoredItem>,
}

pub struct Pipeline {
    cfg: PipelineConfig,
    classifier: Classifier,
    scorer: Scorer,
    clusterer: ClusterBuilder,
    selector: DiversitySelector,
    annotator: Annotator,
}

impl Pipeline {
    /// Validates the config once more; an invalid config never reaches a stage.
    pub fn new(
        cfg: PipelineConfig,
        cache: Arc<dyn AnalysisCache>,
        generator: DynGenerator,
    ) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            classifier: Classifier::new(cfg.relevance.clone()),
            scorer: Scorer::new(cfg.scoring.clone()),
            clusterer: ClusterBuilder::new(cfg.cluster.clone()),
            selector: DiversitySelector::new(cfg.selection.clone()),
            annotator: Annotator::new(cfg.analysis.clone(), cache, generator),
            cfg,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Normalize, classify and score. Pure; output order follows input order.
    pub fn score_items(&self, items: Vec<RawItem>, as_of: DateTime<Utc>) -> Vec<ScoredItem> {
        normalize_items(items, &self.cfg.normalizer)
            .into_iter()
            .map(|n| self.score_one(n, as_of))
            .collect()
    }

    fn score_one(&self, n: NormalizedItem, as_of: DateTime<Utc>) -> ScoredItem {
        let relevance = self.classifier.classify(&n.item);
        let score = self.scorer.score(&n.item, as_of);
        debug!(
            target: "scoring",
            id = %n.item.id,
            level = relevance.relevance_level,
            quality = score.quality_score,
            grade = %score.evidence_grade,
            "scored"
        );
        ScoredItem {
            item: n.item,
            fingerprint: n.fingerprint,
            relevance,
            score,
        }
    }

    /// Full batch from a reader outcome; skipped lines land in the audit.
    pub async fn run_read(&self, read: ReadOutcome, as_of: DateTime<Utc>) -> PipelineOutput {
        let mut audit = RunAudit::default();
        audit.items_read = read.items.len();
        audit.record_skips(&read.skipped);
        let scored = self.score_items(read.items, as_of);
        self.finish(scored, as_of, audit).await
    }

    pub async fn run(&self, items: Vec<RawItem>, as_of: DateTime<Utc>) -> PipelineOutput {
        self.run_read(
            ReadOutcome {
                items,
                skipped: Vec::new(),
            },
            as_of,
        )
        .await
    }

    /// Re-run clustering, selection and annotation over already scored items.
    /// Relevance was re-validated on deserialization, so corrections show up again.
    pub async fn run_from_scored(
        &self,
        scored: Vec<ScoredItem>,
        skipped: &[PipelineError],
        as_of: DateTime<Utc>,
    ) -> PipelineOutput {
        let mut audit = RunAudit::default();
        audit.items_read = scored.len();
        audit.record_skips(skipped);
        self.finish(scored, as_of, audit).await
    }

    async fn finish(
        &self,
        scored: Vec<ScoredItem>,
        as_of: DateTime<Utc>,
        mut audit: RunAudit,
    ) -> PipelineOutput {
        audit.absorb_items(&scored);

        // 1) Cluster
        let outcome = self.clusterer.build(&scored);
        audit.absorb_stories(&outcome.stories);
        audit.conflicts = outcome.conflicts;

        // 2) Select
        let candidates = self.selector.candidates(outcome.stories, &scored);
        let selection = self.selector.select(candidates);
        audit.absorb_selection(&selection);

        // 3) Annotate
        let stories = self.annotator.annotate_all(selection.selected).await;
        log_annotation_summary(&stories);
        audit.absorb_annotations(&stories);

        audit.log_summary();
        crate::metrics::record_run(&audit);
        info!(target: "pipeline", as_of = %as_of, stories = stories.len(), "batch complete");

        PipelineOutput {
            as_of,
            stories,
            sections: selection.sections,
            audit,
            scored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{MemoryCache, MockBehavior, MockGenerator};
    use crate::config::test_support;
    use crate::ingest::types::SourceMeta;
    use chrono::TimeZone;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap()
    }

    fn item(id: &str, url: &str, title: &str, hour: u32, category: &str) -> RawItem {
        RawItem {
            id: id.into(),
            url: url.into(),
            title: title.into(),
            summary: format!("{title}. Details on the clearance and what it covers for labs."),
            published_at: Some(Utc.with_ymd_and_hms(2024, 3, 5, hour, 0, 0).unwrap()),
            source: SourceMeta {
                name: format!("{category} desk"),
                category: category.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn pipeline(gen: MockGenerator) -> Pipeline {
        Pipeline::new(
            test_support::config(),
            Arc::new(MemoryCache::new()),
            Arc::new(gen),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn duplicates_collapse_and_every_story_gets_analysis() {
        let p = pipeline(MockGenerator::new());
        let mut a = item("a", "https://news.one/fda-xyz", "FDA clears XYZ diagnostic test", 9, "media");
        let mut b = item("b", "https://fda.gov/news/xyz", "FDA clears XYZ diagnostic test", 8, "regulatory");
        a.canonical_url = Some("https://fda.gov/news/xyz".into());
        b.canonical_url = a.canonical_url.clone();
        let items = vec![
            a,
            b,
            item("c", "https://biz.example/q3", "Quarterly earnings beat", 10, "company"),
        ];
        let out = p.run(items, as_of()).await;

        assert_eq!(out.audit.items_read, 3);
        assert_eq!(out.audit.stories, 2);
        // The earnings item hits a negative with no anchor and is never annotated.
        assert_eq!(out.stories.len(), 1);
        assert_eq!(out.audit.dropped.len(), 1);
        assert_eq!(out.audit.dropped[0].reason, crate::diversity::EXCLUDED_REASON);
        assert_eq!(out.audit.generated, 1);
        assert!(out.stories.iter().all(|s| !s.analysis.summary.is_empty()));

        let fda = out
            .stories
            .iter()
            .find(|s| s.ranked.story.member_item_ids.len() == 2)
            .unwrap();
        assert_eq!(fda.ranked.primary.item.id, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn failing_models_degrade_instead_of_failing_the_batch() {
        let gen = MockGenerator::new()
            .with_model("primary", MockBehavior::Fail)
            .with_model("fallback", MockBehavior::Fail);
        let p = pipeline(gen);
        let out = p
            .run(
                vec![item("a", "https://fda.gov/a", "FDA clears assay", 9, "regulatory")],
                as_of(),
            )
            .await;
        assert_eq!(out.stories.len(), 1);
        assert!(out.stories[0].analysis.degraded);
        assert_eq!(out.audit.degraded, 1);
    }

    #[tokio::test]
    async fn skipped_lines_are_reported_not_fatal() {
        let p = pipeline(MockGenerator::new());
        let read = ReadOutcome {
            items: vec![item("a", "https://fda.gov/a", "FDA clears assay", 9, "regulatory")],
            skipped: vec![PipelineError::input(2, "missing id")],
        };
        let out = p.run_read(read, as_of()).await;
        assert_eq!(out.audit.items_skipped, 1);
        assert_eq!(out.audit.skipped_lines[0].line, 2);
        assert_eq!(out.stories.len(), 1);
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut cfg = test_support::config();
        cfg.cluster.window_hours = 0;
        let err = Pipeline::new(cfg, Arc::new(MemoryCache::new()), Arc::new(MockGenerator::new()))
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }
}
