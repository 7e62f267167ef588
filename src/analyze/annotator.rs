// src/analyze/annotator.rs
//! Cache-first annotation with tiered model fallback.
//!
//! Each story walks an explicit state machine:
//! `Pending -> CacheHit` or `Pending -> <preferred tier> -> <other tier> -> Degraded`,
//! stopping at the first terminal state (`CacheHit`, `Success`, `Degraded`).

use chrono::Utc;
use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::analyze::ai_adapter::{DynGenerator, Generation, TokenUsage};
use crate::analyze::cache::{AnalysisCache, AnalysisRecord};
use crate::config::{AnalysisConfig, ModelPolicyKind};
use crate::diversity::RankedStory;
use crate::error::{PipelineError, Result};
use crate::relevance::{RelevanceAnnotation, Track};

pub const DEGRADED_MODEL: &str = "degraded-fallback";
pub const BOTH_MODELS_FAILED: &str = "both_models_failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Primary,
    Fallback,
}

impl Tier {
    fn other(self) -> Tier {
        match self {
            Tier::Primary => Tier::Fallback,
            Tier::Fallback => Tier::Primary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationState {
    Pending,
    CacheHit,
    PrimaryAttempt,
    FallbackAttempt,
    Success,
    Degraded,
}

impl AnnotationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnnotationState::CacheHit | AnnotationState::Success | AnnotationState::Degraded
        )
    }

    fn attempt(tier: Tier) -> AnnotationState {
        match tier {
            Tier::Primary => AnnotationState::PrimaryAttempt,
            Tier::Fallback => AnnotationState::FallbackAttempt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedStory {
    #[serde(flatten)]
    pub ranked: RankedStory,
    pub analysis: AnalysisRecord,
    /// States visited, starting at `Pending`.
    pub analysis_path: Vec<AnnotationState>,
}

impl AnnotatedStory {
    pub fn final_state(&self) -> AnnotationState {
        self.analysis_path
            .last()
            .copied()
            .unwrap_or(AnnotationState::Pending)
    }
}

/// `story_id|url_norm`, or just `url_norm` when the item is not part of a story.
pub fn cache_key(story_id: Option<&str>, url_norm: &str) -> String {
    match story_id {
        Some(s) if !s.is_empty() => format!("{s}|{url_norm}"),
        _ => url_norm.to_string(),
    }
}

pub struct Annotator {
    cfg: AnalysisConfig,
    cache: Arc<dyn AnalysisCache>,
    generator: DynGenerator,
}

impl Annotator {
    pub fn new(cfg: AnalysisConfig, cache: Arc<dyn AnalysisCache>, generator: DynGenerator) -> Self {
        Self {
            cfg,
            cache,
            generator,
        }
    }

    pub fn preferred_tier(&self, rel: &RelevanceAnnotation) -> Tier {
        match self.cfg.policy {
            ModelPolicyKind::PrimaryOnly => Tier::Primary,
            ModelPolicyKind::Tiered => {
                if rel.track == Track::Core && rel.relevance_level >= self.cfg.core_min_level {
                    Tier::Primary
                } else {
                    Tier::Fallback
                }
            }
        }
    }

    fn model_for(&self, tier: Tier) -> &str {
        match tier {
            Tier::Primary => &self.cfg.primary_model,
            Tier::Fallback => &self.cfg.fallback_model,
        }
    }

    /// Annotate stories with bounded concurrency. Output keeps input order.
    pub async fn annotate_all(&self, stories: Vec<RankedStory>) -> Vec<AnnotatedStory> {
        let limit = self.cfg.concurrency.max(1);
        stream::iter(stories)
            .map(|s| self.annotate(s))
            .buffered(limit)
            .collect()
            .await
    }

    pub async fn annotate(&self, ranked: RankedStory) -> AnnotatedStory {
        let url_norm = ranked.primary.fingerprint.url_key();
        let key = cache_key(Some(&ranked.story.story_id), &url_norm);
        let preferred = self.preferred_tier(&ranked.primary.relevance);
        let text = generation_input(&ranked);

        let mut state = AnnotationState::Pending;
        let mut path = vec![state];
        let mut tried: Vec<Tier> = Vec::with_capacity(2);
        let mut record: Option<AnalysisRecord> = None;

        while !state.is_terminal() {
            state = match state {
                AnnotationState::Pending => match self.cache.get(&key).await {
                    Ok(Some(hit)) if !hit.degraded && hit.prompt_version == self.cfg.prompt_version => {
                        record = Some(hit);
                        AnnotationState::CacheHit
                    }
                    Ok(_) => AnnotationState::attempt(preferred),
                    Err(e) => {
                        warn!(target: "analysis", story = %ranked.story.story_id, error = %e, "cache read failed; treating as miss");
                        AnnotationState::attempt(preferred)
                    }
                },
                AnnotationState::PrimaryAttempt | AnnotationState::FallbackAttempt => {
                    let tier = if state == AnnotationState::PrimaryAttempt {
                        Tier::Primary
                    } else {
                        Tier::Fallback
                    };
                    tried.push(tier);
                    let model = self.model_for(tier).to_string();
                    match self.call_with_retries(&model, &text).await {
                        Ok(generation) => {
                            let fallback_from =
                                (tier != preferred).then(|| self.model_for(preferred).to_string());
                            record = Some(self.success_record(
                                &ranked,
                                &key,
                                &url_norm,
                                preferred,
                                &model,
                                fallback_from,
                                generation,
                            ));
                            AnnotationState::Success
                        }
                        Err(e) => {
                            warn!(target: "analysis", story = %ranked.story.story_id, %model, error = %e, "generation failed");
                            counter!("analysis_generation_errors_total").increment(1);
                            let next = tier.other();
                            if tried.contains(&next) {
                                AnnotationState::Degraded
                            } else {
                                AnnotationState::attempt(next)
                            }
                        }
                    }
                }
                terminal => terminal,
            };
            path.push(state);
        }

        let analysis = match (state, record) {
            (AnnotationState::CacheHit, Some(r)) => {
                counter!("analysis_cache_hits_total").increment(1);
                r
            }
            (AnnotationState::Success, Some(r)) => {
                counter!("analysis_generated_total").increment(1);
                if r.fallback_from.is_some() {
                    counter!("analysis_fallback_total").increment(1);
                }
                if let Err(e) = self.cache.put(&r).await {
                    warn!(target: "analysis", story = %ranked.story.story_id, error = %e, "cache write failed");
                }
                r
            }
            _ => {
                counter!("analysis_degraded_total").increment(1);
                self.degraded_record(&ranked, &key, &url_norm, preferred)
            }
        };

        debug!(target: "analysis", story = %ranked.story.story_id, state = ?state, used_model = %analysis.used_model, "annotated");
        AnnotatedStory {
            ranked,
            analysis,
            analysis_path: path,
        }
    }

    /// One tier: per-call timeout, fixed retry count, fixed backoff.
    async fn call_with_retries(&self, model: &str, text: &str) -> Result<Generation> {
        let mut last = PipelineError::generation(model, "not attempted");
        for attempt in 0..=self.cfg.retries {
            match tokio::time::timeout(self.cfg.timeout(), self.generator.generate(model, text))
                .await
            {
                Ok(Ok(g)) => return Ok(g),
                Ok(Err(e)) => last = e,
                Err(_) => {
                    last = PipelineError::generation(
                        model,
                        format!("timed out after {}ms", self.cfg.timeout_ms),
                    )
                }
            }
            if attempt < self.cfg.retries {
                tokio::time::sleep(self.cfg.backoff()).await;
            }
        }
        Err(last)
    }

    #[allow(clippy::too_many_arguments)]
    fn success_record(
        &self,
        ranked: &RankedStory,
        key: &str,
        url_norm: &str,
        preferred: Tier,
        used_model: &str,
        fallback_from: Option<String>,
        g: Generation,
    ) -> AnalysisRecord {
        AnalysisRecord {
            item_key: key.to_string(),
            story_id: Some(ranked.story.story_id.clone()),
            url_norm: url_norm.to_string(),
            summary: g.summary,
            impact: g.impact,
            action: g.action,
            model: self.model_for(preferred).to_string(),
            used_model: used_model.to_string(),
            fallback_from,
            prompt_version: self.cfg.prompt_version.clone(),
            degraded: false,
            degraded_reason: None,
            token_usage: g.token_usage,
            generated_at: Utc::now(),
        }
    }

    fn degraded_record(
        &self,
        ranked: &RankedStory,
        key: &str,
        url_norm: &str,
        preferred: Tier,
    ) -> AnalysisRecord {
        let item = &ranked.primary.item;
        let source = if item.body().trim().is_empty() {
            item.title.as_str()
        } else {
            item.body()
        };
        let summary = truncate_chars(source, self.cfg.degraded_summary_chars);
        AnalysisRecord {
            item_key: key.to_string(),
            story_id: Some(ranked.story.story_id.clone()),
            url_norm: url_norm.to_string(),
            summary,
            impact: String::new(),
            action: String::new(),
            model: self.model_for(preferred).to_string(),
            used_model: DEGRADED_MODEL.to_string(),
            fallback_from: None,
            prompt_version: self.cfg.prompt_version.clone(),
            degraded: true,
            degraded_reason: Some(BOTH_MODELS_FAILED.to_string()),
            token_usage: TokenUsage::default(),
            generated_at: Utc::now(),
        }
    }
}

fn generation_input(r: &RankedStory) -> String {
    let it = &r.primary.item;
    let mut s = format!("Title: {}\nSource: {}\n", it.title, it.source.name);
    if let Some(orig) = &r.primary.score.original_source_url {
        s.push_str(&format!("Original: {orig}\n"));
    }
    s.push('\n');
    s.push_str(it.body());
    s
}

/// First `max` chars, with a trailing ellipsis when something was cut.
fn truncate_chars(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// Summary line for the run log.
pub fn log_annotation_summary(annotated: &[AnnotatedStory]) {
    let count = |st: AnnotationState| annotated.iter().filter(|a| a.final_state() == st).count();
    info!(
        target: "analysis",
        stories = annotated.len(),
        cache_hits = count(AnnotationState::CacheHit),
        generated = count(AnnotationState::Success),
        degraded = count(AnnotationState::Degraded),
        "annotation complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::{MockBehavior, MockGenerator};
    use crate::analyze::cache::MemoryCache;
    use crate::cluster::test_support::mk_item;
    use crate::cluster::ClusterBuilder;
    use crate::config::{ClusterConfig, SelectionConfig};
    use crate::diversity::DiversitySelector;

    fn cfg() -> AnalysisConfig {
        AnalysisConfig {
            primary_model: "primary".into(),
            fallback_model: "fallback".into(),
            timeout_ms: 50,
            retries: 1,
            backoff_ms: 10,
            ..Default::default()
        }
    }

    fn ranked(level: u8, track: &str) -> RankedStory {
        let mut it = mk_item("a", "https://e.com/a", "FDA clears XYZ test", 9, 0.9);
        it.item.summary = "A summary long enough to be truncated when degraded output is produced, \
                           padded with a few more words so it clears one hundred characters."
            .into();
        it.relevance = RelevanceAnnotation::validated(
            track,
            level as i64,
            vec![],
            vec![],
            vec![],
            String::new(),
            0.0,
        );
        let items = vec![it];
        let stories = ClusterBuilder::new(ClusterConfig::default()).build(&items).stories;
        DiversitySelector::new(SelectionConfig::default())
            .candidates(stories, &items)
            .remove(0)
    }

    #[test]
    fn tier_policy_routes_core_high_level_to_primary() {
        let a = Annotator::new(cfg(), Arc::new(MemoryCache::new()), Arc::new(MockGenerator::new()));
        let core3 = ranked(3, "core").primary.relevance;
        let core2 = ranked(2, "core").primary.relevance;
        let front4 = ranked(4, "frontier").primary.relevance;
        assert_eq!(a.preferred_tier(&core3), Tier::Primary);
        assert_eq!(a.preferred_tier(&core2), Tier::Fallback);
        assert_eq!(a.preferred_tier(&front4), Tier::Fallback);

        let mut only = cfg();
        only.policy = ModelPolicyKind::PrimaryOnly;
        let a = Annotator::new(only, Arc::new(MemoryCache::new()), Arc::new(MockGenerator::new()));
        assert_eq!(a.preferred_tier(&front4), Tier::Primary);
    }

    #[test]
    fn cache_key_shapes() {
        assert_eq!(cache_key(Some("s1"), "e.com/a"), "s1|e.com/a");
        assert_eq!(cache_key(None, "e.com/a"), "e.com/a");
        assert_eq!(cache_key(Some(""), "e.com/a"), "e.com/a");
    }

    #[tokio::test(start_paused = true)]
    async fn primary_timeout_falls_back() {
        let gen = Arc::new(MockGenerator::new().with_model("primary", MockBehavior::Hang));
        let a = Annotator::new(cfg(), Arc::new(MemoryCache::new()), gen.clone());
        let out = a.annotate(ranked(3, "core")).await;
        assert_eq!(out.analysis.used_model, "fallback");
        assert_eq!(out.analysis.fallback_from.as_deref(), Some("primary"));
        assert!(!out.analysis.degraded);
        assert_eq!(
            out.analysis_path,
            vec![
                AnnotationState::Pending,
                AnnotationState::PrimaryAttempt,
                AnnotationState::FallbackAttempt,
                AnnotationState::Success
            ]
        );
        assert_eq!(gen.calls_for("primary"), 2);
        assert_eq!(gen.calls_for("fallback"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn both_tiers_failing_degrades_without_caching() {
        let gen = Arc::new(
            MockGenerator::new()
                .with_model("primary", MockBehavior::Fail)
                .with_model("fallback", MockBehavior::Fail),
        );
        let cache = Arc::new(MemoryCache::new());
        let a = Annotator::new(cfg(), cache.clone(), gen.clone());
        let out = a.annotate(ranked(3, "core")).await;
        assert!(out.analysis.degraded);
        assert_eq!(out.analysis.degraded_reason.as_deref(), Some(BOTH_MODELS_FAILED));
        assert_eq!(out.analysis.used_model, DEGRADED_MODEL);
        assert!(out.analysis.summary.ends_with("..."));
        assert!(out.analysis.summary.chars().count() <= 100);
        assert_eq!(out.final_state(), AnnotationState::Degraded);
        assert_eq!(cache.len().await, 0);
        assert_eq!(gen.call_count(), 4);
    }

    #[tokio::test]
    async fn second_pass_hits_cache() {
        let gen = Arc::new(MockGenerator::new());
        let a = Annotator::new(cfg(), Arc::new(MemoryCache::new()), gen.clone());
        let first = a.annotate_all(vec![ranked(3, "core")]).await;
        assert_eq!(first[0].final_state(), AnnotationState::Success);
        assert_eq!(gen.call_count(), 1);

        let second = a.annotate_all(vec![ranked(3, "core")]).await;
        assert_eq!(second[0].final_state(), AnnotationState::CacheHit);
        assert_eq!(second[0].analysis, first[0].analysis);
        assert_eq!(gen.call_count(), 1);
    }
}
