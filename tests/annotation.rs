// tests/annotation.rs
mod common;

use common::{as_of, item, pipeline_with};
use std::path::Path;
use std::sync::Arc;
use story_digest::analyze::annotator::{BOTH_MODELS_FAILED, DEGRADED_MODEL};
use story_digest::analyze::{
    AnalysisCache, AnnotationState, JsonlCache, MemoryCache, MockBehavior, MockGenerator,
};
use story_digest::{Pipeline, PipelineOutput};

fn core_item() -> story_digest::ingest::types::RawItem {
    let mut it = item("c1", "https://fda.gov/news/c1", "FDA clears diagnostic assay", 9, "regulatory");
    it.summary = "The agency cleared a rapid diagnostic assay for respiratory panels, \
                  with labelling limited to professional use in accredited laboratories."
        .into();
    it
}

#[tokio::test(start_paused = true)]
async fn primary_timeout_is_rerouted_to_fallback() {
    let gen = MockGenerator::new().with_model("primary", MockBehavior::Hang);
    let p = pipeline_with(gen, Arc::new(MemoryCache::new()));
    let out = p.run(vec![core_item()], as_of()).await;

    let a = &out.stories[0];
    assert_eq!(a.analysis.used_model, "fallback");
    assert_eq!(a.analysis.fallback_from.as_deref(), Some("primary"));
    assert!(!a.analysis.degraded);
    assert_eq!(
        a.analysis_path,
        vec![
            AnnotationState::Pending,
            AnnotationState::PrimaryAttempt,
            AnnotationState::FallbackAttempt,
            AnnotationState::Success,
        ]
    );
    assert_eq!(out.audit.fallbacks, 1);
}

#[tokio::test(start_paused = true)]
async fn both_models_failing_still_emits_the_story() {
    let gen = MockGenerator::new()
        .with_model("primary", MockBehavior::Fail)
        .with_model("fallback", MockBehavior::Hang);
    let cache = Arc::new(MemoryCache::new());
    let p = pipeline_with(gen, cache.clone());
    let out = p.run(vec![core_item()], as_of()).await;

    assert_eq!(out.stories.len(), 1);
    let a = &out.stories[0].analysis;
    assert!(a.degraded);
    assert_eq!(a.degraded_reason.as_deref(), Some(BOTH_MODELS_FAILED));
    assert_eq!(a.used_model, DEGRADED_MODEL);
    assert!(a.summary.ends_with("..."));
    assert!(a.summary.chars().count() <= 100);
    // Degraded output is never cached, so the next run retries the models.
    assert_eq!(cache.len().await, 0);
}

async fn run_with_jsonl(dir: &Path, gen: Arc<MockGenerator>) -> PipelineOutput {
    let cache: Arc<dyn AnalysisCache> = Arc::new(JsonlCache::new(dir, 30).unwrap());
    let p = Pipeline::new(common::config(), cache, gen).unwrap();
    p.run(
        vec![
            core_item(),
            item("m1", "https://media.example/pcr", "PCR capacity grows", 10, "media"),
        ],
        as_of(),
    )
    .await
}

fn summaries(o: &PipelineOutput) -> Vec<String> {
    o.stories
        .iter()
        .map(|s| s.analysis.summary.clone())
        .collect()
}

#[tokio::test]
async fn jsonl_cache_makes_reruns_free() {
    let tmp = tempfile::tempdir().unwrap();
    let gen = Arc::new(MockGenerator::new());

    let first = run_with_jsonl(tmp.path(), gen.clone()).await;
    assert_eq!(first.audit.generated, 2);
    assert_eq!(gen.call_count(), 2);

    let second = run_with_jsonl(tmp.path(), gen.clone()).await;
    assert_eq!(gen.call_count(), 2);
    assert_eq!(second.audit.cache_hits, 2);
    assert_eq!(summaries(&first), summaries(&second));
}
