// tests/common/mod.rs
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use story_digest::analyze::{AnalysisCache, MemoryCache, MockGenerator};
use story_digest::ingest::types::{RawItem, SourceMeta};
use story_digest::{Pipeline, PipelineConfig};

pub const TOML: &str = r#"
[relevance]
override_anchors = ["recall"]
thresholds = [
    { min_score = 1.0, level = 1 },
    { min_score = 2.0, level = 2 },
    { min_score = 3.0, level = 3 },
    { min_score = 6.0, level = 4 },
]

[relevance.anchors.core]
weight = 2.0
terms = ["diagnostic", "FDA", "assay", "pcr"]

[relevance.anchors.frontier]
weight = 2.0
terms = ["single-cell", "proteomics", "microfluidic"]

[relevance.negatives]
penalty = 1.0
terms = ["earnings", "layoff"]

[analysis]
primary_model = "primary"
fallback_model = "fallback"
timeout_ms = 50
retries = 1
backoff_ms = 10
"#;

pub fn config() -> PipelineConfig {
    PipelineConfig::from_toml_str(TOML).expect("test config")
}

pub fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap()
}

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, hour, 0, 0).unwrap()
}

pub fn item(id: &str, url: &str, title: &str, hour: u32, category: &str) -> RawItem {
    RawItem {
        id: id.into(),
        url: url.into(),
        title: title.into(),
        summary: format!("{title}. The agency notice covers scope, labelling and timelines."),
        published_at: Some(at(hour)),
        source: SourceMeta {
            name: format!("{category} desk {id}"),
            category: category.into(),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn pipeline_with(gen: MockGenerator, cache: Arc<dyn AnalysisCache>) -> Pipeline {
    Pipeline::new(config(), cache, Arc::new(gen)).expect("pipeline")
}

pub fn pipeline() -> Pipeline {
    pipeline_with(MockGenerator::new(), Arc::new(MemoryCache::new()))
}
