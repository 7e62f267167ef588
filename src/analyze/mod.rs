// src/analyze/mod.rs
//! Analysis annotation: cache, generator adapters and the tiered annotator.

pub mod ai_adapter;
pub mod annotator;
pub mod cache;

use std::sync::Arc;

use crate::config::AnalysisConfig;
use crate::error::Result;

pub use crate::analyze::ai_adapter::{
    build_generator, DynGenerator, Generation, Generator, MockBehavior, MockGenerator, TokenUsage,
};
pub use crate::analyze::annotator::{cache_key, AnnotatedStory, AnnotationState, Annotator, Tier};
pub use crate::analyze::cache::{AnalysisCache, AnalysisRecord, JsonlCache, MemoryCache};

/// Cache backend selected by `analysis.cache_dir`: JSONL partitions when set, memory otherwise.
pub fn build_cache(cfg: &AnalysisConfig) -> Result<Arc<dyn AnalysisCache>> {
    Ok(match &cfg.cache_dir {
        Some(dir) => Arc::new(JsonlCache::new(dir, cfg.retention_days)?),
        None => Arc::new(MemoryCache::new()),
    })
}
