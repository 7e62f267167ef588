// src/lib.rs
// Public library surface for the CLI and integration tests.

pub mod analyze;
pub mod audit;
pub mod cluster;
pub mod config;
pub mod diversity;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod ledger;
pub mod metrics;
pub mod relevance;
pub mod scoring;
pub mod source_weights;

// ---- Re-exports for stable public API ----
pub use crate::config::PipelineConfig;
pub use crate::engine::{Pipeline, PipelineOutput};
pub use crate::error::{PipelineError, Result};
