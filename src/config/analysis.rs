// src/config/analysis.rs
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelPolicyKind {
    /// Primary for core stories at or above `core_min_level`, fallback otherwise.
    Tiered,
    PrimaryOnly,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub primary_model: String,
    pub fallback_model: String,
    pub policy: ModelPolicyKind,
    pub core_min_level: u8,
    pub prompt_version: String,
    pub timeout_ms: u64,
    /// Extra attempts per tier after the first call.
    pub retries: u32,
    pub backoff_ms: u64,
    pub retention_days: u32,
    pub concurrency: usize,
    /// Directory for the JSONL day-partitioned cache. `None` keeps the cache in memory.
    pub cache_dir: Option<PathBuf>,
    pub degraded_summary_chars: usize,
    /// OpenAI-compatible chat completions endpoint.
    pub endpoint: String,
    /// Name of the env var holding the bearer token. Unset means no auth header.
    pub api_key_env: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            primary_model: "gpt-4o".into(),
            fallback_model: "gpt-4o-mini".into(),
            policy: ModelPolicyKind::Tiered,
            core_min_level: 3,
            prompt_version: "v1".into(),
            timeout_ms: 20_000,
            retries: 1,
            backoff_ms: 500,
            retention_days: 30,
            concurrency: 4,
            cache_dir: None,
            degraded_summary_chars: 100,
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            api_key_env: "OPENAI_API_KEY".into(),
        }
    }
}

impl AnalysisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub(crate) fn validate(&self, diags: &mut Vec<String>) {
        if self.primary_model.trim().is_empty() {
            diags.push("analysis.primary_model must not be empty".into());
        }
        if self.fallback_model.trim().is_empty() {
            diags.push("analysis.fallback_model must not be empty".into());
        }
        if self.timeout_ms == 0 {
            diags.push("analysis.timeout_ms must be > 0".into());
        }
        if self.concurrency == 0 {
            diags.push("analysis.concurrency must be > 0".into());
        }
        if self.retention_days == 0 {
            diags.push("analysis.retention_days must be > 0".into());
        }
        if self.core_min_level > 4 {
            diags.push("analysis.core_min_level must be within 0..=4".into());
        }
    }
}
