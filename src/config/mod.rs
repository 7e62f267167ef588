//! Pipeline configuration, loaded once per run from a single TOML file.
//!
//! Every component receives its section by value at construction time; nothing
//! in the crate reads configuration from globals. Keyword packs have no
//! built-in defaults: a config without them is rejected.

pub mod analysis;
pub mod relevance;
pub mod scoring;

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

pub use analysis::{AnalysisConfig, ModelPolicyKind};
pub use relevance::{AnchorPack, AnchorPacks, LevelThreshold, NegativePack, RelevanceConfig};
pub use scoring::{Quota, ScoringConfig, SectionRule, SelectionConfig};

pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_PIPELINE_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    pub relevance: RelevanceConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Title/URL normalization knobs used by the fingerprinting step.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Prefixes stripped (repeatedly) from lowercased titles, e.g. "breaking:".
    pub noise_prefixes: Vec<String>,
    /// Tokens dropped from titles before hashing.
    pub noise_words: Vec<String>,
    pub stop_words: Vec<String>,
    /// Tokens are truncated to this many chars before hashing. 0 disables it.
    pub stem_len: usize,
    /// Query parameters that identify an article; queries without them are dropped.
    pub identity_query_params: Vec<String>,
    /// Removed from kept queries. Entries ending in `*` match by prefix.
    pub tracking_params: Vec<String>,
    pub text_max_chars: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        let s = |v: &[&str]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        Self {
            noise_prefixes: s(&[
                "breaking:",
                "update:",
                "updated:",
                "exclusive:",
                "press release:",
                "comment:",
            ]),
            noise_words: s(&["breaking", "update", "updated", "exclusive", "live"]),
            stop_words: s(&[
                "a", "an", "the", "of", "for", "to", "in", "on", "and", "with", "by", "at", "as",
                "is", "are", "its", "gets", "get", "has", "have", "new",
            ]),
            stem_len: 5,
            identity_query_params: s(&["id", "article", "story", "p", "item"]),
            tracking_params: s(&["utm_*", "fbclid", "gclid", "mc_cid", "mc_eid", "ref"]),
            text_max_chars: 1500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub window_hours: i64,
    pub max_other_sources: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            window_hours: 72,
            max_other_sources: 5,
        }
    }
}

impl PipelineConfig {
    /// Load using `$PIPELINE_CONFIG_PATH` or `config/pipeline.toml`.
    pub fn load_default() -> anyhow::Result<Self> {
        let path = std::env::var(ENV_PIPELINE_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_PIPELINE_CONFIG_PATH));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let cfg = Self::from_toml_str(&content)
            .with_context(|| format!("invalid pipeline config at {}", path.display()))?;
        Ok(cfg)
    }

    /// Parse and validate. Any problem is reported as a single fatal `Config` error
    /// carrying every diagnostic found.
    pub fn from_toml_str(s: &str) -> Result<Self, PipelineError> {
        let cfg: PipelineConfig =
            toml::from_str(s).map_err(|e| PipelineError::config(vec![e.to_string()]))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut diags = Vec::new();
        self.relevance.validate(&mut diags);
        self.scoring.validate(&mut diags);
        self.selection.validate(&mut diags);
        self.analysis.validate(&mut diags);
        if self.cluster.window_hours <= 0 {
            diags.push(format!(
                "cluster.window_hours must be > 0 (got {})",
                self.cluster.window_hours
            ));
        }
        if self.normalizer.text_max_chars == 0 {
            diags.push("normalizer.text_max_chars must be > 0".to_string());
        }
        if diags.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::config(diags))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn defaults_fill_everything_but_keyword_packs() {
        let cfg = test_support::config();
        assert_eq!(cfg.cluster.window_hours, 72);
        assert_eq!(cfg.cluster.max_other_sources, 5);
        assert_eq!(cfg.normalizer.stem_len, 5);
        assert_eq!(cfg.analysis.retention_days, 30);
    }

    #[test]
    fn missing_relevance_section_is_a_config_error() {
        let err = PipelineConfig::from_toml_str("[cluster]\nwindow_hours = 24\n").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn all_diagnostics_are_collected() {
        let bad = r#"
[relevance]
thresholds = []
[relevance.anchors.core]
terms = []
[relevance.anchors.frontier]
terms = []
[relevance.negatives]
terms = []
[cluster]
window_hours = 0
[analysis]
primary_model = ""
fallback_model = "f"
"#;
        match PipelineConfig::from_toml_str(bad) {
            Err(PipelineError::Config { diagnostics }) => {
                assert!(diagnostics.iter().any(|d| d.contains("thresholds")));
                assert!(diagnostics.iter().any(|d| d.contains("anchor")));
                assert!(diagnostics.iter().any(|d| d.contains("window_hours")));
                assert!(diagnostics.iter().any(|d| d.contains("primary_model")));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[serial_test::serial]
    #[test]
    fn load_default_honours_env_path() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("pipeline.toml");
        fs::write(&p, test_support::TEST_TOML).unwrap();

        env::set_var(ENV_PIPELINE_CONFIG_PATH, p.display().to_string());
        let cfg = PipelineConfig::load_default().unwrap();
        assert_eq!(cfg.analysis.primary_model, "primary");

        env::set_var(ENV_PIPELINE_CONFIG_PATH, tmp.path().join("nope.toml"));
        assert!(PipelineConfig::load_default().is_err());
        env::remove_var(ENV_PIPELINE_CONFIG_PATH);
    }
}
