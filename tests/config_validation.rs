// tests/config_validation.rs
use std::path::Path;
use story_digest::config::{ModelPolicyKind, PipelineConfig};
use story_digest::source_weights::SourceBucket;
use story_digest::PipelineError;

#[test]
fn shipped_config_loads() {
    let cfg = PipelineConfig::load_from(Path::new("config/pipeline.toml")).unwrap();
    assert_eq!(cfg.analysis.policy, ModelPolicyKind::Tiered);
    assert_eq!(cfg.cluster.window_hours, 72);
    assert_eq!(cfg.selection.top_n, 20);
    assert_eq!(
        cfg.scoring.category_aliases.get("government"),
        Some(&SourceBucket::Regulatory)
    );
    let agg = cfg.selection.quotas.get("aggregator").unwrap();
    assert_eq!(agg.max, Some(2));
    assert!(agg.require_original_link);
}

#[test]
fn unknown_enum_values_are_rejected_up_front() {
    let toml = std::fs::read_to_string("config/pipeline.toml")
        .unwrap()
        .replace("policy = \"tiered\"", "policy = \"whatever\"");
    let err = PipelineConfig::from_toml_str(&toml).unwrap_err();
    assert_eq!(err.code(), "config_error");
    assert!(err.is_fatal());
}

const MINIMAL: &str = r#"
[relevance]
thresholds = [{ min_score = 1.0, level = 1 }]
[relevance.anchors.core]
terms = ["assay"]
[relevance.anchors.frontier]
terms = []
[relevance.negatives]
terms = []
"#;

#[test]
fn quota_min_above_max_is_reported() {
    let toml = format!("{MINIMAL}[selection.quotas.media]\nmin = 5\nmax = 2\n");
    match PipelineConfig::from_toml_str(&toml) {
        Err(PipelineError::Config { diagnostics }) => {
            assert!(diagnostics
                .iter()
                .any(|d| d.contains("selection.quotas.media")));
        }
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn non_finite_scoring_numbers_are_rejected() {
    let toml = format!(
        "{MINIMAL}[scoring.trust_tier_adjust]\nB = nan\n[scoring.recency]\nolder = inf\n"
    );
    match PipelineConfig::from_toml_str(&toml) {
        Err(PipelineError::Config { diagnostics }) => {
            assert!(diagnostics
                .iter()
                .any(|d| d.contains("scoring.trust_tier_adjust.B must be finite")));
            assert!(diagnostics
                .iter()
                .any(|d| d.contains("scoring.recency.older must be finite")));
        }
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn one_scoring_knob_can_be_overridden_alone() {
    let toml = format!("{MINIMAL}[scoring.penalties]\nmin_summary_len = 80\n");
    let cfg = PipelineConfig::from_toml_str(&toml).unwrap();
    assert_eq!(cfg.scoring.penalties.min_summary_len, 80);
    assert_eq!(cfg.scoring.penalties.short_summary, 6.0);
    assert_eq!(cfg.scoring.evidence_points.a, 45.0);
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = PipelineConfig::from_toml_str("[relevance\nthresholds = ").unwrap_err();
    assert_eq!(err.code(), "config_error");
    assert!(err.is_fatal());
}
