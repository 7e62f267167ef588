// src/metrics.rs
use anyhow::Context;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::path::Path;

use crate::audit::RunAudit;

/// One-time descriptions for the run-level series.
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Batches processed.");
        describe_counter!(
            "pipeline_consistency_corrections_total",
            "Relevance annotations clamped or defaulted."
        );
        describe_gauge!("pipeline_last_run_selected", "Stories selected in the last batch.");
        describe_gauge!("pipeline_last_run_shortfalls", "Quota shortfalls in the last batch.");
        describe_gauge!("pipeline_last_run_degraded", "Degraded analyses in the last batch.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Batch runs render once at exit instead of serving `/metrics`.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Write the exposition text to `path` (node-exporter textfile style).
    pub fn render_to_file(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating metrics dir {}", dir.display()))?;
        }
        std::fs::write(path, self.handle.render())
            .with_context(|| format!("writing metrics to {}", path.display()))
    }
}

/// Run-level series derived from the audit.
pub fn record_run(audit: &RunAudit) {
    ensure_metrics_described();
    counter!("pipeline_runs_total").increment(1);
    counter!("pipeline_consistency_corrections_total").increment(audit.consistency_corrections as u64);
    gauge!("pipeline_last_run_selected").set(audit.selected as f64);
    gauge!("pipeline_last_run_shortfalls").set(audit.shortfalls.len() as f64);
    gauge!("pipeline_last_run_degraded").set(audit.degraded as f64);
}
