//! Error taxonomy for a pipeline run.
//!
//! Only `Config` is fatal. Everything else is handled per item (skipped,
//! retried, degraded or clamped) and surfaces as a count in the run audit.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed raw item. The item is skipped and counted; the run continues.
    #[error("input error (line {line}): {message}")]
    Input { line: usize, message: String },

    /// Missing or invalid rule configuration. Aborts the run.
    #[error("configuration error: {}", .diagnostics.join("; "))]
    Config { diagnostics: Vec<String> },

    /// A model call failed or timed out. Retried, routed to the other tier, then degraded.
    #[error("generation failed on {model}: {message}")]
    GenerationTransient { model: String, message: String },

    /// An annotated value left its declared domain. Clamped and logged, never fatal.
    #[error("consistency violation on {field}: {detail}")]
    ConsistencyViolation { field: &'static str, detail: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn input(line: usize, message: impl Into<String>) -> Self {
        Self::Input {
            line,
            message: message.into(),
        }
    }

    pub fn config(diagnostics: Vec<String>) -> Self {
        Self::Config { diagnostics }
    }

    pub fn generation(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::GenerationTransient {
            model: model.into(),
            message: message.into(),
        }
    }

    pub fn consistency(field: &'static str, detail: impl Into<String>) -> Self {
        Self::ConsistencyViolation {
            field,
            detail: detail.into(),
        }
    }

    /// Only configuration-level failures abort a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Short code for logs and audit counters.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Input { .. } => "input_error",
            Self::Config { .. } => "config_error",
            Self::GenerationTransient { .. } => "generation_transient",
            Self::ConsistencyViolation { .. } => "consistency_violation",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
