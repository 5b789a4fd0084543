//! Error taxonomy for the pipeline.
//!
//! Every stage-local failure is wrapped with enough context (stage name,
//! file name, underlying cause) to be actionable, then propagated unchanged
//! to the orchestration layer. No retries happen anywhere in the core.

use serde::Serialize;
use thiserror::Error;

use crate::optimize::StageName;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Unrecognized or unconvertible file extension/type. Non-retryable.
    #[error("unsupported model format: {name}{}", detail.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    UnsupportedFormat {
        name: String,
        detail: Option<String>,
    },

    /// One or more declared references have no resolvable binary payload.
    /// Non-retryable without supplying the missing file(s).
    #[error("{name}: unresolved resource references {missing:?} (available: {available:?})")]
    MissingResource {
        name: String,
        missing: Vec<String>,
        available: Vec<String>,
    },

    /// Structurally invalid document (bad indices, corrupt binary chunk).
    #[error("malformed document {name}: {detail}")]
    MalformedDocument { name: String, detail: String },

    /// A named optimization stage failed. The document is left in the state
    /// the last successful stage produced; the caller may retry with the
    /// stage disabled.
    #[error("optimization stage '{stage}' failed: {source}")]
    OptimizationStage {
        stage: StageName,
        #[source]
        source: anyhow::Error,
    },

    /// The target format cannot represent the current document state.
    #[error("cannot encode document as {format}: {detail}")]
    ExportEncoding { format: String, detail: String },

    /// The invocation was cooperatively cancelled.
    #[error("pipeline invocation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// HTTP status code the web boundary should respond with.
    ///
    /// Malformed/unsupported/missing input is the caller's fault (400);
    /// stage and export failures are internal (500). Cancellation maps to
    /// 499 (client closed request), matching common proxy conventions.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::UnsupportedFormat { .. }
            | PipelineError::MissingResource { .. }
            | PipelineError::MalformedDocument { .. } => 400,
            PipelineError::Cancelled => 499,
            PipelineError::OptimizationStage { .. }
            | PipelineError::ExportEncoding { .. }
            | PipelineError::Io(_) => 500,
        }
    }

    /// Structured JSON body for the failure response.
    pub fn to_body(&self) -> ErrorBody {
        let details = match self {
            PipelineError::OptimizationStage { source, .. } => Some(format!("{source:#}")),
            PipelineError::MissingResource { missing, .. } => Some(missing.join(", ")),
            _ => None,
        };
        ErrorBody {
            error: self.to_string(),
            details,
        }
    }
}

/// Wire shape of a failure: `{error, details?}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
