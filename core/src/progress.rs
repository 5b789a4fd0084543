//! Progress reporting and cooperative cancellation.
//!
//! Each pipeline phase emits `{stage, operation, percent}` events through a
//! caller-registered callback. Events for one invocation arrive in order:
//! loader events, then engine events in fixed stage order, then exporter
//! events; percentages never decrease within a scope.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::optimize::StageName;

/// Which phase of the pipeline an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelinePhase {
    Load,
    Optimize,
    Export,
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelinePhase::Load => write!(f, "load"),
            PipelinePhase::Optimize => write!(f, "optimize"),
            PipelinePhase::Export => write!(f, "export"),
        }
    }
}

/// A single progress event.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub phase: PipelinePhase,
    /// Optimization stage, for engine events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageName>,
    /// Human-readable operation, e.g. "parsing" or "collapsing edges".
    pub operation: String,
    /// 0..=100, monotonically non-decreasing within one phase/stage scope.
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Callback invoked for every progress event.
pub type ProgressFn<'a> = dyn FnMut(ProgressEvent) + Send + 'a;

/// Emission helper scoped to one phase (and optionally one stage).
///
/// Clamps percentages so they never decrease, keeping the monotonicity
/// contract even if a caller computes checkpoints out of order.
pub struct ProgressScope<'a, 'cb> {
    sink: Option<&'a mut ProgressFn<'cb>>,
    phase: PipelinePhase,
    stage: Option<StageName>,
    last_percent: u8,
}

impl<'a, 'cb> ProgressScope<'a, 'cb> {
    pub fn new(sink: Option<&'a mut ProgressFn<'cb>>, phase: PipelinePhase) -> Self {
        Self {
            sink,
            phase,
            stage: None,
            last_percent: 0,
        }
    }

    pub fn for_stage(
        sink: Option<&'a mut ProgressFn<'cb>>,
        phase: PipelinePhase,
        stage: StageName,
    ) -> Self {
        Self {
            sink,
            phase,
            stage: Some(stage),
            last_percent: 0,
        }
    }

    /// Emit a checkpoint. Percentages below the previous one are clamped up.
    pub fn emit(&mut self, operation: &str, percent: u8) {
        self.emit_detail(operation, percent, None);
    }

    pub fn emit_detail(&mut self, operation: &str, percent: u8, detail: Option<String>) {
        let percent = percent.min(100).max(self.last_percent);
        self.last_percent = percent;
        if let Some(sink) = self.sink.as_mut() {
            sink(ProgressEvent {
                phase: self.phase,
                stage: self.stage,
                operation: operation.to_string(),
                percent,
                detail,
            });
        }
    }

    /// Borrow the underlying sink again for a nested scope.
    pub fn sink(&mut self) -> Option<&mut ProgressFn<'cb>> {
        self.sink.as_deref_mut()
    }
}

/// Cooperative cancellation token, checked at stage boundaries and inside
/// expensive loops. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next check point.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Bail out with `PipelineError::Cancelled` if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}
