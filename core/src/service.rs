//! Orchestration: one [`ModelPipeline`] instance drives a single model
//! through load, optimize and export.

use crate::document::Document;
use crate::error::Result;
use crate::export::{self, ExportOptions, ExportResult};
use crate::loader::{self, FileType, RawInput};
use crate::optimize::{self, OptimizationReport, OptimizationSpec};
use crate::options::PipelineOptions;
use crate::progress::{CancelToken, ProgressFn};

/// The outcome of one processed model.
#[derive(Debug)]
pub struct ProcessedModel {
    pub name: String,
    pub file_type: FileType,
    pub export: ExportResult,
    pub report: OptimizationReport,
}

/// One instance per in-flight invocation. Holds the cancellation token and
/// the most recent report; errors from any phase propagate verbatim.
#[derive(Debug, Default)]
pub struct ModelPipeline {
    cancel: CancelToken,
    report: Option<OptimizationReport>,
}

impl ModelPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared token for cancelling this invocation from another task.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The report of the latest completed optimization run, if any.
    pub fn report(&self) -> Option<&OptimizationReport> {
        self.report.as_ref()
    }

    /// Load, optimize and export one model. Progress events from every
    /// phase flow through `sink` in order.
    pub fn process(
        &mut self,
        input: RawInput,
        spec: &OptimizationSpec,
        export_options: &ExportOptions,
        mut sink: Option<&mut ProgressFn<'_>>,
    ) -> Result<ProcessedModel> {
        let loaded = loader::load(input, sink.as_deref_mut(), &self.cancel)?;
        let name = loaded.name;
        let file_type = loaded.file_type;

        let (document, report) =
            optimize::optimize(loaded.document, spec, sink.as_deref_mut(), &self.cancel)?;
        self.report = Some(report.clone());

        self.cancel.check()?;
        let export = self.export_document(&document, export_options, sink)?;

        tracing::info!(
            name = %name,
            format = %export.format,
            input_bytes = loaded.byte_size,
            output_bytes = export.byte_size,
            "model processed"
        );
        Ok(ProcessedModel {
            name,
            file_type,
            export,
            report,
        })
    }

    /// Convenience wrapper taking the wire-level options object.
    pub fn process_with_options(
        &mut self,
        input: RawInput,
        options: &PipelineOptions,
        sink: Option<&mut ProgressFn<'_>>,
    ) -> Result<ProcessedModel> {
        self.process(
            input,
            &options.optimization_spec(),
            &options.export_options(),
            sink,
        )
    }

    fn export_document(
        &self,
        document: &Document,
        options: &ExportOptions,
        sink: Option<&mut ProgressFn<'_>>,
    ) -> Result<ExportResult> {
        export::export(document, options, sink)
    }
}
