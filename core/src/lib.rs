//! meshpress-core
//!
//! Ingests glTF/GLB 3D models, runs a fixed-order optimization pipeline
//! (dedup, simplify, normals, quantize, texture) over them and exports
//! the result as GLB or glTF-plus-resources, with a per-stage before/after
//! report suitable for an HTTP response header.

pub mod document;
pub mod error;
pub mod export;
pub mod loader;
pub mod optimize;
pub mod options;
pub mod progress;
pub mod resource;
pub mod service;

pub use document::{Document, PrimitiveMode};
pub use error::{ErrorBody, PipelineError, Result};
pub use export::{ExportFormat, ExportOptions, ExportPayload, ExportResult, NamedResource};
pub use loader::{FileType, ModelLoadResult, RawInput};
pub use optimize::{
    NormalMode, OptimizationReport, OptimizationSpec, SimplifySettings, StageName, TextureFormat,
    TextureSettings,
};
pub use options::{output_filename, PipelineOptions, REPORT_HEADER};
pub use progress::{CancelToken, PipelinePhase, ProgressEvent, ProgressFn};
pub use resource::ResourceMap;
pub use service::{ModelPipeline, ProcessedModel};
