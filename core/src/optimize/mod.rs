//! Optimization engine.
//!
//! Runs the five stages in a fixed order over an owned [`Document`]:
//! dedup, simplify, normals, quantize, texture. Each stage takes the
//! document by value and returns it, so reordering is impossible without
//! changing this module. Disabled stages cost nothing but still appear in
//! the report with identical before/after metrics.

pub mod dedup;
pub mod normals;
pub mod quantize;
pub mod simplify;
pub mod texture;

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::document::{measure, Document, Metrics};
use crate::error::Result;
use crate::progress::{CancelToken, PipelinePhase, ProgressFn, ProgressScope};

/// One of the five optimization stages, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Dedup,
    Simplify,
    Normals,
    Quantize,
    Texture,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Dedup => "dedup",
            StageName::Simplify => "simplify",
            StageName::Normals => "normals",
            StageName::Quantize => "quantize",
            StageName::Texture => "texture",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application order. Geometry passes run before quantization so they
/// operate on full-precision floats; textures go last because nothing
/// downstream reads pixel data.
pub const STAGE_ORDER: [StageName; 5] = [
    StageName::Dedup,
    StageName::Simplify,
    StageName::Normals,
    StageName::Quantize,
    StageName::Texture,
];

/// Per-stage toggles and parameters. Construction happens in
/// [`crate::options`]; the engine only reads it.
#[derive(Debug, Clone, Default)]
pub struct OptimizationSpec {
    pub dedup: bool,
    pub simplify: Option<SimplifySettings>,
    pub normals: Option<NormalMode>,
    pub quantize: bool,
    pub texture: Option<TextureSettings>,
}

impl OptimizationSpec {
    fn is_enabled(&self, stage: StageName) -> bool {
        match stage {
            StageName::Dedup => self.dedup,
            StageName::Simplify => self.simplify.is_some(),
            StageName::Normals => self.normals.is_some(),
            StageName::Quantize => self.quantize,
            StageName::Texture => self.texture.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplifySettings {
    /// Target triangle ratio, 0 < ratio <= 1. 1.0 keeps everything.
    pub ratio: f32,
}

impl Default for SimplifySettings {
    fn default() -> Self {
        Self { ratio: 0.5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalMode {
    /// Area-weighted average of adjacent face normals.
    #[default]
    Smooth,
    /// Per-face normals; splits shared vertices.
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureSettings {
    /// Encoder quality, 0-100. Only meaningful for JPEG.
    pub quality: u8,
    pub target_format: TextureFormat,
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self {
            quality: 80,
            target_format: TextureFormat::Jpeg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureFormat {
    Png,
    Jpeg,
}

impl TextureFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            TextureFormat::Png => "image/png",
            TextureFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TextureFormat::Png => "png",
            TextureFormat::Jpeg => "jpg",
        }
    }
}

/// Before/after measurements for one stage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub stage: StageName,
    pub before: Metrics,
    pub after: Metrics,
    pub duration_ms: u64,
}

/// Full report for one engine run, in stage order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub stages: Vec<StageReport>,
    pub total: TotalReport,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalReport {
    pub before: Metrics,
    pub after: Metrics,
}

impl OptimizationReport {
    pub fn stage(&self, name: StageName) -> &StageReport {
        // STAGE_ORDER covers every variant, so the entry always exists.
        &self.stages[STAGE_ORDER.iter().position(|s| *s == name).unwrap_or(0)]
    }

    /// Compact JSON for the `X-Optimization-Report` response header.
    pub fn header_value(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Run every enabled stage in canonical order.
pub fn optimize(
    mut doc: Document,
    spec: &OptimizationSpec,
    mut sink: Option<&mut ProgressFn<'_>>,
    cancel: &CancelToken,
) -> Result<(Document, OptimizationReport)> {
    let overall_before = measure(&doc);
    let mut stages = Vec::with_capacity(STAGE_ORDER.len());

    for stage in STAGE_ORDER {
        cancel.check()?;
        let before = measure(&doc);
        let started = Instant::now();

        if spec.is_enabled(stage) {
            let mut scope =
                ProgressScope::for_stage(sink.as_deref_mut(), PipelinePhase::Optimize, stage);
            scope.emit(stage.as_str(), 0);
            doc = match stage {
                StageName::Dedup => dedup::run(doc, &mut scope),
                StageName::Simplify => {
                    let settings = spec.simplify.unwrap_or_default();
                    simplify::run(doc, settings.ratio, &mut scope, cancel)?
                }
                StageName::Normals => {
                    normals::run(doc, spec.normals.unwrap_or_default(), &mut scope)
                }
                StageName::Quantize => quantize::run(doc, &mut scope),
                StageName::Texture => {
                    let settings = spec.texture.unwrap_or_default();
                    texture::run(doc, &settings, &mut scope, cancel)?
                }
            };
            scope.emit(stage.as_str(), 100);
        }

        let after = measure(&doc);
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            stage = %stage,
            enabled = spec.is_enabled(stage),
            vertices = after.vertices,
            triangles = after.triangles,
            bytes = after.document_bytes,
            "stage complete"
        );
        stages.push(StageReport {
            stage,
            before,
            after,
            duration_ms,
        });
    }

    let total = TotalReport {
        before: overall_before,
        after: measure(&doc),
    };
    Ok((doc, OptimizationReport { stages, total }))
}
