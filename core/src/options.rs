//! Wire-level options: the JSON options object accepted at the HTTP
//! boundary and helpers for shaping the response.
//!
//! Stage toggles follow the `false | { ...settings }` convention: a bare
//! boolean switches the stage, an object enables it with parameters.

use serde::{Deserialize, Serialize};

use crate::export::{ExportFormat, ExportOptions};
use crate::optimize::{
    NormalMode, OptimizationSpec, SimplifySettings, TextureFormat, TextureSettings,
};

/// Response header carrying the serialized [`crate::optimize::OptimizationReport`].
pub const REPORT_HEADER: &str = "X-Optimization-Report";

/// The options JSON accepted alongside an upload. Every field has a
/// default, so `{}` is a valid document that only repackages the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineOptions {
    pub dedup: bool,
    pub simplify: SimplifyToggle,
    pub normals: bool,
    pub quantize: bool,
    pub textures: TextureToggle,
    pub format: ExportFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SimplifyToggle {
    Toggle(bool),
    Settings {
        ratio: f32,
    },
}

impl Default for SimplifyToggle {
    fn default() -> Self {
        SimplifyToggle::Toggle(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextureToggle {
    Toggle(bool),
    #[serde(rename_all = "camelCase")]
    Settings {
        #[serde(default = "default_quality")]
        quality: u8,
        #[serde(default = "default_target_format")]
        target_format: TextureFormat,
    },
}

impl Default for TextureToggle {
    fn default() -> Self {
        TextureToggle::Toggle(false)
    }
}

fn default_quality() -> u8 {
    TextureSettings::default().quality
}

fn default_target_format() -> TextureFormat {
    TextureSettings::default().target_format
}

impl PipelineOptions {
    /// Per-stage engine settings. Out-of-range simplify ratios are clamped
    /// into (0, 1] rather than rejected.
    pub fn optimization_spec(&self) -> OptimizationSpec {
        let simplify = match self.simplify {
            SimplifyToggle::Toggle(false) => None,
            SimplifyToggle::Toggle(true) => Some(SimplifySettings::default()),
            SimplifyToggle::Settings { ratio } => {
                let clamped = ratio.clamp(f32::EPSILON, 1.0);
                if clamped != ratio {
                    tracing::warn!(ratio, clamped, "simplify ratio out of range");
                }
                Some(SimplifySettings { ratio: clamped })
            }
        };
        let texture = match self.textures {
            TextureToggle::Toggle(false) => None,
            TextureToggle::Toggle(true) => Some(TextureSettings::default()),
            TextureToggle::Settings {
                quality,
                target_format,
            } => Some(TextureSettings {
                quality: quality.min(100),
                target_format,
            }),
        };
        OptimizationSpec {
            dedup: self.dedup,
            simplify,
            normals: self.normals.then_some(NormalMode::Smooth),
            quantize: self.quantize,
            texture,
        }
    }

    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            format: self.format,
        }
    }
}

/// Output file name for a processed model: input stem plus the export
/// format's extension.
pub fn output_filename(input_name: &str, format: ExportFormat) -> String {
    let stem = input_name
        .rsplit_once('.')
        .map(|(s, _)| s)
        .unwrap_or(input_name);
    format!("{stem}.{}", format.extension())
}
