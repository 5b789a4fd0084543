//! Texture transcoding stage.
//!
//! Every image payload is decoded and re-encoded to the requested target
//! format. JPEG output drops any alpha channel (the format has none) and
//! honors the quality setting; PNG output is lossless and ignores it.
//! An image the decoder does not recognize fails the whole stage.

use std::path::Path;

use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::DynamicImage;

use crate::document::Document;
use crate::error::{PipelineError, Result};
use crate::optimize::{StageName, TextureFormat, TextureSettings};
use crate::progress::{CancelToken, ProgressScope};

pub fn run(
    mut doc: Document,
    settings: &TextureSettings,
    progress: &mut ProgressScope<'_, '_>,
    cancel: &CancelToken,
) -> Result<Document> {
    let total = doc.images.len().max(1);
    for (i, image) in doc.images.iter_mut().enumerate() {
        cancel.check()?;
        let label = image
            .name
            .clone()
            .or_else(|| image.uri.clone())
            .unwrap_or_else(|| format!("image #{i}"));

        let decoded = image::load_from_memory(&image.data)
            .with_context(|| format!("decoding {label}"))
            .map_err(stage_err)?;
        image.data = encode(&decoded, settings)
            .with_context(|| format!("encoding {label}"))
            .map_err(stage_err)?;
        image.mime_type = Some(settings.target_format.mime_type().to_string());
        image.uri = image
            .uri
            .as_deref()
            .map(|u| with_extension(u, settings.target_format.extension()));

        progress.emit_detail(
            "transcoding images",
            ((i + 1) * 100 / total) as u8,
            Some(label),
        );
    }
    Ok(doc)
}

fn encode(decoded: &DynamicImage, settings: &TextureSettings) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    match settings.target_format {
        TextureFormat::Png => {
            decoded.write_with_encoder(PngEncoder::new(&mut out))?;
        }
        TextureFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, settings.quality))?;
        }
    }
    Ok(out)
}

fn stage_err(source: anyhow::Error) -> PipelineError {
    PipelineError::OptimizationStage {
        stage: StageName::Texture,
        source,
    }
}

fn with_extension(uri: &str, ext: &str) -> String {
    let path = Path::new(uri);
    match path.file_stem().and_then(|s| s.to_str()) {
        Some(stem) => match path.parent().and_then(|p| p.to_str()).filter(|p| !p.is_empty()) {
            Some(parent) => format!("{parent}/{stem}.{ext}"),
            None => format!("{stem}.{ext}"),
        },
        None => uri.to_string(),
    }
}
