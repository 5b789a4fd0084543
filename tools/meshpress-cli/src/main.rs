//! meshpress - glTF/GLB model optimization tool
//!
//! Loads a model, runs the selected optimization stages (dedup, simplify,
//! normals, quantize, texture) and writes the result as GLB or glTF with
//! external resources, plus a JSON optimization report.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use meshpress_core::{
    loader, output_filename, CancelToken, ExportFormat, ExportOptions, ExportPayload, ModelPipeline,
    NormalMode, OptimizationSpec, ProgressEvent, RawInput, SimplifySettings, TextureFormat,
    TextureSettings,
};

#[derive(Parser)]
#[command(name = "meshpress")]
#[command(about = "glTF/GLB model optimization pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize a model and write the result
    Optimize {
        /// Input .gltf or .glb file
        input: PathBuf,

        /// Output file (defaults to the input name with the target extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output container format
        #[arg(short, long, value_enum, default_value = "glb")]
        format: CliFormat,

        /// Weld duplicate vertices and merge identical materials
        #[arg(long)]
        dedup: bool,

        /// Simplify to this triangle ratio (0 < ratio <= 1)
        #[arg(long)]
        simplify: Option<f32>,

        /// Recompute normals (smooth area-weighted)
        #[arg(long)]
        normals: bool,

        /// Recompute flat (faceted) normals instead of smooth
        #[arg(long)]
        flat_normals: bool,

        /// Quantize vertex attributes (KHR_mesh_quantization)
        #[arg(long)]
        quantize: bool,

        /// Re-encode textures to this format (png or jpeg)
        #[arg(long)]
        textures: Option<CliTextureFormat>,

        /// Encoder quality for JPEG textures, 0-100
        #[arg(long, default_value_t = 80)]
        quality: u8,

        /// Write the optimization report JSON here instead of next to the output
        #[arg(long)]
        report: Option<PathBuf>,

        /// Print progress events
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print document statistics without writing anything
    Inspect {
        /// Input .gltf or .glb file
        input: PathBuf,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliFormat {
    Glb,
    Gltf,
}

impl From<CliFormat> for ExportFormat {
    fn from(f: CliFormat) -> Self {
        match f {
            CliFormat::Glb => ExportFormat::Glb,
            CliFormat::Gltf => ExportFormat::Gltf,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliTextureFormat {
    Png,
    Jpeg,
}

impl From<CliTextureFormat> for TextureFormat {
    fn from(f: CliTextureFormat) -> Self {
        match f {
            CliTextureFormat::Png => TextureFormat::Png,
            CliTextureFormat::Jpeg => TextureFormat::Jpeg,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Optimize {
            input,
            output,
            format,
            dedup,
            simplify,
            normals,
            flat_normals,
            quantize,
            textures,
            quality,
            report,
            verbose,
        } => {
            let spec = OptimizationSpec {
                dedup,
                simplify: simplify.map(|ratio| SimplifySettings { ratio }),
                normals: if flat_normals {
                    Some(NormalMode::Flat)
                } else if normals {
                    Some(NormalMode::Smooth)
                } else {
                    None
                },
                quantize,
                texture: textures.map(|f| TextureSettings {
                    quality,
                    target_format: f.into(),
                }),
            };
            let format = ExportFormat::from(format);
            run_optimize(&input, output, format, &spec, report, verbose)
        }
        Commands::Inspect { input } => run_inspect(&input),
    }
}

fn run_optimize(
    input: &Path,
    output: Option<PathBuf>,
    format: ExportFormat,
    spec: &OptimizationSpec,
    report_path: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    let input_name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string());
    let output = output.unwrap_or_else(|| PathBuf::from(output_filename(&input_name, format)));

    let mut progress = |ev: ProgressEvent| {
        if verbose {
            match ev.stage {
                Some(stage) => println!("[{}/{}] {} {}%", ev.phase, stage, ev.operation, ev.percent),
                None => println!("[{}] {} {}%", ev.phase, ev.operation, ev.percent),
            }
        }
    };

    let mut pipeline = ModelPipeline::new();
    let processed = pipeline
        .process(
            RawInput::Path(input.to_path_buf()),
            spec,
            &ExportOptions { format },
            Some(&mut progress),
        )
        .with_context(|| format!("processing {}", input.display()))?;

    match &processed.export.payload {
        ExportPayload::Binary(bytes) => {
            std::fs::write(&output, bytes)
                .with_context(|| format!("writing {}", output.display()))?;
        }
        ExportPayload::Descriptor { json, resources } => {
            std::fs::write(&output, json)
                .with_context(|| format!("writing {}", output.display()))?;
            let dir = output.parent().unwrap_or_else(|| Path::new("."));
            for res in resources {
                std::fs::write(dir.join(&res.name), &res.data)
                    .with_context(|| format!("writing resource {}", res.name))?;
            }
        }
    }

    let report_json = serde_json::to_string_pretty(&processed.report)?;
    let report_path = report_path.unwrap_or_else(|| output.with_extension("report.json"));
    std::fs::write(&report_path, &report_json)
        .with_context(|| format!("writing report {}", report_path.display()))?;

    let total = &processed.report.total;
    println!(
        "{} -> {} ({} bytes, {} triangles -> {} triangles)",
        input.display(),
        output.display(),
        processed.export.byte_size,
        total.before.triangles,
        total.after.triangles,
    );
    Ok(())
}

fn run_inspect(input: &Path) -> Result<()> {
    let loaded = loader::load(
        RawInput::Path(input.to_path_buf()),
        None,
        &CancelToken::new(),
    )
    .with_context(|| format!("loading {}", input.display()))?;

    let doc = &loaded.document;
    println!("{} ({}, {} bytes)", loaded.name, loaded.file_type, loaded.byte_size);
    println!("  scenes:     {}", doc.scenes.len());
    println!("  nodes:      {}", doc.nodes.len());
    println!("  meshes:     {}", doc.meshes.len());
    println!("  vertices:   {}", doc.vertex_count());
    println!("  triangles:  {}", doc.triangle_count());
    println!("  materials:  {}", doc.materials.len());
    println!("  textures:   {}", doc.textures.len());
    println!("  images:     {}", doc.images.len());
    println!("  animations: {}", doc.animations.len());
    println!("  loaded in {} ms", loaded.load_duration_ms);
    Ok(())
}
