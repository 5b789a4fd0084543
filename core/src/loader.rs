//! Document loading: classification, parsing, resource resolution and
//! extraction into the in-memory model.
//!
//! Loading walks fixed states (idle, reading, parsing, validating, ready)
//! with progress checkpoints 0/50/75/100. The file type is classified from
//! the name alone, *before* any bytes are read, so an unsupported upload
//! fails without touching its payload.

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;

use crate::document::{
    AlphaMode, Animation, AnimationChannel, AnimationProperty, Document, Filter, Image,
    Interpolation, Material, Mesh, Node, Primitive, PrimitiveMode, Sampler, Scene, Texture,
    TextureRef, Wrap,
};
use crate::error::{PipelineError, Result};
use crate::progress::{CancelToken, PipelinePhase, ProgressFn, ProgressScope};
use crate::resource::{percent_decode, resolve_references, DeclaredReference, ResourceMap};

/// How the model arrives at the pipeline.
#[derive(Debug, Clone)]
pub enum RawInput {
    /// Read from disk; external buffers/images resolve against siblings.
    Path(PathBuf),
    /// In-memory payload (upload case), self-contained or data-URI backed.
    Bytes { data: Vec<u8>, name: String },
    /// In-memory payload plus out-of-band named resources.
    WithResources {
        data: Vec<u8>,
        name: String,
        resources: ResourceMap,
    },
}

impl RawInput {
    pub fn name(&self) -> String {
        match self {
            RawInput::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string()),
            RawInput::Bytes { name, .. } | RawInput::WithResources { name, .. } => name.clone(),
        }
    }
}

/// Classification by file name, case-insensitive on the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Gltf,
    Glb,
    Usdz,
}

impl FileType {
    pub fn classify(name: &str) -> Result<Self> {
        let ext = name
            .rsplit_once('.')
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "gltf" => Ok(FileType::Gltf),
            "glb" => Ok(FileType::Glb),
            "usdz" => Ok(FileType::Usdz),
            _ => Err(PipelineError::UnsupportedFormat {
                name: name.to_string(),
                detail: None,
            }),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Gltf => write!(f, "gltf"),
            FileType::Glb => write!(f, "glb"),
            FileType::Usdz => write!(f, "usdz"),
        }
    }
}

#[derive(Debug)]
pub struct ModelLoadResult {
    pub document: Document,
    pub file_type: FileType,
    /// Size of the primary file only, excluding out-of-band resources.
    pub byte_size: u64,
    pub name: String,
    pub load_duration_ms: u64,
}

/// Load and extract a model.
pub fn load(
    input: RawInput,
    sink: Option<&mut ProgressFn<'_>>,
    cancel: &CancelToken,
) -> Result<ModelLoadResult> {
    let started = Instant::now();
    let mut scope = ProgressScope::new(sink, PipelinePhase::Load);

    let name = input.name();
    let file_type = FileType::classify(&name)?;
    if file_type == FileType::Usdz {
        return Err(PipelineError::UnsupportedFormat {
            name,
            detail: Some("USDZ containers cannot be parsed by the glTF pipeline".to_string()),
        });
    }

    scope.emit("reading", 0);
    cancel.check()?;
    let (data, origin) = match input {
        RawInput::Path(path) => {
            let data = std::fs::read(&path)?;
            let dir = path.parent().map(PathBuf::from);
            (data, ResourceOrigin::Dir(dir))
        }
        RawInput::Bytes { data, .. } => (data, ResourceOrigin::Map(ResourceMap::new())),
        RawInput::WithResources { data, resources, .. } => (data, ResourceOrigin::Map(resources)),
    };
    let byte_size = data.len() as u64;

    scope.emit("parsing", 50);
    cancel.check()?;
    let gltf = parse(&name, &data)?;
    let parsed = gltf.document;
    let blob = gltf.blob;

    scope.emit("validating", 75);
    let buffers = resolve_buffers(&name, &parsed, blob, &origin)?;
    let images = resolve_images(&name, &parsed, &buffers, &origin)?;
    let document = extract(&name, &parsed, &buffers, images)?;
    cancel.check()?;

    scope.emit("ready", 100);
    tracing::info!(
        name = %name,
        file_type = %file_type,
        bytes = byte_size,
        vertices = document.vertex_count(),
        triangles = document.triangle_count(),
        "model loaded"
    );

    Ok(ModelLoadResult {
        document,
        file_type,
        byte_size,
        name,
        load_duration_ms: started.elapsed().as_millis() as u64,
    })
}

/// Parse the payload. The validator rejects any file that *requires*
/// `KHR_mesh_quantization` even though the reader handles its accessor
/// encodings, so a parse that fails only on that extension is retried
/// without validation. Every other failure is a malformed document.
fn parse(name: &str, data: &[u8]) -> Result<gltf::Gltf> {
    match gltf::Gltf::from_slice(data) {
        Ok(gltf) => Ok(gltf),
        Err(gltf::Error::Validation(problems))
            if !problems.is_empty()
                && problems.iter().all(|(path, error)| {
                    matches!(error, gltf::json::validation::Error::Unsupported)
                        && path.to_string().contains(QUANTIZATION_EXTENSION)
                }) =>
        {
            gltf::Gltf::from_slice_without_validation(data)
                .map_err(|e| malformed(name, e.to_string()))
        }
        Err(e) => Err(malformed(name, e.to_string())),
    }
}

const QUANTIZATION_EXTENSION: &str = "KHR_mesh_quantization";

/// Where external URIs get their bytes from.
enum ResourceOrigin {
    Map(ResourceMap),
    Dir(Option<PathBuf>),
}

impl ResourceOrigin {
    /// Gather the payloads for `uris`, reading sibling files when loading
    /// from disk, so one map-based resolution pass serves both input forms.
    fn gather(&self, uris: &[&str]) -> ResourceMap {
        match self {
            ResourceOrigin::Map(map) => map.clone(),
            ResourceOrigin::Dir(dir) => {
                let mut map = ResourceMap::new();
                if let Some(dir) = dir {
                    for uri in uris {
                        let path = dir.join(percent_decode(uri));
                        if let Ok(data) = std::fs::read(&path) {
                            map.insert(uri.to_string(), data);
                        }
                    }
                }
                map
            }
        }
    }
}

fn is_data_uri(uri: &str) -> bool {
    uri.starts_with("data:")
}

fn malformed(name: &str, detail: impl Into<String>) -> PipelineError {
    PipelineError::MalformedDocument {
        name: name.to_string(),
        detail: detail.into(),
    }
}

fn resolve_buffers(
    name: &str,
    parsed: &gltf::Document,
    blob: Option<Vec<u8>>,
    origin: &ResourceOrigin,
) -> Result<Vec<Vec<u8>>> {
    let external: Vec<&str> = parsed
        .buffers()
        .filter_map(|b| match b.source() {
            gltf::buffer::Source::Uri(u) if !is_data_uri(u) => Some(u),
            _ => None,
        })
        .collect();
    let refs: Vec<DeclaredReference> = external
        .iter()
        .map(|u| DeclaredReference {
            uri: Some(u.to_string()),
            buffer_view: None,
        })
        .collect();
    let map = origin.gather(&external);
    let mut payloads = resolve_references(name, &refs, &map)?.into_iter();

    let mut blob = blob;
    let mut out = Vec::new();
    for buffer in parsed.buffers() {
        let data = match buffer.source() {
            gltf::buffer::Source::Bin => blob
                .take()
                .ok_or_else(|| malformed(name, "buffer declares binary storage but the GLB has no BIN chunk"))?,
            gltf::buffer::Source::Uri(u) if is_data_uri(u) => decode_data_uri(u)
                .ok_or_else(|| malformed(name, format!("undecodable data URI in buffer {}", buffer.index())))?,
            gltf::buffer::Source::Uri(_) => payloads
                .next()
                .flatten()
                .ok_or_else(|| malformed(name, "buffer payload resolution out of step"))?,
        };
        if data.len() < buffer.length() {
            return Err(malformed(
                name,
                format!(
                    "buffer {} holds {} bytes but declares {}",
                    buffer.index(),
                    data.len(),
                    buffer.length()
                ),
            ));
        }
        out.push(data);
    }
    Ok(out)
}

fn resolve_images(
    name: &str,
    parsed: &gltf::Document,
    buffers: &[Vec<u8>],
    origin: &ResourceOrigin,
) -> Result<Vec<Image>> {
    let external: Vec<&str> = parsed
        .images()
        .filter_map(|img| match img.source() {
            gltf::image::Source::Uri { uri, .. } if !is_data_uri(uri) => Some(uri),
            _ => None,
        })
        .collect();
    let refs: Vec<DeclaredReference> = external
        .iter()
        .map(|u| DeclaredReference {
            uri: Some(u.to_string()),
            buffer_view: None,
        })
        .collect();
    let map = origin.gather(&external);
    let mut payloads = resolve_references(name, &refs, &map)?.into_iter();

    let mut out = Vec::new();
    for img in parsed.images() {
        let (data, mime, uri) = match img.source() {
            gltf::image::Source::View { view, mime_type } => {
                let buffer = &buffers[view.buffer().index()];
                let end = view.offset() + view.length();
                let data = buffer
                    .get(view.offset()..end)
                    .ok_or_else(|| malformed(name, format!("image {} buffer view out of range", img.index())))?
                    .to_vec();
                (data, Some(mime_type.to_string()), None)
            }
            gltf::image::Source::Uri { uri, mime_type } if is_data_uri(uri) => {
                let data = decode_data_uri(uri).ok_or_else(|| {
                    malformed(name, format!("undecodable data URI in image {}", img.index()))
                })?;
                let mime = mime_type
                    .map(str::to_string)
                    .or_else(|| data_uri_mime(uri));
                (data, mime, None)
            }
            gltf::image::Source::Uri { uri, mime_type } => {
                let data = payloads
                    .next()
                    .flatten()
                    .ok_or_else(|| malformed(name, "image payload resolution out of step"))?;
                let mime = mime_type
                    .map(str::to_string)
                    .or_else(|| mime_from_extension(uri));
                (data, mime, Some(uri.to_string()))
            }
        };
        out.push(Image {
            name: img.name().map(str::to_string),
            data,
            mime_type: mime,
            uri,
        });
    }
    Ok(out)
}

fn mime_from_extension(uri: &str) -> Option<String> {
    let ext = uri.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase())?;
    match ext.as_str() {
        "png" => Some("image/png".to_string()),
        "jpg" | "jpeg" => Some("image/jpeg".to_string()),
        _ => None,
    }
}

fn data_uri_mime(uri: &str) -> Option<String> {
    let header = uri.strip_prefix("data:")?.split(',').next()?;
    let mime = header.split(';').next()?;
    (!mime.is_empty()).then(|| mime.to_string())
}

/// Decode a `data:` URI. Only the base64 form is supported (the form glTF
/// tooling emits).
fn decode_data_uri(uri: &str) -> Option<Vec<u8>> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    if header.ends_with(";base64") {
        decode_base64(payload)
    } else {
        None
    }
}

fn decode_base64(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() / 4 * 3);
    let mut accum = 0u32;
    let mut bits = 0u32;
    for c in input.bytes() {
        if matches!(c, b'=' | b'\n' | b'\r') {
            continue;
        }
        let v = match c {
            b'A'..=b'Z' => c - b'A',
            b'a'..=b'z' => c - b'a' + 26,
            b'0'..=b'9' => c - b'0' + 52,
            b'+' => 62,
            b'/' => 63,
            _ => return None,
        };
        accum = (accum << 6) | u32::from(v);
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((accum >> bits) as u8);
        }
    }
    Some(out)
}

/// Quantized-attribute fallback: the typed reader only yields f32 streams,
/// so normalized integer encodings are walked manually, view offset plus
/// stride, and mapped back into normalized float space. Positions land in
/// [0, 1]; the dequantization transform stays on the node that carries it.
fn read_unorm16_vec3(acc: &gltf::Accessor<'_>, buffers: &[Vec<u8>]) -> Option<Vec<[f32; 3]>> {
    use gltf::accessor::{DataType, Dimensions};
    if acc.data_type() != DataType::U16
        || acc.dimensions() != Dimensions::Vec3
        || !acc.normalized()
    {
        return None;
    }
    let view = acc.view()?;
    let data = buffers.get(view.buffer().index())?;
    let stride = view.stride().unwrap_or(6);
    let base = view.offset() + acc.offset();
    let mut out = Vec::with_capacity(acc.count());
    for i in 0..acc.count() {
        let bytes = data.get(base + i * stride..base + i * stride + 6)?;
        let c = |j: usize| u16::from_le_bytes([bytes[2 * j], bytes[2 * j + 1]]);
        out.push([
            f32::from(c(0)) / 65535.0,
            f32::from(c(1)) / 65535.0,
            f32::from(c(2)) / 65535.0,
        ]);
    }
    Some(out)
}

fn read_snorm8_vec3(acc: &gltf::Accessor<'_>, buffers: &[Vec<u8>]) -> Option<Vec<[f32; 3]>> {
    use gltf::accessor::{DataType, Dimensions};
    if acc.data_type() != DataType::I8
        || acc.dimensions() != Dimensions::Vec3
        || !acc.normalized()
    {
        return None;
    }
    let view = acc.view()?;
    let data = buffers.get(view.buffer().index())?;
    let stride = view.stride().unwrap_or(3);
    let base = view.offset() + acc.offset();
    let mut out = Vec::with_capacity(acc.count());
    for i in 0..acc.count() {
        let bytes = data.get(base + i * stride..base + i * stride + 3)?;
        let c = |j: usize| (f32::from(bytes[j] as i8) / 127.0).max(-1.0);
        out.push([c(0), c(1), c(2)]);
    }
    Some(out)
}

fn read_unorm16_vec2(acc: &gltf::Accessor<'_>, buffers: &[Vec<u8>]) -> Option<Vec<[f32; 2]>> {
    use gltf::accessor::{DataType, Dimensions};
    if acc.data_type() != DataType::U16
        || acc.dimensions() != Dimensions::Vec2
        || !acc.normalized()
    {
        return None;
    }
    let view = acc.view()?;
    let data = buffers.get(view.buffer().index())?;
    let stride = view.stride().unwrap_or(4);
    let base = view.offset() + acc.offset();
    let mut out = Vec::with_capacity(acc.count());
    for i in 0..acc.count() {
        let bytes = data.get(base + i * stride..base + i * stride + 4)?;
        let c = |j: usize| u16::from_le_bytes([bytes[2 * j], bytes[2 * j + 1]]);
        out.push([f32::from(c(0)) / 65535.0, f32::from(c(1)) / 65535.0]);
    }
    Some(out)
}

/// Convert the parsed glTF into the owned document model.
fn extract(
    name: &str,
    parsed: &gltf::Document,
    buffers: &[Vec<u8>],
    images: Vec<Image>,
) -> Result<Document> {
    let get = |buffer: gltf::Buffer<'_>| buffers.get(buffer.index()).map(Vec::as_slice);

    let mut doc = Document {
        images,
        ..Default::default()
    };

    for mesh in parsed.meshes() {
        let mut out = Mesh {
            name: mesh.name().map(str::to_string),
            ..Default::default()
        };
        for prim in mesh.primitives() {
            let mode = match prim.mode() {
                gltf::mesh::Mode::Points => PrimitiveMode::Points,
                gltf::mesh::Mode::Lines => PrimitiveMode::Lines,
                gltf::mesh::Mode::LineLoop => PrimitiveMode::LineLoop,
                gltf::mesh::Mode::LineStrip => PrimitiveMode::LineStrip,
                gltf::mesh::Mode::Triangles => PrimitiveMode::Triangles,
                gltf::mesh::Mode::TriangleStrip => PrimitiveMode::TriangleStrip,
                gltf::mesh::Mode::TriangleFan => PrimitiveMode::TriangleFan,
            };
            let reader = prim.reader(get);
            let positions: Vec<[f32; 3]> = match reader.read_positions() {
                Some(it) => it.collect(),
                None => {
                    let acc = prim
                        .get(&gltf::Semantic::Positions)
                        .ok_or_else(|| malformed(name, "primitive has no POSITION attribute"))?;
                    read_unorm16_vec3(&acc, buffers).ok_or_else(|| {
                        malformed(name, "unreadable POSITION accessor encoding")
                    })?
                }
            };
            let normals = match reader.read_normals() {
                Some(it) => Some(it.collect()),
                None => prim
                    .get(&gltf::Semantic::Normals)
                    .and_then(|acc| read_snorm8_vec3(&acc, buffers)),
            };
            let uvs = match reader.read_tex_coords(0) {
                Some(tc) => Some(tc.into_f32().collect()),
                None => prim
                    .get(&gltf::Semantic::TexCoords(0))
                    .and_then(|acc| read_unorm16_vec2(&acc, buffers)),
            };
            let indices = match reader.read_indices() {
                Some(idx) => idx.into_u32().collect(),
                None => (0..positions.len() as u32).collect(),
            };
            out.primitives.push(Primitive {
                mode,
                positions,
                normals,
                uvs,
                indices,
                material: prim.material().index(),
                quantized: None,
            });
        }
        doc.meshes.push(out);
    }

    for mat in parsed.materials() {
        // The default material (index None) never reaches this loop; only
        // indexed materials are listed by the document.
        let pbr = mat.pbr_metallic_roughness();
        let tex_ref = |info: Option<gltf::texture::Info<'_>>| {
            info.map(|t| TextureRef {
                texture: t.texture().index(),
                tex_coord: t.tex_coord(),
            })
        };
        doc.materials.push(Material {
            name: mat.name().map(str::to_string),
            base_color_factor: pbr.base_color_factor(),
            base_color_texture: tex_ref(pbr.base_color_texture()),
            metallic_factor: pbr.metallic_factor(),
            roughness_factor: pbr.roughness_factor(),
            metallic_roughness_texture: tex_ref(pbr.metallic_roughness_texture()),
            normal_texture: mat.normal_texture().map(|t| TextureRef {
                texture: t.texture().index(),
                tex_coord: t.tex_coord(),
            }),
            emissive_factor: mat.emissive_factor(),
            emissive_texture: tex_ref(mat.emissive_texture()),
            alpha_mode: match mat.alpha_mode() {
                gltf::material::AlphaMode::Opaque => AlphaMode::Opaque,
                gltf::material::AlphaMode::Mask => AlphaMode::Mask,
                gltf::material::AlphaMode::Blend => AlphaMode::Blend,
            },
            alpha_cutoff: mat.alpha_cutoff().unwrap_or(0.5),
            double_sided: mat.double_sided(),
        });
    }

    for sampler in parsed.samplers() {
        let filter = |mag: Option<gltf::texture::MagFilter>| {
            mag.map(|f| match f {
                gltf::texture::MagFilter::Nearest => Filter::Nearest,
                gltf::texture::MagFilter::Linear => Filter::Linear,
            })
        };
        let min_filter = sampler.min_filter().map(|f| {
            use gltf::texture::MinFilter::*;
            match f {
                Nearest | NearestMipmapNearest | NearestMipmapLinear => Filter::Nearest,
                Linear | LinearMipmapNearest | LinearMipmapLinear => Filter::Linear,
            }
        });
        let wrap = |w: gltf::texture::WrappingMode| match w {
            gltf::texture::WrappingMode::ClampToEdge => Wrap::ClampToEdge,
            gltf::texture::WrappingMode::MirroredRepeat => Wrap::MirroredRepeat,
            gltf::texture::WrappingMode::Repeat => Wrap::Repeat,
        };
        doc.samplers.push(Sampler {
            mag_filter: filter(sampler.mag_filter()),
            min_filter,
            wrap_s: wrap(sampler.wrap_s()),
            wrap_t: wrap(sampler.wrap_t()),
        });
    }

    for tex in parsed.textures() {
        doc.textures.push(Texture {
            name: tex.name().map(str::to_string),
            image: tex.source().index(),
            sampler: tex.sampler().index(),
        });
    }

    for node in parsed.nodes() {
        let (translation, rotation, scale) = node.transform().decomposed();
        doc.nodes.push(Node {
            name: node.name().map(str::to_string),
            translation,
            rotation,
            scale,
            mesh: node.mesh().map(|m| m.index()),
            children: node.children().map(|c| c.index()).collect(),
        });
    }

    for scene in parsed.scenes() {
        doc.scenes.push(Scene {
            name: scene.name().map(str::to_string),
            nodes: scene.nodes().map(|n| n.index()).collect(),
        });
    }
    doc.default_scene = parsed.default_scene().map(|s| s.index());

    for anim in parsed.animations() {
        let mut out = Animation {
            name: anim.name().map(str::to_string),
            ..Default::default()
        };
        for channel in anim.channels() {
            let reader = channel.reader(get);
            let timestamps: Vec<f32> = match reader.read_inputs() {
                Some(inputs) => inputs.collect(),
                None => continue,
            };
            let values: Vec<f32> = match reader.read_outputs() {
                Some(gltf::animation::util::ReadOutputs::Translations(it)) => {
                    it.flatten().collect()
                }
                Some(gltf::animation::util::ReadOutputs::Rotations(r)) => {
                    r.into_f32().flatten().collect()
                }
                Some(gltf::animation::util::ReadOutputs::Scales(it)) => it.flatten().collect(),
                Some(gltf::animation::util::ReadOutputs::MorphTargetWeights(w)) => {
                    w.into_f32().collect()
                }
                None => continue,
            };
            out.channels.push(AnimationChannel {
                target_node: channel.target().node().index(),
                property: match channel.target().property() {
                    gltf::animation::Property::Translation => AnimationProperty::Translation,
                    gltf::animation::Property::Rotation => AnimationProperty::Rotation,
                    gltf::animation::Property::Scale => AnimationProperty::Scale,
                    gltf::animation::Property::MorphTargetWeights => {
                        AnimationProperty::MorphTargetWeights
                    }
                },
                interpolation: match channel.sampler().interpolation() {
                    gltf::animation::Interpolation::Linear => Interpolation::Linear,
                    gltf::animation::Interpolation::Step => Interpolation::Step,
                    gltf::animation::Interpolation::CubicSpline => Interpolation::CubicSpline,
                },
                timestamps,
                values,
            });
        }
        doc.animations.push(out);
    }

    Ok(doc)
}
