//! Document export: glTF JSON construction plus GLB / glTF+resources
//! packaging.

pub mod buffer;
pub mod glb;

use gltf_json as json;
use gltf_json::validation::Checked::Valid;
use serde::{Deserialize, Serialize};

use crate::document::{
    AlphaMode, AnimationProperty, Document, Filter, Interpolation, PrimitiveMode, Wrap,
};
use crate::error::{PipelineError, Result};
use crate::progress::{PipelinePhase, ProgressFn, ProgressScope};

use buffer::BufferBuilder;

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Glb,
    Gltf,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Glb => "model/gltf-binary",
            ExportFormat::Gltf => "model/gltf+json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Glb => "glb",
            ExportFormat::Gltf => "gltf",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub format: ExportFormat,
}

/// An external file emitted alongside a glTF descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedResource {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum ExportPayload {
    /// Single self-contained GLB.
    Binary(Vec<u8>),
    /// JSON descriptor plus external buffer/image files.
    Descriptor {
        json: Vec<u8>,
        resources: Vec<NamedResource>,
    },
}

#[derive(Debug, Clone)]
pub struct ExportResult {
    pub payload: ExportPayload,
    pub format: ExportFormat,
    /// Total bytes across the descriptor and every resource.
    pub byte_size: u64,
}

/// Serialize the document into the requested container.
pub fn export(
    doc: &Document,
    options: &ExportOptions,
    sink: Option<&mut ProgressFn<'_>>,
) -> Result<ExportResult> {
    let mut scope = ProgressScope::new(sink, PipelinePhase::Export);
    scope.emit("packing geometry", 0);

    match options.format {
        ExportFormat::Glb => {
            let (root, buffer_data, _) = build_root(doc, ImagePlacement::Embedded, &mut scope)?;
            scope.emit("encoding", 90);
            let glb = glb::assemble_glb(&root, &buffer_data)?;
            let byte_size = glb.len() as u64;
            scope.emit("done", 100);
            Ok(ExportResult {
                payload: ExportPayload::Binary(glb),
                format: ExportFormat::Glb,
                byte_size,
            })
        }
        ExportFormat::Gltf => {
            let (root, buffer_data, mut resources) =
                build_root(doc, ImagePlacement::External, &mut scope)?;
            if !buffer_data.is_empty() {
                resources.insert(
                    0,
                    NamedResource {
                        name: BUFFER_FILE.to_string(),
                        data: buffer_data,
                    },
                );
            }
            scope.emit("encoding", 90);
            let json_bytes = serde_json::to_vec_pretty(&root)
                .map_err(|e| PipelineError::ExportEncoding {
                    format: "gltf".to_string(),
                    detail: format!("JSON serialization failed: {e}"),
                })?;
            let byte_size =
                json_bytes.len() as u64 + resources.iter().map(|r| r.data.len() as u64).sum::<u64>();
            scope.emit("done", 100);
            Ok(ExportResult {
                payload: ExportPayload::Descriptor {
                    json: json_bytes,
                    resources,
                },
                format: ExportFormat::Gltf,
                byte_size,
            })
        }
    }
}

const BUFFER_FILE: &str = "buffer.bin";
const QUANTIZATION_EXTENSION: &str = "KHR_mesh_quantization";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImagePlacement {
    /// Buffer-view backed (GLB).
    Embedded,
    /// Named external files (glTF form).
    External,
}

fn build_root(
    doc: &Document,
    placement: ImagePlacement,
    scope: &mut ProgressScope<'_, '_>,
) -> Result<(json::Root, Vec<u8>, Vec<NamedResource>)> {
    let mut root = json::Root {
        asset: json::Asset {
            generator: Some("meshpress".to_string()),
            version: "2.0".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut builder = BufferBuilder::new();

    build_meshes(doc, &mut root, &mut builder);
    scope.emit("packing geometry", 40);
    build_nodes_and_scenes(doc, &mut root);
    build_materials(doc, &mut root);
    let resources = build_images(doc, placement, &mut root, &mut builder)?;
    scope.emit("embedding images", 70);
    build_animations(doc, &mut root, &mut builder);

    if uses_quantization(doc) {
        root.extensions_used.push(QUANTIZATION_EXTENSION.to_string());
        root.extensions_required
            .push(QUANTIZATION_EXTENSION.to_string());
    }

    let (buffer_data, views, accessors) = builder.into_parts();
    root.buffer_views = views;
    root.accessors = accessors;
    if !buffer_data.is_empty() {
        root.buffers.push(json::Buffer {
            byte_length: buffer_data.len().into(),
            name: None,
            uri: match placement {
                ImagePlacement::Embedded => None,
                ImagePlacement::External => Some(BUFFER_FILE.to_string()),
            },
            extensions: Default::default(),
            extras: Default::default(),
        });
    }

    Ok((root, buffer_data, resources))
}

fn uses_quantization(doc: &Document) -> bool {
    doc.quantized
        && doc
            .meshes
            .iter()
            .any(|m| m.primitives.iter().any(|p| p.quantized.is_some()))
}

fn build_meshes(doc: &Document, root: &mut json::Root, builder: &mut BufferBuilder) {
    for mesh in &doc.meshes {
        let mut primitives = Vec::with_capacity(mesh.primitives.len());
        for prim in &mesh.primitives {
            let mut attributes = std::collections::BTreeMap::new();

            let positions = match &prim.quantized {
                Some(q) => builder.pack_positions_unorm16(&q.positions),
                None => builder.pack_positions(&prim.positions),
            };
            attributes.insert(
                Valid(json::mesh::Semantic::Positions),
                positions.as_json_index(),
            );

            let normals = match (&prim.quantized, &prim.normals) {
                (Some(q), _) if q.normals.is_some() => q
                    .normals
                    .as_ref()
                    .map(|n| builder.pack_normals_snorm8(n)),
                (_, Some(n)) => Some(builder.pack_vec3(n)),
                _ => None,
            };
            if let Some(acc) = normals {
                attributes.insert(Valid(json::mesh::Semantic::Normals), acc.as_json_index());
            }

            let uvs = match (&prim.quantized, &prim.uvs) {
                (Some(q), _) if q.uvs.is_some() => {
                    q.uvs.as_ref().map(|t| builder.pack_uvs_unorm16(t))
                }
                (_, Some(t)) => Some(builder.pack_vec2(t)),
                _ => None,
            };
            if let Some(acc) = uvs {
                attributes.insert(Valid(json::mesh::Semantic::TexCoords(0)), acc.as_json_index());
            }

            let indices = builder.pack_indices(&prim.indices, prim.positions.len());
            primitives.push(json::mesh::Primitive {
                attributes,
                extensions: Default::default(),
                extras: Default::default(),
                indices: Some(indices.as_json_index()),
                material: prim.material.map(|m| json::Index::new(m as u32)),
                mode: Valid(match prim.mode {
                    PrimitiveMode::Points => json::mesh::Mode::Points,
                    PrimitiveMode::Lines => json::mesh::Mode::Lines,
                    PrimitiveMode::LineLoop => json::mesh::Mode::LineLoop,
                    PrimitiveMode::LineStrip => json::mesh::Mode::LineStrip,
                    PrimitiveMode::Triangles => json::mesh::Mode::Triangles,
                    PrimitiveMode::TriangleStrip => json::mesh::Mode::TriangleStrip,
                    PrimitiveMode::TriangleFan => json::mesh::Mode::TriangleFan,
                }),
                targets: None,
            });
        }
        root.meshes.push(json::Mesh {
            extensions: Default::default(),
            extras: Default::default(),
            name: mesh.name.clone(),
            primitives,
            weights: None,
        });
    }
}

/// Copy the node graph. A node referencing a quantized mesh hands the mesh
/// to an appended wrapper child carrying the dequantization translation and
/// scale, so the original TRS composes with it in glTF order.
fn build_nodes_and_scenes(doc: &Document, root: &mut json::Root) {
    let mut wrappers: Vec<json::Node> = Vec::new();
    let wrapper_base = doc.nodes.len() as u32;

    for node in &doc.nodes {
        let mut mesh = node.mesh.map(|m| json::Index::new(m as u32));
        let mut children: Vec<json::Index<json::Node>> = node
            .children
            .iter()
            .map(|c| json::Index::new(*c as u32))
            .collect();

        if let Some(m) = node.mesh {
            if let Some(dq) = doc.meshes.get(m).and_then(|mesh| mesh.dequant) {
                let wrapper_idx = wrapper_base + wrappers.len() as u32;
                wrappers.push(json::Node {
                    mesh: Some(json::Index::new(m as u32)),
                    translation: Some(dq.offset),
                    scale: Some(dq.scale),
                    ..Default::default()
                });
                children.push(json::Index::new(wrapper_idx));
                mesh = None;
            }
        }

        let identity = node.translation == [0.0; 3]
            && node.rotation == [0.0, 0.0, 0.0, 1.0]
            && node.scale == [1.0; 3];
        root.nodes.push(json::Node {
            mesh,
            name: node.name.clone(),
            children: (!children.is_empty()).then_some(children),
            translation: (!identity).then_some(node.translation),
            rotation: (!identity).then(|| json::scene::UnitQuaternion(node.rotation)),
            scale: (!identity).then_some(node.scale),
            ..Default::default()
        });
    }
    root.nodes.extend(wrappers);

    for scene in &doc.scenes {
        root.scenes.push(json::Scene {
            extensions: Default::default(),
            extras: Default::default(),
            name: scene.name.clone(),
            nodes: scene
                .nodes
                .iter()
                .map(|n| json::Index::new(*n as u32))
                .collect(),
        });
    }
    root.scene = doc.default_scene.map(|s| json::Index::new(s as u32));
}

fn build_materials(doc: &Document, root: &mut json::Root) {
    let info = |r: &crate::document::TextureRef| json::texture::Info {
        index: json::Index::new(r.texture as u32),
        tex_coord: r.tex_coord,
        extensions: Default::default(),
        extras: Default::default(),
    };

    for mat in &doc.materials {
        root.materials.push(json::Material {
            name: mat.name.clone(),
            alpha_cutoff: (mat.alpha_mode == AlphaMode::Mask)
                .then_some(json::material::AlphaCutoff(mat.alpha_cutoff)),
            alpha_mode: Valid(match mat.alpha_mode {
                AlphaMode::Opaque => json::material::AlphaMode::Opaque,
                AlphaMode::Mask => json::material::AlphaMode::Mask,
                AlphaMode::Blend => json::material::AlphaMode::Blend,
            }),
            double_sided: mat.double_sided,
            pbr_metallic_roughness: json::material::PbrMetallicRoughness {
                base_color_factor: json::material::PbrBaseColorFactor(mat.base_color_factor),
                base_color_texture: mat.base_color_texture.as_ref().map(info),
                metallic_factor: json::material::StrengthFactor(mat.metallic_factor),
                roughness_factor: json::material::StrengthFactor(mat.roughness_factor),
                metallic_roughness_texture: mat.metallic_roughness_texture.as_ref().map(info),
                extensions: Default::default(),
                extras: Default::default(),
            },
            normal_texture: mat.normal_texture.as_ref().map(|r| json::material::NormalTexture {
                index: json::Index::new(r.texture as u32),
                scale: 1.0,
                tex_coord: r.tex_coord,
                extensions: Default::default(),
                extras: Default::default(),
            }),
            occlusion_texture: None,
            emissive_texture: mat.emissive_texture.as_ref().map(info),
            emissive_factor: json::material::EmissiveFactor(mat.emissive_factor),
            extensions: Default::default(),
            extras: Default::default(),
        });
    }

    for sampler in &doc.samplers {
        root.samplers.push(json::texture::Sampler {
            mag_filter: sampler.mag_filter.map(|f| {
                Valid(match f {
                    Filter::Nearest => json::texture::MagFilter::Nearest,
                    Filter::Linear => json::texture::MagFilter::Linear,
                })
            }),
            min_filter: sampler.min_filter.map(|f| {
                Valid(match f {
                    Filter::Nearest => json::texture::MinFilter::Nearest,
                    Filter::Linear => json::texture::MinFilter::Linear,
                })
            }),
            name: None,
            wrap_s: Valid(wrap_mode(sampler.wrap_s)),
            wrap_t: Valid(wrap_mode(sampler.wrap_t)),
            extensions: Default::default(),
            extras: Default::default(),
        });
    }

    for tex in &doc.textures {
        root.textures.push(json::Texture {
            name: tex.name.clone(),
            sampler: tex.sampler.map(|s| json::Index::new(s as u32)),
            source: json::Index::new(tex.image as u32),
            extensions: Default::default(),
            extras: Default::default(),
        });
    }
}

fn wrap_mode(w: Wrap) -> json::texture::WrappingMode {
    match w {
        Wrap::ClampToEdge => json::texture::WrappingMode::ClampToEdge,
        Wrap::MirroredRepeat => json::texture::WrappingMode::MirroredRepeat,
        Wrap::Repeat => json::texture::WrappingMode::Repeat,
    }
}

fn build_images(
    doc: &Document,
    placement: ImagePlacement,
    root: &mut json::Root,
    builder: &mut BufferBuilder,
) -> Result<Vec<NamedResource>> {
    let mut resources = Vec::new();
    let mut used_names: hashbrown::HashSet<String> = hashbrown::HashSet::new();

    for (i, img) in doc.images.iter().enumerate() {
        let mime = img
            .mime_type
            .clone()
            .or_else(|| sniff_mime(&img.data).map(str::to_string));

        match placement {
            ImagePlacement::Embedded => {
                let mime = mime.ok_or_else(|| PipelineError::ExportEncoding {
                    format: "glb".to_string(),
                    detail: format!("image {i} has no recognizable encoding"),
                })?;
                let view = builder.push_image(&img.data);
                root.images.push(json::Image {
                    buffer_view: Some(json::Index::new(view)),
                    mime_type: Some(json::image::MimeType(mime)),
                    name: img.name.clone(),
                    uri: None,
                    extensions: Default::default(),
                    extras: Default::default(),
                });
            }
            ImagePlacement::External => {
                let ext = match mime.as_deref() {
                    Some("image/png") => "png",
                    Some("image/jpeg") => "jpg",
                    _ => {
                        return Err(PipelineError::ExportEncoding {
                            format: "gltf".to_string(),
                            detail: format!("image {i} has no inferable file extension"),
                        })
                    }
                };
                let stem = img
                    .uri
                    .as_deref()
                    .and_then(|u| {
                        std::path::Path::new(u)
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .map(str::to_string)
                    })
                    .or_else(|| img.name.clone())
                    .unwrap_or_else(|| format!("image_{i}"));
                let mut file = format!("{stem}.{ext}");
                if !used_names.insert(file.clone()) {
                    file = format!("{stem}_{i}.{ext}");
                    used_names.insert(file.clone());
                }
                resources.push(NamedResource {
                    name: file.clone(),
                    data: img.data.clone(),
                });
                root.images.push(json::Image {
                    buffer_view: None,
                    mime_type: mime.map(json::image::MimeType),
                    name: img.name.clone(),
                    uri: Some(file),
                    extensions: Default::default(),
                    extras: Default::default(),
                });
            }
        }
    }
    Ok(resources)
}

fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if data.starts_with(&[0xFF, 0xD8]) {
        Some("image/jpeg")
    } else {
        None
    }
}

fn build_animations(doc: &Document, root: &mut json::Root, builder: &mut BufferBuilder) {
    for anim in &doc.animations {
        let mut channels = Vec::new();
        let mut samplers = Vec::new();

        for channel in &anim.channels {
            let input = builder.pack_scalars(&channel.timestamps);
            let value_type = match channel.property.components() {
                4 => json::accessor::Type::Vec4,
                1 => json::accessor::Type::Scalar,
                _ => json::accessor::Type::Vec3,
            };
            let output = builder.pack_floats(&channel.values, value_type);

            let sampler_idx = samplers.len() as u32;
            samplers.push(json::animation::Sampler {
                input: input.as_json_index(),
                output: output.as_json_index(),
                interpolation: Valid(match channel.interpolation {
                    Interpolation::Linear => json::animation::Interpolation::Linear,
                    Interpolation::Step => json::animation::Interpolation::Step,
                    Interpolation::CubicSpline => json::animation::Interpolation::CubicSpline,
                }),
                extensions: Default::default(),
                extras: Default::default(),
            });
            channels.push(json::animation::Channel {
                sampler: json::Index::new(sampler_idx),
                target: json::animation::Target {
                    node: json::Index::new(channel.target_node as u32),
                    path: Valid(match channel.property {
                        AnimationProperty::Translation => json::animation::Property::Translation,
                        AnimationProperty::Rotation => json::animation::Property::Rotation,
                        AnimationProperty::Scale => json::animation::Property::Scale,
                        AnimationProperty::MorphTargetWeights => {
                            json::animation::Property::MorphTargetWeights
                        }
                    }),
                    extensions: Default::default(),
                    extras: Default::default(),
                },
                extensions: Default::default(),
                extras: Default::default(),
            });
        }

        root.animations.push(json::Animation {
            name: anim.name.clone(),
            channels,
            samplers,
            extensions: Default::default(),
            extras: Default::default(),
        });
    }
}
