//! In-memory document model.
//!
//! The structured, mutable representation of a loaded 3D asset: scene graph
//! nodes, meshes with per-primitive vertex streams, materials, textures with
//! their still-encoded image payloads, and animation channels. A `Document`
//! is owned by exactly one pipeline invocation; optimization stages take it
//! by value and hand it back, which makes the fixed stage order structural
//! rather than a convention.

mod metrics;

pub use metrics::{measure, Metrics};

/// A complete in-memory asset.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub scenes: Vec<Scene>,
    pub default_scene: Option<usize>,
    pub nodes: Vec<Node>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub textures: Vec<Texture>,
    pub samplers: Vec<Sampler>,
    pub images: Vec<Image>,
    pub animations: Vec<Animation>,
    /// Set by the quantize stage; the exporter declares
    /// `KHR_mesh_quantization` when true.
    pub quantized: bool,
}

impl Document {
    /// Total vertex count across all primitives.
    pub fn vertex_count(&self) -> u64 {
        self.meshes
            .iter()
            .flat_map(|m| m.primitives.iter())
            .map(|p| p.positions.len() as u64)
            .sum()
    }

    /// Total triangle count across all primitives.
    pub fn triangle_count(&self) -> u64 {
        self.meshes
            .iter()
            .flat_map(|m| m.primitives.iter())
            .map(|p| p.triangle_count())
            .sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub name: Option<String>,
    /// Indices of root nodes.
    pub nodes: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: Option<String>,
    pub translation: [f32; 3],
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
    pub mesh: Option<usize>,
    pub children: Vec<usize>,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            name: None,
            translation: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
            mesh: None,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub name: Option<String>,
    pub primitives: Vec<Primitive>,
    /// Dequantization transform shared by all primitives of this mesh.
    /// Present only after the quantize stage ran.
    pub dequant: Option<Dequant>,
}

/// One primitive with de-interleaved attribute streams.
#[derive(Debug, Clone, Default)]
pub struct Primitive {
    pub mode: PrimitiveMode,
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub uvs: Option<Vec<[f32; 2]>>,
    pub indices: Vec<u32>,
    pub material: Option<usize>,
    /// Reduced-precision attribute encoding produced by the quantize stage.
    /// The f32 streams above stay authoritative for geometry passes; the
    /// exporter prefers this encoding when present.
    pub quantized: Option<QuantizedAttributes>,
}

impl Primitive {
    pub fn triangle_count(&self) -> u64 {
        match self.mode {
            PrimitiveMode::Triangles => (self.indices.len() / 3) as u64,
            PrimitiveMode::TriangleStrip | PrimitiveMode::TriangleFan => {
                self.indices.len().saturating_sub(2) as u64
            }
            _ => 0,
        }
    }

    /// Only indexed triangle lists are rewritten by the geometry stages;
    /// everything else passes through untouched.
    pub fn is_triangle_list(&self) -> bool {
        self.mode == PrimitiveMode::Triangles
    }
}

/// Primitive topology, mirroring the glTF `mode` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveMode {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
}

/// Integer normalized attribute streams (KHR_mesh_quantization layout).
#[derive(Debug, Clone)]
pub struct QuantizedAttributes {
    /// unorm16 against the owning mesh's dequantization bounds.
    pub positions: Vec<[u16; 3]>,
    /// snorm8, renormalized on the GPU.
    pub normals: Option<Vec<[i8; 3]>>,
    /// unorm16; only produced when every source UV lies in [0, 1].
    pub uvs: Option<Vec<[u16; 2]>>,
}

/// Affine map from normalized position space back to model space:
/// `model = offset + unorm * scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dequant {
    pub offset: [f32; 3],
    pub scale: [f32; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: Option<String>,
    pub base_color_factor: [f32; 4],
    pub base_color_texture: Option<TextureRef>,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub metallic_roughness_texture: Option<TextureRef>,
    pub normal_texture: Option<TextureRef>,
    pub emissive_factor: [f32; 3],
    pub emissive_texture: Option<TextureRef>,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub double_sided: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: None,
            base_color_factor: [1.0; 4],
            base_color_texture: None,
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            metallic_roughness_texture: None,
            normal_texture: None,
            emissive_factor: [0.0; 3],
            emissive_texture: None,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            double_sided: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRef {
    pub texture: usize,
    pub tex_coord: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    Opaque,
    Mask,
    Blend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    pub name: Option<String>,
    pub image: usize,
    pub sampler: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sampler {
    pub mag_filter: Option<Filter>,
    pub min_filter: Option<Filter>,
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wrap {
    ClampToEdge,
    MirroredRepeat,
    #[default]
    Repeat,
}

/// An image payload kept in its *encoded* form (PNG/JPEG bytes). Decoding
/// happens only inside the texture stage, which may replace both bytes and
/// mime type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub name: Option<String>,
    pub data: Vec<u8>,
    pub mime_type: Option<String>,
    /// Original URI, kept so glTF-form export can name the file as loaded.
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Animation {
    pub name: Option<String>,
    pub channels: Vec<AnimationChannel>,
}

#[derive(Debug, Clone)]
pub struct AnimationChannel {
    pub target_node: usize,
    pub property: AnimationProperty,
    pub interpolation: Interpolation,
    pub timestamps: Vec<f32>,
    /// Flat keyframe values; component count depends on `property`.
    pub values: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationProperty {
    Translation,
    Rotation,
    Scale,
    MorphTargetWeights,
}

impl AnimationProperty {
    /// Components per keyframe value.
    pub fn components(&self) -> usize {
        match self {
            AnimationProperty::Rotation => 4,
            AnimationProperty::MorphTargetWeights => 1,
            _ => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Step,
    CubicSpline,
}
