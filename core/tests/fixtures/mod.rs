//! Programmatic glTF/GLB generation for integration tests.
//!
//! Builds small but complete documents straight from `gltf_json` so the
//! pipeline under test never validates its own exporter output.

use gltf_json as json;
use gltf_json::validation::Checked::Valid;

pub struct FixtureBuilder {
    root: json::Root,
    buffer: Vec<u8>,
}

impl FixtureBuilder {
    pub fn new() -> Self {
        let mut root = json::Root::default();
        root.asset = json::Asset {
            generator: Some("fixture".to_string()),
            version: "2.0".to_string(),
            ..Default::default()
        };
        Self {
            root,
            buffer: Vec::new(),
        }
    }

    fn push_view(&mut self, data: &[u8], target: Option<json::buffer::Target>) -> u32 {
        while self.buffer.len() % 4 != 0 {
            self.buffer.push(0);
        }
        let offset = self.buffer.len();
        self.buffer.extend_from_slice(data);
        let idx = self.root.buffer_views.len() as u32;
        self.root.buffer_views.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: data.len().into(),
            byte_offset: Some((offset as u64).into()),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            target: target.map(Valid),
        });
        idx
    }

    fn push_accessor(
        &mut self,
        view: u32,
        count: usize,
        component_type: json::accessor::ComponentType,
        type_: json::accessor::Type,
        min: Option<json::Value>,
        max: Option<json::Value>,
    ) -> u32 {
        let idx = self.root.accessors.len() as u32;
        self.root.accessors.push(json::Accessor {
            buffer_view: Some(json::Index::new(view)),
            byte_offset: Some(0u64.into()),
            count: count.into(),
            component_type: Valid(json::accessor::GenericComponentType(component_type)),
            extensions: Default::default(),
            extras: Default::default(),
            type_: Valid(type_),
            min,
            max,
            name: None,
            normalized: false,
            sparse: None,
        });
        idx
    }

    fn bounds(positions: &[[f32; 3]]) -> (json::Value, json::Value) {
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for p in positions {
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }
        let arr = |v: [f32; 3]| {
            json::Value::Array(v.iter().map(|c| json::Value::from(f64::from(*c))).collect())
        };
        (arr(min), arr(max))
    }

    /// Add a triangle mesh plus a node referencing it; returns the mesh index.
    pub fn add_mesh(
        &mut self,
        positions: &[[f32; 3]],
        uvs: Option<&[[f32; 2]]>,
        indices: &[u32],
        material: Option<u32>,
    ) -> u32 {
        self.add_mesh_with_mode(positions, uvs, indices, material, json::mesh::Mode::Triangles)
    }

    /// Same, with an explicit primitive mode.
    pub fn add_mesh_with_mode(
        &mut self,
        positions: &[[f32; 3]],
        uvs: Option<&[[f32; 2]]>,
        indices: &[u32],
        material: Option<u32>,
        mode: json::mesh::Mode,
    ) -> u32 {
        let pos_bytes: Vec<u8> = positions
            .iter()
            .flat_map(|p| p.iter().flat_map(|f| f.to_le_bytes()))
            .collect();
        let pos_view = self.push_view(&pos_bytes, Some(json::buffer::Target::ArrayBuffer));
        let (min, max) = Self::bounds(positions);
        let pos_acc = self.push_accessor(
            pos_view,
            positions.len(),
            json::accessor::ComponentType::F32,
            json::accessor::Type::Vec3,
            Some(min),
            Some(max),
        );

        let mut attributes = std::collections::BTreeMap::new();
        attributes.insert(
            Valid(json::mesh::Semantic::Positions),
            json::Index::new(pos_acc),
        );

        if let Some(uvs) = uvs {
            let uv_bytes: Vec<u8> = uvs
                .iter()
                .flat_map(|v| v.iter().flat_map(|f| f.to_le_bytes()))
                .collect();
            let uv_view = self.push_view(&uv_bytes, Some(json::buffer::Target::ArrayBuffer));
            let uv_acc = self.push_accessor(
                uv_view,
                uvs.len(),
                json::accessor::ComponentType::F32,
                json::accessor::Type::Vec2,
                None,
                None,
            );
            attributes.insert(
                Valid(json::mesh::Semantic::TexCoords(0)),
                json::Index::new(uv_acc),
            );
        }

        let idx_bytes: Vec<u8> = indices.iter().flat_map(|i| i.to_le_bytes()).collect();
        let idx_view = self.push_view(&idx_bytes, Some(json::buffer::Target::ElementArrayBuffer));
        let idx_acc = self.push_accessor(
            idx_view,
            indices.len(),
            json::accessor::ComponentType::U32,
            json::accessor::Type::Scalar,
            None,
            None,
        );

        let mesh_idx = self.root.meshes.len() as u32;
        self.root.meshes.push(json::Mesh {
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            primitives: vec![json::mesh::Primitive {
                attributes,
                extensions: Default::default(),
                extras: Default::default(),
                indices: Some(json::Index::new(idx_acc)),
                material: material.map(json::Index::new),
                mode: Valid(mode),
                targets: None,
            }],
            weights: None,
        });

        let node_idx = self.root.nodes.len() as u32;
        self.root.nodes.push(json::Node {
            mesh: Some(json::Index::new(mesh_idx)),
            ..Default::default()
        });
        if self.root.scenes.is_empty() {
            self.root.scenes.push(json::Scene {
                extensions: Default::default(),
                extras: Default::default(),
                name: None,
                nodes: Vec::new(),
            });
            self.root.scene = Some(json::Index::new(0));
        }
        self.root.scenes[0].nodes.push(json::Index::new(node_idx));

        mesh_idx
    }

    /// Add an embedded PNG image with a default-sampler texture and a
    /// material using it as base color; returns the material index.
    pub fn add_textured_material(&mut self, png: &[u8]) -> u32 {
        let view = self.push_view(png, None);
        let image_idx = self.root.images.len() as u32;
        self.root.images.push(json::Image {
            buffer_view: Some(json::Index::new(view)),
            mime_type: Some(json::image::MimeType("image/png".to_string())),
            name: None,
            uri: None,
            extensions: Default::default(),
            extras: Default::default(),
        });
        let texture_idx = self.root.textures.len() as u32;
        self.root.textures.push(json::Texture {
            name: None,
            sampler: None,
            source: json::Index::new(image_idx),
            extensions: Default::default(),
            extras: Default::default(),
        });
        let material_idx = self.root.materials.len() as u32;
        self.root.materials.push(json::Material {
            pbr_metallic_roughness: json::material::PbrMetallicRoughness {
                base_color_texture: Some(json::texture::Info {
                    index: json::Index::new(texture_idx),
                    tex_coord: 0,
                    extensions: Default::default(),
                    extras: Default::default(),
                }),
                ..Default::default()
            },
            ..Default::default()
        });
        material_idx
    }

    /// Finish as a GLB byte vector.
    pub fn into_glb(mut self) -> Vec<u8> {
        self.root.buffers.push(json::Buffer {
            byte_length: self.buffer.len().into(),
            name: None,
            uri: None,
            extensions: Default::default(),
            extras: Default::default(),
        });
        let json_string = json::serialize::to_string(&self.root).expect("serialize fixture JSON");
        let json_bytes = json_string.as_bytes();

        let json_padding = (4 - (json_bytes.len() % 4)) % 4;
        let buffer_padding = (4 - (self.buffer.len() % 4)) % 4;
        let total = 12 + 8 + json_bytes.len() + json_padding + 8 + self.buffer.len() + buffer_padding;

        let mut glb = Vec::with_capacity(total);
        glb.extend_from_slice(b"glTF");
        glb.extend_from_slice(&2u32.to_le_bytes());
        glb.extend_from_slice(&(total as u32).to_le_bytes());
        glb.extend_from_slice(&((json_bytes.len() + json_padding) as u32).to_le_bytes());
        glb.extend_from_slice(&0x4E4F534Au32.to_le_bytes());
        glb.extend_from_slice(json_bytes);
        glb.extend(std::iter::repeat(b' ').take(json_padding));
        glb.extend_from_slice(&((self.buffer.len() + buffer_padding) as u32).to_le_bytes());
        glb.extend_from_slice(&0x004E4942u32.to_le_bytes());
        glb.extend_from_slice(&self.buffer);
        glb.extend(std::iter::repeat(0u8).take(buffer_padding));
        glb
    }

    /// Finish as a glTF descriptor referencing the buffer by `buffer_uri`;
    /// returns the JSON bytes and the external buffer payload.
    pub fn into_gltf(mut self, buffer_uri: &str) -> (Vec<u8>, Vec<u8>) {
        self.root.buffers.push(json::Buffer {
            byte_length: self.buffer.len().into(),
            name: None,
            uri: Some(buffer_uri.to_string()),
            extensions: Default::default(),
            extras: Default::default(),
        });
        let json_bytes = json::serialize::to_vec(&self.root).expect("serialize fixture JSON");
        (json_bytes, self.buffer)
    }
}

/// A quad written as two disconnected triangles: the shared edge's two
/// vertices appear twice with identical bytes.
pub fn quad_with_duplicate_vertices_glb() -> Vec<u8> {
    let mut b = FixtureBuilder::new();
    b.add_mesh(
        &[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ],
        None,
        &[0, 1, 2, 3, 4, 5],
        None,
    );
    b.into_glb()
}

/// Indexed grid with `cols` x `rows` cells (2 * cols * rows triangles) in
/// the z=0 plane, UVs normalized into [0, 1].
pub fn grid_glb(cols: u32, rows: u32) -> Vec<u8> {
    let (positions, uvs, indices) = grid_geometry(cols, rows);
    let mut b = FixtureBuilder::new();
    b.add_mesh(&positions, Some(&uvs), &indices, None);
    b.into_glb()
}

/// Same grid with an embedded 8x8 PNG texture on its material.
pub fn textured_grid_glb(cols: u32, rows: u32) -> Vec<u8> {
    let (positions, uvs, indices) = grid_geometry(cols, rows);
    let mut b = FixtureBuilder::new();
    let material = b.add_textured_material(&test_png(8, 8));
    b.add_mesh(&positions, Some(&uvs), &indices, Some(material));
    b.into_glb()
}

fn grid_geometry(cols: u32, rows: u32) -> (Vec<[f32; 3]>, Vec<[f32; 2]>, Vec<u32>) {
    let mut positions = Vec::new();
    let mut uvs = Vec::new();
    for y in 0..=rows {
        for x in 0..=cols {
            positions.push([x as f32, y as f32, 0.0]);
            uvs.push([x as f32 / cols as f32, y as f32 / rows as f32]);
        }
    }
    let stride = cols + 1;
    let mut indices = Vec::new();
    for y in 0..rows {
        for x in 0..cols {
            let i = y * stride + x;
            indices.extend_from_slice(&[i, i + 1, i + stride]);
            indices.extend_from_slice(&[i + 1, i + stride + 1, i + stride]);
        }
    }
    (positions, uvs, indices)
}

/// Three points joined as a line strip (mode 3), no triangles at all.
pub fn line_strip_glb() -> Vec<u8> {
    let mut b = FixtureBuilder::new();
    b.add_mesh_with_mode(
        &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 1.0, 0.0]],
        None,
        &[0, 1, 2],
        None,
        json::mesh::Mode::LineStrip,
    );
    b.into_glb()
}

/// Textured unit quad with an embedded 8x8 PNG.
pub fn textured_quad_glb() -> Vec<u8> {
    let mut b = FixtureBuilder::new();
    let material = b.add_textured_material(&test_png(8, 8));
    b.add_mesh(
        &[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ],
        Some(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
        &[0, 1, 2, 0, 2, 3],
        Some(material),
    );
    b.into_glb()
}

/// glTF descriptor whose buffer lives in an external file named `uri`.
pub fn triangle_gltf_with_external_buffer(uri: &str) -> (Vec<u8>, Vec<u8>) {
    let mut b = FixtureBuilder::new();
    b.add_mesh(
        &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        None,
        &[0, 1, 2],
        None,
    );
    b.into_gltf(uri)
}

/// Deterministic PNG for texture fixtures.
pub fn test_png(w: u32, h: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(w, h, |x, y| {
        image::Rgba([(x * 31 % 256) as u8, (y * 17 % 256) as u8, 200, 255])
    });
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_with_encoder(image::codecs::png::PngEncoder::new(&mut out))
        .expect("encode fixture PNG");
    out
}
