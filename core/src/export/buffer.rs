//! Binary buffer packing with automatic alignment and accessor creation.

use gltf_json as json;
use gltf_json::validation::Checked::Valid;

/// Accessor index returned by packing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessorIndex(pub u32);

impl AccessorIndex {
    pub fn as_json_index(&self) -> json::Index<json::Accessor> {
        json::Index::new(self.0)
    }
}

/// Accumulates one glTF buffer plus its views and accessors.
///
/// Every view starts on a 4-byte boundary. Quantized vertex attributes are
/// padded out to a 4-byte stride, which keeps the accessor alignment rules
/// satisfied for u16 and i8 component types.
pub struct BufferBuilder {
    buffer: Vec<u8>,
    views: Vec<json::buffer::View>,
    accessors: Vec<json::Accessor>,
}

impl BufferBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            views: Vec::new(),
            accessors: Vec::new(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<json::buffer::View>, Vec<json::Accessor>) {
        (self.buffer, self.views, self.accessors)
    }

    fn align(&mut self) {
        while self.buffer.len() % 4 != 0 {
            self.buffer.push(0);
        }
    }

    fn push_view(
        &mut self,
        data: &[u8],
        stride: Option<usize>,
        target: Option<json::buffer::Target>,
    ) -> u32 {
        self.align();
        let offset = self.buffer.len();
        self.buffer.extend_from_slice(data);
        let idx = self.views.len() as u32;
        self.views.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: data.len().into(),
            byte_offset: Some((offset as u64).into()),
            byte_stride: stride.map(json::buffer::Stride),
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            target: target.map(Valid),
        });
        idx
    }

    #[allow(clippy::too_many_arguments)]
    fn push_accessor(
        &mut self,
        view: u32,
        count: usize,
        component_type: json::accessor::ComponentType,
        type_: json::accessor::Type,
        normalized: bool,
        min: Option<json::Value>,
        max: Option<json::Value>,
    ) -> AccessorIndex {
        let idx = self.accessors.len() as u32;
        self.accessors.push(json::Accessor {
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
            normalized,
            sparse: None,
        });
        AccessorIndex(idx)
    }

    /// Pack f32 positions with the mandatory min/max bounds.
    pub fn pack_positions(&mut self, positions: &[[f32; 3]]) -> AccessorIndex {
        let bytes: &[u8] = bytemuck::cast_slice(positions);
        let view = self.push_view(bytes, None, Some(json::buffer::Target::ArrayBuffer));
        let (min, max) = f32_bounds(positions);
        self.push_accessor(
            view,
            positions.len(),
            json::accessor::ComponentType::F32,
            json::accessor::Type::Vec3,
            false,
            Some(min),
            Some(max),
        )
    }

    /// Pack unorm16 positions, padded to a 4-component / 8-byte stride.
    /// Bounds are reported in stored (integer) space.
    pub fn pack_positions_unorm16(&mut self, positions: &[[u16; 3]]) -> AccessorIndex {
        let padded: Vec<[u16; 4]> = positions.iter().map(|p| [p[0], p[1], p[2], 0]).collect();
        let view = self.push_view(
            bytemuck::cast_slice(&padded),
            Some(8),
            Some(json::buffer::Target::ArrayBuffer),
        );
        let (min, max) = u16_bounds(positions);
        self.push_accessor(
            view,
            positions.len(),
            json::accessor::ComponentType::U16,
            json::accessor::Type::Vec3,
            true,
            Some(min),
            Some(max),
        )
    }

    /// Pack f32 vec3 data (normals and animation vectors).
    pub fn pack_vec3(&mut self, data: &[[f32; 3]]) -> AccessorIndex {
        let view = self.push_view(
            bytemuck::cast_slice(data),
            None,
            Some(json::buffer::Target::ArrayBuffer),
        );
        self.push_accessor(
            view,
            data.len(),
            json::accessor::ComponentType::F32,
            json::accessor::Type::Vec3,
            false,
            None,
            None,
        )
    }

    /// Pack snorm8 normals, padded to a 4-byte stride.
    pub fn pack_normals_snorm8(&mut self, normals: &[[i8; 3]]) -> AccessorIndex {
        let padded: Vec<[i8; 4]> = normals.iter().map(|n| [n[0], n[1], n[2], 0]).collect();
        let view = self.push_view(
            bytemuck::cast_slice(&padded),
            Some(4),
            Some(json::buffer::Target::ArrayBuffer),
        );
        self.push_accessor(
            view,
            normals.len(),
            json::accessor::ComponentType::I8,
            json::accessor::Type::Vec3,
            true,
            None,
            None,
        )
    }

    /// Pack f32 UVs.
    pub fn pack_vec2(&mut self, data: &[[f32; 2]]) -> AccessorIndex {
        let view = self.push_view(
            bytemuck::cast_slice(data),
            None,
            Some(json::buffer::Target::ArrayBuffer),
        );
        self.push_accessor(
            view,
            data.len(),
            json::accessor::ComponentType::F32,
            json::accessor::Type::Vec2,
            false,
            None,
            None,
        )
    }

    /// Pack unorm16 UVs; two u16 components already make a 4-byte element.
    pub fn pack_uvs_unorm16(&mut self, uvs: &[[u16; 2]]) -> AccessorIndex {
        let view = self.push_view(
            bytemuck::cast_slice(uvs),
            None,
            Some(json::buffer::Target::ArrayBuffer),
        );
        self.push_accessor(
            view,
            uvs.len(),
            json::accessor::ComponentType::U16,
            json::accessor::Type::Vec2,
            true,
            None,
            None,
        )
    }

    /// Pack triangle indices at the narrowest width that fits.
    pub fn pack_indices(&mut self, indices: &[u32], vertex_count: usize) -> AccessorIndex {
        if vertex_count <= u16::MAX as usize + 1 {
            let narrow: Vec<u16> = indices.iter().map(|i| *i as u16).collect();
            let view = self.push_view(
                bytemuck::cast_slice(&narrow),
                None,
                Some(json::buffer::Target::ElementArrayBuffer),
            );
            self.push_accessor(
                view,
                indices.len(),
                json::accessor::ComponentType::U16,
                json::accessor::Type::Scalar,
                false,
                None,
                None,
            )
        } else {
            let view = self.push_view(
                bytemuck::cast_slice(indices),
                None,
                Some(json::buffer::Target::ElementArrayBuffer),
            );
            self.push_accessor(
                view,
                indices.len(),
                json::accessor::ComponentType::U32,
                json::accessor::Type::Scalar,
                false,
                None,
                None,
            )
        }
    }

    /// Pack scalar f32 data with min/max (animation keyframe inputs).
    pub fn pack_scalars(&mut self, data: &[f32]) -> AccessorIndex {
        let view = self.push_view(bytemuck::cast_slice(data), None, None);
        let min = data.iter().copied().reduce(f32::min).unwrap_or(0.0);
        let max = data.iter().copied().reduce(f32::max).unwrap_or(0.0);
        self.push_accessor(
            view,
            data.len(),
            json::accessor::ComponentType::F32,
            json::accessor::Type::Scalar,
            false,
            Some(json_f32s(&[min])),
            Some(json_f32s(&[max])),
        )
    }

    /// Pack flat f32 data under an arbitrary accessor type (animation
    /// keyframe outputs).
    pub fn pack_floats(&mut self, data: &[f32], type_: json::accessor::Type) -> AccessorIndex {
        let components = type_.multiplicity();
        let view = self.push_view(bytemuck::cast_slice(data), None, None);
        self.push_accessor(
            view,
            data.len() / components,
            json::accessor::ComponentType::F32,
            type_,
            false,
            None,
            None,
        )
    }

    /// Embed raw image bytes; returns the buffer-view index.
    pub fn push_image(&mut self, data: &[u8]) -> u32 {
        self.push_view(data, None, None)
    }
}

impl Default for BufferBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn json_f32s(values: &[f32]) -> json::Value {
    json::Value::Array(
        values
            .iter()
            .map(|v| json::Value::from(f64::from(*v)))
            .collect(),
    )
}

fn f32_bounds(positions: &[[f32; 3]]) -> (json::Value, json::Value) {
    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for p in positions {
        for i in 0..3 {
            min[i] = min[i].min(p[i]);
            max[i] = max[i].max(p[i]);
        }
    }
    (json_f32s(&min), json_f32s(&max))
}

fn u16_bounds(positions: &[[u16; 3]]) -> (json::Value, json::Value) {
    let mut min = [u16::MAX; 3];
    let mut max = [u16::MIN; 3];
    for p in positions {
        for i in 0..3 {
            min[i] = min[i].min(p[i]);
            max[i] = max[i].max(p[i]);
        }
    }
    let ints = |v: [u16; 3]| {
        json::Value::Array(v.iter().map(|c| json::Value::from(u64::from(*c))).collect())
    };
    (ints(min), ints(max))
}
