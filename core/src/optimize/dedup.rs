//! Deduplication stage: vertex welding plus merging of byte-identical
//! materials, textures, samplers and images.

use hashbrown::HashMap;

use crate::document::{Document, Primitive};
use crate::progress::ProgressScope;

/// Weld identical vertices within each primitive and collapse duplicate
/// material/texture/image entries, retargeting every reference. Running the
/// stage twice is a no-op the second time.
pub fn run(mut doc: Document, progress: &mut ProgressScope<'_, '_>) -> Document {
    for mesh in &mut doc.meshes {
        for prim in &mut mesh.primitives {
            if prim.is_triangle_list() {
                weld_primitive(prim);
            }
        }
    }
    progress.emit("welding vertices", 50);

    // Entity merging goes leaf to root so each pass sees stable indices:
    // images, then samplers, then the textures that point at both, then
    // materials, then the primitives that point at materials.
    let image_map = merge_identical(&mut doc.images);
    let sampler_map = merge_identical(&mut doc.samplers);
    for tex in &mut doc.textures {
        tex.image = image_map[tex.image];
        tex.sampler = tex.sampler.map(|s| sampler_map[s]);
    }
    let texture_map = merge_identical(&mut doc.textures);
    for mat in &mut doc.materials {
        for slot in [
            &mut mat.base_color_texture,
            &mut mat.metallic_roughness_texture,
            &mut mat.normal_texture,
            &mut mat.emissive_texture,
        ] {
            if let Some(r) = slot {
                r.texture = texture_map[r.texture];
            }
        }
    }
    let material_map = merge_identical(&mut doc.materials);
    for mesh in &mut doc.meshes {
        for prim in &mut mesh.primitives {
            prim.material = prim.material.map(|m| material_map[m]);
        }
    }
    progress.emit("merging materials", 100);

    doc
}

#[derive(Hash, PartialEq, Eq)]
struct VertexKey {
    position: [u32; 3],
    normal: Option<[u32; 3]>,
    uv: Option<[u32; 2]>,
}

fn bits3(v: [f32; 3]) -> [u32; 3] {
    [v[0].to_bits(), v[1].to_bits(), v[2].to_bits()]
}

/// Collapse vertices whose attribute bytes match exactly, then rebuild the
/// index buffer and drop triangles the weld degenerated.
fn weld_primitive(prim: &mut Primitive) {
    let count = prim.positions.len();
    let mut lookup: HashMap<VertexKey, u32> = HashMap::with_capacity(count);
    let mut remap = vec![0u32; count];

    let mut positions = Vec::with_capacity(count);
    let mut normals = prim.normals.as_ref().map(|_| Vec::with_capacity(count));
    let mut uvs = prim.uvs.as_ref().map(|_| Vec::with_capacity(count));

    for i in 0..count {
        let key = VertexKey {
            position: bits3(prim.positions[i]),
            normal: prim.normals.as_ref().map(|n| bits3(n[i])),
            uv: prim.uvs.as_ref().map(|t| [t[i][0].to_bits(), t[i][1].to_bits()]),
        };
        let next = positions.len() as u32;
        remap[i] = *lookup.entry(key).or_insert_with(|| {
            positions.push(prim.positions[i]);
            if let (Some(out), Some(src)) = (normals.as_mut(), prim.normals.as_ref()) {
                out.push(src[i]);
            }
            if let (Some(out), Some(src)) = (uvs.as_mut(), prim.uvs.as_ref()) {
                out.push(src[i]);
            }
            next
        });
    }

    let mut indices = Vec::with_capacity(prim.indices.len());
    for tri in prim.indices.chunks_exact(3) {
        let (a, b, c) = (
            remap[tri[0] as usize],
            remap[tri[1] as usize],
            remap[tri[2] as usize],
        );
        if a != b && b != c && a != c {
            indices.extend_from_slice(&[a, b, c]);
        }
    }

    prim.positions = positions;
    prim.normals = normals;
    prim.uvs = uvs;
    prim.indices = indices;
}

/// Remove duplicate entries, keeping the first occurrence. Returns the
/// old-index to new-index map. Quadratic, but these lists hold a handful of
/// materials or images, not vertices.
fn merge_identical<T: PartialEq>(items: &mut Vec<T>) -> Vec<usize> {
    let mut kept: Vec<T> = Vec::with_capacity(items.len());
    let mut map = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        match kept.iter().position(|k| *k == item) {
            Some(existing) => map.push(existing),
            None => {
                map.push(kept.len());
                kept.push(item);
            }
        }
    }
    *items = kept;
    map
}
