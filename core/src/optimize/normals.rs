//! Normal generation stage.
//!
//! Smooth mode accumulates unnormalized face cross products per vertex,
//! which weights each face's contribution by its area. Flat mode splits
//! every triangle into its own three vertices carrying the face normal.

use glam::Vec3;

use crate::document::{Document, Primitive};
use crate::optimize::NormalMode;
use crate::progress::ProgressScope;

pub fn run(mut doc: Document, mode: NormalMode, progress: &mut ProgressScope<'_, '_>) -> Document {
    let total: u64 = doc.triangle_count();
    let mut done: u64 = 0;
    for mesh in &mut doc.meshes {
        for prim in &mut mesh.primitives {
            if !prim.is_triangle_list() {
                continue;
            }
            let tris = prim.triangle_count();
            match mode {
                NormalMode::Smooth => smooth(prim),
                NormalMode::Flat => flat(prim),
            }
            done += tris;
            if total > 0 {
                progress.emit("computing normals", (done * 100 / total) as u8);
            }
        }
    }
    doc
}

fn face_cross(prim: &Primitive, tri: &[u32]) -> Vec3 {
    let a = Vec3::from_array(prim.positions[tri[0] as usize]);
    let b = Vec3::from_array(prim.positions[tri[1] as usize]);
    let c = Vec3::from_array(prim.positions[tri[2] as usize]);
    (b - a).cross(c - a)
}

fn normalize_or_up(v: Vec3) -> [f32; 3] {
    if v.length_squared() > 1e-20 {
        v.normalize().to_array()
    } else {
        [0.0, 0.0, 1.0]
    }
}

fn smooth(prim: &mut Primitive) {
    let mut accum = vec![Vec3::ZERO; prim.positions.len()];
    for tri in prim.indices.chunks_exact(3) {
        let cross = face_cross(prim, tri);
        for &v in tri {
            accum[v as usize] += cross;
        }
    }
    prim.normals = Some(accum.into_iter().map(normalize_or_up).collect());
}

/// Faceted shading needs per-face normals, so shared vertices are split.
fn flat(prim: &mut Primitive) {
    let tri_count = prim.indices.len() / 3;
    let mut positions = Vec::with_capacity(tri_count * 3);
    let mut normals = Vec::with_capacity(tri_count * 3);
    let mut uvs = prim.uvs.as_ref().map(|_| Vec::with_capacity(tri_count * 3));
    let mut indices = Vec::with_capacity(tri_count * 3);

    for tri in prim.indices.chunks_exact(3) {
        let normal = normalize_or_up(face_cross(prim, tri));
        for &v in tri {
            indices.push(positions.len() as u32);
            positions.push(prim.positions[v as usize]);
            normals.push(normal);
            if let (Some(out), Some(src)) = (uvs.as_mut(), prim.uvs.as_ref()) {
                out.push(src[v as usize]);
            }
        }
    }

    prim.positions = positions;
    prim.normals = Some(normals);
    prim.uvs = uvs;
    prim.indices = indices;
}
