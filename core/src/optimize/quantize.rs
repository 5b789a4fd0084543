//! Attribute quantization stage.
//!
//! Positions become unorm16 normalized against the owning mesh's bounding
//! box, with the dequantization offset/scale recorded on the mesh (the
//! exporter folds it into every referencing node's transform). Normals
//! become snorm8; UVs become unorm16 only when every coordinate already
//! lies in [0, 1], otherwise the float stream is kept. The exporter
//! declares `KHR_mesh_quantization` for the integer accessors.

use crate::document::{Dequant, Document, Mesh, QuantizedAttributes};
use crate::progress::ProgressScope;

pub fn run(mut doc: Document, progress: &mut ProgressScope<'_, '_>) -> Document {
    let total = doc.meshes.len().max(1);
    for i in 0..doc.meshes.len() {
        quantize_mesh(&mut doc.meshes[i]);
        progress.emit("quantizing attributes", ((i + 1) * 100 / total) as u8);
    }
    doc.quantized = true;
    doc
}

fn f32_to_unorm16(v: f32) -> u16 {
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}

fn f32_to_snorm8(v: f32) -> i8 {
    (v.clamp(-1.0, 1.0) * 127.0).round() as i8
}

fn quantize_mesh(mesh: &mut Mesh) {
    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for prim in &mesh.primitives {
        for p in &prim.positions {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
    }
    if min[0] > max[0] {
        // No vertices anywhere in this mesh.
        return;
    }

    // A zero-extent axis still needs a nonzero scale so dequantization
    // stays invertible; every coordinate maps to 0 on that axis.
    let mut scale = [0.0f32; 3];
    for axis in 0..3 {
        scale[axis] = (max[axis] - min[axis]).max(f32::EPSILON);
    }

    for prim in &mut mesh.primitives {
        let positions = prim
            .positions
            .iter()
            .map(|p| {
                [
                    f32_to_unorm16((p[0] - min[0]) / scale[0]),
                    f32_to_unorm16((p[1] - min[1]) / scale[1]),
                    f32_to_unorm16((p[2] - min[2]) / scale[2]),
                ]
            })
            .collect();

        let normals = prim.normals.as_ref().map(|ns| {
            ns.iter()
                .map(|n| [f32_to_snorm8(n[0]), f32_to_snorm8(n[1]), f32_to_snorm8(n[2])])
                .collect()
        });

        let uvs = prim.uvs.as_ref().and_then(|ts| {
            let in_range = ts
                .iter()
                .all(|t| (0.0..=1.0).contains(&t[0]) && (0.0..=1.0).contains(&t[1]));
            in_range.then(|| {
                ts.iter()
                    .map(|t| [f32_to_unorm16(t[0]), f32_to_unorm16(t[1])])
                    .collect()
            })
        });

        prim.quantized = Some(QuantizedAttributes {
            positions,
            normals,
            uvs,
        });
    }

    mesh.dequant = Some(Dequant {
        offset: min,
        scale,
    });
}
