use super::Document;

/// Size and complexity measurements taken over a document snapshot.
///
/// Byte counts reflect what the binary payload of an export would carry:
/// vertex streams at their current precision, indices at the narrowest
/// integer width that fits, animation keyframes, and encoded image bytes.
/// JSON structure overhead is deliberately excluded so that before/after
/// deltas isolate the effect of each optimization stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub vertices: u64,
    pub triangles: u64,
    pub document_bytes: u64,
    pub texture_bytes: u64,
}

/// Measure a document. Pure; called before and after every stage.
pub fn measure(doc: &Document) -> Metrics {
    let mut geometry = 0u64;
    for mesh in &doc.meshes {
        for prim in &mesh.primitives {
            let n = prim.positions.len() as u64;
            if let Some(q) = &prim.quantized {
                geometry += (q.positions.len() * 3 * 2) as u64;
                if let Some(norms) = &q.normals {
                    geometry += (norms.len() * 3) as u64;
                }
                if let Some(uvs) = &q.uvs {
                    geometry += (uvs.len() * 2 * 2) as u64;
                } else if prim.uvs.is_some() {
                    geometry += n * 2 * 4;
                }
            } else {
                geometry += n * 3 * 4;
                if prim.normals.is_some() {
                    geometry += n * 3 * 4;
                }
                if prim.uvs.is_some() {
                    geometry += n * 2 * 4;
                }
            }
            let index_width = if n <= u16::MAX as u64 { 2 } else { 4 };
            geometry += prim.indices.len() as u64 * index_width;
        }
    }

    let mut animation = 0u64;
    for anim in &doc.animations {
        for ch in &anim.channels {
            animation += (ch.timestamps.len() * 4 + ch.values.len() * 4) as u64;
        }
    }

    let texture_bytes: u64 = doc.images.iter().map(|img| img.data.len() as u64).sum();

    Metrics {
        vertices: doc.vertex_count(),
        triangles: doc.triangle_count(),
        document_bytes: geometry + animation + texture_bytes,
        texture_bytes,
    }
}
