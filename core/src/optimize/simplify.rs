//! Mesh simplification stage: quadric-error-metric edge collapse.
//!
//! Greedy half-edge collapses ordered by a per-vertex error quadric
//! (Garland-Heckbert style, subset placement: a collapse moves one endpoint
//! onto the other, so surviving vertices keep their original attributes).
//! Boundary vertices never move, which keeps open-mesh silhouettes intact.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use glam::DVec3;
use hashbrown::{HashMap, HashSet};

use crate::document::{Document, Primitive};
use crate::error::Result;
use crate::progress::{CancelToken, ProgressScope};

const CANCEL_CHECK_INTERVAL: usize = 256;

/// Collapse edges in every primitive until its triangle count drops to
/// `ratio` of the original (0 < ratio <= 1). `ratio >= 1.0` is a no-op.
pub fn run(
    mut doc: Document,
    ratio: f32,
    progress: &mut ProgressScope<'_, '_>,
    cancel: &CancelToken,
) -> Result<Document> {
    if ratio >= 1.0 {
        progress.emit("ratio 1.0, keeping all triangles", 100);
        return Ok(doc);
    }
    let ratio = f64::from(ratio.max(f32::EPSILON));

    let total: u64 = doc.triangle_count();
    let mut done: u64 = 0;
    for mesh in &mut doc.meshes {
        for prim in &mut mesh.primitives {
            if !prim.is_triangle_list() {
                continue;
            }
            let before = prim.triangle_count();
            simplify_primitive(prim, ratio, cancel)?;
            done += before;
            if total > 0 {
                progress.emit("collapsing edges", (done * 100 / total) as u8);
            }
        }
    }
    Ok(doc)
}

fn simplify_primitive(prim: &mut Primitive, ratio: f64, cancel: &CancelToken) -> Result<()> {
    let face_count = prim.indices.len() / 3;
    let target = ((face_count as f64) * ratio).ceil() as usize;
    if face_count <= target || face_count == 0 {
        return Ok(());
    }

    let mut mesh = WorkMesh::new(prim);
    mesh.collapse_until(target, cancel)?;
    mesh.write_back(prim);
    Ok(())
}

/// Symmetric 4x4 quadric, upper triangle only.
#[derive(Debug, Clone, Copy, Default)]
struct Quadric {
    m: [f64; 10],
}

impl Quadric {
    /// Quadric of the plane `n . x + d = 0`, scaled by `weight`.
    fn from_plane(n: DVec3, d: f64, weight: f64) -> Self {
        let v = [n.x, n.y, n.z, d];
        let mut m = [0.0; 10];
        let mut k = 0;
        for i in 0..4 {
            for j in i..4 {
                m[k] = v[i] * v[j] * weight;
                k += 1;
            }
        }
        Self { m }
    }

    fn add(&mut self, other: &Quadric) {
        for (a, b) in self.m.iter_mut().zip(other.m.iter()) {
            *a += b;
        }
    }

    /// Evaluate `p^T Q p` for `p = (x, y, z, 1)`.
    fn error(&self, p: DVec3) -> f64 {
        let [a11, a12, a13, a14, a22, a23, a24, a33, a34, a44] = self.m;
        a11 * p.x * p.x
            + 2.0 * a12 * p.x * p.y
            + 2.0 * a13 * p.x * p.z
            + 2.0 * a14 * p.x
            + a22 * p.y * p.y
            + 2.0 * a23 * p.y * p.z
            + 2.0 * a24 * p.y
            + a33 * p.z * p.z
            + 2.0 * a34 * p.z
            + a44
    }
}

/// A candidate half-edge collapse `from -> to`. Versions detect staleness.
struct Candidate {
    cost: f64,
    from: u32,
    to: u32,
    from_version: u32,
    to_version: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}
impl Eq for Candidate {}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Candidate {
    // Min-heap on cost.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
    }
}

struct WorkMesh {
    positions: Vec<DVec3>,
    quadrics: Vec<Quadric>,
    /// Per-vertex incident face list; stale entries are filtered on read.
    vertex_faces: Vec<Vec<usize>>,
    faces: Vec<[u32; 3]>,
    face_alive: Vec<bool>,
    live_faces: usize,
    boundary: Vec<bool>,
    version: Vec<u32>,
    heap: BinaryHeap<Candidate>,
}

impl WorkMesh {
    fn new(prim: &Primitive) -> Self {
        let positions: Vec<DVec3> = prim
            .positions
            .iter()
            .map(|p| DVec3::new(p[0] as f64, p[1] as f64, p[2] as f64))
            .collect();
        let faces: Vec<[u32; 3]> = prim
            .indices
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect();

        let mut quadrics = vec![Quadric::default(); positions.len()];
        let mut vertex_faces = vec![Vec::new(); positions.len()];
        let mut edge_faces: HashMap<(u32, u32), u32> = HashMap::new();
        for (fi, face) in faces.iter().enumerate() {
            let [a, b, c] = *face;
            let (pa, pb, pc) = (positions[a as usize], positions[b as usize], positions[c as usize]);
            let cross = (pb - pa).cross(pc - pa);
            let double_area = cross.length();
            if double_area > 1e-30 {
                let n = cross / double_area;
                let q = Quadric::from_plane(n, -n.dot(pa), double_area * 0.5);
                for v in *face {
                    quadrics[v as usize].add(&q);
                }
            }
            for v in *face {
                vertex_faces[v as usize].push(fi);
            }
            for (u, v) in [(a, b), (b, c), (c, a)] {
                let key = (u.min(v), u.max(v));
                *edge_faces.entry(key).or_insert(0) += 1;
            }
        }

        let mut boundary = vec![false; positions.len()];
        for ((u, v), uses) in &edge_faces {
            if *uses == 1 {
                boundary[*u as usize] = true;
                boundary[*v as usize] = true;
            }
        }

        let live_faces = faces.len();
        let face_alive = vec![true; faces.len()];
        let version = vec![0u32; positions.len()];
        let mut mesh = Self {
            positions,
            quadrics,
            vertex_faces,
            faces,
            face_alive,
            live_faces,
            boundary,
            version,
            heap: BinaryHeap::new(),
        };
        for key in edge_faces.keys() {
            mesh.push_candidates(key.0, key.1);
        }
        mesh
    }

    fn push_candidates(&mut self, a: u32, b: u32) {
        for (from, to) in [(a, b), (b, a)] {
            // Boundary vertices stay put.
            if self.boundary[from as usize] {
                continue;
            }
            let mut q = self.quadrics[from as usize];
            q.add(&self.quadrics[to as usize]);
            let cost = q.error(self.positions[to as usize]);
            self.heap.push(Candidate {
                cost,
                from,
                to,
                from_version: self.version[from as usize],
                to_version: self.version[to as usize],
            });
        }
    }

    fn collapse_until(&mut self, target: usize, cancel: &CancelToken) -> Result<()> {
        let mut steps = 0usize;
        while self.live_faces > target {
            let cand = match self.heap.pop() {
                Some(c) => c,
                None => break,
            };
            steps += 1;
            if steps % CANCEL_CHECK_INTERVAL == 0 {
                cancel.check()?;
            }
            if cand.from_version != self.version[cand.from as usize]
                || cand.to_version != self.version[cand.to as usize]
            {
                continue;
            }
            if !self.edge_exists(cand.from, cand.to) {
                continue;
            }
            self.collapse(cand.from, cand.to);
        }
        Ok(())
    }

    fn edge_exists(&self, a: u32, b: u32) -> bool {
        self.vertex_faces[a as usize].iter().any(|&fi| {
            self.face_alive[fi] && self.faces[fi].contains(&a) && self.faces[fi].contains(&b)
        })
    }

    /// Collapse `from` onto `to`: rewrite incident faces, kill the ones
    /// spanning the edge, merge quadrics, refresh surrounding candidates.
    fn collapse(&mut self, from: u32, to: u32) {
        let incident = std::mem::take(&mut self.vertex_faces[from as usize]);
        for &fi in &incident {
            if !self.face_alive[fi] {
                continue;
            }
            if self.faces[fi].contains(&to) {
                self.face_alive[fi] = false;
                self.live_faces -= 1;
                continue;
            }
            for slot in self.faces[fi].iter_mut() {
                if *slot == from {
                    *slot = to;
                }
            }
            self.vertex_faces[to as usize].push(fi);
        }

        let from_q = self.quadrics[from as usize];
        self.quadrics[to as usize].add(&from_q);
        self.version[from as usize] += 1;
        self.version[to as usize] += 1;

        // Re-seed candidates on the ring around the surviving vertex.
        let mut ring: HashSet<u32> = HashSet::new();
        for &fi in &self.vertex_faces[to as usize] {
            if self.face_alive[fi] {
                for v in self.faces[fi] {
                    if v != to {
                        ring.insert(v);
                    }
                }
            }
        }
        for v in ring {
            self.push_candidates(to, v);
        }
    }

    /// Compact surviving vertices and write the streams back.
    fn write_back(&self, prim: &mut Primitive) {
        let mut remap: Vec<Option<u32>> = vec![None; self.positions.len()];
        let mut positions = Vec::new();
        let mut normals = prim.normals.as_ref().map(|_| Vec::new());
        let mut uvs = prim.uvs.as_ref().map(|_| Vec::new());
        let mut indices = Vec::with_capacity(self.live_faces * 3);

        for (fi, face) in self.faces.iter().enumerate() {
            if !self.face_alive[fi] {
                continue;
            }
            for &v in face {
                let new = match remap[v as usize] {
                    Some(n) => n,
                    None => {
                        let n = positions.len() as u32;
                        positions.push(prim.positions[v as usize]);
                        if let (Some(out), Some(src)) = (normals.as_mut(), prim.normals.as_ref()) {
                            out.push(src[v as usize]);
                        }
                        if let (Some(out), Some(src)) = (uvs.as_mut(), prim.uvs.as_ref()) {
                            out.push(src[v as usize]);
                        }
                        remap[v as usize] = Some(n);
                        n
                    }
                };
                indices.push(new);
            }
        }

        prim.positions = positions;
        prim.normals = normals;
        prim.uvs = uvs;
        prim.indices = indices;
    }
}
