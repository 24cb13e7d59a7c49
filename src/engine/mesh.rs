// Mesh buffers flowing through the pipeline.
//
//   SensedFragment[] → aggregate() → CombinedMesh → GeometryService → NavigationMesh
//                                                                   → WalkableMesh (raycast target, debug draw)

use glam::Vec3;

const RAY_EPSILON: f32 = 1e-7;

// ============================================================================
// COMBINED MESH
// ============================================================================

/// All live fragments concatenated in world space.
///
/// `positions` is flat xyz triples so it can be handed to the geometry service
/// and uploaded without conversion. Rebuilt from scratch on every aggregation
/// pass; never patched in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombinedMesh {
    pub positions: Vec<f32>,
    pub indices:   Vec<u32>,
}

impl CombinedMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn position(&self, i: usize) -> Vec3 {
        Vec3::from_slice(&self.positions[i * 3..i * 3 + 3])
    }

    /// Append one world-space vertex, returning its index.
    pub fn push_position(&mut self, p: Vec3) -> u32 {
        let idx = self.vertex_count() as u32;
        self.positions.extend_from_slice(&[p.x, p.y, p.z]);
        idx
    }

    /// Every index refers to an existing vertex and the list is whole triangles.
    pub fn indices_valid(&self) -> bool {
        let n = self.vertex_count() as u32;
        self.indices.len() % 3 == 0 && self.indices.iter().all(|&i| i < n)
    }

    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

// ============================================================================
// WALKABLE MESH
// ============================================================================

/// Result of a ray/mesh query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub point:    Vec3,
    pub distance: f32,
    pub triangle: usize,
}

/// Triangulated walkable surface extracted from a NavigationMesh.
/// Same lifetime as the NavigationMesh it came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalkableMesh {
    pub positions: Vec<[f32; 3]>,
    pub indices:   Vec<u32>,
}

impl WalkableMesh {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn triangle(&self, t: usize) -> [Vec3; 3] {
        let i = &self.indices[t * 3..t * 3 + 3];
        [
            Vec3::from_array(self.positions[i[0] as usize]),
            Vec3::from_array(self.positions[i[1] as usize]),
            Vec3::from_array(self.positions[i[2] as usize]),
        ]
    }

    /// Cast vertex slice to raw bytes for GPU buffer upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    /// Cast index slice to raw bytes for GPU buffer upload.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Nearest intersection along `dir` within `max_distance`.
    /// `dir` need not be normalized; distances are in world units.
    pub fn raycast(&self, origin: Vec3, dir: Vec3, max_distance: f32) -> Option<RayHit> {
        let dir = dir.try_normalize()?;
        let mut best: Option<RayHit> = None;
        for t in 0..self.triangle_count() {
            let [a, b, c] = self.triangle(t);
            let Some(dist) = ray_triangle(origin, dir, a, b, c) else { continue };
            if dist > max_distance {
                continue;
            }
            if best.is_none_or(|h| dist < h.distance) {
                best = Some(RayHit { point: origin + dir * dist, distance: dist, triangle: t });
            }
        }
        best
    }
}

/// Möller–Trumbore, double-sided. Returns the distance along the unit `dir`.
fn ray_triangle(origin: Vec3, dir: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    let e1 = b - a;
    let e2 = c - a;
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < RAY_EPSILON {
        return None;
    }
    let inv = 1.0 / det;
    let s = origin - a;
    let u = s.dot(p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv;
    (t >= 0.0).then_some(t)
}
