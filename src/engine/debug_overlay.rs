// Debug overlay geometry, ready to upload to whatever renders it.
//
// Nothing here draws: it only turns navmesh cells, the combined scan mesh and
// agents into flat, colored vertex buffers.

use glam::{UVec2, Vec3};
use rustc_hash::FxHashSet;

use super::crowd::AgentView;
use super::mesh::CombinedMesh;
use super::navmesh::{CellClass, NavigationMesh};

/// Lift above the floor so overlays don't z-fight with the scan.
const OVERLAY_LIFT: f32 = 0.01;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OverlayVertex {
    pub position: [f32; 3],
    pub color:    [f32; 4],
}

impl OverlayVertex {
    fn new(p: Vec3, color: [f32; 4]) -> Self {
        Self { position: p.to_array(), color }
    }
}

/// Indexed triangle list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayMesh {
    pub vertices: Vec<OverlayVertex>,
    pub indices:  Vec<u32>,
}

impl OverlayMesh {
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Line list: vertices taken in pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayLines {
    pub vertices: Vec<OverlayVertex>,
}

impl OverlayLines {
    pub fn segment_count(&self) -> usize {
        self.vertices.len() / 2
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    fn push(&mut self, a: Vec3, b: Vec3, color: [f32; 4]) {
        self.vertices.push(OverlayVertex::new(a, color));
        self.vertices.push(OverlayVertex::new(b, color));
    }
}

pub fn class_color(class: CellClass) -> [f32; 4] {
    match class {
        CellClass::Empty      => [0.0, 0.0, 0.0, 0.0],
        CellClass::Steep      => [0.9, 0.6, 0.1, 0.5],
        CellClass::Obstructed => [0.9, 0.1, 0.1, 0.5],
        CellClass::Eroded     => [0.9, 0.9, 0.2, 0.4],
        CellClass::Walkable   => [0.1, 0.8, 0.9, 0.4],
    }
}

/// One colored quad per classified non-empty cell.
/// `None` when the navmesh was generated without the debug flag, or when its
/// classes don't cover the grid.
pub fn cell_overlay(navmesh: &NavigationMesh) -> Option<OverlayMesh> {
    let classes = navmesh.cell_classes()?;
    let g = navmesh.grid();
    if classes.len() != g.cell_count() || g.floor.len() != g.cell_count() {
        log::warn!("cell overlay skipped: {} classes for {} cells", classes.len(), g.cell_count());
        return None;
    }
    let mut out = OverlayMesh::default();

    for cz in 0..g.height {
        for cx in 0..g.width {
            let cell = UVec2::new(cx, cz);
            let class = classes[g.idx(cell)];
            if class == CellClass::Empty {
                continue;
            }
            let color = class_color(class);
            let y = g.floor_at(cell) + OVERLAY_LIFT;
            let x0 = g.origin.x + cx as f32 * g.cell_size;
            let z0 = g.origin.y + cz as f32 * g.cell_size;
            let (x1, z1) = (x0 + g.cell_size, z0 + g.cell_size);

            let base = out.vertices.len() as u32;
            for p in [Vec3::new(x0, y, z0), Vec3::new(x1, y, z0), Vec3::new(x1, y, z1), Vec3::new(x0, y, z1)] {
                out.vertices.push(OverlayVertex::new(p, color));
            }
            out.indices.extend_from_slice(&[base, base + 2, base + 1, base, base + 3, base + 2]);
        }
    }
    Some(out)
}

/// Every distinct edge of the combined scan mesh.
pub fn mesh_wireframe(mesh: &CombinedMesh, color: [f32; 4]) -> OverlayLines {
    let mut seen: FxHashSet<(u32, u32)> = FxHashSet::default();
    let mut out = OverlayLines::default();
    for tri in mesh.indices.chunks_exact(3) {
        for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            if seen.insert((a.min(b), a.max(b))) {
                out.push(mesh.position(a as usize), mesh.position(b as usize), color);
            }
        }
    }
    out
}

/// A vertical stick per agent (feet to head) plus its velocity.
pub fn agent_markers(agents: &[AgentView]) -> OverlayLines {
    const BODY: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
    const HEADING: [f32; 4] = [0.2, 1.0, 0.2, 1.0];
    let mut out = OverlayLines::default();
    for a in agents {
        out.push(a.position, a.position + Vec3::Y * a.height, BODY);
        if a.velocity != Vec3::ZERO {
            let lifted = a.position + Vec3::Y * OVERLAY_LIFT;
            out.push(lifted, lifted + a.velocity, HEADING);
        }
    }
    out
}
