// Grid navigation over the reconstructed floor.
//
// Layer 1: NavigationGrid — per-cell walkability and floor height, produced by
//          the geometry service from the combined scan mesh.
// Layer 2: FlowField — BFS integration field + gradient directions toward one
//          goal cell, shared by every agent heading there.
//
// Local avoidance between agents lives in orca.rs.

use std::collections::VecDeque;

use glam::{UVec2, Vec2, Vec3};

// ============================================================================
// NAVIGATION GRID
// ============================================================================

/// Walkable cells of a scanned room on the XZ plane.
///
/// Cell (cx, cz) covers `origin + [cx, cx+1) * cell_size` on X and the same on
/// Z. Each walkable cell carries the height of the floor it represents.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationGrid {
    /// True if agents can stand in this cell.
    pub walkable: Vec<bool>,
    /// Floor height per cell. Meaningless where `walkable` is false.
    pub floor: Vec<f32>,
    pub width: u32,
    pub height: u32,
    /// World XZ of the grid's minimum corner.
    pub origin: Vec2,
    pub cell_size: f32,
    /// Largest floor step two neighbouring cells may differ by and stay connected.
    pub max_climb: f32,
}

impl NavigationGrid {
    /// Grid with every cell blocked. The geometry service fills it in.
    pub fn new_blocked(width: u32, height: u32, origin: Vec2, cell_size: f32, max_climb: f32) -> Self {
        let n = (width * height) as usize;
        Self {
            walkable: vec![false; n],
            floor: vec![0.0; n],
            width,
            height,
            origin,
            cell_size,
            max_climb,
        }
    }

    /// Convert a world-space position (XZ plane) to the grid cell that contains it.
    /// Returns `None` if the position is outside the grid.
    pub fn world_to_cell(&self, pos: Vec3) -> Option<UVec2> {
        let x = (pos.x - self.origin.x) / self.cell_size;
        let z = (pos.z - self.origin.y) / self.cell_size;
        if !(x >= 0.0 && z >= 0.0) {
            return None;
        }
        let (cx, cz) = (x as u32, z as u32);
        if cx >= self.width || cz >= self.height {
            return None;
        }
        Some(UVec2::new(cx, cz))
    }

    /// Like `world_to_cell` but clamps to grid bounds instead of returning None.
    /// An empty grid clamps everything to (0, 0).
    pub fn world_to_cell_clamped(&self, pos: Vec3) -> UVec2 {
        let cx = ((pos.x - self.origin.x) / self.cell_size).max(0.0) as u32;
        let cz = ((pos.z - self.origin.y) / self.cell_size).max(0.0) as u32;
        UVec2::new(cx.min(self.width.saturating_sub(1)), cz.min(self.height.saturating_sub(1)))
    }

    /// Cell count implied by the dimensions.
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// World-space center of a grid cell, standing on its floor.
    pub fn cell_center(&self, cell: UVec2) -> Vec3 {
        Vec3::new(
            self.origin.x + (cell.x as f32 + 0.5) * self.cell_size,
            self.floor[self.idx(cell)],
            self.origin.y + (cell.y as f32 + 0.5) * self.cell_size,
        )
    }

    #[inline]
    pub fn idx(&self, cell: UVec2) -> usize {
        (cell.y * self.width + cell.x) as usize
    }

    pub fn is_walkable(&self, cell: UVec2) -> bool {
        self.walkable[self.idx(cell)]
    }

    pub fn floor_at(&self, cell: UVec2) -> f32 {
        self.floor[self.idx(cell)]
    }

    pub fn walkable_count(&self) -> usize {
        self.walkable.iter().filter(|&&w| w).count()
    }

    /// Both cells walkable and their floors within climbing range.
    pub fn can_step(&self, from: UVec2, to: UVec2) -> bool {
        self.is_walkable(from)
            && self.is_walkable(to)
            && (self.floor_at(from) - self.floor_at(to)).abs() <= self.max_climb
    }

    /// Closest walkable cell to `cell` (in ring distance), searching at most
    /// `max_rings` rings out. `cell` itself counts as ring 0.
    pub fn nearest_walkable(&self, cell: UVec2, max_rings: u32) -> Option<UVec2> {
        if self.is_walkable(cell) {
            return Some(cell);
        }
        let (x, z) = (cell.x as i64, cell.y as i64);
        for r in 1..=max_rings as i64 {
            let mut best: Option<(i64, UVec2)> = None;
            for dz in -r..=r {
                for dx in -r..=r {
                    if dx.abs() != r && dz.abs() != r {
                        continue;
                    }
                    let (nx, nz) = (x + dx, z + dz);
                    if nx < 0 || nz < 0 || nx >= self.width as i64 || nz >= self.height as i64 {
                        continue;
                    }
                    let nb = UVec2::new(nx as u32, nz as u32);
                    let d = dx * dx + dz * dz;
                    if self.is_walkable(nb) && best.is_none_or(|(bd, _)| d < bd) {
                        best = Some((d, nb));
                    }
                }
            }
            if let Some((_, nb)) = best {
                return Some(nb);
            }
        }
        None
    }
}

// ============================================================================
// FLOW FIELD
// ============================================================================

/// Pre-computed per-cell movement directions toward a single goal.
///
/// Built once per goal cell. Every agent reads from this to get its desired
/// heading, making the per-agent query cost O(1).
#[derive(Debug, Clone)]
pub struct FlowField {
    /// Normalized XZ direction each cell should move in to reach the goal.
    /// Vec2::ZERO means "at goal" or "unreachable".
    pub directions: Vec<Vec2>,

    /// BFS distance to goal in grid steps. `u32::MAX` = unreachable.
    pub integration: Vec<u32>,

    pub width: u32,
    pub height: u32,
    pub goal_cell: UVec2,
}

impl FlowField {
    /// Sample the flow direction for a given grid cell.
    #[inline]
    pub fn sample_cell(&self, cell: UVec2) -> Vec2 {
        let idx = (cell.y * self.width + cell.x) as usize;
        self.directions.get(idx).copied().unwrap_or(Vec2::ZERO)
    }

    /// True if the cell is the goal or within 1 step of it.
    #[inline]
    pub fn near_goal(&self, cell: UVec2) -> bool {
        self.cost(cell) <= 1
    }

    #[inline]
    pub fn cost(&self, cell: UVec2) -> u32 {
        let idx = (cell.y * self.width + cell.x) as usize;
        self.integration.get(idx).copied().unwrap_or(u32::MAX)
    }

    pub fn reachable(&self, cell: UVec2) -> bool {
        self.cost(cell) != u32::MAX
    }
}

// ============================================================================
// FLOWFIELD COMPUTATION
// ============================================================================

/// Compute a flowfield toward `goal_cell`.
///
/// 1. BFS (4-connected, climb-aware) from the goal outward, building an
///    integration field.
/// 2. Gradient pass: each cell points at its lowest-cost 8-connected neighbour.
///    Diagonals are only taken when both orthogonal cells are passable, so
///    agents never cut a wall corner.
///
/// An unwalkable goal yields an all-unreachable field; callers snap goals with
/// `NavigationGrid::nearest_walkable` first.
pub fn compute_flowfield(grid: &NavigationGrid, goal_cell: UVec2) -> FlowField {
    let size = (grid.width * grid.height) as usize;
    let mut integration = vec![u32::MAX; size];
    let mut queue = VecDeque::new();

    if grid.is_walkable(goal_cell) {
        integration[grid.idx(goal_cell)] = 0;
        queue.push_back(goal_cell);
    }

    while let Some(pos) = queue.pop_front() {
        let pos_cost = integration[grid.idx(pos)];
        for nb in cardinal_neighbors(pos, grid.width, grid.height) {
            let ni = grid.idx(nb);
            if integration[ni] == u32::MAX && grid.can_step(pos, nb) {
                integration[ni] = pos_cost + 1;
                queue.push_back(nb);
            }
        }
    }

    let mut directions = vec![Vec2::ZERO; size];
    for cz in 0..grid.height {
        for cx in 0..grid.width {
            let pos = UVec2::new(cx, cz);
            let cost = integration[grid.idx(pos)];
            if cost == u32::MAX || cost == 0 {
                continue;
            }

            let mut best_cost = cost;
            let mut best_dir = Vec2::ZERO;
            for nb in all_neighbors(pos, grid.width, grid.height) {
                let nb_cost = integration[grid.idx(nb)];
                if nb_cost >= best_cost || !grid.can_step(pos, nb) {
                    continue;
                }
                let is_diagonal = nb.x != cx && nb.y != cz;
                if is_diagonal {
                    let side_a = UVec2::new(nb.x, cz);
                    let side_b = UVec2::new(cx, nb.y);
                    if !grid.can_step(pos, side_a) || !grid.can_step(pos, side_b) {
                        continue;
                    }
                }
                best_cost = nb_cost;
                best_dir = Vec2::new(nb.x as f32 - cx as f32, nb.y as f32 - cz as f32).normalize();
            }
            directions[grid.idx(pos)] = best_dir;
        }
    }

    FlowField {
        directions,
        integration,
        width: grid.width,
        height: grid.height,
        goal_cell,
    }
}

// ============================================================================
// NEIGHBOR ITERATORS
// ============================================================================

/// The four cardinal (N/S/E/W) grid neighbors of a cell, clamped to bounds.
pub fn cardinal_neighbors(pos: UVec2, w: u32, h: u32) -> impl Iterator<Item = UVec2> {
    let (x, z) = (pos.x as i64, pos.y as i64);
    [(x - 1, z), (x + 1, z), (x, z - 1), (x, z + 1)]
        .into_iter()
        .filter(move |&(nx, nz)| nx >= 0 && nz >= 0 && nx < w as i64 && nz < h as i64)
        .map(|(nx, nz)| UVec2::new(nx as u32, nz as u32))
}

/// All eight (cardinal + diagonal) neighbors, clamped to bounds.
pub fn all_neighbors(pos: UVec2, w: u32, h: u32) -> impl Iterator<Item = UVec2> {
    let (x, z) = (pos.x as i64, pos.y as i64);
    [
        (-1, -1), (0, -1), (1, -1),
        (-1,  0),          (1,  0),
        (-1,  1), (0,  1), (1,  1),
    ]
    .into_iter()
    .map(move |(dx, dz)| (x + dx, z + dz))
    .filter(move |&(nx, nz)| nx >= 0 && nz >= 0 && nx < w as i64 && nz < h as i64)
    .map(|(nx, nz)| UVec2::new(nx as u32, nz as u32))
}
