// Navmesh generation from the combined scan mesh.
//
//   CombinedMesh + GenerationConfig → GeometryService::generate() → NavigationMesh
//
// The geometry service is a black box behind a trait. RasterGeometryService is
// the built-in one: it rasterizes the scan tile by tile into a height grid of
// floor cells (one floor per column), rejects cells without head clearance and
// erodes the walkable area by the agent radius. The result is a
// NavigationGrid that the crowd path-finds over.
//
// NavmeshBuilder gates generation behind a content fingerprint so an
// unchanged scan never reaches the service twice.

use std::hash::{Hash, Hasher};

use glam::{UVec2, Vec2, Vec3, Vec3Swizzles};
use rustc_hash::FxHasher;

use super::config::GenerationConfig;
use super::error::{NavError, NavResult};
use super::mesh::{CombinedMesh, WalkableMesh};
use super::navigation::{NavigationGrid, all_neighbors};
use super::sensing::FragmentId;

/// Grids larger than this are refused rather than allocated.
pub const DEFAULT_MAX_CELLS: usize = 4_000_000;

/// Barycentric slack so cell centres on a shared edge land in a triangle.
const INSIDE_EPSILON: f32 = 1e-5;

// ============================================================================
// GEOMETRY SERVICE
// ============================================================================

/// Black-box navmesh generator.
///
/// Implementations must be deterministic for identical inputs. `debug`
/// requests per-cell classification for overlays.
pub trait GeometryService {
    fn generate(
        &mut self,
        positions: &[f32],
        indices: &[u32],
        config: &GenerationConfig,
        debug: bool,
    ) -> NavResult<NavigationMesh>;
}

// ============================================================================
// NAVIGATION MESH
// ============================================================================

/// Why a cell is or isn't walkable. Only recorded when generation ran with
/// the debug flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellClass {
    /// No geometry over this column.
    Empty,
    /// Geometry present but none of it flat enough to stand on.
    Steep,
    /// Floor present but something intrudes into head clearance.
    Obstructed,
    /// Floor was clear but too close to an edge for the agent radius.
    Eroded,
    Walkable,
}

/// Per-tile rasterization summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSummary {
    pub tile: UVec2,
    pub triangles: usize,
    pub walkable_cells: usize,
}

/// Walkable-surface representation produced by a GeometryService.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationMesh {
    grid: NavigationGrid,
    tiles: Vec<TileSummary>,
    classes: Option<Vec<CellClass>>,
    source: Option<MeshFingerprint>,
}

impl NavigationMesh {
    /// Unchecked constructor for geometry services. `classes`, when present,
    /// must hold one entry per grid cell; `validate` checks this and
    /// NavmeshBuilder refuses any navmesh that fails it.
    pub fn from_grid(grid: NavigationGrid, tiles: Vec<TileSummary>, classes: Option<Vec<CellClass>>) -> Self {
        Self { grid, tiles, classes, source: None }
    }

    /// Structural checks a navmesh must pass before a crowd can use it:
    /// non-empty grid, per-cell buffers sized to the grid, at least one
    /// walkable cell.
    pub fn validate(&self) -> NavResult<()> {
        let g = &self.grid;
        let cells = g.cell_count();
        if cells == 0 {
            return Err(NavError::BuildFailed(format!("empty {}x{} grid", g.width, g.height)));
        }
        if g.walkable.len() != cells || g.floor.len() != cells {
            return Err(NavError::BuildFailed(format!(
                "grid buffers ({} walkable, {} floor) do not match {} cells",
                g.walkable.len(),
                g.floor.len(),
                cells
            )));
        }
        if !(g.cell_size > 0.0 && g.cell_size.is_finite()) {
            return Err(NavError::BuildFailed(format!("invalid cell size {}", g.cell_size)));
        }
        let class_count = self.classes.as_ref().map_or(cells, Vec::len);
        if class_count != cells {
            return Err(NavError::BuildFailed(format!("{} cell classes for {} cells", class_count, cells)));
        }
        if g.walkable_count() == 0 {
            return Err(NavError::BuildFailed("no walkable cells".into()));
        }
        Ok(())
    }

    pub fn grid(&self) -> &NavigationGrid {
        &self.grid
    }

    pub fn tiles(&self) -> &[TileSummary] {
        &self.tiles
    }

    pub fn cell_classes(&self) -> Option<&[CellClass]> {
        self.classes.as_deref()
    }

    /// Fingerprint of the combined mesh this navmesh was generated from.
    pub fn source(&self) -> Option<MeshFingerprint> {
        self.source
    }

    /// Two triangles per walkable cell, at the cell's floor height, wound so
    /// normals face +Y.
    pub fn walkable_surface(&self) -> WalkableMesh {
        let g = &self.grid;
        let mut mesh = WalkableMesh::default();
        for cz in 0..g.height {
            for cx in 0..g.width {
                let cell = UVec2::new(cx, cz);
                if !g.is_walkable(cell) {
                    continue;
                }
                let y = g.floor_at(cell);
                let x0 = g.origin.x + cx as f32 * g.cell_size;
                let z0 = g.origin.y + cz as f32 * g.cell_size;
                let (x1, z1) = (x0 + g.cell_size, z0 + g.cell_size);
                let base = mesh.positions.len() as u32;
                mesh.positions.extend_from_slice(&[[x0, y, z0], [x1, y, z0], [x1, y, z1], [x0, y, z1]]);
                mesh.indices.extend_from_slice(&[base, base + 2, base + 1, base, base + 3, base + 2]);
            }
        }
        mesh
    }
}

// ============================================================================
// RASTER GEOMETRY SERVICE
// ============================================================================

/// Vertical extent of geometry over one cell column.
#[derive(Debug, Clone, Copy)]
struct Span {
    min_y: f32,
    max_y: f32,
    walkable: bool,
}

/// One input triangle with its precomputed footprint.
struct RasterTri {
    v: [Vec3; 3],
    walkable: bool,
    /// Inclusive cell range covered by the XZ bounding box.
    cells_min: UVec2,
    cells_max: UVec2,
}

/// Built-in geometry service: tile-by-tile height-grid rasterization.
pub struct RasterGeometryService {
    pub max_cells: usize,
}

impl Default for RasterGeometryService {
    fn default() -> Self {
        Self { max_cells: DEFAULT_MAX_CELLS }
    }
}

impl GeometryService for RasterGeometryService {
    fn generate(
        &mut self,
        positions: &[f32],
        indices: &[u32],
        config: &GenerationConfig,
        debug: bool,
    ) -> NavResult<NavigationMesh> {
        if indices.len() < 3 {
            return Err(NavError::BuildFailed("no triangles".into()));
        }
        let vertex_count = (positions.len() / 3) as u32;
        if indices.len() % 3 != 0 || indices.iter().any(|&i| i >= vertex_count) {
            return Err(NavError::BuildFailed("malformed index buffer".into()));
        }
        let vertex = |i: u32| Vec3::from_slice(&positions[i as usize * 3..i as usize * 3 + 3]);

        let (mut lo, mut hi) = (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY));
        for &i in indices {
            let p = vertex(i);
            lo = lo.min(p);
            hi = hi.max(p);
        }
        if !lo.is_finite() || !hi.is_finite() {
            return Err(NavError::BuildFailed("non-finite vertex".into()));
        }

        let cs = config.cell_size;
        let width = (((hi.x - lo.x) / cs).ceil() as u32).max(1);
        let height = (((hi.z - lo.z) / cs).ceil() as u32).max(1);
        if width as u64 * height as u64 > self.max_cells as u64 {
            return Err(NavError::BuildFailed(format!("grid {}x{} exceeds cell cap", width, height)));
        }
        let origin = Vec2::new(lo.x, lo.z);
        let mut grid = NavigationGrid::new_blocked(width, height, origin, cs, config.max_climb());

        let min_normal_y = config.walkable_slope_degrees.to_radians().cos();
        let tris: Vec<RasterTri> = indices
            .chunks_exact(3)
            .map(|t| {
                let v = [vertex(t[0]), vertex(t[1]), vertex(t[2])];
                let n = (v[1] - v[0]).cross(v[2] - v[0]);
                let walkable = n.try_normalize().is_some_and(|n| n.y >= min_normal_y);
                let tlo = v[0].min(v[1]).min(v[2]);
                let thi = v[0].max(v[1]).max(v[2]);
                RasterTri {
                    v,
                    walkable,
                    cells_min: grid.world_to_cell_clamped(tlo),
                    cells_max: grid.world_to_cell_clamped(thi),
                }
            })
            .collect();

        // --- Rasterize, one tile at a time -----------------------------------
        let ts = config.tile_size;
        let tiles_x = width.div_ceil(ts);
        let tiles_z = height.div_ceil(ts);
        let mut columns: Vec<Vec<Span>> = vec![Vec::new(); (width * height) as usize];
        let mut tiles = Vec::with_capacity((tiles_x * tiles_z) as usize);

        for tz in 0..tiles_z {
            for tx in 0..tiles_x {
                let tmin = UVec2::new(tx * ts, tz * ts);
                let tmax = UVec2::new(((tx + 1) * ts).min(width) - 1, ((tz + 1) * ts).min(height) - 1);
                let mut touched = 0;
                for tri in &tris {
                    let cmin = tri.cells_min.max(tmin);
                    let cmax = tri.cells_max.min(tmax);
                    if cmin.x > cmax.x || cmin.y > cmax.y {
                        continue;
                    }
                    touched += 1;
                    rasterize(&grid, tri, cmin, cmax, &mut columns);
                }
                tiles.push(TileSummary { tile: UVec2::new(tx, tz), triangles: touched, walkable_cells: 0 });
            }
        }

        // --- Pick a floor per column ------------------------------------------
        let mut classes = vec![CellClass::Empty; columns.len()];
        for (i, spans) in columns.iter().enumerate() {
            classes[i] = match pick_floor(spans, config) {
                FloorPick::Floor(y) => {
                    grid.walkable[i] = true;
                    grid.floor[i] = (y / config.cell_height).round() * config.cell_height;
                    CellClass::Walkable
                }
                FloorPick::None(class) => class,
            };
        }

        // --- Erode by agent radius -------------------------------------------
        let edge_distance = edge_distances(&grid);
        for (i, d) in edge_distance.iter().enumerate() {
            if grid.walkable[i] && *d <= config.walkable_radius {
                grid.walkable[i] = false;
                classes[i] = CellClass::Eroded;
            }
        }

        let walkable_cells = grid.walkable_count();
        if walkable_cells == 0 {
            return Err(NavError::BuildFailed("no walkable area after erosion".into()));
        }
        for tile in &mut tiles {
            tile.walkable_cells = count_tile(&grid, tile.tile, ts);
        }

        log::debug!(
            "rasterized {} triangles into {}x{} cells ({} tiles), {} walkable",
            tris.len(),
            width,
            height,
            tiles.len(),
            walkable_cells
        );

        Ok(NavigationMesh::from_grid(grid, tiles, debug.then_some(classes)))
    }
}

fn rasterize(grid: &NavigationGrid, tri: &RasterTri, cmin: UVec2, cmax: UVec2, columns: &mut [Vec<Span>]) {
    let [a, b, c] = tri.v;
    let (ymin, ymax) = (a.y.min(b.y).min(c.y), a.y.max(b.y).max(c.y));
    let half = grid.cell_size * 0.5;
    for cz in cmin.y..=cmax.y {
        for cx in cmin.x..=cmax.x {
            let cell = UVec2::new(cx, cz);
            let center = Vec2::new(
                grid.origin.x + (cx as f32 + 0.5) * grid.cell_size,
                grid.origin.y + (cz as f32 + 0.5) * grid.cell_size,
            );
            let span = if tri.walkable {
                // Floors sample the surface height exactly under the cell centre.
                let Some(y) = height_at(a, b, c, center) else { continue };
                Span { min_y: y, max_y: y, walkable: true }
            } else {
                // Obstacles block any cell they touch, over their full height.
                if !overlaps_square(a, b, c, center, half) {
                    continue;
                }
                Span { min_y: ymin, max_y: ymax, walkable: false }
            };
            columns[grid.idx(cell)].push(span);
        }
    }
}

/// Interpolated Y of the triangle at XZ point `p`, if `p` is inside its
/// XZ projection.
fn height_at(a: Vec3, b: Vec3, c: Vec3, p: Vec2) -> Option<f32> {
    let (a2, b2, c2) = (a.xz(), b.xz(), c.xz());
    let v0 = b2 - a2;
    let v1 = c2 - a2;
    let v2 = p - a2;
    let den = v0.perp_dot(v1);
    if den.abs() < f32::EPSILON {
        return None;
    }
    let v = v2.perp_dot(v1) / den;
    let w = v0.perp_dot(v2) / den;
    let u = 1.0 - v - w;
    if u < -INSIDE_EPSILON || v < -INSIDE_EPSILON || w < -INSIDE_EPSILON {
        return None;
    }
    Some(u * a.y + v * b.y + w * c.y)
}

/// Separating-axis test of a (possibly degenerate) XZ triangle against an
/// axis-aligned square. Vertical walls project to segments and still hit.
fn overlaps_square(a: Vec3, b: Vec3, c: Vec3, center: Vec2, half: f32) -> bool {
    let pts = [a.xz() - center, b.xz() - center, c.xz() - center];
    let tri_min = pts[0].min(pts[1]).min(pts[2]);
    let tri_max = pts[0].max(pts[1]).max(pts[2]);
    if tri_min.x > half || tri_max.x < -half || tri_min.y > half || tri_max.y < -half {
        return false;
    }
    for i in 0..3 {
        let edge = pts[(i + 1) % 3] - pts[i];
        if edge.length_squared() < f32::EPSILON {
            continue;
        }
        let axis = edge.perp();
        let r = half * (axis.x.abs() + axis.y.abs());
        let proj = pts.map(|p| p.dot(axis));
        let (pmin, pmax) = (proj[0].min(proj[1]).min(proj[2]), proj[0].max(proj[1]).max(proj[2]));
        if pmin > r || pmax < -r {
            return false;
        }
    }
    true
}

enum FloorPick {
    Floor(f32),
    None(CellClass),
}

/// Lowest walkable span with nothing intruding into its head clearance.
fn pick_floor(spans: &[Span], config: &GenerationConfig) -> FloorPick {
    if spans.is_empty() {
        return FloorPick::None(CellClass::Empty);
    }
    let mut floors: Vec<f32> = spans.iter().filter(|s| s.walkable).map(|s| s.min_y).collect();
    if floors.is_empty() {
        return FloorPick::None(CellClass::Steep);
    }
    floors.sort_by(f32::total_cmp);

    let step = config.cell_height;
    let clearance = config.clearance();
    for y in floors {
        let blocked = spans.iter().any(|s| s.max_y > y + step && s.min_y < y + clearance);
        if !blocked {
            return FloorPick::Floor(y);
        }
    }
    FloorPick::None(CellClass::Obstructed)
}

/// Distance (8-connected steps) from each walkable cell to the nearest edge.
/// Cells touching the grid border, a blocked cell or an unclimbable step are
/// at distance 1. Unwalkable cells read `u32::MAX`.
fn edge_distances(grid: &NavigationGrid) -> Vec<u32> {
    let mut dist = vec![u32::MAX; grid.walkable.len()];
    let mut queue = std::collections::VecDeque::new();

    for cz in 0..grid.height {
        for cx in 0..grid.width {
            let cell = UVec2::new(cx, cz);
            if !grid.is_walkable(cell) {
                continue;
            }
            let on_border = cx == 0 || cz == 0 || cx + 1 == grid.width || cz + 1 == grid.height;
            let at_edge = on_border || all_neighbors(cell, grid.width, grid.height).any(|nb| !grid.can_step(cell, nb));
            if at_edge {
                dist[grid.idx(cell)] = 1;
                queue.push_back(cell);
            }
        }
    }

    while let Some(cell) = queue.pop_front() {
        let d = dist[grid.idx(cell)];
        for nb in all_neighbors(cell, grid.width, grid.height) {
            let ni = grid.idx(nb);
            if dist[ni] == u32::MAX && grid.can_step(cell, nb) {
                dist[ni] = d + 1;
                queue.push_back(nb);
            }
        }
    }
    dist
}

fn count_tile(grid: &NavigationGrid, tile: UVec2, ts: u32) -> usize {
    let x_end = ((tile.x + 1) * ts).min(grid.width);
    let z_end = ((tile.y + 1) * ts).min(grid.height);
    (tile.y * ts..z_end)
        .flat_map(|cz| (tile.x * ts..x_end).map(move |cx| UVec2::new(cx, cz)))
        .filter(|&c| grid.is_walkable(c))
        .count()
}

// ============================================================================
// CHANGE DETECTION
// ============================================================================

/// Content fingerprint of one generation input.
///
/// Covers every world-space position bit pattern, the index buffer, each
/// contributing fragment's revision, the generation config and the debug flag,
/// so a moved fragment, an edited fragment or a config change all read as
/// "changed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshFingerprint {
    pub fragment_count: usize,
    pub content: u64,
}

impl MeshFingerprint {
    pub fn compute(
        mesh: &CombinedMesh,
        revisions: &[(FragmentId, u64)],
        config: &GenerationConfig,
        debug: bool,
    ) -> Self {
        let mut h = FxHasher::default();
        mesh.positions.len().hash(&mut h);
        for p in &mesh.positions {
            p.to_bits().hash(&mut h);
        }
        mesh.indices.hash(&mut h);
        revisions.hash(&mut h);
        config.fingerprint_words().hash(&mut h);
        debug.hash(&mut h);
        Self { fragment_count: revisions.len(), content: h.finish() }
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// What a gated rebuild attempt did.
#[derive(Debug)]
pub enum BuildOutcome {
    /// Input identical to the last attempt; the service was not called.
    Unchanged,
    /// Nothing to build yet.
    Empty,
    Built(NavigationMesh),
    Failed(NavError),
}

/// Drives a GeometryService and remembers what it last attempted.
pub struct NavmeshBuilder<S: GeometryService> {
    service: S,
    last_attempt: Option<MeshFingerprint>,
    attempts: u64,
}

impl<S: GeometryService> NavmeshBuilder<S> {
    pub fn new(service: S) -> Self {
        Self { service, last_attempt: None, attempts: 0 }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Number of times the geometry service has been invoked.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn last_attempt(&self) -> Option<MeshFingerprint> {
        self.last_attempt
    }

    pub fn needs_rebuild(&self, fingerprint: MeshFingerprint) -> bool {
        self.last_attempt != Some(fingerprint)
    }

    /// Forget the last attempt so the next `rebuild_if_changed` runs.
    pub fn invalidate(&mut self) {
        self.last_attempt = None;
    }

    /// Ungated generation: validate, hand the buffers to the service, then
    /// check what it returned.
    pub fn build(&mut self, mesh: &CombinedMesh, config: &GenerationConfig, debug: bool) -> NavResult<NavigationMesh> {
        config.validate()?;
        if mesh.is_empty() {
            return Err(NavError::EmptyInput);
        }
        self.attempts += 1;
        let nav = self.service.generate(&mesh.positions, &mesh.indices, config, debug)?;
        nav.validate()?;
        Ok(nav)
    }

    /// Generate only when `fingerprint` differs from the last attempt.
    /// Failed attempts count: a rejected input is not retried until it changes.
    pub fn rebuild_if_changed(
        &mut self,
        mesh: &CombinedMesh,
        fingerprint: MeshFingerprint,
        config: &GenerationConfig,
        debug: bool,
    ) -> BuildOutcome {
        if mesh.is_empty() {
            return BuildOutcome::Empty;
        }
        if !self.needs_rebuild(fingerprint) {
            return BuildOutcome::Unchanged;
        }
        self.last_attempt = Some(fingerprint);
        match self.build(mesh, config, debug) {
            Ok(mut nav) => {
                nav.source = Some(fingerprint);
                log::info!(
                    "navmesh rebuilt: {} fragments, {} triangles, {} walkable cells",
                    fingerprint.fragment_count,
                    mesh.triangle_count(),
                    nav.grid().walkable_count()
                );
                BuildOutcome::Built(nav)
            }
            Err(NavError::EmptyInput) => BuildOutcome::Empty,
            Err(e) => {
                log::warn!("navmesh rebuild rejected: {}", e);
                BuildOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GenerationConfig {
        GenerationConfig {
            cell_size: 0.1,
            cell_height: 0.05,
            tile_size: 8,
            walkable_height: 20,
            walkable_radius: 1,
            walkable_climb: 2,
            walkable_slope_degrees: 45.0,
        }
    }

    /// Axis-aligned quad at height `y`, wound so the normal faces +Y.
    fn push_floor(mesh: &mut CombinedMesh, x0: f32, z0: f32, x1: f32, z1: f32, y: f32) {
        let a = mesh.push_position(Vec3::new(x0, y, z0));
        let b = mesh.push_position(Vec3::new(x1, y, z0));
        let c = mesh.push_position(Vec3::new(x1, y, z1));
        let d = mesh.push_position(Vec3::new(x0, y, z1));
        mesh.indices.extend_from_slice(&[a, c, b, a, d, c]);
    }

    /// Vertical wall along X at `z`, from y0 to y1.
    fn push_wall(mesh: &mut CombinedMesh, x0: f32, x1: f32, z: f32, y0: f32, y1: f32) {
        let a = mesh.push_position(Vec3::new(x0, y0, z));
        let b = mesh.push_position(Vec3::new(x1, y0, z));
        let c = mesh.push_position(Vec3::new(x1, y1, z));
        let d = mesh.push_position(Vec3::new(x0, y1, z));
        mesh.indices.extend_from_slice(&[a, b, c, a, c, d]);
    }

    fn generate(mesh: &CombinedMesh, debug: bool) -> NavResult<NavigationMesh> {
        RasterGeometryService::default().generate(&mesh.positions, &mesh.indices, &config(), debug)
    }

    #[test]
    fn flat_floor_erodes_one_cell_ring() {
        let mut mesh = CombinedMesh::new();
        push_floor(&mut mesh, 0.0, 0.0, 2.0, 2.0, 0.0);
        let nav = generate(&mesh, false).unwrap();
        let grid = nav.grid();
        assert_eq!((grid.width, grid.height), (20, 20));
        // 20x20 floor minus the border ring.
        assert_eq!(grid.walkable_count(), 18 * 18);
        assert!(!grid.is_walkable(UVec2::new(0, 5)));
        assert!(grid.is_walkable(UVec2::new(1, 5)));
        assert_eq!(nav.tiles().len(), 9);
        let total: usize = nav.tiles().iter().map(|t| t.walkable_cells).sum();
        assert_eq!(total, 18 * 18);
    }

    #[test]
    fn wall_blocks_and_erodes_neighbours() {
        let mut mesh = CombinedMesh::new();
        push_floor(&mut mesh, 0.0, 0.0, 2.0, 2.0, 0.0);
        push_wall(&mut mesh, 0.0, 2.0, 1.02, 0.0, 2.0);
        let nav = generate(&mesh, true).unwrap();
        let grid = nav.grid();
        let classes = nav.cell_classes().unwrap();
        // The wall runs through row 10 (z in [1.0, 1.1)).
        let wall_cell = UVec2::new(5, 10);
        assert!(!grid.is_walkable(wall_cell));
        assert_eq!(classes[grid.idx(wall_cell)], CellClass::Obstructed);
        for z in [9, 11] {
            assert_eq!(classes[grid.idx(UVec2::new(5, z))], CellClass::Eroded);
        }
        assert!(grid.is_walkable(UVec2::new(5, 8)));
        assert!(grid.is_walkable(UVec2::new(5, 12)));
    }

    #[test]
    fn low_table_blocks_floor_and_becomes_floor() {
        let mut mesh = CombinedMesh::new();
        push_floor(&mut mesh, 0.0, 0.0, 3.0, 3.0, 0.0);
        push_floor(&mut mesh, 1.0, 1.0, 2.0, 2.0, 0.5);
        let nav = generate(&mesh, true).unwrap();
        let grid = nav.grid();
        let centre = UVec2::new(15, 15);
        assert!(grid.is_walkable(centre));
        assert!((grid.floor_at(centre) - 0.5).abs() < 1e-5);
        // Table edge is an unclimbable step, so its rim erodes away.
        assert!(!grid.is_walkable(UVec2::new(10, 15)));
        assert!(grid.is_walkable(UVec2::new(5, 5)));
        assert!(grid.floor_at(UVec2::new(5, 5)).abs() < 1e-5);
    }

    #[test]
    fn degenerate_input_fails() {
        let mut mesh = CombinedMesh::new();
        assert!(generate(&mesh, false).is_err());

        // A lone wall has nothing to stand on.
        push_wall(&mut mesh, 0.0, 2.0, 0.0, 0.0, 2.0);
        let err = generate(&mesh, false).unwrap_err();
        assert_eq!(err.kind(), "build_failed");

        // A sliver of floor narrower than the erosion radius.
        let mut mesh = CombinedMesh::new();
        push_floor(&mut mesh, 0.0, 0.0, 0.2, 2.0, 0.0);
        assert!(generate(&mesh, false).is_err());
    }

    #[test]
    fn downward_facing_surface_is_not_floor() {
        let mut mesh = CombinedMesh::new();
        push_floor(&mut mesh, 0.0, 0.0, 2.0, 2.0, 0.0);
        let flipped: Vec<u32> = mesh.indices.chunks(3).flat_map(|t| [t[0], t[2], t[1]]).collect();
        mesh.indices = flipped;
        assert!(generate(&mesh, false).is_err());
    }

    #[test]
    fn walkable_surface_matches_grid() {
        let mut mesh = CombinedMesh::new();
        push_floor(&mut mesh, 0.0, 0.0, 1.0, 1.0, 0.25);
        let nav = generate(&mesh, false).unwrap();
        let surface = nav.walkable_surface();
        assert_eq!(surface.triangle_count(), nav.grid().walkable_count() * 2);
        let hit = surface.raycast(Vec3::new(0.53, 2.0, 0.47), Vec3::NEG_Y, 10.0).unwrap();
        assert!((hit.point.y - 0.25).abs() < 1e-5);
    }

    #[test]
    fn builder_gates_on_fingerprint() {
        let mut mesh = CombinedMesh::new();
        push_floor(&mut mesh, 0.0, 0.0, 2.0, 2.0, 0.0);
        let revisions = [(FragmentId(1), 0)];
        let fp = MeshFingerprint::compute(&mesh, &revisions, &config(), false);

        let mut builder = NavmeshBuilder::new(RasterGeometryService::default());
        assert!(matches!(builder.rebuild_if_changed(&mesh, fp, &config(), false), BuildOutcome::Built(_)));
        assert!(matches!(builder.rebuild_if_changed(&mesh, fp, &config(), false), BuildOutcome::Unchanged));
        assert_eq!(builder.attempts(), 1);

        mesh.positions[1] += 0.01;
        let moved = MeshFingerprint::compute(&mesh, &revisions, &config(), false);
        assert_ne!(fp, moved);
        assert!(matches!(builder.rebuild_if_changed(&mesh, moved, &config(), false), BuildOutcome::Built(_)));
        assert_eq!(builder.attempts(), 2);

        let mut taller = config();
        taller.walkable_height = 30;
        assert_ne!(moved, MeshFingerprint::compute(&mesh, &revisions, &taller, false));
        assert_ne!(moved, MeshFingerprint::compute(&mesh, &revisions, &config(), true));
    }

    /// Hands back a fixed navmesh whatever the input.
    struct FixedService(NavigationMesh);

    impl GeometryService for FixedService {
        fn generate(&mut self, _: &[f32], _: &[u32], _: &GenerationConfig, _: bool) -> NavResult<NavigationMesh> {
            Ok(self.0.clone())
        }
    }

    fn open_grid(w: u32, h: u32) -> NavigationGrid {
        let mut grid = NavigationGrid::new_blocked(w, h, Vec2::ZERO, 0.1, 0.1);
        grid.walkable.fill(true);
        grid
    }

    #[test]
    fn malformed_service_output_is_rejected() {
        let mut mesh = CombinedMesh::new();
        push_floor(&mut mesh, 0.0, 0.0, 2.0, 2.0, 0.0);
        let bad = [
            NavigationMesh::from_grid(NavigationGrid::new_blocked(0, 0, Vec2::ZERO, 0.1, 0.1), Vec::new(), None),
            NavigationMesh::from_grid(NavigationGrid::new_blocked(4, 4, Vec2::ZERO, 0.1, 0.1), Vec::new(), None),
            NavigationMesh::from_grid(open_grid(4, 4), Vec::new(), Some(vec![CellClass::Walkable; 3])),
            {
                let mut grid = open_grid(4, 4);
                grid.floor.pop();
                NavigationMesh::from_grid(grid, Vec::new(), None)
            },
        ];
        for nav in bad {
            assert!(nav.validate().is_err());
            let mut builder = NavmeshBuilder::new(FixedService(nav));
            let fp = MeshFingerprint::compute(&mesh, &[(FragmentId(1), 0)], &config(), false);
            match builder.rebuild_if_changed(&mesh, fp, &config(), false) {
                BuildOutcome::Failed(e) => assert_eq!(e.kind(), "build_failed"),
                other => panic!("expected failure, got {:?}", other),
            }
            assert_eq!(builder.attempts(), 1);
        }

        let good = NavigationMesh::from_grid(open_grid(4, 4), Vec::new(), Some(vec![CellClass::Walkable; 16]));
        assert!(good.validate().is_ok());
    }

    #[test]
    fn builder_reports_empty_without_calling_service() {
        let mut builder = NavmeshBuilder::new(RasterGeometryService::default());
        let mesh = CombinedMesh::new();
        let fp = MeshFingerprint::compute(&mesh, &[], &config(), false);
        assert!(matches!(builder.rebuild_if_changed(&mesh, fp, &config(), false), BuildOutcome::Empty));
        assert_eq!(builder.build(&mesh, &config(), false).unwrap_err(), NavError::EmptyInput);
        assert_eq!(builder.attempts(), 0);
    }
}
