// ORCA — Optimal Reciprocal Collision Avoidance between crowd agents.
//
// Based on: van den Berg, Guy, Lin, Manocha — "Reciprocal n-Body Collision
// Avoidance" (2011). The linear programme follows the RVO2 reference
// implementation (Apache 2.0).
//
// Agents move on the XZ plane; everything here is 2D (x, z).

use glam::Vec2;

const EPSILON: f32 = 1e-5;

// ============================================================================
// SPATIAL HASH
// ============================================================================

/// Uniform grid bucketing agent indices for neighbour lookup.
/// Cleared and refilled every step before ORCA runs.
pub struct SpatialHash {
    buckets: Vec<Vec<usize>>,
    bucket_size: f32,
    cols: u32,
    rows: u32,
    min: Vec2,
}

impl SpatialHash {
    /// Covers `[min, max]` on XZ with square buckets of `bucket_size`.
    pub fn new(min: Vec2, max: Vec2, bucket_size: f32) -> Self {
        let span = (max - min).max(Vec2::ZERO);
        let cols = (span.x / bucket_size).ceil() as u32 + 2;
        let rows = (span.y / bucket_size).ceil() as u32 + 2;
        Self {
            buckets: vec![Vec::new(); (cols * rows) as usize],
            bucket_size,
            cols,
            rows,
            min,
        }
    }

    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(Vec::clear);
    }

    fn bucket(&self, pos: Vec2) -> Option<(i64, i64)> {
        let b = ((pos - self.min) / self.bucket_size).floor();
        let (bx, by) = (b.x as i64, b.y as i64);
        (bx >= 0 && by >= 0 && bx < self.cols as i64 && by < self.rows as i64).then_some((bx, by))
    }

    pub fn insert(&mut self, pos: Vec2, idx: usize) {
        if let Some((bx, by)) = self.bucket(pos) {
            self.buckets[(by * self.cols as i64 + bx) as usize].push(idx);
        }
    }

    /// Every index stored in buckets within `radius` of `pos`, deduplicated.
    /// A superset: callers distance-filter.
    pub fn query(&self, pos: Vec2, radius: f32) -> Vec<usize> {
        let mut out = Vec::new();
        let Some((bx, by)) = self.bucket(pos) else { return out };
        let reach = (radius / self.bucket_size).ceil() as i64 + 1;
        for y in (by - reach).max(0)..=(by + reach).min(self.rows as i64 - 1) {
            for x in (bx - reach).max(0)..=(bx + reach).min(self.cols as i64 - 1) {
                out.extend_from_slice(&self.buckets[(y * self.cols as i64 + x) as usize]);
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}

// ============================================================================
// AGENT SNAPSHOT
// ============================================================================

/// Read-only per-agent data collected from the crowd world before ORCA runs.
#[derive(Debug, Clone, Copy)]
pub struct AgentSnapshot {
    /// XZ position.
    pub pos: Vec2,
    /// XZ velocity from the previous step.
    pub vel: Vec2,
    /// Velocity the agent would take with nobody around.
    pub desired_vel: Vec2,
    pub radius: f32,
    pub max_speed: f32,
}

/// Tuning shared by every agent in one step.
#[derive(Debug, Clone, Copy)]
pub struct AvoidanceParams {
    /// Look-ahead window in seconds.
    pub time_horizon: f32,
    /// 1 / step duration; only used when agents already overlap.
    pub inv_dt: f32,
    pub max_neighbors: usize,
    /// Spatial-hash search radius. Must cover two of the largest agents
    /// closing head-on at full speed for `time_horizon`.
    pub neighbor_dist: f32,
}

impl AvoidanceParams {
    /// Search radius for agents no larger or faster than `radius`/`max_speed`.
    pub fn neighbor_dist_for(radius: f32, max_speed: f32, time_horizon: f32) -> f32 {
        2.0 * (radius + max_speed * time_horizon)
    }
}

// ============================================================================
// HALF-PLANES
// ============================================================================

/// Velocity-space constraint: admissible velocities lie left of the directed
/// line through `point` along `dir`.
#[derive(Clone, Copy, Debug)]
struct HalfPlane {
    point: Vec2,
    dir: Vec2,
}

impl HalfPlane {
    /// Positive when `v` is on the forbidden side.
    #[inline]
    fn violation(&self, v: Vec2) -> f32 {
        self.dir.perp_dot(self.point - v)
    }

    /// Constraint agent `a` must respect so it and `b` stay apart for
    /// `time_horizon`, taking `share` of the needed velocity change.
    /// `tie` breaks the symmetry of exactly coincident agents; the two sides of
    /// a pair must pass opposite values.
    fn between(a: &AgentSnapshot, b: &AgentSnapshot, share: f32, tie: Vec2, p: &AvoidanceParams) -> Self {
        let rel_pos = b.pos - a.pos;
        // Neighbours are assumed to follow their desired velocity.
        let rel_vel = a.vel - b.desired_vel;
        let dist_sq = rel_pos.length_squared();
        let r = a.radius + b.radius;
        let r_sq = r * r;

        let (dir, u) = if dist_sq > r_sq {
            let w = rel_vel - rel_pos / p.time_horizon;
            let w_sq = w.length_squared();
            let w_dot = w.dot(rel_pos);
            if w_dot < 0.0 && w_dot * w_dot > r_sq * w_sq {
                // Nearest boundary is the cut-off circle.
                let w_len = w_sq.sqrt();
                let unit_w = if w_len > EPSILON { w / w_len } else { tie };
                (-unit_w.perp(), (r / p.time_horizon - w_len) * unit_w)
            } else {
                // Nearest boundary is one of the cone legs.
                let leg = (dist_sq - r_sq).max(0.0).sqrt();
                let dir = if rel_pos.perp_dot(w) > 0.0 {
                    Vec2::new(rel_pos.x * leg - rel_pos.y * r, rel_pos.x * r + rel_pos.y * leg) / dist_sq
                } else {
                    -Vec2::new(rel_pos.x * leg + rel_pos.y * r, -rel_pos.x * r + rel_pos.y * leg) / dist_sq
                };
                (dir, rel_vel.dot(dir) * dir - rel_vel)
            }
        } else if dist_sq <= EPSILON * EPSILON {
            // Same point: no direction to separate along, so push along `tie`
            // whatever the velocities are.
            (-tie.perp(), r * p.inv_dt * tie)
        } else {
            // Already overlapping: resolve within one step.
            let w = rel_vel - rel_pos * p.inv_dt;
            let w_len = w.length();
            let unit_w = if w_len > EPSILON { w / w_len } else { -rel_pos.normalize() };
            (-unit_w.perp(), (r * p.inv_dt - w_len) * unit_w)
        };

        HalfPlane { point: a.vel + share * u, dir }
    }
}

// ============================================================================
// LINEAR PROGRAMME
// ============================================================================

/// Optimise along constraint `k` given constraints `0..k` hold.
/// `toward_dir`: maximise along `target` instead of minimising distance to it.
fn solve_on_line(planes: &[HalfPlane], k: usize, max_speed: f32, target: Vec2, toward_dir: bool) -> Option<Vec2> {
    let line = planes[k];
    let along = line.point.dot(line.dir);
    let disc = along * along + max_speed * max_speed - line.point.length_squared();
    if disc < 0.0 {
        return None;
    }
    let root = disc.sqrt();
    let (mut lo, mut hi) = (-along - root, -along + root);

    for other in &planes[..k] {
        let denom = line.dir.perp_dot(other.dir);
        let numer = other.dir.perp_dot(line.point - other.point);
        if denom.abs() <= EPSILON {
            if numer < 0.0 {
                return None;
            }
            continue;
        }
        let t = numer / denom;
        if denom < 0.0 {
            hi = hi.min(t);
        } else {
            lo = lo.max(t);
        }
        if lo > hi {
            return None;
        }
    }

    let t = if toward_dir {
        if line.dir.dot(target) > 0.0 { hi } else { lo }
    } else {
        line.dir.dot(target - line.point).clamp(lo, hi)
    };
    Some(line.point + t * line.dir)
}

/// Closest admissible velocity to `target` within `max_speed`.
/// Returns the velocity and the index of the first unsatisfiable constraint
/// (`planes.len()` when all hold).
fn solve_2d(planes: &[HalfPlane], max_speed: f32, target: Vec2, toward_dir: bool, start: Vec2) -> (Vec2, usize) {
    let mut v = if toward_dir {
        target.normalize_or_zero() * max_speed
    } else {
        start.clamp_length_max(max_speed)
    };
    for (k, plane) in planes.iter().enumerate() {
        if plane.violation(v) > 0.0 {
            match solve_on_line(planes, k, max_speed, target, toward_dir) {
                Some(next) => v = next,
                None => return (v, k),
            }
        }
    }
    (v, planes.len())
}

/// Infeasible case: minimise the worst violation from `first_failed` on.
fn solve_fallback(planes: &[HalfPlane], first_failed: usize, max_speed: f32, mut v: Vec2) -> Vec2 {
    let mut depth = 0.0f32;
    for k in first_failed..planes.len() {
        let line = planes[k];
        if line.violation(v) <= depth {
            continue;
        }
        let projected: Vec<HalfPlane> = planes[..k]
            .iter()
            .filter_map(|other| {
                let d = line.dir.perp_dot(other.dir);
                let point = if d.abs() <= EPSILON {
                    if line.dir.dot(other.dir) > 0.0 {
                        return None;
                    }
                    0.5 * (line.point + other.point)
                } else {
                    line.point + (other.dir.perp_dot(line.point - other.point) / d) * line.dir
                };
                Some(HalfPlane { point, dir: (other.dir - line.dir).normalize_or_zero() })
            })
            .collect();
        let (candidate, failed) = solve_2d(&projected, max_speed, line.dir.perp(), true, v);
        if failed == projected.len() {
            v = candidate;
        }
        depth = line.violation(v);
    }
    v
}

// ============================================================================
// PUBLIC API
// ============================================================================

/// ORCA-adjusted velocity for `agents[idx]`: within its max speed and as
/// close as the neighbours allow to its desired velocity. Every pair shares
/// avoidance equally.
pub fn avoidance_velocity(agents: &[AgentSnapshot], idx: usize, hash: &SpatialHash, p: &AvoidanceParams) -> Vec2 {
    let a = &agents[idx];
    let mut near: Vec<(f32, usize)> = hash
        .query(a.pos, p.neighbor_dist)
        .into_iter()
        .filter(|&j| j != idx)
        .filter_map(|j| {
            let b = &agents[j];
            // Anyone who could close the gap within the horizon, at both speeds.
            let reach = a.radius + b.radius + (a.max_speed + b.max_speed) * p.time_horizon;
            let d_sq = (b.pos - a.pos).length_squared();
            (d_sq <= reach * reach).then_some((d_sq, j))
        })
        .collect();
    near.sort_unstable_by(|x, y| x.0.total_cmp(&y.0));
    near.truncate(p.max_neighbors);

    let planes: Vec<HalfPlane> = near
        .iter()
        .map(|&(_, j)| {
            let tie = if idx < j { Vec2::X } else { Vec2::NEG_X };
            HalfPlane::between(a, &agents[j], 0.5, tie, p)
        })
        .collect();

    let (v, failed) = solve_2d(&planes, a.max_speed, a.desired_vel, false, a.desired_vel);
    if failed < planes.len() {
        solve_fallback(&planes, failed, a.max_speed, v)
    } else {
        v
    }
}
