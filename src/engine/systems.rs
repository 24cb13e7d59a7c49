// Per-tick crowd systems.
// Each operates on the crowd's World directly and runs in the order the crowd
// calls them: retarget/teleport -> steering -> movement.

use bevy_ecs::prelude::*;
use glam::{Vec2, Vec3, Vec3Swizzles};

use super::components::*;
use super::navigation::{FlowField, NavigationGrid};

/// Steps never move an agent further than this fraction of a cell.
const MAX_STEP_CELLS: f32 = 0.5;

/// Point every agent at `target`. Agents teleported last tick resume seeking.
pub fn retarget_system(world: &mut World, target: Option<Vec3>) {
    let mut query = world.query::<&mut AgentState>();
    for mut state in query.iter_mut(world) {
        *state = match target {
            Some(t) => AgentState::Seeking(t),
            None => AgentState::Idle,
        };
    }
}

/// Relocate every agent to `target` without path-finding.
pub fn teleport_system(world: &mut World, target: Vec3) {
    let mut query = world.query::<(&mut Transform, &mut Velocity, &mut AgentState)>();
    for (mut transform, mut velocity, mut state) in query.iter_mut(world) {
        transform.position = target;
        velocity.linear = Vec3::ZERO;
        *state = AgentState::Teleporting(target);
    }
}

/// Velocity an agent would take toward `target` with nobody around.
///
/// Follows the flowfield while it has a route; close to the goal (or when the
/// agent's cell has no route) it heads straight for the target and slows down
/// inside twice the arrival radius.
pub fn desired_velocity(
    grid: &NavigationGrid,
    flow: Option<&FlowField>,
    position: Vec3,
    target: Vec3,
    max_speed: f32,
    arrival_radius: f32,
) -> Vec2 {
    let to_target = target.xz() - position.xz();
    let dist = to_target.length();
    if dist <= arrival_radius {
        return Vec2::ZERO;
    }

    let cell = grid.world_to_cell_clamped(position);
    if let Some(flow) = flow {
        if flow.reachable(cell) && !flow.near_goal(cell) {
            let dir = flow.sample_cell(cell);
            if dir != Vec2::ZERO {
                return dir * max_speed;
            }
        }
    }

    let speed = max_speed * (dist / (2.0 * arrival_radius).max(1e-3)).min(1.0);
    to_target / dist * speed
}

/// Integrate velocities over `dt`, keeping agents on walkable, climbable cells.
/// Teleporting agents hold position.
pub fn movement_system(world: &mut World, grid: &NavigationGrid, dt: f32) {
    if dt <= 0.0 {
        return;
    }
    let mut query = world.query::<(&mut Transform, &mut Velocity, &AgentState)>();
    for (mut transform, mut velocity, state) in query.iter_mut(world) {
        if matches!(state, AgentState::Teleporting(_)) {
            continue;
        }
        let (position, blocked) = integrate(grid, transform.position, velocity.linear.xz(), dt);
        transform.position = position;
        if blocked {
            velocity.linear = Vec3::ZERO;
        }
    }
}

/// Move `position` by `vel * dt` in sub-steps of at most half a cell.
///
/// A step that would leave the walkable area (or climb too far) retries along
/// each axis alone; if neither works the agent stops. Returns the new position
/// and whether movement was cut short.
pub fn integrate(grid: &NavigationGrid, mut position: Vec3, vel: Vec2, dt: f32) -> (Vec3, bool) {
    let travel = vel * dt;
    let max_step = grid.cell_size * MAX_STEP_CELLS;
    let steps = (travel.length() / max_step).ceil().max(1.0) as u32;
    let step = travel / steps as f32;

    for _ in 0..steps {
        let from = grid.world_to_cell_clamped(position);
        let candidates = [step, Vec2::new(step.x, 0.0), Vec2::new(0.0, step.y)];
        let accepted = candidates.into_iter().filter(|d| *d != Vec2::ZERO).find_map(|d| {
            let next = Vec3::new(position.x + d.x, position.y, position.z + d.y);
            let to = grid.world_to_cell(next)?;
            // Stranded on an unwalkable cell: anything on the grid is an escape.
            let ok = to == from || !grid.is_walkable(from) || grid.can_step(from, to);
            ok.then_some((next, to))
        });
        match accepted {
            Some((next, cell)) => {
                position = next;
                if grid.is_walkable(cell) {
                    position.y = grid.floor_at(cell);
                }
            }
            None => return (position, true),
        }
    }
    (position, false)
}
