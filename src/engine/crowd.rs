// Crowd simulation over the current navigation mesh.
//
// Each tick:
//   1. project the observer straight down onto the walkable surface; a miss
//      keeps the previous target
//   2. every `teleport_interval_secs`, drop every agent onto the target;
//      otherwise point every agent at it
//   3. steer (flowfield + ORCA) and integrate over the elapsed time
//
// A crowd is bound to the context revision it was built for and must be
// dropped whenever the navmesh is replaced.

use bevy_ecs::prelude::*;
use glam::{Vec2, Vec3, Vec3Swizzles};

use super::components::*;
use super::config::CrowdConfig;
use super::context::NavSnapshot;
use super::error::{NavError, NavResult};
use super::navigation::{FlowField, NavigationGrid, compute_flowfield};
use super::orca::{AgentSnapshot, AvoidanceParams, SpatialHash, avoidance_velocity};
use super::systems::{desired_velocity, movement_system, retarget_system, teleport_system};

const MAX_NEIGHBORS: usize = 8;

/// Copy of one agent's state for consumers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentView {
    pub position:  Vec3,
    pub velocity:  Vec3,
    pub radius:    f32,
    pub height:    f32,
    pub max_speed: f32,
    pub state:     AgentState,
}

/// What one crowd update did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrowdTick {
    /// Target after this tick (retained from earlier ticks on a miss).
    pub target: Option<Vec3>,
    /// Whether this tick's downward ray hit the walkable surface.
    pub target_hit: bool,
    pub teleported: bool,
    /// Seconds simulated.
    pub dt: f32,
}

pub struct CrowdSimulator {
    world: World,
    /// Spawn order.
    agents: Vec<Entity>,
    config: CrowdConfig,
    revision: u64,
    target: Option<Vec3>,
    flow: Option<FlowField>,
    hash: SpatialHash,
    last_tick: f64,
    last_teleport: f64,
}

impl CrowdSimulator {
    /// Spawn `config.agent_count` agents at `target` (or the origin when no
    /// target has been found yet). `last_teleport` carries the teleport timer
    /// over from whatever crowd came before; a first crowd passes `now`.
    pub fn new(
        snapshot: &NavSnapshot<'_>,
        config: CrowdConfig,
        target: Option<Vec3>,
        now: f64,
        last_teleport: f64,
    ) -> Self {
        let grid = snapshot.navmesh.grid();
        let start = target.unwrap_or(Vec3::ZERO);
        let initial_state = target.map_or(AgentState::Idle, AgentState::Seeking);

        let mut world = World::new();
        let agents = (0..config.agent_count)
            .map(|_| {
                world
                    .spawn((
                        Transform::from_position(start),
                        Velocity::default(),
                        CrowdAgent {
                            radius: config.agent_radius,
                            height: config.agent_height,
                            max_speed: config.agent_max_speed,
                        },
                        initial_state,
                    ))
                    .id()
            })
            .collect();

        log::info!(
            "crowd created for navmesh rev {}: {} agents at {:?}",
            snapshot.revision,
            config.agent_count,
            start
        );

        Self {
            world,
            agents,
            config,
            revision: snapshot.revision,
            target,
            flow: None,
            hash: spatial_hash_for(grid, &config),
            last_tick: now,
            last_teleport,
        }
    }

    /// Context revision this crowd was built against.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn target(&self) -> Option<Vec3> {
        self.target
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Session time of the last teleport (or of the timer's start).
    pub fn last_teleport(&self) -> f64 {
        self.last_teleport
    }

    pub fn agents(&self) -> Vec<AgentView> {
        self.agents
            .iter()
            .filter_map(|&e| {
                let transform = self.world.get::<Transform>(e)?;
                let velocity = self.world.get::<Velocity>(e)?;
                let agent = self.world.get::<CrowdAgent>(e)?;
                let state = self.world.get::<AgentState>(e)?;
                Some(AgentView {
                    position: transform.position,
                    velocity: velocity.linear,
                    radius: agent.radius,
                    height: agent.height,
                    max_speed: agent.max_speed,
                    state: *state,
                })
            })
            .collect()
    }

    /// Advance one tick at session time `now` (seconds).
    ///
    /// Fails only when `snapshot` is not the navmesh this crowd was built for.
    pub fn update(&mut self, snapshot: &NavSnapshot<'_>, observer: Vec3, now: f64) -> NavResult<CrowdTick> {
        if snapshot.revision != self.revision {
            return Err(NavError::CrowdMismatch { crowd: self.revision, context: snapshot.revision });
        }

        let hit = snapshot.walkable.raycast(observer, Vec3::NEG_Y, self.config.target_ray_length);
        if let Some(hit) = hit {
            self.target = Some(hit.point);
        }

        let dt = (now - self.last_tick).max(0.0) as f32;
        self.last_tick = self.last_tick.max(now);

        let mut teleported = false;
        if now - self.last_teleport >= self.config.teleport_interval_secs {
            self.last_teleport = now;
            match self.target {
                Some(target) => {
                    teleport_system(&mut self.world, target);
                    teleported = true;
                    log::debug!("teleported {} agents to {:?}", self.agents.len(), target);
                }
                None => retarget_system(&mut self.world, None),
            }
        } else {
            retarget_system(&mut self.world, self.target);
        }

        if !teleported {
            let grid = snapshot.navmesh.grid();
            self.steer(grid, dt);
            movement_system(&mut self.world, grid, dt);
        }

        Ok(CrowdTick { target: self.target, target_hit: hit.is_some(), teleported, dt })
    }

    /// Set every agent's velocity: flowfield toward the target, then ORCA.
    fn steer(&mut self, grid: &NavigationGrid, dt: f32) {
        let Some(target) = self.target else {
            for &e in &self.agents {
                if let Some(mut velocity) = self.world.get_mut::<Velocity>(e) {
                    velocity.linear = Vec3::ZERO;
                }
            }
            return;
        };
        self.refresh_flowfield(grid, target);

        let snapshots: Vec<(Entity, AgentSnapshot)> = self
            .agents
            .iter()
            .filter_map(|&e| {
                let position = self.world.get::<Transform>(e)?.position;
                let velocity = self.world.get::<Velocity>(e)?.linear;
                let agent = self.world.get::<CrowdAgent>(e)?;
                let desired = desired_velocity(
                    grid,
                    self.flow.as_ref(),
                    position,
                    target,
                    agent.max_speed,
                    self.config.arrival_radius,
                );
                Some((
                    e,
                    AgentSnapshot {
                        pos: position.xz(),
                        vel: velocity.xz(),
                        desired_vel: desired,
                        radius: agent.radius,
                        max_speed: agent.max_speed,
                    },
                ))
            })
            .collect();

        self.hash.clear();
        for (i, (_, s)) in snapshots.iter().enumerate() {
            self.hash.insert(s.pos, i);
        }

        let agents: Vec<AgentSnapshot> = snapshots.iter().map(|(_, s)| *s).collect();
        let params = AvoidanceParams {
            time_horizon: self.config.avoidance_time_horizon,
            inv_dt: 1.0 / dt.max(0.01),
            max_neighbors: MAX_NEIGHBORS,
            neighbor_dist: AvoidanceParams::neighbor_dist_for(
                self.config.agent_radius,
                self.config.agent_max_speed,
                self.config.avoidance_time_horizon,
            ),
        };
        for (i, (e, _)) in snapshots.iter().enumerate() {
            let v: Vec2 = avoidance_velocity(&agents, i, &self.hash, &params);
            if let Some(mut velocity) = self.world.get_mut::<Velocity>(*e) {
                velocity.linear = Vec3::new(v.x, 0.0, v.y);
            }
        }
    }

    /// Recompute the flowfield only when the goal cell moves.
    fn refresh_flowfield(&mut self, grid: &NavigationGrid, target: Vec3) {
        let rings = grid.width.max(grid.height);
        let Some(goal) = grid.nearest_walkable(grid.world_to_cell_clamped(target), rings) else {
            self.flow = None;
            return;
        };
        if self.flow.as_ref().is_some_and(|f| f.goal_cell == goal) {
            return;
        }
        log::trace!("flowfield goal -> {:?}", goal);
        self.flow = Some(compute_flowfield(grid, goal));
    }
}

impl Drop for CrowdSimulator {
    fn drop(&mut self) {
        log::debug!("crowd for navmesh rev {} released", self.revision);
    }
}

fn spatial_hash_for(grid: &NavigationGrid, config: &CrowdConfig) -> SpatialHash {
    let min = grid.origin;
    let max = grid.origin + Vec2::new(grid.width as f32, grid.height as f32) * grid.cell_size;
    let bucket = (config.agent_radius * 4.0).max(grid.cell_size);
    SpatialHash::new(min, max, bucket)
}
