// ECS components for crowd agents.
// Agents live in a private bevy_ecs World owned by the crowd; nothing outside
// the crowd module mutates them.

use bevy_ecs::prelude::*;
use glam::Vec3;

/// World-space position of an agent (feet, standing on the floor).
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Transform {
    pub position: Vec3,
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self { position }
    }
}

/// Velocity in world units per second. Only XZ is ever non-zero.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Velocity {
    pub linear: Vec3,
}

/// Physical constants of an agent, fixed at spawn.
///
/// `radius`    — collision radius used by local avoidance.
/// `height`    — standing height; informational for consumers.
/// `max_speed` — world units per second.
#[derive(Component, Debug, Clone, Copy)]
pub struct CrowdAgent {
    pub radius:    f32,
    pub height:    f32,
    pub max_speed: f32,
}

/// Per-agent behaviour state, advanced once per crowd tick.
#[derive(Component, Debug, Clone, Copy, PartialEq, Default)]
pub enum AgentState {
    /// No target known yet.
    #[default]
    Idle,
    /// Steering toward the contained point.
    Seeking(Vec3),
    /// Relocated to the contained point this tick; holds position until the next.
    Teleporting(Vec3),
}

impl AgentState {
    pub fn target(&self) -> Option<Vec3> {
        match *self {
            AgentState::Idle => None,
            AgentState::Seeking(t) | AgentState::Teleporting(t) => Some(t),
        }
    }
}
