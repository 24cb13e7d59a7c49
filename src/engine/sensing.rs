// Sensing collaborator boundary.
//
// The device/session layer owns the scanned fragments and the tracking system.
// The pipeline only reads from it: once per tick for the live fragment set,
// and once per fragment per tick for poses.

use std::fmt;

use glam::{Mat4, Vec3};
use rustc_hash::FxHashMap;

// ============================================================================
// HANDLES
// ============================================================================

/// Stable identity of one physical surface patch for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId(pub u64);

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fragment#{}", self.0)
    }
}

/// Opaque reference frame owned by the platform (a fragment's local space or
/// the session's origin space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceHandle(pub u64);

/// Identifies one tracking sample. Poses are only valid for the token they
/// were requested with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleToken(pub u64);

// ============================================================================
// FRAGMENTS
// ============================================================================

/// One scanned surface patch in its own local space.
#[derive(Debug, Clone, PartialEq)]
pub struct SensedFragment {
    pub id: FragmentId,
    pub space: SpaceHandle,
    pub vertices: Vec<Vec3>,
    /// Triangle list into `vertices`.
    pub indices: Vec<u32>,
    /// Bumped by the sensor whenever vertex or index data changes.
    pub revision: u64,
}

impl SensedFragment {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Checks the index buffer against this fragment's own vertex count.
    pub fn validate(&self) -> Result<(), String> {
        if self.indices.len() % 3 != 0 {
            return Err(format!("index count {} is not a multiple of 3", self.indices.len()));
        }
        let n = self.vertices.len() as u32;
        if let Some(bad) = self.indices.iter().find(|&&i| i >= n) {
            return Err(format!("index {} out of range for {} vertices", bad, n));
        }
        Ok(())
    }
}

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

/// Platform pose query, e.g. an XR frame's `getPose(space, baseSpace)`.
pub trait PoseSource {
    /// Transform of `space` expressed in `relative_to` at `sample`, or `None`
    /// when tracking cannot report it.
    fn pose(&self, space: SpaceHandle, relative_to: SpaceHandle, sample: SampleToken) -> Option<Mat4>;
}

/// Supplies the live fragment set each tick.
pub trait SpatialSensor: PoseSource {
    /// Live fragments in insertion order.
    fn fragments(&self) -> &[SensedFragment];
}

// ============================================================================
// RECORDED SENSOR
// ============================================================================

/// In-memory sensor: a host replaying a capture pushes fragments and poses
/// into it; the pipeline reads it like a live device.
///
/// Poses are stored relative to the origin space, so `pose()` answers for any
/// `relative_to` that equals the registered origin and `None` otherwise.
#[derive(Debug, Clone)]
pub struct RecordedSensor {
    origin: SpaceHandle,
    fragments: Vec<SensedFragment>,
    poses: FxHashMap<SpaceHandle, Mat4>,
}

impl RecordedSensor {
    pub fn new(origin: SpaceHandle) -> Self {
        Self {
            origin,
            fragments: Vec::new(),
            poses: FxHashMap::default(),
        }
    }

    pub fn origin(&self) -> SpaceHandle {
        self.origin
    }

    /// Insert a new fragment at the end of the live set, or replace the
    /// fragment with the same id in place (keeping its position in the order).
    pub fn upsert(&mut self, fragment: SensedFragment) {
        match self.fragments.iter_mut().find(|f| f.id == fragment.id) {
            Some(slot) => *slot = fragment,
            None => self.fragments.push(fragment),
        }
    }

    pub fn remove(&mut self, id: FragmentId) -> Option<SensedFragment> {
        let pos = self.fragments.iter().position(|f| f.id == id)?;
        Some(self.fragments.remove(pos))
    }

    pub fn fragment_mut(&mut self, id: FragmentId) -> Option<&mut SensedFragment> {
        self.fragments.iter_mut().find(|f| f.id == id)
    }

    pub fn set_pose(&mut self, space: SpaceHandle, pose: Mat4) {
        self.poses.insert(space, pose);
    }

    /// Simulate tracking loss for one space.
    pub fn lose_pose(&mut self, space: SpaceHandle) {
        self.poses.remove(&space);
    }
}

impl PoseSource for RecordedSensor {
    fn pose(&self, space: SpaceHandle, relative_to: SpaceHandle, _sample: SampleToken) -> Option<Mat4> {
        if relative_to != self.origin {
            return None;
        }
        if space == self.origin {
            return Some(Mat4::IDENTITY);
        }
        self.poses.get(&space).copied()
    }
}

impl SpatialSensor for RecordedSensor {
    fn fragments(&self) -> &[SensedFragment] {
        &self.fragments
    }
}
