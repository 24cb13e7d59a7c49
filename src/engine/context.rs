// Session-scoped holder of the current navigation mesh and its walkable surface.
//
// Consumers never look this up ambiently: the session hands a `NavSnapshot`
// to the crowd (and to debug overlays) explicitly every tick.

use super::mesh::WalkableMesh;
use super::navmesh::NavigationMesh;

/// Read-only view of one installed navmesh generation.
#[derive(Debug, Clone, Copy)]
pub struct NavSnapshot<'a> {
    pub navmesh:  &'a NavigationMesh,
    pub walkable: &'a WalkableMesh,
    /// Bumped on every install; a crowd built for one revision refuses others.
    pub revision: u64,
}

#[derive(Debug, Default)]
pub struct NavigationContext {
    /// Navmesh and walkable surface are created and dropped together.
    current:  Option<(NavigationMesh, WalkableMesh)>,
    revision: u64,
}

impl NavigationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.current.is_some()
    }

    /// Revision of the installed navmesh; 0 before the first install.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn navmesh(&self) -> Option<&NavigationMesh> {
        self.current.as_ref().map(|(n, _)| n)
    }

    pub fn walkable_mesh(&self) -> Option<&WalkableMesh> {
        self.current.as_ref().map(|(_, w)| w)
    }

    pub fn snapshot(&self) -> Option<NavSnapshot<'_>> {
        self.current.as_ref().map(|(navmesh, walkable)| NavSnapshot {
            navmesh,
            walkable,
            revision: self.revision,
        })
    }

    /// Replace the navmesh in one step, deriving its walkable surface.
    /// The previous pair is dropped before this returns.
    pub(crate) fn install(&mut self, navmesh: NavigationMesh) -> u64 {
        let walkable = navmesh.walkable_surface();
        self.revision += 1;
        log::debug!(
            "navigation context rev {}: {} walkable triangles",
            self.revision,
            walkable.triangle_count()
        );
        self.current = Some((navmesh, walkable));
        self.revision
    }

    /// Release the navmesh and walkable surface.
    pub(crate) fn clear(&mut self) {
        if self.current.take().is_some() {
            log::debug!("navigation context cleared at rev {}", self.revision);
        }
    }
}
