// roomwalk: rebuilds a walkable navmesh from live room scans and walks a small
// crowd across it toward the observer.

pub mod engine;

pub use engine::*;
