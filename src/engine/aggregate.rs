// Fragment aggregation: many locally-posed scan patches → one world-space mesh.
//
// Each tick:
//   1. resolve_poses() — one pose per live fragment for this sample; on
//      tracking loss the fragment keeps its last known transform.
//   2. aggregate()     — transform and concatenate every fragment that has a
//      transform, offsetting indices by the running vertex count.
//
// The transform map is owned here and nowhere else. aggregate() itself is a
// pure function of (fragments, transforms) and always starts from empty.

use glam::Mat4;
use rustc_hash::{FxHashMap, FxHashSet};

use super::error::NavError;
use super::mesh::CombinedMesh;
use super::pose::PoseResolver;
use super::sensing::{FragmentId, SampleToken, SensedFragment, SpatialSensor};

pub type TransformMap = FxHashMap<FragmentId, Mat4>;

/// Result of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub mesh: CombinedMesh,
    /// (id, revision) of every fragment that contributed, in output order.
    pub included: Vec<(FragmentId, u64)>,
    /// Fragments left out, with the reason.
    pub skipped: Vec<NavError>,
}

/// Transform and concatenate `fragments` in slice order.
pub fn aggregate(fragments: &[SensedFragment], transforms: &TransformMap) -> CombinedMesh {
    aggregate_with_report(fragments, transforms).mesh
}

/// Like `aggregate`, also reporting which fragments went in and which did not.
pub fn aggregate_with_report(fragments: &[SensedFragment], transforms: &TransformMap) -> Aggregation {
    let mut out = Aggregation::default();
    let vertex_total: usize = fragments.iter().map(|f| f.vertices.len()).sum();
    let index_total: usize = fragments.iter().map(|f| f.indices.len()).sum();
    out.mesh.positions.reserve(vertex_total * 3);
    out.mesh.indices.reserve(index_total);

    for fragment in fragments {
        let Some(transform) = transforms.get(&fragment.id) else {
            out.skipped.push(NavError::PoseUnavailable(fragment.id));
            continue;
        };
        if let Err(reason) = fragment.validate() {
            out.skipped.push(NavError::InvalidFragment { id: fragment.id, reason });
            continue;
        }

        let offset = out.mesh.vertex_count() as u32;
        for &v in &fragment.vertices {
            out.mesh.push_position(transform.transform_point3(v));
        }
        out.mesh.indices.extend(fragment.indices.iter().map(|&i| i + offset));
        out.included.push((fragment.id, fragment.revision));
    }
    out
}

/// Owns the last-known transform of every live fragment.
#[derive(Debug, Default)]
pub struct FragmentAggregator {
    transforms: TransformMap,
}

impl FragmentAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transforms(&self) -> &TransformMap {
        &self.transforms
    }

    pub fn transform(&self, id: FragmentId) -> Option<Mat4> {
        self.transforms.get(&id).copied()
    }

    /// Resolve every live fragment's pose for `sample`.
    ///
    /// Returns one `PoseUnavailable` per fragment that failed; those keep their
    /// previous transform (if they ever had one). Transforms of fragments that
    /// left the live set are dropped.
    pub fn resolve_poses<S: SpatialSensor>(
        &mut self,
        sensor: &S,
        resolver: &PoseResolver,
        sample: SampleToken,
    ) -> Vec<NavError> {
        let mut failures = Vec::new();
        let live: FxHashSet<FragmentId> = sensor.fragments().iter().map(|f| f.id).collect();
        self.transforms.retain(|id, _| live.contains(id));

        for fragment in sensor.fragments() {
            match resolver.resolve(sensor, fragment.id, fragment.space, sample) {
                Ok(m) => {
                    self.transforms.insert(fragment.id, m);
                }
                Err(e) => {
                    if self.transforms.contains_key(&fragment.id) {
                        log::debug!("{}: keeping last known transform", fragment.id);
                    }
                    failures.push(e);
                }
            }
        }
        failures
    }

    /// Aggregate the given live set against the owned transform map.
    pub fn aggregate(&self, fragments: &[SensedFragment]) -> Aggregation {
        aggregate_with_report(fragments, &self.transforms)
    }

    pub fn clear(&mut self) {
        self.transforms.clear();
    }
}
