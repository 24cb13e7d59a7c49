// End-to-end pipeline properties: aggregation, rebuild gating, failure
// retention, teleport timing and target retention.

use std::cell::Cell;

use glam::{Mat4, Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use roomwalk::engine::aggregate::{TransformMap, aggregate};
use roomwalk::engine::navigation::NavigationGrid;
use roomwalk::engine::pose::PoseResolver;
use roomwalk::{
    FragmentId, GenerationConfig, GeometryService, NavError, NavResult, NavSession, NavigationMesh, PipelineConfig,
    RasterGeometryService, RebuildStatus, RecordedSensor, SampleToken, SensedFragment, SpaceHandle, SpatialSensor,
};

const ORIGIN: SpaceHandle = SpaceHandle(0);

// ============================================================================
// FIXTURES
// ============================================================================

/// Returns a fixed 4m x 4m open navmesh for any non-empty input, counts calls
/// and rejects everything while `fail` is set. While `hollow` is set it
/// "succeeds" with a 0x0 grid instead.
#[derive(Default)]
struct ScriptedService {
    calls: Cell<u32>,
    fail: Cell<bool>,
    hollow: Cell<bool>,
}

impl GeometryService for ScriptedService {
    fn generate(&mut self, positions: &[f32], indices: &[u32], _: &GenerationConfig, _: bool) -> NavResult<NavigationMesh> {
        self.calls.set(self.calls.get() + 1);
        if self.fail.get() {
            return Err(NavError::BuildFailed("scripted rejection".into()));
        }
        assert!(!positions.is_empty() && !indices.is_empty());
        if self.hollow.get() {
            let grid = NavigationGrid::new_blocked(0, 0, Vec2::ZERO, 0.1, 0.2);
            return Ok(NavigationMesh::from_grid(grid, Vec::new(), None));
        }
        let mut grid = NavigationGrid::new_blocked(40, 40, Vec2::ZERO, 0.1, 0.2);
        grid.walkable.fill(true);
        Ok(NavigationMesh::from_grid(grid, Vec::new(), None))
    }
}

fn generation() -> GenerationConfig {
    GenerationConfig {
        cell_size: 0.1,
        cell_height: 0.05,
        tile_size: 16,
        walkable_height: 20,
        walkable_radius: 1,
        walkable_climb: 2,
        walkable_slope_degrees: 45.0,
    }
}

fn triangle(id: u64) -> SensedFragment {
    SensedFragment {
        id: FragmentId(id),
        space: SpaceHandle(id),
        vertices: vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 0.0)],
        indices: vec![0, 1, 2],
        revision: 1,
    }
}

fn floor(id: u64, size: f32) -> SensedFragment {
    SensedFragment {
        id: FragmentId(id),
        space: SpaceHandle(id),
        vertices: vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, size),
            Vec3::new(size, 0.0, size),
            Vec3::new(size, 0.0, 0.0),
        ],
        indices: vec![0, 1, 2, 0, 2, 3],
        revision: 1,
    }
}

fn posed(fragments: Vec<SensedFragment>) -> RecordedSensor {
    let mut sensor = RecordedSensor::new(ORIGIN);
    for f in fragments {
        sensor.set_pose(f.space, Mat4::IDENTITY);
        sensor.upsert(f);
    }
    sensor
}

fn scripted_session() -> NavSession<ScriptedService> {
    NavSession::new(PipelineConfig::new(generation()), PoseResolver::new(ORIGIN), ScriptedService::default()).unwrap()
}

fn calls(session: &NavSession<ScriptedService>) -> u32 {
    session.builder().service().calls.get()
}

// ============================================================================
// AGGREGATION
// ============================================================================

#[test]
fn aggregation_is_deterministic() {
    let fragments = vec![triangle(1), floor(2, 2.0), triangle(3)];
    let mut transforms = TransformMap::default();
    transforms.insert(FragmentId(1), Mat4::from_rotation_y(0.3));
    transforms.insert(FragmentId(2), Mat4::from_translation(Vec3::new(0.5, 0.0, -1.0)));
    transforms.insert(FragmentId(3), Mat4::from_scale(Vec3::splat(2.0)));

    let a = aggregate(&fragments, &transforms);
    let b = aggregate(&fragments, &transforms);
    assert_eq!(a, b);
}

#[test]
fn aggregated_indices_stay_in_range() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..20 {
        let count = rng.gen_range(1..6);
        let mut fragments = Vec::new();
        let mut transforms = TransformMap::default();
        for id in 0..count {
            let verts = rng.gen_range(3..12u32);
            let tris = rng.gen_range(1..10);
            let vertices = (0..verts)
                .map(|_| Vec3::new(rng.gen_range(-2.0..2.0), rng.gen_range(0.0..1.0), rng.gen_range(-2.0..2.0)))
                .collect();
            let indices = (0..tris * 3).map(|_| rng.gen_range(0..verts)).collect();
            fragments.push(SensedFragment {
                id: FragmentId(id),
                space: SpaceHandle(id),
                vertices,
                indices,
                revision: 1,
            });
            transforms.insert(FragmentId(id), Mat4::from_translation(Vec3::new(id as f32, 0.0, 0.0)));
        }

        let mesh = aggregate(&fragments, &transforms);
        let vertex_count = (mesh.positions.len() / 3) as u32;
        assert!(mesh.indices.iter().all(|&i| i < vertex_count));
        let expected: usize = fragments.iter().map(|f| f.triangle_count()).sum();
        assert_eq!(mesh.triangle_count(), expected);
    }
}

#[test]
fn two_fragments_offset_indices() {
    let fragments = [triangle(1), triangle(2)];
    let transforms: TransformMap = [(FragmentId(1), Mat4::IDENTITY), (FragmentId(2), Mat4::IDENTITY)]
        .into_iter()
        .collect();
    let mesh = aggregate(&fragments, &transforms);
    assert_eq!(mesh.indices, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(mesh.positions.len(), 6 * 3);
}

// ============================================================================
// REBUILD GATING
// ============================================================================

#[test]
fn single_fragment_moving_between_samples() {
    let mut sensor = posed(vec![triangle(1)]);
    let mut session = scripted_session();

    let first = session.tick(&sensor, SampleToken(1), Vec3::new(0.2, 1.0, 0.2), 0.0);
    assert_eq!(first.rebuild, RebuildStatus::Rebuilt { revision: 1 });
    let before = aggregate(sensor.fragments(), session.aggregator().transforms());

    sensor.set_pose(SpaceHandle(1), Mat4::from_translation(Vec3::X));
    let second = session.tick(&sensor, SampleToken(2), Vec3::new(0.2, 1.0, 0.2), 1.0);
    assert_eq!(second.rebuild, RebuildStatus::Rebuilt { revision: 2 });
    let after = aggregate(sensor.fragments(), session.aggregator().transforms());

    assert_eq!(before.vertex_count(), 3);
    assert_eq!(after.vertex_count(), 3);
    for i in 0..3 {
        assert_eq!(after.position(i), before.position(i) + Vec3::X);
    }

    let third = session.tick(&sensor, SampleToken(3), Vec3::new(0.2, 1.0, 0.2), 2.0);
    assert_eq!(third.rebuild, RebuildStatus::Unchanged);
    assert_eq!(calls(&session), 2);
}

#[test]
fn unchanged_input_never_reaches_the_service_twice() {
    let mut sensor = posed(vec![floor(1, 2.0), triangle(2)]);
    let mut session = scripted_session();

    for sample in 1..=5 {
        session.tick(&sensor, SampleToken(sample), Vec3::ONE, sample as f64);
    }
    assert_eq!(calls(&session), 1);

    // One vertex nudged, same revision: still exactly one more rebuild.
    if let Some(f) = sensor.fragment_mut(FragmentId(2)) {
        f.vertices[1].y += 0.01;
    }
    for sample in 6..=8 {
        session.tick(&sensor, SampleToken(sample), Vec3::ONE, sample as f64);
    }
    assert_eq!(calls(&session), 2);
    assert_eq!(session.stats().rebuilds, 2);
}

#[test]
fn tracking_loss_alone_does_not_rebuild() {
    let mut sensor = posed(vec![floor(1, 2.0)]);
    let mut session = scripted_session();
    session.tick(&sensor, SampleToken(1), Vec3::ONE, 0.0);

    sensor.lose_pose(SpaceHandle(1));
    let report = session.tick(&sensor, SampleToken(2), Vec3::ONE, 1.0);
    assert_eq!(report.rebuild, RebuildStatus::Unchanged);
    assert_eq!(report.fragment_errors, vec![NavError::PoseUnavailable(FragmentId(1))]);
    assert_eq!(report.fragments_included, 1);
    assert_eq!(calls(&session), 1);
}

#[test]
fn empty_input_is_not_a_build() {
    let sensor = RecordedSensor::new(ORIGIN);
    let mut session = scripted_session();
    let report = session.tick(&sensor, SampleToken(1), Vec3::ONE, 0.0);
    assert_eq!(report.rebuild, RebuildStatus::Empty);
    assert!(report.errors().is_empty());
    assert_eq!(calls(&session), 0);
    assert!(!session.context().is_ready());
}

// ============================================================================
// FAILURE RETENTION
// ============================================================================

#[test]
fn rejected_rebuild_keeps_navmesh_and_crowd() {
    let mut sensor = posed(vec![floor(1, 2.0)]);
    let mut session = scripted_session();
    session.tick(&sensor, SampleToken(1), Vec3::new(1.03, 1.0, 1.07), 0.0);

    let navmesh_before = session.context().navmesh().cloned();
    let crowd_rev_before = session.crowd().map(|c| c.revision());
    assert!(navmesh_before.is_some());

    session.builder().service().fail.set(true);
    sensor.set_pose(SpaceHandle(1), Mat4::from_translation(Vec3::Z));
    let report = session.tick(&sensor, SampleToken(2), Vec3::new(1.03, 1.0, 1.07), 1.0);

    assert!(matches!(report.rebuild, RebuildStatus::Failed(NavError::BuildFailed(_))));
    assert_eq!(session.context().navmesh().cloned(), navmesh_before);
    assert_eq!(session.context().revision(), 1);
    assert_eq!(session.crowd().map(|c| c.revision()), crowd_rev_before);
    assert!(report.crowd.is_some());
    assert_eq!(session.stats().build_failures, 1);

    // Same rejected input is not retried; a change is.
    session.tick(&sensor, SampleToken(3), Vec3::ONE, 2.0);
    assert_eq!(calls(&session), 2);
    session.builder().service().fail.set(false);
    sensor.set_pose(SpaceHandle(1), Mat4::IDENTITY);
    let report = session.tick(&sensor, SampleToken(4), Vec3::ONE, 3.0);
    assert_eq!(report.rebuild, RebuildStatus::Rebuilt { revision: 2 });
}

#[test]
fn hollow_navmesh_is_refused_and_previous_one_kept() {
    let mut sensor = posed(vec![floor(1, 2.0)]);
    let mut session = scripted_session();
    session.tick(&sensor, SampleToken(1), Vec3::new(1.03, 1.0, 1.07), 0.0);
    let navmesh_before = session.context().navmesh().cloned();

    session.builder().service().hollow.set(true);
    sensor.set_pose(SpaceHandle(1), Mat4::from_translation(Vec3::Z));
    let report = session.tick(&sensor, SampleToken(2), Vec3::new(1.03, 1.0, 1.07), 1.0);
    assert!(matches!(report.rebuild, RebuildStatus::Failed(NavError::BuildFailed(_))));
    assert_eq!(session.context().navmesh().cloned(), navmesh_before);
    assert_eq!(session.crowd().map(|c| c.revision()), Some(1));

    // The crowd keeps running on the old navmesh.
    let report = session.tick(&sensor, SampleToken(3), Vec3::new(1.03, 1.0, 1.07), 2.0);
    assert!(report.crowd.is_some());
    assert_eq!(calls(&session), 2);
}

// ============================================================================
// CROWD
// ============================================================================

#[test]
fn teleport_fires_every_ten_seconds() {
    let sensor = posed(vec![floor(1, 4.0)]);
    let mut session = scripted_session();
    let observer = Vec3::new(3.05, 1.5, 3.05);

    session.tick(&sensor, SampleToken(0), observer, 0.0);
    for t in 1..=25u64 {
        let report = session.tick(&sensor, SampleToken(t), observer, t as f64);
        let crowd = report.crowd.unwrap();
        let target = crowd.target.unwrap();
        let stacked_on_target = session.agents().iter().all(|a| a.position == target);
        let expected = t == 10 || t == 20;
        assert_eq!(crowd.teleported, expected, "t = {t}");
        assert_eq!(stacked_on_target, expected, "t = {t}");
    }
    assert_eq!(session.stats().teleports, 2);
}

#[test]
fn rebuilds_do_not_push_back_teleports() {
    let mut sensor = posed(vec![floor(1, 4.0)]);
    let mut session = scripted_session();
    let observer = Vec3::new(3.05, 1.5, 3.05);

    let mut fired = Vec::new();
    for t in 0..=25u64 {
        // New scan data at t=5 and t=15, each forcing a rebuild.
        if t == 5 || t == 15 {
            let f = triangle(t);
            sensor.set_pose(f.space, Mat4::IDENTITY);
            sensor.upsert(f);
        }
        let report = session.tick(&sensor, SampleToken(t), observer, t as f64);
        if t == 5 || t == 15 {
            assert!(matches!(report.rebuild, RebuildStatus::Rebuilt { .. }), "t = {t}");
        }
        if report.crowd.is_some_and(|c| c.teleported) {
            fired.push(t);
        }
    }
    assert_eq!(fired, vec![10, 20]);
    assert_eq!(session.last_teleport(), Some(20.0));
}

#[test]
fn missed_raycast_keeps_previous_target() {
    let sensor = posed(vec![floor(1, 4.0)]);
    let mut session = scripted_session();

    let mut previous = None;
    for t in 0..12u64 {
        // Every third tick the observer leaves the scanned area.
        let observer = if t % 3 == 2 {
            Vec3::new(9.0, 1.5, 9.0)
        } else {
            Vec3::new(0.53 + t as f32 * 0.2, 1.5, 1.03)
        };
        let report = session.tick(&sensor, SampleToken(t), observer, t as f64 * 0.5);
        let crowd = report.crowd.unwrap();
        if t % 3 == 2 {
            assert!(!crowd.target_hit);
            assert_eq!(crowd.target, previous);
            assert!(report.errors().contains(&NavError::NoTargetHit));
        } else {
            assert!(crowd.target_hit);
        }
        previous = crowd.target;
    }
    assert_eq!(session.stats().target_misses, 4);
}

#[test]
fn rebuilt_crowd_spawns_at_previous_target() {
    let mut sensor = posed(vec![floor(1, 4.0)]);
    let mut session = scripted_session();
    let observer = Vec3::new(2.05, 1.5, 1.05);
    session.tick(&sensor, SampleToken(1), observer, 0.0);
    session.tick(&sensor, SampleToken(2), observer, 1.0);
    let target = session.target().unwrap();

    sensor.upsert(triangle(2));
    sensor.set_pose(SpaceHandle(2), Mat4::IDENTITY);
    let report = session.tick(&sensor, SampleToken(3), Vec3::new(50.0, 1.5, 50.0), 2.0);
    assert_eq!(report.rebuild, RebuildStatus::Rebuilt { revision: 2 });
    assert_eq!(session.crowd().unwrap().revision(), 2);
    // Fresh agents stand on the old target; this tick's ray missed.
    assert!(session.agents().iter().all(|a| a.position == target));
    assert_eq!(session.target(), Some(target));
}

// ============================================================================
// REAL GEOMETRY
// ============================================================================

#[test]
fn raster_pipeline_walks_agents_toward_the_observer() {
    let mut sensor = RecordedSensor::new(ORIGIN);
    for (i, offset) in [Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0)].into_iter().enumerate() {
        let f = floor(i as u64 + 1, 2.0);
        sensor.set_pose(f.space, Mat4::from_translation(offset));
        sensor.upsert(f);
    }
    let config = PipelineConfig::new(generation());
    let mut session = NavSession::new(config, PoseResolver::new(ORIGIN), RasterGeometryService::default()).unwrap();

    let start = Vec3::new(0.55, 1.5, 1.05);
    session.tick(&sensor, SampleToken(1), start, 0.0);
    let spawn = session.target().unwrap();

    let goal = Vec3::new(3.45, 1.5, 1.05);
    for t in 1..=8u64 {
        session.tick(&sensor, SampleToken(t + 1), goal, t as f64 * 0.5);
    }
    let agents = session.agents();
    assert_eq!(agents.len(), 2);
    for a in &agents {
        assert!(a.position.x > spawn.x + 1.0, "agent stuck at {}", a.position);
        assert!(a.position.y.abs() < 1e-4);
    }
    assert_eq!(session.builder().attempts(), 1);

    let stats = session.end();
    assert_eq!(stats.rebuilds, 1);
}
