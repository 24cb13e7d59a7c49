// Headless room-scan demo
// Feeds a scripted scan of a small room into a NavSession: floor patches show
// up one by one, a table appears mid-session, tracking drops out at random and
// the observer walks a circle. Prints a status line once per simulated second.
//
//   cargo run -- [config.toml]
//   RUST_LOG=roomwalk=debug cargo run

use glam::{Mat4, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use roomwalk::engine::pose::PoseResolver;
use roomwalk::{
    FragmentId, GenerationConfig, NavResult, NavSession, PipelineConfig, RasterGeometryService, RebuildStatus,
    RecordedSensor, SampleToken, SensedFragment, SpaceHandle, SpatialSensor,
};

// ============================================================================
// SIMULATION SETTINGS
// ============================================================================

const TICK_HZ: u32 = 30;
const DURATION_SECS: u32 = 40;
const TRACKING_LOSS_CHANCE: f64 = 0.02;
const ROOM_CENTER: Vec3 = Vec3::new(2.0, 0.0, 2.0);
const OBSERVER_HEIGHT: f32 = 1.6;
const ORIGIN: SpaceHandle = SpaceHandle(0);

// ============================================================================
// SCRIPTED SCANNER
// ============================================================================

/// Geometry builder for one fragment in its own local space.
#[derive(Default)]
struct PatchBuilder {
    vertices: Vec<Vec3>,
    indices:  Vec<u32>,
}

impl PatchBuilder {
    /// Horizontal quad facing +Y.
    fn floor(mut self, x0: f32, z0: f32, x1: f32, z1: f32, y: f32) -> Self {
        self.quad([
            Vec3::new(x0, y, z0),
            Vec3::new(x0, y, z1),
            Vec3::new(x1, y, z1),
            Vec3::new(x1, y, z0),
        ]);
        self
    }

    /// Closed box without a bottom.
    fn block(mut self, min: Vec3, max: Vec3) -> Self {
        self = self.floor(min.x, min.z, max.x, max.z, max.y);
        let (a, b) = (min, max);
        self.quad([Vec3::new(a.x, a.y, a.z), Vec3::new(b.x, a.y, a.z), Vec3::new(b.x, b.y, a.z), Vec3::new(a.x, b.y, a.z)]);
        self.quad([Vec3::new(b.x, a.y, b.z), Vec3::new(a.x, a.y, b.z), Vec3::new(a.x, b.y, b.z), Vec3::new(b.x, b.y, b.z)]);
        self.quad([Vec3::new(a.x, a.y, b.z), Vec3::new(a.x, a.y, a.z), Vec3::new(a.x, b.y, a.z), Vec3::new(a.x, b.y, b.z)]);
        self.quad([Vec3::new(b.x, a.y, a.z), Vec3::new(b.x, a.y, b.z), Vec3::new(b.x, b.y, b.z), Vec3::new(b.x, b.y, a.z)]);
        self
    }

    fn quad(&mut self, corners: [Vec3; 4]) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&corners);
        self.indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    fn build(self, id: u64) -> SensedFragment {
        SensedFragment {
            id: FragmentId(id),
            space: SpaceHandle(id),
            vertices: self.vertices,
            indices: self.indices,
            revision: 1,
        }
    }
}

/// One fragment the scanner will discover at `appears_at` seconds.
struct ScriptedPatch {
    appears_at: f32,
    pose:       Mat4,
    fragment:   SensedFragment,
}

struct Scanner {
    sensor:  RecordedSensor,
    pending: Vec<ScriptedPatch>,
    /// Poses of every discovered space, restored after a tracking drop.
    known:   Vec<(SpaceHandle, Mat4)>,
    lost:    Vec<SpaceHandle>,
    rng:     StdRng,
}

impl Scanner {
    fn new(seed: u64) -> Self {
        // Four 2m x 2m floor patches, each scanned in its own local space.
        let mut pending: Vec<ScriptedPatch> = (0..4u64)
            .map(|i| {
                let (col, row) = ((i % 2) as f32, (i / 2) as f32);
                ScriptedPatch {
                    appears_at: i as f32 * 3.0,
                    pose: Mat4::from_translation(Vec3::new(col * 2.0, 0.0, row * 2.0)),
                    fragment: PatchBuilder::default().floor(0.0, 0.0, 2.0, 2.0, 0.0).build(i + 1),
                }
            })
            .collect();

        pending.push(ScriptedPatch {
            appears_at: 15.0,
            pose: Mat4::from_translation(Vec3::new(2.6, 0.0, 0.8)),
            fragment: PatchBuilder::default().block(Vec3::ZERO, Vec3::new(0.8, 0.7, 0.6)).build(10),
        });

        Self {
            sensor: RecordedSensor::new(ORIGIN),
            pending,
            known: Vec::new(),
            lost: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Advance the script to session time `t`.
    fn advance(&mut self, t: f32) {
        let (due, rest): (Vec<_>, Vec<_>) = self.pending.drain(..).partition(|p| p.appears_at <= t);
        self.pending = rest;
        for patch in due {
            log::info!("scanner: discovered {}", patch.fragment.id);
            self.sensor.set_pose(patch.fragment.space, patch.pose);
            self.known.push((patch.fragment.space, patch.pose));
            self.sensor.upsert(patch.fragment);
        }

        // Lost spaces come back on the next sample.
        for space in self.lost.drain(..) {
            if let Some(&(_, pose)) = self.known.iter().find(|(s, _)| *s == space) {
                self.sensor.set_pose(space, pose);
            }
        }

        let spaces: Vec<SpaceHandle> = self.sensor.fragments().iter().map(|f| f.space).collect();
        for space in spaces {
            if self.rng.gen_bool(TRACKING_LOSS_CHANCE) {
                self.sensor.lose_pose(space);
                self.lost.push(space);
            }
        }
    }
}

// ============================================================================
// MAIN
// ============================================================================

fn default_config() -> PipelineConfig {
    PipelineConfig::new(GenerationConfig {
        cell_size: 0.1,
        cell_height: 0.05,
        tile_size: 32,
        walkable_height: 20,
        walkable_radius: 2,
        walkable_climb: 4,
        walkable_slope_degrees: 45.0,
    })
}

fn observer_at(t: f32) -> Vec3 {
    let angle = t * 0.25;
    ROOM_CENTER + Vec3::new(angle.cos() * 1.2, OBSERVER_HEIGHT, angle.sin() * 1.2)
}

fn run() -> NavResult<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::load(path)?,
        None => default_config(),
    };

    let mut session = NavSession::new(config, PoseResolver::new(ORIGIN), RasterGeometryService::default())?;
    let mut scanner = Scanner::new(7);

    for frame in 0..TICK_HZ * DURATION_SECS {
        let t = frame as f32 / TICK_HZ as f32;
        scanner.advance(t);
        let report = session.tick(&scanner.sensor, SampleToken(frame as u64 + 1), observer_at(t), t as f64);

        match &report.rebuild {
            RebuildStatus::Rebuilt { revision } => println!(
                "t={:5.2}s navmesh rev {} from {} fragments",
                t, revision, report.fragments_included
            ),
            RebuildStatus::Failed(e) => println!("t={:5.2}s rebuild failed: {}", t, e),
            _ => {}
        }

        if frame % TICK_HZ == 0 {
            let stats = session.stats();
            let agents: Vec<String> = session
                .agents()
                .iter()
                .map(|a| format!("({:.2}, {:.2})", a.position.x, a.position.z))
                .collect();
            let target = session
                .target()
                .map_or_else(|| "-".to_string(), |p| format!("({:.2}, {:.2})", p.x, p.z));
            println!(
                "t={:5.2}s | target: {} | agents: {} | rebuilds: {} | pose drops: {} | teleports: {}",
                t,
                target,
                agents.join(" "),
                stats.rebuilds,
                stats.pose_failures,
                stats.teleports
            );
        }
    }

    let stats = session.end();
    println!("{:#?}", stats);
    Ok(())
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        log::error!("{} ({})", e, e.kind());
        std::process::exit(1);
    }
}
