// Session scope: owns every piece of pipeline state for one sensing session.
//
// tick() order is fixed:
//   pose resolution (all fragments) -> aggregation -> rebuild gate ->
//   [rebuild: drop crowd, replace navmesh, recreate crowd] -> crowd update
//
// Nothing here is fatal. Every absorbed error lands in the TickReport and the
// running NavStats so callers can watch for it.

use glam::Vec3;

use super::aggregate::FragmentAggregator;
use super::config::PipelineConfig;
use super::context::NavigationContext;
use super::crowd::{AgentView, CrowdSimulator, CrowdTick};
use super::debug_overlay::{self, OverlayLines, OverlayMesh};
use super::error::{NavError, NavResult};
use super::navmesh::{BuildOutcome, GeometryService, MeshFingerprint, NavigationMesh, NavmeshBuilder};
use super::pose::PoseResolver;
use super::sensing::{SampleToken, SpatialSensor};

const WIREFRAME_COLOR: [f32; 4] = [0.8, 0.8, 0.8, 0.6];

/// Running counters, one per observable condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavStats {
    pub ticks:             u64,
    pub pose_failures:     u64,
    pub skipped_fragments: u64,
    pub empty_ticks:       u64,
    pub rebuilds:          u64,
    pub build_failures:    u64,
    pub target_misses:     u64,
    pub teleports:         u64,
    pub crowd_mismatches:  u64,
}

/// What happened to the navmesh this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum RebuildStatus {
    /// Nothing aggregated; no rebuild attempted.
    Empty,
    /// Aggregate identical to the last attempt.
    Unchanged,
    /// New navmesh installed under this context revision.
    Rebuilt { revision: u64 },
    /// Service rejected the input; previous navmesh and crowd kept.
    Failed(NavError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub sample: SampleToken,
    /// Absorbed per-fragment problems: pose failures and skipped fragments.
    pub fragment_errors: Vec<NavError>,
    /// Fragments that made it into the combined mesh.
    pub fragments_included: usize,
    pub rebuild: RebuildStatus,
    /// `None` until a navmesh (and with it a crowd) exists.
    pub crowd: Option<CrowdTick>,
    /// Raw combined-mesh wireframe, when debug overlays are on.
    pub wireframe: Option<OverlayLines>,
}

impl TickReport {
    /// Every error absorbed this tick.
    pub fn errors(&self) -> Vec<NavError> {
        let mut out = self.fragment_errors.clone();
        if let RebuildStatus::Failed(e) = &self.rebuild {
            out.push(e.clone());
        }
        if self.crowd.is_some_and(|c| !c.target_hit) {
            out.push(NavError::NoTargetHit);
        }
        out
    }
}

pub struct NavSession<S: GeometryService> {
    config:        PipelineConfig,
    resolver:      PoseResolver,
    aggregator:    FragmentAggregator,
    builder:       NavmeshBuilder<S>,
    crowd:         Option<CrowdSimulator>,
    context:       NavigationContext,
    /// Survives crowd recreation so new agents spawn where the old ones headed.
    target:        Option<Vec3>,
    /// Session time of the last teleport; starts with the first crowd and
    /// survives every rebuild after it.
    last_teleport: Option<f64>,
    stats:         NavStats,
}

impl<S: GeometryService> NavSession<S> {
    pub fn new(config: PipelineConfig, resolver: PoseResolver, service: S) -> NavResult<Self> {
        config.validate()?;
        log::info!(
            "session started: cell {} m, tile {} cells, {} agents",
            config.generation.cell_size,
            config.generation.tile_size,
            config.crowd.agent_count
        );
        Ok(Self {
            config,
            resolver,
            aggregator: FragmentAggregator::new(),
            builder: NavmeshBuilder::new(service),
            crowd: None,
            context: NavigationContext::new(),
            target: None,
            last_teleport: None,
            stats: NavStats::default(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Swap the config. A different config takes effect with a rebuild on the
    /// next tick; an identical one changes nothing.
    pub fn set_config(&mut self, config: PipelineConfig) -> NavResult<()> {
        config.validate()?;
        if config == self.config {
            return Ok(());
        }
        self.config = config;
        self.builder.invalidate();
        log::info!("config replaced; navmesh will rebuild on next tick");
        Ok(())
    }

    pub fn context(&self) -> &NavigationContext {
        &self.context
    }

    pub fn crowd(&self) -> Option<&CrowdSimulator> {
        self.crowd.as_ref()
    }

    pub fn agents(&self) -> Vec<AgentView> {
        self.crowd.as_ref().map(CrowdSimulator::agents).unwrap_or_default()
    }

    pub fn target(&self) -> Option<Vec3> {
        self.target
    }

    pub fn last_teleport(&self) -> Option<f64> {
        self.last_teleport
    }

    pub fn stats(&self) -> NavStats {
        self.stats
    }

    pub fn aggregator(&self) -> &FragmentAggregator {
        &self.aggregator
    }

    pub fn builder(&self) -> &NavmeshBuilder<S> {
        &self.builder
    }

    /// Colored navmesh cells; needs `debug_overlays` at generation time.
    pub fn cell_overlay(&self) -> Option<OverlayMesh> {
        self.context.navmesh().and_then(debug_overlay::cell_overlay)
    }

    pub fn agent_overlay(&self) -> OverlayLines {
        debug_overlay::agent_markers(&self.agents())
    }

    /// Run one pipeline step for `sample` at session time `now` (seconds).
    pub fn tick<T: SpatialSensor>(&mut self, sensor: &T, sample: SampleToken, observer: Vec3, now: f64) -> TickReport {
        self.stats.ticks += 1;

        // Poses first, for every live fragment.
        self.resolver.begin_sample(sample);
        let mut fragment_errors = self.aggregator.resolve_poses(sensor, &self.resolver, sample);
        self.stats.pose_failures += fragment_errors.len() as u64;

        // Never-posed fragments were already reported above.
        let aggregation = self.aggregator.aggregate(sensor.fragments());
        for skipped in aggregation.skipped {
            if !matches!(skipped, NavError::PoseUnavailable(_)) {
                log::warn!("fragment skipped: {}", skipped);
                self.stats.skipped_fragments += 1;
                fragment_errors.push(skipped);
            }
        }

        let wireframe = self
            .config
            .debug_overlays
            .then(|| debug_overlay::mesh_wireframe(&aggregation.mesh, WIREFRAME_COLOR));

        let fingerprint = MeshFingerprint::compute(
            &aggregation.mesh,
            &aggregation.included,
            &self.config.generation,
            self.config.debug_overlays,
        );
        let outcome = self.builder.rebuild_if_changed(
            &aggregation.mesh,
            fingerprint,
            &self.config.generation,
            self.config.debug_overlays,
        );

        let rebuild = match outcome {
            BuildOutcome::Empty => {
                self.stats.empty_ticks += 1;
                RebuildStatus::Empty
            }
            BuildOutcome::Unchanged => RebuildStatus::Unchanged,
            BuildOutcome::Failed(e) => {
                self.stats.build_failures += 1;
                RebuildStatus::Failed(e)
            }
            BuildOutcome::Built(navmesh) => {
                self.stats.rebuilds += 1;
                RebuildStatus::Rebuilt { revision: self.replace_navmesh(navmesh, now) }
            }
        };

        let crowd = self.update_crowd(observer, now);

        TickReport {
            sample,
            fragment_errors,
            fragments_included: aggregation.included.len(),
            rebuild,
            crowd,
            wireframe,
        }
    }

    /// Old crowd gone, new navmesh in, new crowd up; in that order.
    fn replace_navmesh(&mut self, navmesh: NavigationMesh, now: f64) -> u64 {
        self.crowd = None;
        let revision = self.context.install(navmesh);
        let last_teleport = *self.last_teleport.get_or_insert(now);
        self.crowd = self
            .context
            .snapshot()
            .map(|snap| CrowdSimulator::new(&snap, self.config.crowd, self.target, now, last_teleport));
        revision
    }

    fn update_crowd(&mut self, observer: Vec3, now: f64) -> Option<CrowdTick> {
        let snapshot = self.context.snapshot()?;
        let crowd = self.crowd.as_mut()?;
        match crowd.update(&snapshot, observer, now) {
            Ok(tick) => {
                self.target = tick.target;
                self.last_teleport = Some(crowd.last_teleport());
                if !tick.target_hit {
                    self.stats.target_misses += 1;
                }
                if tick.teleported {
                    self.stats.teleports += 1;
                }
                Some(tick)
            }
            Err(e) => {
                log::error!("crowd update skipped: {}", e);
                self.stats.crowd_mismatches += 1;
                None
            }
        }
    }

    /// Release crowd, then navmesh and walkable surface.
    fn release(&mut self) {
        self.crowd = None;
        self.context.clear();
        self.aggregator.clear();
    }

    /// End the session, returning its final counters.
    pub fn end(mut self) -> NavStats {
        self.release();
        log::info!("session ended after {} ticks ({} rebuilds)", self.stats.ticks, self.stats.rebuilds);
        self.stats
    }
}

impl<S: GeometryService> Drop for NavSession<S> {
    fn drop(&mut self) {
        self.release();
    }
}
