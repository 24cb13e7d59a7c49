// Engine module - navmesh reconstruction and crowd simulation
// Data flows sensing -> pose -> aggregate -> navmesh -> context -> crowd,
// with session owning all of it.

pub mod aggregate;
pub mod components;
pub mod config;
pub mod context;
pub mod crowd;
pub mod debug_overlay;
pub mod error;
pub mod mesh;
pub mod navigation;
pub mod navmesh;
pub mod orca;
pub mod pose;
pub mod sensing;
pub mod session;
pub mod systems;

// Re-export commonly used items
pub use components::*;
pub use config::{CrowdConfig, GenerationConfig, PipelineConfig};
pub use context::{NavSnapshot, NavigationContext};
pub use crowd::{AgentView, CrowdSimulator, CrowdTick};
pub use error::{NavError, NavResult};
pub use navmesh::{GeometryService, NavigationMesh, NavmeshBuilder, RasterGeometryService};
pub use sensing::{FragmentId, PoseSource, RecordedSensor, SampleToken, SensedFragment, SpaceHandle, SpatialSensor};
pub use session::{NavSession, NavStats, RebuildStatus, TickReport};
