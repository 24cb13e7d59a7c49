// Pipeline configuration, loaded once at session start.
//
// Example TOML:
//
//   debug_overlays = false
//
//   [generation]
//   cell_size = 0.1               # metres per grid cell (XZ)
//   cell_height = 0.05            # vertical resolution
//   tile_size = 32                # cells per tile side
//   walkable_height = 20          # clearance, in cell_height units
//   walkable_radius = 2           # erosion, in cell_size units
//   walkable_climb = 4            # max step, in cell_height units
//   walkable_slope_degrees = 45.0
//
//   [crowd]
//   agent_count = 2
//   teleport_interval_secs = 10.0

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{NavError, NavResult};

// ============================================================================
// GENERATION
// ============================================================================

/// Navmesh generation parameters. Passed to the geometry service unmodified.
///
/// Every field is required: there are no serde defaults here, so a config
/// file that omits one fails to load instead of silently baking with a guess.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Grid cell side length in world units.
    pub cell_size: f32,
    /// Vertical quantization step in world units.
    pub cell_height: f32,
    /// Tile side length in cells.
    pub tile_size: u32,
    /// Minimum clearance above a floor, in `cell_height` units.
    pub walkable_height: u32,
    /// Agent radius used to erode walkable area, in `cell_size` units.
    pub walkable_radius: u32,
    /// Largest floor step between neighbouring cells, in `cell_height` units.
    pub walkable_climb: u32,
    /// Steepest surface still considered floor.
    pub walkable_slope_degrees: f32,
}

impl GenerationConfig {
    pub fn validate(&self) -> NavResult<()> {
        positive_f32("cell_size", self.cell_size)?;
        positive_f32("cell_height", self.cell_height)?;
        positive_u32("tile_size", self.tile_size)?;
        positive_u32("walkable_height", self.walkable_height)?;
        positive_u32("walkable_radius", self.walkable_radius)?;
        if !(self.walkable_slope_degrees > 0.0 && self.walkable_slope_degrees < 90.0) {
            return Err(invalid("walkable_slope_degrees", self.walkable_slope_degrees));
        }
        Ok(())
    }

    /// Clearance in world units.
    pub fn clearance(&self) -> f32 {
        self.walkable_height as f32 * self.cell_height
    }

    /// Max step in world units.
    pub fn max_climb(&self) -> f32 {
        self.walkable_climb as f32 * self.cell_height
    }

    /// Stable hash input: exact bit patterns of every field.
    pub fn fingerprint_words(&self) -> [u32; 7] {
        [
            self.cell_size.to_bits(),
            self.cell_height.to_bits(),
            self.tile_size,
            self.walkable_height,
            self.walkable_radius,
            self.walkable_climb,
            self.walkable_slope_degrees.to_bits(),
        ]
    }
}

// ============================================================================
// CROWD
// ============================================================================

/// Crowd population and steering parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrowdConfig {
    pub agent_count: usize,
    pub agent_radius: f32,
    pub agent_height: f32,
    /// World units per second.
    pub agent_max_speed: f32,
    /// Session seconds between forced relocations to the target.
    pub teleport_interval_secs: f64,
    /// Length of the downward target ray.
    pub target_ray_length: f32,
    /// ORCA look-ahead window in seconds.
    pub avoidance_time_horizon: f32,
    /// Distance at which an agent counts as arrived.
    pub arrival_radius: f32,
}

impl Default for CrowdConfig {
    fn default() -> Self {
        Self {
            agent_count: 2,
            agent_radius: 0.1,
            agent_height: 0.2,
            agent_max_speed: 0.5,
            teleport_interval_secs: 10.0,
            target_ray_length: 10.0,
            avoidance_time_horizon: 1.5,
            arrival_radius: 0.05,
        }
    }
}

impl CrowdConfig {
    pub fn validate(&self) -> NavResult<()> {
        positive_f32("agent_radius", self.agent_radius)?;
        positive_f32("agent_height", self.agent_height)?;
        positive_f32("agent_max_speed", self.agent_max_speed)?;
        positive_f32("target_ray_length", self.target_ray_length)?;
        positive_f32("avoidance_time_horizon", self.avoidance_time_horizon)?;
        if !(self.teleport_interval_secs > 0.0) {
            return Err(invalid("teleport_interval_secs", self.teleport_interval_secs));
        }
        if !(self.arrival_radius >= 0.0) {
            return Err(invalid("arrival_radius", self.arrival_radius));
        }
        Ok(())
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub generation: GenerationConfig,
    #[serde(default)]
    pub crowd: CrowdConfig,
    /// Ask the geometry service to keep per-cell classification for overlays.
    #[serde(default)]
    pub debug_overlays: bool,
}

impl PipelineConfig {
    pub fn new(generation: GenerationConfig) -> Self {
        Self {
            generation,
            crowd: CrowdConfig::default(),
            debug_overlays: false,
        }
    }

    pub fn validate(&self) -> NavResult<()> {
        self.generation.validate()?;
        self.crowd.validate()
    }

    pub fn from_toml_str(text: &str) -> NavResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> NavResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| NavError::ConfigIo {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config = Self::from_toml_str(&text)?;
        log::info!("loaded pipeline config from {}", path.display());
        Ok(config)
    }
}

fn invalid(field: &'static str, value: impl ToString) -> NavError {
    NavError::InvalidConfig { field, value: value.to_string() }
}

fn positive_f32(field: &'static str, value: f32) -> NavResult<()> {
    if value > 0.0 && value.is_finite() { Ok(()) } else { Err(invalid(field, value)) }
}

fn positive_u32(field: &'static str, value: u32) -> NavResult<()> {
    if value > 0 { Ok(()) } else { Err(invalid(field, value)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
        debug_overlays = true

        [generation]
        cell_size = 0.1
        cell_height = 0.05
        tile_size = 32
        walkable_height = 20
        walkable_radius = 2
        walkable_climb = 4
        walkable_slope_degrees = 45.0

        [crowd]
        agent_count = 3
    "#;

    #[test]
    fn parses_full_config_with_crowd_defaults() {
        let config = PipelineConfig::from_toml_str(FULL).unwrap();
        assert!(config.debug_overlays);
        assert_eq!(config.generation.tile_size, 32);
        assert_eq!(config.crowd.agent_count, 3);
        assert_eq!(config.crowd.teleport_interval_secs, 10.0);
        assert!((config.generation.clearance() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn missing_generation_field_is_a_parse_error() {
        let text = FULL.replace("walkable_radius = 2", "");
        let err = PipelineConfig::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, NavError::ConfigParse(_)));
    }

    #[test]
    fn non_positive_values_are_rejected() {
        let text = FULL.replace("cell_size = 0.1", "cell_size = 0.0");
        let err = PipelineConfig::from_toml_str(&text).unwrap_err();
        assert_eq!(err, NavError::InvalidConfig { field: "cell_size", value: "0".into() });

        let text = FULL.replace("tile_size = 32", "tile_size = 0");
        assert!(PipelineConfig::from_toml_str(&text).is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.generation.walkable_height, 20);

        let missing = PipelineConfig::load("/nonexistent/roomwalk.toml").unwrap_err();
        assert_eq!(missing.kind(), "config_io");
    }
}
