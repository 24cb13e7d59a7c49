// Error taxonomy for the reconstruction + crowd pipeline.
//
// None of these are fatal to a session. The pipeline absorbs each one with a
// last-known-good fallback and reports it through NavStats / TickReport.

use super::sensing::FragmentId;

pub type NavResult<T> = Result<T, NavError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NavError {
    /// The platform could not report a pose for this sample (tracking loss,
    /// stale sample token, or a degenerate matrix).
    #[error("pose unavailable for {0}")]
    PoseUnavailable(FragmentId),

    /// The geometry service could not produce walkable topology.
    #[error("navmesh build failed: {0}")]
    BuildFailed(String),

    /// Downward target ray found no walkable surface.
    #[error("no walkable surface below observer")]
    NoTargetHit,

    /// No geometry to build from yet. Reported, never treated as a failure.
    #[error("combined mesh is empty")]
    EmptyInput,

    #[error("fragment {id} rejected: {reason}")]
    InvalidFragment { id: FragmentId, reason: String },

    #[error("invalid config: {field} = {value}")]
    InvalidConfig { field: &'static str, value: String },

    /// A crowd was asked to step against a navmesh it was not built for.
    #[error("crowd bound to navmesh revision {crowd}, context holds {context}")]
    CrowdMismatch { crowd: u64, context: u64 },

    #[error("failed to read config {path}: {message}")]
    ConfigIo { path: String, message: String },

    #[error("failed to parse config: {0}")]
    ConfigParse(String),
}

impl NavError {
    /// Short stable label, used as the key in NavStats counters and log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            NavError::PoseUnavailable(_) => "pose_unavailable",
            NavError::BuildFailed(_) => "build_failed",
            NavError::NoTargetHit => "no_target_hit",
            NavError::EmptyInput => "empty_input",
            NavError::InvalidFragment { .. } => "invalid_fragment",
            NavError::InvalidConfig { .. } => "invalid_config",
            NavError::CrowdMismatch { .. } => "crowd_mismatch",
            NavError::ConfigIo { .. } => "config_io",
            NavError::ConfigParse(_) => "config_parse",
        }
    }
}

impl From<toml::de::Error> for NavError {
    fn from(e: toml::de::Error) -> Self {
        NavError::ConfigParse(e.to_string())
    }
}
