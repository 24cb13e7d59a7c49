// Pose resolution: fragment-local space -> session world space, per sample.

use glam::Mat4;

use super::error::{NavError, NavResult};
use super::sensing::{FragmentId, PoseSource, SampleToken, SpaceHandle};

/// Determinant magnitude below which a pose is treated as degenerate.
const MIN_DETERMINANT: f32 = 1e-8;

/// Resolves local-to-world transforms against a fixed session origin.
///
/// A resolver is bound to one sample at a time: call `begin_sample` once per
/// tick, then `resolve` once per fragment. Resolving against any other token
/// reports `PoseUnavailable` instead of handing back a pose for the wrong
/// instant.
pub struct PoseResolver {
    origin: SpaceHandle,
    current: Option<SampleToken>,
}

impl PoseResolver {
    pub fn new(origin: SpaceHandle) -> Self {
        Self { origin, current: None }
    }

    pub fn origin(&self) -> SpaceHandle {
        self.origin
    }

    pub fn begin_sample(&mut self, sample: SampleToken) {
        self.current = Some(sample);
    }

    pub fn current_sample(&self) -> Option<SampleToken> {
        self.current
    }

    /// Matrix mapping `space` coordinates into origin (world) coordinates.
    pub fn resolve(
        &self,
        source: &dyn PoseSource,
        fragment: FragmentId,
        space: SpaceHandle,
        sample: SampleToken,
    ) -> NavResult<Mat4> {
        if self.current != Some(sample) {
            log::debug!("{}: stale sample {:?} (current {:?})", fragment, sample, self.current);
            return Err(NavError::PoseUnavailable(fragment));
        }
        let pose = source
            .pose(space, self.origin, sample)
            .ok_or(NavError::PoseUnavailable(fragment))?;
        if !pose.is_finite() || pose.determinant().abs() < MIN_DETERMINANT {
            log::debug!("{}: degenerate pose rejected", fragment);
            return Err(NavError::PoseUnavailable(fragment));
        }
        Ok(pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sensing::RecordedSensor;
    use glam::Vec3;

    const ORIGIN: SpaceHandle = SpaceHandle(0);
    const SPACE: SpaceHandle = SpaceHandle(1);
    const FRAG: FragmentId = FragmentId(1);

    #[test]
    fn resolves_pose_for_current_sample() {
        let mut sensor = RecordedSensor::new(ORIGIN);
        let pose = Mat4::from_translation(Vec3::new(1.0, 0.0, 2.0));
        sensor.set_pose(SPACE, pose);

        let mut resolver = PoseResolver::new(ORIGIN);
        resolver.begin_sample(SampleToken(3));
        assert_eq!(resolver.resolve(&sensor, FRAG, SPACE, SampleToken(3)), Ok(pose));
    }

    #[test]
    fn stale_sample_is_unavailable() {
        let mut sensor = RecordedSensor::new(ORIGIN);
        sensor.set_pose(SPACE, Mat4::IDENTITY);

        let mut resolver = PoseResolver::new(ORIGIN);
        resolver.begin_sample(SampleToken(4));
        assert_eq!(
            resolver.resolve(&sensor, FRAG, SPACE, SampleToken(3)),
            Err(NavError::PoseUnavailable(FRAG))
        );
    }

    #[test]
    fn tracking_loss_and_degenerate_pose_are_unavailable() {
        let mut sensor = RecordedSensor::new(ORIGIN);
        let mut resolver = PoseResolver::new(ORIGIN);
        resolver.begin_sample(SampleToken(1));
        assert!(resolver.resolve(&sensor, FRAG, SPACE, SampleToken(1)).is_err());

        sensor.set_pose(SPACE, Mat4::from_scale(Vec3::ZERO));
        assert!(resolver.resolve(&sensor, FRAG, SPACE, SampleToken(1)).is_err());

        sensor.set_pose(SPACE, Mat4::from_translation(Vec3::new(f32::NAN, 0.0, 0.0)));
        assert!(resolver.resolve(&sensor, FRAG, SPACE, SampleToken(1)).is_err());
    }
}
