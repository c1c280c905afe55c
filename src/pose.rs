//! Motion prediction for warm-starting pose variables.

use nalgebra::{Isometry3, Point3};

/// Predicts the next pose by pushing the previous one forward along its own
/// optical axis at a fixed per-frame step.
///
/// The prediction only seeds the optimizer's linearization; the stereo
/// constraints pull the estimate to the observed motion, so a crude model
/// is sufficient as long as it stays within the convergence basin.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ConstantVelocityModel {
    /// Forward step per frame, metres along the camera's +Z.
    pub step_m: f64,
}

impl Default for ConstantVelocityModel {
    fn default() -> Self {
        Self { step_m: 2.0 }
    }
}

impl ConstantVelocityModel {
    pub fn new(step_m: f64) -> Self {
        Self { step_m }
    }

    /// Next-frame warm start: same orientation, translation advanced by
    /// `step_m` in the pose's local +Z direction.
    pub fn predict(&self, pose: &Isometry3<f64>) -> Isometry3<f64> {
        let advanced = pose.transform_point(&Point3::new(0.0, 0.0, self.step_m));
        Isometry3::from_parts(advanced.coords.into(), pose.rotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    #[test]
    fn test_identity_pose_advances_along_z() {
        let model = ConstantVelocityModel::default();
        let next = model.predict(&Isometry3::identity());
        assert_abs_diff_eq!(next.translation.z, 2.0);
        assert_abs_diff_eq!(next.translation.x, 0.0);
        assert_abs_diff_eq!(next.translation.y, 0.0);
    }

    #[test]
    fn test_rotated_pose_advances_along_its_own_axis() {
        let model = ConstantVelocityModel::new(1.0);
        // Yawed 90 degrees: local +Z maps to world +X.
        let pose = Isometry3::from_parts(
            Vector3::new(5.0, 0.0, 0.0).into(),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f64::consts::FRAC_PI_2),
        );
        let next = model.predict(&pose);
        assert_abs_diff_eq!(next.translation.x, 6.0, epsilon = 1e-12);
        assert_abs_diff_eq!(next.translation.z, 0.0, epsilon = 1e-12);
        assert_eq!(next.rotation, pose.rotation);
    }
}
