//! Stereo calibration and projection model
//!
//! A single rectified stereo rig: identical left/right intrinsics (fx = fy),
//! right camera offset by the baseline along +X. Loaded once per sequence.

use nalgebra::{Isometry3, Point3};
use serde::{Deserialize, Serialize};

use crate::graph::StereoMeasurement;

/// Calibration for a rectified stereo pair.
///
/// The camera frame follows the usual convention: X right, Y down,
/// Z forward (into the scene).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Calibration {
    /// Focal length in pixels (fx = fy assumed).
    pub focal_px: f64,
    /// Principal point x coordinate (pixels).
    pub cx: f64,
    /// Principal point y coordinate (pixels).
    pub cy: f64,
    /// Stereo baseline in meters.
    pub baseline_m: f64,
    /// Image width in pixels.
    pub image_width: u32,
    /// Image height in pixels.
    pub image_height: u32,
}

impl Calibration {
    pub fn new(
        focal_px: f64,
        cx: f64,
        cy: f64,
        baseline_m: f64,
        image_width: u32,
        image_height: u32,
    ) -> Self {
        Self {
            focal_px,
            cx,
            cy,
            baseline_m,
            image_width,
            image_height,
        }
    }

    /// Depth along the optical axis for a given disparity.
    ///
    /// `depth = focal_px * baseline_m / disparity`. The caller is expected
    /// to have gated the disparity against its confidence threshold; this
    /// only guards against non-positive values.
    pub fn depth_from_disparity(&self, disparity: f64) -> Option<f64> {
        if disparity <= 0.0 {
            return None;
        }
        let depth = self.focal_px * self.baseline_m / disparity;
        if depth.is_finite() && depth > 0.0 {
            Some(depth)
        } else {
            None
        }
    }

    /// Backproject a left-image pixel at a known depth into the camera frame.
    pub fn unproject(&self, u: f64, v: f64, depth: f64) -> Point3<f64> {
        let x = (u - self.cx) * depth / self.focal_px;
        let y = (v - self.cy) * depth / self.focal_px;
        Point3::new(x, y, depth)
    }

    /// Project a camera-frame point into the left image.
    pub fn project(&self, point_cam: &Point3<f64>) -> (f64, f64) {
        let inv_z = 1.0 / point_cam.z;
        (
            self.focal_px * point_cam.x * inv_z + self.cx,
            self.focal_px * point_cam.y * inv_z + self.cy,
        )
    }

    /// Project a camera-frame point into both images as a (uL, uR, v) triple.
    ///
    /// The right camera sits at `[baseline, 0, 0]` in the left camera frame,
    /// so for rectified images the right projection shares v with the left.
    pub fn project_stereo(&self, point_cam: &Point3<f64>) -> StereoMeasurement {
        let (left_u, v) = self.project(point_cam);
        let right = Point3::new(point_cam.x - self.baseline_m, point_cam.y, point_cam.z);
        let (right_u, _) = self.project(&right);
        StereoMeasurement { left_u, right_u, v }
    }

    /// Project a world-frame point through a camera pose (camera-to-world).
    ///
    /// Returns `None` when the point lies behind the camera.
    pub fn project_stereo_from_world(
        &self,
        pose: &Isometry3<f64>,
        point_world: &Point3<f64>,
    ) -> Option<StereoMeasurement> {
        let point_cam = pose.inverse_transform_point(point_world);
        if point_cam.z <= 0.0 {
            return None;
        }
        Some(self.project_stereo(&point_cam))
    }

    /// Clamp a pixel coordinate into the valid image rectangle.
    pub fn clamp_pixel(&self, u: f64, v: f64) -> (f64, f64) {
        (
            u.clamp(0.0, (self.image_width - 1) as f64),
            v.clamp(0.0, (self.image_height - 1) as f64),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn kitti() -> Calibration {
        Calibration::new(718.856, 607.1928, 185.2157, 0.54, 1241, 376)
    }

    #[test]
    fn test_depth_from_disparity() {
        let calib = kitti();
        // Scenario from the KITTI rig: disparity 40 at focal 718, baseline 0.54
        let depth = calib.depth_from_disparity(40.0).unwrap();
        assert_abs_diff_eq!(depth, 718.856 * 0.54 / 40.0, epsilon = 1e-12);
        assert!((depth - 9.7).abs() < 0.1);
    }

    #[test]
    fn test_depth_rejects_nonpositive_disparity() {
        let calib = kitti();
        assert!(calib.depth_from_disparity(0.0).is_none());
        assert!(calib.depth_from_disparity(-3.0).is_none());
    }

    #[test]
    fn test_unproject_project_roundtrip() {
        let calib = kitti();
        let p = calib.unproject(800.0, 300.0, 9.69);
        let (u, v) = calib.project(&p);
        assert_abs_diff_eq!(u, 800.0, epsilon = 1e-9);
        assert_abs_diff_eq!(v, 300.0, epsilon = 1e-9);
    }

    #[test]
    fn test_stereo_projection_disparity() {
        let calib = kitti();
        let depth = calib.depth_from_disparity(40.0).unwrap();
        let p = calib.unproject(800.0, 300.0, depth);
        let m = calib.project_stereo(&p);

        // uR = uL - d for a rectified pair
        assert_abs_diff_eq!(m.left_u, 800.0, epsilon = 1e-9);
        assert_abs_diff_eq!(m.left_u - m.right_u, 40.0, epsilon = 1e-9);
        assert_abs_diff_eq!(m.v, 300.0, epsilon = 1e-9);
    }

    #[test]
    fn test_project_from_world_behind_camera() {
        let calib = kitti();
        let pose = Isometry3::identity();
        assert!(calib
            .project_stereo_from_world(&pose, &Point3::new(0.0, 0.0, -1.0))
            .is_none());
    }

    #[test]
    fn test_clamp_pixel() {
        let calib = kitti();
        assert_eq!(calib.clamp_pixel(-5.0, 400.0), (0.0, 375.0));
        assert_eq!(calib.clamp_pixel(2000.0, -1.0), (1240.0, 0.0));
    }
}
