//! Dense disparity as an external depth-sensor abstraction
//!
//! The front end never computes disparity itself; it consumes a dense map
//! produced by a [`DepthProvider`] (in production, semi-global block
//! matching over the rectified pair). Values below the confidence threshold
//! are low-confidence measurements, not a distinct invalid sentinel — the
//! registry gates on them but the map does not.

use image::GrayImage;

/// Parameters for a semi-global block-matching disparity provider.
///
/// These mirror the usual SGBM knobs; the defaults are tuned for a KITTI
/// style rig. The provider contract: output has the same dimensions as the
/// input, in pixel units.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct SgbmParams {
    /// Minimum disparity considered (pixels).
    pub min_disparity: i32,
    /// Disparity search range (pixels, multiple of 16 for most backends).
    pub num_disparities: i32,
    /// Matching block size (odd).
    pub block_size: i32,
    /// Smoothness penalty for +-1 disparity changes.
    pub p1: i32,
    /// Smoothness penalty for larger disparity changes.
    pub p2: i32,
    /// Margin (%) by which the best cost must beat the second best.
    pub uniqueness_ratio: i32,
    /// Maximum speckle region size to invalidate (pixels).
    pub speckle_window_size: i32,
    /// Maximum disparity variation within a speckle region.
    pub speckle_range: i32,
}

impl Default for SgbmParams {
    fn default() -> Self {
        Self {
            min_disparity: 0,
            num_disparities: 64,
            block_size: 9,
            p1: 8 * 9 * 9,
            p2: 32 * 9 * 9,
            uniqueness_ratio: 10,
            speckle_window_size: 100,
            speckle_range: 32,
        }
    }
}

/// External collaborator producing dense disparity from a rectified pair.
pub trait DepthProvider {
    /// Compute a disparity map with the same dimensions as the inputs.
    fn compute(&mut self, left: &GrayImage, right: &GrayImage) -> DisparityMap;
}

/// Dense per-pixel disparity, row-major f32.
///
/// Owned transiently by the frame being processed; the front end drops it
/// once associations are built.
#[derive(Debug, Clone)]
pub struct DisparityMap {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl DisparityMap {
    /// Build from raw row-major data. Panics if the length does not match.
    pub fn from_raw(width: u32, height: u32, data: Vec<f32>) -> Self {
        assert_eq!(
            data.len(),
            (width * height) as usize,
            "disparity buffer size mismatch"
        );
        Self {
            width,
            height,
            data,
        }
    }

    /// Build by evaluating `f(x, y)` at every pixel.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> f32) -> Self {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Uniform disparity everywhere (handy for synthetic scenes).
    pub fn constant(width: u32, height: u32, value: f32) -> Self {
        Self::from_fn(width, height, |_, _| value)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Disparity at an integer pixel. Panics if out of bounds.
    pub fn at(&self, x: u32, y: u32) -> f32 {
        assert!(x < self.width && y < self.height, "pixel out of bounds");
        self.data[(y * self.width + x) as usize]
    }

    /// Disparity at a real-valued pixel, clamped into the image rectangle.
    ///
    /// Matches the lookup used for feature pixels: truncate to the nearest
    /// lower integer after clamping, no interpolation.
    pub fn sample(&self, u: f64, v: f64) -> f32 {
        let x = (u.max(0.0) as u32).min(self.width - 1);
        let y = (v.max(0.0) as u32).min(self.height - 1);
        self.at(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_fn_layout() {
        let map = DisparityMap::from_fn(4, 3, |x, y| (y * 10 + x) as f32);
        assert_eq!(map.at(0, 0), 0.0);
        assert_eq!(map.at(3, 0), 3.0);
        assert_eq!(map.at(0, 2), 20.0);
        assert_eq!(map.at(3, 2), 23.0);
    }

    #[test]
    fn test_sample_clamps_to_bounds() {
        let map = DisparityMap::from_fn(4, 3, |x, y| (y * 10 + x) as f32);
        assert_eq!(map.sample(-2.0, -2.0), 0.0);
        assert_eq!(map.sample(100.0, 100.0), 23.0);
        assert_eq!(map.sample(1.9, 0.2), 1.0);
    }

    #[test]
    fn test_default_sgbm_params() {
        let params = SgbmParams::default();
        assert_eq!(params.num_disparities, 64);
        assert_eq!(params.p1, 648);
        assert_eq!(params.p2, 2592);
    }

    #[test]
    #[should_panic(expected = "size mismatch")]
    fn test_from_raw_rejects_bad_length() {
        DisparityMap::from_raw(4, 3, vec![0.0; 5]);
    }
}
