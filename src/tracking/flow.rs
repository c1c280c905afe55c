//! Propagated tracking via pyramidal Lucas-Kanade
//!
//! Points are carried forward frame to frame by optical flow. A point that
//! fails to propagate flips Tracked → Lost and never recovers. New points
//! are added only on replenishment frames, and only where they keep a
//! minimum distance to the points already tracked.

use image::GrayImage;
use log::{debug, info};

use crate::depth::DisparityMap;
use crate::keypoints::{KeyPoint, KeypointProvider};
use crate::registry::PointId;
use crate::tracking::{
    Correspondence, FeatureTracker, FrameCorrespondences, PointStatus, TrackedPoint,
};

/// Pyramidal Lucas-Kanade parameters.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct LkParams {
    /// Half-width of the tracking window (full window is 2*half+1).
    pub window_half: i32,
    /// Total pyramid levels including the base image.
    pub pyramid_levels: usize,
    /// Iterations per level.
    pub max_iterations: usize,
    /// Convergence threshold on the per-iteration step (pixels).
    pub epsilon: f32,
    /// Minimum eigenvalue of the structure tensor for a trackable window.
    pub min_eigenvalue: f32,
}

impl Default for LkParams {
    fn default() -> Self {
        Self {
            window_half: 7,
            pyramid_levels: 3,
            max_iterations: 10,
            epsilon: 0.03,
            min_eigenvalue: 1e-3,
        }
    }
}

/// Bilinear sample with clamping to the image rectangle.
fn sample(image: &GrayImage, x: f32, y: f32) -> f32 {
    let (w, h) = image.dimensions();
    let clamp_x = |v: i64| v.clamp(0, w as i64 - 1) as u32;
    let clamp_y = |v: i64| v.clamp(0, h as i64 - 1) as u32;

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x.floor();
    let fy = y - y.floor();

    let p00 = image.get_pixel(clamp_x(x0), clamp_y(y0)).0[0] as f32;
    let p10 = image.get_pixel(clamp_x(x0 + 1), clamp_y(y0)).0[0] as f32;
    let p01 = image.get_pixel(clamp_x(x0), clamp_y(y0 + 1)).0[0] as f32;
    let p11 = image.get_pixel(clamp_x(x0 + 1), clamp_y(y0 + 1)).0[0] as f32;

    let top = p00 * (1.0 - fx) + p10 * fx;
    let bottom = p01 * (1.0 - fx) + p11 * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Halve an image with a 2x2 box filter.
fn downsample(image: &GrayImage) -> GrayImage {
    let (w, h) = image.dimensions();
    let (nw, nh) = ((w / 2).max(1), (h / 2).max(1));
    GrayImage::from_fn(nw, nh, |x, y| {
        let sx = (x * 2).min(w - 1);
        let sy = (y * 2).min(h - 1);
        let sx1 = (sx + 1).min(w - 1);
        let sy1 = (sy + 1).min(h - 1);
        let sum = image.get_pixel(sx, sy).0[0] as u32
            + image.get_pixel(sx1, sy).0[0] as u32
            + image.get_pixel(sx, sy1).0[0] as u32
            + image.get_pixel(sx1, sy1).0[0] as u32;
        image::Luma([((sum + 2) / 4) as u8])
    })
}

fn build_pyramid(image: &GrayImage, levels: usize) -> Vec<GrayImage> {
    let mut pyramid = vec![image.clone()];
    for _ in 1..levels {
        pyramid.push(downsample(pyramid.last().expect("non-empty pyramid")));
    }
    pyramid
}

/// Coarse-to-fine Lucas-Kanade flow for sparse points.
#[derive(Debug, Clone)]
pub struct PyramidalLk {
    params: LkParams,
}

impl PyramidalLk {
    pub fn new(params: LkParams) -> Self {
        Self { params }
    }

    /// Track points from `prev` to `next`. Returns the new position per
    /// point, or `None` where propagation failed.
    pub fn track(
        &self,
        prev: &GrayImage,
        next: &GrayImage,
        points: &[(f32, f32)],
    ) -> Vec<Option<(f32, f32)>> {
        let prev_pyr = build_pyramid(prev, self.params.pyramid_levels);
        let next_pyr = build_pyramid(next, self.params.pyramid_levels);
        points
            .iter()
            .map(|&p| self.track_point(&prev_pyr, &next_pyr, p))
            .collect()
    }

    fn track_point(
        &self,
        prev_pyr: &[GrayImage],
        next_pyr: &[GrayImage],
        point: (f32, f32),
    ) -> Option<(f32, f32)> {
        let mut flow = (0.0f32, 0.0f32);
        for level in (0..prev_pyr.len()).rev() {
            let scale = (1u32 << level) as f32;
            let base = (point.0 / scale, point.1 / scale);
            flow = self.refine_at_level(&prev_pyr[level], &next_pyr[level], base, flow)?;
            if level > 0 {
                flow = (flow.0 * 2.0, flow.1 * 2.0);
            }
        }

        let (w, h) = prev_pyr[0].dimensions();
        let result = (point.0 + flow.0, point.1 + flow.1);
        let in_bounds =
            result.0 >= 0.0 && result.1 >= 0.0 && result.0 < w as f32 && result.1 < h as f32;
        in_bounds.then_some(result)
    }

    /// One level of iterative LK. `init_flow` comes from the coarser level;
    /// the returned flow is relative to `base`.
    fn refine_at_level(
        &self,
        prev: &GrayImage,
        next: &GrayImage,
        base: (f32, f32),
        init_flow: (f32, f32),
    ) -> Option<(f32, f32)> {
        let win = self.params.window_half;
        let (w, h) = prev.dimensions();
        let margin = win as f32 + 1.0;
        if base.0 < margin
            || base.1 < margin
            || base.0 >= w as f32 - margin
            || base.1 >= h as f32 - margin
        {
            return None;
        }

        // Template gradients and structure tensor, fixed for the level.
        let n = (2 * win + 1) * (2 * win + 1);
        let mut grad = Vec::with_capacity(n as usize);
        let (mut gxx, mut gyy, mut gxy) = (0.0f32, 0.0f32, 0.0f32);
        for dy in -win..=win {
            for dx in -win..=win {
                let px = base.0 + dx as f32;
                let py = base.1 + dy as f32;
                let ix = (sample(prev, px + 1.0, py) - sample(prev, px - 1.0, py)) * 0.5;
                let iy = (sample(prev, px, py + 1.0) - sample(prev, px, py - 1.0)) * 0.5;
                grad.push((ix, iy));
                gxx += ix * ix;
                gyy += iy * iy;
                gxy += ix * iy;
            }
        }

        let trace = gxx + gyy;
        let det = gxx * gyy - gxy * gxy;
        let min_eig = (trace - ((trace * trace - 4.0 * det).max(0.0)).sqrt()) * 0.5;
        let norm = n as f32;
        if min_eig / norm < self.params.min_eigenvalue || det.abs() < 1e-8 {
            return None;
        }

        let mut cur = (base.0 + init_flow.0, base.1 + init_flow.1);
        for _ in 0..self.params.max_iterations {
            if cur.0 < margin
                || cur.1 < margin
                || cur.0 >= w as f32 - margin
                || cur.1 >= h as f32 - margin
            {
                return None;
            }

            let (mut bx, mut by) = (0.0f32, 0.0f32);
            let mut idx = 0;
            for dy in -win..=win {
                for dx in -win..=win {
                    let dt = sample(prev, base.0 + dx as f32, base.1 + dy as f32)
                        - sample(next, cur.0 + dx as f32, cur.1 + dy as f32);
                    let (ix, iy) = grad[idx];
                    bx += ix * dt;
                    by += iy * dt;
                    idx += 1;
                }
            }

            let step_x = (gyy * bx - gxy * by) / det;
            let step_y = (gxx * by - gxy * bx) / det;
            cur.0 += step_x;
            cur.1 += step_y;

            if step_x * step_x + step_y * step_y
                < self.params.epsilon * self.params.epsilon
            {
                break;
            }
        }

        Some((cur.0 - base.0, cur.1 - base.1))
    }
}

/// Configuration for the propagated tracker.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct PropagatedTrackerConfig {
    /// Maximum number of simultaneously tracked points.
    pub max_points: usize,
    /// Replenishment runs on frames where `frame % replenish_period == 0`.
    pub replenish_period: usize,
    /// A new point must keep this distance to every tracked point (pixels).
    pub min_distance_px: f32,
    /// Disparity confidence gate at the candidate's pixel.
    pub min_disparity: f32,
    pub lk: LkParams,
}

impl Default for PropagatedTrackerConfig {
    fn default() -> Self {
        Self {
            max_points: 500,
            replenish_period: 10,
            min_distance_px: 30.0,
            min_disparity: 10.0,
            lk: LkParams::default(),
        }
    }
}

/// Optical-flow feature tracker with persistent point identities.
pub struct PropagatedTracker {
    config: PropagatedTrackerConfig,
    flow: PyramidalLk,
    detector: Box<dyn KeypointProvider>,
    points: Vec<TrackedPoint>,
    prev_left: Option<GrayImage>,
    next_id: u64,
}

impl PropagatedTracker {
    pub fn new(config: PropagatedTrackerConfig, detector: Box<dyn KeypointProvider>) -> Self {
        Self {
            flow: PyramidalLk::new(config.lk),
            config,
            detector,
            points: Vec::new(),
            prev_left: None,
            next_id: 0,
        }
    }

    /// All points the tracker has ever owned, with their current status.
    pub fn points(&self) -> &[TrackedPoint] {
        &self.points
    }

    fn fresh_id(&mut self) -> PointId {
        let id = PointId(self.next_id);
        self.next_id += 1;
        id
    }

    fn num_tracked(&self) -> usize {
        self.points
            .iter()
            .filter(|p| p.status == PointStatus::Tracked)
            .count()
    }

    /// Detect candidates and keep those passing the disparity and spacing
    /// gates. Used for both initial seeding and replenishment.
    fn add_new_points(&mut self, left: &GrayImage, disparity: &DisparityMap) -> usize {
        let (candidates, _descriptors) = self.detector.detect(left);
        let mut added = 0;
        for kp in candidates {
            if self.num_tracked() >= self.config.max_points {
                break;
            }
            if disparity.sample(kp.x as f64, kp.y as f64) < self.config.min_disparity {
                continue;
            }
            let too_close = self.points.iter().any(|p| {
                p.status == PointStatus::Tracked
                    && KeyPoint::new(p.pixel.0, p.pixel.1).distance_to(&kp)
                        < self.config.min_distance_px
            });
            if too_close {
                continue;
            }
            let id = self.fresh_id();
            self.points.push(TrackedPoint {
                id,
                pixel: (kp.x, kp.y),
                status: PointStatus::Tracked,
            });
            added += 1;
        }
        added
    }
}

impl FeatureTracker for PropagatedTracker {
    fn advance(
        &mut self,
        frame: usize,
        left: &GrayImage,
        disparity: &DisparityMap,
    ) -> FrameCorrespondences {
        let mut out = FrameCorrespondences::empty(frame);

        let Some(prev_left) = self.prev_left.take() else {
            let added = self.add_new_points(left, disparity);
            info!("frame {frame}: seeded {added} points");
            self.prev_left = Some(left.clone());
            return out;
        };

        // Propagate only the points still tracked.
        let active: Vec<usize> = self
            .points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.status == PointStatus::Tracked)
            .map(|(i, _)| i)
            .collect();
        let positions: Vec<(f32, f32)> = active.iter().map(|&i| self.points[i].pixel).collect();
        let results = self.flow.track(&prev_left, left, &positions);

        let mut lost = 0;
        for (&i, result) in active.iter().zip(results.iter()) {
            match result {
                Some(pos) => {
                    self.points[i].pixel = *pos;
                    out.correspondences.push(Correspondence {
                        prev_id: self.points[i].id,
                        curr_id: self.points[i].id,
                        pixel: *pos,
                    });
                }
                None => {
                    // Terminal: the point is never tracked again.
                    self.points[i].status = PointStatus::Lost;
                    lost += 1;
                }
            }
        }
        if lost > 0 {
            debug!("frame {frame}: lost {lost} points");
        }

        if self.config.replenish_period > 0 && frame % self.config.replenish_period == 0 {
            let added = self.add_new_points(left, disparity);
            if added > 0 {
                debug!("frame {frame}: replenished {added} points");
            }
        }

        self.prev_left = Some(left.clone());
        out
    }
}
