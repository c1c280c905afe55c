//! Feature lifecycle and frame-to-frame tracking
//!
//! Two interchangeable strategies produce the same output: a list of
//! correspondences carrying stable point identities. `flow` propagates
//! points with pyramidal optical flow; `matching` re-detects every frame
//! and matches descriptors. Status updates are the only mutation of shared
//! tracker state.

pub mod flow;
pub mod matching;

use image::GrayImage;

pub use flow::{LkParams, PropagatedTracker, PropagatedTrackerConfig};
pub use matching::DetectMatchTracker;

use crate::depth::DisparityMap;
use crate::registry::PointId;

/// Tracking status of a 2D point. The Tracked → Lost transition is
/// irreversible: once propagation fails, the previous position can no
/// longer be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointStatus {
    Tracked,
    Lost,
}

/// An active 2D point owned by the tracker.
#[derive(Debug, Clone, Copy)]
pub struct TrackedPoint {
    pub id: PointId,
    /// Current pixel position in the left image.
    pub pixel: (f32, f32),
    pub status: PointStatus,
}

/// One frame-to-frame correspondence.
///
/// For propagated tracking `prev_id == curr_id` (the point persists); for
/// detect+match each frame's detections get fresh IDs and the pair links
/// the two generations.
#[derive(Debug, Clone, Copy)]
pub struct Correspondence {
    pub prev_id: PointId,
    pub curr_id: PointId,
    /// Position in the current left image.
    pub pixel: (f32, f32),
}

/// All correspondences produced for one frame.
#[derive(Debug, Clone)]
pub struct FrameCorrespondences {
    pub frame: usize,
    pub correspondences: Vec<Correspondence>,
}

impl FrameCorrespondences {
    pub fn empty(frame: usize) -> Self {
        Self {
            frame,
            correspondences: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.correspondences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.correspondences.is_empty()
    }
}

/// A frame-to-frame tracking strategy.
///
/// `advance` consumes the new left image (and the frame's disparity, used
/// by strategies that gate replenishment on depth confidence) and returns
/// the surviving correspondences. The first call seeds the tracker and
/// returns an empty set.
pub trait FeatureTracker {
    fn advance(
        &mut self,
        frame: usize,
        left: &GrayImage,
        disparity: &DisparityMap,
    ) -> FrameCorrespondences;
}
