//! Detect-and-match tracking
//!
//! Every frame re-detects keypoints and links them to the previous frame by
//! descriptor matching with the nearest/second-nearest ratio test. Each
//! detection generation carries fresh point IDs; correspondences bridge the
//! two generations.

use image::GrayImage;
use log::debug;
use std::collections::HashSet;

use crate::depth::DisparityMap;
use crate::keypoints::{ratio_filter, Descriptor, KeyPoint, KeypointProvider, DEFAULT_RATIO};
use crate::registry::PointId;
use crate::tracking::{Correspondence, FeatureTracker, FrameCorrespondences};

/// Descriptor-matching feature tracker.
///
/// Unlike propagated tracking there is no persistent point set; identity
/// lives only in the correspondence pairs, and the association table carries
/// it forward across frames.
pub struct DetectMatchTracker {
    provider: Box<dyn KeypointProvider>,
    ratio: f32,
    /// Previous generation: keypoints, descriptors, and their IDs.
    prev: Option<(Vec<KeyPoint>, Vec<Descriptor>, Vec<PointId>)>,
    next_id: u64,
}

impl DetectMatchTracker {
    pub fn new(provider: Box<dyn KeypointProvider>) -> Self {
        Self::with_ratio(provider, DEFAULT_RATIO)
    }

    pub fn with_ratio(provider: Box<dyn KeypointProvider>, ratio: f32) -> Self {
        Self {
            provider,
            ratio,
            prev: None,
            next_id: 0,
        }
    }

    /// Detect, collapse duplicate detections at identical pixels, and
    /// assign fresh IDs to the surviving keypoints.
    fn detect_generation(
        &mut self,
        image: &GrayImage,
    ) -> (Vec<KeyPoint>, Vec<Descriptor>, Vec<PointId>) {
        let (raw_kps, raw_descs) = self.provider.detect(image);

        let mut seen = HashSet::new();
        let mut keypoints = Vec::with_capacity(raw_kps.len());
        let mut descriptors = Vec::with_capacity(raw_descs.len());
        for (kp, desc) in raw_kps.into_iter().zip(raw_descs) {
            // Detectors may emit several orientations of the same corner;
            // keep the first per exact pixel location.
            if seen.insert((kp.x.to_bits(), kp.y.to_bits())) {
                keypoints.push(kp);
                descriptors.push(desc);
            }
        }

        let ids: Vec<PointId> = keypoints
            .iter()
            .map(|_| {
                let id = PointId(self.next_id);
                self.next_id += 1;
                id
            })
            .collect();
        (keypoints, descriptors, ids)
    }
}

impl FeatureTracker for DetectMatchTracker {
    fn advance(
        &mut self,
        frame: usize,
        left: &GrayImage,
        _disparity: &DisparityMap,
    ) -> FrameCorrespondences {
        let (keypoints, descriptors, ids) = self.detect_generation(left);
        let mut out = FrameCorrespondences::empty(frame);

        if let Some((_prev_kps, prev_descs, prev_ids)) = self.prev.take() {
            let groups = self.provider.knn_match(&prev_descs, &descriptors, 2);
            let good = ratio_filter(&groups, self.ratio);

            // A keypoint in either generation may belong to at most one
            // correspondence; keep the first claim per side.
            let mut used_curr = HashSet::new();
            let mut used_prev = HashSet::new();
            for m in good {
                if !used_curr.insert(m.train_idx) || !used_prev.insert(m.query_idx) {
                    continue;
                }
                let kp = keypoints[m.train_idx];
                out.correspondences.push(Correspondence {
                    prev_id: prev_ids[m.query_idx],
                    curr_id: ids[m.train_idx],
                    pixel: (kp.x, kp.y),
                });
            }
            debug!(
                "frame {frame}: {} detections, {} matched",
                keypoints.len(),
                out.len()
            );
        }

        self.prev = Some((keypoints, descriptors, ids));
        out
    }
}
