//! Keypoint detection and descriptor matching abstraction
//!
//! Raw detection and descriptor matching live behind [`KeypointProvider`];
//! the front end only consumes (pixel, descriptor) sets and k-nearest
//! candidate matches. The ratio-test filter lives here because every
//! matching strategy shares it.

/// A detected 2D feature location (pixels, left image).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    pub x: f32,
    pub y: f32,
}

impl KeyPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another keypoint, in pixels.
    pub fn distance_to(&self, other: &KeyPoint) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Opaque descriptor vector produced by the detector.
pub type Descriptor = Vec<f32>;

/// One candidate correspondence from k-nearest-neighbour matching.
#[derive(Debug, Clone, Copy)]
pub struct MatchCandidate {
    /// Index into the query descriptor set.
    pub query_idx: usize,
    /// Index into the train descriptor set.
    pub train_idx: usize,
    /// Descriptor-space distance (smaller is better).
    pub distance: f32,
}

/// External collaborator for detection and descriptor matching.
pub trait KeypointProvider {
    /// Detect keypoints and compute descriptors in one pass.
    ///
    /// The two vectors are parallel: `descriptors[i]` belongs to
    /// `keypoints[i]`. Duplicate detections at identical pixel locations
    /// may be returned; callers collapse them.
    fn detect(&mut self, image: &image::GrayImage) -> (Vec<KeyPoint>, Vec<Descriptor>);

    /// For each query descriptor, return up to `k` nearest train
    /// descriptors ordered by ascending distance.
    fn knn_match(
        &self,
        query: &[Descriptor],
        train: &[Descriptor],
        k: usize,
    ) -> Vec<Vec<MatchCandidate>>;
}

/// Default Lowe ratio: reject a match unless its distance is below
/// `ratio * second_best_distance`.
pub const DEFAULT_RATIO: f32 = 0.7;

/// Apply the nearest/second-nearest ratio test to knn output.
///
/// Groups with fewer than two candidates are kept only if they have exactly
/// one candidate (no ambiguity to measure). Returns the surviving best
/// candidates.
pub fn ratio_filter(groups: &[Vec<MatchCandidate>], ratio: f32) -> Vec<MatchCandidate> {
    let mut good = Vec::new();
    for group in groups {
        match group.as_slice() {
            [] => {}
            [only] => good.push(*only),
            [best, second, ..] => {
                if best.distance < ratio * second.distance {
                    good.push(*best);
                }
            }
        }
    }
    good
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(query_idx: usize, train_idx: usize, distance: f32) -> MatchCandidate {
        MatchCandidate {
            query_idx,
            train_idx,
            distance,
        }
    }

    #[test]
    fn test_ratio_filter_rejects_ambiguous() {
        let groups = vec![
            vec![cand(0, 1, 10.0), cand(0, 2, 100.0)], // clear winner
            vec![cand(1, 3, 50.0), cand(1, 4, 55.0)],  // ambiguous
        ];
        let good = ratio_filter(&groups, DEFAULT_RATIO);
        assert_eq!(good.len(), 1);
        assert_eq!(good[0].train_idx, 1);
    }

    #[test]
    fn test_ratio_filter_single_candidate_kept() {
        let groups = vec![vec![cand(0, 7, 42.0)], vec![]];
        let good = ratio_filter(&groups, DEFAULT_RATIO);
        assert_eq!(good.len(), 1);
        assert_eq!(good[0].train_idx, 7);
    }

    #[test]
    fn test_keypoint_distance() {
        let a = KeyPoint::new(0.0, 0.0);
        let b = KeyPoint::new(3.0, 4.0);
        assert_eq!(a.distance_to(&b), 5.0);
    }
}
