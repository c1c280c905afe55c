//! Landmark identity and data association
//!
//! The registry maps stable tracker point IDs to persistent landmark IDs.
//! Association is generational: while frame i's table is being built, frame
//! i-1's table is held read-only; the new generation only replaces it once
//! the optimizer accepts the frame's increment. Landmark IDs are monotonic
//! and never reused.

use std::collections::HashMap;

use log::{debug, warn};
use nalgebra::{Isometry3, Point3};

use crate::calib::Calibration;
use crate::depth::DisparityMap;
use crate::graph::StereoMeasurement;
use crate::tracking::FrameCorrespondences;

/// Stable identity of a tracked 2D point, carried by the tracker rather
/// than re-derived from pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointId(pub u64);

/// Persistent landmark identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LandmarkId(pub u64);

/// A freshly minted landmark with its triangulated initial position.
#[derive(Debug, Clone, Copy)]
pub struct Landmark {
    pub id: LandmarkId,
    /// World-frame position estimate at creation.
    pub position: Point3<f64>,
    /// Frame index on which the landmark was minted.
    pub created_at: usize,
}

/// One accepted observation: a stereo measurement of a landmark.
#[derive(Debug, Clone, Copy)]
pub struct LandmarkObservation {
    pub landmark: LandmarkId,
    pub measurement: StereoMeasurement,
}

/// Per-frame mapping from point identity to landmark identity.
#[derive(Debug, Clone)]
pub struct AssociationTable {
    frame: usize,
    map: HashMap<PointId, LandmarkId>,
}

impl AssociationTable {
    pub fn new(frame: usize) -> Self {
        Self {
            frame,
            map: HashMap::new(),
        }
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    pub fn get(&self, point: PointId) -> Option<LandmarkId> {
        self.map.get(&point).copied()
    }

    pub fn contains(&self, point: PointId) -> bool {
        self.map.contains_key(&point)
    }

    pub fn insert(&mut self, point: PointId, landmark: LandmarkId) {
        self.map.insert(point, landmark);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PointId, LandmarkId)> + '_ {
        self.map.iter().map(|(p, l)| (*p, *l))
    }
}

/// Result of associating one frame's correspondences.
///
/// Holds the next-generation association table until [`LandmarkRegistry::commit`]
/// swaps it in; on optimizer failure the outcome stays available for
/// inspection without touching the registry.
#[derive(Debug, Clone)]
pub struct AssociationOutcome {
    pub frame: usize,
    /// Accepted observations, for both existing and freshly minted landmarks.
    pub observations: Vec<LandmarkObservation>,
    /// Landmarks minted this frame (cadence frames only).
    pub new_landmarks: Vec<Landmark>,
    /// Correspondences that matched an existing landmark.
    pub hits: usize,
    /// Dropped: disparity below the confidence threshold.
    pub dropped_low_confidence: usize,
    /// Dropped: unmatched on a non-cadence frame.
    pub dropped_off_cadence: usize,
    /// Dropped: a later correspondence claimed an already-claimed point
    /// (first-wins policy).
    pub dropped_conflicts: usize,
    table: AssociationTable,
}

impl AssociationOutcome {
    pub fn empty(frame: usize) -> Self {
        Self {
            frame,
            observations: Vec::new(),
            new_landmarks: Vec::new(),
            hits: 0,
            dropped_low_confidence: 0,
            dropped_off_cadence: 0,
            dropped_conflicts: 0,
            table: AssociationTable::new(frame),
        }
    }

    /// The next-generation association table built by this frame.
    pub fn associations(&self) -> &AssociationTable {
        &self.table
    }
}

/// Registry configuration.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct RegistryConfig {
    /// Disparity confidence threshold: candidates below it are dropped as
    /// low-confidence (not treated as a distinct invalid sentinel).
    pub min_disparity: f32,
    /// Landmark creation cadence: minting is allowed on frames where
    /// `frame % cadence_period == 1 % cadence_period`, so a period of 1
    /// allows every frame.
    pub cadence_period: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            min_disparity: 10.0,
            cadence_period: 10,
        }
    }
}

/// Associates tracked points with persistent landmarks and mints new ones.
#[derive(Debug, Clone)]
pub struct LandmarkRegistry {
    config: RegistryConfig,
    /// Next landmark ID to hand out; advanced only on commit.
    next_id: u64,
    /// Committed prior-frame table, read-only while a new one is built.
    prior: AssociationTable,
}

impl LandmarkRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        assert!(config.cadence_period > 0, "cadence period must be positive");
        Self {
            config,
            next_id: 0,
            prior: AssociationTable::new(0),
        }
    }

    /// Total landmarks minted and committed so far.
    pub fn num_landmarks(&self) -> u64 {
        self.next_id
    }

    /// The committed prior-frame association table.
    pub fn prior_associations(&self) -> &AssociationTable {
        &self.prior
    }

    /// Whether landmark creation is allowed on this frame.
    pub fn cadence_allows(&self, frame: usize) -> bool {
        frame % self.config.cadence_period == 1 % self.config.cadence_period
    }

    /// Associate one frame's correspondences against the prior table.
    ///
    /// Does not mutate the registry; the caller commits the outcome once
    /// the optimizer has accepted the frame. For each correspondence:
    /// - prior hit: emit an observation of the existing landmark,
    /// - miss on a cadence frame: mint a landmark, triangulating through
    ///   `predicted_pose`,
    /// - miss off cadence: drop.
    /// Pixels are clamped into image bounds before the disparity lookup,
    /// and low-confidence disparities drop the candidate silently.
    pub fn associate(
        &self,
        correspondences: &FrameCorrespondences,
        disparity: &DisparityMap,
        calib: &Calibration,
        predicted_pose: &Isometry3<f64>,
    ) -> AssociationOutcome {
        let frame = correspondences.frame;
        let mut outcome = AssociationOutcome::empty(frame);
        let minting_allowed = self.cadence_allows(frame);

        for corr in &correspondences.correspondences {
            let (left_u, v) = calib.clamp_pixel(corr.pixel.0 as f64, corr.pixel.1 as f64);
            let d = disparity.sample(left_u, v);
            if d < self.config.min_disparity {
                outcome.dropped_low_confidence += 1;
                continue;
            }

            let (right_u, _) = calib.clamp_pixel(left_u - d as f64, v);
            let measurement = StereoMeasurement { left_u, right_u, v };

            if outcome.table.contains(corr.curr_id) {
                // First-wins: the earlier claimant keeps the association.
                warn!(
                    "frame {frame}: point {:?} already associated, dropping later claim",
                    corr.curr_id
                );
                outcome.dropped_conflicts += 1;
                continue;
            }

            if let Some(landmark) = self.prior.get(corr.prev_id) {
                outcome.table.insert(corr.curr_id, landmark);
                outcome.observations.push(LandmarkObservation {
                    landmark,
                    measurement,
                });
                outcome.hits += 1;
                continue;
            }

            if !minting_allowed {
                outcome.dropped_off_cadence += 1;
                continue;
            }

            let Some(depth) = calib.depth_from_disparity(d as f64) else {
                outcome.dropped_low_confidence += 1;
                continue;
            };
            let point_cam = calib.unproject(left_u, v, depth);
            let position = predicted_pose.transform_point(&point_cam);
            let id = LandmarkId(self.next_id + outcome.new_landmarks.len() as u64);

            debug!(
                "frame {frame}: minted landmark {id:?} at ({:.2}, {:.2}, {:.2})",
                position.x, position.y, position.z
            );
            outcome.table.insert(corr.curr_id, id);
            outcome.new_landmarks.push(Landmark {
                id,
                position,
                created_at: frame,
            });
            outcome.observations.push(LandmarkObservation {
                landmark: id,
                measurement,
            });
        }

        debug!(
            "frame {frame}: {} observations ({} hits, {} minted), dropped {} low-confidence / {} off-cadence / {} conflicts",
            outcome.observations.len(),
            outcome.hits,
            outcome.new_landmarks.len(),
            outcome.dropped_low_confidence,
            outcome.dropped_off_cadence,
            outcome.dropped_conflicts,
        );
        outcome
    }

    /// Commit an accepted outcome: swap in the new association table and
    /// advance the landmark ID counter past the minted IDs.
    pub fn commit(&mut self, outcome: AssociationOutcome) {
        self.next_id += outcome.new_landmarks.len() as u64;
        self.prior = outcome.table;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::Correspondence;
    use approx::assert_abs_diff_eq;

    fn kitti() -> Calibration {
        Calibration::new(718.0, 607.1928, 185.2157, 0.54, 1241, 376)
    }

    fn corrs(frame: usize, items: &[(u64, u64, f32, f32)]) -> FrameCorrespondences {
        FrameCorrespondences {
            frame,
            correspondences: items
                .iter()
                .map(|&(prev, curr, x, y)| Correspondence {
                    prev_id: PointId(prev),
                    curr_id: PointId(curr),
                    pixel: (x, y),
                })
                .collect(),
        }
    }

    #[test]
    fn test_mint_on_cadence_frame_triangulates_through_predicted_pose() {
        let registry = LandmarkRegistry::new(RegistryConfig::default());
        let disparity = DisparityMap::constant(1241, 376, 40.0);
        let calib = kitti();
        let pose = Isometry3::identity();

        // Scenario B: pixel (800, 300), disparity 40, baseline 0.54, focal 718
        let outcome = registry.associate(&corrs(1, &[(0, 0, 800.0, 300.0)]), &disparity, &calib, &pose);

        assert_eq!(outcome.new_landmarks.len(), 1);
        assert_eq!(outcome.observations.len(), 1);
        let lm = &outcome.new_landmarks[0];
        let expected_depth = 718.0 * 0.54 / 40.0; // ~9.69 m
        assert_abs_diff_eq!(lm.position.z, expected_depth, epsilon = 1e-9);
        let expected = calib.unproject(800.0, 300.0, expected_depth);
        assert_abs_diff_eq!(lm.position.x, expected.x, epsilon = 1e-9);
        assert_abs_diff_eq!(lm.position.y, expected.y, epsilon = 1e-9);

        // uR = uL - d
        let m = &outcome.observations[0].measurement;
        assert_abs_diff_eq!(m.left_u - m.right_u, 40.0, epsilon = 1e-9);
    }

    #[test]
    fn test_world_transform_uses_predicted_pose() {
        let registry = LandmarkRegistry::new(RegistryConfig::default());
        let disparity = DisparityMap::constant(1241, 376, 40.0);
        let calib = kitti();
        let pose = Isometry3::translation(0.0, 0.0, 4.0);

        let outcome = registry.associate(&corrs(1, &[(0, 0, 800.0, 300.0)]), &disparity, &calib, &pose);
        let expected_depth = 718.0 * 0.54 / 40.0;
        assert_abs_diff_eq!(
            outcome.new_landmarks[0].position.z,
            expected_depth + 4.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_no_mint_off_cadence() {
        let registry = LandmarkRegistry::new(RegistryConfig::default());
        let disparity = DisparityMap::constant(1241, 376, 40.0);
        let calib = kitti();
        let pose = Isometry3::identity();

        // Scenario C: frame 2 is off the mint cadence (period 10)
        let outcome = registry.associate(&corrs(2, &[(0, 0, 800.0, 300.0)]), &disparity, &calib, &pose);

        assert!(outcome.new_landmarks.is_empty());
        assert!(outcome.observations.is_empty());
        assert_eq!(outcome.dropped_off_cadence, 1);
    }

    #[test]
    fn test_low_confidence_disparity_dropped_silently() {
        let registry = LandmarkRegistry::new(RegistryConfig::default());
        let disparity = DisparityMap::constant(1241, 376, 5.0); // below 10.0
        let calib = kitti();
        let pose = Isometry3::identity();

        let outcome = registry.associate(&corrs(1, &[(0, 0, 800.0, 300.0)]), &disparity, &calib, &pose);
        assert!(outcome.observations.is_empty());
        assert_eq!(outcome.dropped_low_confidence, 1);
    }

    #[test]
    fn test_hit_extends_existing_landmark_without_new_variable() {
        let mut registry = LandmarkRegistry::new(RegistryConfig::default());
        let disparity = DisparityMap::constant(1241, 376, 40.0);
        let calib = kitti();
        let pose = Isometry3::identity();

        let outcome = registry.associate(&corrs(1, &[(0, 0, 800.0, 300.0)]), &disparity, &calib, &pose);
        let minted = outcome.new_landmarks[0].id;
        registry.commit(outcome);

        let outcome = registry.associate(&corrs(2, &[(0, 7, 802.0, 301.0)]), &disparity, &calib, &pose);
        assert_eq!(outcome.hits, 1);
        assert!(outcome.new_landmarks.is_empty());
        assert_eq!(outcome.observations[0].landmark, minted);
        assert_eq!(outcome.associations().get(PointId(7)), Some(minted));
    }

    #[test]
    fn test_landmark_ids_strictly_increasing_across_commits() {
        let mut registry = LandmarkRegistry::new(RegistryConfig::default());
        let disparity = DisparityMap::constant(1241, 376, 40.0);
        let calib = kitti();
        let pose = Isometry3::identity();

        let outcome = registry.associate(
            &corrs(1, &[(0, 0, 100.0, 100.0), (1, 1, 500.0, 200.0)]),
            &disparity,
            &calib,
            &pose,
        );
        let ids1: Vec<u64> = outcome.new_landmarks.iter().map(|l| l.id.0).collect();
        assert_eq!(ids1, vec![0, 1]);
        registry.commit(outcome);

        // Next cadence frame mints fresh IDs continuing the sequence.
        let outcome = registry.associate(&corrs(11, &[(9, 9, 300.0, 150.0)]), &disparity, &calib, &pose);
        assert_eq!(outcome.new_landmarks[0].id.0, 2);
        registry.commit(outcome);
        assert_eq!(registry.num_landmarks(), 3);
    }

    #[test]
    fn test_duplicate_claim_first_wins() {
        let registry = LandmarkRegistry::new(RegistryConfig::default());
        let disparity = DisparityMap::constant(1241, 376, 40.0);
        let calib = kitti();
        let pose = Isometry3::identity();

        // Both correspondences target current point 5.
        let outcome = registry.associate(
            &corrs(1, &[(0, 5, 100.0, 100.0), (1, 5, 500.0, 200.0)]),
            &disparity,
            &calib,
            &pose,
        );
        assert_eq!(outcome.new_landmarks.len(), 1);
        assert_eq!(outcome.dropped_conflicts, 1);
        // The first claimant's pixel defines the landmark.
        let expected_depth = 718.0 * 0.54 / 40.0;
        let expected = calib.unproject(100.0, 100.0, expected_depth);
        assert_abs_diff_eq!(outcome.new_landmarks[0].position.x, expected.x, epsilon = 1e-9);
    }

    #[test]
    fn test_pixel_clamped_before_lookup() {
        let registry = LandmarkRegistry::new(RegistryConfig::default());
        // Disparity valid only along the right edge.
        let disparity = DisparityMap::from_fn(1241, 376, |x, _| if x >= 1240 { 40.0 } else { 0.0 });
        let calib = kitti();
        let pose = Isometry3::identity();

        // Pixel beyond the right edge clamps to column 1240 and succeeds.
        let outcome = registry.associate(&corrs(1, &[(0, 0, 1300.0, 100.0)]), &disparity, &calib, &pose);
        assert_eq!(outcome.observations.len(), 1);
        assert_abs_diff_eq!(outcome.observations[0].measurement.left_u, 1240.0);
    }

    #[test]
    fn test_association_accounting_is_exhaustive() {
        use rand::{Rng, SeedableRng};

        let registry = LandmarkRegistry::new(RegistryConfig::default());
        // Disparity varies by column so both gate outcomes occur.
        let disparity = DisparityMap::from_fn(1241, 376, |x, _| (x % 60) as f32);
        let calib = kitti();
        let pose = Isometry3::identity();

        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(7);
        let items: Vec<(u64, u64, f32, f32)> = (0..200)
            .map(|i| {
                (
                    i,
                    i % 150, // forces some duplicate current-point claims
                    rng.gen_range(0.0..1400.0),
                    rng.gen_range(0.0..400.0),
                )
            })
            .collect();

        let outcome = registry.associate(&corrs(1, &items), &disparity, &calib, &pose);

        // Every correspondence lands in exactly one bucket.
        let accounted = outcome.observations.len()
            + outcome.dropped_low_confidence
            + outcome.dropped_off_cadence
            + outcome.dropped_conflicts;
        assert_eq!(accounted, 200);
        assert!(outcome.dropped_conflicts > 0);

        // Minted IDs are dense and sequential.
        for (k, lm) in outcome.new_landmarks.iter().enumerate() {
            assert_eq!(lm.id.0, k as u64);
        }
    }

    #[test]
    fn test_cadence_period_one_allows_every_frame() {
        let registry = LandmarkRegistry::new(RegistryConfig {
            min_disparity: 10.0,
            cadence_period: 1,
        });
        for frame in 1..5 {
            assert!(registry.cadence_allows(frame));
        }
    }
}
