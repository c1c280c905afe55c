//! Optimizer boundary: adapter trait, bounded estimates, and a
//! bookkeeping fixed-lag smoother.
//!
//! The real nonlinear solver lives outside this crate. [`OptimizerAdapter`]
//! is the seam: it consumes one [`GraphIncrement`] per frame and returns the
//! current in-window estimate. [`WarmStartSmoother`] is an in-process
//! stand-in that performs the fixed-lag bookkeeping (insertion, timestamp
//! registration, eviction) and reports the warm-start values unoptimized;
//! it keeps tests and offline runs independent of a solver backend.

use std::collections::HashMap;

use log::debug;
use nalgebra::{Isometry3, Point3};

use crate::error::OptimizerError;
use crate::graph::{GraphIncrement, Value, VariableKey};
use crate::registry::LandmarkId;

/// The optimizer's current estimate, bounded to its smoothing window.
///
/// Variables evicted from the window are absent; consumers must merge
/// successive estimates to retain history.
#[derive(Debug, Clone, Default)]
pub struct BoundedEstimate {
    values: HashMap<VariableKey, Value>,
}

impl BoundedEstimate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: VariableKey, value: Value) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: &VariableKey) -> Option<&Value> {
        self.values.get(key)
    }

    /// Pose estimate for a frame, if still in the window.
    pub fn pose(&self, frame: usize) -> Option<&Isometry3<f64>> {
        self.values.get(&VariableKey::Pose(frame))?.as_pose()
    }

    /// Landmark estimate, if still in the window.
    pub fn point(&self, landmark: LandmarkId) -> Option<&Point3<f64>> {
        self.values.get(&VariableKey::Landmark(landmark))?.as_point()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VariableKey, &Value)> {
        self.values.iter()
    }
}

/// Seam to the external fixed-lag optimizer.
///
/// `update` is not idempotent: each increment mutates backend state, so an
/// increment must be submitted exactly once and never retried after an
/// error. On failure the backend is assumed corrupt and the session is
/// done; construct a fresh adapter to start over.
pub trait OptimizerAdapter {
    fn update(&mut self, increment: &GraphIncrement) -> Result<BoundedEstimate, OptimizerError>;
}

/// Fixed-lag bookkeeping smoother.
///
/// Applies each increment's values and timestamps, evicts timestamped keys
/// older than `latest - lag`, and returns the surviving values. Landmark
/// keys carry no timestamps and are retained for the life of the session.
#[derive(Debug, Clone)]
pub struct WarmStartSmoother {
    lag: f64,
    values: HashMap<VariableKey, Value>,
    timestamps: HashMap<VariableKey, f64>,
    latest: f64,
}

impl Default for WarmStartSmoother {
    fn default() -> Self {
        Self::new(5.0)
    }
}

impl WarmStartSmoother {
    /// `lag` is the window length in the timestamp unit (seconds, or frame
    /// counts if the caller timestamps by index).
    pub fn new(lag: f64) -> Self {
        Self {
            lag,
            values: HashMap::new(),
            timestamps: HashMap::new(),
            latest: f64::NEG_INFINITY,
        }
    }

    pub fn lag(&self) -> f64 {
        self.lag
    }

    /// Number of variables currently in the window.
    pub fn num_variables(&self) -> usize {
        self.values.len()
    }

    fn evict_stale(&mut self) {
        let horizon = self.latest - self.lag;
        let stale: Vec<VariableKey> = self
            .timestamps
            .iter()
            .filter(|(_, &t)| t < horizon)
            .map(|(&k, _)| k)
            .collect();
        for key in stale {
            self.values.remove(&key);
            self.timestamps.remove(&key);
            debug!("evicted {key:?} from the smoothing window");
        }
    }
}

impl OptimizerAdapter for WarmStartSmoother {
    fn update(&mut self, increment: &GraphIncrement) -> Result<BoundedEstimate, OptimizerError> {
        for (key, value) in &increment.new_values {
            self.values.insert(*key, *value);
        }
        for (key, timestamp) in &increment.timestamps {
            self.timestamps.insert(*key, *timestamp);
            if *timestamp > self.latest {
                self.latest = *timestamp;
            }
        }
        self.evict_stale();

        let mut estimate = BoundedEstimate::new();
        for (key, value) in &self.values {
            estimate.insert(*key, *value);
        }
        Ok(estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn pose_increment(frame: usize, timestamp: f64, z: f64) -> GraphIncrement {
        GraphIncrement {
            prior: None,
            factors: Vec::new(),
            new_values: vec![(
                VariableKey::Pose(frame),
                Value::Pose(Isometry3::translation(0.0, 0.0, z)),
            )],
            timestamps: vec![(VariableKey::Pose(frame), timestamp)],
        }
    }

    #[test]
    fn test_poses_survive_within_lag() {
        let mut smoother = WarmStartSmoother::new(5.0);
        smoother.update(&pose_increment(0, 0.0, 0.0)).unwrap();
        let estimate = smoother.update(&pose_increment(1, 1.0, 2.0)).unwrap();

        assert!(estimate.pose(0).is_some());
        assert_abs_diff_eq!(estimate.pose(1).unwrap().translation.z, 2.0);
    }

    #[test]
    fn test_old_poses_evicted_past_lag() {
        let mut smoother = WarmStartSmoother::new(5.0);
        for frame in 0..10 {
            smoother
                .update(&pose_increment(frame, frame as f64, 2.0 * frame as f64))
                .unwrap();
        }
        let estimate = smoother.update(&pose_increment(10, 10.0, 20.0)).unwrap();

        assert!(estimate.pose(4).is_none());
        assert!(estimate.pose(5).is_some());
        assert!(estimate.pose(10).is_some());
    }

    #[test]
    fn test_landmarks_never_evicted() {
        let mut smoother = WarmStartSmoother::new(2.0);
        let mut inc = pose_increment(0, 0.0, 0.0);
        inc.new_values.push((
            VariableKey::Landmark(LandmarkId(7)),
            Value::Point(Point3::new(1.0, 2.0, 30.0)),
        ));
        smoother.update(&inc).unwrap();

        for frame in 1..8 {
            smoother
                .update(&pose_increment(frame, frame as f64, 0.0))
                .unwrap();
        }
        let estimate = smoother.update(&pose_increment(8, 8.0, 0.0)).unwrap();

        assert!(estimate.pose(0).is_none());
        assert!(estimate.point(LandmarkId(7)).is_some());
    }
}
