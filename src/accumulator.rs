//! Persistent accumulation of bounded optimizer estimates.

use std::collections::BTreeMap;

use nalgebra::Point3;

use crate::graph::{Value, VariableKey};
use crate::optimizer::BoundedEstimate;
use crate::registry::LandmarkId;

/// Full-session trajectory and map, folded together from the optimizer's
/// window-bounded estimates.
///
/// Merging overwrites or inserts, never deletes: a variable evicted from
/// the smoothing window keeps its last in-window value here.
#[derive(Debug, Clone, Default)]
pub struct ResultAccumulator {
    values: BTreeMap<VariableKey, Value>,
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, estimate: &BoundedEstimate) {
        for (key, value) in estimate.iter() {
            self.values.insert(*key, *value);
        }
    }

    pub fn get(&self, key: &VariableKey) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Camera positions in frame order.
    pub fn trajectory(&self) -> Vec<(usize, Point3<f64>)> {
        self.values
            .iter()
            .filter_map(|(key, value)| match (key, value) {
                (VariableKey::Pose(frame), Value::Pose(pose)) => {
                    Some((*frame, Point3::from(pose.translation.vector)))
                }
                _ => None,
            })
            .collect()
    }

    /// Landmark positions in ID order.
    pub fn landmarks(&self) -> Vec<(LandmarkId, Point3<f64>)> {
        self.values
            .iter()
            .filter_map(|(key, value)| match (key, value) {
                (VariableKey::Landmark(id), Value::Point(p)) => Some((*id, *p)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::Isometry3;

    fn estimate(entries: &[(VariableKey, Value)]) -> BoundedEstimate {
        let mut e = BoundedEstimate::new();
        for (key, value) in entries {
            e.insert(*key, *value);
        }
        e
    }

    #[test]
    fn test_merge_keeps_evicted_variables() {
        let mut acc = ResultAccumulator::new();
        acc.merge(&estimate(&[(
            VariableKey::Pose(0),
            Value::Pose(Isometry3::identity()),
        )]));
        // Pose 0 has left the window; the next estimate only holds pose 1.
        acc.merge(&estimate(&[(
            VariableKey::Pose(1),
            Value::Pose(Isometry3::translation(0.0, 0.0, 2.0)),
        )]));

        let traj = acc.trajectory();
        assert_eq!(traj.len(), 2);
        assert_eq!(traj[0].0, 0);
        assert_abs_diff_eq!(traj[1].1.z, 2.0);
    }

    #[test]
    fn test_merge_overwrites_refined_values() {
        let mut acc = ResultAccumulator::new();
        let key = VariableKey::Landmark(LandmarkId(3));
        acc.merge(&estimate(&[(key, Value::Point(Point3::new(1.0, 1.0, 10.0)))]));
        acc.merge(&estimate(&[(key, Value::Point(Point3::new(1.1, 0.9, 10.2)))]));

        let landmarks = acc.landmarks();
        assert_eq!(landmarks.len(), 1);
        assert_abs_diff_eq!(landmarks[0].1.z, 10.2);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut acc = ResultAccumulator::new();
        let e = estimate(&[
            (VariableKey::Pose(0), Value::Pose(Isometry3::identity())),
            (
                VariableKey::Landmark(LandmarkId(0)),
                Value::Point(Point3::new(0.0, 0.0, 5.0)),
            ),
        ]);
        acc.merge(&e);
        acc.merge(&e);
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn test_trajectory_is_frame_ordered() {
        let mut acc = ResultAccumulator::new();
        acc.merge(&estimate(&[
            (VariableKey::Pose(2), Value::Pose(Isometry3::identity())),
            (VariableKey::Pose(0), Value::Pose(Isometry3::identity())),
            (VariableKey::Pose(1), Value::Pose(Isometry3::identity())),
        ]));
        let frames: Vec<usize> = acc.trajectory().iter().map(|(f, _)| *f).collect();
        assert_eq!(frames, vec![0, 1, 2]);
    }
}
