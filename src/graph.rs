//! Factor-graph increment assembly
//!
//! Each processed frame yields one [`GraphIncrement`]: the new variables
//! with their initial values, the new stereo-reprojection constraints, and
//! the new key timestamps. The increment is handed to the optimizer adapter
//! exactly once; replaying it would corrupt the backend's internal state.

use nalgebra::{Isometry3, Point3, Vector3};

use crate::registry::{AssociationOutcome, LandmarkId};

/// Identity of a variable in the factor graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariableKey {
    /// Camera pose for a frame index.
    Pose(usize),
    /// Persistent 3D landmark.
    Landmark(LandmarkId),
}

/// Value assigned to a variable.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    Pose(Isometry3<f64>),
    Point(Point3<f64>),
}

impl Value {
    pub fn as_pose(&self) -> Option<&Isometry3<f64>> {
        match self {
            Value::Pose(p) => Some(p),
            Value::Point(_) => None,
        }
    }

    pub fn as_point(&self) -> Option<&Point3<f64>> {
        match self {
            Value::Point(p) => Some(p),
            Value::Pose(_) => None,
        }
    }
}

/// An observed stereo pixel triple: left-u, right-u, shared v.
///
/// For a rectified pair, `right_u = left_u - disparity` and v is common to
/// both images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoMeasurement {
    pub left_u: f64,
    pub right_u: f64,
    pub v: f64,
}

impl StereoMeasurement {
    /// Residual against a predicted measurement, in pixels.
    pub fn residual(&self, predicted: &StereoMeasurement) -> Vector3<f64> {
        Vector3::new(
            self.left_u - predicted.left_u,
            self.right_u - predicted.right_u,
            self.v - predicted.v,
        )
    }
}

/// Stereo-reprojection constraint tying one pose to one landmark.
#[derive(Debug, Clone, Copy)]
pub struct StereoFactor {
    pub frame: usize,
    pub landmark: LandmarkId,
    pub measurement: StereoMeasurement,
    /// Fixed diagonal noise sigmas for (left_u, right_u, v).
    pub sigmas: Vector3<f64>,
}

/// Prior pinning a pose variable; emitted exactly once, for the first pose.
#[derive(Debug, Clone, Copy)]
pub struct PriorFactor {
    pub frame: usize,
    pub mean: Isometry3<f64>,
    /// Isotropic sigma over the 6-dof tangent.
    pub sigma: f64,
}

/// The per-frame addition to the factor graph.
#[derive(Debug, Clone, Default)]
pub struct GraphIncrement {
    pub prior: Option<PriorFactor>,
    pub factors: Vec<StereoFactor>,
    /// New variables with initial values. Never re-inserts an existing key.
    pub new_values: Vec<(VariableKey, Value)>,
    /// Timestamps for newly inserted keys (poses only; landmark lifetimes
    /// are governed by the factors that reference them).
    pub timestamps: Vec<(VariableKey, f64)>,
}

impl GraphIncrement {
    pub fn is_empty(&self) -> bool {
        self.prior.is_none()
            && self.factors.is_empty()
            && self.new_values.is_empty()
            && self.timestamps.is_empty()
    }

    /// Number of stereo constraints in this increment.
    pub fn num_factors(&self) -> usize {
        self.factors.len()
    }
}

/// Configuration for increment assembly.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct GraphConfig {
    /// Diagonal stereo measurement sigmas (pixels).
    pub stereo_sigmas: Vector3<f64>,
    /// Isotropic sigma for the first-pose prior.
    pub prior_sigma: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            stereo_sigmas: Vector3::new(1.0, 1.0, 1.0),
            prior_sigma: 0.1,
        }
    }
}

/// Assembles graph increments from association outcomes.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    config: GraphConfig,
}

impl GraphBuilder {
    pub fn new(config: GraphConfig) -> Self {
        Self { config }
    }

    /// Increment for the very first frame: the pinned pose and its
    /// timestamp, nothing else.
    pub fn initial_increment(&self, frame: usize, timestamp: f64) -> GraphIncrement {
        let mean = Isometry3::identity();
        GraphIncrement {
            prior: Some(PriorFactor {
                frame,
                mean,
                sigma: self.config.prior_sigma,
            }),
            factors: Vec::new(),
            new_values: vec![(VariableKey::Pose(frame), Value::Pose(mean))],
            timestamps: vec![(VariableKey::Pose(frame), timestamp)],
        }
    }

    /// Increment for a subsequent frame.
    ///
    /// Always inserts the pose variable with its warm-start value; with an
    /// empty association outcome this degenerates to a pose-only update.
    pub fn frame_increment(
        &self,
        frame: usize,
        timestamp: f64,
        predicted_pose: &Isometry3<f64>,
        outcome: &AssociationOutcome,
    ) -> GraphIncrement {
        let mut increment = GraphIncrement {
            prior: None,
            factors: Vec::with_capacity(outcome.observations.len()),
            new_values: vec![(VariableKey::Pose(frame), Value::Pose(*predicted_pose))],
            timestamps: vec![(VariableKey::Pose(frame), timestamp)],
        };

        for obs in &outcome.observations {
            increment.factors.push(StereoFactor {
                frame,
                landmark: obs.landmark,
                measurement: obs.measurement,
                sigmas: self.config.stereo_sigmas,
            });
        }
        for minted in &outcome.new_landmarks {
            increment.new_values.push((
                VariableKey::Landmark(minted.id),
                Value::Point(minted.position),
            ));
        }
        increment
    }
}
