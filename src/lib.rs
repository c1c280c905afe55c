//! Incremental stereo visual-odometry front end.
//!
//! Tracks 2D features across rectified stereo pairs, associates them with
//! persistent 3D landmarks, and emits per-frame factor-graph increments
//! (new pose/landmark variables, stereo-reprojection constraints,
//! timestamps) to an external fixed-lag optimizer. The optimizer's bounded
//! estimate is folded back into a persistent trajectory/map.
//!
//! Dense disparity computation, keypoint detection/matching, and the
//! nonlinear solver itself are external collaborators behind the
//! [`DepthProvider`], [`KeypointProvider`], and [`OptimizerAdapter`] traits.

pub mod accumulator;
pub mod calib;
pub mod depth;
pub mod error;
pub mod graph;
pub mod keypoints;
pub mod optimizer;
pub mod pipeline;
pub mod pose;
pub mod registry;
pub mod tracking;

pub use accumulator::ResultAccumulator;
pub use calib::Calibration;
pub use depth::{DepthProvider, DisparityMap, SgbmParams};
pub use error::{FrontendError, OptimizerError};
pub use graph::{GraphBuilder, GraphIncrement, StereoMeasurement, Value, VariableKey};
pub use keypoints::{KeyPoint, KeypointProvider, MatchCandidate};
pub use optimizer::{BoundedEstimate, OptimizerAdapter, WarmStartSmoother};
pub use pipeline::{FrameInput, FrameSummary, Frontend, FrontendConfig};
pub use pose::ConstantVelocityModel;
pub use registry::{LandmarkId, LandmarkRegistry, PointId, RegistryConfig};
pub use tracking::{Correspondence, FeatureTracker, PointStatus, TrackedPoint};
