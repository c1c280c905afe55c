//! Per-frame orchestration
//!
//! [`Frontend`] wires the collaborators together: disparity, tracking,
//! association, increment assembly, optimizer submission, and result
//! accumulation. State transitions are transactional around the optimizer:
//! the association table is committed and the estimate merged only after
//! the adapter accepts the frame's increment. On rejection the session
//! halts permanently and the pending increment stays inspectable.

use image::GrayImage;
use log::{info, warn};
use nalgebra::Isometry3;

use crate::accumulator::ResultAccumulator;
use crate::calib::Calibration;
use crate::depth::DepthProvider;
use crate::error::FrontendError;
use crate::graph::{GraphBuilder, GraphConfig, GraphIncrement};
use crate::optimizer::OptimizerAdapter;
use crate::pose::ConstantVelocityModel;
use crate::registry::{AssociationOutcome, LandmarkRegistry, RegistryConfig};
use crate::tracking::FeatureTracker;

/// One rectified stereo frame with its capture timestamp.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    pub index: usize,
    /// Seconds; drives fixed-lag eviction in the optimizer.
    pub timestamp: f64,
    pub left: &'a GrayImage,
    pub right: &'a GrayImage,
}

/// Front-end configuration.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct FrontendConfig {
    pub registry: RegistryConfig,
    pub graph: GraphConfig,
    pub motion: ConstantVelocityModel,
}

/// Per-frame processing report.
#[derive(Debug, Clone, Copy)]
pub struct FrameSummary {
    pub frame: usize,
    /// Pose estimate after this frame's optimizer update.
    pub pose: Isometry3<f64>,
    pub observations: usize,
    pub landmarks_minted: usize,
    pub landmark_hits: usize,
    /// Stereo factors submitted in this frame's increment.
    pub factors: usize,
}

/// The incremental stereo visual-odometry front end.
pub struct Frontend {
    calib: Calibration,
    depth: Box<dyn DepthProvider>,
    tracker: Box<dyn FeatureTracker>,
    adapter: Box<dyn OptimizerAdapter>,
    registry: LandmarkRegistry,
    graph: GraphBuilder,
    motion: ConstantVelocityModel,
    accumulator: ResultAccumulator,
    prev_pose: Isometry3<f64>,
    started: bool,
    halted_at: Option<usize>,
    /// Increment and outcome of the frame the optimizer rejected.
    pending: Option<(GraphIncrement, AssociationOutcome)>,
}

impl Frontend {
    pub fn new(
        config: FrontendConfig,
        calib: Calibration,
        depth: Box<dyn DepthProvider>,
        tracker: Box<dyn FeatureTracker>,
        adapter: Box<dyn OptimizerAdapter>,
    ) -> Self {
        Self {
            calib,
            depth,
            tracker,
            adapter,
            registry: LandmarkRegistry::new(config.registry),
            graph: GraphBuilder::new(config.graph),
            motion: config.motion,
            accumulator: ResultAccumulator::new(),
            prev_pose: Isometry3::identity(),
            started: false,
            halted_at: None,
            pending: None,
        }
    }

    /// Process one frame end to end.
    ///
    /// The first frame pins the origin with a prior and seeds the tracker.
    /// Subsequent frames run disparity, tracking, association, and submit
    /// one increment to the optimizer. After an optimizer error every
    /// further call fails with [`FrontendError::Halted`].
    pub fn process(&mut self, input: FrameInput<'_>) -> Result<FrameSummary, FrontendError> {
        if let Some(halted_at) = self.halted_at {
            return Err(FrontendError::Halted {
                frame: input.index,
                halted_at,
            });
        }

        let disparity = self.depth.compute(input.left, input.right);
        let correspondences = self
            .tracker
            .advance(input.index, input.left, &disparity);

        if !self.started {
            let increment = self.graph.initial_increment(input.index, input.timestamp);
            let outcome = AssociationOutcome::empty(input.index);
            return self.submit(input.index, increment, outcome, Isometry3::identity());
        }

        let predicted = self.motion.predict(&self.prev_pose);
        let outcome =
            self.registry
                .associate(&correspondences, &disparity, &self.calib, &predicted);
        if outcome.observations.is_empty() && !correspondences.is_empty() {
            info!(
                "frame {}: no usable associations, pose-only update",
                input.index
            );
        }
        let increment =
            self.graph
                .frame_increment(input.index, input.timestamp, &predicted, &outcome);
        self.submit(input.index, increment, outcome, predicted)
    }

    /// Submit an increment and, on acceptance, commit the frame.
    fn submit(
        &mut self,
        frame: usize,
        increment: GraphIncrement,
        outcome: AssociationOutcome,
        predicted: Isometry3<f64>,
    ) -> Result<FrameSummary, FrontendError> {
        let summary_obs = outcome.observations.len();
        let summary_minted = outcome.new_landmarks.len();
        let summary_hits = outcome.hits;
        let summary_factors = increment.num_factors();

        match self.adapter.update(&increment) {
            Ok(estimate) => {
                self.started = true;
                self.registry.commit(outcome);
                self.accumulator.merge(&estimate);
                // The pose may already have left the window on a long stall;
                // fall back to the warm start.
                self.prev_pose = estimate.pose(frame).copied().unwrap_or(predicted);
                Ok(FrameSummary {
                    frame,
                    pose: self.prev_pose,
                    observations: summary_obs,
                    landmarks_minted: summary_minted,
                    landmark_hits: summary_hits,
                    factors: summary_factors,
                })
            }
            Err(source) => {
                warn!("frame {frame}: optimizer rejected the increment, halting");
                self.halted_at = Some(frame);
                self.pending = Some((increment, outcome));
                Err(FrontendError::Optimizer { frame, source })
            }
        }
    }

    /// Accumulated full-session trajectory and map.
    pub fn results(&self) -> &ResultAccumulator {
        &self.accumulator
    }

    /// Latest accepted pose estimate.
    pub fn current_pose(&self) -> &Isometry3<f64> {
        &self.prev_pose
    }

    pub fn registry(&self) -> &LandmarkRegistry {
        &self.registry
    }

    pub fn is_halted(&self) -> bool {
        self.halted_at.is_some()
    }

    /// The rejected frame's increment and association outcome, for
    /// post-mortem inspection after a halt.
    pub fn pending(&self) -> Option<(&GraphIncrement, &AssociationOutcome)> {
        self.pending.as_ref().map(|(inc, out)| (inc, out))
    }
}
