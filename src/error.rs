//! Error types for the front end and the optimizer boundary.

use thiserror::Error;

/// Failure reported by the external fixed-lag optimizer.
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// The linearized system could not be solved.
    #[error("optimizer update ill-conditioned: {reason}")]
    IllConditioned { reason: String },

    /// Any other backend-reported failure.
    #[error("optimizer backend failed: {message}")]
    Backend { message: String },
}

/// Failure surfaced by the front-end pipeline.
#[derive(Debug, Error)]
pub enum FrontendError {
    /// The optimizer rejected the increment for `frame`. The pipeline halts;
    /// the pending increment and association outcome stay available for
    /// inspection.
    #[error("optimizer update failed at frame {frame}")]
    Optimizer {
        frame: usize,
        #[source]
        source: OptimizerError,
    },

    /// A frame was submitted after the pipeline had already halted.
    #[error("frame {frame} rejected: pipeline halted at frame {halted_at}")]
    Halted { frame: usize, halted_at: usize },
}
