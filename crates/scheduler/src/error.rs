//! Error types for job execution and scheduler configuration.

use thiserror::Error;

/// Failure reported by a job body.
///
/// A failed merge job is logged and dropped; the dirty region stays eligible for
/// a later update request. A failed stroke job cancels the rest of its stroke.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
	/// The job could not complete its work.
	#[error("job failed: {0}")]
	Failed(String),

	/// The job ran out of a resource it depends on, usually memory.
	#[error("resource exhausted: {0}")]
	ResourceExhausted(String),

	/// The job body panicked. Carries the panic message when it was a string.
	#[error("job panicked: {0}")]
	Panicked(String),
}

impl JobError {
	/// Shorthand for [`JobError::Failed`].
	pub fn failed(message: impl Into<String>) -> Self {
		Self::Failed(message.into())
	}
}

/// Errors raised when a [`SchedulerConfig`](crate::SchedulerConfig) cannot be applied.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// The balancing ratio must be finite and strictly positive.
	#[error("invalid balancing ratio {0} (expected a finite value > 0)")]
	InvalidBalancingRatio(f64),

	/// The pool needs at least one worker.
	#[error("invalid thread count 0 (expected at least 1)")]
	InvalidThreadCount,

	/// Update patches must have a positive size.
	#[error("invalid update patch size {width}x{height}")]
	InvalidPatchSize {
		/// Configured patch width.
		width: i32,
		/// Configured patch height.
		height: i32,
	},

	/// An area-growth threshold is not a finite positive value.
	#[error("invalid {name} {value} (expected a finite value > 0)")]
	InvalidAlpha {
		/// Name of the offending setting.
		name: &'static str,
		/// The rejected value.
		value: f64,
	},

	/// The worker runtime could not be started.
	#[error("failed to start worker runtime: {0}")]
	Runtime(#[from] std::io::Error),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
