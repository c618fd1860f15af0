use std::num::NonZero;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Tunables read when a [`Scheduler`](crate::Scheduler) is built or reloaded.
///
/// Every field has a default, so the struct can be embedded in a host settings
/// document and only the overridden keys need to be present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
	/// Weight of the stroke backlog against the update backlog when deciding
	/// which queue is serviced first on a tick.
	pub balancing_ratio: f64,
	/// Number of worker slots in the pool.
	pub thread_count: usize,
	/// Width of the patch grid used to split and merge update requests.
	pub update_patch_width: i32,
	/// Height of the patch grid used to split and merge update requests.
	pub update_patch_height: i32,
	/// Area growth allowed when the idle pool collects pending requests.
	pub max_collect_alpha: f64,
	/// Area growth allowed when a new request is merged into a pending one.
	pub max_merge_alpha: f64,
	/// Area growth allowed when collecting around a freshly merged request.
	pub max_merge_collect_alpha: f64,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			balancing_ratio: 1.0,
			thread_count: std::thread::available_parallelism().map_or(1, NonZero::get),
			update_patch_width: 512,
			update_patch_height: 512,
			max_collect_alpha: 2.5,
			max_merge_alpha: 1.0,
			max_merge_collect_alpha: 1.5,
		}
	}
}

impl SchedulerConfig {
	/// Checks every field and reports the first invalid one.
	pub fn validate(&self) -> Result<()> {
		if !self.balancing_ratio.is_finite() || self.balancing_ratio <= 0.0 {
			return Err(ConfigError::InvalidBalancingRatio(self.balancing_ratio));
		}
		if self.thread_count == 0 {
			return Err(ConfigError::InvalidThreadCount);
		}
		if self.update_patch_width <= 0 || self.update_patch_height <= 0 {
			return Err(ConfigError::InvalidPatchSize {
				width: self.update_patch_width,
				height: self.update_patch_height,
			});
		}
		for (name, value) in [
			("max_collect_alpha", self.max_collect_alpha),
			("max_merge_alpha", self.max_merge_alpha),
			("max_merge_collect_alpha", self.max_merge_collect_alpha),
		] {
			if !value.is_finite() || value <= 0.0 {
				return Err(ConfigError::InvalidAlpha { name, value });
			}
		}
		Ok(())
	}
}
