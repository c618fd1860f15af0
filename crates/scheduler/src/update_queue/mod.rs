//! Pending recomposition requests and the spontaneous job backlog.
//!
//! Requests are kept on a patch grid: large ones are split into patch-sized
//! pieces and small neighbours are merged as long as the united rectangle
//! does not waste much area. Every request owns the walker built for it, so a
//! request blocked by a running merge is not walked again on the next tick.

#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::sync::Arc;

use impasto_primitives::{NodeId, Rect};

use crate::config::SchedulerConfig;
use crate::job::SpontaneousJob;
use crate::pool::JobSlotPool;
use crate::walker::{RectsWalker, UpdateType, WalkerFactory};

struct UpdateRequest {
	node: NodeId,
	rect: Rect,
	crop: Rect,
	level_of_detail: u32,
	update_type: UpdateType,
	walker: Box<dyn RectsWalker>,
}

impl UpdateRequest {
	fn is_compatible(&self, node: NodeId, update_type: UpdateType, crop: Rect, level_of_detail: u32) -> bool {
		self.node == node && self.update_type == update_type && self.crop == crop && self.level_of_detail == level_of_detail
	}
}

/// United rectangle of `a` and `b` if it fits one patch and its area grows by
/// at most `max_alpha` relative to the two inputs.
fn join_rects(a: Rect, b: Rect, max_alpha: f64, patch_width: i32, patch_height: i32) -> Option<Rect> {
	let united = a.united(b);
	if united.width > patch_width || united.height > patch_height {
		return None;
	}
	let alpha = united.area() as f64 / (a.area() + b.area()) as f64;
	(alpha <= max_alpha).then_some(united)
}

pub(crate) struct UpdateQueue {
	requests: Vec<UpdateRequest>,
	spontaneous: VecDeque<Box<dyn SpontaneousJob>>,
	walkers: Arc<dyn WalkerFactory>,
	patch_width: i32,
	patch_height: i32,
	max_collect_alpha: f64,
	max_merge_alpha: f64,
	max_merge_collect_alpha: f64,
	override_lod: Option<u32>,
}

impl UpdateQueue {
	pub fn new(config: &SchedulerConfig, walkers: Arc<dyn WalkerFactory>) -> Self {
		let mut queue = Self {
			requests: Vec::new(),
			spontaneous: VecDeque::new(),
			walkers,
			patch_width: 0,
			patch_height: 0,
			max_collect_alpha: 0.0,
			max_merge_alpha: 0.0,
			max_merge_collect_alpha: 0.0,
			override_lod: None,
		};
		queue.update_settings(config);
		queue
	}

	pub fn update_settings(&mut self, config: &SchedulerConfig) {
		self.patch_width = config.update_patch_width;
		self.patch_height = config.update_patch_height;
		self.max_collect_alpha = config.max_collect_alpha;
		self.max_merge_alpha = config.max_merge_alpha;
		self.max_merge_collect_alpha = config.max_merge_collect_alpha;
	}

	pub fn add_update_job(&mut self, node: NodeId, rect: Rect, crop: Rect, level_of_detail: u32) {
		self.add_job(UpdateType::Update, node, rect, crop, level_of_detail);
	}

	pub fn add_update_no_filthy_job(&mut self, node: NodeId, rect: Rect, crop: Rect, level_of_detail: u32) {
		self.add_job(UpdateType::UpdateNoFilthy, node, rect, crop, level_of_detail);
	}

	pub fn add_full_refresh_job(&mut self, node: NodeId, rect: Rect, crop: Rect, level_of_detail: u32) {
		self.add_job(UpdateType::FullRefresh, node, rect, crop, level_of_detail);
	}

	fn add_job(&mut self, update_type: UpdateType, node: NodeId, rect: Rect, crop: Rect, level_of_detail: u32) {
		let rect = rect.intersected(crop);
		if rect.is_empty() {
			tracing::trace!(%node, update_type = update_type.as_str(), "updates.empty_request");
			return;
		}
		if self.try_split(update_type, node, rect, crop, level_of_detail) || self.try_merge(update_type, node, rect, crop, level_of_detail) {
			return;
		}

		let mut walker = self.walkers.create_walker(update_type, crop, level_of_detail);
		walker.collect_rects(node, rect);
		self.requests.push(UpdateRequest {
			node,
			rect,
			crop,
			level_of_detail,
			update_type,
			walker,
		});
		tracing::trace!(%node, %rect, update_type = update_type.as_str(), lod = level_of_detail, pending = self.requests.len(), "updates.add");
	}

	/// Splits a rectangle larger than a patch in both directions along the patch grid.
	fn try_split(&mut self, update_type: UpdateType, node: NodeId, rect: Rect, crop: Rect, level_of_detail: u32) -> bool {
		let (width, height) = (self.patch_width, self.patch_height);
		if rect.width <= width || rect.height <= height {
			return false;
		}

		let first_col = rect.x.div_euclid(width);
		let last_col = rect.right().div_euclid(width);
		let first_row = rect.y.div_euclid(height);
		let last_row = rect.bottom().div_euclid(height);
		for row in first_row..=last_row {
			for col in first_col..=last_col {
				let patch = Rect::new(col * width, row * height, width, height).intersected(rect);
				if !patch.is_empty() {
					self.add_job(update_type, node, patch, crop, level_of_detail);
				}
			}
		}
		true
	}

	/// Folds `rect` into the most recent compatible request it joins with.
	fn try_merge(&mut self, update_type: UpdateType, node: NodeId, rect: Rect, crop: Rect, level_of_detail: u32) -> bool {
		for index in (0..self.requests.len()).rev() {
			let request = &mut self.requests[index];
			if !request.is_compatible(node, update_type, crop, level_of_detail) {
				continue;
			}
			let Some(united) = join_rects(request.rect, rect, self.max_merge_alpha, self.patch_width, self.patch_height) else {
				continue;
			};
			tracing::trace!(%node, from = %request.rect, to = %united, "updates.merge");
			request.rect = united;
			self.collect_around(index, self.max_merge_collect_alpha, true);
			return true;
		}
		false
	}

	/// Absorbs every compatible request that joins with the one at `base`.
	fn collect_around(&mut self, mut base: usize, max_alpha: f64, mut changed: bool) {
		let mut index = 0;
		while index < self.requests.len() {
			if index != base {
				let target = &self.requests[base];
				let other = &self.requests[index];
				if other.is_compatible(target.node, target.update_type, target.crop, target.level_of_detail)
					&& let Some(united) = join_rects(target.rect, other.rect, max_alpha, self.patch_width, self.patch_height)
				{
					self.requests[base].rect = united;
					self.requests.remove(index);
					if index < base {
						base -= 1;
					}
					changed = true;
					continue;
				}
			}
			index += 1;
		}

		if changed && let Some(request) = self.requests.get_mut(base) {
			request.walker.collect_rects(request.node, request.rect);
		}
	}

	/// Coalesces pending requests around the oldest one.
	pub fn optimize(&mut self) {
		if self.requests.len() > 1 {
			let before = self.requests.len();
			self.collect_around(0, self.max_collect_alpha, false);
			tracing::trace!(before, after = self.requests.len(), "updates.optimize");
		}
	}

	/// Queues a maintenance job, dropping queued jobs it supersedes.
	pub fn add_spontaneous_job(&mut self, job: Box<dyn SpontaneousJob>) {
		let before = self.spontaneous.len();
		self.spontaneous.retain(|queued| !job.overrides(queued.as_ref()));
		tracing::trace!(dropped = before - self.spontaneous.len(), "updates.add_spontaneous");
		self.spontaneous.push_back(job);
	}

	/// Dispatches requests while the pool has room. Blocked requests stay queued.
	pub fn process_queue(&mut self, pool: &JobSlotPool) {
		while pool.has_spare_thread() && self.process_one_job(pool) {}
	}

	fn process_one_job(&mut self, pool: &JobSlotPool) -> bool {
		if let Some(index) = self.requests.iter().position(|request| pool.is_job_allowed(request.walker.as_ref())) {
			let request = self.requests.remove(index);
			tracing::trace!(
				node = %request.node,
				rect = %request.rect,
				update_type = request.update_type.as_str(),
				lod = request.level_of_detail,
				"updates.dispatch"
			);
			pool.add_merge_job(request.walker);
			return true;
		}

		// Maintenance only runs on an otherwise empty pool.
		if pool.jobs_snapshot().is_empty()
			&& let Some(job) = self.spontaneous.pop_front()
		{
			pool.add_spontaneous_job(job);
			return true;
		}
		false
	}

	/// Pending requests plus pending spontaneous jobs.
	pub fn size_metric(&self) -> usize {
		self.requests.len() + self.spontaneous.len()
	}

	pub fn is_empty(&self) -> bool {
		self.requests.is_empty() && self.spontaneous.is_empty()
	}

	pub fn override_level_of_detail(&self) -> Option<u32> {
		self.override_lod
	}

	pub fn set_override_level_of_detail(&mut self, level_of_detail: Option<u32>) {
		if self.override_lod != level_of_detail {
			tracing::debug!(lod = ?level_of_detail, "updates.override_lod");
		}
		self.override_lod = level_of_detail;
	}
}
