//! Ordered queue of strokes and the rules deciding which stroke job may start.
//!
//! Only the stroke at the head of the queue dispatches jobs. The head leaves the
//! queue once it is ended, has no pending jobs and no stroke job is running,
//! which makes every stroke a barrier for the next one.
//!
//! While a reduced level of detail is active, strokes that can be cloned are
//! queued as a buddy pair. The queue then keeps this layout:
//!
//! ```text
//! [lod sync] [lod-n strokes] [suspend] [lod-0 strokes] [resume]
//! ```
//!
//! so the cheap preview of every stroke runs before its full-detail twin.

mod record;
mod strategy;

use std::sync::Arc;

use indexmap::IndexMap;
use record::{Stroke, StrokeKind};
pub use strategy::{LodSyncStrategyFactory, StrokeStrategy, StrokeStrategyFactory, UndoResult};

use crate::error::JobError;
use crate::job::{Exclusivity, Sequentiality, StrokeJobData};
use crate::pool::{ContextSnapshot, JobSlotPool, JobsSnapshot};
use crate::token::{StrokeId, StrokeIdClock};
use crate::undo::{MemoryUndoStore, PostExecutionUndoAdapter, UndoStore};

pub(crate) struct StrokeQueue {
	strokes: IndexMap<StrokeId, Stroke>,
	clock: StrokeIdClock,
	undo: Arc<PostExecutionUndoAdapter>,
	lod_n_store: Arc<MemoryUndoStore>,
	lod_n_undo: Arc<PostExecutionUndoAdapter>,
	/// Level requested through `set_desired_level_of_detail`.
	desired_lod: u32,
	/// Level new strokes are cloned for. Trails `desired_lod` while a switch is deferred.
	active_lod: u32,
	lod_n_needs_sync: bool,
	lod_change: Option<u32>,
	lod_sync_factory: Option<LodSyncStrategyFactory>,
	suspend_factory: Option<StrokeStrategyFactory>,
	resume_factory: Option<StrokeStrategyFactory>,
}

impl StrokeQueue {
	pub fn new(undo_store: Arc<dyn UndoStore>) -> Self {
		let lod_n_store = Arc::new(MemoryUndoStore::new());
		Self {
			strokes: IndexMap::new(),
			clock: StrokeIdClock::default(),
			undo: Arc::new(PostExecutionUndoAdapter::new(undo_store)),
			lod_n_undo: Arc::new(PostExecutionUndoAdapter::new(Arc::clone(&lod_n_store) as Arc<dyn UndoStore>)),
			lod_n_store,
			desired_lod: 0,
			active_lod: 0,
			lod_n_needs_sync: true,
			lod_change: None,
			lod_sync_factory: None,
			suspend_factory: None,
			resume_factory: None,
		}
	}

	pub fn set_lod_sync_factory(&mut self, factory: LodSyncStrategyFactory) {
		self.lod_sync_factory = Some(factory);
	}

	pub fn set_suspend_factory(&mut self, factory: StrokeStrategyFactory) {
		self.suspend_factory = Some(factory);
	}

	pub fn set_resume_factory(&mut self, factory: StrokeStrategyFactory) {
		self.resume_factory = Some(factory);
	}

	pub fn start_stroke(&mut self, strategy: Box<dyn StrokeStrategy>) -> StrokeId {
		if strategy.requests_other_strokes_to_end() {
			self.end_open_strokes();
		}
		if strategy.clears_redo_on_start() {
			self.undo.purge_redo_state();
		}

		let clone = if self.active_lod > 0 { strategy.create_lod_clone(self.active_lod) } else { None };
		let id = match clone {
			Some(clone) => self.start_buddied(strategy, clone),
			None => self.start_legacy(strategy),
		};
		if let Some(stroke) = self.strokes.get(&id) {
			tracing::debug!(%id, name = stroke.name(), kind = stroke.kind().as_str(), queued = self.strokes.len(), "strokes.start");
		}
		id
	}

	fn start_legacy(&mut self, strategy: Box<dyn StrokeStrategy>) -> StrokeId {
		let id = self.clock.next();
		let bracket = strategy.needs_suspend_updates() && self.has_suspend_factories();
		let stroke = Stroke::new(id, strategy, StrokeKind::Legacy, 0, Arc::clone(&self.undo));
		if bracket && let Some(suspend) = self.system_stroke(StrokeKind::Suspend) {
			self.strokes.insert(suspend.id(), suspend);
		}
		self.strokes.insert(id, stroke);
		if bracket && let Some(resume) = self.system_stroke(StrokeKind::Resume) {
			self.strokes.insert(resume.id(), resume);
		}
		// Full-detail edits leave the reduced-detail caches behind.
		self.lod_n_needs_sync = true;
		id
	}

	fn start_buddied(&mut self, strategy: Box<dyn StrokeStrategy>, clone: Box<dyn StrokeStrategy>) -> StrokeId {
		let level = self.active_lod;
		if self.lod_n_needs_sync {
			self.enqueue_lod_sync(level, false);
		}

		let id = self.clock.next();
		let buddy_id = self.clock.next();
		let mut stroke = Stroke::new(id, strategy, StrokeKind::Lod0, 0, Arc::clone(&self.undo));
		stroke.set_buddy(buddy_id);
		let mut buddy = Stroke::new(buddy_id, clone, StrokeKind::LodN, level, Arc::clone(&self.lod_n_undo));
		buddy.set_buddy(id);

		let pos = self.find_new_lod0_pos();
		let group_open = pos < self.strokes.len();
		if !group_open && self.has_suspend_factories() {
			let suspend = self.system_stroke(StrokeKind::Suspend);
			let resume = self.system_stroke(StrokeKind::Resume);
			let mut at = pos;
			for stroke in [suspend, Some(stroke), resume].into_iter().flatten() {
				self.insert_at(at, stroke);
				at += 1;
			}
		} else {
			self.insert_at(pos, stroke);
		}

		let pos = self.find_new_lodn_pos();
		if pos == 0
			&& let Some((_, head)) = self.strokes.get_index_mut(0)
			&& head.supports_suspension()
		{
			tracing::debug!(head = %head.id(), recipient = %buddy_id, "strokes.suspend_head");
			head.suspend_for(&mut buddy);
		}
		self.insert_at(pos, buddy);
		id
	}

	fn has_suspend_factories(&self) -> bool {
		self.suspend_factory.is_some() && self.resume_factory.is_some()
	}

	fn system_stroke(&self, kind: StrokeKind) -> Option<Stroke> {
		let factory = match kind {
			StrokeKind::Suspend => self.suspend_factory.as_ref(),
			StrokeKind::Resume => self.resume_factory.as_ref(),
			_ => None,
		}?;
		let mut stroke = Stroke::new(self.clock.next(), factory(), kind, 0, Arc::clone(&self.undo));
		stroke.end();
		Some(stroke)
	}

	fn enqueue_lod_sync(&mut self, level: u32, forgettable: bool) -> bool {
		let Some(factory) = self.lod_sync_factory.clone() else {
			return false;
		};
		let id = self.clock.next();
		let mut stroke = Stroke::new(id, factory(level, forgettable), StrokeKind::LodSync, level, Arc::clone(&self.lod_n_undo));
		stroke.end();
		let pos = self.find_new_lodn_pos();
		self.insert_at(pos, stroke);
		self.lod_n_needs_sync = false;
		tracing::debug!(%id, level, forgettable, "strokes.lod_sync_queued");
		true
	}

	fn insert_at(&mut self, index: usize, stroke: Stroke) {
		self.strokes.shift_insert(index, stroke.id(), stroke);
	}

	/// New full-detail strokes go in front of the resume stroke that closes the open group.
	fn find_new_lod0_pos(&self) -> usize {
		self.strokes
			.values()
			.position(|s| !s.is_cancelled() && s.kind() == StrokeKind::Resume && !s.is_started())
			.unwrap_or(self.strokes.len())
	}

	/// New reduced-detail strokes go in front of the full-detail group.
	fn find_new_lodn_pos(&self) -> usize {
		self.strokes
			.values()
			.position(|s| {
				!s.is_cancelled()
					&& match s.kind() {
						StrokeKind::Lod0 => true,
						// A started system stroke cannot be overtaken.
						StrokeKind::Suspend | StrokeKind::Resume => !s.is_started(),
						_ => false,
					}
			})
			.unwrap_or(self.strokes.len())
	}

	fn end_open_strokes(&mut self) {
		for stroke in self.strokes.values_mut() {
			if stroke.kind().is_user() && !stroke.is_ended() {
				stroke.end();
				tracing::debug!(id = %stroke.id(), "strokes.end_requested");
			}
		}
	}

	pub fn add_job(&mut self, id: StrokeId, data: Box<dyn StrokeJobData>) {
		let Some(stroke) = self.strokes.get(&id) else {
			tracing::warn!(%id, "strokes.add_job_unknown_stroke");
			return;
		};
		if stroke.is_ended() {
			tracing::warn!(%id, "strokes.add_job_ended_stroke");
			return;
		}

		if let Some(buddy_id) = stroke.buddy()
			&& let Some(buddy) = self.strokes.get_mut(&buddy_id)
			&& !buddy.is_ended()
		{
			match data.lod_clone(buddy.level_of_detail()) {
				Some(clone) => {
					buddy.add_job(clone);
				}
				None => tracing::warn!(%id, buddy = %buddy_id, "strokes.job_data_not_cloneable"),
			}
		}

		if let Some(stroke) = self.strokes.get_mut(&id)
			&& !stroke.add_job(data)
		{
			tracing::warn!(%id, "strokes.add_job_without_dab_strategy");
		}
	}

	pub fn end_stroke(&mut self, id: StrokeId) {
		let Some(stroke) = self.strokes.get_mut(&id) else {
			tracing::warn!(%id, "strokes.end_unknown_stroke");
			return;
		};
		if !stroke.end() {
			tracing::debug!(%id, "strokes.end_ignored");
			return;
		}
		tracing::debug!(%id, "strokes.end");
		if let Some(buddy) = stroke.buddy().and_then(|buddy| self.strokes.get_mut(&buddy)) {
			buddy.end();
		}
	}

	/// Cancels `id` and its buddy. See [`Stroke::cancel`] for the return value.
	///
	/// Refuses while an exclusive job of the stroke is running, since that job
	/// cannot be unwound mid-flight.
	pub fn cancel_stroke(&mut self, id: StrokeId, pool: &JobSlotPool) -> bool {
		let Some(stroke) = self.strokes.get_mut(&id) else {
			tracing::warn!(%id, "strokes.cancel_unknown_stroke");
			return false;
		};
		if stroke.is_cancelled() {
			return false;
		}
		if pool.is_exclusive_job_running_for(id) {
			tracing::debug!(%id, "strokes.cancel_refused");
			return false;
		}

		let cancelled = stroke.cancel();
		let kind = stroke.kind();
		let buddy = stroke.buddy();
		if cancelled && kind == StrokeKind::Lod0 {
			// The preview may already have completed and cannot be reverted.
			self.lod_n_needs_sync = true;
		}
		if cancelled
			&& let Some(buddy) = buddy
			&& !pool.is_exclusive_job_running_for(buddy)
			&& let Some(buddy) = self.strokes.get_mut(&buddy)
		{
			buddy.cancel();
		}
		tracing::debug!(%id, cancelled, "strokes.cancel");
		cancelled
	}

	/// Cancels the oldest user stroke that is not cancelled yet.
	pub fn try_cancel_current_stroke_async(&mut self, pool: &JobSlotPool) -> bool {
		let Some(id) = self
			.strokes
			.values()
			.find(|s| matches!(s.kind(), StrokeKind::Legacy | StrokeKind::Lod0) && !s.is_cancelled())
			.map(Stroke::id)
		else {
			return false;
		};
		self.cancel_stroke(id, pool)
	}

	/// Cancels the most recently ended full-detail stroke that is still queued.
	pub fn try_undo_last_stroke_async(&mut self, pool: &JobSlotPool) -> UndoResult {
		let Some(stroke) = self
			.strokes
			.values()
			.rev()
			.find(|s| matches!(s.kind(), StrokeKind::Legacy | StrokeKind::Lod0) && s.is_ended() && !s.is_cancelled())
		else {
			return UndoResult::Fail;
		};
		if !stroke.strategy().is_asynchronously_cancellable() {
			return UndoResult::Unsupported;
		}
		let id = stroke.id();
		if self.cancel_stroke(id, pool) { UndoResult::Ok } else { UndoResult::Fail }
	}

	/// Isolates a failed job to its stroke.
	pub fn job_failed(&mut self, id: StrokeId, error: &JobError) {
		let Some(stroke) = self.strokes.get_mut(&id) else {
			tracing::warn!(%id, %error, "strokes.failure_for_unknown_stroke");
			return;
		};
		tracing::warn!(%id, name = stroke.name(), %error, "strokes.job_failed");
		stroke.fail();
		if stroke.kind() == StrokeKind::Lod0 {
			self.lod_n_needs_sync = true;
		}
	}

	/// Dispatches head-of-queue jobs while the pool has room for them.
	///
	/// `updates_pending` keeps barrier jobs waiting and makes concurrent jobs
	/// leave the last slot to the update queue.
	pub fn process_queue(&mut self, pool: &JobSlotPool, updates_pending: bool) {
		while pool.has_spare_thread() && self.process_one_job(pool, updates_pending) {}
	}

	fn process_one_job(&mut self, pool: &JobSlotPool, updates_pending: bool) -> bool {
		if self.strokes.is_empty() {
			return false;
		}
		let running_lod = pool.current_level_of_detail();
		let snapshot = pool.jobs_snapshot();

		if !self.check_stroke_state(snapshot.stroke_jobs > 0, running_lod) || !self.check_exclusive(&snapshot) || !self.check_sequential(&snapshot, updates_pending, pool) {
			return false;
		}
		let Some(job) = self.strokes.get_index_mut(0).and_then(|(_, head)| head.pop_job()) else {
			return false;
		};
		pool.add_stroke_job(job);
		true
	}

	/// Retires drained head strokes and reports whether the head may dispatch.
	fn check_stroke_state(&mut self, mut has_stroke_jobs: bool, running_lod: Option<u32>) -> bool {
		loop {
			let Some((_, head)) = self.strokes.get_index(0) else {
				return false;
			};
			if let Some(lod) = head.next_level_of_detail() {
				return running_lod.is_none_or(|running| running == lod);
			}
			if !head.is_ended() || has_stroke_jobs {
				return false;
			}
			let Some((_, finished)) = self.strokes.shift_remove_index(0) else {
				return false;
			};
			self.on_stroke_finished(&finished);
			has_stroke_jobs = false;
		}
	}

	fn on_stroke_finished(&mut self, stroke: &Stroke) {
		tracing::debug!(
			id = %stroke.id(),
			name = stroke.name(),
			kind = stroke.kind().as_str(),
			cancelled = stroke.is_cancelled(),
			"strokes.finished"
		);
		match stroke.kind() {
			StrokeKind::LodSync => {
				self.lod_change = Some(stroke.level_of_detail());
				if stroke.is_cancelled() {
					self.lod_n_needs_sync = true;
				}
			}
			StrokeKind::Lod0 | StrokeKind::Resume => {
				let group_left = self.strokes.values().any(|s| matches!(s.kind(), StrokeKind::Lod0 | StrokeKind::Resume));
				if !group_left {
					self.lod_n_store.clear();
				}
			}
			_ => {}
		}
		self.try_switch_desired_lod(false);
	}

	fn check_exclusive(&self, snapshot: &JobsSnapshot) -> bool {
		let Some((_, head)) = self.strokes.get_index(0) else {
			return false;
		};
		if snapshot.flags.contains(ContextSnapshot::HAS_EXCLUSIVE_JOB) {
			return false;
		}
		head.next_exclusivity() != Some(Exclusivity::Exclusive) || snapshot.is_empty()
	}

	fn check_sequential(&self, snapshot: &JobsSnapshot, updates_pending: bool, pool: &JobSlotPool) -> bool {
		let Some(next) = self.strokes.get_index(0).and_then(|(_, head)| head.next_sequentiality()) else {
			return false;
		};
		let flags = snapshot.flags;
		if flags.intersects(ContextSnapshot::HAS_SEQUENTIAL_JOB | ContextSnapshot::HAS_BARRIER_JOB) {
			return false;
		}
		match next {
			Sequentiality::UniquelyConcurrent => !flags.contains(ContextSnapshot::HAS_UNIQUELY_CONCURRENT_JOB),
			Sequentiality::Sequential => !flags.intersects(ContextSnapshot::HAS_UNIQUELY_CONCURRENT_JOB | ContextSnapshot::HAS_CONCURRENT_JOB),
			Sequentiality::Barrier => {
				!flags.intersects(ContextSnapshot::HAS_UNIQUELY_CONCURRENT_JOB | ContextSnapshot::HAS_CONCURRENT_JOB | ContextSnapshot::HAS_MERGE_JOB) && !updates_pending
			}
			Sequentiality::Concurrent => !(updates_pending && snapshot.stroke_jobs > 0 && pool.spare_thread_count() <= 1),
		}
	}

	/// The head stroke is exclusive or its next job is.
	pub fn needs_exclusive_access(&self) -> bool {
		self.strokes
			.get_index(0)
			.is_some_and(|(_, head)| head.is_exclusive() || head.next_exclusivity() == Some(Exclusivity::Exclusive))
	}

	/// Rough backlog estimate: jobs of the head stroke times queued strokes.
	pub fn size_metric(&self) -> usize {
		match self.strokes.get_index(0) {
			Some((_, head)) => head.job_count().max(1) * self.strokes.len(),
			None => 0,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.strokes.is_empty()
	}

	pub fn has_open_strokes(&self) -> bool {
		self.strokes.values().any(|s| s.kind().is_user() && !s.is_ended())
	}

	pub fn current_stroke_name(&self) -> Option<&str> {
		self.strokes.get_index(0).map(|(_, head)| head.name())
	}

	pub fn wrap_around_mode_supported(&self) -> bool {
		self.strokes.get_index(0).is_none_or(|(_, head)| head.strategy().wrap_around_mode_supported())
	}

	pub fn set_desired_level_of_detail(&mut self, lod: u32) {
		if lod == self.desired_lod {
			return;
		}
		self.desired_lod = lod;
		self.try_switch_desired_lod(true);
	}

	/// Queues a cache regeneration for the active reduced level, if any.
	pub fn explicit_regenerate_level_of_detail(&mut self) {
		if self.active_lod > 0 {
			self.enqueue_lod_sync(self.active_lod, false);
		}
	}

	/// Switches the active level once only legacy strokes are queued.
	fn try_switch_desired_lod(&mut self, forced: bool) {
		if !forced && self.desired_lod == self.active_lod {
			return;
		}
		if self.strokes.values().any(|s| s.kind() != StrokeKind::Legacy) {
			tracing::debug!(desired = self.desired_lod, active = self.active_lod, "strokes.lod_switch_deferred");
			return;
		}

		let forgettable = forced && !self.lod_n_needs_sync && self.desired_lod == self.active_lod;
		self.active_lod = self.desired_lod;
		self.lod_n_needs_sync |= !forgettable;
		tracing::debug!(lod = self.active_lod, forgettable, "strokes.lod_switch");

		if self.active_lod == 0 || !self.enqueue_lod_sync(self.active_lod, forgettable) {
			self.lod_change = Some(self.active_lod);
		}
	}

	/// Level that became current since the last call, if any.
	pub fn take_lod_change(&mut self) -> Option<u32> {
		self.lod_change.take()
	}

	/// The image was changed behind the queue's back; reduced-detail caches are stale.
	pub fn notify_ufo_changed_image(&mut self) {
		self.lod_n_needs_sync = true;
	}

	pub fn post_execution_undo_adapter(&self) -> Arc<PostExecutionUndoAdapter> {
		Arc::clone(&self.undo)
	}

	pub fn lod_n_post_execution_undo_adapter(&self) -> Arc<PostExecutionUndoAdapter> {
		Arc::clone(&self.lod_n_undo)
	}
}
