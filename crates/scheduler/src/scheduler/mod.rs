//! Arbitration between the update queue, the stroke queue and the worker pool.
//!
//! Every public entry point enqueues work and then runs one arbitration tick.
//! Ticks also run on worker threads whenever a slot frees up, so the pool
//! refills itself without a dedicated dispatcher thread.
//!
//! Lock order, outermost first: completions, updates-start gate, pool lock,
//! one queue mutex, pool internals. The two queue mutexes are never held
//! together. The completions lock is reentrant and is the only lock held while
//! the projection listener runs, so the listener may call back into the scheduler.


use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use impasto_primitives::{NodeId, Rect};
use parking_lot::{Condvar, Mutex, ReentrantMutex, RwLock};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::JobClass;
use crate::config::SchedulerConfig;
use crate::error::{JobError, Result};
use crate::job::{SpontaneousJob, StrokeJobData};
use crate::listener::{ProgressProxy, ProjectionUpdateListener};
use crate::pool::{ContextSnapshot, JobSlotPool, JobsSnapshot, SlotCompletion, SlotListener};
use crate::stroke::{LodSyncStrategyFactory, StrokeQueue, StrokeStrategy, StrokeStrategyFactory, UndoResult};
use crate::token::StrokeId;
use crate::undo::{PostExecutionUndoAdapter, UndoStore};
use crate::update_queue::UpdateQueue;
use crate::walker::{UpdateType, WalkerFactory};

const UPDATES_LABEL: &str = "Updating...";

/// Schedules recomposition and stroke work on a fixed pool of worker slots.
///
/// Cloning is cheap; clones drive the same queues and pool. Calls may come
/// from any thread, though the queues are tuned for one thread producing
/// strokes and updates at a time.
#[derive(Clone)]
pub struct Scheduler {
	shared: Arc<SchedulerShared>,
}

struct SchedulerShared {
	config: RwLock<SchedulerConfig>,
	walkers: Arc<dyn WalkerFactory>,
	pool: JobSlotPool,
	updates: Mutex<UpdateQueue>,
	strokes: Mutex<StrokeQueue>,
	/// Held while finished merges are delivered; listeners may re-enter from the same thread.
	completions: ReentrantMutex<RefCell<UnboundedReceiver<SlotCompletion>>>,
	/// Set by `lock`; ticks return before dispatching anything.
	processing_blocked: AtomicBool,
	/// Nesting depth of `block_updates`.
	updates_lock_counter: AtomicUsize,
	/// Read-held while update jobs are dispatched, write-held to observe a quiet pool.
	updates_start: RwLock<()>,
	updates_finished: Mutex<()>,
	updates_finished_cond: Condvar,
	projection: RwLock<Option<Arc<dyn ProjectionUpdateListener>>>,
	progress: RwLock<Option<Arc<dyn ProgressProxy>>>,
}

impl fmt::Debug for Scheduler {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Scheduler")
			.field("jobs", &self.shared.pool.jobs_snapshot())
			.field("blocked", &self.shared.processing_blocked.load(Ordering::Acquire))
			.finish_non_exhaustive()
	}
}

impl Scheduler {
	/// Builds a scheduler and starts its worker pool.
	///
	/// `walkers` builds the rectangle walkers for update requests. Commands
	/// emitted by full-detail stroke jobs go to `undo_store`.
	pub fn new(config: SchedulerConfig, walkers: Arc<dyn WalkerFactory>, undo_store: Arc<dyn UndoStore>) -> Result<Self> {
		config.validate()?;
		let (sender, receiver) = mpsc::unbounded_channel();
		let pool = JobSlotPool::new(config.thread_count, sender)?;
		let updates = UpdateQueue::new(&config, Arc::clone(&walkers));
		tracing::debug!(thread_count = config.thread_count, balancing_ratio = config.balancing_ratio, "scheduler.new");

		let shared = Arc::new_cyclic(|weak: &Weak<SchedulerShared>| {
			pool.set_listener(weak.clone() as Weak<dyn SlotListener>);
			SchedulerShared {
				config: RwLock::new(config),
				walkers,
				pool,
				updates: Mutex::new(updates),
				strokes: Mutex::new(StrokeQueue::new(undo_store)),
				completions: ReentrantMutex::new(RefCell::new(receiver)),
				processing_blocked: AtomicBool::new(false),
				updates_lock_counter: AtomicUsize::new(0),
				updates_start: RwLock::new(()),
				updates_finished: Mutex::new(()),
				updates_finished_cond: Condvar::new(),
				projection: RwLock::new(None),
				progress: RwLock::new(None),
			}
		});
		Ok(Self { shared })
	}

	/// Current configuration.
	pub fn config(&self) -> SchedulerConfig {
		self.shared.config.read().clone()
	}

	/// Applies a new configuration.
	///
	/// Drains the pool first, so the worker count can change safely.
	pub fn reload(&self, config: SchedulerConfig) -> Result<()> {
		config.validate()?;
		self.lock();
		let applied = if config.thread_count == self.shared.pool.thread_count() {
			Ok(())
		} else {
			self.shared.pool.set_thread_count(config.thread_count)
		};
		if applied.is_ok() {
			self.shared.updates.lock().update_settings(&config);
			tracing::debug!(thread_count = config.thread_count, balancing_ratio = config.balancing_ratio, "scheduler.reload");
			*self.shared.config.write() = config;
		}
		self.unlock(false);
		applied
	}

	/// Receives the change rectangle of every successful merge.
	pub fn set_projection_update_listener(&self, listener: Arc<dyn ProjectionUpdateListener>) {
		*self.shared.projection.write() = Some(listener);
	}

	/// Receives backlog reports after every tick.
	pub fn set_progress_proxy(&self, progress: Arc<dyn ProgressProxy>) {
		*self.shared.progress.write() = Some(progress);
	}

	/// Marks `rect` of `node` dirty, the node being the cause of the change.
	pub fn update_projection(&self, node: NodeId, rect: Rect, crop: Rect) {
		let lod = self.current_level_of_detail();
		self.shared.updates.lock().add_update_job(node, rect, crop, lod);
		self.shared.process_queues();
	}

	/// Marks `rect` of `node` dirty without blaming the node for it.
	pub fn update_projection_no_filthy(&self, node: NodeId, rect: Rect, crop: Rect) {
		let lod = self.current_level_of_detail();
		self.shared.updates.lock().add_update_no_filthy_job(node, rect, crop, lod);
		self.shared.process_queues();
	}

	/// Queues an unconditional recomputation of the subtree under `root`.
	pub fn full_refresh_async(&self, root: NodeId, rect: Rect, crop: Rect) {
		let lod = self.current_level_of_detail();
		self.shared.updates.lock().add_full_refresh_job(root, rect, crop, lod);
		self.shared.process_queues();
	}

	/// Queues a maintenance job. It runs once the pool is otherwise empty.
	pub fn add_spontaneous_job(&self, job: Box<dyn SpontaneousJob>) {
		self.shared.updates.lock().add_spontaneous_job(job);
		self.shared.process_queues();
	}

	/// Recomputes the subtree under `root` synchronously, bypassing both queues.
	///
	/// Holds the scheduler lock for the duration. When the caller already holds
	/// it, the refresh runs without taking it again.
	pub fn full_refresh(&self, root: NodeId, rect: Rect, crop: Rect) {
		let take_lock = !self.shared.processing_blocked.load(Ordering::Acquire);
		if take_lock {
			self.lock();
		} else {
			tracing::warn!(%root, %rect, "scheduler.full_refresh_under_lock");
		}
		self.shared.pool.wait_for_done();

		let lod = self.current_level_of_detail();
		let mut walker = self.shared.walkers.create_walker(UpdateType::FullRefresh, crop, lod);
		walker.collect_rects(root, rect.intersected(crop));
		{
			let _pool = self.shared.pool.lock();
			self.shared.pool.add_merge_job(walker);
		}
		self.shared.pool.wait_for_done();
		self.shared.drain_completions();

		if take_lock {
			self.unlock(true);
		}
	}

	/// Registers a stroke and returns its id.
	pub fn start_stroke(&self, strategy: Box<dyn StrokeStrategy>) -> StrokeId {
		let id = self.shared.strokes.lock().start_stroke(strategy);
		self.shared.process_queues();
		id
	}

	/// Appends a dab job to an open stroke.
	pub fn add_job(&self, stroke: StrokeId, data: Box<dyn StrokeJobData>) {
		self.shared.strokes.lock().add_job(stroke, data);
		self.shared.process_queues();
	}

	/// Closes a stroke; its finish job runs after the queued dabs.
	pub fn end_stroke(&self, stroke: StrokeId) {
		self.shared.strokes.lock().end_stroke(stroke);
		self.shared.process_queues();
	}

	/// Cancels a stroke. Returns false if it is unknown, already cancelled, or
	/// one of its exclusive jobs is running.
	pub fn cancel_stroke(&self, stroke: StrokeId) -> bool {
		let cancelled = self.shared.strokes.lock().cancel_stroke(stroke, &self.shared.pool);
		self.shared.process_queues();
		cancelled
	}

	/// Cancels the oldest stroke that is not cancelled yet.
	pub fn try_cancel_current_stroke_async(&self) -> bool {
		let cancelled = self.shared.strokes.lock().try_cancel_current_stroke_async(&self.shared.pool);
		self.shared.process_queues();
		cancelled
	}

	/// Cancels the most recently ended stroke if it has not drained yet.
	pub fn try_undo_last_stroke_async(&self) -> UndoResult {
		let result = self.shared.strokes.lock().try_undo_last_stroke_async(&self.shared.pool);
		self.shared.process_queues();
		result
	}

	/// Requests a level of detail for strokes started from now on.
	pub fn set_desired_level_of_detail(&self, lod: u32) {
		self.shared.strokes.lock().set_desired_level_of_detail(lod);
		self.shared.process_queues();
	}

	/// Regenerates the reduced-detail caches of the active level.
	pub fn explicit_regenerate_level_of_detail(&self) {
		self.shared.strokes.lock().explicit_regenerate_level_of_detail();
		self.shared.process_queues();
	}

	/// Level of the running jobs, else the forced override, else full detail.
	pub fn current_level_of_detail(&self) -> u32 {
		self.shared
			.pool
			.current_level_of_detail()
			.or_else(|| self.shared.updates.lock().override_level_of_detail())
			.unwrap_or(0)
	}

	/// Builds the stroke that regenerates reduced-detail caches.
	pub fn set_lod_sync_stroke_strategy_factory(&self, factory: LodSyncStrategyFactory) {
		self.shared.strokes.lock().set_lod_sync_factory(factory);
	}

	/// Builds the system stroke queued ahead of full-detail work.
	pub fn set_suspend_updates_stroke_strategy_factory(&self, factory: StrokeStrategyFactory) {
		self.shared.strokes.lock().set_suspend_factory(factory);
	}

	/// Builds the system stroke queued after full-detail work.
	pub fn set_resume_updates_stroke_strategy_factory(&self, factory: StrokeStrategyFactory) {
		self.shared.strokes.lock().set_resume_factory(factory);
	}

	/// Returns true unless the head stroke cannot paint in wrap-around mode.
	pub fn wrap_around_mode_supported(&self) -> bool {
		self.shared.strokes.lock().wrap_around_mode_supported()
	}

	/// Adapter full-detail stroke jobs record their commands through.
	pub fn post_execution_undo_adapter(&self) -> Arc<PostExecutionUndoAdapter> {
		self.shared.strokes.lock().post_execution_undo_adapter()
	}

	/// Adapter reduced-detail stroke jobs record their commands through.
	pub fn lod_n_post_execution_undo_adapter(&self) -> Arc<PostExecutionUndoAdapter> {
		self.shared.strokes.lock().lod_n_post_execution_undo_adapter()
	}

	/// Runs one arbitration tick.
	pub fn process_queues(&self) {
		self.shared.process_queues();
	}

	/// Stops dispatching and waits for the running jobs.
	pub fn lock(&self) {
		self.shared.block_processing();
		self.shared.pool.wait_for_done();
	}

	/// Resumes dispatching.
	///
	/// `reset_lod_levels` tells the scheduler the image changed while locked,
	/// so reduced-detail caches are regenerated before the next preview.
	pub fn unlock(&self, reset_lod_levels: bool) {
		if reset_lod_levels {
			self.shared.strokes.lock().notify_ufo_changed_image();
		}
		self.shared.processing_blocked.store(false, Ordering::Release);
		self.shared.process_queues();
	}

	/// Locks the scheduler once both queues have drained.
	///
	/// Does not return while a stroke stays open.
	pub fn barrier_lock(&self) {
		loop {
			self.shared.processing_blocked.store(false, Ordering::Release);
			self.shared.process_queues();
			self.lock();
			if self.shared.queues_empty() {
				break;
			}
		}
	}

	/// Locks the scheduler if both queues are empty, without waiting for queued work.
	pub fn try_barrier_lock(&self) -> bool {
		if !self.shared.queues_empty() {
			return false;
		}
		self.lock();
		if !self.shared.queues_empty() {
			self.unlock(false);
			return false;
		}
		true
	}

	/// Returns true if no work is queued or running.
	pub fn is_idle(&self) -> bool {
		let idle = self.try_barrier_lock();
		if idle {
			self.unlock(false);
		}
		idle
	}

	/// Blocks until both queues are empty and the pool is idle.
	///
	/// Does not return while a stroke stays open or updates are blocked.
	pub fn wait_for_done(&self) {
		loop {
			self.shared.process_queues();
			self.shared.pool.wait_for_done();
			if self.shared.queues_empty() {
				break;
			}
		}
		self.shared.drain_completions();
	}

	/// Holds back update dispatch and waits until no merge job runs.
	///
	/// Strokes keep running. Calls nest; each needs a matching [`Scheduler::unblock_updates`].
	pub fn block_updates(&self) {
		let shared = &self.shared;
		let mut guard = shared.updates_finished.lock();
		let depth = shared.updates_lock_counter.fetch_add(1, Ordering::AcqRel) + 1;
		tracing::debug!(depth, "scheduler.block_updates");
		while shared.have_updates_running() {
			shared.updates_finished_cond.wait(&mut guard);
		}
	}

	/// Releases one [`Scheduler::block_updates`] and dispatches held-back updates.
	pub fn unblock_updates(&self) {
		let released = self
			.shared
			.updates_lock_counter
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| depth.checked_sub(1));
		match released {
			Ok(depth) => tracing::debug!(depth = depth - 1, "scheduler.unblock_updates"),
			Err(_) => tracing::warn!("scheduler.unblock_updates_unbalanced"),
		}
		self.shared.process_queues();
	}

	/// Counts of the jobs currently running.
	pub fn jobs_snapshot(&self) -> JobsSnapshot {
		self.shared.pool.jobs_snapshot()
	}
}

impl SchedulerShared {
	fn process_queues(&self) {
		self.drain_completions();
		self.wake_update_waiters();

		if self.processing_blocked.load(Ordering::Acquire) {
			return;
		}

		let exclusive = self.strokes.lock().needs_exclusive_access() || self.pool.jobs_snapshot().flags.contains(ContextSnapshot::HAS_EXCLUSIVE_JOB);
		if exclusive {
			self.process_strokes();
			if !self.strokes.lock().needs_exclusive_access() {
				self.try_process_updates();
			}
		} else {
			let ratio = self.config.read().balancing_ratio;
			let strokes = self.strokes.lock().size_metric();
			let updates = self.updates.lock().size_metric();
			if ratio * strokes as f64 <= updates as f64 {
				self.process_strokes();
				self.try_process_updates();
			} else {
				self.try_process_updates();
				self.process_strokes();
			}
		}

		self.apply_lod_change();
		self.report_progress();
	}

	fn process_strokes(&self) {
		let updates_pending = !self.updates.lock().is_empty();
		let _pool = self.pool.lock();
		if self.processing_blocked.load(Ordering::Acquire) {
			return;
		}
		self.strokes.lock().process_queue(&self.pool, updates_pending);
	}

	fn try_process_updates(&self) {
		let _start = self.updates_start.read();
		if self.updates_lock_counter.load(Ordering::Acquire) > 0 {
			return;
		}
		let _pool = self.pool.lock();
		if self.processing_blocked.load(Ordering::Acquire) {
			return;
		}
		self.updates.lock().process_queue(&self.pool);
	}

	/// Sets the blocked flag and waits out any dispatch already in progress.
	fn block_processing(&self) {
		self.processing_blocked.store(true, Ordering::Release);
		drop(self.pool.lock());
	}

	/// Delivers finished merges to the projection listener.
	fn drain_completions(&self) {
		let completions = self.completions.lock();
		let drained: Vec<SlotCompletion> = {
			let mut receiver = completions.borrow_mut();
			std::iter::from_fn(|| receiver.try_recv().ok()).collect()
		};
		let listener = self.projection.read().clone();
		let mut merged = false;
		for completion in drained {
			if completion.class != JobClass::Merge {
				continue;
			}
			merged = true;
			if completion.succeeded
				&& let Some(listener) = &listener
			{
				listener.notify_projection_updated(completion.change_rect);
			}
		}
		if merged {
			self.updates.lock().optimize();
		}
	}

	fn have_updates_running(&self) -> bool {
		let _start = self.updates_start.write();
		self.pool.jobs_snapshot().merge_jobs > 0
	}

	fn wake_update_waiters(&self) {
		if self.updates_lock_counter.load(Ordering::Acquire) > 0 && !self.have_updates_running() {
			let _guard = self.updates_finished.lock();
			self.updates_finished_cond.notify_all();
		}
	}

	fn apply_lod_change(&self) {
		let change = self.strokes.lock().take_lod_change();
		if let Some(lod) = change {
			self.updates.lock().set_override_level_of_detail((lod > 0).then_some(lod));
		}
	}

	fn report_progress(&self) {
		let Some(progress) = self.progress.read().clone() else {
			return;
		};
		let (open, size, label) = {
			let strokes = self.strokes.lock();
			(strokes.has_open_strokes(), strokes.size_metric(), strokes.current_stroke_name().map(str::to_owned))
		};
		if open {
			progress.hide();
			return;
		}
		let size = if size == 0 { self.updates.lock().size_metric() } else { size };
		if size == 0 {
			progress.hide();
		} else {
			progress.update_progress(size, label.as_deref().unwrap_or(UPDATES_LABEL));
		}
	}

	fn queues_empty(&self) -> bool {
		self.updates.lock().is_empty() && self.strokes.lock().is_empty()
	}
}

impl SlotListener for SchedulerShared {
	fn stroke_job_failed(&self, stroke: StrokeId, error: &JobError) {
		self.strokes.lock().job_failed(stroke, error);
	}

	fn slot_freed(&self) {
		self.process_queues();
	}
}
