//! Fixed set of worker slots executing merge, stroke and spontaneous jobs.
//!
//! The pool only enforces what it can see: rectangle overlap between merges,
//! level-of-detail purity and the exclusive gate. Ordering between stroke jobs
//! is decided by the stroke queue before a job ever reaches a slot.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use impasto_primitives::Rect;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{JobError, Result};
use crate::job::{Exclusivity, JobContext, JobStrategy, Sequentiality, SpontaneousJob, StrokeJobData, panic_message};
use crate::lod::LodCounter;
use crate::token::StrokeId;
use crate::undo::PostExecutionUndoAdapter;
use crate::walker::RectsWalker;
use crate::{JobClass, spawn};


bitflags! {
	/// Kinds of jobs currently running in the pool.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct ContextSnapshot: u8 {
		/// At least one merge job runs.
		const HAS_MERGE_JOB = 1 << 0;
		/// A sequential stroke job runs.
		const HAS_SEQUENTIAL_JOB = 1 << 1;
		/// A concurrent stroke job runs.
		const HAS_CONCURRENT_JOB = 1 << 2;
		/// A barrier stroke job runs.
		const HAS_BARRIER_JOB = 1 << 3;
		/// A uniquely concurrent stroke job runs.
		const HAS_UNIQUELY_CONCURRENT_JOB = 1 << 4;
		/// An exclusive job runs.
		const HAS_EXCLUSIVE_JOB = 1 << 5;
		/// A spontaneous job runs.
		const HAS_SPONTANEOUS_JOB = 1 << 6;
	}
}

/// Point-in-time counts of running jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobsSnapshot {
	/// Running merge jobs.
	pub merge_jobs: usize,
	/// Running stroke jobs.
	pub stroke_jobs: usize,
	/// Running spontaneous jobs.
	pub spontaneous_jobs: usize,
	/// Kinds of the running jobs.
	pub flags: ContextSnapshot,
}

impl JobsSnapshot {
	/// Returns true if no slot is busy.
	pub fn is_empty(&self) -> bool {
		self.merge_jobs == 0 && self.stroke_jobs == 0 && self.spontaneous_jobs == 0
	}
}

/// A stroke job ready for dispatch.
pub(crate) struct StrokeJob {
	pub stroke: StrokeId,
	pub phase: &'static str,
	pub strategy: Arc<dyn JobStrategy>,
	pub data: Option<Box<dyn StrokeJobData>>,
	pub sequentiality: Sequentiality,
	pub exclusivity: Exclusivity,
	pub level_of_detail: u32,
	pub undo: Arc<PostExecutionUndoAdapter>,
}

/// Sent by a slot right before it becomes free again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotCompletion {
	pub slot: usize,
	pub class: JobClass,
	pub change_rect: Rect,
	pub succeeded: bool,
}

/// Receives slot events on the worker thread that produced them.
pub(crate) trait SlotListener: Send + Sync {
	/// A stroke job returned an error or panicked. Called while the slot is still busy.
	fn stroke_job_failed(&self, stroke: StrokeId, error: &JobError);

	/// A slot became free.
	fn slot_freed(&self);
}

#[derive(Debug, Clone, Copy)]
struct SlotInfo {
	class: JobClass,
	level_of_detail: u32,
	access_rect: Rect,
	change_rect: Rect,
	sequentiality: Option<Sequentiality>,
	exclusive: bool,
	stroke: Option<StrokeId>,
}

enum SlotWork {
	Merge(Box<dyn RectsWalker>),
	Stroke(StrokeJob),
	Spontaneous(Box<dyn SpontaneousJob>),
}

struct PoolShared {
	slots: Mutex<Vec<Option<SlotInfo>>>,
	/// Signalled whenever a slot is cleared.
	idle: Condvar,
	lod: LodCounter,
	/// Pool-wide lock held by the dispatching thread and available to jobs.
	pool_lock: Mutex<()>,
	/// Write-locked by exclusive jobs, read-locked by every other job.
	exclusive_gate: RwLock<()>,
	completions: UnboundedSender<SlotCompletion>,
	listener: RwLock<Option<Weak<dyn SlotListener>>>,
}

/// Bounded set of worker slots backed by a blocking thread pool.
///
/// `is_job_allowed` and the `add_*_job` methods are not atomic together. Every
/// caller holds [`JobSlotPool::lock`] from the check to the submission; workers
/// only ever free slots, so a positive check stays valid until then.
pub(crate) struct JobSlotPool {
	shared: Arc<PoolShared>,
	runtime: Mutex<Option<Runtime>>,
}

impl JobSlotPool {
	pub fn new(thread_count: usize, completions: UnboundedSender<SlotCompletion>) -> Result<Self> {
		let runtime = spawn::build_runtime(thread_count)?;
		Ok(Self {
			shared: Arc::new(PoolShared {
				slots: Mutex::new(vec![None; thread_count]),
				idle: Condvar::new(),
				lod: LodCounter::default(),
				pool_lock: Mutex::new(()),
				exclusive_gate: RwLock::new(()),
				completions,
				listener: RwLock::new(None),
			}),
			runtime: Mutex::new(Some(runtime)),
		})
	}

	pub fn set_listener(&self, listener: Weak<dyn SlotListener>) {
		*self.shared.listener.write() = Some(listener);
	}

	pub fn thread_count(&self) -> usize {
		self.shared.slots.lock().len()
	}

	/// Resizes the pool. Must only be called while the pool is idle.
	pub fn set_thread_count(&self, thread_count: usize) -> Result<()> {
		let runtime = spawn::build_runtime(thread_count)?;
		{
			let mut slots = self.shared.slots.lock();
			if slots.iter().any(Option::is_some) {
				tracing::error!(thread_count, "pool.resize_while_busy");
				debug_assert!(false, "pool resized while jobs are running");
				return Ok(());
			}
			slots.clear();
			slots.resize(thread_count, None);
		}
		let previous = self.runtime.lock().replace(runtime);
		if let Some(previous) = previous {
			previous.shutdown_background();
		}
		tracing::debug!(thread_count, "pool.resized");
		Ok(())
	}

	/// Returns true if `walker` may start now.
	///
	/// Rejects a walker whose level of detail differs from the running jobs, and
	/// one whose rectangles collide with a running job: access against access,
	/// and each side's change rectangle against the other's access rectangle.
	/// Nothing may join a running exclusive job.
	pub fn is_job_allowed(&self, walker: &dyn RectsWalker) -> bool {
		let lod = walker.level_of_detail();
		if self.shared.lod.read().is_some_and(|running| running != lod) {
			return false;
		}
		let access = walker.access_rect();
		let change = walker.change_rect();
		let slots = self.shared.slots.lock();
		!slots
			.iter()
			.flatten()
			.any(|job| job.exclusive || job.access_rect.intersects(access) || job.access_rect.intersects(change) || job.change_rect.intersects(access))
	}

	pub fn has_spare_thread(&self) -> bool {
		self.shared.slots.lock().iter().any(Option::is_none)
	}

	pub fn spare_thread_count(&self) -> usize {
		self.shared.slots.lock().iter().filter(|slot| slot.is_none()).count()
	}

	pub fn jobs_snapshot(&self) -> JobsSnapshot {
		let slots = self.shared.slots.lock();
		let mut snapshot = JobsSnapshot::default();
		for job in slots.iter().flatten() {
			match job.class {
				JobClass::Merge => {
					snapshot.merge_jobs += 1;
					snapshot.flags |= ContextSnapshot::HAS_MERGE_JOB;
				}
				JobClass::Stroke => {
					snapshot.stroke_jobs += 1;
					snapshot.flags |= match job.sequentiality {
						Some(Sequentiality::Concurrent) => ContextSnapshot::HAS_CONCURRENT_JOB,
						Some(Sequentiality::Barrier) => ContextSnapshot::HAS_BARRIER_JOB,
						Some(Sequentiality::UniquelyConcurrent) => ContextSnapshot::HAS_UNIQUELY_CONCURRENT_JOB,
						Some(Sequentiality::Sequential) | None => ContextSnapshot::HAS_SEQUENTIAL_JOB,
					};
				}
				JobClass::Spontaneous => {
					snapshot.spontaneous_jobs += 1;
					snapshot.flags |= ContextSnapshot::HAS_SPONTANEOUS_JOB;
				}
			}
			if job.exclusive {
				snapshot.flags |= ContextSnapshot::HAS_EXCLUSIVE_JOB;
			}
		}
		snapshot
	}

	/// Returns true if an exclusive job of `stroke` occupies a slot.
	pub fn is_exclusive_job_running_for(&self, stroke: StrokeId) -> bool {
		self.shared.slots.lock().iter().flatten().any(|job| job.exclusive && job.stroke == Some(stroke))
	}

	/// Level of detail of the running jobs, or `None` when the pool is idle.
	pub fn current_level_of_detail(&self) -> Option<u32> {
		self.shared.lod.read()
	}

	/// Takes the pool-wide lock. Released when the guard drops.
	pub fn lock(&self) -> MutexGuard<'_, ()> {
		self.shared.pool_lock.lock()
	}

	/// Blocks until every slot is idle.
	pub fn wait_for_done(&self) {
		let mut slots = self.shared.slots.lock();
		while slots.iter().any(Option::is_some) {
			self.shared.idle.wait(&mut slots);
		}
	}

	pub fn add_merge_job(&self, walker: Box<dyn RectsWalker>) {
		let info = SlotInfo {
			class: JobClass::Merge,
			level_of_detail: walker.level_of_detail(),
			access_rect: walker.access_rect(),
			change_rect: walker.change_rect(),
			sequentiality: None,
			exclusive: false,
			stroke: None,
		};
		self.install(info, SlotWork::Merge(walker));
	}

	pub fn add_stroke_job(&self, job: StrokeJob) {
		tracing::trace!(
			stroke = %job.stroke,
			phase = job.phase,
			sequentiality = job.sequentiality.as_str(),
			exclusive = job.exclusivity == Exclusivity::Exclusive,
			lod = job.level_of_detail,
			"pool.add_stroke_job"
		);
		let info = SlotInfo {
			class: JobClass::Stroke,
			level_of_detail: job.level_of_detail,
			access_rect: Rect::ZERO,
			change_rect: Rect::ZERO,
			sequentiality: Some(job.sequentiality),
			exclusive: job.exclusivity == Exclusivity::Exclusive,
			stroke: Some(job.stroke),
		};
		self.install(info, SlotWork::Stroke(job));
	}

	pub fn add_spontaneous_job(&self, job: Box<dyn SpontaneousJob>) {
		let info = SlotInfo {
			class: JobClass::Spontaneous,
			level_of_detail: job.level_of_detail(),
			access_rect: Rect::ZERO,
			change_rect: Rect::ZERO,
			sequentiality: None,
			exclusive: job.is_exclusive(),
			stroke: None,
		};
		self.install(info, SlotWork::Spontaneous(job));
	}

	fn install(&self, info: SlotInfo, work: SlotWork) {
		let runtime = self.runtime.lock();
		let Some(runtime) = runtime.as_ref() else {
			tracing::error!(job_class = info.class.as_str(), "pool.shut_down");
			return;
		};

		let index = {
			let mut slots = self.shared.slots.lock();
			let Some(index) = slots.iter().position(Option::is_none) else {
				tracing::error!(job_class = info.class.as_str(), "pool.no_spare_slot");
				debug_assert!(false, "job submitted to a pool without a spare slot");
				return;
			};
			if !self.shared.lod.add_lod(info.level_of_detail) {
				tracing::error!(
					job_class = info.class.as_str(),
					lod = info.level_of_detail,
					running = ?self.shared.lod.read(),
					"pool.lod_mismatch"
				);
				debug_assert!(false, "job submitted with a level of detail different from the running jobs");
				return;
			}
			slots[index] = Some(info);
			index
		};

		tracing::trace!(job_class = info.class.as_str(), slot = index, lod = info.level_of_detail, "pool.install");
		let shared = Arc::clone(&self.shared);
		spawn::spawn_blocking(runtime, info.class, index, move || run_slot(&shared, index, info, work));
	}
}

impl Drop for JobSlotPool {
	fn drop(&mut self) {
		if let Some(runtime) = self.runtime.get_mut().take() {
			runtime.shutdown_background();
		}
	}
}

fn run_slot(shared: &PoolShared, index: usize, info: SlotInfo, work: SlotWork) {
	let outcome = if info.exclusive {
		let _gate = shared.exclusive_gate.write();
		execute(shared, &info, work)
	} else {
		let _gate = shared.exclusive_gate.read();
		execute(shared, &info, work)
	};
	finish(shared, index, &info, outcome);
}

fn execute(shared: &PoolShared, info: &SlotInfo, work: SlotWork) -> std::result::Result<(), JobError> {
	let result = catch_unwind(AssertUnwindSafe(|| match work {
		SlotWork::Merge(mut walker) => walker.merge(&JobContext::new(info.level_of_detail, None, None, &shared.pool_lock)),
		SlotWork::Stroke(mut job) => {
			let ctx = JobContext::new(info.level_of_detail, Some(job.stroke), Some(job.undo.as_ref()), &shared.pool_lock);
			job.strategy.run(job.data.as_mut(), &ctx)
		}
		SlotWork::Spontaneous(mut job) => job.run(&JobContext::new(info.level_of_detail, None, None, &shared.pool_lock)),
	}));
	result.unwrap_or_else(|payload| Err(JobError::Panicked(panic_message(payload.as_ref()))))
}

fn finish(shared: &PoolShared, index: usize, info: &SlotInfo, outcome: std::result::Result<(), JobError>) {
	let listener = shared.listener.read().as_ref().and_then(Weak::upgrade);

	if let Err(error) = &outcome {
		match info.stroke {
			Some(stroke) => {
				tracing::warn!(%stroke, slot = index, %error, "pool.stroke_job_failed");
				if let Some(listener) = &listener {
					listener.stroke_job_failed(stroke, error);
				}
			}
			None => tracing::warn!(job_class = info.class.as_str(), slot = index, %error, "pool.job_failed"),
		}
	}

	{
		let mut slots = shared.slots.lock();
		shared.lod.remove_lod();
		// The receiver only disappears together with the scheduler.
		let _ = shared.completions.send(SlotCompletion {
			slot: index,
			class: info.class,
			change_rect: info.change_rect,
			succeeded: outcome.is_ok(),
		});
		if let Some(slot) = slots.get_mut(index) {
			*slot = None;
		}
		shared.idle.notify_all();
	}
	tracing::trace!(job_class = info.class.as_str(), slot = index, "pool.slot_freed");

	if let Some(listener) = listener {
		listener.slot_freed();
	}
}
