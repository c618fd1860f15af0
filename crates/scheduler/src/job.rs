//! Job bodies and the context they run in.

use std::any::Any;
use std::fmt;

use parking_lot::{Mutex, MutexGuard};

use crate::error::JobError;
use crate::token::StrokeId;
use crate::undo::PostExecutionUndoAdapter;

/// Ordering policy of a stroke job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Sequentiality {
	/// Waits for every running stroke job, and nothing starts until it finishes.
	#[default]
	Sequential,
	/// Runs in parallel with other concurrent jobs.
	Concurrent,
	/// Like [`Sequentiality::Sequential`], and additionally waits for running
	/// merges and for the update queue to be empty.
	Barrier,
	/// Concurrent with everything except another uniquely concurrent job.
	UniquelyConcurrent,
}

impl Sequentiality {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Sequential => "sequential",
			Self::Concurrent => "concurrent",
			Self::Barrier => "barrier",
			Self::UniquelyConcurrent => "uniquely_concurrent",
		}
	}
}

/// Exclusivity policy of a stroke job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Exclusivity {
	/// May share the pool with other jobs.
	#[default]
	Normal,
	/// Starts only on an empty pool, and nothing else starts while it runs.
	Exclusive,
}

/// Per-job payload handed to a stroke's dab strategy.
pub trait StrokeJobData: Any + Send {
	/// Overrides the strategy's sequentiality for this job.
	fn sequentiality(&self) -> Option<Sequentiality> {
		None
	}

	/// Overrides the strategy's exclusivity for this job.
	fn exclusivity(&self) -> Option<Exclusivity> {
		None
	}

	/// Copy of this payload for the reduced-detail twin of the stroke.
	///
	/// Returning `None` means the payload cannot be replayed at `level`; the job
	/// is then only run at full detail.
	fn lod_clone(&self, level: u32) -> Option<Box<dyn StrokeJobData>> {
		let _ = level;
		None
	}
}

impl dyn StrokeJobData {
	/// Returns the payload as `T` if it is one.
	pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
		(self as &dyn Any).downcast_ref()
	}

	/// Returns the payload as `T` if it is one.
	pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
		(self as &mut dyn Any).downcast_mut()
	}
}

/// Executable body of one stroke phase (init, dab, finish, ...).
pub trait JobStrategy: Send + Sync {
	/// Runs one job. `data` is the payload passed to `add_job`, if any.
	fn run(&self, data: Option<&mut Box<dyn StrokeJobData>>, ctx: &JobContext<'_>) -> Result<(), JobError>;

	/// Default ordering policy for jobs of this phase.
	fn sequentiality(&self) -> Sequentiality {
		Sequentiality::Sequential
	}

	/// Default exclusivity policy for jobs of this phase.
	fn exclusivity(&self) -> Exclusivity {
		Exclusivity::Normal
	}
}

/// [`JobStrategy`] backed by a closure.
pub struct FnJobStrategy<F> {
	sequentiality: Sequentiality,
	exclusivity: Exclusivity,
	run: F,
}

impl<F> FnJobStrategy<F>
where
	F: Fn(Option<&mut Box<dyn StrokeJobData>>, &JobContext<'_>) -> Result<(), JobError> + Send + Sync,
{
	/// Wraps `run` with the given policies.
	pub fn new(sequentiality: Sequentiality, exclusivity: Exclusivity, run: F) -> Self {
		Self {
			sequentiality,
			exclusivity,
			run,
		}
	}
}

impl<F> fmt::Debug for FnJobStrategy<F> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FnJobStrategy")
			.field("sequentiality", &self.sequentiality)
			.field("exclusivity", &self.exclusivity)
			.finish_non_exhaustive()
	}
}

impl<F> JobStrategy for FnJobStrategy<F>
where
	F: Fn(Option<&mut Box<dyn StrokeJobData>>, &JobContext<'_>) -> Result<(), JobError> + Send + Sync,
{
	fn run(&self, data: Option<&mut Box<dyn StrokeJobData>>, ctx: &JobContext<'_>) -> Result<(), JobError> {
		(self.run)(data, ctx)
	}

	fn sequentiality(&self) -> Sequentiality {
		self.sequentiality
	}

	fn exclusivity(&self) -> Exclusivity {
		self.exclusivity
	}
}

/// Background maintenance work, e.g. cache prefetching.
///
/// Spontaneous jobs are never checked for rectangle overlap. They only start on
/// an empty pool, so two of them never run in parallel.
pub trait SpontaneousJob: Any + Send {
	/// Runs the job on a worker thread.
	fn run(&mut self, ctx: &JobContext<'_>) -> Result<(), JobError>;

	/// Level of detail the job works on.
	fn level_of_detail(&self) -> u32 {
		0
	}

	/// Returns true if queuing `self` makes the pending `other` redundant.
	fn overrides(&self, other: &(dyn SpontaneousJob + 'static)) -> bool {
		let _ = other;
		false
	}

	/// Exclusive spontaneous jobs keep every other job out of the pool.
	fn is_exclusive(&self) -> bool {
		false
	}
}

impl dyn SpontaneousJob {
	/// Returns the job as `T` if it is one. Handy in [`SpontaneousJob::overrides`].
	pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
		(self as &dyn Any).downcast_ref()
	}
}

/// What a running job knows about its surroundings.
pub struct JobContext<'a> {
	level_of_detail: u32,
	stroke: Option<StrokeId>,
	undo: Option<&'a PostExecutionUndoAdapter>,
	pool_lock: &'a Mutex<()>,
}

impl fmt::Debug for JobContext<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("JobContext")
			.field("level_of_detail", &self.level_of_detail)
			.field("stroke", &self.stroke)
			.finish_non_exhaustive()
	}
}

impl<'a> JobContext<'a> {
	pub(crate) fn new(level_of_detail: u32, stroke: Option<StrokeId>, undo: Option<&'a PostExecutionUndoAdapter>, pool_lock: &'a Mutex<()>) -> Self {
		Self {
			level_of_detail,
			stroke,
			undo,
			pool_lock,
		}
	}

	/// Level of detail the job runs at; 0 is full detail.
	pub fn level_of_detail(&self) -> u32 {
		self.level_of_detail
	}

	/// Stroke the job belongs to, for stroke jobs.
	pub fn stroke_id(&self) -> Option<StrokeId> {
		self.stroke
	}

	/// Undo adapter matching the job's level of detail, for stroke jobs.
	pub fn undo_adapter(&self) -> Option<&'a PostExecutionUndoAdapter> {
		self.undo
	}

	/// Takes the pool-wide lock.
	///
	/// The scheduler holds the same lock while it dispatches, so a job must not
	/// call back into the scheduler while holding the guard.
	pub fn pool_lock(&self) -> MutexGuard<'a, ()> {
		self.pool_lock.lock()
	}
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		(*message).to_owned()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"non-string panic payload".to_owned()
	}
}
