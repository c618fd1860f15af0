use std::collections::VecDeque;
use std::sync::Arc;

use super::StrokeStrategy;
use crate::job::{Exclusivity, JobStrategy, Sequentiality, StrokeJobData};
use crate::pool::StrokeJob;
use crate::token::StrokeId;
use crate::undo::PostExecutionUndoAdapter;

/// Role of a stroke in the queue layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StrokeKind {
	/// Full-detail stroke without a reduced-detail twin.
	Legacy,
	/// Full-detail half of a buddy pair.
	Lod0,
	/// Reduced-detail half of a buddy pair.
	LodN,
	/// System stroke freezing updates ahead of the full-detail group.
	Suspend,
	/// System stroke thawing updates after the full-detail group.
	Resume,
	/// System stroke regenerating reduced-detail caches.
	LodSync,
}

impl StrokeKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Legacy => "legacy",
			Self::Lod0 => "lod0",
			Self::LodN => "lodn",
			Self::Suspend => "suspend",
			Self::Resume => "resume",
			Self::LodSync => "lod_sync",
		}
	}

	/// Strokes started through the public API, as opposed to system strokes.
	pub const fn is_user(self) -> bool {
		matches!(self, Self::Legacy | Self::Lod0 | Self::LodN)
	}

	/// System strokes freeze the document, so all their jobs run exclusively.
	pub const fn is_system(self) -> bool {
		matches!(self, Self::Suspend | Self::Resume | Self::LodSync)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobPhase {
	Init,
	Dab,
	Finish,
	Cancel,
	Suspend,
	Resume,
}

impl JobPhase {
	const fn as_str(self) -> &'static str {
		match self {
			Self::Init => "init",
			Self::Dab => "dab",
			Self::Finish => "finish",
			Self::Cancel => "cancel",
			Self::Suspend => "suspend",
			Self::Resume => "resume",
		}
	}

	/// Suspend and resume jobs pair up across two strokes and survive cancellation.
	const fn is_cancellable(self) -> bool {
		!matches!(self, Self::Suspend | Self::Resume)
	}
}

struct QueuedJob {
	phase: JobPhase,
	strategy: Arc<dyn JobStrategy>,
	data: Option<Box<dyn StrokeJobData>>,
	sequentiality: Sequentiality,
	exclusivity: Exclusivity,
	level_of_detail: u32,
}

/// Arena record of one stroke. Jobs refer back to it by id only.
pub(crate) struct Stroke {
	id: StrokeId,
	kind: StrokeKind,
	level_of_detail: u32,
	strategy: Box<dyn StrokeStrategy>,
	dab: Option<Arc<dyn JobStrategy>>,
	finish: Option<Arc<dyn JobStrategy>>,
	cancel: Option<Arc<dyn JobStrategy>>,
	suspend: Option<Arc<dyn JobStrategy>>,
	resume: Option<Arc<dyn JobStrategy>>,
	jobs: VecDeque<QueuedJob>,
	undo: Arc<PostExecutionUndoAdapter>,
	forced_exclusive: bool,
	started: bool,
	ended: bool,
	cancelled: bool,
	buddy: Option<StrokeId>,
}

impl Stroke {
	pub fn new(id: StrokeId, strategy: Box<dyn StrokeStrategy>, kind: StrokeKind, level_of_detail: u32, undo: Arc<PostExecutionUndoAdapter>) -> Self {
		let init = strategy.create_init_strategy();
		let mut stroke = Self {
			id,
			kind,
			level_of_detail,
			dab: strategy.create_dab_strategy(),
			finish: strategy.create_finish_strategy(),
			cancel: strategy.create_cancel_strategy(),
			suspend: strategy.create_suspend_strategy(),
			resume: strategy.create_resume_strategy(),
			forced_exclusive: kind.is_system() || strategy.is_exclusive(),
			strategy,
			jobs: VecDeque::new(),
			undo,
			started: false,
			ended: false,
			cancelled: false,
			buddy: None,
		};
		if let Some(init) = init {
			let job = stroke.resolve(JobPhase::Init, init, None, level_of_detail);
			stroke.jobs.push_back(job);
		}
		stroke
	}

	pub fn id(&self) -> StrokeId {
		self.id
	}

	pub fn kind(&self) -> StrokeKind {
		self.kind
	}

	pub fn level_of_detail(&self) -> u32 {
		self.level_of_detail
	}

	pub fn name(&self) -> &str {
		self.strategy.name()
	}

	pub fn strategy(&self) -> &dyn StrokeStrategy {
		self.strategy.as_ref()
	}

	pub fn buddy(&self) -> Option<StrokeId> {
		self.buddy
	}

	pub fn set_buddy(&mut self, buddy: StrokeId) {
		self.buddy = Some(buddy);
	}

	/// A job of this stroke has been dispatched.
	pub fn is_started(&self) -> bool {
		self.started
	}

	pub fn is_ended(&self) -> bool {
		self.ended
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled
	}

	pub fn has_jobs(&self) -> bool {
		!self.jobs.is_empty()
	}

	pub fn job_count(&self) -> usize {
		self.jobs.len()
	}

	pub fn is_exclusive(&self) -> bool {
		self.forced_exclusive
	}

	/// Appends a dab job. Returns false if the strategy has no dab phase.
	pub fn add_job(&mut self, data: Box<dyn StrokeJobData>) -> bool {
		debug_assert!(!self.ended, "job added to an ended stroke");
		let Some(dab) = self.dab.clone() else {
			return false;
		};
		let job = self.resolve(JobPhase::Dab, dab, Some(data), self.level_of_detail);
		self.jobs.push_back(job);
		true
	}

	/// Appends the finish job. Returns false if the stroke was already ended.
	pub fn end(&mut self) -> bool {
		if self.ended {
			return false;
		}
		self.ended = true;
		if let Some(finish) = self.finish.clone() {
			let job = self.resolve(JobPhase::Finish, finish, None, self.level_of_detail);
			self.jobs.push_back(job);
		}
		true
	}

	/// Unwinds the stroke.
	///
	/// A stroke that never dispatched a job is dropped silently. A started one
	/// loses its pending jobs and gets the cancel job instead. Returns false if
	/// the stroke was already cancelled or had nothing left to unwind.
	pub fn cancel(&mut self) -> bool {
		if self.cancelled {
			return false;
		}
		if !self.started {
			self.clear_cancellable_jobs();
			self.cancelled = true;
			self.ended = true;
			return true;
		}
		if self.has_jobs() || !self.ended {
			self.unwind();
			return true;
		}
		self.cancelled = true;
		false
	}

	/// Isolates a failed job: pending jobs are dropped and the cancel job runs.
	pub fn fail(&mut self) {
		if !self.cancelled {
			self.unwind();
		}
	}

	fn unwind(&mut self) {
		self.clear_cancellable_jobs();
		if let Some(cancel) = self.cancel.clone() {
			let job = self.resolve(JobPhase::Cancel, cancel, None, self.level_of_detail);
			self.jobs.push_back(job);
		}
		self.cancelled = true;
		self.ended = true;
	}

	fn clear_cancellable_jobs(&mut self) {
		self.jobs.retain(|job| !job.phase.is_cancellable());
	}

	pub fn next_sequentiality(&self) -> Option<Sequentiality> {
		self.jobs.front().map(|job| job.sequentiality)
	}

	pub fn next_exclusivity(&self) -> Option<Exclusivity> {
		self.jobs.front().map(|job| job.exclusivity)
	}

	pub fn next_level_of_detail(&self) -> Option<u32> {
		self.jobs.front().map(|job| job.level_of_detail)
	}

	pub fn pop_job(&mut self) -> Option<StrokeJob> {
		let job = self.jobs.pop_front()?;
		self.started = true;
		Some(StrokeJob {
			stroke: self.id,
			phase: job.phase.as_str(),
			strategy: job.strategy,
			data: job.data,
			sequentiality: job.sequentiality,
			exclusivity: job.exclusivity,
			level_of_detail: job.level_of_detail,
			undo: Arc::clone(&self.undo),
		})
	}

	pub fn supports_suspension(&self) -> bool {
		self.started && !self.cancelled && self.suspend.is_some() && self.resume.is_some()
	}

	/// Lets `recipient` overtake this started stroke.
	///
	/// The recipient first runs this stroke's suspend job; this stroke runs its
	/// resume job before anything else once it is back at the head.
	pub fn suspend_for(&mut self, recipient: &mut Stroke) {
		let (Some(suspend), Some(resume)) = (self.suspend.clone(), self.resume.clone()) else {
			return;
		};
		let resume = self.resolve(JobPhase::Resume, resume, None, self.level_of_detail);
		self.jobs.push_front(resume);
		let suspend = recipient.resolve(JobPhase::Suspend, suspend, None, recipient.level_of_detail);
		recipient.jobs.push_front(suspend);
	}

	fn resolve(&self, phase: JobPhase, strategy: Arc<dyn JobStrategy>, data: Option<Box<dyn StrokeJobData>>, level_of_detail: u32) -> QueuedJob {
		let mut sequentiality = data.as_ref().and_then(|d| d.sequentiality()).unwrap_or_else(|| strategy.sequentiality());
		let mut exclusivity = data.as_ref().and_then(|d| d.exclusivity()).unwrap_or_else(|| strategy.exclusivity());
		if self.forced_exclusive {
			exclusivity = Exclusivity::Exclusive;
		}
		if self.kind == StrokeKind::LodSync {
			sequentiality = Sequentiality::Sequential;
		}
		QueuedJob {
			phase,
			strategy,
			data,
			sequentiality,
			exclusivity,
			level_of_detail,
		}
	}
}
