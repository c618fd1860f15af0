use std::sync::Arc;

use crate::job::JobStrategy;

/// Describes one kind of stroke and produces the job bodies of its phases.
///
/// Every phase is optional. A stroke without an init strategy counts as
/// initialized right away; a stroke without a dab strategy rejects `add_job`.
pub trait StrokeStrategy: Send + Sync {
	/// Label used in progress reports and logs.
	fn name(&self) -> &str;

	/// Body of the job queued when the stroke starts.
	fn create_init_strategy(&self) -> Option<Arc<dyn JobStrategy>> {
		None
	}

	/// Body of the jobs queued by `add_job`.
	fn create_dab_strategy(&self) -> Option<Arc<dyn JobStrategy>> {
		None
	}

	/// Body of the job queued by `end_stroke`.
	fn create_finish_strategy(&self) -> Option<Arc<dyn JobStrategy>> {
		None
	}

	/// Body of the job queued when the stroke is cancelled or one of its jobs fails.
	fn create_cancel_strategy(&self) -> Option<Arc<dyn JobStrategy>> {
		None
	}

	/// Body run before a reduced-detail stroke overtakes this started stroke.
	fn create_suspend_strategy(&self) -> Option<Arc<dyn JobStrategy>> {
		None
	}

	/// Body run when this stroke continues after being overtaken.
	fn create_resume_strategy(&self) -> Option<Arc<dyn JobStrategy>> {
		None
	}

	/// Reduced-detail twin of this stroke, or `None` if the stroke only runs at full detail.
	fn create_lod_clone(&self, level: u32) -> Option<Box<dyn StrokeStrategy>> {
		let _ = level;
		None
	}

	/// Whether starting this stroke ends every other open stroke.
	fn requests_other_strokes_to_end(&self) -> bool {
		true
	}

	/// Whether starting this stroke clears the redo history.
	fn clears_redo_on_start(&self) -> bool {
		true
	}

	/// Whether the stroke must run between the registered suspend and resume strokes.
	fn needs_suspend_updates(&self) -> bool {
		false
	}

	/// Whether the global wrap-around canvas mode may stay on while this stroke is active.
	fn wrap_around_mode_supported(&self) -> bool {
		false
	}

	/// Forces every job of the stroke to be exclusive.
	fn is_exclusive(&self) -> bool {
		false
	}

	/// Whether the stroke may be cancelled by asynchronous undo.
	fn is_asynchronously_cancellable(&self) -> bool {
		true
	}
}

/// Builds the stroke that regenerates reduced-detail caches.
///
/// Receives the target level and whether the result may be discarded without
/// being synchronized first.
pub type LodSyncStrategyFactory = Arc<dyn Fn(u32, bool) -> Box<dyn StrokeStrategy> + Send + Sync>;

/// Builds the system strokes that freeze and thaw updates around full-detail work.
pub type StrokeStrategyFactory = Arc<dyn Fn() -> Box<dyn StrokeStrategy> + Send + Sync>;

/// Outcome of [`Scheduler::try_undo_last_stroke_async`](crate::Scheduler::try_undo_last_stroke_async).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoResult {
	/// The stroke was cancelled and its effects will be reverted.
	Ok,
	/// No revertible stroke is queued, or it got too far to be unwound.
	Fail,
	/// The stroke does not support asynchronous cancellation.
	Unsupported,
}
