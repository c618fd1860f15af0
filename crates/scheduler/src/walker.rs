use impasto_primitives::{NodeId, Rect};

use crate::error::JobError;
use crate::job::JobContext;

/// Flavor of recomposition requested for a dirty region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateType {
	/// Regular update; the originating node is marked as the cause of the change.
	Update,
	/// Administrative refresh; the originating node is not marked as the cause.
	UpdateNoFilthy,
	/// Unconditional recomputation of the whole subtree.
	FullRefresh,
}

impl UpdateType {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Update => "update",
			Self::UpdateNoFilthy => "update_no_filthy",
			Self::FullRefresh => "full_refresh",
		}
	}
}

/// Computes and recomposes the set of rectangles affected by a dirty region.
///
/// The traversal of the document graph and the compositing itself live outside
/// the scheduler; it only relies on the rectangle and level-of-detail contract.
pub trait RectsWalker: Send {
	/// Walks the graph from `node` and records which areas `rect` affects.
	///
	/// Called again whenever the request this walker serves grows.
	fn collect_rects(&mut self, node: NodeId, rect: Rect);

	/// Region the merge reads from. Two running jobs never share access area.
	fn access_rect(&self) -> Rect;

	/// Region the merge writes. Reported to the projection listener on success.
	fn change_rect(&self) -> Rect;

	/// Level of detail the merge runs at.
	fn level_of_detail(&self) -> u32;

	/// Performs the recomposition on a worker thread.
	fn merge(&mut self, ctx: &JobContext<'_>) -> Result<(), JobError>;
}

/// Builds walkers for update requests.
pub trait WalkerFactory: Send + Sync {
	/// Creates an empty walker; the queue calls [`RectsWalker::collect_rects`] on it.
	fn create_walker(&self, update_type: UpdateType, crop_rect: Rect, level_of_detail: u32) -> Box<dyn RectsWalker>;
}
