use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a stroke, issued when the stroke is started.
///
/// Ids are never reused by the scheduler that issued them, so a stale id simply
/// stops resolving once its stroke has drained from the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrokeId(pub(crate) u64);

impl StrokeId {
	/// Returns the raw id value.
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for StrokeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "stroke#{}", self.0)
	}
}

/// Monotonic clock issuing stroke ids.
#[derive(Debug, Default)]
pub(crate) struct StrokeIdClock {
	next: AtomicU64,
}

impl StrokeIdClock {
	/// Returns the next stroke id, starting at 1.
	pub fn next(&self) -> StrokeId {
		StrokeId(self.next.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
	}
}
