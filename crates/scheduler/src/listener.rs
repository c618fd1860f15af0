use impasto_primitives::Rect;

/// Receives the regions recomposed by finished merge jobs.
pub trait ProjectionUpdateListener: Send + Sync {
	/// Called once per successful merge with the walker's change rectangle.
	fn notify_projection_updated(&self, rect: Rect);
}

/// Presentation hook for outstanding work.
pub trait ProgressProxy: Send + Sync {
	/// Reports the remaining backlog and a label describing it.
	fn update_progress(&self, size: usize, label: &str);

	/// Hides the indicator.
	fn hide(&self);
}
