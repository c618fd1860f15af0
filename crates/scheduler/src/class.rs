/// Kinds of work a pool slot can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobClass {
	/// Recomposition of a dirty region, produced by the update queue or a synchronous refresh.
	Merge,
	/// One step of a stroke, produced by the stroke queue.
	Stroke,
	/// Background maintenance work that only runs when the pool is otherwise empty.
	Spontaneous,
}

impl JobClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Merge => "merge",
			Self::Stroke => "stroke",
			Self::Spontaneous => "spontaneous",
		}
	}
}
