use core::fmt;

/// Handle to a node of the layered document.
///
/// The scheduler never dereferences a node; it only carries the handle from an
/// update request to the walker that interprets it. Equality is identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u64);

impl NodeId {
	/// Returns the raw handle value.
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "node#{}", self.0)
	}
}

impl From<u64> for NodeId {
	fn from(value: u64) -> Self {
		Self(value)
	}
}
