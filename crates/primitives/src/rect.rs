use core::cmp::{max, min};
use core::fmt;


/// A rectangular region of the canvas in pixel coordinates.
///
/// The origin is the top-left corner, with x increasing to the right and y
/// increasing downward. `right()` and `bottom()` are exclusive, so a rectangle
/// with zero width or height covers no pixels and never intersects anything.
///
/// Coordinates may be negative: layers can extend past the image bounds.
///
/// # Examples
///
/// ```
/// use impasto_primitives::Rect;
///
/// let a = Rect::new(0, 0, 64, 64);
/// let b = Rect::new(32, 32, 64, 64);
/// assert!(a.intersects(b));
/// assert_eq!(a.intersected(b), Rect::new(32, 32, 32, 32));
/// assert_eq!(a.united(b), Rect::new(0, 0, 96, 96));
/// ```
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rect {
	/// The x coordinate of the top left corner.
	pub x: i32,
	/// The y coordinate of the top left corner.
	pub y: i32,
	/// The width. Negative widths are normalized to zero by [`Rect::new`].
	pub width: i32,
	/// The height. Negative heights are normalized to zero by [`Rect::new`].
	pub height: i32,
}

impl fmt::Display for Rect {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
	}
}

impl Rect {
	/// A zero sized rectangle at the origin.
	pub const ZERO: Self = Self {
		x: 0,
		y: 0,
		width: 0,
		height: 0,
	};

	/// Creates a new rectangle. Negative sizes are clamped to zero.
	pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
		Self {
			x,
			y,
			width: if width < 0 { 0 } else { width },
			height: if height < 0 { 0 } else { height },
		}
	}

	/// Creates a rectangle from its left/top and exclusive right/bottom edges.
	pub const fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> Self {
		Self::new(left, top, right.saturating_sub(left), bottom.saturating_sub(top))
	}

	/// The area in pixels.
	pub const fn area(self) -> i64 {
		(self.width as i64) * (self.height as i64)
	}

	/// Returns true if the rectangle covers no pixels.
	pub const fn is_empty(self) -> bool {
		self.width <= 0 || self.height <= 0
	}

	/// Returns the left coordinate.
	pub const fn left(self) -> i32 {
		self.x
	}

	/// Returns the first column outside of the rectangle.
	pub const fn right(self) -> i32 {
		self.x.saturating_add(self.width)
	}

	/// Returns the top coordinate.
	pub const fn top(self) -> i32 {
		self.y
	}

	/// Returns the first row outside of the rectangle.
	pub const fn bottom(self) -> i32 {
		self.y.saturating_add(self.height)
	}

	/// Returns true if both rectangles share at least one pixel.
	pub const fn intersects(self, other: Self) -> bool {
		!self.is_empty() && !other.is_empty() && self.x < other.right() && other.x < self.right() && self.y < other.bottom() && other.y < self.bottom()
	}

	/// Returns true if `other` lies entirely inside this rectangle.
	///
	/// An empty `other` is contained by any non-empty rectangle.
	pub const fn contains(self, other: Self) -> bool {
		if self.is_empty() {
			return false;
		}
		if other.is_empty() {
			return true;
		}
		other.x >= self.x && other.y >= self.y && other.right() <= self.right() && other.bottom() <= self.bottom()
	}

	/// Returns the bounding rectangle of both.
	///
	/// Empty rectangles do not contribute, so uniting with an empty rectangle
	/// returns the other one unchanged.
	#[must_use = "method returns the united value"]
	pub fn united(self, other: Self) -> Self {
		if self.is_empty() {
			return other;
		}
		if other.is_empty() {
			return self;
		}
		Self::from_edges(
			min(self.x, other.x),
			min(self.y, other.y),
			max(self.right(), other.right()),
			max(self.bottom(), other.bottom()),
		)
	}

	/// Returns the shared area, or [`Rect::ZERO`] when the rectangles do not intersect.
	#[must_use = "method returns the intersected value"]
	pub fn intersected(self, other: Self) -> Self {
		if !self.intersects(other) {
			return Self::ZERO;
		}
		Self::from_edges(
			max(self.x, other.x),
			max(self.y, other.y),
			min(self.right(), other.right()),
			min(self.bottom(), other.bottom()),
		)
	}

	/// Grows the rectangle by `margin` pixels on every side.
	#[must_use = "method returns the adjusted value"]
	pub const fn adjusted(self, margin: i32) -> Self {
		Self::from_edges(
			self.x.saturating_sub(margin),
			self.y.saturating_sub(margin),
			self.right().saturating_add(margin),
			self.bottom().saturating_add(margin),
		)
	}
}
