//! Basic geometry and identity types shared by the impasto engines.
//!
//! Everything here is plain data: integer pixel rectangles and opaque handles
//! to document nodes. Nothing in this crate knows about threads or jobs.

#![warn(missing_docs)]

/// Opaque handles to document nodes.
pub mod node;
/// Integer pixel rectangles.
pub mod rect;

pub use node::NodeId;
pub use rect::Rect;
