//! Undo plumbing between stroke jobs and the host's history.
//!
//! Commands reach the store after they have already been applied by a job, so
//! the scheduler only forwards them. A second store collects the commands of
//! reduced-detail execution so they never mix with full-detail history.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// An already executed, reversible edit.
pub trait UndoCommand: Send + Sync {
	/// Human readable name shown in history views.
	fn name(&self) -> &str;
}

/// Destination of executed commands.
pub trait UndoStore: Send + Sync {
	/// Appends a command that has already been applied.
	fn add_command(&self, command: Box<dyn UndoCommand>);

	/// Drops everything that could still be redone.
	fn purge_redo_state(&self);
}

/// In-memory store used for reduced-detail commands.
#[derive(Default)]
pub struct MemoryUndoStore {
	commands: Mutex<Vec<Box<dyn UndoCommand>>>,
	redo_purges: AtomicU64,
}

impl fmt::Debug for MemoryUndoStore {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryUndoStore").field("commands", &self.len()).finish()
	}
}

impl MemoryUndoStore {
	/// Creates an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of stored commands.
	pub fn len(&self) -> usize {
		self.commands.lock().len()
	}

	/// Returns true if no command is stored.
	pub fn is_empty(&self) -> bool {
		self.commands.lock().is_empty()
	}

	/// Names of the stored commands, oldest first.
	pub fn names(&self) -> Vec<String> {
		self.commands.lock().iter().map(|c| c.name().to_owned()).collect()
	}

	/// How many times the redo state was purged.
	pub fn redo_purges(&self) -> u64 {
		self.redo_purges.load(Ordering::Acquire)
	}

	/// Forgets every stored command.
	pub fn clear(&self) {
		self.commands.lock().clear();
	}
}

impl UndoStore for MemoryUndoStore {
	fn add_command(&self, command: Box<dyn UndoCommand>) {
		self.commands.lock().push(command);
	}

	fn purge_redo_state(&self) {
		self.redo_purges.fetch_add(1, Ordering::AcqRel);
	}
}

/// Forwards commands emitted by stroke jobs to an [`UndoStore`].
pub struct PostExecutionUndoAdapter {
	store: Arc<dyn UndoStore>,
	added: AtomicU64,
}

impl fmt::Debug for PostExecutionUndoAdapter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PostExecutionUndoAdapter").field("added", &self.command_count()).finish()
	}
}

impl PostExecutionUndoAdapter {
	/// Wraps `store`.
	pub fn new(store: Arc<dyn UndoStore>) -> Self {
		Self {
			store,
			added: AtomicU64::new(0),
		}
	}

	/// Records an executed command.
	pub fn add_command(&self, command: Box<dyn UndoCommand>) {
		let index = self.added.fetch_add(1, Ordering::AcqRel);
		tracing::trace!(index, command = command.name(), "undo.add_command");
		self.store.add_command(command);
	}

	/// Clears the redo history of the underlying store.
	pub fn purge_redo_state(&self) {
		tracing::trace!("undo.purge_redo_state");
		self.store.purge_redo_state();
	}

	/// Number of commands forwarded through this adapter.
	pub fn command_count(&self) -> u64 {
		self.added.load(Ordering::Acquire)
	}
}
