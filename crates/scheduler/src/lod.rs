use std::sync::atomic::{AtomicU64, Ordering};

const COUNT_MASK: u64 = 0xffff_ffff;

/// Counts running jobs together with the level of detail they share.
///
/// The count and the level live in one atomic word, so readers always see a
/// consistent pair. While the count is non-zero every new job must carry the
/// same level; once it drops to zero the next job may pick any level.
#[derive(Debug, Default)]
pub(crate) struct LodCounter {
	state: AtomicU64,
}

const fn pack(count: u32, lod: u32) -> u64 {
	((lod as u64) << 32) | count as u64
}

const fn unpack(state: u64) -> (u32, u32) {
	((state & COUNT_MASK) as u32, (state >> 32) as u32)
}

impl LodCounter {
	/// Registers a job running at `lod`.
	///
	/// Returns false and leaves the counter untouched when jobs of a different
	/// level are already running.
	pub fn add_lod(&self, lod: u32) -> bool {
		let mut current = self.state.load(Ordering::Acquire);
		loop {
			let (count, running) = unpack(current);
			if count > 0 && running != lod {
				return false;
			}
			match self.state.compare_exchange_weak(current, pack(count + 1, lod), Ordering::AcqRel, Ordering::Acquire) {
				Ok(_) => return true,
				Err(actual) => current = actual,
			}
		}
	}

	/// Unregisters one job.
	pub fn remove_lod(&self) {
		let mut current = self.state.load(Ordering::Acquire);
		loop {
			let (count, lod) = unpack(current);
			debug_assert!(count > 0, "lod counter underflow");
			if count == 0 {
				return;
			}
			match self.state.compare_exchange_weak(current, pack(count - 1, lod), Ordering::AcqRel, Ordering::Acquire) {
				Ok(_) => return,
				Err(actual) => current = actual,
			}
		}
	}

	/// Level shared by the running jobs, or `None` when nothing runs.
	pub fn read(&self) -> Option<u32> {
		let (count, lod) = unpack(self.state.load(Ordering::Acquire));
		(count > 0).then_some(lod)
	}
}
