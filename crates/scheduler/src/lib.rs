#![cfg_attr(test, allow(unused_crate_dependencies))]
//! Concurrent update scheduler for a layered raster editor.
//!
//! Two producers share one bounded pool of worker slots:
//!
//! - the update queue turns "this region of this node is dirty" notifications
//!   into merge jobs, splitting and coalescing them on a patch grid;
//! - the stroke queue runs user operations as ordered jobs with sequentiality,
//!   exclusivity and level-of-detail policies.
//!
//! The [`Scheduler`] decides each tick which producer feeds the pool first and
//! offers the blocking primitives (`lock`, `barrier_lock`, `wait_for_done`,
//! `block_updates`) callers use to get a consistent view of the document.
//!
//! ```text
//! Scheduler
//! ├── UpdateQueue   dirty rects -> merge jobs (no two overlap while running)
//! ├── StrokeQueue   strokes -> init/dab/finish/cancel jobs (head of queue only)
//! └── JobSlotPool   N slots, LOD counter, exclusive gate
//! ```

mod class;
mod config;
mod error;
mod job;
mod listener;
mod lod;
mod pool;
mod scheduler;
mod spawn;
mod stroke;
mod token;
mod undo;
mod update_queue;
mod walker;

#[cfg(test)]
mod test_support;

pub use class::JobClass;
pub use config::SchedulerConfig;
pub use error::{ConfigError, JobError, Result};
pub use job::{Exclusivity, FnJobStrategy, JobContext, JobStrategy, Sequentiality, SpontaneousJob, StrokeJobData};
pub use listener::{ProgressProxy, ProjectionUpdateListener};
pub use pool::{ContextSnapshot, JobsSnapshot};
pub use scheduler::Scheduler;
pub use stroke::{LodSyncStrategyFactory, StrokeStrategy, StrokeStrategyFactory, UndoResult};
pub use token::StrokeId;
pub use undo::{MemoryUndoStore, PostExecutionUndoAdapter, UndoCommand, UndoStore};
pub use walker::{RectsWalker, UpdateType, WalkerFactory};
