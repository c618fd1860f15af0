use tokio::runtime::Runtime;

use crate::JobClass;

/// Builds the runtime whose blocking pool executes the slots of one pool.
///
/// Job bodies are synchronous, so only the blocking pool is sized after the
/// slot count; the single async worker merely drives the runtime. A finishing
/// slot still occupies its thread while it dispatches the next job, hence the
/// extra thread.
pub(crate) fn build_runtime(thread_count: usize) -> std::io::Result<Runtime> {
	tokio::runtime::Builder::new_multi_thread()
		.worker_threads(1)
		.max_blocking_threads(thread_count.max(1) + 1)
		.thread_name("impasto-worker")
		.build()
}

/// Spawns blocking work with job classification metadata.
pub(crate) fn spawn_blocking<F>(runtime: &Runtime, class: JobClass, slot: usize, f: F)
where
	F: FnOnce() + Send + 'static,
{
	tracing::trace!(job_class = class.as_str(), slot, "worker.spawn_blocking");
	// Completion is reported through the pool's own channel, the handle is not needed.
	drop(runtime.spawn_blocking(f));
}
