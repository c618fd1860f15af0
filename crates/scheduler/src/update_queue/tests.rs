use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use super::*;
use crate::test_support::{Gate, TestSpontaneous, TestWalker, TestWalkerFactory, Tracker, wait_until};

const NODE: NodeId = NodeId(1);
const CROP: Rect = Rect::new(0, 0, 4096, 4096);

fn pool(threads: usize) -> JobSlotPool {
	let (completions, _) = mpsc::unbounded_channel();
	JobSlotPool::new(threads, completions).unwrap()
}

fn config(patch: i32) -> SchedulerConfig {
	SchedulerConfig {
		update_patch_width: patch,
		update_patch_height: patch,
		..SchedulerConfig::default()
	}
}

fn queue(patch: i32, factory: &Arc<TestWalkerFactory>) -> UpdateQueue {
	UpdateQueue::new(&config(patch), Arc::clone(factory) as Arc<dyn WalkerFactory>)
}

fn rects(queue: &UpdateQueue) -> Vec<Rect> {
	queue.requests.iter().map(|r| r.rect).collect()
}

fn tick(queue: &mut UpdateQueue, pool: &JobSlotPool) {
	let _guard = pool.lock();
	queue.process_queue(pool);
}

#[test]
fn large_requests_are_split_on_the_patch_grid() {
	let tracker = Tracker::new();
	let factory = Arc::new(TestWalkerFactory::new(&tracker));
	let mut queue = queue(64, &factory);

	queue.add_update_job(NODE, Rect::new(10, 10, 150, 100), CROP, 0);

	assert_eq!(
		rects(&queue),
		vec![
			Rect::new(10, 10, 54, 54),
			Rect::new(64, 10, 64, 54),
			Rect::new(128, 10, 32, 54),
			Rect::new(10, 64, 54, 46),
			Rect::new(64, 64, 64, 46),
			Rect::new(128, 64, 32, 46),
		]
	);
	assert_eq!(factory.created().len(), 6);
	assert_eq!(queue.size_metric(), 6);
}

#[test]
fn requests_within_a_patch_in_one_direction_stay_whole() {
	let tracker = Tracker::new();
	let factory = Arc::new(TestWalkerFactory::new(&tracker));
	let mut queue = queue(64, &factory);

	queue.add_update_job(NODE, Rect::new(0, 0, 300, 10), CROP, 0);
	assert_eq!(rects(&queue), vec![Rect::new(0, 0, 300, 10)]);
}

#[test]
fn requests_are_cropped_and_empty_ones_dropped() {
	let tracker = Tracker::new();
	let factory = Arc::new(TestWalkerFactory::new(&tracker));
	let mut queue = queue(512, &factory);

	queue.add_update_job(NODE, Rect::new(-10, -10, 30, 30), Rect::new(0, 0, 100, 100), 0);
	queue.add_update_job(NODE, Rect::new(200, 200, 10, 10), Rect::new(0, 0, 100, 100), 0);

	assert_eq!(rects(&queue), vec![Rect::new(0, 0, 20, 20)]);
	assert_eq!(factory.created(), vec![(UpdateType::Update, Rect::new(0, 0, 100, 100), 0)]);
}

#[test]
fn overlapping_requests_merge_and_rewalk() {
	let tracker = Tracker::new();
	let factory = Arc::new(TestWalkerFactory::new(&tracker));
	let mut queue = queue(512, &factory);

	queue.add_update_job(NODE, Rect::new(0, 0, 100, 100), CROP, 0);
	queue.add_update_job(NODE, Rect::new(50, 0, 100, 100), CROP, 0);

	assert_eq!(rects(&queue), vec![Rect::new(0, 0, 150, 100)]);
	assert_eq!(queue.requests[0].walker.change_rect(), Rect::new(0, 0, 150, 100));
	assert_eq!(factory.created().len(), 1);
}

#[test]
fn incompatible_requests_are_never_merged() {
	let tracker = Tracker::new();
	let factory = Arc::new(TestWalkerFactory::new(&tracker));
	let mut queue = queue(512, &factory);
	let rect = Rect::new(0, 0, 10, 10);

	queue.add_update_job(NODE, rect, CROP, 0);
	queue.add_update_job(NodeId(2), rect, CROP, 0);
	queue.add_update_no_filthy_job(NODE, rect, CROP, 0);
	queue.add_full_refresh_job(NODE, rect, CROP, 0);
	queue.add_update_job(NODE, rect, Rect::new(0, 0, 64, 64), 0);
	queue.add_update_job(NODE, rect, CROP, 1);

	assert_eq!(queue.requests.len(), 6);
}

#[test]
fn distant_requests_stay_apart_until_optimized() {
	let tracker = Tracker::new();
	let factory = Arc::new(TestWalkerFactory::new(&tracker));
	let mut queue = queue(512, &factory);

	queue.add_update_job(NODE, Rect::new(0, 0, 100, 100), CROP, 0);
	queue.add_update_job(NODE, Rect::new(120, 0, 100, 100), CROP, 0);
	queue.add_update_job(NODE, Rect::new(400, 400, 10, 10), CROP, 0);
	assert_eq!(queue.requests.len(), 3);

	queue.optimize();

	assert_eq!(rects(&queue), vec![Rect::new(0, 0, 220, 100), Rect::new(400, 400, 10, 10)]);
	assert_eq!(queue.requests[0].walker.change_rect(), Rect::new(0, 0, 220, 100));
}

#[test]
fn disjoint_requests_dispatch_together_and_overlapping_ones_wait() {
	let tracker = Tracker::new();
	let gate = Gate::new();
	let factory = Arc::new(TestWalkerFactory::new(&tracker));
	factory.gate_with(&gate);
	let pool = pool(4);
	let mut queue = queue(64, &factory);

	queue.add_update_job(NODE, Rect::new(0, 0, 10, 10), CROP, 0);
	queue.add_update_job(NODE, Rect::new(200, 200, 10, 10), CROP, 0);
	queue.add_update_no_filthy_job(NODE, Rect::new(5, 5, 10, 10), CROP, 0);
	tick(&mut queue, &pool);

	assert_eq!(pool.jobs_snapshot().merge_jobs, 2);
	assert_eq!(rects(&queue), vec![Rect::new(5, 5, 10, 10)]);

	gate.open();
	pool.wait_for_done();
	tick(&mut queue, &pool);
	pool.wait_for_done();

	assert!(queue.is_empty());
	assert!(tracker.concurrent_with(&TestWalker::label(Rect::new(5, 5, 10, 10))).is_empty());
}

#[test]
fn requests_at_another_level_wait_for_running_merges() {
	let tracker = Tracker::new();
	let gate = Gate::new();
	let factory = Arc::new(TestWalkerFactory::new(&tracker));
	factory.gate_with(&gate);
	let pool = pool(4);
	let mut queue = queue(512, &factory);

	queue.add_update_job(NODE, Rect::new(0, 0, 10, 10), CROP, 0);
	tick(&mut queue, &pool);
	queue.add_update_job(NODE, Rect::new(100, 100, 10, 10), CROP, 2);
	tick(&mut queue, &pool);

	assert_eq!(pool.current_level_of_detail(), Some(0));
	assert_eq!(queue.size_metric(), 1);

	gate.open();
	pool.wait_for_done();
	tick(&mut queue, &pool);
	pool.wait_for_done();
	assert!(queue.is_empty());
}

#[test]
fn spontaneous_jobs_replace_their_duplicates_and_wait_for_an_empty_pool() {
	let tracker = Tracker::new();
	let gate = Gate::new();
	let factory = Arc::new(TestWalkerFactory::new(&tracker));
	factory.gate_with(&gate);
	let pool = pool(4);
	let mut queue = queue(512, &factory);

	queue.add_spontaneous_job(TestSpontaneous::new("prefetch", &tracker));
	queue.add_spontaneous_job(TestSpontaneous::new("prefetch", &tracker));
	queue.add_spontaneous_job(TestSpontaneous::new("compact", &tracker));
	assert_eq!(queue.size_metric(), 2);

	queue.add_update_job(NODE, Rect::new(0, 0, 10, 10), CROP, 0);
	tick(&mut queue, &pool);
	assert_eq!(pool.jobs_snapshot().merge_jobs, 1);
	assert_eq!(pool.jobs_snapshot().spontaneous_jobs, 0);

	gate.open();
	assert!(wait_until(|| {
		pool.wait_for_done();
		tick(&mut queue, &pool);
		queue.is_empty()
	}));
	pool.wait_for_done();

	assert_eq!(tracker.started(), vec!["merge 10x10+0+0".to_owned(), "prefetch".to_owned(), "compact".to_owned()]);
	assert!(tracker.concurrent_with("prefetch").is_empty());
}

#[test]
fn settings_update_changes_the_patch_grid() {
	let tracker = Tracker::new();
	let factory = Arc::new(TestWalkerFactory::new(&tracker));
	let mut queue = queue(512, &factory);

	queue.update_settings(&config(32));
	queue.add_update_job(NODE, Rect::new(0, 0, 64, 64), CROP, 0);
	assert_eq!(queue.requests.len(), 4);

	assert_eq!(queue.override_level_of_detail(), None);
	queue.set_override_level_of_detail(Some(2));
	assert_eq!(queue.override_level_of_detail(), Some(2));
}

#[test]
fn requests_at_the_coordinate_limit_split_without_overflow() {
	let tracker = Tracker::new();
	let factory = Arc::new(TestWalkerFactory::new(&tracker));
	let mut queue = queue(64, &factory);
	let edge = i32::MAX - 100;
	let crop = Rect::new(edge, edge, 200, 200);

	queue.add_update_job(NODE, Rect::new(edge, edge, 200, 200), crop, 0);

	let last = i32::MAX - 63;
	assert_eq!(
		rects(&queue),
		vec![
			Rect::new(edge, edge, 37, 37),
			Rect::new(last, edge, 63, 37),
			Rect::new(edge, last, 37, 63),
			Rect::new(last, last, 63, 63),
		]
	);
}
