//! Synthetic collaborators shared by the unit tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use impasto_primitives::{NodeId, Rect};
use parking_lot::{Condvar, Mutex};

use crate::error::JobError;
use crate::job::{Exclusivity, FnJobStrategy, JobContext, JobStrategy, Sequentiality, SpontaneousJob, StrokeJobData};
use crate::listener::{ProgressProxy, ProjectionUpdateListener};
use crate::stroke::StrokeStrategy;
use crate::undo::UndoCommand;
use crate::walker::{RectsWalker, UpdateType, WalkerFactory};

pub(crate) const TIMEOUT: Duration = Duration::from_secs(10);

/// Polls `condition` until it holds or [`TIMEOUT`] expires.
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
	let deadline = Instant::now() + TIMEOUT;
	while Instant::now() < deadline {
		if condition() {
			return true;
		}
		std::thread::sleep(Duration::from_millis(1));
	}
	condition()
}

/// Holds jobs inside their body until opened.
#[derive(Default)]
pub(crate) struct Gate {
	open: Mutex<bool>,
	cond: Condvar,
}

impl Gate {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn open(&self) {
		*self.open.lock() = true;
		self.cond.notify_all();
	}

	/// Waits for [`Gate::open`], giving up after [`TIMEOUT`] so a failing test cannot hang.
	pub fn wait(&self) {
		let deadline = Instant::now() + TIMEOUT;
		let mut open = self.open.lock();
		while !*open {
			if self.cond.wait_until(&mut open, deadline).timed_out() {
				return;
			}
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
	Start(String),
	End(String),
}

#[derive(Default)]
struct TrackerState {
	running: Vec<String>,
	max_running: usize,
	events: Vec<Event>,
}

/// Records job bodies as they enter and leave.
#[derive(Default)]
pub(crate) struct Tracker {
	state: Mutex<TrackerState>,
}

impl Tracker {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn enter(&self, label: &str) {
		let mut state = self.state.lock();
		state.running.push(label.to_owned());
		state.max_running = state.max_running.max(state.running.len());
		state.events.push(Event::Start(label.to_owned()));
	}

	pub fn exit(&self, label: &str) {
		let mut state = self.state.lock();
		if let Some(pos) = state.running.iter().position(|l| l == label) {
			state.running.remove(pos);
		}
		state.events.push(Event::End(label.to_owned()));
	}

	pub fn events(&self) -> Vec<Event> {
		self.state.lock().events.clone()
	}

	/// Labels in the order their bodies started.
	pub fn started(&self) -> Vec<String> {
		self.events()
			.into_iter()
			.filter_map(|event| match event {
				Event::Start(label) => Some(label),
				Event::End(_) => None,
			})
			.collect()
	}

	/// Labels whose bodies finished.
	pub fn finished(&self) -> Vec<String> {
		self.events()
			.into_iter()
			.filter_map(|event| match event {
				Event::End(label) => Some(label),
				Event::Start(_) => None,
			})
			.collect()
	}

	pub fn running(&self) -> Vec<String> {
		self.state.lock().running.clone()
	}

	pub fn max_running(&self) -> usize {
		self.state.lock().max_running
	}

	/// Labels that were running at some point while `label` was running.
	pub fn concurrent_with(&self, label: &str) -> Vec<String> {
		let mut running: Vec<String> = Vec::new();
		let mut seen = Vec::new();
		for event in self.events() {
			match event {
				Event::Start(started) => {
					if started == label {
						seen.extend(running.iter().cloned());
					} else if running.iter().any(|l| l == label) {
						seen.push(started.clone());
					}
					running.push(started);
				}
				Event::End(ended) => {
					if let Some(pos) = running.iter().position(|l| *l == ended) {
						running.remove(pos);
					}
				}
			}
		}
		seen.sort();
		seen.dedup();
		seen
	}

	/// Index of the first event matching `event`.
	pub fn position(&self, event: &Event) -> Option<usize> {
		self.events().iter().position(|e| e == event)
	}
}

/// Walker whose access rectangle is the requested rectangle grown by a margin.
pub(crate) struct TestWalker {
	node: Option<NodeId>,
	rect: Rect,
	margin: i32,
	level_of_detail: u32,
	tracker: Arc<Tracker>,
	gate: Option<Arc<Gate>>,
	fail: bool,
}

impl TestWalker {
	pub fn new(rect: Rect, level_of_detail: u32, tracker: &Arc<Tracker>) -> Self {
		Self {
			node: None,
			rect,
			margin: 0,
			level_of_detail,
			tracker: Arc::clone(tracker),
			gate: None,
			fail: false,
		}
	}

	pub fn gated(mut self, gate: &Arc<Gate>) -> Self {
		self.gate = Some(Arc::clone(gate));
		self
	}

	pub fn with_margin(mut self, margin: i32) -> Self {
		self.margin = margin;
		self
	}

	/// Label of a full-detail merge of `rect`. Reduced-detail merges append `@{lod}`.
	pub fn label(rect: Rect) -> String {
		format!("merge {rect}")
	}
}

impl RectsWalker for TestWalker {
	fn collect_rects(&mut self, node: NodeId, rect: Rect) {
		self.node = Some(node);
		self.rect = rect;
	}

	fn access_rect(&self) -> Rect {
		self.rect.adjusted(self.margin)
	}

	fn change_rect(&self) -> Rect {
		self.rect
	}

	fn level_of_detail(&self) -> u32 {
		self.level_of_detail
	}

	fn merge(&mut self, _ctx: &JobContext<'_>) -> Result<(), JobError> {
		let label = match self.level_of_detail {
			0 => Self::label(self.rect),
			lod => format!("{}@{lod}", Self::label(self.rect)),
		};
		self.tracker.enter(&label);
		if let Some(gate) = &self.gate {
			gate.wait();
		}
		self.tracker.exit(&label);
		if self.fail {
			return Err(JobError::ResourceExhausted("out of tiles".into()));
		}
		Ok(())
	}
}

/// Builds [`TestWalker`]s and remembers every walk request.
pub(crate) struct TestWalkerFactory {
	tracker: Arc<Tracker>,
	gate: Mutex<Option<Arc<Gate>>>,
	margin: i32,
	fail: bool,
	created: Mutex<Vec<(UpdateType, Rect, u32)>>,
}

impl TestWalkerFactory {
	pub fn new(tracker: &Arc<Tracker>) -> Self {
		Self {
			tracker: Arc::clone(tracker),
			gate: Mutex::new(None),
			margin: 0,
			fail: false,
			created: Mutex::new(Vec::new()),
		}
	}

	pub fn with_margin(mut self, margin: i32) -> Self {
		self.margin = margin;
		self
	}

	pub fn failing(mut self) -> Self {
		self.fail = true;
		self
	}

	/// Walkers created from now on block on `gate`.
	pub fn gate_with(&self, gate: &Arc<Gate>) {
		*self.gate.lock() = Some(Arc::clone(gate));
	}

	/// `(type, crop, lod)` of every walker created so far.
	pub fn created(&self) -> Vec<(UpdateType, Rect, u32)> {
		self.created.lock().clone()
	}
}

impl WalkerFactory for TestWalkerFactory {
	fn create_walker(&self, update_type: UpdateType, crop_rect: Rect, level_of_detail: u32) -> Box<dyn RectsWalker> {
		self.created.lock().push((update_type, crop_rect, level_of_detail));
		let mut walker = TestWalker::new(Rect::ZERO, level_of_detail, &self.tracker).with_margin(self.margin);
		walker.gate = self.gate.lock().clone();
		walker.fail = self.fail;
		Box::new(walker)
	}
}

/// Payload of test stroke jobs.
#[derive(Clone, Default)]
pub(crate) struct TestData {
	pub label: String,
	pub gate: Option<Arc<Gate>>,
	pub fail: bool,
	pub panic: bool,
	pub sequentiality: Option<Sequentiality>,
	pub exclusivity: Option<Exclusivity>,
}

impl TestData {
	pub fn new(label: &str) -> Box<Self> {
		Box::new(Self {
			label: label.to_owned(),
			..Self::default()
		})
	}

	pub fn gated(label: &str, gate: &Arc<Gate>) -> Box<Self> {
		Box::new(Self {
			label: label.to_owned(),
			gate: Some(Arc::clone(gate)),
			..Self::default()
		})
	}

	pub fn with(label: &str, sequentiality: Sequentiality, exclusivity: Exclusivity) -> Box<Self> {
		Box::new(Self {
			label: label.to_owned(),
			sequentiality: Some(sequentiality),
			exclusivity: Some(exclusivity),
			..Self::default()
		})
	}
}

impl StrokeJobData for TestData {
	fn sequentiality(&self) -> Option<Sequentiality> {
		self.sequentiality
	}

	fn exclusivity(&self) -> Option<Exclusivity> {
		self.exclusivity
	}

	fn lod_clone(&self, level: u32) -> Option<Box<dyn StrokeJobData>> {
		Some(Box::new(Self {
			label: format!("{}@{level}", self.label),
			gate: None,
			fail: false,
			panic: false,
			..self.clone()
		}))
	}
}

/// Job strategy that records `"{name}"` or `"{name}:{data label}"` in the tracker.
pub(crate) fn recording_job(tracker: &Arc<Tracker>, name: String, sequentiality: Sequentiality, exclusivity: Exclusivity) -> Arc<dyn JobStrategy> {
	gated_job(tracker, name, sequentiality, exclusivity, None)
}

/// Like [`recording_job`], blocking on `gate` when the payload brings no gate of its own.
pub(crate) fn gated_job(tracker: &Arc<Tracker>, name: String, sequentiality: Sequentiality, exclusivity: Exclusivity, gate: Option<Arc<Gate>>) -> Arc<dyn JobStrategy> {
	let tracker = Arc::clone(tracker);
	Arc::new(FnJobStrategy::new(sequentiality, exclusivity, move |data, _ctx| {
		let data = data.and_then(|d| d.downcast_ref::<TestData>()).cloned();
		let label = match &data {
			Some(data) => format!("{name}:{}", data.label),
			None => name.clone(),
		};
		tracker.enter(&label);
		if let Some(gate) = data.as_ref().and_then(|d| d.gate.as_ref()).or(gate.as_ref()) {
			gate.wait();
		}
		tracker.exit(&label);
		match data {
			Some(data) if data.panic => panic!("{label} exploded"),
			Some(data) if data.fail => Err(JobError::failed(format!("{label} failed"))),
			_ => Ok(()),
		}
	}))
}

type Policy = (Sequentiality, Exclusivity);

/// Configurable stroke strategy whose jobs record into a [`Tracker`].
#[derive(Clone)]
pub(crate) struct TestStroke {
	name: String,
	tracker: Arc<Tracker>,
	init: Option<Policy>,
	init_gate: Option<Arc<Gate>>,
	dab: Policy,
	finish: Option<Policy>,
	cancel: bool,
	suspension: bool,
	lod_clone: bool,
	requests_end: bool,
	clears_redo: bool,
	needs_suspend: bool,
	wrap_around: bool,
	exclusive: bool,
	async_cancellable: bool,
}

impl TestStroke {
	pub fn new(name: &str, tracker: &Arc<Tracker>) -> Self {
		Self {
			name: name.to_owned(),
			tracker: Arc::clone(tracker),
			init: None,
			init_gate: None,
			dab: (Sequentiality::Sequential, Exclusivity::Normal),
			finish: Some((Sequentiality::Sequential, Exclusivity::Normal)),
			cancel: true,
			suspension: false,
			lod_clone: false,
			requests_end: false,
			clears_redo: false,
			needs_suspend: false,
			wrap_around: false,
			exclusive: false,
			async_cancellable: true,
		}
	}

	pub fn init(mut self, sequentiality: Sequentiality, exclusivity: Exclusivity) -> Self {
		self.init = Some((sequentiality, exclusivity));
		self
	}

	/// The init job blocks on `gate`.
	pub fn gate_init(mut self, gate: &Arc<Gate>) -> Self {
		self.init_gate = Some(Arc::clone(gate));
		self
	}

	pub fn dab(mut self, sequentiality: Sequentiality, exclusivity: Exclusivity) -> Self {
		self.dab = (sequentiality, exclusivity);
		self
	}

	pub fn without_finish(mut self) -> Self {
		self.finish = None;
		self
	}

	pub fn with_suspension(mut self) -> Self {
		self.suspension = true;
		self
	}

	pub fn with_lod_clone(mut self) -> Self {
		self.lod_clone = true;
		self
	}

	pub fn requests_end(mut self) -> Self {
		self.requests_end = true;
		self
	}

	pub fn clears_redo(mut self) -> Self {
		self.clears_redo = true;
		self
	}

	pub fn needs_suspend(mut self) -> Self {
		self.needs_suspend = true;
		self
	}

	pub fn wrap_around(mut self) -> Self {
		self.wrap_around = true;
		self
	}

	pub fn exclusive(mut self) -> Self {
		self.exclusive = true;
		self
	}

	pub fn not_async_cancellable(mut self) -> Self {
		self.async_cancellable = false;
		self
	}

	pub fn boxed(self) -> Box<dyn StrokeStrategy> {
		Box::new(self)
	}

	fn job(&self, phase: &str, policy: Policy) -> Arc<dyn JobStrategy> {
		recording_job(&self.tracker, format!("{}.{phase}", self.name), policy.0, policy.1)
	}
}

impl StrokeStrategy for TestStroke {
	fn name(&self) -> &str {
		&self.name
	}

	fn create_init_strategy(&self) -> Option<Arc<dyn JobStrategy>> {
		self.init
			.map(|policy| gated_job(&self.tracker, format!("{}.init", self.name), policy.0, policy.1, self.init_gate.clone()))
	}

	fn create_dab_strategy(&self) -> Option<Arc<dyn JobStrategy>> {
		Some(self.job("dab", self.dab))
	}

	fn create_finish_strategy(&self) -> Option<Arc<dyn JobStrategy>> {
		self.finish.map(|policy| self.job("finish", policy))
	}

	fn create_cancel_strategy(&self) -> Option<Arc<dyn JobStrategy>> {
		self.cancel.then(|| self.job("cancel", (Sequentiality::Sequential, Exclusivity::Normal)))
	}

	fn create_suspend_strategy(&self) -> Option<Arc<dyn JobStrategy>> {
		self.suspension.then(|| self.job("suspend", (Sequentiality::Sequential, Exclusivity::Normal)))
	}

	fn create_resume_strategy(&self) -> Option<Arc<dyn JobStrategy>> {
		self.suspension.then(|| self.job("resume", (Sequentiality::Sequential, Exclusivity::Normal)))
	}

	fn create_lod_clone(&self, level: u32) -> Option<Box<dyn StrokeStrategy>> {
		self.lod_clone.then(|| {
			let mut clone = self.clone();
			clone.name = format!("{}@{level}", self.name);
			clone.lod_clone = false;
			clone.suspension = false;
			Box::new(clone) as Box<dyn StrokeStrategy>
		})
	}

	fn requests_other_strokes_to_end(&self) -> bool {
		self.requests_end
	}

	fn clears_redo_on_start(&self) -> bool {
		self.clears_redo
	}

	fn needs_suspend_updates(&self) -> bool {
		self.needs_suspend
	}

	fn wrap_around_mode_supported(&self) -> bool {
		self.wrap_around
	}

	fn is_exclusive(&self) -> bool {
		self.exclusive
	}

	fn is_asynchronously_cancellable(&self) -> bool {
		self.async_cancellable
	}
}

/// System stroke with a single init job, as produced by the scheduler's factories.
pub(crate) fn system_stroke(tracker: &Arc<Tracker>, name: &str) -> Box<dyn StrokeStrategy> {
	TestStroke::new(name, tracker).init(Sequentiality::Sequential, Exclusivity::Normal).without_finish().boxed()
}

/// Spontaneous job that records `name` and may be replaced by a later job with the same name.
pub(crate) struct TestSpontaneous {
	pub name: String,
	pub tracker: Arc<Tracker>,
	pub gate: Option<Arc<Gate>>,
	pub exclusive: bool,
}

impl TestSpontaneous {
	pub fn new(name: &str, tracker: &Arc<Tracker>) -> Box<Self> {
		Box::new(Self {
			name: name.to_owned(),
			tracker: Arc::clone(tracker),
			gate: None,
			exclusive: false,
		})
	}
}

impl SpontaneousJob for TestSpontaneous {
	fn run(&mut self, _ctx: &JobContext<'_>) -> Result<(), JobError> {
		self.tracker.enter(&self.name);
		if let Some(gate) = &self.gate {
			gate.wait();
		}
		self.tracker.exit(&self.name);
		Ok(())
	}

	fn overrides(&self, other: &(dyn SpontaneousJob + 'static)) -> bool {
		other.downcast_ref::<TestSpontaneous>().is_some_and(|other| other.name == self.name)
	}

	fn is_exclusive(&self) -> bool {
		self.exclusive
	}
}

#[derive(Default)]
pub(crate) struct RecordingProjection {
	pub rects: Mutex<Vec<Rect>>,
}

impl ProjectionUpdateListener for RecordingProjection {
	fn notify_projection_updated(&self, rect: Rect) {
		self.rects.lock().push(rect);
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Progress {
	Update(usize, String),
	Hide,
}

#[derive(Default)]
pub(crate) struct RecordingProgress {
	pub events: Mutex<Vec<Progress>>,
}

impl ProgressProxy for RecordingProgress {
	fn update_progress(&self, size: usize, label: &str) {
		self.events.lock().push(Progress::Update(size, label.to_owned()));
	}

	fn hide(&self) {
		self.events.lock().push(Progress::Hide);
	}
}

pub(crate) struct NamedCommand(pub String);

impl UndoCommand for NamedCommand {
	fn name(&self) -> &str {
		&self.0
	}
}
