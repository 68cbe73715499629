//! Task scheduling.
//!
//! Tasks are plain closures over their arguments, collected into a DAG
//! before execution: a task becomes runnable when every precursor has
//! completed. Task groups form the unit of error propagation and
//! cancellation: a task failure cancels its group, and — unless the error
//! is the not-an-error cancellation — every enclosing group up to the
//! root. Tasks in a cancelled group are skipped but still complete for
//! dependency purposes, so the graph always drains.
//!
//! A fixed pool of worker threads drains a ready queue; one logical
//! thread is the interpreter and is never part of the pool. Render tasks
//! observe a specialised context with the interpreter-only state stripped
//! (`is_interpreter` false), mirroring the thread specialisation of the
//! front end.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::trace;
use parking_lot::Mutex;

use crate::error::{RipError, RipErrorKind};

/// Identifies a task within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(usize);

/// Identifies a group within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(usize);

/// Context visible to a running task.
#[derive(Debug, Clone, Copy)]
pub struct TaskContext {
	/// Worker index executing the task.
	pub worker: usize,
	/// Always false inside the pool: interpreter-only state is not
	/// reachable from render tasks.
	pub is_interpreter: bool,
}

type TaskWork = Box<dyn FnOnce(&TaskContext) -> Result<(), RipError> + Send>;

struct TaskNode {
	name: String,
	group: GroupId,
	work: Option<TaskWork>,
	precursors: usize,
	dependents: Vec<TaskId>,
}

struct GroupNode {
	name: String,
	parent: Option<GroupId>,
}

/// A task DAG under construction.
#[derive(Default)]
pub struct TaskGraph {
	tasks: Vec<TaskNode>,
	groups: Vec<GroupNode>,
}

impl TaskGraph {
	/// An empty graph with a root group.
	pub fn new() -> Self {
		let mut graph = Self {
			tasks: Vec::new(),
			groups: Vec::new(),
		};
		graph.groups.push(GroupNode {
			name: "root".to_string(),
			parent: None,
		});
		graph
	}

	/// The root group.
	pub fn root(&self) -> GroupId {
		GroupId(0)
	}

	/// Creates a nested group.
	pub fn add_group(&mut self, parent: GroupId, name: impl Into<String>) -> GroupId {
		self.groups.push(GroupNode {
			name: name.into(),
			parent: Some(parent),
		});
		GroupId(self.groups.len() - 1)
	}

	/// Adds a task with a work closure.
	pub fn add_task(
		&mut self,
		group: GroupId,
		name: impl Into<String>,
		work: impl FnOnce(&TaskContext) -> Result<(), RipError> + Send + 'static,
	) -> TaskId {
		self.tasks.push(TaskNode {
			name: name.into(),
			group,
			work: Some(Box::new(work)),
			precursors: 0,
			dependents: Vec::new(),
		});
		TaskId(self.tasks.len() - 1)
	}

	/// Adds a pure synchronisation task (an MHT gate, say).
	pub fn add_gate(&mut self, group: GroupId, name: impl Into<String>) -> TaskId {
		self.tasks.push(TaskNode {
			name: name.into(),
			group,
			work: None,
			precursors: 0,
			dependents: Vec::new(),
		});
		TaskId(self.tasks.len() - 1)
	}

	/// Declares that `before` must complete before `after` may run.
	pub fn depends(&mut self, before: TaskId, after: TaskId) {
		debug_assert_ne!(before, after, "a task cannot precede itself");
		self.tasks[before.0].dependents.push(after);
		self.tasks[after.0].precursors += 1;
	}

	/// Number of tasks.
	pub fn len(&self) -> usize {
		self.tasks.len()
	}

	/// True when no tasks were added.
	pub fn is_empty(&self) -> bool {
		self.tasks.is_empty()
	}
}

/// Shared execution state.
struct Exec {
	names: Vec<String>,
	groups: Vec<GroupNode>,
	group_of: Vec<GroupId>,
	dependents: Vec<Vec<TaskId>>,
	pending: Vec<AtomicUsize>,
	work: Vec<Mutex<Option<TaskWork>>>,
	cancelled: Vec<AtomicBool>,
	errors: Vec<Mutex<Option<RipError>>>,
	remaining: AtomicUsize,
	ready_tx: Sender<Message>,
	trace_log: Mutex<Vec<String>>,
}

enum Message {
	Run(TaskId),
	Stop,
}

impl Exec {
	fn group_cancelled(&self, mut group: GroupId) -> bool {
		loop {
			if self.cancelled[group.0].load(Ordering::Acquire) {
				return true;
			}
			match self.groups[group.0].parent {
				Some(parent) => group = parent,
				None => return false,
			}
		}
	}

	fn cancel(&self, group: GroupId, error: RipError) {
		let not_an_error = error.is_not_an_error();
		{
			let mut slot = self.errors[group.0].lock();
			if slot.is_none() {
				*slot = Some(error);
			}
		}
		self.cancelled[group.0].store(true, Ordering::Release);

		// Real errors cancel every enclosing group up to the root; the
		// cancellation pseudo-error cancels its enclosing unit of work
		// (the sheet, for a band failure) but never fails the page.
		let mut current = group;
		while let Some(parent) = self.groups[current.0].parent {
			if not_an_error && self.groups[parent.0].parent.is_none() {
				break;
			}
			self.cancelled[parent.0].store(true, Ordering::Release);
			current = parent;
		}
	}

	fn complete(&self, id: TaskId, workers: usize) {
		for &dependent in &self.dependents[id.0] {
			if self.pending[dependent.0].fetch_sub(1, Ordering::AcqRel) == 1 {
				let _ = self.ready_tx.send(Message::Run(dependent));
			}
		}
		if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
			for _ in 0..workers {
				let _ = self.ready_tx.send(Message::Stop);
			}
		}
	}

	fn run_one(&self, id: TaskId, ctx: &TaskContext, workers: usize) {
		let group = self.group_of[id.0];
		if !self.group_cancelled(group) {
			let work = self.work[id.0].lock().take();
			if let Some(work) = work {
				trace!("task {} running on worker {}", self.names[id.0], ctx.worker);
				if let Err(error) = work(ctx) {
					trace!("task {} failed: {error}", self.names[id.0]);
					self.cancel(group, error);
				}
			}
			self.trace_log.lock().push(self.names[id.0].clone());
		}
		self.complete(id, workers);
	}
}

/// Outcome of a graph run.
#[derive(Debug)]
pub struct GraphOutcome {
	/// First real error that propagated to the root, if any.
	pub error: Option<RipError>,
	/// Errors recorded per group, root first, including confined
	/// cancellations.
	pub group_errors: Vec<(String, RipError)>,
	/// Completion order of the tasks that actually ran.
	pub trace: Vec<String>,
}

impl GraphOutcome {
	/// Treats the outcome as a result: a propagated error fails the run.
	pub fn into_result(self) -> Result<(), RipError> {
		match self.error {
			Some(error) => Err(error),
			None => Ok(()),
		}
	}

	/// The error recorded for a named group, if any.
	pub fn group_error(&self, name: &str) -> Option<&RipError> {
		self.group_errors.iter().find(|(n, _)| n == name).map(|(_, e)| e)
	}
}

/// The worker-pool scheduler.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
	threads: usize,
}

impl Scheduler {
	/// A scheduler with the given worker-thread count (minimum one).
	pub fn new(threads: usize) -> Self {
		Self {
			threads: threads.max(1),
		}
	}

	/// Runs a graph to completion and reports the outcome.
	pub fn run(&self, graph: TaskGraph) -> GraphOutcome {
		let task_count = graph.tasks.len();
		let (ready_tx, ready_rx) = unbounded::<Message>();

		let mut names = Vec::with_capacity(task_count);
		let mut group_of = Vec::with_capacity(task_count);
		let mut dependents = Vec::with_capacity(task_count);
		let mut pending = Vec::with_capacity(task_count);
		let mut work = Vec::with_capacity(task_count);
		let mut initially_ready = Vec::new();

		for (index, task) in graph.tasks.into_iter().enumerate() {
			if task.precursors == 0 {
				initially_ready.push(TaskId(index));
			}
			names.push(task.name);
			group_of.push(task.group);
			dependents.push(task.dependents);
			pending.push(AtomicUsize::new(task.precursors));
			work.push(Mutex::new(task.work));
		}

		let group_count = graph.groups.len();
		let exec = Arc::new(Exec {
			names,
			groups: graph.groups,
			group_of,
			dependents,
			pending,
			work,
			cancelled: (0..group_count).map(|_| AtomicBool::new(false)).collect(),
			errors: (0..group_count).map(|_| Mutex::new(None)).collect(),
			remaining: AtomicUsize::new(task_count),
			ready_tx,
			trace_log: Mutex::new(Vec::new()),
		});

		if task_count == 0 {
			return GraphOutcome {
				error: None,
				group_errors: Vec::new(),
				trace: Vec::new(),
			};
		}

		for id in initially_ready {
			let _ = exec.ready_tx.send(Message::Run(id));
		}

		let workers = self.threads;
		let mut handles = Vec::with_capacity(workers);
		for worker in 0..workers {
			let exec = exec.clone();
			let rx: Receiver<Message> = ready_rx.clone();
			handles.push(std::thread::spawn(move || {
				let ctx = TaskContext {
					worker,
					is_interpreter: false,
				};
				while let Ok(message) = rx.recv() {
					match message {
						Message::Run(id) => exec.run_one(id, &ctx, workers),
						Message::Stop => break,
					}
				}
			}));
		}
		for handle in handles {
			let _ = handle.join();
		}

		let exec = Arc::into_inner(exec).expect("workers have exited");
		let mut group_errors = Vec::new();
		for (group, slot) in exec.groups.iter().zip(exec.errors.iter()) {
			if let Some(error) = slot.lock().take() {
				group_errors.push((group.name.clone(), error));
			}
		}
		let error = if exec.cancelled[0].load(Ordering::Acquire) {
			group_errors
				.iter()
				.map(|(_, e)| e)
				.find(|e| !e.is_not_an_error())
				.cloned()
				.or_else(|| {
					Some(RipError::new(RipErrorKind::Unregistered, "render graph cancelled"))
				})
		} else {
			None
		};

		GraphOutcome {
			error,
			group_errors,
			trace: exec.trace_log.into_inner(),
		}
	}
}
