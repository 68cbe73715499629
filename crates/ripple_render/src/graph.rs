//! Render graph construction.
//!
//! Builds the task DAG for one sheet: start/done bookkeeping tasks, one
//! group of render → compress → output tasks per band, frame brackets,
//! and the modular-halftone latency gates.
//!
//! ## Dependency rules
//!
//! - `sheet-start → frame-start → band-render → frame-done →
//!   sheet-render-done → sheet-done`
//! - `band-render → band-compress → band-output → sheet-output-done →
//!   sheet-done`
//! - Band outputs chain in ascending band order across the whole sheet.
//! - For halftone latency `L`, a vector of `L` gate slots rotates through
//!   the bands: each band contributes a fresh gate guarding its own
//!   compress task, every live gate gains the new band's render as a
//!   precursor, and the gate shuffled out has seen all the renders it
//!   needs.
//! - Single-threaded mode threads one long chain through every band's
//!   render, compress and output in turn.
//!
//! A sheet whose consumer asks for raster-only re-output gets the minimal
//! graph: readback tasks straight into output tasks, no render, no
//! compress.

use crate::error::RipError;
use crate::scheduler::{GroupId, TaskContext, TaskGraph, TaskId};

/// A boxed task body produced by the work factory.
pub type TaskWorkFn = Box<dyn FnOnce(&TaskContext) -> Result<(), RipError> + Send>;

/// Shape of one sheet's graph.
#[derive(Debug, Clone, Copy)]
pub struct SheetSpec {
	/// Sheet index within the pass.
	pub sheet: usize,
	/// Frames on the sheet.
	pub frames: usize,
	/// Bands per frame.
	pub bands: usize,
	/// Largest modular-halftone latency in use, zero when none.
	pub mht_latency: usize,
	/// Render, compress and output strictly interleaved (single thread).
	pub serialize: bool,
}

/// Supplies task bodies while the graph is being built.
pub trait SheetWorkFactory {
	/// Opens the page buffer and begins the sheet surface.
	fn sheet_start(&mut self) -> TaskWorkFn;
	/// Joins all render tasks.
	fn sheet_render_done(&mut self) -> TaskWorkFn;
	/// Joins all output tasks and closes the page buffer.
	fn sheet_output_done(&mut self) -> TaskWorkFn;
	/// Final sheet bookkeeping.
	fn sheet_done(&mut self) -> TaskWorkFn;
	/// Begins a frame surface.
	fn frame_start(&mut self, frame: usize) -> TaskWorkFn;
	/// Ends a frame surface.
	fn frame_done(&mut self, frame: usize) -> TaskWorkFn;
	/// Renders one band.
	fn band_render(&mut self, frame: usize, band: usize) -> TaskWorkFn;
	/// Compresses one band.
	fn band_compress(&mut self, frame: usize, band: usize) -> TaskWorkFn;
	/// Emits one band to the page buffer.
	fn band_output(&mut self, frame: usize, band: usize) -> TaskWorkFn;
	/// Reads one band back from the page buffer (re-output graphs).
	fn band_readback(&mut self, frame: usize, band: usize) -> TaskWorkFn;
}

/// Ids of a sheet's bookkeeping tasks.
#[derive(Debug, Clone, Copy)]
pub struct SheetTasks {
	/// The sheet-start task.
	pub start: TaskId,
	/// The sheet-done join task.
	pub done: TaskId,
}

/// Builds the full render graph for one sheet into `graph`.
pub fn build_sheet_graph(
	graph: &mut TaskGraph,
	parent: GroupId,
	spec: &SheetSpec,
	factory: &mut dyn SheetWorkFactory,
) -> SheetTasks {
	let sheet_group = graph.add_group(parent, format!("sheet-{}", spec.sheet));

	let last_render = graph.add_task(
		sheet_group,
		format!("sheet-{}-render-done", spec.sheet),
		wrap(factory.sheet_render_done()),
	);
	let last_output = graph.add_task(
		sheet_group,
		format!("sheet-{}-output-done", spec.sheet),
		wrap(factory.sheet_output_done()),
	);
	let done = graph.add_task(
		sheet_group,
		format!("sheet-{}-done", spec.sheet),
		wrap(factory.sheet_done()),
	);
	// Render-done and output-done only exist to propagate success state
	// into the sheet-done join.
	graph.depends(last_render, done);
	graph.depends(last_output, done);

	// Render and output start are combined: the device must be open for
	// readback during rendering anyway.
	let start = graph.add_task(
		sheet_group,
		format!("sheet-{}-start", spec.sheet),
		wrap(factory.sheet_start()),
	);
	graph.depends(start, last_render);
	graph.depends(start, last_output);

	let mut prev_render: Option<TaskId> = None;
	let mut prev_output: Option<TaskId> = None;
	let mut gates: Vec<Option<TaskId>> = vec![None; spec.mht_latency];

	for frame in 0..spec.frames {
		let frame_start = graph.add_task(
			sheet_group,
			format!("frame-{frame}-start"),
			wrap(factory.frame_start(frame)),
		);
		graph.depends(start, frame_start);

		let frame_end = graph.add_task(
			sheet_group,
			format!("frame-{frame}-done"),
			wrap(factory.frame_done(frame)),
		);
		graph.depends(frame_end, last_render);

		for band in 0..spec.bands {
			let band_group = graph.add_group(sheet_group, format!("band-{frame}-{band}"));

			let render = graph.add_task(
				band_group,
				format!("render-{frame}-{band}"),
				wrap(factory.band_render(frame, band)),
			);
			let compress = graph.add_task(
				band_group,
				format!("compress-{frame}-{band}"),
				wrap(factory.band_compress(frame, band)),
			);
			let output = graph.add_task(
				band_group,
				format!("output-{frame}-{band}"),
				wrap(factory.band_output(frame, band)),
			);

			graph.depends(frame_start, render);
			graph.depends(render, frame_end);
			graph.depends(render, compress);
			graph.depends(compress, output);
			graph.depends(output, last_output);

			// Outputs emit in ascending band order along one chain.
			if let Some(prev) = prev_output {
				graph.depends(prev, output);
				// Single-threaded: the next render waits for the previous
				// band to clear the output stage entirely. Halftone
				// latency forbids this full chain (band k's compression
				// waits on later renders), so latency pages serialise
				// through the render chain below instead.
				if spec.serialize && spec.mht_latency == 0 {
					graph.depends(prev, render);
				}
			}
			prev_output = Some(output);

			// Two renders may not touch one band buffer concurrently when
			// halftone latency keeps earlier bands alive.
			if spec.mht_latency > 0 || spec.serialize {
				if let Some(prev) = prev_render {
					graph.depends(prev, render);
				}
				prev_render = Some(render);
			}

			if spec.mht_latency > 0 {
				// A fresh gate guards this band's compression; every gate
				// still in the vector gains this render as a precursor,
				// and the gate shuffled out has collected all it needs.
				let gate = graph.add_gate(band_group, format!("mht-gate-{frame}-{band}"));
				graph.depends(gate, compress);

				let mut carried = Some(gate);
				for slot in (0..gates.len()).rev() {
					let previous = gates[slot];
					gates[slot] = carried;
					carried = previous;
					if let Some(live) = carried {
						graph.depends(render, live);
					}
				}
			}
		}

		// Gates left over at the end of a frame complete with the renders
		// they have; clear the vector for the next frame.
		gates.iter_mut().for_each(|g| *g = None);
	}

	SheetTasks {
		start,
		done,
	}
}

/// Builds the raster-only re-output graph for a sheet: readback straight
/// into output, skipping render and compression entirely.
pub fn build_sheet_reoutput_graph(
	graph: &mut TaskGraph,
	parent: GroupId,
	spec: &SheetSpec,
	factory: &mut dyn SheetWorkFactory,
) -> SheetTasks {
	let sheet_group = graph.add_group(parent, format!("sheet-{}-reoutput", spec.sheet));

	let last_output = graph.add_task(
		sheet_group,
		format!("sheet-{}-output-done", spec.sheet),
		wrap(factory.sheet_output_done()),
	);
	let done = graph.add_task(
		sheet_group,
		format!("sheet-{}-done", spec.sheet),
		wrap(factory.sheet_done()),
	);
	graph.depends(last_output, done);

	let start = graph.add_task(
		sheet_group,
		format!("sheet-{}-start", spec.sheet),
		wrap(factory.sheet_start()),
	);
	graph.depends(start, last_output);

	let mut prev_output: Option<TaskId> = None;
	for frame in 0..spec.frames {
		for band in 0..spec.bands {
			let readback = graph.add_task(
				sheet_group,
				format!("readback-{frame}-{band}"),
				wrap(factory.band_readback(frame, band)),
			);
			let output = graph.add_task(
				sheet_group,
				format!("output-{frame}-{band}"),
				wrap(factory.band_output(frame, band)),
			);
			graph.depends(start, readback);
			graph.depends(readback, output);
			graph.depends(output, last_output);
			if let Some(prev) = prev_output {
				graph.depends(prev, output);
			}
			prev_output = Some(output);
		}
	}

	SheetTasks {
		start,
		done,
	}
}

fn wrap(work: TaskWorkFn) -> impl FnOnce(&TaskContext) -> Result<(), RipError> + Send + 'static {
	move |ctx| work(ctx)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::scheduler::Scheduler;

	/// Factory producing no-op bodies.
	struct NoopFactory;

	impl SheetWorkFactory for NoopFactory {
		fn sheet_start(&mut self) -> TaskWorkFn {
			Box::new(|_| Ok(()))
		}
		fn sheet_render_done(&mut self) -> TaskWorkFn {
			Box::new(|_| Ok(()))
		}
		fn sheet_output_done(&mut self) -> TaskWorkFn {
			Box::new(|_| Ok(()))
		}
		fn sheet_done(&mut self) -> TaskWorkFn {
			Box::new(|_| Ok(()))
		}
		fn frame_start(&mut self, _frame: usize) -> TaskWorkFn {
			Box::new(|_| Ok(()))
		}
		fn frame_done(&mut self, _frame: usize) -> TaskWorkFn {
			Box::new(|_| Ok(()))
		}
		fn band_render(&mut self, _frame: usize, _band: usize) -> TaskWorkFn {
			Box::new(|_| Ok(()))
		}
		fn band_compress(&mut self, _frame: usize, _band: usize) -> TaskWorkFn {
			Box::new(|_| Ok(()))
		}
		fn band_output(&mut self, _frame: usize, _band: usize) -> TaskWorkFn {
			Box::new(|_| Ok(()))
		}
		fn band_readback(&mut self, _frame: usize, _band: usize) -> TaskWorkFn {
			Box::new(|_| Ok(()))
		}
	}

	fn position(trace: &[String], name: &str) -> usize {
		trace.iter().position(|t| t == name).unwrap_or_else(|| panic!("{name} did not run"))
	}

	fn spec(bands: usize, latency: usize) -> SheetSpec {
		SheetSpec {
			sheet: 0,
			frames: 1,
			bands,
			mht_latency: latency,
			serialize: false,
		}
	}

	#[test]
	fn test_task_counts_scenario_d() {
		// One sheet, one frame, four bands, latency 2: four render, four
		// compress, four output tasks plus one gate per band.
		let mut graph = TaskGraph::new();
		let root = graph.root();
		let _tasks = build_sheet_graph(&mut graph, root, &spec(4, 2), &mut NoopFactory);
		// 5 sheet/frame bookkeeping tasks + frame-done + 4 * (3 + 1 gate).
		assert_eq!(graph.len(), 4 + 2 + 4 * 4);
	}

	#[test]
	fn test_ordering_invariants_hold_under_parallel_runs() {
		for _ in 0..16 {
			let mut graph = TaskGraph::new();
			let root = graph.root();
			build_sheet_graph(&mut graph, root, &spec(4, 2), &mut NoopFactory);
			let outcome = Scheduler::new(4).run(graph);
			assert!(outcome.error.is_none());
			let trace = &outcome.trace;

			// Start precedes everything; done is last.
			let start = position(trace, "sheet-0-start");
			let done = position(trace, "sheet-0-done");
			assert_eq!(start, 0);
			assert_eq!(done, trace.len() - 1);

			for band in 0..4 {
				let render = position(trace, &format!("render-0-{band}"));
				let compress = position(trace, &format!("compress-0-{band}"));
				let output = position(trace, &format!("output-0-{band}"));
				assert!(render < compress && compress < output);

				// Scenario D: compression of band k waits for renders of
				// the latency window.
				for ahead in band..(band + 2).min(3) {
					let later_render = position(trace, &format!("render-0-{ahead}"));
					assert!(
						later_render < compress,
						"compress-{band} ran before render-{ahead}"
					);
				}

				// Outputs ascend strictly.
				if band > 0 {
					let prev = position(trace, &format!("output-0-{}", band - 1));
					assert!(prev < output);
				}
			}
		}
	}

	#[test]
	fn test_serialized_chain() {
		let mut graph = TaskGraph::new();
		let root = graph.root();
		let mut s = spec(3, 0);
		s.serialize = true;
		build_sheet_graph(&mut graph, root, &s, &mut NoopFactory);
		let outcome = Scheduler::new(4).run(graph);
		let trace = &outcome.trace;

		// Full interleave: every band's output precedes the next render.
		for band in 1..3 {
			let prev_output = position(trace, &format!("output-0-{}", band - 1));
			let render = position(trace, &format!("render-0-{band}"));
			assert!(prev_output < render);
		}
	}

	#[test]
	fn test_reoutput_graph_has_no_render() {
		let mut graph = TaskGraph::new();
		let root = graph.root();
		build_sheet_reoutput_graph(&mut graph, root, &spec(4, 0), &mut NoopFactory);
		let outcome = Scheduler::new(2).run(graph);
		assert!(outcome.error.is_none());
		assert!(outcome.trace.iter().all(|t| !t.starts_with("render")));
		assert!(outcome.trace.iter().all(|t| !t.starts_with("compress")));
		for band in 0..4 {
			let readback = position(&outcome.trace, &format!("readback-0-{band}"));
			let output = position(&outcome.trace, &format!("output-0-{band}"));
			assert!(readback < output);
		}
	}

	#[test]
	fn test_multi_frame_graph_runs() {
		let mut graph = TaskGraph::new();
		let root = graph.root();
		let s = SheetSpec {
			sheet: 0,
			frames: 3,
			bands: 2,
			mht_latency: 1,
			serialize: false,
		};
		build_sheet_graph(&mut graph, root, &s, &mut NoopFactory);
		let outcome = Scheduler::new(4).run(graph);
		assert!(outcome.error.is_none());
		for frame in 0..3 {
			for band in 0..2 {
				position(&outcome.trace, &format!("render-{frame}-{band}"));
				position(&outcome.trace, &format!("output-{frame}-{band}"));
			}
		}
	}
}
