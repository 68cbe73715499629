//! Render handoff.
//!
//! When the interpreter finishes (or suspends) a display list it hands the
//! page to the back-end. The terminating operation decides what happens
//! to the display list afterwards: a showpage discards it once rendered
//! (asynchronously when pipelining allows), a copypage keeps interpreting
//! on it, a nested context preserves it untouched, and a partial paint
//! keeps the job references while the display-list pool is drained.

use std::collections::VecDeque;

use log::{debug, info};

use crate::dl::RenderPage;

/// The interpreter operation that triggered the handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminatingOp {
	/// A showpage (or equivalent end-of-page).
	ShowPage,
	/// A copypage: the display list survives the render.
	CopyPage,
	/// A partial paint forced by memory pressure.
	PartialPaint,
}

/// What happens to the display list after rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseKind {
	/// Discard everything; the next display-list slot starts fresh and
	/// this page may render asynchronously behind the interpreter.
	EraseAll,
	/// Discard contents but reuse the slot synchronously (no pipeline).
	Clear,
	/// Keep the display list for continued interpretation (nested HDL or
	/// vignette analysis in progress).
	Preserve,
	/// Keep the display list; the next page continues on it.
	CopyPage,
	/// Keep job and raster-style references, free display-list memory.
	Partial,
}

/// Interpreter-side facts the decision needs.
#[derive(Debug, Clone, Copy)]
pub struct HandoffContext {
	/// Inside a nested HDL (form, character, pattern, imposed page).
	pub in_nested_hdl: bool,
	/// A vignette candidate is still being analysed.
	pub analyzing_vignette: bool,
	/// Render threads available.
	pub n_threads: usize,
	/// Configured page pipeline depth.
	pub pipeline_depth: usize,
}

/// Chooses the erase kind for a terminating operation.
///
/// Nested contexts always preserve: destroying the display-list memory
/// would tear down open HDLs under the caller. A showpage pipelines only
/// when both threads and depth allow it.
pub fn choose_erase(op: TerminatingOp, ctx: &HandoffContext) -> EraseKind {
	if ctx.analyzing_vignette || ctx.in_nested_hdl {
		return EraseKind::Preserve;
	}
	match op {
		TerminatingOp::ShowPage => {
			if ctx.n_threads > 1 && ctx.pipeline_depth > 1 {
				EraseKind::EraseAll
			} else {
				EraseKind::Clear
			}
		}
		TerminatingOp::CopyPage => EraseKind::CopyPage,
		TerminatingOp::PartialPaint => EraseKind::Partial,
	}
}

/// Pipeline depth to flush to after spawning a page's render.
///
/// Zero flushes everything and erases synchronously (copypage, partial
/// paint); one is used when no asynchronous erase could be arranged; a
/// deeper pipeline only pays off with more than one thread.
pub fn flush_depth(kind: EraseKind, async_erase_ok: bool, ctx: &HandoffContext) -> usize {
	if kind != EraseKind::EraseAll {
		0
	} else if !async_erase_ok {
		1
	} else if ctx.n_threads == 1 {
		1
	} else {
		ctx.pipeline_depth
	}
}

/// The back-end's page pipeline: pages rendered (possibly) behind the
/// interpreter, erased oldest-first.
#[derive(Debug, Default)]
pub struct PagePipeline {
	in_flight: VecDeque<RenderPage>,
}

impl PagePipeline {
	/// An empty pipeline.
	pub fn new() -> Self {
		Self::default()
	}

	/// Pages currently in flight.
	pub fn depth(&self) -> usize {
		self.in_flight.len()
	}

	/// Takes exclusive ownership of the next-page slot: the interpreter's
	/// page moves into the pipeline and the caller gets it back when the
	/// flush discards it.
	pub fn hand_off(&mut self, page: RenderPage, kind: EraseKind) {
		debug!(
			"page {} handed off ({kind:?}), pipeline depth {}",
			page.page_number,
			self.in_flight.len() + 1
		);
		self.in_flight.push_back(page);
		if kind != EraseKind::EraseAll {
			// Synchronous kinds never leave the page in flight.
			self.flush(0);
		}
	}

	/// Flushes the pipeline down to `depth` pages, erasing the oldest.
	///
	/// Erasing drops the display list, destroys the page's scratch spool
	/// and releases its color references.
	pub fn flush(&mut self, depth: usize) {
		while self.in_flight.len() > depth {
			let page = self.in_flight.pop_front().expect("pipeline not empty");
			info!("page {} erased", page.page_number);
			page.stores.lock().destroy_pagefile();
			drop(page);
		}
	}
}
