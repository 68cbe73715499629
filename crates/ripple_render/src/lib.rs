//! Render pipeline for the `ripple-rs` back-end.
//!
//! The input is a banded display list handed off by the interpreter; the
//! output is device rasters delivered band by band to a page buffer sink.
//! Between the two sits a hierarchical task graph:
//!
//! ```text
//! Page
//!  └─ Pass (composite | final; retried on re-output)
//!      └─ Sheet
//!          ├─ sheet-start            (opens the page buffer)
//!          ├─ Frame[]
//!          │   ├─ frame-start
//!          │   ├─ Band[]  render ─▶ compress ─▶ output
//!          │   └─ frame-done
//!          ├─ sheet-render-done
//!          ├─ sheet-output-done      (closes the page buffer)
//!          └─ sheet-done
//! ```
//!
//! Modular halftone latency inserts gate tasks so band `k`'s compression
//! waits for renders `k..k+L`; page-buffer errors translate into retry,
//! re-output, cancel or abort dispositions handled by the pass
//! orchestrator.

pub mod band;
pub mod dl;
pub mod graph;
pub mod halftone;
pub mod handoff;
pub mod passes;
pub mod pgb;
pub mod scheduler;
pub mod surface;

mod error;

pub use error::{PrinterErrorEvent, RipError, RipErrorKind};
