#![allow(clippy::single_component_path_imports)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! `ripple-rs` is the render back-end of a raster image processor: it
//! takes a banded display list handed off by a front-end interpreter and
//! delivers device rasters, band by band, to a page buffer sink.
//!
//! The heavy lifting lives in the workspace crates — the image block
//! store, the display-list color cache, and the render pipeline — all
//! re-exported here through `ripple_internal`.

pub use ripple_internal::*;
