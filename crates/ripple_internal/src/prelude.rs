//! Prelude module for `ripple_internal`.
//!
//! This module provides a convenient way to import commonly used types,
//! traits, and constants.
//!
//! # Examples
//!
//! ```no_run
//! use ripple_internal::prelude::*;
//!
//! let stores = ImageStoreSet::new(StorePolicy::default(), None);
//! let _shared = stores.lock();
//! ```

// Core types
#[doc(inline)]
pub use ripple_types::{
	// Codec
	CodecError,
	ColorValue,

	// Identity
	ColorantIndex,
	IBBox,
	PmError,
	SampleStyle,
};

// Color store
#[doc(inline)]
pub use ripple_color::{
	ColorError,
	ColorStore,
	ColorStoreConfig,
	CombineOp,
	DlColor,
	MergeAction,
	OverprintsType,
	PackedColor,
};

// Image store
#[doc(inline)]
pub use ripple_store::{
	ImageStoreSet,
	MemoryTier,
	StoreAction,
	StoreError,
	StoreFlags,
	StoreKey,
	StorePolicy,
};

// Render pipeline
#[doc(inline)]
pub use ripple_render::{
	PrinterErrorEvent,
	RipError,
	RipErrorKind,
	dl::{DisplayList, PageGeometry, RasterStyle, RenderPage},
	halftone::{HalftoneModule, HalftoneRegistry},
	passes::{PaintType, RenderConfig, RenderPipeline},
	pgb::{MemoryPgb, PageBufferDevice},
	surface::{ContoneSurface, Surface},
};
