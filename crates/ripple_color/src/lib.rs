//! Display-list color store for the `ripple-rs` render back-end.
//!
//! Every object on a display list carries an `n`-channel color. Runs of
//! objects overwhelmingly share colors, so colors are interned into a
//! content-addressed, reference-counted cache and objects hold cheap
//! handles. A color is *built* into a scratch [`PackedColor`], *interned*
//! (returning either a resurrected cache entry or a fresh copy) and later
//! *released* by reference.
//!
//! The store is single-threaded by design: the interpreter is the sole
//! writer, renderers only read through stable handles snapshotted at
//! display-list build time.
//!
//! # Examples
//!
//! ```rust
//! use ripple_color::{ColorStore, ColorStoreConfig};
//! use ripple_types::{ColorValue, ColorantIndex};
//!
//! let mut store = ColorStore::new(ColorStoreConfig::default());
//! let packed = store
//! 	.build(
//! 		&[ColorantIndex(0), ColorantIndex(2)],
//! 		&[ColorValue::from_unit(0.25), ColorValue::from_unit(0.75)],
//! 		ColorValue::ONE,
//! 	)
//! 	.unwrap();
//! let a = store.intern(&packed).unwrap();
//! let b = store.intern(&packed).unwrap();
//! assert_eq!(a.key(), b.key());
//! ```

mod cache;
mod entry;
mod error;
mod overprints;

pub use cache::{ColorKey, ColorStore, ColorStoreConfig, DlColor, MAX_REFCOUNT};
pub use entry::{MergeAction, PackedColor};
pub use error::ColorError;
pub use overprints::{CombineOp, OverprintsType};
