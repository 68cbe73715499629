//! Core data types and pure codecs for the `ripple-rs` render back-end.
//!
//! # Contents
//!
//! - **Samples**: 32-bit image samples and their storage styles
//! - **Codec**: delta-predicted, Huffman-coded compression of sample blocks
//! - **Paintmask**: packed variable-length colorant presence masks
//! - **Colorants / color values**: channel identity and 16-bit fixed-point
//!   color values shared by the color store and the renderer
//!
//! # Examples
//!
//! ```rust
//! use ripple_types::codec;
//! use ripple_types::sample::SampleStyle;
//!
//! let samples = vec![0.5f32; 128 * 128];
//! let packed = codec::compress(SampleStyle::Flt0To1, &samples, 128, 128, 1 << 20).unwrap();
//! let back = codec::decompress(&packed, 128, 128).unwrap();
//! assert_eq!(back.as_floats().unwrap(), &samples[..]);
//! ```

pub mod bbox;
pub mod codec;
pub mod colorant;
pub mod paintmask;
pub mod sample;
pub mod value;

mod error;

pub use bbox::IBBox;
pub use colorant::ColorantIndex;
pub use error::{CodecError, PmError};
pub use sample::SampleStyle;
pub use value::ColorValue;

/// Prelude module, `use ripple_types::prelude::*;` for the common types.
pub mod prelude {
	#[doc(inline)]
	pub use crate::{CodecError, ColorValue, ColorantIndex, IBBox, PmError, SampleStyle};
}
