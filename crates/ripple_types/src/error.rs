//! Error types for the sample codec and the paintmask codec.

use thiserror::Error;

use crate::colorant::ColorantIndex;

/// Errors that can occur when compressing or decompressing sample blocks
#[derive(Debug, Error)]
pub enum CodecError {
	/// The output limit was too small for the worst-case row expansion
	#[error("Compressed output would exceed the {max_bytes} byte limit")]
	OutputOverflow {
		/// Output limit the caller supplied
		max_bytes: usize,
	},

	/// The style byte in the stream header is not a known sample style
	#[error("Unknown sample style byte {0:#04X}")]
	UnknownStyle(u8),

	/// The style does not match the sample representation handed in
	#[error("Sample style {0:?} cannot encode this sample representation")]
	StyleMismatch(crate::sample::SampleStyle),

	/// The bitstream ended before the block was fully decoded
	#[error("Bitstream ended early: needed {needed} words, got {got}")]
	UnexpectedEof {
		/// Number of 32-bit words required
		needed: usize,
		/// Number of 32-bit words present
		got: usize,
	},

	/// Decoding finished without consuming the whole input
	#[error("Bitstream length mismatch: consumed {consumed} of {expected} bytes")]
	LengthMismatch {
		/// Bytes consumed by the decoder
		consumed: usize,
		/// Bytes the caller said were present
		expected: usize,
	},

	/// Input is not a whole number of 32-bit words
	#[error("Compressed data must be a multiple of 4 bytes, got {0}")]
	UnalignedInput(usize),
}

/// Errors that can occur when building or editing paintmasks
#[derive(Debug, Error)]
pub enum PmError {
	/// Colorant indexes handed to the builder were not strictly ascending
	#[error("Colorant indexes must be strictly ascending: {prev:?} then {next:?}")]
	Unordered {
		/// Index that came first
		prev: ColorantIndex,
		/// Offending successor
		next: ColorantIndex,
	},

	/// A negative sentinel other than All appeared in a colorant array
	#[error("Colorant index {0:?} cannot be stored in a paintmask")]
	NotStorable(ColorantIndex),

	/// An empty colorant array was supplied
	#[error("A paintmask needs at least one colorant")]
	Empty,
}
