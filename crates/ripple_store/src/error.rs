//! Error type for the image block store.

use thiserror::Error;

/// Errors that can occur in the image block store
#[derive(Debug, Error)]
pub enum StoreError {
	/// A handle referred to a store that no longer exists
	#[error("Stale image store handle")]
	StaleHandle,

	/// Coordinates fell outside the store's bounding box
	#[error("Access at ({x}, {y}) outside store bounds")]
	OutOfBounds {
		/// X coordinate in image space
		x: i32,
		/// Y coordinate in image space
		y: i32,
	},

	/// A plane index was out of range or the plane was never created
	#[error("Plane {0} does not exist")]
	NoSuchPlane(usize),

	/// The store is not open for writing
	#[error("Store is closed for writing")]
	NotWritable,

	/// Two stores could not be merged
	#[error("Stores have incompatible geometry for merging")]
	MergeMismatch,

	/// Recompression or readback produced the wrong amount of data
	#[error("Block payload mismatch: expected {expected} bytes, got {actual}")]
	PayloadMismatch {
		/// Bytes the block geometry requires
		expected: usize,
		/// Bytes actually produced
		actual: usize,
	},

	/// Sample codec failure
	#[error(transparent)]
	Codec(#[from] ripple_types::CodecError),

	/// Scratch file I/O failure; cancels the in-flight render
	#[error(transparent)]
	Io(#[from] std::io::Error),
}
