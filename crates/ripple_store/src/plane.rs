//! One colorant plane of an image store.

use crate::block::Block;

/// A row-major grid of block slots for one colorant.
///
/// The purge cursors record the first block row each eviction tier still
/// has work in, so repeated low-memory calls skip fully-processed rows.
#[derive(Debug)]
pub(crate) struct Plane {
	pub blocks: Vec<Option<Block>>,
	/// First block row the compression tier may still purge.
	pub y_compressed: usize,
	/// First block row the disk tier may still purge.
	pub y_purged: usize,
	/// Buffers this plane would like pooled for staging.
	pub n_desired_blists: usize,
}

impl Plane {
	pub fn new(nblocks: usize) -> Self {
		Self {
			blocks: (0..nblocks).map(|_| None).collect(),
			y_compressed: 0,
			y_purged: 0,
			n_desired_blists: 0,
		}
	}

	/// Bytes of sample data this plane currently pins in memory.
	pub fn resident_bytes(&self) -> usize {
		self.blocks.iter().flatten().map(Block::resident_bytes).sum()
	}
}
