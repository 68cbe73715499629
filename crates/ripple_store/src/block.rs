//! Per-block storage state machine.
//!
//! ```text
//! Absent ── allocate ──▶ Memory ─┬─ compress ──────▶ Compressed
//!                                │                       │
//!                                ├─ write-to-disk ──▶ OnDisk
//!                                │                       │
//!                                └─ detect-uniform ─▶ Uniform
//! ```
//!
//! `Compressed` and `OnDisk` fault back to `Memory` on demand. A uniform
//! block keeps a single sample value and may drop its backing buffer,
//! unless a caller has reserved the buffer for in-place adjustment.
//!
//! Block geometry is byte-oriented horizontally: `width` is the row length
//! in bytes after the store's bits-per-pixel scaling, `height` is rows.

use ripple_types::codec;
use ripple_types::sample::SampleStyle;

use crate::error::StoreError;
use crate::pagefile::PageFile;

/// Where a block's sample data currently lives.
#[derive(Debug)]
pub enum BlockStorage {
	/// Raw samples resident in memory.
	Memory(Vec<u8>),
	/// Codec-compressed payload resident in memory.
	Compressed(Vec<u8>),
	/// Paged out to the scratch file.
	OnDisk {
		/// Byte offset within the scratch file.
		offset: u64,
		/// Payload length in bytes.
		len: usize,
		/// The payload is codec-compressed rather than raw.
		compressed: bool,
	},
	/// Every sample equal; the buffer is optional.
	Uniform {
		/// The repeated sample value, packed for depths up to 16 bits.
		value: u16,
		/// Backing store retained for later in-place adjustment.
		retained: Option<Vec<u8>>,
	},
}

/// One rectangular block of one plane.
#[derive(Debug)]
pub struct Block {
	/// Row length in bytes; edge blocks are truncated.
	pub width: usize,
	/// Row count; edge blocks are truncated.
	pub height: usize,
	pub(crate) storage: BlockStorage,
	/// All rows written; eviction only touches complete blocks.
	pub(crate) write_complete: bool,
	/// Compression was tried and did not pay for itself.
	pub(crate) incompressible: bool,
}

impl Block {
	/// Creates a memory-resident block of the given geometry.
	pub fn new(width: usize, height: usize) -> Self {
		Self {
			width,
			height,
			storage: BlockStorage::Memory(vec![0; width * height]),
			write_complete: false,
			incompressible: false,
		}
	}

	/// Creates a block around a recycled staging buffer.
	pub(crate) fn from_buffer(width: usize, height: usize, buf: Vec<u8>) -> Self {
		debug_assert_eq!(buf.len(), width * height);
		Self {
			width,
			height,
			storage: BlockStorage::Memory(buf),
			write_complete: false,
			incompressible: false,
		}
	}

	/// The storage state, for inspection.
	pub fn storage(&self) -> &BlockStorage {
		&self.storage
	}

	/// Bytes of payload this block currently pins in memory.
	pub fn resident_bytes(&self) -> usize {
		match &self.storage {
			BlockStorage::Memory(buf) => buf.len(),
			BlockStorage::Compressed(buf) => buf.len(),
			BlockStorage::OnDisk {
				..
			} => 0,
			BlockStorage::Uniform {
				retained,
				..
			} => retained.as_ref().map_or(0, Vec::len),
		}
	}

	/// True when eviction may touch this block.
	pub(crate) fn purgeable(&self) -> bool {
		self.write_complete
	}

	/// Reopens for writing after a store recycle.
	pub(crate) fn reopen(&mut self) {
		self.write_complete = false;
	}

	/// Compresses a complete memory-resident block.
	///
	/// Returns the released sample buffer on success, `None` when the
	/// block was not eligible or compression would not at least halve it.
	pub(crate) fn compress(
		&mut self,
		style: SampleStyle,
		bpp: u8,
	) -> Result<Option<Vec<u8>>, StoreError> {
		if !self.write_complete || self.incompressible {
			return Ok(None);
		}
		let BlockStorage::Memory(buf) = &self.storage else {
			return Ok(None);
		};

		let budget = buf.len() / 2;
		let packed = match bpp {
			32 => {
				let samples: Vec<f32> = buf
					.chunks_exact(4)
					.map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
					.collect();
				codec::compress(style, &samples, self.width / 4, self.height, budget)
			}
			8 => codec::compress_bytes(buf, self.width, self.height, budget),
			_ => return Ok(None),
		};

		match packed {
			Ok(payload) => {
				let BlockStorage::Memory(buf) =
					std::mem::replace(&mut self.storage, BlockStorage::Compressed(payload))
				else {
					unreachable!("state checked above");
				};
				Ok(Some(buf))
			}
			Err(ripple_types::CodecError::OutputOverflow {
				..
			}) => {
				self.incompressible = true;
				Ok(None)
			}
			Err(err) => Err(err.into()),
		}
	}

	/// Pages a complete block (raw or compressed) out to the scratch file.
	///
	/// Returns the released in-memory payload.
	pub(crate) fn write_to_disk(
		&mut self,
		file: &mut PageFile,
	) -> Result<Option<Vec<u8>>, StoreError> {
		if !self.write_complete {
			return Ok(None);
		}
		let (len, compressed) = match &self.storage {
			BlockStorage::Memory(buf) => (buf.len(), false),
			BlockStorage::Compressed(buf) => (buf.len(), true),
			_ => return Ok(None),
		};
		let offset = match &self.storage {
			BlockStorage::Memory(buf) | BlockStorage::Compressed(buf) => file.append(buf)?,
			_ => unreachable!(),
		};
		let old = std::mem::replace(&mut self.storage, BlockStorage::OnDisk {
			offset,
			len,
			compressed,
		});
		match old {
			BlockStorage::Memory(buf) | BlockStorage::Compressed(buf) => Ok(Some(buf)),
			_ => unreachable!(),
		}
	}

	/// Faults the sample data back into `Memory`, whatever the state.
	pub(crate) fn fault_in(
		&mut self,
		bpp: u8,
		file: Option<&mut PageFile>,
	) -> Result<(), StoreError> {
		let raw = match &self.storage {
			BlockStorage::Memory(_) => return Ok(()),
			BlockStorage::Compressed(payload) => self.decode(payload, bpp)?,
			BlockStorage::OnDisk {
				offset,
				len,
				compressed,
			} => {
				let file = file.expect("on-disk block without a scratch file");
				let payload = file.read(*offset, *len)?;
				if *compressed { self.decode(&payload, bpp)? } else { payload }
			}
			BlockStorage::Uniform {
				value,
				retained,
			} => match retained {
				Some(buf) => buf.clone(),
				None => self.expand_uniform(*value, bpp),
			},
		};

		let expected = self.width * self.height;
		if raw.len() != expected {
			return Err(StoreError::PayloadMismatch {
				expected,
				actual: raw.len(),
			});
		}
		self.storage = BlockStorage::Memory(raw);
		Ok(())
	}

	fn decode(&self, payload: &[u8], bpp: u8) -> Result<Vec<u8>, StoreError> {
		Ok(match bpp {
			32 => {
				let block = codec::decompress(payload, self.width / 4, self.height)?;
				let floats = block.as_floats().ok_or(StoreError::PayloadMismatch {
					expected: self.width * self.height,
					actual: 0,
				})?;
				floats.iter().flat_map(|f| f.to_le_bytes()).collect()
			}
			_ => {
				let block = codec::decompress(payload, self.width, self.height)?;
				block
					.as_bytes()
					.ok_or(StoreError::PayloadMismatch {
						expected: self.width * self.height,
						actual: 0,
					})?
					.to_vec()
			}
		})
	}

	fn expand_uniform(&self, value: u16, bpp: u8) -> Vec<u8> {
		let mut buf = vec![0u8; self.width * self.height];
		match bpp {
			16 => {
				for pair in buf.chunks_exact_mut(2) {
					pair.copy_from_slice(&value.to_be_bytes());
				}
			}
			_ => buf.fill(value as u8),
		}
		buf
	}

	/// Tests the block for uniformity, optionally dropping the buffer.
	///
	/// Depths up to 16 bits only: wider samples never collapse. When
	/// `free_data` is false the buffer is retained for image adjustment.
	pub(crate) fn uniform(&mut self, bpp: u8, free_data: bool) -> Option<u16> {
		if let BlockStorage::Uniform {
			value,
			retained,
		} = &mut self.storage
		{
			let value = *value;
			if free_data {
				*retained = None;
			}
			return Some(value);
		}

		let BlockStorage::Memory(buf) = &self.storage else {
			return None;
		};
		if bpp > 16 || buf.is_empty() {
			return None;
		}

		let value = if bpp == 16 {
			let first = [buf[0], buf[1]];
			if !buf.chunks_exact(2).all(|pair| pair == first) {
				return None;
			}
			u16::from_be_bytes(first)
		} else {
			let first = buf[0];
			if !buf.iter().all(|&b| b == first) {
				return None;
			}
			u16::from(first)
		};

		let BlockStorage::Memory(buf) =
			std::mem::replace(&mut self.storage, BlockStorage::Uniform {
				value,
				retained: None,
			})
		else {
			unreachable!()
		};
		if !free_data
			&& let BlockStorage::Uniform {
				retained,
				..
			} = &mut self.storage
		{
			*retained = Some(buf);
		}
		Some(value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_compress_round_trip() {
		let mut block = Block::new(128, 128);
		if let BlockStorage::Memory(buf) = &mut block.storage {
			for (i, byte) in buf.iter_mut().enumerate() {
				*byte = (i / 128) as u8;
			}
		}
		block.write_complete = true;
		let original = match &block.storage {
			BlockStorage::Memory(buf) => buf.clone(),
			_ => unreachable!(),
		};

		let released = block.compress(SampleStyle::Bytes, 8).unwrap();
		assert_eq!(released.as_ref().map(Vec::len), Some(original.len()));
		assert!(matches!(block.storage, BlockStorage::Compressed(_)));

		block.fault_in(8, None).unwrap();
		match &block.storage {
			BlockStorage::Memory(buf) => assert_eq!(buf, &original),
			other => panic!("unexpected state {other:?}"),
		}
	}

	#[test]
	fn test_incomplete_blocks_not_purgeable() {
		let mut block = Block::new(128, 128);
		assert!(block.compress(SampleStyle::Bytes, 8).unwrap().is_none());
		assert!(matches!(block.storage, BlockStorage::Memory(_)));
	}

	#[test]
	fn test_incompressible_marked_once() {
		let mut block = Block::new(64, 64);
		if let BlockStorage::Memory(buf) = &mut block.storage {
			// Uncompressible noise.
			let mut state = 0x12345678u32;
			for byte in buf.iter_mut() {
				state = state.wrapping_mul(1664525).wrapping_add(1013904223);
				*byte = (state >> 24) as u8;
			}
		}
		block.write_complete = true;
		assert!(block.compress(SampleStyle::Bytes, 8).unwrap().is_none());
		assert!(block.incompressible);
		assert!(matches!(block.storage, BlockStorage::Memory(_)));
	}

	#[test]
	fn test_uniform_detection_and_retention() {
		let mut block = Block::new(16, 16);
		if let BlockStorage::Memory(buf) = &mut block.storage {
			buf.fill(0x3A);
		}
		block.write_complete = true;

		assert_eq!(block.uniform(8, false), Some(0x3A));
		match &block.storage {
			BlockStorage::Uniform {
				value,
				retained,
			} => {
				assert_eq!(*value, 0x3A);
				assert!(retained.is_some());
			}
			other => panic!("unexpected state {other:?}"),
		}

		// Free pass drops the retained buffer; readback regenerates it.
		assert_eq!(block.uniform(8, true), Some(0x3A));
		assert_eq!(block.resident_bytes(), 0);
		block.fault_in(8, None).unwrap();
		match &block.storage {
			BlockStorage::Memory(buf) => assert!(buf.iter().all(|&b| b == 0x3A)),
			other => panic!("unexpected state {other:?}"),
		}
	}

	#[test]
	fn test_non_uniform() {
		let mut block = Block::new(4, 1);
		if let BlockStorage::Memory(buf) = &mut block.storage {
			buf.copy_from_slice(&[1, 1, 2, 1]);
		}
		assert_eq!(block.uniform(8, true), None);
	}
}
