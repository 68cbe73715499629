//! Block compression.

use crate::error::CodecError;
use crate::sample::SampleStyle;

use super::huffman::HUF;

/// Bit writer packing MSB-first into 32-bit words.
///
/// The first word is seeded with the style byte in its top byte, leaving 24
/// free bits, so the writer state never needs a special header path.
#[derive(Debug)]
struct BitWriter {
	words: Vec<u32>,
	bits_free: u32,
	max_bytes: usize,
}

impl BitWriter {
	fn new(style: SampleStyle, max_bytes: usize) -> Self {
		Self {
			words: vec![u32::from(style as u8) << 24],
			bits_free: 24,
			max_bytes,
		}
	}

	/// Appends the low `bits` bits of `data`, high bit first.
	fn put(&mut self, bits: u32, data: u32) {
		debug_assert!(bits >= 1 && bits <= 32, "corrupt number of bits");
		debug_assert!(bits == 32 || data < (1 << bits), "data wider than bit count");

		let last = self.words.last_mut().expect("writer always holds a word");
		if self.bits_free < bits {
			let spill = bits - self.bits_free;
			*last |= data >> spill;
			self.words.push(data << (32 - spill));
			self.bits_free = 32 - spill;
		} else {
			*last |= data << (self.bits_free - bits);
			self.bits_free -= bits;
			if self.bits_free == 0 {
				self.words.push(0);
				self.bits_free = 32;
			}
		}
	}

	/// Worst-case space check, kept outside the per-sample loop.
	fn room_for_row(&self, width: usize) -> Result<(), CodecError> {
		let used = (self.words.len() - 1) * 4;
		if self.max_bytes.saturating_sub(used) < 2 * width {
			return Err(CodecError::OutputOverflow {
				max_bytes: self.max_bytes,
			});
		}
		Ok(())
	}

	/// Flushes to big-endian bytes, dropping an untouched trailing word.
	fn finish(mut self) -> Vec<u8> {
		if self.bits_free == 32 {
			self.words.pop();
		}
		let mut out = Vec::with_capacity(self.words.len() * 4);
		for word in &self.words {
			out.extend_from_slice(&word.to_be_bytes());
		}
		out
	}
}

/// Emits one delta: the Huffman code for its bit length, then the raw bits.
#[inline(always)]
fn put_diff(out: &mut BitWriter, diff: u32) {
	let bits = u32::BITS - diff.leading_zeros();
	let (key, len) = HUF[bits as usize];
	out.put(len, key);
	if bits != 0 {
		out.put(bits, diff);
	}
}

/// Compresses a block of float samples.
///
/// `src` holds `width * height` samples in row-major order. At most
/// `max_bytes` of output are produced; a too-small budget yields
/// [`CodecError::OutputOverflow`] and a partially-unusable stream is never
/// returned. `2 * width * height` bytes (plus one header word) is always
/// enough.
pub fn compress(
	style: SampleStyle,
	src: &[f32],
	width: usize,
	height: usize,
	max_bytes: usize,
) -> Result<Vec<u8>, CodecError> {
	if !style.is_float() {
		return Err(CodecError::StyleMismatch(style));
	}
	debug_assert_eq!(src.len(), width * height, "sample count mismatch");

	let norms = style.norms();
	let norm1 = f32::from_bits(norms.norm1_bits);
	let mut out = BitWriter::new(style, max_bytes);

	for row in src.chunks_exact(width) {
		out.room_for_row(width)?;
		let mut prev = 0u32;
		for &sample in row {
			let val = ((sample + norm1).to_bits() ^ norms.norm2) >> norms.shift;
			put_diff(&mut out, prev ^ val);
			prev = val;
		}
	}

	Ok(out.finish())
}

/// Compresses a block of raw byte samples (the `Bytes` style).
///
/// The predictor and Huffman table are shared with the float path; deltas
/// simply never exceed eight bits.
pub fn compress_bytes(
	src: &[u8],
	width: usize,
	height: usize,
	max_bytes: usize,
) -> Result<Vec<u8>, CodecError> {
	debug_assert_eq!(src.len(), width * height, "sample count mismatch");

	let mut out = BitWriter::new(SampleStyle::Bytes, max_bytes);

	for row in src.chunks_exact(width) {
		out.room_for_row(width)?;
		let mut prev = 0u32;
		for &sample in row {
			let val = u32::from(sample);
			put_diff(&mut out, prev ^ val);
			prev = val;
		}
	}

	Ok(out.finish())
}
