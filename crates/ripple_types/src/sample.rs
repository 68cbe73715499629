//! 32-bit image sample styles.
//!
//! Image stores keep wide-gamut sample data as IEEE-754 single-precision
//! floats. The codec does not compress raw float bits; each style names a
//! normalising transform that maps the expected value range onto a compact
//! integer form first, so that spatially coherent data produces small XOR
//! deltas.
//!
//! | Style             | Byte | Range      | Transform                              |
//! |-------------------|------|------------|----------------------------------------|
//! | `Flt0To1`         | 0    | 0.0..=1.0  | `bits(f + 1.0) ^ 0x3F80_0000`          |
//! | `Flt0To1Was8Bit`  | 1    | 0.0..=1.0  | as above, then `>> 14` (14-bit origin) |
//! | `FltM4ToP4`       | 2    | -4.0..=4.0 | `bits(f + 12.0) ^ 0x4100_0000`         |
//! | `Bytes`           | 3    | u8         | identity over bytes                    |
//!
//! The style byte travels in the top byte of the first word of every
//! compressed block, so a block is self-describing on readback.

use crate::error::CodecError;

/// Characterisation of the sample data held in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SampleStyle {
	/// 32-bit float data in the range 0 to +1.
	Flt0To1 = 0,
	/// 0 to +1 float data that originated as 8-bit samples; only 14 bits of
	/// mantissa are preserved through compression.
	Flt0To1Was8Bit = 1,
	/// 32-bit float data in the range -4 to +4.
	FltM4ToP4 = 2,
	/// Raw 8-bit samples packed four to a word.
	Bytes = 3,
}

/// Normalisation constants for one style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Norms {
	/// Right shift applied after the XOR, discarding noise bits.
	pub shift: u32,
	/// Bias added before taking the float's bit pattern.
	pub norm1_bits: u32,
	/// XOR mask folding the biased exponent away.
	pub norm2: u32,
}

impl SampleStyle {
	/// Decodes a style byte from a stream header.
	pub fn from_byte(byte: u8) -> Result<Self, CodecError> {
		match byte {
			0 => Ok(SampleStyle::Flt0To1),
			1 => Ok(SampleStyle::Flt0To1Was8Bit),
			2 => Ok(SampleStyle::FltM4ToP4),
			3 => Ok(SampleStyle::Bytes),
			other => Err(CodecError::UnknownStyle(other)),
		}
	}

	/// Returns true for the styles that carry float samples.
	pub fn is_float(self) -> bool {
		self != SampleStyle::Bytes
	}

	/// The normalising constants for this style.
	///
	/// `Bytes` has no transform; callers on that path use the sample bytes
	/// directly.
	pub fn norms(self) -> Norms {
		match self {
			SampleStyle::Flt0To1 => Norms {
				shift: 0,
				norm1_bits: 1.0f32.to_bits(),
				norm2: 0x3F80_0000,
			},
			SampleStyle::Flt0To1Was8Bit => Norms {
				shift: 14,
				norm1_bits: 1.0f32.to_bits(),
				norm2: 0x3F80_0000,
			},
			SampleStyle::FltM4ToP4 => Norms {
				shift: 0,
				norm1_bits: 12.0f32.to_bits(),
				norm2: 0x4100_0000,
			},
			SampleStyle::Bytes => Norms {
				shift: 0,
				norm1_bits: 0,
				norm2: 0,
			},
		}
	}

	/// Rounding term restored on decode when `shift` discarded bits.
	pub fn decode_round(self) -> u32 {
		let shift = self.norms().shift;
		if shift != 0 { (1 << (shift - 1)) / 2 } else { 0 }
	}
}
