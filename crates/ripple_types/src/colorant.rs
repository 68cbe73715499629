//! Colorant identity.
//!
//! A colorant is a named ink or channel; the render back-end only ever sees
//! it as a small integer index assigned by the front-end raster style.
//! Negative values are reserved for the special pseudo-colorants.

use serde::{Deserialize, Serialize};

/// Index of a colorant within a raster style.
///
/// Real colorants have indexes `>= 0`. The negative sentinels mirror the
/// front-end conventions: `ALL` is the wildcard used by the /All separation,
/// `ALPHA` addresses the opacity channel, `NONE` is the no-op separation and
/// `UNKNOWN` is the not-yet-resolved marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColorantIndex(pub i32);

impl ColorantIndex {
	/// Not-yet-resolved colorant.
	pub const UNKNOWN: ColorantIndex = ColorantIndex(-1);
	/// The /None separation.
	pub const NONE: ColorantIndex = ColorantIndex(-2);
	/// The /All separation wildcard.
	pub const ALL: ColorantIndex = ColorantIndex(-3);
	/// The opacity (alpha) channel.
	pub const ALPHA: ColorantIndex = ColorantIndex(-4);

	/// Returns true for a real, storable colorant index.
	pub fn is_real(self) -> bool {
		self.0 >= 0
	}

	/// Paintmask byte index holding this colorant's bit.
	///
	/// Seven colorants per mask byte; the special indexes never reach here.
	pub(crate) fn pm_index(self) -> usize {
		debug_assert!(self.is_real(), "special colorant has no paintmask slot");
		self.0 as usize / 7
	}

	/// Bit position of this colorant within its mask byte, MSB-first.
	pub(crate) fn pm_bit_index(self) -> usize {
		debug_assert!(self.is_real(), "special colorant has no paintmask slot");
		7 - self.0 as usize % 7 - 1
	}
}

impl From<i32> for ColorantIndex {
	fn from(value: i32) -> Self {
		ColorantIndex(value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_bit_placement() {
		// ci 0 is the high colorant bit of byte 0, ci 6 the low bit.
		assert_eq!(ColorantIndex(0).pm_index(), 0);
		assert_eq!(ColorantIndex(0).pm_bit_index(), 6);
		assert_eq!(ColorantIndex(6).pm_bit_index(), 0);
		assert_eq!(ColorantIndex(7).pm_index(), 1);
		assert_eq!(ColorantIndex(7).pm_bit_index(), 6);
		assert_eq!(ColorantIndex(4).pm_bit_index(), 2);
	}

	#[test]
	fn test_sentinels_not_real() {
		assert!(!ColorantIndex::ALL.is_real());
		assert!(!ColorantIndex::ALPHA.is_real());
		assert!(!ColorantIndex::NONE.is_real());
		assert!(!ColorantIndex::UNKNOWN.is_real());
		assert!(ColorantIndex(0).is_real());
	}
}
