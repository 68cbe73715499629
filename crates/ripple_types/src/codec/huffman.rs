//! The fixed Huffman table for delta bit lengths.
//!
//! Thirty-two codes, one per possible bit length of a 32-bit XOR delta.
//! The lengths were tailored empirically: deltas of 9 to 12 significant
//! bits are by far the most common in normalised photographic data and get
//! the 3-bit codes; long deltas share a 12-bit escape range. The table is
//! normative for the on-disk block format, so it must not be retuned
//! without re-running the round-trip property tests.

use std::sync::OnceLock;

/// `(key, length)` for each delta bit length 0..=31.
pub(crate) const HUF: [(u32, u32); 32] = [
	(0x3C, 6),
	(0xFE, 8),
	(0xFD, 8),
	(0xFC, 8),
	(0x3E, 6),
	(0x0E, 4),
	(0x0D, 4),
	(0x09, 4),
	(0x08, 4),
	(0x00, 3),
	(0x01, 3),
	(0x02, 3),
	(0x03, 3),
	(0x0A, 4),
	(0x0B, 4),
	(0x0C, 4),
	(0x3D, 6),
	(0xFF0, 12),
	(0xFF1, 12),
	(0xFF2, 12),
	(0xFF3, 12),
	(0xFF4, 12),
	(0xFF5, 12),
	(0xFF6, 12),
	(0xFF7, 12),
	(0xFF8, 12),
	(0xFF9, 12),
	(0xFFA, 12),
	(0xFFB, 12),
	(0xFFC, 12),
	(0xFFD, 12),
	(0xFFE, 12),
];

/// Reverse mapping from a decoded prefix to its symbol.
///
/// Unused prefixes map to 0, which decodes as a zero delta; the prefix tree
/// walked by the decoder never lands on an unused slot for a well-formed
/// stream.
pub(crate) fn reverse_table() -> &'static [u8; 4096] {
	static REV: OnceLock<[u8; 4096]> = OnceLock::new();
	REV.get_or_init(|| {
		let mut rev = [0u8; 4096];
		for (symbol, &(key, _len)) in HUF.iter().enumerate() {
			rev[key as usize] = symbol as u8;
		}
		rev
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_table_shape() {
		assert_eq!(HUF.len(), 32);
		for &(key, len) in &HUF {
			assert!((3..=12).contains(&len));
			assert!(key < (1 << len));
		}
	}

	#[test]
	fn test_reverse_is_inverse() {
		let rev = reverse_table();
		for (symbol, &(key, _)) in HUF.iter().enumerate() {
			assert_eq!(rev[key as usize] as usize, symbol);
		}
	}

	#[test]
	fn test_prefix_free() {
		// No code is a prefix of another when both are left-aligned.
		for (i, &(ka, la)) in HUF.iter().enumerate() {
			for (j, &(kb, lb)) in HUF.iter().enumerate() {
				if i == j {
					continue;
				}
				let (shorter, ls, longer, ll) =
					if la <= lb { (ka, la, kb, lb) } else { (kb, lb, ka, la) };
				assert_ne!(shorter, longer >> (ll - ls), "code {i} prefixes {j}");
			}
		}
	}
}
