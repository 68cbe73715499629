//! Sample Block Compression
//!
//! ## Overview
//!
//! Blocks of 32-bit image samples carry a great deal of redundancy, but
//! general-purpose compressors are a poor fit: they are slow to start, blind
//! to the 2D geometry, and cannot hold a specifiable number of float bits.
//! This codec instead runs a four stage pipeline per row:
//!
//! 1. **Normalise** — map the sample into a compact integer form for its
//!    [`SampleStyle`](crate::sample::SampleStyle)
//! 2. **Predict** — guess the value from the previous sample in the row
//! 3. **Compare** — XOR prediction and actual value into a `diff`
//! 4. **Encode** — emit a Huffman code for the bit length of `diff`,
//!    followed by that many raw bits (omitted when the length is zero)
//!
//! ## Stream Format
//!
//! | Word | Content                                                  |
//! |------|----------------------------------------------------------|
//! | 0    | bits 31..24: style byte; bits 23..0: first bitstream bits |
//! | 1+   | bitstream continuation, MSB-first packed 32-bit words     |
//!
//! Rows reset the predictor to zero, so any row can be decoded after a seek
//! to its bit offset. The Huffman table is fixed (32 codes, lengths 3 to
//! 12) and shared by every stream; see [`huffman`](self::huffman) for the
//! exact codes.
//!
//! ## Guarantees
//!
//! - An output budget of `2 * width` bytes per row never overflows; the
//!   encoder checks the budget outside the sample loop and reports
//!   [`crate::CodecError::OutputOverflow`] instead of truncating the
//!   stream.
//! - Decompression succeeds only when the stream is consumed exactly, so a
//!   corrupt length is always detected.

mod decode;
mod encode;
pub(crate) mod huffman;

#[cfg(test)]
mod tests;

pub use decode::{DecodedBlock, decompress};
pub use encode::{compress, compress_bytes};
