//! Unit tests for the sample block codec.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::sample::SampleStyle;

fn round_trip_floats(style: SampleStyle, samples: &[f32], width: usize, height: usize) -> Vec<f32> {
	let packed = compress(style, samples, width, height, samples.len() * 8 + 64).unwrap();
	let block = decompress(&packed, width, height).unwrap();
	block.as_floats().unwrap().to_vec()
}

#[test]
fn test_constant_block_compresses_small() {
	// Scenario: a 128x128 block of constant 0.5. The first sample costs one
	// code plus raw bits; every other sample in a row is a zero delta (one
	// 3-bit code), and every row starts identically. Well under 16 bytes
	// per row of payload, and the whole block fits easily in 8 KiB.
	let samples = vec![0.5f32; 128 * 128];
	let packed = compress(SampleStyle::Flt0To1, &samples, 128, 128, 1 << 20).unwrap();
	assert!(packed.len() <= 8192, "constant block took {} bytes", packed.len());

	let block = decompress(&packed, 128, 128).unwrap();
	assert_eq!(block.as_floats().unwrap(), &samples[..]);
}

#[test]
fn test_exact_round_trip_flt_0_1() {
	let mut rng = SmallRng::seed_from_u64(0x1A2B);
	let samples: Vec<f32> = (0..64 * 64).map(|_| rng.random::<f32>()).collect();
	let back = round_trip_floats(SampleStyle::Flt0To1, &samples, 64, 64);
	assert_eq!(back, samples);
}

#[test]
fn test_exact_round_trip_flt_m4_p4() {
	let mut rng = SmallRng::seed_from_u64(0x3C4D);
	let samples: Vec<f32> = (0..64 * 64).map(|_| rng.random::<f32>() * 8.0 - 4.0).collect();
	let back = round_trip_floats(SampleStyle::FltM4ToP4, &samples, 64, 64);
	assert_eq!(back, samples);
}

#[test]
fn test_bounded_error_was_8bit() {
	// The 14-bit shift discards mantissa bits; error must stay within
	// 1/2^18 per sample.
	let samples: Vec<f32> = (0..256).map(|i| i as f32 / 255.0).collect();
	let back = round_trip_floats(SampleStyle::Flt0To1Was8Bit, &samples, 16, 16);
	for (a, b) in samples.iter().zip(&back) {
		assert!((a - b).abs() <= 1.0 / (1 << 18) as f32, "{a} vs {b}");
	}
}

#[test]
fn test_bytes_round_trip() {
	let mut rng = SmallRng::seed_from_u64(0x5E6F);
	let samples: Vec<u8> = (0..96 * 32).map(|_| rng.random()).collect();
	let packed = compress_bytes(&samples, 96, 32, 1 << 16).unwrap();
	let block = decompress(&packed, 96, 32).unwrap();
	assert_eq!(block.as_bytes().unwrap(), &samples[..]);
}

#[test]
fn test_truncated_blocks_round_trip() {
	// Edge blocks are narrower and shorter than 128x128.
	let samples: Vec<f32> = (0..37 * 19).map(|i| (i % 7) as f32 / 7.0).collect();
	let back = round_trip_floats(SampleStyle::Flt0To1, &samples, 37, 19);
	assert_eq!(back, samples);
}

#[test]
fn test_decompress_consumes_exactly() {
	let samples = vec![0.25f32; 32 * 32];
	let mut packed = compress(SampleStyle::Flt0To1, &samples, 32, 32, 1 << 16).unwrap();

	// Appending a stray word must be detected.
	packed.extend_from_slice(&[0, 0, 0, 0]);
	assert!(matches!(
		decompress(&packed, 32, 32),
		Err(crate::CodecError::LengthMismatch { .. })
	));
}

#[test]
fn test_overflow_reports_not_corrupts() {
	let mut rng = SmallRng::seed_from_u64(0x7081);
	let samples: Vec<f32> = (0..64 * 64).map(|_| rng.random()).collect();

	// Random data is incompressible, so 16 bytes cannot hold it.
	let result = compress(SampleStyle::Flt0To1, &samples, 64, 64, 16);
	assert!(matches!(result, Err(crate::CodecError::OutputOverflow { .. })));
}

#[test]
fn test_worst_case_budget_suffices() {
	let mut rng = SmallRng::seed_from_u64(0x92A3);
	let samples: Vec<u8> = (0..128 * 16).map(|_| rng.random()).collect();
	let budget = 2 * 128 * 16;
	let packed = compress_bytes(&samples, 128, 16, budget).unwrap();
	assert!(packed.len() <= budget);
}

#[test]
fn test_style_byte_in_header() {
	let samples = vec![0.0f32; 4];
	let packed = compress(SampleStyle::FltM4ToP4, &samples, 2, 2, 64).unwrap();
	assert_eq!(packed[0], SampleStyle::FltM4ToP4 as u8);
}

#[test]
fn test_float_style_rejects_byte_entry() {
	let samples = vec![0.0f32; 4];
	assert!(matches!(
		compress(SampleStyle::Bytes, &samples, 2, 2, 64),
		Err(crate::CodecError::StyleMismatch(_))
	));
}
