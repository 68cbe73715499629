//! Unit tests for the paintmask codec.

use super::*;
use crate::colorant::ColorantIndex;
use crate::value::ColorValue;

fn ci(raw: i32) -> ColorantIndex {
	ColorantIndex(raw)
}

#[test]
fn test_setup_two_colorants_spanning_bytes() {
	// Colorants 4 and 7: bit 2 of byte 0 (chained) and bit 6 of byte 1.
	let (pm, pad) = setup(&[ci(4), ci(7)], ColorValue::ONE).unwrap();
	assert_eq!(&pm[..], &[0x84, 0x40]);
	assert_eq!(pad, 0);
	assert_eq!(findsize(&pm), 2);
	assert_eq!(total_colorants(&pm), 2);
}

#[test]
fn test_setup_rejects_unordered() {
	assert!(matches!(
		setup(&[ci(7), ci(4)], ColorValue::ONE),
		Err(crate::PmError::Unordered { .. })
	));
}

#[test]
fn test_single_colorant_masks() {
	let (pm, _) = setup(&[ci(0)], ColorValue::ONE).unwrap();
	assert_eq!(&pm[..], &[0x40]);

	let (pm, _) = setup(&[ci(6)], ColorValue::ONE).unwrap();
	assert_eq!(&pm[..], &[0x01]);

	// Colorant 13 lands on the low bit of byte 1.
	let (pm, _) = setup(&[ci(13)], ColorValue::ONE).unwrap();
	assert_eq!(&pm[..], &[0x80, 0x01]);
}

#[test]
fn test_colorant_offset_positions() {
	let cis = [ci(0), ci(2), ci(4), ci(9)];
	let (pm, _) = setup(&cis, ColorValue::ONE).unwrap();
	for (pos, &c) in cis.iter().enumerate() {
		assert_eq!(colorant_offset(&pm, c), Some(pos), "colorant {c:?}");
	}
	assert_eq!(colorant_offset(&pm, ci(1)), None);
	assert_eq!(colorant_offset(&pm, ci(100)), None);
}

#[test]
fn test_allsep_padding_and_fallback() {
	// All + colorants {1, 9}: colorant 9 is bit 4 of byte 1, so the four
	// trailing bits are padded and four extra /All copies are implied.
	let (pm, pad) = setup(&[ColorantIndex::ALL, ci(1), ci(9)], ColorValue::ONE).unwrap();
	assert_eq!(pad, 4);
	assert_eq!(total_colorants(&pm), 2 + pad + 1);

	// Real colorants keep their positions; the pad slots and the /All value
	// trail them.
	assert_eq!(colorant_offset(&pm, ci(1)), Some(0));
	assert_eq!(colorant_offset(&pm, ci(9)), Some(1));
	assert_eq!(colorant_offset(&pm, ci(10)), Some(2));

	// An absent colorant falls back to the /All slot.
	let absent = colorant_offset(&pm, ci(100)).unwrap();
	assert_eq!(absent, colorant_offset(&pm, ColorantIndex::ALL).unwrap());
	assert_eq!(absent, 2 + pad);
}

#[test]
fn test_opacity_command() {
	let half = ColorValue::from_unit(0.5);
	let (pm, _) = setup(&[ci(0), ci(1)], half).unwrap();

	let info = parse(&pm);
	assert!(info.opacity);
	assert!(!info.allsep);
	assert_eq!(info.total_len, 1 + 2);
	assert_eq!(total_colorants(&pm), 3);
	assert_eq!(colorant_offset(&pm, ColorantIndex::ALPHA), Some(2));
}

#[test]
fn test_opacity_after_allsep() {
	let half = ColorValue::from_unit(0.5);
	let (pm, pad) = setup(&[ColorantIndex::ALL, ci(0)], half).unwrap();

	let info = parse(&pm);
	assert!(info.allsep && info.opacity);
	// One real colorant, six pad copies, the All value and the opacity.
	assert_eq!(pad, 6);
	assert_eq!(total_colorants(&pm), 1 + pad + 1 + 1);
	assert_eq!(colorant_offset(&pm, ColorantIndex::ALPHA), Some(1 + pad + 1));
}

#[test]
fn test_special_commands() {
	let mut pm = PmBuf::new();
	setup_cmd(&mut pm, PmCommand::All0);
	assert_eq!(special_type(&pm), PmSpecial::Black);
	assert_eq!(findsize(&pm), 2);
	assert_eq!(total_colorants(&pm), 0);
	assert_eq!(colorant_offset(&pm, ci(0)), None);

	let mut pm = PmBuf::new();
	setup_cmd(&mut pm, PmCommand::All1);
	assert_eq!(special_type(&pm), PmSpecial::White);

	let mut pm = PmBuf::new();
	setup_cmd(&mut pm, PmCommand::None);
	assert_eq!(special_type(&pm), PmSpecial::None);
}

#[test]
fn test_copy_equal() {
	let (pm, _) = setup(&[ci(0), ci(3), ci(8)], ColorValue::from_unit(0.25)).unwrap();
	let dup = copy(&pm);
	assert!(equal(&pm, &dup));
	assert!(equal(&dup, &pm));

	let (other, _) = setup(&[ci(0), ci(3)], ColorValue::from_unit(0.25)).unwrap();
	assert!(!equal(&pm, &other));
	assert!(!equal(&other, &pm));
}

#[test]
fn test_colorants_iterator() {
	let cis = [ci(0), ci(4), ci(6), ci(7), ci(20)];
	let (pm, _) = setup(&cis, ColorValue::ONE).unwrap();
	let seen: Vec<ColorantIndex> = colorants(&pm).collect();
	assert_eq!(&seen[..], &cis[..]);
}

#[test]
fn test_raw_mask_round_trip() {
	let cis = [ci(1), ci(8), ci(14)];
	let raw = setup_raw_mask(&cis).unwrap();
	assert_eq!(raw_mask_len(&raw), 3);
	let seen: Vec<ColorantIndex> = raw_mask_colorants(&raw).collect();
	assert_eq!(&seen[..], &cis[..]);
	assert!(raw_mask_has(&raw, ci(8)));
	assert!(!raw_mask_has(&raw, ci(9)));
	assert!(!raw_mask_has(&raw, ColorantIndex::ALPHA));
}

#[test]
fn test_locate_overprints_absent() {
	let (pm, _) = setup(&[ci(0), ci(1)], ColorValue::ONE).unwrap();
	assert_eq!(locate_overprints(&pm), None);
}
