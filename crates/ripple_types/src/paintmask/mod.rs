//! Paintmask Codec
//!
//! ## Overview
//!
//! A paintmask is the packed, variable-length byte string at the head of
//! every display-list color. It declares which colorants the color carries,
//! whether an /All-separation value and an opacity value follow the
//! per-colorant values, and which channels are overprinted with max-blits.
//!
//! ## Grammar
//!
//! ```text
//! pm := CMD ALL0 | CMD ALL1 | CMD NONE
//!     | mask_byte+
//!       ( CMD ALLSEP )?                -- implicit-colorant value present
//!       ( CMD OPACITY )?               -- alpha value present
//!       ( CMD MAXBLT mask_byte+ )?     -- overprint mask for max-blits
//! ```
//!
//! `CMD` is the literal byte `0x00`. Every mask byte and command byte
//! carries a chain bit (`0x80`) when another byte follows. A mask byte
//! holds seven colorant-presence bits interpreted MSB-first, so colorant
//! index 0 is bit 6 of byte 0 and colorant index 7 is bit 6 of byte 1.
//!
//! When ALLSEP is present the final mask byte is padded out with trailing
//! colorant bits and matching copies of the /All value are inserted among
//! the colorvalues, keeping the value array aligned; [`setup`] reports the
//! pad count so the color builder can replicate the value.
//!
//! ## Ordering
//!
//! Colorant indexes within a mask are globally ordered ascending. The
//! builder rejects unordered input; the read-side operations assume it.

#[cfg(test)]
mod tests;

use smallvec::SmallVec;

use crate::colorant::ColorantIndex;
use crate::error::PmError;
use crate::value::ColorValue;

/// Chain bit: another mask or command byte follows this one.
pub const CHAIN: u8 = 0x80;

/// Command escape byte.
pub const CMD: u8 = 0x00;

/// Inline buffer type for built paintmasks.
pub type PmBuf = SmallVec<[u8; 16]>;

/// Paintmask command codes, the byte following a `CMD` escape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PmCommand {
	/// Zero color value in every colorant channel (black).
	All0 = 0x10,
	/// Full color value in every colorant channel (white).
	All1 = 0x11,
	/// An /All-separation value follows the per-colorant values.
	AllSep = 0x12,
	/// The /None separation color.
	None = 0x13,
	/// A second mask follows, flagging max-blitted (overprinted) channels.
	OpMaxblt = 0x14,
	/// An opacity value is the final color value.
	Opacity = 0x15,
}

/// What a paintmask's leading bytes denote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmSpecial {
	/// An ordinary colorant mask.
	Mask,
	/// The ALL0 constant (black).
	Black,
	/// The ALL1 constant (white).
	White,
	/// The NONE constant.
	None,
}

/// Parsed shape of a paintmask: where each section lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmInfo {
	/// Bytes of plain colorant mask (zero for command colors).
	pub mask_len: usize,
	/// ALLSEP command present.
	pub allsep: bool,
	/// OPACITY command present.
	pub opacity: bool,
	/// Byte offset of the first max-blit mask byte, when present.
	pub maxblt: Option<usize>,
	/// Total byte length including every command and tail.
	pub total_len: usize,
}

#[inline]
fn mask_of(byte: u8) -> u8 {
	byte & !CHAIN
}

#[inline]
fn chain_set(byte: u8) -> bool {
	byte & CHAIN != 0
}

#[inline]
fn is_cmd_at(pm: &[u8], ipm: usize, cmd: PmCommand) -> bool {
	chain_set(pm[ipm]) && pm[ipm + 1] == CMD && mask_of(pm[ipm + 2]) == cmd as u8
}

/// Colorant bits set before `bit` within a mask byte (MSB-first order).
#[inline]
fn lead_mask(bit: usize) -> u8 {
	((0x7Fu32 << (bit + 1)) & 0x7F) as u8
}

/// Colorant bits after `bit` within a mask byte.
#[inline]
fn trail_mask(bit: usize) -> u8 {
	((1u32 << bit) - 1) as u8
}

/// Index of the last plain mask byte, caller guarantees `pm[0] != CMD`.
fn scan_masks(pm: &[u8]) -> usize {
	let mut ipm = 0;
	while chain_set(pm[ipm]) && pm[ipm + 1] != CMD {
		ipm += 1;
	}
	ipm
}

/// Classifies the leading bytes of a paintmask.
pub fn special_type(pm: &[u8]) -> PmSpecial {
	if pm[0] != CMD {
		return PmSpecial::Mask;
	}
	match mask_of(pm[1]) {
		b if b == PmCommand::All0 as u8 => PmSpecial::Black,
		b if b == PmCommand::All1 as u8 => PmSpecial::White,
		b if b == PmCommand::None as u8 => PmSpecial::None,
		_ => {
			debug_assert!(false, "unknown command code at paintmask head");
			PmSpecial::Mask
		}
	}
}

/// Parses the sections of a paintmask.
pub fn parse(pm: &[u8]) -> PmInfo {
	if pm[0] == CMD {
		return PmInfo {
			mask_len: 0,
			allsep: false,
			opacity: false,
			maxblt: None,
			total_len: 2,
		};
	}

	let mut ipm = scan_masks(pm);
	let mask_len = ipm + 1;
	let mut allsep = false;
	let mut opacity = false;
	let mut maxblt = None;

	if is_cmd_at(pm, ipm, PmCommand::AllSep) {
		allsep = true;
		ipm += 2;
	}
	if is_cmd_at(pm, ipm, PmCommand::Opacity) {
		opacity = true;
		ipm += 2;
	}
	if is_cmd_at(pm, ipm, PmCommand::OpMaxblt) {
		ipm += 2;
		maxblt = Some(ipm + 1);
		// A trailing zero byte here is a valid mask byte, not a command;
		// colorants may have been removed after being added.
		loop {
			ipm += 1;
			if !chain_set(pm[ipm]) {
				break;
			}
		}
	}
	debug_assert!(!chain_set(pm[ipm]), "paintmask terminated early");

	PmInfo {
		mask_len,
		allsep,
		opacity,
		maxblt,
		total_len: ipm + 1,
	}
}

/// Total length of the paintmask in bytes, commands and maxblt tail included.
pub fn findsize(pm: &[u8]) -> usize {
	parse(pm).total_len
}

/// Length of the plain mask bytes only, zero for command colors.
pub fn findsize_excluding_commands(pm: &[u8]) -> usize {
	parse(pm).mask_len
}

/// Number of colorvalues implied by the paintmask.
///
/// Counts the colorant bits, plus one for ALLSEP and one for OPACITY.
/// Command colors (ALL0/ALL1/NONE) imply zero values.
pub fn total_colorants(pm: &[u8]) -> usize {
	if pm[0] == CMD {
		return 0;
	}
	let info = parse(pm);
	let mut count = 0usize;
	for &byte in &pm[..info.mask_len] {
		count += mask_of(byte).count_ones() as usize;
	}
	debug_assert!(count > 0, "paintmask has no colorant bits set");
	if info.allsep {
		count += 1;
	}
	if info.opacity {
		count += 1;
	}
	count
}

/// Colorvalue offset for the given colorant.
///
/// Returns the position of `ci`'s value within the color's value array.
/// [`ColorantIndex::ALL`] and [`ColorantIndex::ALPHA`] address the
/// /All-separation and opacity values. A real colorant that is absent
/// falls back to the /All value when one is present; `None` only when the
/// colorant is absent and no fallback exists.
pub fn colorant_offset(pm: &[u8], ci: ColorantIndex) -> Option<usize> {
	if pm[0] == CMD {
		return None;
	}

	let mut ccv = 0usize;
	// Special (negative) indexes get a slot index past any real mask byte,
	// so the scan runs to the command tail.
	let ipm_colorant = if ci.is_real() { ci.pm_index() } else { usize::MAX };
	let mut ipm = 0;

	loop {
		debug_assert!(pm[ipm] != CMD, "command byte inside plain mask bytes");
		let mask = mask_of(pm[ipm]);

		if ipm == ipm_colorant {
			let bit = ci.pm_bit_index();
			if mask & (1 << bit) != 0 {
				ccv += (mask & lead_mask(bit)).count_ones() as usize;
				return Some(ccv);
			}
			// Absent: keep scanning so ALLSEP can stand in.
		}

		if !chain_set(pm[ipm]) {
			return None;
		}
		ccv += mask.count_ones() as usize;
		ipm += 1;
		if pm[ipm] == CMD {
			break;
		}
	}

	if mask_of(pm[ipm + 1]) == PmCommand::AllSep as u8 {
		if ci != ColorantIndex::ALPHA {
			debug_assert!(
				ci == ColorantIndex::ALL || ci.is_real(),
				"unexpected colorant fell through to the All value"
			);
			return Some(ccv);
		}
		if !chain_set(pm[ipm + 1]) {
			return None;
		}
		ipm += 2;
		ccv += 1;
	}

	if ci == ColorantIndex::ALPHA && mask_of(pm[ipm + 1]) == PmCommand::Opacity as u8 {
		return Some(ccv);
	}

	None
}

/// Writes a two-byte special command, returning its length.
pub fn setup_cmd(out: &mut PmBuf, cmd: PmCommand) -> usize {
	out.push(CMD);
	out.push(cmd as u8);
	2
}

/// Builds a paintmask from a sorted array of colorant indexes.
///
/// The first entry may be [`ColorantIndex::ALL`]; the /All value then
/// occupies the slot after the real colorants, with the final mask byte
/// padded by trailing bits. Returns the built mask and the number of extra
/// /All value copies the padding requires.
pub fn setup(
	cis: &[ColorantIndex],
	opacity: ColorValue,
) -> Result<(PmBuf, usize), PmError> {
	if cis.is_empty() {
		return Err(PmError::Empty);
	}
	for pair in cis.windows(2) {
		if pair[0] >= pair[1] {
			return Err(PmError::Unordered {
				prev: pair[0],
				next: pair[1],
			});
		}
	}

	let all_sep = cis[0] == ColorantIndex::ALL;
	let first_real = usize::from(all_sep);
	if all_sep && cis.len() < 2 {
		return Err(PmError::Empty);
	}
	for &ci in &cis[first_real..] {
		if !ci.is_real() {
			return Err(PmError::NotStorable(ci));
		}
	}

	let last = cis[cis.len() - 1];
	let ipm_last = last.pm_index();

	let mut out = PmBuf::new();
	let mut ici = first_real;
	for ipm in 0..=ipm_last {
		let mut byte = if ipm < ipm_last { CHAIN } else { 0 };
		while ici < cis.len() && cis[ici].pm_index() == ipm {
			byte |= 1 << cis[ici].pm_bit_index();
			ici += 1;
		}
		out.push(byte);
	}
	debug_assert_eq!(ici, cis.len(), "colorant indexes left out of the paintmask");

	let mut pad = 0usize;
	if all_sep {
		let bit = last.pm_bit_index();
		out[ipm_last] |= CHAIN;
		if bit > 0 {
			out[ipm_last] |= trail_mask(bit);
			pad = trail_mask(bit).count_ones() as usize;
		}
		setup_cmd(&mut out, PmCommand::AllSep);
	}

	if opacity < ColorValue::ONE {
		let chain_at = out.len() - 1;
		out[chain_at] |= CHAIN;
		setup_cmd(&mut out, PmCommand::Opacity);
	}

	Ok((out, pad))
}

/// Copies a paintmask, returning the bytes actually belonging to it.
pub fn copy(pm: &[u8]) -> PmBuf {
	PmBuf::from_slice(&pm[..findsize(pm)])
}

/// Exact equality of two paintmasks, command tails included.
pub fn equal(pm1: &[u8], pm2: &[u8]) -> bool {
	let len = findsize(pm1);
	if pm2.len() < len {
		return false;
	}
	pm1[..len] == pm2[..len]
}

/// Byte offset of the first max-blit mask byte, when any.
pub fn locate_overprints(pm: &[u8]) -> Option<usize> {
	if pm[0] == CMD { None } else { parse(pm).maxblt }
}

/// Iterates the real colorant indexes present in the plain mask bytes.
pub fn colorants(pm: &[u8]) -> impl Iterator<Item = ColorantIndex> + '_ {
	let mask_len = if pm[0] == CMD { 0 } else { parse(pm).mask_len };
	pm[..mask_len].iter().enumerate().flat_map(|(ipm, &byte)| {
		let mask = mask_of(byte);
		(0..7).filter_map(move |bit_index| {
			let bit = 6 - bit_index;
			if mask & (1 << bit) != 0 {
				Some(ColorantIndex((ipm * 7 + bit_index) as i32))
			} else {
				None
			}
		})
	})
}

/// Iterates colorant indexes flagged in a raw mask-byte run (no commands),
/// as found in a max-blit tail.
pub fn raw_mask_colorants(mask_bytes: &[u8]) -> impl Iterator<Item = ColorantIndex> + '_ {
	mask_bytes.iter().enumerate().flat_map(|(ipm, &byte)| {
		let mask = mask_of(byte);
		(0..7).filter_map(move |bit_index| {
			let bit = 6 - bit_index;
			if mask & (1 << bit) != 0 {
				Some(ColorantIndex((ipm * 7 + bit_index) as i32))
			} else {
				None
			}
		})
	})
}

/// Length of a raw mask-byte run (no command termination, chain bits only).
pub fn raw_mask_len(mask_bytes: &[u8]) -> usize {
	let mut ipm = 0;
	while chain_set(mask_bytes[ipm]) {
		ipm += 1;
	}
	ipm + 1
}

/// Builds a raw mask-byte run (chain-linked, no commands) from sorted
/// colorant indexes, for use as a max-blit tail.
pub fn setup_raw_mask(cis: &[ColorantIndex]) -> Result<PmBuf, PmError> {
	if cis.is_empty() {
		return Err(PmError::Empty);
	}
	for pair in cis.windows(2) {
		if pair[0] >= pair[1] {
			return Err(PmError::Unordered {
				prev: pair[0],
				next: pair[1],
			});
		}
	}
	for &ci in cis {
		if !ci.is_real() {
			return Err(PmError::NotStorable(ci));
		}
	}

	let ipm_last = cis[cis.len() - 1].pm_index();
	let mut out = PmBuf::new();
	let mut ici = 0;
	for ipm in 0..=ipm_last {
		let mut byte = if ipm < ipm_last { CHAIN } else { 0 };
		while ici < cis.len() && cis[ici].pm_index() == ipm {
			byte |= 1 << cis[ici].pm_bit_index();
			ici += 1;
		}
		out.push(byte);
	}
	Ok(out)
}

/// Tests whether a raw mask-byte run has a colorant bit set.
pub fn raw_mask_has(mask_bytes: &[u8], ci: ColorantIndex) -> bool {
	if !ci.is_real() {
		return false;
	}
	let ipm = ci.pm_index();
	if ipm >= raw_mask_len(mask_bytes) {
		return false;
	}
	mask_of(mask_bytes[ipm]) & (1 << ci.pm_bit_index()) != 0
}
