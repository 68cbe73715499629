//! Packed colors and the pure operations over them.
//!
//! A packed color is a paintmask plus its colorvalue array. The value
//! array holds, in order: one value per mask colorant bit (padding bits
//! included), the /All-separation value when present, and the opacity
//! value when present. Two colors are equal iff both sequences are
//! bytewise identical.

use ripple_types::paintmask::{self, PmBuf, PmCommand, PmSpecial};
use ripple_types::{ColorValue, ColorantIndex};
use smallvec::SmallVec;

use crate::error::ColorError;

/// Inline buffer for colorvalue arrays.
pub(crate) type CvBuf = SmallVec<[ColorValue; 8]>;

/// How a merge treats colorants present in both inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
	/// Common colorants are an error.
	Disallow,
	/// Take the common value from the first color.
	TakeFromFirst,
	/// Average, biased towards whichever value needs a halftoned cell.
	Average,
	/// Overprint merge: transparent-in-first becomes full intensity.
	MergeOverprints,
}

/// A complete color: paintmask and colorvalues, outside any cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedColor {
	pub(crate) pm: PmBuf,
	pub(crate) cv: CvBuf,
}

/// Merge a single pair of colorvalues under a merge rule.
fn merge_values(cv1: ColorValue, cv2: ColorValue, action: MergeAction) -> ColorValue {
	match action {
		MergeAction::Disallow => {
			debug_assert!(false, "Disallow handled before value merging");
			cv1
		}
		MergeAction::TakeFromFirst => cv1,
		MergeAction::Average => {
			if cv1 == ColorValue::TRANSPARENT {
				cv2
			} else if cv2 == ColorValue::TRANSPARENT {
				cv1
			} else {
				// Of the mean and the two inputs, keep whichever is nearest
				// mid intensity: a merged value must quantise to a halftoned
				// cell whenever either input does, and stay inside the input
				// range.
				let mean = ColorValue(((u32::from(cv1.0) + u32::from(cv2.0) + 1) >> 1) as u16);
				let mut best = mean;
				let mut dist = i32::from(mean.0).abs_diff(i32::from(ColorValue::HALF.0));
				for cv in [cv1, cv2] {
					let d = i32::from(cv.0).abs_diff(i32::from(ColorValue::HALF.0));
					if d < dist {
						best = cv;
						dist = d;
					}
				}
				best
			}
		}
		MergeAction::MergeOverprints => {
			if cv1 == ColorValue::TRANSPARENT && cv2 != ColorValue::TRANSPARENT {
				ColorValue::MAX
			} else {
				cv1
			}
		}
	}
}

impl PackedColor {
	/// Builds a color from sorted colorants and their values.
	///
	/// `cis` and `cvs` correspond position-for-position. The first entry may
	/// be [`ColorantIndex::ALL`], whose value then also fills the padding
	/// slots of the final mask byte. An opacity below one appends an
	/// OPACITY command and stores the opacity as the final value.
	pub fn build(
		cis: &[ColorantIndex],
		cvs: &[ColorValue],
		opacity: ColorValue,
	) -> Result<Self, ColorError> {
		if cis.len() != cvs.len() {
			return Err(ColorError::CountMismatch {
				colorants: cis.len(),
				values: cvs.len(),
			});
		}

		let (pm, pad) = paintmask::setup(cis, opacity)?;

		let all_sep = cis[0] == ColorantIndex::ALL;
		let first_real = usize::from(all_sep);

		let mut cv = CvBuf::new();
		cv.extend_from_slice(&cvs[first_real..]);
		if all_sep {
			// Padding copies plus the /All slot itself.
			for _ in 0..=pad {
				cv.push(cvs[0]);
			}
		}
		if opacity < ColorValue::ONE {
			cv.push(opacity);
		}

		debug_assert_eq!(cv.len(), paintmask::total_colorants(&pm));
		Ok(Self {
			pm,
			cv,
		})
	}

	/// Builds one of the valueless constant colors.
	pub fn build_cmd(cmd: PmCommand) -> Self {
		debug_assert!(
			matches!(cmd, PmCommand::All0 | PmCommand::All1 | PmCommand::None),
			"only the constant commands stand alone"
		);
		let mut pm = PmBuf::new();
		paintmask::setup_cmd(&mut pm, cmd);
		Self {
			pm,
			cv: CvBuf::new(),
		}
	}

	/// The paintmask bytes.
	pub fn pm(&self) -> &[u8] {
		&self.pm
	}

	/// The colorvalue array (mask values, /All, opacity, in that order).
	pub fn values(&self) -> &[ColorValue] {
		&self.cv
	}

	/// Number of stored colorvalues.
	pub fn n_values(&self) -> usize {
		self.cv.len()
	}

	/// Classifies the color.
	pub fn special(&self) -> PmSpecial {
		paintmask::special_type(&self.pm)
	}

	/// True for the ALL0/ALL1/NONE constants.
	pub fn is_command(&self) -> bool {
		self.special() != PmSpecial::Mask
	}

	/// The opacity; colors without an OPACITY command are opaque.
	pub fn opacity(&self) -> ColorValue {
		if paintmask::parse(&self.pm).opacity {
			self.cv[self.cv.len() - 1]
		} else {
			ColorValue::ONE
		}
	}

	/// The /All-separation value, when the color carries one.
	///
	/// The ALL1 and ALL0 constants report one and zero.
	pub fn allsep(&self) -> Option<ColorValue> {
		match self.special() {
			PmSpecial::White => Some(ColorValue::ONE),
			PmSpecial::Black => Some(ColorValue::ZERO),
			PmSpecial::None => None,
			PmSpecial::Mask => paintmask::colorant_offset(&self.pm, ColorantIndex::ALL)
				.map(|offset| self.cv[offset]),
		}
	}

	/// The value for a colorant, falling back to the /All value.
	pub fn colorant_value(&self, ci: ColorantIndex) -> Option<ColorValue> {
		match self.special() {
			PmSpecial::White => Some(ColorValue::ONE),
			PmSpecial::Black => Some(ColorValue::ZERO),
			PmSpecial::None => None,
			PmSpecial::Mask => {
				paintmask::colorant_offset(&self.pm, ci).map(|offset| self.cv[offset])
			}
		}
	}

	/// Iterates `(colorant, value)` pairs for the mask colorants, padding
	/// bits included; the /All and opacity values are not visited.
	pub fn pairs(&self) -> impl Iterator<Item = (ColorantIndex, ColorValue)> + '_ {
		paintmask::colorants(&self.pm).zip(self.cv.iter().copied())
	}

	/// The max-blit overprint mask bytes, when present.
	pub fn maxblt_mask(&self) -> Option<&[u8]> {
		paintmask::locate_overprints(&self.pm).map(|offset| {
			let tail = &self.pm[offset..];
			&tail[..paintmask::raw_mask_len(tail)]
		})
	}

	/// True when the colorant is flagged for max-blit overprinting.
	pub fn is_overprinted(&self, ci: ColorantIndex) -> bool {
		self.maxblt_mask().is_some_and(|mask| paintmask::raw_mask_has(mask, ci))
	}

	/// True for the NONE constant.
	pub fn is_none_color(&self) -> bool {
		self.special() == PmSpecial::None
	}

	/// True when the color paints nothing but full intensity: the ALL0
	/// constant, or a mask color whose every value is zero.
	pub fn is_black(&self) -> bool {
		match self.special() {
			PmSpecial::Black => true,
			PmSpecial::Mask => self.pairs().all(|(_, v)| v == ColorValue::ZERO),
			_ => false,
		}
	}

	/// True when the color is white everywhere it paints.
	pub fn is_white(&self) -> bool {
		match self.special() {
			PmSpecial::White => true,
			PmSpecial::Mask => self.pairs().all(|(_, v)| v == ColorValue::ONE),
			_ => false,
		}
	}

	/// The colorants present in both colors, ascending.
	pub fn common_colorants(&self, other: &PackedColor) -> SmallVec<[ColorantIndex; 8]> {
		let mine: SmallVec<[ColorantIndex; 8]> = self.pairs().map(|(c, _)| c).collect();
		other.pairs().map(|(c, _)| c).filter(|c| mine.contains(c)).collect()
	}

	/// The colorants present in `self` but not in `other`, ascending.
	pub fn extra_colorants(&self, other: &PackedColor) -> SmallVec<[ColorantIndex; 8]> {
		let theirs: SmallVec<[ColorantIndex; 8]> = other.pairs().map(|(c, _)| c).collect();
		self.pairs().map(|(c, _)| c).filter(|c| !theirs.contains(c)).collect()
	}

	/// Rebuilds with the value of an existing colorant replaced.
	pub fn replace_colorant_value(
		&self,
		ci: ColorantIndex,
		value: ColorValue,
	) -> Result<PackedColor, ColorError> {
		if self.is_command() {
			return Err(ColorError::CommandColor("ALL0/ALL1/NONE"));
		}
		let mut out = self.clone();
		let Some(offset) = paintmask::colorant_offset(&out.pm, ci) else {
			return Err(ColorError::WouldEmpty(ci));
		};
		out.cv[offset] = value;
		Ok(out)
	}

	/// Rebuilds with a colorant present at the given value, inserting it
	/// when absent.
	pub fn set_colorant_value(
		&self,
		ci: ColorantIndex,
		value: ColorValue,
	) -> Result<PackedColor, ColorError> {
		if paintmask::colorant_offset(&self.pm, ci).is_some()
			&& paintmask::colorants(&self.pm).any(|c| c == ci)
		{
			return self.replace_colorant_value(ci, value);
		}
		let single = PackedColor::build(&[ci], &[value], ColorValue::ONE)?;
		PackedColor::merge(self, &single, MergeAction::TakeFromFirst)
	}

	/// Largest per-channel difference against another color with the same
	/// colorant set.
	pub fn max_difference(&self, other: &PackedColor) -> ColorValue {
		debug_assert!(paintmask::equal(&self.pm, &other.pm), "colorant sets differ");
		let mut max = 0u16;
		for (a, b) in self.cv.iter().zip(&other.cv) {
			max = max.max(a.0.abs_diff(b.0));
		}
		ColorValue(max)
	}

	/// Rebuilds this color without `ci`.
	///
	/// The value slot is dropped with the mask bit; a max-blit tail loses
	/// the bit too and disappears entirely when it empties.
	pub fn remove_colorant(&self, ci: ColorantIndex) -> Result<PackedColor, ColorError> {
		if self.is_command() {
			return Err(ColorError::CommandColor("ALL0/ALL1/NONE"));
		}

		let has_allsep = paintmask::parse(&self.pm).allsep;
		let allsep = if has_allsep { self.allsep() } else { None };
		let opacity = self.opacity();

		// Padding colorants pass straight through as explicit entries with
		// the /All value; setup() then reproduces the same mask bytes.
		let mut cis: SmallVec<[ColorantIndex; 8]> = SmallVec::new();
		let mut cvs: CvBuf = CvBuf::new();
		if let Some(all) = allsep {
			cis.push(ColorantIndex::ALL);
			cvs.push(all);
		}
		for (c, v) in self.pairs() {
			if c != ci {
				cis.push(c);
				cvs.push(v);
			}
		}
		if cis.is_empty() || (allsep.is_some() && cis.len() == 1) {
			return Err(ColorError::WouldEmpty(ci));
		}

		let mut out = PackedColor::build(&cis, &cvs, opacity)?;

		if let Some(mask) = self.maxblt_mask() {
			let remaining: SmallVec<[ColorantIndex; 8]> =
				paintmask::raw_mask_colorants(mask).filter(|&c| c != ci).collect();
			if !remaining.is_empty() {
				out.attach_maxblt_of(&remaining)?;
			}
		}
		Ok(out)
	}

	/// Merges two colors into a new one; colorant union, values per action.
	///
	/// Max-blit masks are not merged here: the first color's mask is copied,
	/// matching the split of duties with
	/// [`combine_overprints`](crate::ColorStore::combine_overprints).
	pub fn merge(
		a: &PackedColor,
		b: &PackedColor,
		action: MergeAction,
	) -> Result<PackedColor, ColorError> {
		if a.is_command() || b.is_command() {
			return Err(ColorError::CommandColor("ALL0/ALL1/NONE"));
		}

		let a_pairs: SmallVec<[(ColorantIndex, ColorValue); 8]> = a.pairs().collect();
		let b_pairs: SmallVec<[(ColorantIndex, ColorValue); 8]> = b.pairs().collect();

		let mut cis: SmallVec<[ColorantIndex; 8]> = SmallVec::new();
		let mut cvs: CvBuf = CvBuf::new();

		// Commands merge first: /All from either side, value per action.
		let allsep = match (a.allsep(), b.allsep()) {
			(Some(va), Some(vb)) => {
				if action == MergeAction::Disallow {
					return Err(ColorError::CommonColorant(ColorantIndex::ALL));
				}
				Some(merge_values(va, vb, action))
			}
			(Some(va), None) => Some(va),
			(None, Some(vb)) => Some(vb),
			(None, None) => None,
		};
		if let Some(all) = allsep {
			cis.push(ColorantIndex::ALL);
			cvs.push(all);
		}

		let mut ia = 0;
		let mut ib = 0;
		while ia < a_pairs.len() || ib < b_pairs.len() {
			let next = match (a_pairs.get(ia), b_pairs.get(ib)) {
				(Some(&(ca, va)), Some(&(cb, vb))) => {
					if ca == cb {
						if action == MergeAction::Disallow {
							return Err(ColorError::CommonColorant(ca));
						}
						ia += 1;
						ib += 1;
						(ca, merge_values(va, vb, action))
					} else if ca < cb {
						ia += 1;
						(ca, va)
					} else {
						ib += 1;
						(cb, vb)
					}
				}
				(Some(&(ca, va)), None) => {
					ia += 1;
					(ca, va)
				}
				(None, Some(&(cb, vb))) => {
					ib += 1;
					(cb, vb)
				}
				(None, None) => unreachable!(),
			};
			cis.push(next.0);
			cvs.push(next.1);
		}

		let opacity = match (
			paintmask::parse(&a.pm).opacity,
			paintmask::parse(&b.pm).opacity,
		) {
			(true, true) => merge_values(a.opacity(), b.opacity(), action),
			(true, false) => a.opacity(),
			(false, true) => b.opacity(),
			(false, false) => ColorValue::ONE,
		};

		let mut out = PackedColor::build(&cis, &cvs, opacity)?;
		if let Some(mask) = a.maxblt_mask() {
			let kept: SmallVec<[ColorantIndex; 8]> =
				paintmask::raw_mask_colorants(mask).collect();
			out.attach_maxblt_of(&kept)?;
		}
		Ok(out)
	}

	/// Weighted interpolation across colors with identical paintmasks.
	///
	/// Weights must sum to approximately one; the first source is the shape
	/// template.
	pub fn interpolate(
		weights: &[f32],
		srcs: &[&PackedColor],
	) -> Result<PackedColor, ColorError> {
		debug_assert_eq!(weights.len(), srcs.len());
		debug_assert!(
			(weights.iter().sum::<f32>() - 1.0).abs() < 1e-3,
			"interpolation weights must sum to one"
		);
		let template = srcs[0];
		if template.is_command() {
			return Err(ColorError::CommandColor("ALL0/ALL1/NONE"));
		}
		for src in &srcs[1..] {
			if !paintmask::equal(&template.pm, &src.pm) {
				return Err(ColorError::ColorantMismatch);
			}
		}

		let mut out = template.clone();
		for (slot, value) in out.cv.iter_mut().enumerate() {
			let mut acc = 0f32;
			for (&w, src) in weights.iter().zip(srcs) {
				acc += w * f32::from(src.cv[slot].0);
			}
			*value = ColorValue(acc.round().clamp(0.0, f32::from(ColorValue::MAX.0)) as u16);
		}
		Ok(out)
	}

	/// Appends a max-blit tail flagging the given colorants.
	pub(crate) fn attach_maxblt_of(&mut self, cis: &[ColorantIndex]) -> Result<(), ColorError> {
		debug_assert!(self.maxblt_mask().is_none(), "color already has a max-blit tail");
		let raw = paintmask::setup_raw_mask(cis)?;
		let last = self.pm.len() - 1;
		self.pm[last] |= paintmask::CHAIN;
		paintmask::setup_cmd(&mut self.pm, PmCommand::OpMaxblt);
		self.pm.extend_from_slice(&raw);
		Ok(())
	}

	/// Drops the max-blit tail, if any.
	pub(crate) fn clear_maxblt(&mut self) {
		if let Some(offset) = paintmask::locate_overprints(&self.pm) {
			// The command escape sits two bytes before the tail; unchain
			// the byte before it.
			self.pm.truncate(offset - 2);
			let last = self.pm.len() - 1;
			self.pm[last] &= !paintmask::CHAIN;
		}
	}

	/// Rebuilds without channels whose value is the transparent sentinel.
	pub fn remove_overprinted(&self) -> Result<PackedColor, ColorError> {
		if self.is_command() {
			return Err(ColorError::CommandColor("ALL0/ALL1/NONE"));
		}
		let mut out = self.clone();
		let overprinted: SmallVec<[ColorantIndex; 8]> = self
			.pairs()
			.filter(|&(_, v)| v == ColorValue::TRANSPARENT)
			.map(|(c, _)| c)
			.collect();
		for ci in overprinted {
			out = out.remove_colorant(ci)?;
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn color(cis: &[i32], unit_values: &[f32]) -> PackedColor {
		let cis: Vec<ColorantIndex> = cis.iter().map(|&c| ColorantIndex(c)).collect();
		let cvs: Vec<ColorValue> = unit_values.iter().map(|&v| ColorValue::from_unit(v)).collect();
		PackedColor::build(&cis, &cvs, ColorValue::ONE).unwrap()
	}

	#[test]
	fn test_build_values_in_mask_order() {
		let c = color(&[0, 4, 7], &[0.1, 0.2, 0.3]);
		let pairs: Vec<_> = c.pairs().collect();
		assert_eq!(pairs.len(), 3);
		assert_eq!(pairs[0].0, ColorantIndex(0));
		assert_eq!(pairs[2].0, ColorantIndex(7));
		assert_eq!(c.n_values(), 3);
		assert_eq!(c.opacity(), ColorValue::ONE);
	}

	#[test]
	fn test_opacity_is_last_value() {
		let cis = [ColorantIndex(1)];
		let cvs = [ColorValue::from_unit(0.5)];
		let c = PackedColor::build(&cis, &cvs, ColorValue::from_unit(0.25)).unwrap();
		assert_eq!(c.n_values(), 2);
		assert_eq!(c.opacity(), ColorValue::from_unit(0.25));
		assert_eq!(
			c.colorant_value(ColorantIndex::ALPHA),
			Some(ColorValue::from_unit(0.25))
		);
	}

	#[test]
	fn test_merge_union_take_from_first() {
		let a = color(&[0, 2], &[0.1, 0.2]);
		let b = color(&[2, 5], &[0.9, 0.5]);
		let m = PackedColor::merge(&a, &b, MergeAction::TakeFromFirst).unwrap();
		let pairs: Vec<_> = m.pairs().collect();
		assert_eq!(pairs.len(), 3);
		assert_eq!(pairs[0], (ColorantIndex(0), ColorValue::from_unit(0.1)));
		assert_eq!(pairs[1], (ColorantIndex(2), ColorValue::from_unit(0.2)));
		assert_eq!(pairs[2], (ColorantIndex(5), ColorValue::from_unit(0.5)));
	}

	#[test]
	fn test_merge_disallow_rejects_common() {
		let a = color(&[0, 2], &[0.1, 0.2]);
		let b = color(&[2], &[0.9]);
		assert!(matches!(
			PackedColor::merge(&a, &b, MergeAction::Disallow),
			Err(ColorError::CommonColorant(ColorantIndex(2)))
		));
	}

	#[test]
	fn test_merge_average_stays_in_range() {
		let a = color(&[0], &[0.2]);
		let b = color(&[0], &[0.8]);
		let m = PackedColor::merge(&a, &b, MergeAction::Average).unwrap();
		let (_, v) = m.pairs().next().unwrap();
		assert!(v >= ColorValue::from_unit(0.2) && v <= ColorValue::from_unit(0.8));
	}

	#[test]
	fn test_merge_average_identity() {
		let a = color(&[3], &[0.5]);
		let b = color(&[3], &[0.5]);
		let m = PackedColor::merge(&a, &b, MergeAction::Average).unwrap();
		assert_eq!(m.pairs().next().unwrap().1, ColorValue::from_unit(0.5));
	}

	#[test]
	fn test_remove_colorant_left_inverse() {
		let with = color(&[0, 3, 6], &[0.1, 0.5, 0.9]);
		let without = with.remove_colorant(ColorantIndex(3)).unwrap();
		let direct = color(&[0, 6], &[0.1, 0.9]);
		assert_eq!(without, direct);
	}

	#[test]
	fn test_remove_last_colorant_fails() {
		let single = color(&[2], &[0.5]);
		assert!(matches!(
			single.remove_colorant(ColorantIndex(2)),
			Err(ColorError::WouldEmpty(_))
		));
	}

	#[test]
	fn test_interpolate_weighted_sum() {
		let a = color(&[0, 1], &[0.0, 1.0]);
		let b = color(&[0, 1], &[1.0, 0.0]);
		let m = PackedColor::interpolate(&[0.5, 0.5], &[&a, &b]).unwrap();
		let pairs: Vec<_> = m.pairs().collect();
		let half = (ColorValue::ONE.0 + 1) / 2;
		assert!(pairs[0].1.0.abs_diff(half) <= 1);
		assert!(pairs[1].1.0.abs_diff(half) <= 1);
	}

	#[test]
	fn test_interpolate_rejects_mismatch() {
		let a = color(&[0, 1], &[0.0, 1.0]);
		let b = color(&[0, 2], &[1.0, 0.0]);
		assert!(matches!(
			PackedColor::interpolate(&[0.5, 0.5], &[&a, &b]),
			Err(ColorError::ColorantMismatch)
		));
	}

	#[test]
	fn test_maxblt_attach_and_clear() {
		let mut c = color(&[0, 3, 6], &[0.1, 0.5, 0.9]);
		let plain = c.clone();
		c.attach_maxblt_of(&[ColorantIndex(3)]).unwrap();
		assert!(c.is_overprinted(ColorantIndex(3)));
		assert!(!c.is_overprinted(ColorantIndex(0)));
		c.clear_maxblt();
		assert_eq!(c, plain);
	}

	#[test]
	fn test_remove_overprinted_strips_transparent() {
		let cis = [ColorantIndex(0), ColorantIndex(1)];
		let cvs = [ColorValue::TRANSPARENT, ColorValue::from_unit(0.5)];
		let c = PackedColor::build(&cis, &cvs, ColorValue::ONE).unwrap();
		let reduced = c.remove_overprinted().unwrap();
		let pairs: Vec<_> = reduced.pairs().collect();
		assert_eq!(pairs.len(), 1);
		assert_eq!(pairs[0].0, ColorantIndex(1));
	}

	#[test]
	fn test_predicates() {
		assert!(PackedColor::build_cmd(PmCommand::All0).is_black());
		assert!(PackedColor::build_cmd(PmCommand::All1).is_white());
		assert!(PackedColor::build_cmd(PmCommand::None).is_none_color());

		let black_mask = color(&[0, 3], &[0.0, 0.0]);
		assert!(black_mask.is_black());
		assert!(!black_mask.is_white());

		let white_mask = color(&[0, 3], &[1.0, 1.0]);
		assert!(white_mask.is_white());

		let mixed = color(&[0, 3], &[0.0, 1.0]);
		assert!(!mixed.is_black() && !mixed.is_white());
	}

	#[test]
	fn test_colorant_set_operations() {
		let a = color(&[0, 2, 5], &[0.1, 0.2, 0.3]);
		let b = color(&[2, 5, 9], &[0.4, 0.5, 0.6]);

		let common: Vec<i32> = a.common_colorants(&b).iter().map(|c| c.0).collect();
		assert_eq!(common, vec![2, 5]);
		let extra: Vec<i32> = a.extra_colorants(&b).iter().map(|c| c.0).collect();
		assert_eq!(extra, vec![0]);
	}

	#[test]
	fn test_replace_and_set_colorant() {
		let base = color(&[0, 2], &[0.1, 0.2]);

		let replaced = base.replace_colorant_value(ColorantIndex(2), ColorValue::HALF).unwrap();
		assert_eq!(replaced.colorant_value(ColorantIndex(2)), Some(ColorValue::HALF));
		assert_eq!(replaced.colorant_value(ColorantIndex(0)), base.colorant_value(ColorantIndex(0)));

		// Setting an absent colorant inserts it in order.
		let inserted = base.set_colorant_value(ColorantIndex(1), ColorValue::HALF).unwrap();
		let cis: Vec<i32> = inserted.pairs().map(|(c, _)| c.0).collect();
		assert_eq!(cis, vec![0, 1, 2]);
		assert_eq!(inserted.colorant_value(ColorantIndex(1)), Some(ColorValue::HALF));
	}

	#[test]
	fn test_command_colors() {
		let black = PackedColor::build_cmd(PmCommand::All0);
		assert!(black.is_command());
		assert_eq!(black.allsep(), Some(ColorValue::ZERO));
		assert_eq!(black.colorant_value(ColorantIndex(5)), Some(ColorValue::ZERO));
		assert_eq!(black.n_values(), 0);

		let white = PackedColor::build_cmd(PmCommand::All1);
		assert_eq!(white.colorant_value(ColorantIndex(5)), Some(ColorValue::ONE));

		let none = PackedColor::build_cmd(PmCommand::None);
		assert_eq!(none.colorant_value(ColorantIndex(5)), None);
	}
}
