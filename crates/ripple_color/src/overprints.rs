//! Max-blit overprint masks.
//!
//! An overprinted channel is not written flat: the renderer max-blits it
//! against the raster underneath. Which channels that applies to is a
//! second mask chained after the color's commands. Because interned colors
//! are immutable, every mutation here interns a derived color and returns
//! a fresh handle.

use ripple_types::paintmask;
use ripple_types::ColorantIndex;
use smallvec::SmallVec;

use crate::cache::{ColorStore, DlColor};
use crate::error::ColorError;

/// How a caller names the overprinted set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverprintsType {
	/// The listed colorants are overprinted.
	Overprinted,
	/// The listed colorants are knocked out; the rest are overprinted.
	Knockedout,
}

/// Set operation applied by [`ColorStore::combine_overprints`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineOp {
	/// Overprinted set grows to the union.
	Union,
	/// Overprinted set shrinks to the intersection.
	Intersect,
	/// Overprinted set is replaced outright.
	Replace,
}

impl ColorStore {
	/// Installs or updates the max-blit mask of a color.
	///
	/// `cis` must be sorted ascending. With [`OverprintsType::Knockedout`]
	/// the mask covers the color's other colorants instead.
	pub fn apply_overprints(
		&mut self,
		dlc: &DlColor,
		ty: OverprintsType,
		cis: &[ColorantIndex],
	) -> Result<DlColor, ColorError> {
		let packed = self.get(dlc)?;
		if packed.is_command() {
			return Err(ColorError::CommandColor("ALL0/ALL1/NONE"));
		}

		let set: SmallVec<[ColorantIndex; 8]> = match ty {
			OverprintsType::Overprinted => cis.iter().copied().collect(),
			OverprintsType::Knockedout => {
				packed.pairs().map(|(c, _)| c).filter(|c| !cis.contains(c)).collect()
			}
		};

		let mut out = packed.clone();
		out.clear_maxblt();
		if !set.is_empty() {
			out.attach_maxblt_of(&set)?;
		}
		self.intern(&out)
	}

	/// Combines a color's max-blit mask with another mask.
	///
	/// `src` of `None` stands for the universal set and clears the mask
	/// (everything overprinted means nothing needs flagging).
	pub fn combine_overprints(
		&mut self,
		dlc: &DlColor,
		src: Option<&DlColor>,
		op: CombineOp,
	) -> Result<DlColor, ColorError> {
		let src_set: Option<SmallVec<[ColorantIndex; 8]>> = match src {
			None => None,
			Some(other) => Some(match self.get(other)?.maxblt_mask() {
				Some(mask) => paintmask::raw_mask_colorants(mask).collect(),
				None => SmallVec::new(),
			}),
		};

		let packed = self.get(dlc)?;
		if packed.is_command() {
			return Err(ColorError::CommandColor("ALL0/ALL1/NONE"));
		}

		let current: SmallVec<[ColorantIndex; 8]> = match packed.maxblt_mask() {
			Some(mask) => paintmask::raw_mask_colorants(mask).collect(),
			None => SmallVec::new(),
		};

		let combined: SmallVec<[ColorantIndex; 8]> = match (src_set, op) {
			(None, _) => SmallVec::new(),
			(Some(set), CombineOp::Replace) => set,
			(Some(set), CombineOp::Union) => {
				let mut all: SmallVec<[ColorantIndex; 8]> = current.clone();
				for ci in set {
					if !all.contains(&ci) {
						all.push(ci);
					}
				}
				all.sort_unstable();
				all
			}
			(Some(set), CombineOp::Intersect) => {
				current.iter().copied().filter(|ci| set.contains(ci)).collect()
			}
		};

		let mut out = packed.clone();
		out.clear_maxblt();
		if !combined.is_empty() {
			out.attach_maxblt_of(&combined)?;
		}
		self.intern(&out)
	}

	/// Drops the max-blit mask entirely.
	pub fn clear_overprints(&mut self, dlc: &DlColor) -> Result<DlColor, ColorError> {
		let mut out = self.get(dlc)?.clone();
		out.clear_maxblt();
		self.intern(&out)
	}

	/// True when the color max-blits the given colorant.
	pub fn colorant_is_overprinted(
		&self,
		dlc: &DlColor,
		ci: ColorantIndex,
	) -> Result<bool, ColorError> {
		Ok(self.get(dlc)?.is_overprinted(ci))
	}

	/// True when the color carries any max-blit mask at all.
	pub fn doing_maxblt_overprints(&self, dlc: &DlColor) -> Result<bool, ColorError> {
		Ok(self.get(dlc)?.maxblt_mask().is_some())
	}
}
