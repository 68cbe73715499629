//! Output surfaces.
//!
//! A surface is the interface to an output blitter, parameterised by
//! color depth and screening strategy. The pipeline drives it through
//! begin/end pairs at render, sheet, frame and band scope; the band hook
//! may ask the renderer to sub-divide the band, carrying an opaque cookie
//! into the sub-band renders.

use crate::error::RipError;

/// Scope identifiers handed to the begin/end hooks.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceScope {
	/// Sheet index within the pass.
	pub sheet: usize,
	/// Frame index within the sheet.
	pub frame: usize,
}

/// What the surface wants done with the band about to be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandAction {
	/// Render the band as one piece.
	Continue,
	/// Split the band horizontally and render the halves.
	SplitY {
		/// Carried into the sub-band renders.
		cookie: u64,
	},
	/// Split the band vertically and render the halves.
	SplitX {
		/// Carried into the sub-band renders.
		cookie: u64,
	},
}

/// The role a surface plays for a colorant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceVariant {
	/// Final device output.
	Output,
	/// The mask raster handed to a modular halftone.
	MhtMask,
	/// Contone input for a modular halftone, full-range.
	MhtContoneFf,
	/// Contone input with 0xFF00 scaling (16-bit modules).
	MhtContoneFf00,
}

/// An output blitter family.
pub trait Surface: Send + Sync {
	/// Which role this surface serves.
	fn variant(&self) -> SurfaceVariant;

	/// Bits per packing unit for band addressing.
	fn packing_unit_bits(&self) -> usize {
		8
	}

	/// True when output has been screened to halftone bit depth.
	fn screened(&self) -> bool;

	/// Pass-level begin; called once per render pass.
	fn render_begin(&self) -> Result<(), RipError> {
		Ok(())
	}

	/// Pass-level end; `ok` reports whether the pass succeeded.
	fn render_end(&self, ok: bool) -> Result<(), RipError> {
		let _ = ok;
		Ok(())
	}

	/// Sheet-level begin, called from the sheet-start task.
	fn sheet_begin(&self, scope: SurfaceScope) -> Result<(), RipError> {
		let _ = scope;
		Ok(())
	}

	/// Sheet-level end, called after output completes.
	fn sheet_end(&self, scope: SurfaceScope, ok: bool) -> Result<(), RipError> {
		let _ = (scope, ok);
		Ok(())
	}

	/// Frame-level begin.
	fn frame_begin(&self, scope: SurfaceScope) -> Result<(), RipError> {
		let _ = scope;
		Ok(())
	}

	/// Frame-level end.
	fn frame_end(&self, scope: SurfaceScope) -> Result<(), RipError> {
		let _ = scope;
		Ok(())
	}

	/// Band localiser: called before each band render; may request a
	/// split. Sub-divided bands call this again with the cookie.
	fn band_localiser(&self, band: usize, cookie: Option<u64>) -> BandAction {
		let _ = (band, cookie);
		BandAction::Continue
	}
}

/// The default 8-bit contone output surface.
#[derive(Debug, Default)]
pub struct ContoneSurface;

impl Surface for ContoneSurface {
	fn variant(&self) -> SurfaceVariant {
		SurfaceVariant::Output
	}

	fn screened(&self) -> bool {
		false
	}
}

/// A 1-bit mask surface used for modular halftone masks.
#[derive(Debug, Default)]
pub struct MaskSurface;

impl Surface for MaskSurface {
	fn variant(&self) -> SurfaceVariant {
		SurfaceVariant::MhtMask
	}

	fn packing_unit_bits(&self) -> usize {
		1
	}

	fn screened(&self) -> bool {
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_hooks_are_noops() {
		let surface = ContoneSurface;
		assert!(surface.render_begin().is_ok());
		assert!(
			surface
				.sheet_begin(SurfaceScope {
					sheet: 0,
					frame: 0,
				})
				.is_ok()
		);
		assert_eq!(surface.band_localiser(3, None), BandAction::Continue);
		assert!(!surface.screened());
		assert!(MaskSurface.screened());
	}
}
