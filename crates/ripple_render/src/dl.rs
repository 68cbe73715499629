//! Display-list boundary types.
//!
//! The back-end never builds display lists; the interpreter hands over a
//! banded, depth-ordered object sequence together with the page geometry
//! and raster style. These types are the minimum contract the renderer
//! needs: bands of drawable objects after an erase head, a region map
//! flagging backdrop (transparency) regions, and per-colorant raster
//! style information for output marshalling.

use ripple_color::{ColorStore, DlColor};
use ripple_store::{ImageStoreSet, StoreKey};
use ripple_types::{ColorantIndex, IBBox};
use serde::Serialize;

/// Page and band geometry in device space.
#[derive(Debug, Clone)]
pub struct PageGeometry {
	/// Page width in pixels.
	pub width: usize,
	/// Page height in lines.
	pub page_height: usize,
	/// Lines per band (the last band may be shorter).
	pub band_height: usize,
	/// Bytes per output line per channel.
	pub line_bytes: usize,
}

impl PageGeometry {
	/// Number of bands covering the page.
	pub fn band_count(&self) -> usize {
		self.page_height.div_ceil(self.band_height)
	}

	/// First line and height of a band.
	pub fn band_extent(&self, band: usize) -> (usize, usize) {
		let first = band * self.band_height;
		let height = self.band_height.min(self.page_height - first);
		(first, height)
	}
}

/// Per-colorant raster-style data, marshalled to the page buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorantInfo {
	/// Colorant index within the raster style.
	pub index: i32,
	/// Ink name.
	pub name: String,
	/// Output channel the colorant renders into.
	pub channel: usize,
	/// Screen-preview approximation.
	pub srgb: [f32; 3],
	/// Process-equivalent values.
	pub cmyk: [f32; 4],
	/// Special-handling code (opaque to the back-end).
	pub special_handling: i32,
	/// Neutral density used by separation omission heuristics.
	pub neutral_density: f32,
}

/// The raster style: which colorants exist and how frames interleave.
#[derive(Debug, Clone)]
pub struct RasterStyle {
	/// The colorants, in channel order.
	pub colorants: Vec<ColorantInfo>,
	/// Number of separations (sheets) the page produces.
	pub num_separations: usize,
	/// Colorants rendered per frame; band-interleaved styles render one
	/// frame per colorant, pixel-interleaved styles render them together.
	pub colorants_per_frame: usize,
}

impl RasterStyle {
	/// A simple composite style: all colorants in one frame, one sheet.
	pub fn composite(colorants: Vec<ColorantInfo>) -> Self {
		let per_frame = colorants.len().max(1);
		Self {
			colorants,
			num_separations: 1,
			colorants_per_frame: per_frame,
		}
	}

	/// Frames per sheet for this interleaving.
	pub fn frame_count(&self) -> usize {
		self.colorants.len().div_ceil(self.colorants_per_frame.max(1)).max(1)
	}

	/// The colorant indexes of one frame.
	pub fn frame_colorants(&self, frame: usize) -> &[ColorantInfo] {
		let per = self.colorants_per_frame.max(1);
		let start = frame * per;
		let end = (start + per).min(self.colorants.len());
		&self.colorants[start..end]
	}

	/// Looks a colorant up by index.
	pub fn colorant(&self, ci: ColorantIndex) -> Option<&ColorantInfo> {
		self.colorants.iter().find(|c| c.index == ci.0)
	}
}

/// What a display-list object draws.
#[derive(Debug)]
pub enum DlObjectKind {
	/// A flat fill of the object's color.
	Fill,
	/// Sampled image data held in an image store, one plane per colorant
	/// in raster-style channel order.
	Image {
		/// The backing block store.
		store: StoreKey,
	},
}

/// One drawable object on a band.
#[derive(Debug)]
pub struct DlObject {
	/// Device-space bounds.
	pub bbox: IBBox,
	/// The interned color, one reference owned by the display list.
	pub color: DlColor,
	/// Optional clip rectangle applied around the object.
	pub clip: Option<IBBox>,
	/// What to draw.
	pub kind: DlObjectKind,
}

/// The objects of one band, in paint order after the erase.
#[derive(Debug, Default)]
pub struct DlBand {
	/// Depth-ordered objects.
	pub objects: Vec<DlObject>,
}

/// Marks which bands contain backdrop (transparency) regions.
#[derive(Debug, Clone, Default)]
pub struct RegionMap {
	/// Band indexes with at least one backdrop region.
	pub backdrop_bands: Vec<usize>,
}

impl RegionMap {
	/// True when any backdrop region exists.
	pub fn any_backdrop(&self) -> bool {
		!self.backdrop_bands.is_empty()
	}
}

/// A complete display list as handed off by the interpreter.
#[derive(Debug)]
pub struct DisplayList {
	/// One entry per band.
	pub bands: Vec<DlBand>,
	/// The erase value painted before any object.
	pub erase_value: u8,
	/// The final render pass must read the band back from the page
	/// buffer instead of erasing (set after compositing or partial
	/// paint).
	pub erase_readback_required: bool,
	/// Backdrop regions for transparency handling.
	pub region_map: RegionMap,
}

impl DisplayList {
	/// An empty display list covering `bands` bands.
	pub fn empty(bands: usize) -> Self {
		Self {
			bands: (0..bands).map(|_| DlBand::default()).collect(),
			erase_value: 0,
			erase_readback_required: false,
			region_map: RegionMap::default(),
		}
	}

	/// The colorants actually painted by any object, for separation
	/// omission. `None` when an /All color paints every separation.
	pub fn painted_colorants(&self, colors: &ColorStore) -> Option<Vec<ColorantIndex>> {
		let mut seen: Vec<ColorantIndex> = Vec::new();
		for band in &self.bands {
			for object in &band.objects {
				if let Ok(packed) = colors.get(&object.color) {
					if packed.allsep().is_some() {
						return None;
					}
					for (ci, _) in packed.pairs() {
						if !seen.contains(&ci) {
							seen.push(ci);
						}
					}
				}
			}
		}
		seen.sort_unstable();
		Some(seen)
	}
}

/// Everything the back-end needs for one page, bundled at handoff.
#[derive(Debug)]
pub struct RenderPage {
	/// Device geometry.
	pub geometry: PageGeometry,
	/// Raster style and colorant set.
	pub raster_style: RasterStyle,
	/// The display list.
	pub dl: DisplayList,
	/// The page's color store (read-only during rendering).
	pub colors: ColorStore,
	/// The page's image stores.
	pub stores: ImageStoreSet,
	/// Monotonically increasing display-list generation number.
	pub erase_nr: u64,
	/// Page number for eventing.
	pub page_number: i32,
	/// Job number for page-buffer parameters.
	pub job_number: i32,
}
