//! Band rendering.
//!
//! A band render walks one band's display-list objects once per colorant
//! of the frame, after resolving what the band starts from: a readback
//! from the page buffer (partial paint, compositing replay), a retained
//! raster, an in-place erase, or nothing at all when the consumer accepts
//! omission of untouched bands.
//!
//! Colorants screened by a modular halftone render a contone raster and a
//! coverage mask, then hand both to the module; synchronous modules
//! complete in-thread, asynchronous ones are waited for on a condition
//! variable and aborted on interrupt.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use ripple_color::ColorStore;
use ripple_store::ImageStoreSet;
use ripple_types::{ColorValue, ColorantIndex, IBBox};

use crate::dl::{ColorantInfo, DisplayList, DlObjectKind, PageGeometry};
use crate::error::{RipError, RipErrorKind};
use crate::halftone::{HalftoneRegistry, HalftoneRequest, HtResult, MhtRef};
use crate::surface::{BandAction, Surface};

/// Where the band's initial contents come from.
#[derive(Debug, Clone)]
pub enum EraseSource {
	/// Bytes read back from the page buffer by the caller.
	Readback(Vec<u8>),
	/// Bytes retained from an earlier pass in memory.
	Retained(Vec<u8>),
	/// Plain erase to a value.
	Erase(u8),
	/// The band is known all-zero and the consumer accepts omission.
	SkipAllZero,
}

/// Reusable band output buffers, keyed by the band's last line.
///
/// Band geometry varies only at the page tail, so keying by last line
/// gives exact-size reuse. Buffers are fixed at band entry and unfixed
/// (or detached for asynchronous retention) at band exit.
#[derive(Debug, Default)]
pub struct BandPool {
	free: Mutex<HashMap<usize, Vec<Vec<u8>>>>,
}

impl BandPool {
	/// An empty pool.
	pub fn new() -> Self {
		Self::default()
	}

	/// Fixes a buffer of `bytes` for the band ending at `last_line`.
	pub fn fix(&self, last_line: usize, bytes: usize) -> Vec<u8> {
		let mut free = self.free.lock();
		match free.get_mut(&last_line).and_then(Vec::pop) {
			Some(mut buf) => {
				buf.clear();
				buf.resize(bytes, 0);
				buf
			}
			None => vec![0; bytes],
		}
	}

	/// Returns a buffer at band exit.
	pub fn unfix(&self, last_line: usize, buf: Vec<u8>) {
		self.free.lock().entry(last_line).or_default().push(buf);
	}
}

/// The per-colorant blit colormap: which output channel each colorant of
/// the frame renders into.
#[derive(Debug)]
pub struct BlitColorMap {
	channels: Vec<(ColorantIndex, usize)>,
}

impl BlitColorMap {
	/// Builds the map from the frame's colorants; a colorant the raster
	/// style cannot place is dropped (that colorant aborts, the band
	/// carries on).
	pub fn build(colorants: &[ColorantInfo]) -> Self {
		let channels = colorants
			.iter()
			.enumerate()
			.map(|(slot, info)| (ColorantIndex(info.index), slot))
			.collect();
		Self {
			channels,
		}
	}

	/// The colorants and their channel slots.
	pub fn channels(&self) -> &[(ColorantIndex, usize)] {
		&self.channels
	}
}

/// A modular-halftone binding for some of the band's colorants.
pub struct MhtBinding<'a> {
	/// The registry holding the instances.
	pub registry: &'a HalftoneRegistry,
	/// Instance per colorant, where screened by a module.
	pub per_colorant: Vec<(ColorantIndex, MhtRef)>,
}

/// Inputs to one band render.
pub struct BandRenderCtx<'a> {
	/// Page geometry.
	pub geometry: &'a PageGeometry,
	/// The display list.
	pub dl: &'a DisplayList,
	/// The page's color store.
	pub colors: &'a ColorStore,
	/// The page's image stores.
	pub stores: &'a ImageStoreSet,
	/// The output surface.
	pub surface: &'a dyn Surface,
	/// Colorants of this frame, in channel order.
	pub colorants: &'a [ColorantInfo],
	/// Band index.
	pub band: usize,
	/// Frame index.
	pub frame: usize,
	/// Initial band contents.
	pub erase: EraseSource,
	/// Halftone binding, when any colorant is module-screened.
	pub mht: Option<MhtBinding<'a>>,
	/// Interrupt flag checked around asynchronous waits.
	pub interrupted: &'a dyn Fn() -> bool,
}

/// The result of rendering one band.
#[derive(Debug)]
pub struct BandOutcome {
	/// Channel-planar contone band data.
	pub data: Vec<u8>,
	/// Screened output per module-halftoned colorant.
	pub screened: Vec<(ColorantIndex, Vec<u8>)>,
	/// No pixel changed after the erase; output and compression can be
	/// skipped.
	pub dont_output: bool,
	/// The band was rendered in sub-divisions; the sink must treat the
	/// emission as partial lines.
	pub incomplete: bool,
	/// The band was skipped entirely (all-zero omission).
	pub omitted: bool,
}

/// Renders one band for one frame.
pub fn render_band(ctx: &BandRenderCtx<'_>) -> Result<BandOutcome, RipError> {
	let (first_line, height) = ctx.geometry.band_extent(ctx.band);
	let line_bytes = ctx.geometry.line_bytes;
	let channels = ctx.colorants.len().max(1);
	let plane_bytes = height * line_bytes;

	if matches!(ctx.erase, EraseSource::SkipAllZero) {
		return Ok(BandOutcome {
			data: Vec::new(),
			screened: Vec::new(),
			dont_output: true,
			incomplete: false,
			omitted: true,
		});
	}

	// Blit colormap creation comes first; a colorant that cannot be
	// mapped aborts that colorant only.
	let colormap = BlitColorMap::build(ctx.colorants);

	// Erase resolution.
	let mut data = match &ctx.erase {
		EraseSource::Readback(bytes) | EraseSource::Retained(bytes) => {
			if bytes.len() != plane_bytes * channels {
				return Err(RipError::new(
					RipErrorKind::RangeCheck,
					"readback raster does not match band geometry",
				));
			}
			bytes.clone()
		}
		EraseSource::Erase(value) => vec![*value; plane_bytes * channels],
		EraseSource::SkipAllZero => unreachable!(),
	};
	let erased = data.clone();

	// Band sub-division: the surface may ask for a split; the halves are
	// rendered in turn with the cookie carried forward.
	let band_box = IBBox::new(
		0,
		first_line as i32,
		ctx.geometry.width as i32 - 1,
		(first_line + height) as i32 - 1,
	);
	let mut incomplete = false;
	match ctx.surface.band_localiser(ctx.band, None) {
		BandAction::Continue => {
			paint_objects(ctx, &colormap, &mut data, band_box, first_line, height)?;
		}
		BandAction::SplitY {
			cookie,
		} => {
			incomplete = true;
			let mid = first_line + height / 2;
			for (y1, y2) in [
				(band_box.y1, mid as i32 - 1),
				(mid as i32, band_box.y2),
			] {
				let sub = IBBox::new(band_box.x1, y1, band_box.x2, y2);
				let action = ctx.surface.band_localiser(ctx.band, Some(cookie));
				if action != BandAction::Continue {
					return Err(RipError::new(
						RipErrorKind::LimitCheck,
						"band split cannot reduce further",
					));
				}
				paint_objects(ctx, &colormap, &mut data, sub, first_line, height)?;
			}
		}
		BandAction::SplitX {
			cookie,
		} => {
			incomplete = true;
			let mid = ctx.geometry.width as i32 / 2;
			for (x1, x2) in [(band_box.x1, mid - 1), (mid, band_box.x2)] {
				let sub = IBBox::new(x1, band_box.y1, x2, band_box.y2);
				let action = ctx.surface.band_localiser(ctx.band, Some(cookie));
				if action != BandAction::Continue {
					return Err(RipError::new(
						RipErrorKind::LimitCheck,
						"band split cannot reduce further",
					));
				}
				paint_objects(ctx, &colormap, &mut data, sub, first_line, height)?;
			}
		}
	}

	// White-on-white: nothing changed after the erase, skip the write
	// and the compression.
	let dont_output = data == erased && !ctx.dl.erase_readback_required;

	// Modular halftone path: contone then mask then the module, per
	// screened colorant; multiple modules mean multiple cycles.
	let mut screened = Vec::new();
	if let Some(binding) = &ctx.mht {
		for &(ci, mht) in &binding.per_colorant {
			let Some(&(_, slot)) =
				colormap.channels().iter().find(|(mapped, _)| *mapped == ci)
			else {
				continue;
			};
			let contone = data[slot * plane_bytes..(slot + 1) * plane_bytes].to_vec();
			let mask = coverage_mask(ctx, band_box, first_line, height)?;
			let dst = do_halftone_wait(ctx, binding.registry, mht, ci, contone, mask)?;
			screened.push((ci, dst));
		}
	}

	Ok(BandOutcome {
		data,
		screened,
		dont_output,
		incomplete,
		omitted: false,
	})
}

/// Object iteration with clip context begin/end around the traversal.
fn paint_objects(
	ctx: &BandRenderCtx<'_>,
	colormap: &BlitColorMap,
	data: &mut [u8],
	band_box: IBBox,
	first_line: usize,
	height: usize,
) -> Result<(), RipError> {
	let line_bytes = ctx.geometry.line_bytes;
	let plane_bytes = height * line_bytes;

	let Some(dl_band) = ctx.dl.bands.get(ctx.band) else {
		return Ok(());
	};

	for object in &dl_band.objects {
		// Clip context: intersect the object and its clip with the band.
		let mut paint_box = object.bbox.intersect(&band_box);
		if let Some(clip) = object.clip {
			paint_box = paint_box.intersect(&clip);
		}
		if paint_box.is_empty() {
			continue;
		}

		let packed = ctx.colors.get(&object.color)?;

		for &(ci, slot) in colormap.channels() {
			let Some(value) = packed.colorant_value(ci) else {
				// The colorant is absent and there is no /All value; the
				// object does not mark this separation.
				continue;
			};
			let maxblit = packed.is_overprinted(ci);
			let plane = &mut data[slot * plane_bytes..(slot + 1) * plane_bytes];

			match &object.kind {
				DlObjectKind::Fill => {
					paint_fill(plane, line_bytes, first_line, &paint_box, value, maxblit);
				}
				DlObjectKind::Image {
					store,
				} => {
					paint_image(
						ctx, plane, line_bytes, first_line, &paint_box, *store, slot, maxblit,
					)?;
				}
			}
		}
	}
	Ok(())
}

fn paint_fill(
	plane: &mut [u8],
	line_bytes: usize,
	first_line: usize,
	paint_box: &IBBox,
	value: ColorValue,
	maxblit: bool,
) {
	let byte = (value.0 >> 8) as u8;
	for y in paint_box.y1..=paint_box.y2 {
		let row = (y as usize - first_line) * line_bytes;
		let x1 = paint_box.x1 as usize;
		let x2 = (paint_box.x2 as usize).min(line_bytes - 1);
		for px in &mut plane[row + x1..=row + x2] {
			*px = if maxblit { (*px).max(byte) } else { byte };
		}
	}
}

#[allow(clippy::too_many_arguments)]
fn paint_image(
	ctx: &BandRenderCtx<'_>,
	plane: &mut [u8],
	line_bytes: usize,
	first_line: usize,
	paint_box: &IBBox,
	store: ripple_store::StoreKey,
	channel: usize,
	maxblit: bool,
) -> Result<(), RipError> {
	let mut shared = ctx.stores.lock();
	let trimmed = shared.store(store)?.bbox_trimmed();
	let visible = paint_box.intersect(&trimmed);
	if visible.is_empty() {
		return Ok(());
	}
	if !shared.store(store)?.plane_exists(channel) {
		// A missing plane is a knockout for this colorant.
		return Ok(());
	}

	for y in visible.y1..=visible.y2 {
		let row = (y as usize - first_line) * line_bytes;
		let mut x = visible.x1;
		while x <= visible.x2 {
			let (run, pixels) = shared.read_run(store, channel, x, y)?;
			let take = pixels.min((visible.x2 - x + 1) as usize);
			let dst = &mut plane[row + x as usize..row + x as usize + take];
			if maxblit {
				for (d, s) in dst.iter_mut().zip(run) {
					*d = (*d).max(*s);
				}
			} else {
				dst.copy_from_slice(&run[..take]);
			}
			x += take as i32;
		}
	}
	Ok(())
}

/// Renders the coverage mask: a bit set wherever any object marks the
/// band.
fn coverage_mask(
	ctx: &BandRenderCtx<'_>,
	band_box: IBBox,
	first_line: usize,
	height: usize,
) -> Result<Vec<u8>, RipError> {
	let width = ctx.geometry.width;
	let mask_line = width.div_ceil(8);
	let mut mask = vec![0u8; mask_line * height];

	if let Some(dl_band) = ctx.dl.bands.get(ctx.band) {
		for object in &dl_band.objects {
			let mut paint_box = object.bbox.intersect(&band_box);
			if let Some(clip) = object.clip {
				paint_box = paint_box.intersect(&clip);
			}
			if paint_box.is_empty() {
				continue;
			}
			for y in paint_box.y1..=paint_box.y2 {
				let row = (y as usize - first_line) * mask_line;
				for x in paint_box.x1..=paint_box.x2 {
					mask[row + x as usize / 8] |= 1 << (7 - x as usize % 8);
				}
			}
		}
	}
	Ok(mask)
}

/// Dispatches a halftone request and waits for completion.
///
/// Synchronous modules complete before `do_halftone` returns; otherwise
/// the thread blocks on a condition variable, aborting the module on
/// interrupt.
fn do_halftone_wait(
	ctx: &BandRenderCtx<'_>,
	registry: &HalftoneRegistry,
	mht: MhtRef,
	ci: ColorantIndex,
	contone: Vec<u8>,
	mask: Vec<u8>,
) -> Result<Vec<u8>, RipError> {
	let module = registry.module_of(mht);
	let instance = registry.instance_of(mht);
	let (_, band_height) = ctx.geometry.band_extent(ctx.band);
	let dst_bytes = ctx.geometry.width.div_ceil(8) * band_height;

	let request = HalftoneRequest {
		band: ctx.band,
		width: ctx.geometry.width,
		contone,
		mask,
		object_map: None,
		dst: vec![0u8; dst_bytes],
	};

	type Pending = (Mutex<Option<(HalftoneRequest, HtResult)>>, Condvar);
	let pending: Arc<Pending> = Arc::new((Mutex::new(None), Condvar::new()));
	let signal = pending.clone();

	let accepted = module.do_halftone(
		instance,
		request,
		Box::new(move |request, result| {
			let (lock, condvar) = &*signal;
			*lock.lock() = Some((request, result));
			condvar.notify_all();
		}),
	);
	if !accepted {
		return Err(RipError::new(
			RipErrorKind::ConfigurationError,
			format!("halftone module refused band {} of {ci:?}", ctx.band),
		));
	}

	let (lock, condvar) = &*pending;
	let mut slot = lock.lock();
	while slot.is_none() {
		if (ctx.interrupted)() {
			module.abort(instance, ctx.band);
			warn!("halftone of band {} aborted by interrupt", ctx.band);
			// The module acknowledges the abort through its completion
			// callback; give it a bounded grace period, then report the
			// interrupt no matter what it delivered. A callback firing
			// after this return lands in an orphaned slot.
			condvar.wait_for(&mut slot, std::time::Duration::from_millis(50));
			return Err(RipError::new(
				RipErrorKind::Interrupt,
				format!("halftone of band {} aborted", ctx.band),
			));
		}
		condvar.wait_for(&mut slot, std::time::Duration::from_millis(10));
	}

	let Some((request, result)) = slot.take() else {
		return Err(RipError::new(RipErrorKind::Interrupt, "halftone aborted"));
	};
	crate::halftone::map_result(result)?;
	debug!("band {} colorant {ci:?} screened by module", ctx.band);
	Ok(request.dst)
}
