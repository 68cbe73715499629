//! The render pass orchestrator.
//!
//! Decides the pass structure for a page — a composite pass followed by a
//! final pass when the two-pass transparency strategy sees backdrop
//! regions, a single final pass otherwise, or a partial-paint pass over
//! the display list rendered so far — and drives each sheet's task graph
//! through the scheduler, honouring the page buffer's recovery protocol:
//! retry on not-ready, rebuild-and-replay on re-output, readback-only
//! replay on page-buffer re-output, and sheet cancellation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use ripple_types::ColorantIndex;

use crate::band::{BandOutcome, BandPool, BandRenderCtx, EraseSource, MhtBinding, render_band};
use crate::dl::RenderPage;
use crate::error::{PrinterErrorEvent, RipError, RipErrorKind};
use crate::graph::{SheetSpec, SheetWorkFactory, TaskWorkFn, build_sheet_graph,
	build_sheet_reoutput_graph};
use crate::halftone::{HalftoneRegistry, MhtRef, RenderInfo};
use crate::pgb::{PageBufferDevice, PgbDisposition, PgbPurpose, PgbResult, read_band,
	set_sheet_params, translate, write_band};
use crate::scheduler::{Scheduler, TaskGraph};
use crate::surface::{Surface, SurfaceScope};

/// Why a pass is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintType {
	/// The final (or only) pass of a page.
	Final,
	/// A partial paint over the display-list prefix.
	Partial,
	/// The compositing pass of the two-pass transparency strategy.
	Composite,
}

impl PaintType {
	fn purpose(self) -> PgbPurpose {
		match self {
			PaintType::Final => PgbPurpose::Painting,
			PaintType::Partial => PgbPurpose::PartialPaint,
			PaintType::Composite => PgbPurpose::Compositing,
		}
	}
}

/// Page-level configuration the interpreter hands over.
#[derive(Debug, Clone)]
pub struct RenderConfig {
	/// 1 = single-pass compositing, 2 = composite then final.
	pub transparency_strategy: u8,
	/// Copies of the final pass.
	pub numcopies: usize,
	/// Ask the page buffer for compressed bands.
	pub compress_bands: bool,
	/// Worker threads for the scheduler.
	pub threads: usize,
	/// The consumer accepts omission of known-blank bands.
	pub accepts_band_omission: bool,
	/// Re-output attempts before giving up.
	pub max_reoutputs: usize,
}

impl Default for RenderConfig {
	fn default() -> Self {
		Self {
			transparency_strategy: 2,
			numcopies: 1,
			compress_bands: false,
			threads: 4,
			accepts_band_omission: false,
			max_reoutputs: 5,
		}
	}
}

/// Everything the band tasks share for one sheet run.
struct SheetState {
	page: Arc<RenderPage>,
	surface: Arc<dyn Surface>,
	registry: Arc<RwLock<HalftoneRegistry>>,
	pgb: Arc<Mutex<Box<dyn PageBufferDevice>>>,
	config: RenderConfig,
	sheet: usize,
	sheet_name: String,
	/// Sheet name holding the raster to read bands back from.
	readback_source: Option<String>,
	mht_per_colorant: Vec<(ColorantIndex, MhtRef)>,
	omitted: Vec<ColorantIndex>,
	interrupted: Arc<AtomicBool>,
	band_pool: Arc<BandPool>,
	/// Render results awaiting compression/output.
	outcomes: Mutex<HashMap<(usize, usize), BandOutcome>>,
	/// Compressed payloads awaiting output.
	compressed: Mutex<HashMap<(usize, usize), Vec<u8>>>,
	/// First non-proceed disposition a device operation produced.
	disposition: Mutex<Option<PgbDisposition>>,
}

impl SheetState {
	fn record_disposition(&self, disposition: PgbDisposition) -> RipError {
		let error = match &disposition {
			PgbDisposition::Abort(err) => err.clone(),
			_ => RipError::new(RipErrorKind::NotAnError, "sheet needs replay"),
		};
		let mut slot = self.disposition.lock();
		if slot.is_none() {
			*slot = Some(disposition);
		}
		error
	}

	/// Runs a device operation, retrying for as long as it reports
	/// not-ready (after issuing a printer-status event).
	fn device_op(
		&self,
		mut op: impl FnMut(&mut dyn PageBufferDevice) -> PgbResult,
	) -> Result<(), RipError> {
		loop {
			let result = {
				let mut pgb = self.pgb.lock();
				op(pgb.as_mut())
			};
			match translate(result) {
				PgbDisposition::Proceed => return Ok(()),
				PgbDisposition::Retry => {
					debug!("page buffer not ready, retrying after status event");
					std::thread::yield_now();
				}
				other => return Err(self.record_disposition(other)),
			}
		}
	}

	fn frame_colorants(&self, frame: usize) -> Vec<crate::dl::ColorantInfo> {
		let style = &self.page.raster_style;
		let base: Vec<_> = if style.num_separations > 1 {
			// Separated output: the sheet selects one colorant.
			style.colorants.iter().filter(|c| c.channel == self.sheet).cloned().collect()
		} else {
			style.frame_colorants(frame).to_vec()
		};
		base.into_iter().filter(|c| !self.omitted.contains(&ColorantIndex(c.index))).collect()
	}
}

/// Work factory wiring the sheet state into task bodies.
struct SheetWork {
	state: Arc<SheetState>,
}

impl SheetWork {
	fn state(&self) -> Arc<SheetState> {
		self.state.clone()
	}
}

impl SheetWorkFactory for SheetWork {
	fn sheet_start(&mut self) -> TaskWorkFn {
		let state = self.state();
		Box::new(move |_| {
			{
				let mut pgb = state.pgb.lock();
				set_sheet_params(
					pgb.as_mut(),
					&state.page,
					state.sheet,
					state.config.compress_bands,
				)?;
			}
			state.device_op(|dev| dev.open(&state.sheet_name))?;
			state.surface.sheet_begin(SurfaceScope {
				sheet: state.sheet,
				frame: 0,
			})
		})
	}

	fn sheet_render_done(&mut self) -> TaskWorkFn {
		let state = self.state();
		Box::new(move |_| {
			debug!("sheet {} rendering complete", state.sheet);
			Ok(())
		})
	}

	fn sheet_output_done(&mut self) -> TaskWorkFn {
		let state = self.state();
		Box::new(move |_| state.device_op(|dev| dev.close()))
	}

	fn sheet_done(&mut self) -> TaskWorkFn {
		let state = self.state();
		Box::new(move |_| {
			state.surface.sheet_end(
				SurfaceScope {
					sheet: state.sheet,
					frame: 0,
				},
				true,
			)
		})
	}

	fn frame_start(&mut self, frame: usize) -> TaskWorkFn {
		let state = self.state();
		Box::new(move |_| {
			state.surface.frame_begin(SurfaceScope {
				sheet: state.sheet,
				frame,
			})
		})
	}

	fn frame_done(&mut self, frame: usize) -> TaskWorkFn {
		let state = self.state();
		Box::new(move |_| {
			state.surface.frame_end(SurfaceScope {
				sheet: state.sheet,
				frame,
			})
		})
	}

	fn band_render(&mut self, frame: usize, band: usize) -> TaskWorkFn {
		let state = self.state();
		Box::new(move |ctx| {
			debug_assert!(!ctx.is_interpreter, "render task on the interpreter");

			let colorants = state.frame_colorants(frame);
			let (first_line, height) = state.page.geometry.band_extent(band);
			let channels = colorants.len().max(1);
			let bytes = height * state.page.geometry.line_bytes * channels;

			// Erase resolution: page-buffer readback, retained raster,
			// in-place erase, or omission.
			let erase = if state.page.dl.erase_readback_required {
				let source = state
					.readback_source
					.clone()
					.unwrap_or_else(|| state.sheet_name.clone());
				let mut buf = state.band_pool.fix(first_line + height - 1, bytes);
				// One device operation end to end: concurrent band outputs
				// must never see the readback sheet selected.
				state.device_op(|dev| {
					let r = dev.open(&source);
					if r != PgbResult::Ok {
						return r;
					}
					let r = read_band(
						dev,
						&state.page.geometry,
						frame,
						first_line,
						channels,
						height,
						&mut buf,
					);
					if r != PgbResult::Ok {
						return r;
					}
					// Restore the painting sheet for the output tasks.
					dev.open(&state.sheet_name)
				})?;
				EraseSource::Readback(buf)
			} else if state.config.accepts_band_omission
				&& state.page.dl.bands.get(band).is_none_or(|b| b.objects.is_empty())
				&& state.page.dl.erase_value == 0
			{
				EraseSource::SkipAllZero
			} else {
				EraseSource::Erase(state.page.dl.erase_value)
			};

			let registry = state.registry.read();
			let binding = if state.mht_per_colorant.is_empty() {
				None
			} else {
				Some(MhtBinding {
					registry: &registry,
					per_colorant: state.mht_per_colorant.clone(),
				})
			};

			let interrupted = state.interrupted.clone();
			let interrupted_fn = move || interrupted.load(Ordering::Relaxed);
			let outcome = render_band(&BandRenderCtx {
				geometry: &state.page.geometry,
				dl: &state.page.dl,
				colors: &state.page.colors,
				stores: &state.page.stores,
				surface: state.surface.as_ref(),
				colorants: &colorants,
				band,
				frame,
				erase,
				mht: binding,
				interrupted: &interrupted_fn,
			})?;

			state.outcomes.lock().insert((frame, band), outcome);
			Ok(())
		})
	}

	fn band_compress(&mut self, frame: usize, band: usize) -> TaskWorkFn {
		let state = self.state();
		Box::new(move |_| {
			if !state.config.compress_bands {
				return Ok(());
			}
			let outcomes = state.outcomes.lock();
			let Some(outcome) = outcomes.get(&(frame, band)) else {
				return Ok(());
			};
			if outcome.dont_output || outcome.omitted {
				return Ok(());
			}
			let data = outcome.data.clone();
			drop(outcomes);

			// Bands compress with the block codec's byte style; the page
			// buffer was told to expect compressed bands.
			let packed = ripple_types::codec::compress_bytes(
				&data,
				data.len(),
				1,
				2 * data.len() + 64,
			)
			.map_err(|e| RipError::new(RipErrorKind::IoError, e.to_string()))?;
			state.compressed.lock().insert((frame, band), packed);
			Ok(())
		})
	}

	fn band_output(&mut self, frame: usize, band: usize) -> TaskWorkFn {
		let state = self.state();
		Box::new(move |_| {
			let outcome = state.outcomes.lock().remove(&(frame, band));
			let Some(outcome) = outcome else {
				return Ok(());
			};
			if outcome.dont_output || outcome.omitted {
				debug!("band {band} unchanged, output skipped");
				return Ok(());
			}

			let (first_line, height) = state.page.geometry.band_extent(band);
			let line = frame * state.page.geometry.page_height + first_line;
			let payload = state.compressed.lock().remove(&(frame, band)).unwrap_or(outcome.data);

			state.device_op(|dev| {
				write_band(dev, &state.page.geometry, line, &payload)
			})?;
			// The band buffer detaches back to the pool once emitted.
			state.band_pool.unfix(first_line + height - 1, payload);
			Ok(())
		})
	}

	fn band_readback(&mut self, frame: usize, band: usize) -> TaskWorkFn {
		let state = self.state();
		Box::new(move |_| {
			let colorants = state.frame_colorants(frame);
			let (first_line, height) = state.page.geometry.band_extent(band);
			let channels = colorants.len().max(1);
			let mut buf =
				vec![0u8; height * state.page.geometry.line_bytes * channels];
			state.device_op(|dev| {
				read_band(
					dev,
					&state.page.geometry,
					frame,
					first_line,
					channels,
					height,
					&mut buf,
				)
			})?;
			state.outcomes.lock().insert((frame, band), BandOutcome {
				data: buf,
				screened: Vec::new(),
				dont_output: false,
				incomplete: false,
				omitted: false,
			});
			Ok(())
		})
	}
}

/// The per-page render pipeline.
pub struct RenderPipeline {
	/// The page under render.
	pub page: Arc<RenderPage>,
	/// The output surface set.
	pub surface: Arc<dyn Surface>,
	/// The halftone registry (instances for this page already selected).
	pub registry: Arc<RwLock<HalftoneRegistry>>,
	/// The page buffer sink.
	pub pgb: Arc<Mutex<Box<dyn PageBufferDevice>>>,
	/// Configuration.
	pub config: RenderConfig,
	/// Module instances per screened colorant.
	pub mht_per_colorant: Vec<(ColorantIndex, MhtRef)>,
	/// Interrupt flag.
	pub interrupted: Arc<AtomicBool>,
	band_pool: Arc<BandPool>,
	readback_source: Option<String>,
	/// Sheets written so far, for final cleanup.
	written_sheets: Vec<String>,
}

impl RenderPipeline {
	/// Assembles a pipeline for one page.
	pub fn new(
		page: RenderPage,
		surface: Arc<dyn Surface>,
		registry: Arc<RwLock<HalftoneRegistry>>,
		pgb: Box<dyn PageBufferDevice>,
		config: RenderConfig,
	) -> Self {
		Self {
			page: Arc::new(page),
			surface,
			registry,
			pgb: Arc::new(Mutex::new(pgb)),
			config,
			mht_per_colorant: Vec::new(),
			interrupted: Arc::new(AtomicBool::new(false)),
			band_pool: Arc::new(BandPool::new()),
			readback_source: None,
			written_sheets: Vec::new(),
		}
	}

	/// Mutable access to the page between passes (partial-paint
	/// continuation adds new display-list objects here).
	pub fn page_mut(&mut self) -> &mut RenderPage {
		Arc::get_mut(&mut self.page).expect("no task references between passes")
	}

	fn mht_refs(&self) -> Vec<MhtRef> {
		self.mht_per_colorant.iter().map(|&(_, r)| r).collect()
	}

	fn sheet_file(&self, purpose: PgbPurpose, sheet: usize) -> String {
		format!("{}-{}", purpose.file_stem(), sheet)
	}

	/// Renders all passes of the page.
	///
	/// The composite pass runs first under the two-pass strategy when the
	/// region map contains backdrop regions; the erase is then marked as
	/// readback-required so the final pass replays the composited raster
	/// underneath the direct regions. The final pass loops over
	/// `numcopies`. Halftone modules see one `render_initiation` /
	/// `render_completion` bracket for the whole page, surviving sheet
	/// replays in between.
	pub fn render_page(&mut self, paint: PaintType) -> Result<(), RipError> {
		let info = RenderInfo {
			erase_nr: self.page.erase_nr,
			band_count: self.page.geometry.band_count(),
		};
		let refs = self.mht_refs();

		self.surface.render_begin()?;
		self.registry.write().render_initiation(&refs, &info)?;

		let result = self.render_passes(paint);

		self.registry.write().render_completion(&refs, &info, result.is_err());
		let surface_end = self.surface.render_end(result.is_ok());

		if result.is_err() || paint == PaintType::Final {
			self.erase_page_buffers(result.is_err());
		}

		if let Err(error) = &result {
			let event = PrinterErrorEvent::for_error(self.page.page_number, error);
			warn!(
				"render of page {} failed: {} ({})",
				event.page_number, event.error_name, event.detail
			);
		}
		result.and(surface_end)
	}

	fn render_passes(&mut self, paint: PaintType) -> Result<(), RipError> {
		let two_pass = self.config.transparency_strategy == 2
			&& self.page.dl.region_map.any_backdrop()
			&& paint == PaintType::Final;

		if two_pass {
			info!("page {}: composite pass", self.page.page_number);
			self.render_all_sheets(PaintType::Composite)?;
			// The final pass must replay the composited raster under the
			// direct regions.
			self.readback_source = Some(self.sheet_file(PgbPurpose::Compositing, 0));
			self.set_erase_readback();
		}

		// Preconvert boundary: colors are reconverted to device codes
		// between the passes; the stores' preconversion reserves are no
		// longer needed once rendering starts.
		self.release_store_reserves();

		// Separation omission runs before the page buffer parameters are
		// marshalled.
		let omitted = self.omitted_separations();
		if !omitted.is_empty() {
			info!("omitting {} blank separations", omitted.len());
		}

		let copies = if paint == PaintType::Final { self.config.numcopies } else { 1 };
		for copy in 0..copies {
			if copy > 0 {
				debug!("rendering copy {}", copy + 1);
			}
			self.render_all_sheets(paint)?;
		}

		if paint == PaintType::Partial {
			// Interpretation continues on this display list; the next
			// pass reads every band back before painting new objects.
			self.readback_source = Some(self.sheet_file(PgbPurpose::PartialPaint, 0));
			self.set_erase_readback();
		}
		Ok(())
	}

	fn set_erase_readback(&mut self) {
		let page = Arc::get_mut(&mut self.page)
			.expect("no task references between passes");
		page.dl.erase_readback_required = true;
	}

	fn release_store_reserves(&self) {
		// Reserves guarantee preconversion cannot fail mid-render; once a
		// pass begins they are returned to the pool.
		self.page.stores.lock().release_all_reserves();
	}

	fn omitted_separations(&self) -> Vec<ColorantIndex> {
		let style = &self.page.raster_style;
		if style.num_separations <= 1 {
			return Vec::new();
		}
		// An /All color paints every separation; otherwise anything the
		// display list never marks is blank and can be left out.
		let Some(painted) = self.page.dl.painted_colorants(&self.page.colors) else {
			return Vec::new();
		};
		style
			.colorants
			.iter()
			.map(|c| ColorantIndex(c.index))
			.filter(|ci| !painted.contains(ci))
			.collect()
	}

	fn render_all_sheets(&mut self, paint: PaintType) -> Result<(), RipError> {
		let omitted = self.omitted_separations();
		let sheets = self.page.raster_style.num_separations.max(1);
		for sheet in 0..sheets {
			if self.page.raster_style.num_separations > 1 {
				let style = &self.page.raster_style;
				let this = style.colorants.iter().find(|c| c.channel == sheet);
				if let Some(info) = this
					&& omitted.contains(&ColorantIndex(info.index))
				{
					debug!("separation {} omitted as blank", info.name);
					continue;
				}
			}
			self.render_sheet(paint, sheet, &omitted)?;
		}
		Ok(())
	}

	fn sheet_state(
		&self,
		paint: PaintType,
		sheet: usize,
		omitted: &[ColorantIndex],
	) -> Arc<SheetState> {
		Arc::new(SheetState {
			page: self.page.clone(),
			surface: self.surface.clone(),
			registry: self.registry.clone(),
			pgb: self.pgb.clone(),
			config: self.config.clone(),
			sheet,
			sheet_name: self.sheet_file(paint.purpose(), sheet),
			readback_source: self.readback_source.clone(),
			mht_per_colorant: self.mht_per_colorant.clone(),
			omitted: omitted.to_vec(),
			interrupted: self.interrupted.clone(),
			band_pool: self.band_pool.clone(),
			outcomes: Mutex::new(HashMap::new()),
			compressed: Mutex::new(HashMap::new()),
			disposition: Mutex::new(None),
		})
	}

	fn sheet_spec(&self, sheet: usize) -> SheetSpec {
		let latency = {
			let registry = self.registry.read();
			registry.max_latency(&self.mht_refs())
		};
		// Non-reentrant or strictly-ordered modules force a serialized
		// sheet.
		let serialize = {
			let registry = self.registry.read();
			self.mht_refs().iter().any(|&r| {
				let d = registry.module_of(r).descriptor();
				!d.reentrant
					|| d.band_ordering == crate::halftone::BandOrdering::Ascending
			})
		} || self.config.threads <= 1;

		SheetSpec {
			sheet,
			frames: if self.page.raster_style.num_separations > 1 {
				1
			} else {
				self.page.raster_style.frame_count()
			},
			bands: self.page.geometry.band_count(),
			mht_latency: latency,
			serialize,
		}
	}

	fn render_sheet(
		&mut self,
		paint: PaintType,
		sheet: usize,
		omitted: &[ColorantIndex],
	) -> Result<(), RipError> {
		let spec = self.sheet_spec(sheet);
		let mut reoutputs = 0usize;
		let mut readback_only = false;

		loop {
			let state = self.sheet_state(paint, sheet, omitted);
			let mut factory = SheetWork {
				state: state.clone(),
			};

			let mut graph = TaskGraph::new();
			let root = graph.root();
			if readback_only {
				build_sheet_reoutput_graph(&mut graph, root, &spec, &mut factory);
			} else {
				build_sheet_graph(&mut graph, root, &spec, &mut factory);
			}

			let outcome = Scheduler::new(self.config.threads).run(graph);
			let disposition = state.disposition.lock().take();

			match disposition {
				None => {
					outcome.into_result()?;
					self.written_sheets.push(state.sheet_name.clone());
					return Ok(());
				}
				Some(PgbDisposition::ReOutput) => {
					reoutputs += 1;
					if reoutputs > self.config.max_reoutputs {
						return Err(RipError::new(
							RipErrorKind::IoError,
							"page buffer demanded re-output too many times",
						));
					}
					info!("sheet {sheet}: re-output requested, replaying");
					readback_only = false;
				}
				Some(PgbDisposition::ReOutputPageBuffer) => {
					reoutputs += 1;
					if reoutputs > self.config.max_reoutputs {
						return Err(RipError::new(
							RipErrorKind::IoError,
							"page buffer demanded re-output too many times",
						));
					}
					info!("sheet {sheet}: raster-only re-output requested");
					readback_only = true;
				}
				Some(PgbDisposition::CancelSheet) => {
					info!("sheet {sheet} cancelled by the consumer");
					let mut pgb = self.pgb.lock();
					let _ = pgb.abort();
					return Ok(());
				}
				Some(PgbDisposition::Abort(error)) => {
					let mut pgb = self.pgb.lock();
					let _ = pgb.abort();
					return Err(error);
				}
				Some(PgbDisposition::Proceed) | Some(PgbDisposition::Retry) => {
					unreachable!("proceed/retry are handled at the operation")
				}
			}
		}
	}

	/// Deletes the page buffer's temporary sheet files, after delivery or
	/// on failure.
	fn erase_page_buffers(&mut self, failed: bool) {
		let mut pgb = self.pgb.lock();
		for name in self.written_sheets.drain(..) {
			if failed {
				warn!("removing sheet {name} after failed render");
			}
			pgb.erase(&name);
		}
	}
}
