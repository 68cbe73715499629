//! End-to-end pipeline tests: full pages rendered through the task graph
//! into the in-memory page buffer, including the recovery protocol.

use test_log::test;

use std::sync::Arc;

use parking_lot::RwLock;
use ripple_color::{ColorStore, ColorStoreConfig};
use ripple_render::dl::{
	ColorantInfo, DisplayList, DlObject, DlObjectKind, PageGeometry, RasterStyle, RenderPage,
};
use ripple_render::halftone::{HalftoneRegistry, SelectInfo, ThresholdHalftone};
use ripple_render::passes::{PaintType, RenderConfig, RenderPipeline};
use ripple_render::pgb::{MemoryPgb, PgbResult};
use ripple_render::surface::ContoneSurface;
use ripple_store::{ImageStoreSet, StorePolicy};
use ripple_types::{ColorValue, ColorantIndex, IBBox};

const WIDTH: usize = 32;
const HEIGHT: usize = 16;
const BAND: usize = 4;

fn geometry() -> PageGeometry {
	PageGeometry {
		width: WIDTH,
		page_height: HEIGHT,
		band_height: BAND,
		line_bytes: WIDTH,
	}
}

fn colorant(index: i32, channel: usize) -> ColorantInfo {
	ColorantInfo {
		index,
		name: format!("ink-{index}"),
		channel,
		srgb: [0.0; 3],
		cmyk: [0.0; 4],
		special_handling: 0,
		neutral_density: 1.0,
	}
}

/// A page with one colorant and the given fills (bbox, unit value).
fn page_with_fills(fills: &[(IBBox, f32)]) -> RenderPage {
	let mut colors = ColorStore::new(ColorStoreConfig::default());
	let mut dl = DisplayList::empty(geometry().band_count());

	for &(bbox, unit) in fills {
		let packed = colors
			.build(
				&[ColorantIndex(0)],
				&[ColorValue::from_unit(unit)],
				ColorValue::ONE,
			)
			.unwrap();
		let color = colors.intern(&packed).unwrap();
		// An object lands on every band it touches.
		for band in 0..geometry().band_count() {
			let (first, height) = geometry().band_extent(band);
			let band_box =
				IBBox::new(0, first as i32, WIDTH as i32 - 1, (first + height) as i32 - 1);
			if !bbox.intersect(&band_box).is_empty() {
				let packed = colors.get(&color).unwrap().clone();
				let handle = colors.intern(&packed).unwrap();
				dl.bands[band].objects.push(DlObject {
					bbox,
					color: handle,
					clip: None,
					kind: DlObjectKind::Fill,
				});
			}
		}
		colors.release(color).unwrap();
	}

	RenderPage {
		geometry: geometry(),
		raster_style: RasterStyle::composite(vec![colorant(0, 0)]),
		dl,
		colors,
		stores: ImageStoreSet::new(StorePolicy::default(), None),
		erase_nr: 1,
		page_number: 1,
		job_number: 7,
	}
}

/// The raster a plain sequential paint would produce.
fn sequential_expectation(fills: &[(IBBox, f32)]) -> Vec<u8> {
	let mut raster = vec![0u8; WIDTH * HEIGHT];
	for &(bbox, unit) in fills {
		let byte = (ColorValue::from_unit(unit).0 >> 8) as u8;
		for y in bbox.y1..=bbox.y2 {
			for x in bbox.x1..=bbox.x2 {
				raster[y as usize * WIDTH + x as usize] = byte;
			}
		}
	}
	raster
}

fn pipeline(page: RenderPage, config: RenderConfig) -> RenderPipeline {
	RenderPipeline::new(
		page,
		Arc::new(ContoneSurface),
		Arc::new(RwLock::new(HalftoneRegistry::new())),
		Box::new(MemoryPgb::new()),
		config,
	)
}

fn delivered(pipeline: &RenderPipeline, name: &str) -> Vec<u8> {
	let pgb = pipeline.pgb.lock();
	let memory = pgb
		.as_any()
		.and_then(|any| any.downcast_ref::<MemoryPgb>())
		.expect("test device is the memory page buffer");
	memory
		.delivered_sheet(name)
		.or_else(|| memory.sheet(name))
		.expect("sheet was written")
		.to_vec()
}

fn inject_faults(pipeline: &RenderPipeline, faults: &[PgbResult]) {
	let mut pgb = pipeline.pgb.lock();
	let memory = pgb
		.as_any_mut()
		.and_then(|any| any.downcast_mut::<MemoryPgb>())
		.expect("test device is the memory page buffer");
	memory.fault_plan.extend_from_slice(faults);
}

fn fills_a() -> Vec<(IBBox, f32)> {
	vec![
		(IBBox::new(0, 0, 31, 15), 0.25),
		(IBBox::new(4, 2, 20, 9), 0.75),
		(IBBox::new(10, 8, 30, 14), 0.5),
	]
}

#[test]
fn test_final_pass_matches_sequential_paint() {
	let fills = fills_a();
	let mut pipeline = pipeline(page_with_fills(&fills), RenderConfig::default());
	pipeline.render_page(PaintType::Final).unwrap();

	assert_eq!(delivered(&pipeline, "Painting-0"), sequential_expectation(&fills));
}

#[test]
fn test_single_threaded_matches_parallel() {
	let fills = fills_a();

	let mut single = pipeline(page_with_fills(&fills), RenderConfig {
		threads: 1,
		..RenderConfig::default()
	});
	single.render_page(PaintType::Final).unwrap();

	let mut parallel = pipeline(page_with_fills(&fills), RenderConfig {
		threads: 8,
		..RenderConfig::default()
	});
	parallel.render_page(PaintType::Final).unwrap();

	assert_eq!(delivered(&single, "Painting-0"), delivered(&parallel, "Painting-0"));
}

#[test]
fn test_reoutput_replays_identically() {
	let fills = fills_a();

	// A clean run for reference.
	let mut reference = pipeline(page_with_fills(&fills), RenderConfig::default());
	reference.render_page(PaintType::Final).unwrap();
	let expected = delivered(&reference, "Painting-0");

	// The first band write demands a re-output of the sheet.
	let mut retried = pipeline(page_with_fills(&fills), RenderConfig::default());
	inject_faults(&retried, &[PgbResult::ReOutput]);
	retried.render_page(PaintType::Final).unwrap();

	assert_eq!(delivered(&retried, "Painting-0"), expected);
}

#[test]
fn test_not_ready_retries_forever() {
	let fills = fills_a();
	let mut p = pipeline(page_with_fills(&fills), RenderConfig::default());
	inject_faults(&p, &[PgbResult::NotReady, PgbResult::NotReady, PgbResult::NotReady]);
	p.render_page(PaintType::Final).unwrap();
	assert_eq!(delivered(&p, "Painting-0"), sequential_expectation(&fills));
}

#[test]
fn test_cancel_page_discards_sheet_without_error() {
	let fills = fills_a();
	let mut p = pipeline(page_with_fills(&fills), RenderConfig::default());
	inject_faults(&p, &[PgbResult::CancelPage]);
	// A cancel is not a render failure.
	p.render_page(PaintType::Final).unwrap();
}

#[test]
fn test_io_error_aborts() {
	let fills = fills_a();
	let mut p = pipeline(page_with_fills(&fills), RenderConfig::default());
	inject_faults(&p, &[PgbResult::IoError]);
	let err = p.render_page(PaintType::Final).unwrap_err();
	assert_eq!(err.kind, ripple_render::RipErrorKind::IoError);
}

#[test]
fn test_partial_paint_plus_continuation_equals_full_render() {
	let fills = fills_a();
	let (early, late) = fills.split_at(2);

	// Reference: everything in one final render.
	let mut reference = pipeline(page_with_fills(&fills), RenderConfig::default());
	reference.render_page(PaintType::Final).unwrap();
	let expected = delivered(&reference, "Painting-0");

	// Partial paint of the prefix, then the rest rendered on top.
	let mut p = pipeline(page_with_fills(early), RenderConfig::default());
	p.render_page(PaintType::Partial).unwrap();

	{
		let page = p.page_mut();
		let mut extra = page_with_fills(late);
		// Move the late objects (and their interned colors) onto the
		// continuing display list.
		for (band, dl_band) in extra.dl.bands.iter_mut().enumerate() {
			for object in dl_band.objects.drain(..) {
				let packed = extra.colors.get(&object.color).unwrap().clone();
				let color = page.colors.intern(&packed).unwrap();
				page.dl.bands[band].objects.push(DlObject {
					bbox: object.bbox,
					color,
					clip: object.clip,
					kind: DlObjectKind::Fill,
				});
			}
		}
	}
	p.render_page(PaintType::Final).unwrap();

	assert_eq!(delivered(&p, "Painting-0"), expected);
}

#[test]
fn test_two_pass_composite_replays_backdrop() {
	let fills = fills_a();
	let mut page = page_with_fills(&fills);
	page.dl.region_map.backdrop_bands = vec![0, 1];

	let mut p = pipeline(page, RenderConfig {
		transparency_strategy: 2,
		..RenderConfig::default()
	});
	p.render_page(PaintType::Final).unwrap();

	// The composite raster underlies the final paint; for opaque fills
	// the result equals the sequential paint everywhere.
	assert_eq!(delivered(&p, "Painting-0"), sequential_expectation(&fills));
}

#[test]
fn test_numcopies_renders_repeatedly() {
	let fills = fills_a();
	let mut p = pipeline(page_with_fills(&fills), RenderConfig {
		numcopies: 3,
		..RenderConfig::default()
	});
	p.render_page(PaintType::Final).unwrap();
	assert_eq!(delivered(&p, "Painting-0"), sequential_expectation(&fills));
}

#[test]
fn test_reoutput_does_not_reinitiate_halftone_modules() {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use ripple_render::halftone::{
		DoneHalftone, HalftoneModule, HalftoneRequest, HtResult, ModuleDescriptor, RenderInfo,
		ThresholdHalftone,
	};

	struct CountingModule {
		descriptor: ModuleDescriptor,
		initiations: AtomicUsize,
		completions: AtomicUsize,
	}
	impl HalftoneModule for CountingModule {
		fn descriptor(&self) -> &ModuleDescriptor {
			&self.descriptor
		}
		fn select(&self, _: &SelectInfo) -> Result<u64, HtResult> {
			Ok(1)
		}
		fn release(&self, _: u64) {}
		fn do_halftone(&self, _: u64, request: HalftoneRequest, done: DoneHalftone) -> bool {
			done(request, HtResult::Success);
			true
		}
		fn abort(&self, _: u64, _: usize) {}
		fn render_initiation(&self, _: &RenderInfo) -> HtResult {
			self.initiations.fetch_add(1, Ordering::SeqCst);
			HtResult::Success
		}
		fn render_completion(&self, _: &RenderInfo, _: bool) {
			self.completions.fetch_add(1, Ordering::SeqCst);
		}
	}

	let module = Arc::new(CountingModule {
		descriptor: ThresholdHalftone::new("count", 1, false).descriptor().clone(),
		initiations: AtomicUsize::new(0),
		completions: AtomicUsize::new(0),
	});
	let registry = Arc::new(RwLock::new(HalftoneRegistry::new()));
	let mht = {
		let mut reg = registry.write();
		reg.register(module.clone()).unwrap();
		reg.select_instance(
			"count",
			&SelectInfo {
				colorant: "ink-0".to_string(),
				resolution: (600.0, 600.0),
				width: WIDTH,
				height: HEIGHT,
			},
			1,
		)
		.unwrap()
	};

	let fills = fills_a();
	let mut p = RenderPipeline::new(
		page_with_fills(&fills),
		Arc::new(ContoneSurface),
		registry,
		Box::new(MemoryPgb::new()),
		RenderConfig::default(),
	);
	p.mht_per_colorant = vec![(ColorantIndex(0), mht)];

	// The first sheet write forces a replay; initiation must still run
	// exactly once per page, completion once at the end.
	inject_faults(&p, &[PgbResult::ReOutput]);
	p.render_page(PaintType::Final).unwrap();

	assert_eq!(module.initiations.load(Ordering::SeqCst), 1);
	assert_eq!(module.completions.load(Ordering::SeqCst), 1);
	assert_eq!(delivered(&p, "Painting-0"), sequential_expectation(&fills));
}

#[test]
fn test_mht_page_screens_colorant() {
	let fills = fills_a();
	let page = page_with_fills(&fills);

	let registry = Arc::new(RwLock::new(HalftoneRegistry::new()));
	let mht = {
		let mut reg = registry.write();
		reg.register(Arc::new(ThresholdHalftone::new("bayer", 2, false))).unwrap();
		reg.select_instance(
			"bayer",
			&SelectInfo {
				colorant: "ink-0".to_string(),
				resolution: (600.0, 600.0),
				width: WIDTH,
				height: HEIGHT,
			},
			1,
		)
		.unwrap()
	};

	let mut p = RenderPipeline::new(
		page,
		Arc::new(ContoneSurface),
		registry.clone(),
		Box::new(MemoryPgb::new()),
		RenderConfig::default(),
	);
	p.mht_per_colorant = vec![(ColorantIndex(0), mht)];
	p.render_page(PaintType::Final).unwrap();

	// The module saw the whole page: latency gates and completion ran
	// without deadlock, and the raster was still delivered.
	assert_eq!(delivered(&p, "Painting-0"), sequential_expectation(&fills));
}

#[test]
fn test_blank_separation_omitted() {
	// Two separations, only the first ever painted: the blank one is
	// omitted before the page buffer sees any parameters for it.
	let mut page = page_with_fills(&fills_a());
	page.raster_style = RasterStyle {
		colorants: vec![colorant(0, 0), colorant(1, 1)],
		num_separations: 2,
		colorants_per_frame: 1,
	};

	let mut p = RenderPipeline::new(
		page,
		Arc::new(ContoneSurface),
		Arc::new(RwLock::new(HalftoneRegistry::new())),
		Box::new(MemoryPgb::new()),
		RenderConfig::default(),
	);
	p.render_page(PaintType::Final).unwrap();

	let pgb = p.pgb.lock();
	let memory = pgb
		.as_any()
		.and_then(|any| any.downcast_ref::<MemoryPgb>())
		.unwrap();
	assert!(memory.delivered_sheet("Painting-0").is_some());
	assert!(
		memory.delivered_sheet("Painting-1").is_none() && memory.sheet("Painting-1").is_none(),
		"the blank separation must not be written"
	);
}

#[test]
fn test_full_page_fill() {
	// A whole-page fill exercises the tail band geometry and the pool
	// recycling between bands.
	let fills = vec![(IBBox::new(0, 0, 31, 15), 1.0)];
	let mut p = pipeline(page_with_fills(&fills), RenderConfig::default());
	p.render_page(PaintType::Final).unwrap();
	assert_eq!(delivered(&p, "Painting-0"), sequential_expectation(&fills));
}
