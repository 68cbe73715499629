//! Renders a small demonstration page into the in-memory page buffer and
//! reports what the sink received.
//!
//! ```sh
//! cargo run --example render-page
//! ```

use std::sync::Arc;

use parking_lot::RwLock;
use ripple_rs::prelude::*;
use ripple_rs::ripple_render::dl::{ColorantInfo, DlObject, DlObjectKind};
use ripple_rs::ripple_render::surface::ContoneSurface;
use ripple_rs::ripple_types::IBBox;

fn main() -> anyhow::Result<()> {
	// Initialize logger with default level set to info if RUST_LOG is not set
	env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

	let geometry = PageGeometry {
		width: 64,
		page_height: 48,
		band_height: 16,
		line_bytes: 64,
	};
	let style = RasterStyle::composite(vec![ColorantInfo {
		index: 0,
		name: "Black".to_string(),
		channel: 0,
		srgb: [0.0; 3],
		cmyk: [0.0, 0.0, 0.0, 1.0],
		special_handling: 0,
		neutral_density: 1.0,
	}]);

	let mut colors = ColorStore::new(ColorStoreConfig::default());
	let mut dl = DisplayList::empty(geometry.band_count());
	for (bbox, unit) in [
		(IBBox::new(0, 0, 63, 47), 0.15),
		(IBBox::new(8, 8, 55, 39), 0.60),
		(IBBox::new(20, 20, 43, 27), 1.00),
	] {
		let packed = colors.build(
			&[ColorantIndex(0)],
			&[ColorValue::from_unit(unit)],
			ColorValue::ONE,
		)?;
		for band in 0..geometry.band_count() {
			let color = colors.intern(&packed)?;
			dl.bands[band].objects.push(DlObject {
				bbox,
				color,
				clip: None,
				kind: DlObjectKind::Fill,
			});
		}
	}

	let page = RenderPage {
		geometry,
		raster_style: style,
		dl,
		colors,
		stores: ImageStoreSet::new(StorePolicy::default(), None),
		erase_nr: 1,
		page_number: 1,
		job_number: 1,
	};

	let mut pipeline = RenderPipeline::new(
		page,
		Arc::new(ContoneSurface),
		Arc::new(RwLock::new(HalftoneRegistry::new())),
		Box::new(MemoryPgb::new()),
		RenderConfig::default(),
	);
	pipeline.render_page(PaintType::Final)?;

	let pgb = pipeline.pgb.lock();
	let memory = pgb
		.as_any()
		.and_then(|any| any.downcast_ref::<MemoryPgb>())
		.expect("demo sink is the memory device");
	let raster = memory.delivered_sheet("Painting-0").expect("sheet delivered");

	println!("delivered {} bytes; coarse view:", raster.len());
	for row in raster.chunks(64).step_by(4) {
		let line: String = row
			.iter()
			.step_by(2)
			.map(|&b| match b {
				0 => ' ',
				1..=0x60 => '.',
				0x61..=0xC0 => 'o',
				_ => '#',
			})
			.collect();
		println!("  {line}");
	}
	Ok(())
}
