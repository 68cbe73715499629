//! Modular halftone (MHT) binding.
//!
//! A halftone is either an in-RIP screen (owned by the screening
//! subsystem) or a modular halftone provided by an external screening
//! plugin. This module hosts the plugin side: the registry that vets and
//! constructs modules, instance selection and reuse, per-page resource
//! accounting for latency pipelining, and the result-code mapping back
//! into the render error taxonomy.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::{RipError, RipErrorKind};

/// Supported module ABI version.
pub const HTM_API_VERSION: u32 = 20;

/// Result codes a module may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtResult {
	/// All well.
	Success,
	/// I/O failure inside the module.
	IoError,
	/// Screen too complex.
	LimitCheck,
	/// Parameter out of range.
	RangeCheck,
	/// Parameter of the wrong type.
	TypeCheck,
	/// Module allocation failure.
	Memory,
	/// Module cannot run in this configuration.
	ConfigurationError,
	/// The instance handle was not one of ours.
	BadInstance,
	/// Module cannot read the source bit depth.
	UnsupportedSrcBitDepth,
	/// Module cannot produce the destination bit depth.
	UnsupportedDstBitDepth,
	/// ABI version mismatch.
	Version,
	/// Anything else.
	Other(i32),
}

/// Maps a module result onto the render error taxonomy.
pub fn map_result(result: HtResult) -> Result<(), RipError> {
	let kind = match result {
		HtResult::Success => return Ok(()),
		HtResult::IoError => RipErrorKind::IoError,
		HtResult::LimitCheck => RipErrorKind::LimitCheck,
		HtResult::RangeCheck => RipErrorKind::RangeCheck,
		HtResult::TypeCheck | HtResult::BadInstance => RipErrorKind::TypeCheck,
		HtResult::Memory => RipErrorKind::VmError,
		HtResult::ConfigurationError
		| HtResult::UnsupportedSrcBitDepth
		| HtResult::UnsupportedDstBitDepth
		| HtResult::Version => RipErrorKind::ConfigurationError,
		HtResult::Other(_) => RipErrorKind::Unregistered,
	};
	Err(RipError::new(kind, format!("halftone module: {result:?}")))
}

/// Band execution order a module can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandOrdering {
	/// Bands arrive strictly ascending; the sheet renders single-threaded
	/// unless the module is also reentrant.
	Ascending,
	/// Any order; bands may be halftoned concurrently.
	Any,
}

/// Static description a module registers with.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
	/// Registry key; unique.
	pub name: String,
	/// Human-readable name for reporting.
	pub display_name: String,
	/// ABI version the module was built against.
	pub api_version: u32,
	/// Contone input depth, 8 or 16 bits per sample.
	pub src_bit_depth: u8,
	/// Acceptable band ordering.
	pub band_ordering: BandOrdering,
	/// Multiple bands may be in flight at once.
	pub reentrant: bool,
	/// Channels are screened together; such modules go to the head of
	/// the instance list.
	pub interrelated_channels: bool,
	/// Bands of look-ahead the module needs before output may proceed.
	pub latency: usize,
	/// The module wants empty bands too.
	pub process_empty_bands: bool,
	/// The module wants the object-type map raster.
	pub want_object_map: bool,
}

/// Selection context handed to `select`.
#[derive(Debug, Clone)]
pub struct SelectInfo {
	/// Colorant the instance will screen.
	pub colorant: String,
	/// Device resolution, dots per inch.
	pub resolution: (f32, f32),
	/// Raster width in pixels.
	pub width: usize,
	/// Raster height in lines.
	pub height: usize,
}

/// Pass context for render initiation/completion.
#[derive(Debug, Clone)]
pub struct RenderInfo {
	/// Display-list generation being rendered.
	pub erase_nr: u64,
	/// Band count of the page.
	pub band_count: usize,
}

/// One halftone request: screen `contone` through the module wherever
/// `mask` has bits set, into `dst`.
#[derive(Debug)]
pub struct HalftoneRequest {
	/// Band index, for ordering-sensitive modules.
	pub band: usize,
	/// Raster width in pixels.
	pub width: usize,
	/// Contone input samples.
	pub contone: Vec<u8>,
	/// Mask raster selecting the pixels to screen.
	pub mask: Vec<u8>,
	/// Optional object-type map.
	pub object_map: Option<Vec<u8>>,
	/// Output raster, packed at the device depth.
	pub dst: Vec<u8>,
}

/// Completion callback for asynchronous halftoning.
pub type DoneHalftone = Box<dyn FnOnce(HalftoneRequest, HtResult) + Send>;

/// The modular halftone ABI.
pub trait HalftoneModule: Send + Sync {
	/// The module's static description.
	fn descriptor(&self) -> &ModuleDescriptor;

	/// One-time construction after boot. Modules failing init are
	/// disposed of.
	fn init(&self) -> HtResult {
		HtResult::Success
	}

	/// Module teardown.
	fn finish(&self) {}

	/// Selects (or reuses) an instance for a colorant; returns an opaque
	/// instance handle.
	fn select(&self, info: &SelectInfo) -> Result<u64, HtResult>;

	/// Releases an instance handle.
	fn release(&self, instance: u64);

	/// Screens one band. Returns true when the request was accepted; the
	/// callback fires exactly once, possibly before this returns
	/// (synchronous completion) or from another thread.
	fn do_halftone(&self, instance: u64, request: HalftoneRequest, done: DoneHalftone) -> bool;

	/// Aborts an in-flight request after an interrupt.
	fn abort(&self, instance: u64, band: usize);

	/// Pass start notification.
	fn render_initiation(&self, info: &RenderInfo) -> HtResult;

	/// Pass end notification; `aborting` reflects failure.
	fn render_completion(&self, info: &RenderInfo, aborting: bool);
}

/// A selected instance tracked by the registry.
#[derive(Debug)]
pub(crate) struct MhtInstance {
	pub module: usize,
	pub instance: u64,
	pub colorant: String,
	pub refs: usize,
	/// Most recent display-list generation that used this instance.
	pub last_used_erase_nr: u64,
	/// Guards repeated render initiation across re-output retries of the
	/// same page.
	pub render_inited: bool,
}

/// Reference to a selected instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MhtRef(usize);

/// Per-page band resources an MHT reservation implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MhtResources {
	/// Bytes per contone band.
	pub contone_band_bytes: usize,
	/// Bytes per mask band.
	pub mask_band_bytes: usize,
	/// Bytes per object-map band, when wanted.
	pub object_map_band_bytes: Option<usize>,
	/// Bands of pipelining resources to reserve (latency + 1, capped).
	pub pipelined_bands: usize,
}

/// The process-wide module registry plus per-page instance list.
#[derive(Default)]
pub struct HalftoneRegistry {
	modules: Vec<Arc<dyn HalftoneModule>>,
	instances: Vec<MhtInstance>,
}

impl std::fmt::Debug for HalftoneRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HalftoneRegistry")
			.field("modules", &self.modules.len())
			.field("instances", &self.instances.len())
			.finish()
	}
}

impl HalftoneRegistry {
	/// An empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a module, vetting its descriptor, and runs its init.
	pub fn register(&mut self, module: Arc<dyn HalftoneModule>) -> Result<(), RipError> {
		let descriptor = module.descriptor().clone();
		if descriptor.api_version != HTM_API_VERSION {
			return map_result(HtResult::Version);
		}
		if descriptor.name.is_empty() {
			return map_result(HtResult::ConfigurationError);
		}
		if !matches!(descriptor.src_bit_depth, 8 | 16) {
			return map_result(HtResult::UnsupportedSrcBitDepth);
		}
		if self.modules.iter().any(|m| m.descriptor().name == descriptor.name) {
			return Err(RipError::new(
				RipErrorKind::ConfigurationError,
				format!("halftone module {} already registered", descriptor.name),
			));
		}

		let result = module.init();
		if result != HtResult::Success {
			warn!("halftone module {} failed init: {result:?}", descriptor.name);
			return map_result(result);
		}

		info!("halftone module {} registered", descriptor.name);
		self.modules.push(module);
		Ok(())
	}

	/// Looks a module up by name.
	pub fn module_named(&self, name: &str) -> Option<&Arc<dyn HalftoneModule>> {
		self.modules.iter().find(|m| m.descriptor().name == name)
	}

	/// Selects an instance of a module for a colorant.
	///
	/// The module may hand back a previously-selected instance; the
	/// registry deduplicates on the returned handle, so equal handles
	/// share one entry and a reference count. Interrelated-channel
	/// modules keep their instances at the head of the list.
	pub fn select_instance(
		&mut self,
		module_name: &str,
		info: &SelectInfo,
		erase_nr: u64,
	) -> Result<MhtRef, RipError> {
		let module_index = self
			.modules
			.iter()
			.position(|m| m.descriptor().name == module_name)
			.ok_or_else(|| {
				RipError::new(
					RipErrorKind::ConfigurationError,
					format!("no halftone module named {module_name}"),
				)
			})?;

		let module = &self.modules[module_index];
		let instance = match module.select(info) {
			Ok(instance) => instance,
			Err(result) => {
				map_result(result)?;
				return Err(RipError::new(
					RipErrorKind::ConfigurationError,
					format!("halftone module {module_name} refused selection"),
				));
			}
		};

		if let Some(pos) = self
			.instances
			.iter()
			.position(|i| i.module == module_index && i.instance == instance)
		{
			let entry = &mut self.instances[pos];
			entry.refs += 1;
			entry.last_used_erase_nr = erase_nr;
			return Ok(MhtRef(pos));
		}

		let entry = MhtInstance {
			module: module_index,
			instance,
			colorant: info.colorant.clone(),
			refs: 1,
			last_used_erase_nr: erase_nr,
			render_inited: false,
		};
		self.instances.push(entry);
		Ok(MhtRef(self.instances.len() - 1))
	}

	/// The live instances in processing order: interrelated-channel
	/// modules first, then the rest in selection order.
	pub fn instances_in_order(&self) -> Vec<MhtRef> {
		let mut order: Vec<MhtRef> = Vec::with_capacity(self.instances.len());
		for (i, entry) in self.instances.iter().enumerate() {
			if self.modules[entry.module].descriptor().interrelated_channels {
				order.push(MhtRef(i));
			}
		}
		for (i, entry) in self.instances.iter().enumerate() {
			if !self.modules[entry.module].descriptor().interrelated_channels {
				order.push(MhtRef(i));
			}
		}
		order
	}

	/// The module behind an instance reference.
	pub fn module_of(&self, mht: MhtRef) -> &Arc<dyn HalftoneModule> {
		&self.modules[self.instances[mht.0].module]
	}

	/// The raw instance handle behind a reference.
	pub fn instance_of(&self, mht: MhtRef) -> u64 {
		self.instances[mht.0].instance
	}

	/// Marks an instance used by a display-list generation.
	pub fn set_used(&mut self, mht: MhtRef, erase_nr: u64) {
		self.instances[mht.0].last_used_erase_nr = erase_nr;
	}

	/// True when the instance was used by generation `erase_nr` or later.
	pub fn is_used(&self, mht: MhtRef, erase_nr: u64) -> bool {
		self.instances[mht.0].last_used_erase_nr >= erase_nr
	}

	/// Band resources a page must reserve for an instance.
	///
	/// The contone band is sized for the module's source depth and
	/// rounded up to whole lines; latency `L` requires `L + 1` bands of
	/// pipelining resources, capped by the page's band count.
	pub fn resources(
		&self,
		mht: MhtRef,
		width: usize,
		band_height: usize,
		band_count: usize,
	) -> MhtResources {
		let descriptor = self.module_of(mht).descriptor();
		let bytes_per_line = width * usize::from(descriptor.src_bit_depth) / 8;
		let mask_bytes_per_line = width.div_ceil(8);
		MhtResources {
			contone_band_bytes: bytes_per_line * band_height,
			mask_band_bytes: mask_bytes_per_line * band_height,
			object_map_band_bytes: descriptor.want_object_map.then_some(width * band_height),
			pipelined_bands: (descriptor.latency + 1).min(band_count),
		}
	}

	/// Largest latency across the instances a page uses.
	pub fn max_latency(&self, refs: &[MhtRef]) -> usize {
		refs.iter()
			.map(|&r| self.module_of(r).descriptor().latency)
			.max()
			.unwrap_or(0)
	}

	/// Runs render initiation for the given instances, once per instance
	/// per page (re-output retries must not re-initiate).
	pub fn render_initiation(
		&mut self,
		refs: &[MhtRef],
		info: &RenderInfo,
	) -> Result<(), RipError> {
		for &MhtRef(index) in refs {
			if self.instances[index].render_inited {
				continue;
			}
			let module = &self.modules[self.instances[index].module];
			map_result(module.render_initiation(info))?;
			self.instances[index].render_inited = true;
		}
		Ok(())
	}

	/// Runs render completion and clears the initiation guard.
	pub fn render_completion(&mut self, refs: &[MhtRef], info: &RenderInfo, aborting: bool) {
		for &MhtRef(index) in refs {
			if !self.instances[index].render_inited {
				continue;
			}
			let module = &self.modules[self.instances[index].module];
			module.render_completion(info, aborting);
			self.instances[index].render_inited = false;
		}
	}

	/// Releases one reference to an instance.
	pub fn release_instance(&mut self, mht: MhtRef) {
		let entry = &mut self.instances[mht.0];
		debug_assert!(entry.refs > 0);
		entry.refs -= 1;
	}

	/// Frees instances unused since before `expired_erase_nr` with no
	/// remaining references. Returns how many were disposed.
	pub fn sweep(&mut self, expired_erase_nr: u64) -> usize {
		let mut disposed = 0;
		let mut index = 0;
		while index < self.instances.len() {
			let entry = &self.instances[index];
			if entry.refs == 0 && entry.last_used_erase_nr < expired_erase_nr {
				let module = &self.modules[entry.module];
				module.release(entry.instance);
				debug!("halftone instance for {} swept", entry.colorant);
				self.instances.remove(index);
				disposed += 1;
			} else {
				index += 1;
			}
		}
		disposed
	}
}

// ── Built-in threshold module ───────────────────────────────────────────

/// A minimal built-in screening module: a fixed 4×4 Bayer threshold
/// applied wherever the mask selects pixels. Serves as the reference
/// implementation of the module ABI and as the debug screen.
#[derive(Debug)]
pub struct ThresholdHalftone {
	descriptor: ModuleDescriptor,
	/// Completes requests on a helper thread instead of synchronously.
	pub asynchronous: bool,
}

/// 4×4 Bayer matrix scaled to byte thresholds.
const BAYER4: [[u8; 4]; 4] = [
	[15, 135, 45, 165],
	[195, 75, 225, 105],
	[60, 180, 30, 150],
	[240, 120, 210, 90],
];

impl ThresholdHalftone {
	/// Creates the module with the given name and latency.
	pub fn new(name: &str, latency: usize, asynchronous: bool) -> Self {
		Self {
			descriptor: ModuleDescriptor {
				name: name.to_string(),
				display_name: format!("Threshold ({name})"),
				api_version: HTM_API_VERSION,
				src_bit_depth: 8,
				band_ordering: BandOrdering::Any,
				reentrant: true,
				interrelated_channels: false,
				latency,
				process_empty_bands: false,
				want_object_map: false,
			},
			asynchronous,
		}
	}

	fn screen(request: &mut HalftoneRequest, width: usize) {
		for (i, &sample) in request.contone.iter().enumerate() {
			let byte = i / 8;
			let bit = 7 - i % 8;
			if request.mask.get(byte).copied().unwrap_or(0) & (1 << bit) == 0 {
				continue;
			}
			let x = i % width;
			let y = i / width;
			let on = sample > BAYER4[y % 4][x % 4];
			if let Some(out) = request.dst.get_mut(byte) {
				if on {
					*out |= 1 << bit;
				} else {
					*out &= !(1 << bit);
				}
			}
		}
	}
}

impl HalftoneModule for ThresholdHalftone {
	fn descriptor(&self) -> &ModuleDescriptor {
		&self.descriptor
	}

	fn select(&self, _info: &SelectInfo) -> Result<u64, HtResult> {
		Ok(1)
	}

	fn release(&self, _instance: u64) {}

	fn do_halftone(&self, _instance: u64, mut request: HalftoneRequest, done: DoneHalftone) -> bool {
		let width = request.width.max(1);
		if self.asynchronous {
			std::thread::spawn(move || {
				Self::screen(&mut request, width);
				done(request, HtResult::Success);
			});
		} else {
			Self::screen(&mut request, width);
			done(request, HtResult::Success);
		}
		true
	}

	fn abort(&self, _instance: u64, band: usize) {
		warn!("threshold halftone abort requested for band {band}");
	}

	fn render_initiation(&self, _info: &RenderInfo) -> HtResult {
		HtResult::Success
	}

	fn render_completion(&self, _info: &RenderInfo, _aborting: bool) {}
}
