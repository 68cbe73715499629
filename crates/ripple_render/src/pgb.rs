//! The page buffer (PGB) boundary.
//!
//! The page buffer is an external byte-oriented sink with seek/read/write
//! semantics and a parameter channel. The back-end marshals the sheet
//! parameters before opening, writes band data at line-addressed offsets,
//! reads bands back for partial paint and compositing replay, and
//! translates device results into recovery dispositions.
//!
//! | Device result        | Action                                      |
//! |----------------------|---------------------------------------------|
//! | `ReOutput`           | rebuild and replay the sheet graph          |
//! | `ReOutputPageBuffer` | readback-only re-output graph               |
//! | `NotReady`           | retry after a printer-status event          |
//! | `CancelPage`         | discard the sheet, not an error             |
//! | `IoError`            | abort the sheet with IOERROR                |
//! | `Interrupted`        | abort with interrupt                        |
//! | `VmError`            | abort with VMERROR                          |
//! | other                | abort with the unregistered error           |

use std::collections::HashMap;

use log::{debug, warn};
use serde::Serialize;

use crate::dl::{ColorantInfo, PageGeometry, RenderPage};
use crate::error::{RipError, RipErrorKind};

/// Temporary page-buffer file classes, by paint purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgbPurpose {
	/// Partial-paint spill.
	PartialPaint,
	/// Two-pass transparency composite.
	Compositing,
	/// Ordinary final-pass painting.
	Painting,
	/// Delivery to the output channel.
	Outputting,
}

impl PgbPurpose {
	/// The device file-name prefix for this purpose.
	pub fn file_stem(self) -> &'static str {
		match self {
			PgbPurpose::PartialPaint => "PartialPaint",
			PgbPurpose::Compositing => "Compositing",
			PgbPurpose::Painting => "Painting",
			PgbPurpose::Outputting => "Outputting",
		}
	}
}

/// A parameter value posted to the device.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum PgbParam {
	/// Integer parameter.
	Int(i64),
	/// Boolean parameter.
	Bool(bool),
	/// String parameter.
	Str(String),
	/// Per-colorant dictionary.
	Colorant(ColorantInfo),
}

/// Result of a device operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgbResult {
	/// Operation succeeded.
	Ok,
	/// Sheet must be rebuilt and replayed.
	ReOutput,
	/// Sheet must be re-emitted from the retained raster only.
	ReOutputPageBuffer,
	/// Device momentarily unavailable; retry.
	NotReady,
	/// Page cancelled by the consumer.
	CancelPage,
	/// Irrecoverable I/O failure.
	IoError,
	/// Interrupted by the user.
	Interrupted,
	/// Device allocation failure.
	VmError,
	/// Anything else.
	Other(i32),
}

/// What the pipeline does about a device result.
#[derive(Debug, Clone)]
pub enum PgbDisposition {
	/// Carry on.
	Proceed,
	/// Retry the failing operation (after a status event).
	Retry,
	/// Rebuild and replay the sheet graph.
	ReOutput,
	/// Build a readback-only graph, skipping render and compress.
	ReOutputPageBuffer,
	/// Cancel this sheet with the not-an-error pseudo error.
	CancelSheet,
	/// Abort with a real error.
	Abort(RipError),
}

/// Translates a device result into a pipeline disposition.
pub fn translate(result: PgbResult) -> PgbDisposition {
	match result {
		PgbResult::Ok => PgbDisposition::Proceed,
		PgbResult::ReOutput => PgbDisposition::ReOutput,
		PgbResult::ReOutputPageBuffer => PgbDisposition::ReOutputPageBuffer,
		PgbResult::NotReady => PgbDisposition::Retry,
		PgbResult::CancelPage => PgbDisposition::CancelSheet,
		PgbResult::IoError => PgbDisposition::Abort(RipError::new(
			RipErrorKind::IoError,
			"page buffer I/O failed",
		)),
		PgbResult::Interrupted => {
			PgbDisposition::Abort(RipError::new(RipErrorKind::Interrupt, "interrupted"))
		}
		PgbResult::VmError => PgbDisposition::Abort(RipError::new(
			RipErrorKind::VmError,
			"page buffer allocation failed",
		)),
		PgbResult::Other(code) => PgbDisposition::Abort(RipError::new(
			RipErrorKind::Unregistered,
			format!("unregistered page buffer error {code}"),
		)),
	}
}

/// The pluggable page-buffer device.
///
/// One sheet is open at a time; `seek` positions are line-addressed byte
/// offsets within the sheet's raster.
pub trait PageBufferDevice: Send {
	/// Opens (or reopens) the named sheet file.
	fn open(&mut self, name: &str) -> PgbResult;
	/// Closes the open sheet, flushing it to the consumer.
	fn close(&mut self) -> PgbResult;
	/// Abandons the open sheet.
	fn abort(&mut self) -> PgbResult;
	/// Seeks to a byte position within the sheet.
	fn seek(&mut self, pos: u64) -> PgbResult;
	/// Reads exactly `buf.len()` bytes at the current position.
	fn read(&mut self, buf: &mut [u8]) -> PgbResult;
	/// Writes all of `buf` at the current position.
	fn write(&mut self, buf: &[u8]) -> PgbResult;
	/// Posts a parameter.
	fn set_param(&mut self, name: &str, value: PgbParam) -> PgbResult;
	/// Queries a parameter.
	fn get_param(&mut self, name: &str) -> Option<PgbParam>;
	/// Deletes a sheet file (after delivery or on failure).
	fn erase(&mut self, name: &str);
	/// Concrete-type escape hatch for device-specific introspection.
	fn as_any(&self) -> Option<&dyn std::any::Any> {
		None
	}
	/// Mutable form of [`PageBufferDevice::as_any`].
	fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
		None
	}
}

/// Posts the full per-sheet parameter set before opening the device.
pub fn set_sheet_params(
	device: &mut dyn PageBufferDevice,
	page: &RenderPage,
	separation: usize,
	compress_bands: bool,
) -> Result<(), RipError> {
	let geometry = &page.geometry;
	let style = &page.raster_style;

	let mut post = |name: &str, value: PgbParam| -> Result<(), RipError> {
		match translate(device.set_param(name, value)) {
			PgbDisposition::Proceed => Ok(()),
			PgbDisposition::Abort(err) => Err(err),
			_ => Err(RipError::new(
				RipErrorKind::TypeCheck,
				format!("page buffer rejected parameter {name}"),
			)),
		}
	};

	post("CompressBands", PgbParam::Bool(compress_bands))?;
	post("MSBLeft", PgbParam::Bool(true))?;
	post("PackingUnitBits", PgbParam::Int(8))?;
	post("NumSeparations", PgbParam::Int(style.num_separations as i64))?;
	post("PrintPage", PgbParam::Bool(true))?;
	post("TrimPage", PgbParam::Bool(false))?;
	post("TrimStart", PgbParam::Int(0))?;
	post("TrimEnd", PgbParam::Int(geometry.page_height as i64))?;
	post("NumBands", PgbParam::Int(geometry.band_count() as i64))?;
	post("JobNumber", PgbParam::Int(i64::from(page.job_number)))?;
	post("PageNumber", PgbParam::Int(i64::from(page.page_number)))?;
	post("Separation", PgbParam::Int(separation as i64))?;
	post("SeparationId", PgbParam::Int(separation as i64))?;
	post("NumColorants", PgbParam::Int(style.colorants.len() as i64))?;
	post("NumChannels", PgbParam::Int(style.colorants_per_frame as i64))?;
	post("NumGroupColorants", PgbParam::Int(style.colorants.len() as i64))?;
	for colorant in &style.colorants {
		post("ColorName", PgbParam::Str(colorant.name.clone()))?;
		post("Colorant", PgbParam::Colorant(colorant.clone()))?;
	}
	Ok(())
}

/// Writes one band's raster.
///
/// The device is positioned at the band's first line within the sheet and
/// receives exactly `data.len()` bytes.
pub fn write_band(
	device: &mut dyn PageBufferDevice,
	geometry: &PageGeometry,
	first_line: usize,
	data: &[u8],
) -> PgbResult {
	let pos = (first_line * geometry.line_bytes) as u64;
	let result = device.seek(pos);
	if result != PgbResult::Ok {
		return result;
	}
	device.write(data)
}

/// Reads one band back, for partial paint or compositing replay.
///
/// The device is positioned at `(frame_index * page_height) + first_line`
/// and must produce exactly `band_height * line_bytes * colorants` bytes.
pub fn read_band(
	device: &mut dyn PageBufferDevice,
	geometry: &PageGeometry,
	frame_index: usize,
	first_line: usize,
	colorants_per_band: usize,
	band_height: usize,
	out: &mut [u8],
) -> PgbResult {
	let line = frame_index * geometry.page_height + first_line;
	debug_assert_eq!(out.len(), band_height * geometry.line_bytes * colorants_per_band);
	let result = device.seek((line * geometry.line_bytes) as u64);
	if result != PgbResult::Ok {
		return result;
	}
	device.read(out)
}

// ── In-memory device ────────────────────────────────────────────────────

/// A memory-backed page buffer used by tests and the demo sink.
///
/// Sheets live in a map by file name; a fault plan injects device results
/// ahead of real operations so error recovery paths can be exercised.
#[derive(Debug, Default)]
pub struct MemoryPgb {
	sheets: HashMap<String, Vec<u8>>,
	delivered: HashMap<String, Vec<u8>>,
	params: HashMap<String, PgbParam>,
	open: Option<String>,
	pos: u64,
	/// Results injected before the next write operations, front first.
	pub fault_plan: Vec<PgbResult>,
	/// Count of NotReady retries observed.
	pub retries_seen: usize,
}

impl MemoryPgb {
	/// Creates an empty device.
	pub fn new() -> Self {
		Self::default()
	}

	/// The finished raster of a sheet, if it was written.
	pub fn sheet(&self, name: &str) -> Option<&[u8]> {
		self.sheets.get(name).map(Vec::as_slice)
	}

	/// The raster of a sheet whose temporary file was already erased
	/// after delivery.
	pub fn delivered_sheet(&self, name: &str) -> Option<&[u8]> {
		self.delivered.get(name).map(Vec::as_slice)
	}

	/// Names of all sheets currently held.
	pub fn sheet_names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.sheets.keys().cloned().collect();
		names.sort();
		names
	}

	fn next_fault(&mut self) -> PgbResult {
		if self.fault_plan.is_empty() { PgbResult::Ok } else { self.fault_plan.remove(0) }
	}
}

impl PageBufferDevice for MemoryPgb {
	fn open(&mut self, name: &str) -> PgbResult {
		self.sheets.entry(name.to_string()).or_default();
		self.open = Some(name.to_string());
		self.pos = 0;
		PgbResult::Ok
	}

	fn close(&mut self) -> PgbResult {
		let fault = self.next_fault();
		if fault != PgbResult::Ok {
			return fault;
		}
		self.open = None;
		PgbResult::Ok
	}

	fn abort(&mut self) -> PgbResult {
		if let Some(name) = self.open.take() {
			warn!("page buffer sheet {name} aborted");
		}
		PgbResult::Ok
	}

	fn seek(&mut self, pos: u64) -> PgbResult {
		if self.open.is_none() {
			return PgbResult::IoError;
		}
		self.pos = pos;
		PgbResult::Ok
	}

	fn read(&mut self, buf: &mut [u8]) -> PgbResult {
		let Some(name) = &self.open else {
			return PgbResult::IoError;
		};
		let sheet = &self.sheets[name];
		let start = self.pos as usize;
		if start + buf.len() > sheet.len() {
			return PgbResult::IoError;
		}
		buf.copy_from_slice(&sheet[start..start + buf.len()]);
		self.pos += buf.len() as u64;
		PgbResult::Ok
	}

	fn write(&mut self, buf: &[u8]) -> PgbResult {
		let fault = self.next_fault();
		if fault == PgbResult::NotReady {
			self.retries_seen += 1;
			return fault;
		}
		if fault != PgbResult::Ok {
			return fault;
		}
		let Some(name) = self.open.clone() else {
			return PgbResult::IoError;
		};
		let sheet = self.sheets.get_mut(&name).expect("open sheet exists");
		let start = self.pos as usize;
		if sheet.len() < start + buf.len() {
			sheet.resize(start + buf.len(), 0);
		}
		sheet[start..start + buf.len()].copy_from_slice(buf);
		self.pos += buf.len() as u64;
		PgbResult::Ok
	}

	fn set_param(&mut self, name: &str, value: PgbParam) -> PgbResult {
		self.params.insert(name.to_string(), value);
		PgbResult::Ok
	}

	fn get_param(&mut self, name: &str) -> Option<PgbParam> {
		self.params.get(name).cloned()
	}

	fn erase(&mut self, name: &str) {
		// The consumer keeps what it already received; erasing only
		// removes the temporary file.
		if let Some(bytes) = self.sheets.remove(name) {
			self.delivered.insert(name.to_string(), bytes);
			debug!("page buffer sheet {name} erased");
		}
	}

	fn as_any(&self) -> Option<&dyn std::any::Any> {
		Some(self)
	}

	fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
		Some(self)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_translate_table() {
		assert!(matches!(translate(PgbResult::Ok), PgbDisposition::Proceed));
		assert!(matches!(translate(PgbResult::NotReady), PgbDisposition::Retry));
		assert!(matches!(translate(PgbResult::ReOutput), PgbDisposition::ReOutput));
		assert!(matches!(
			translate(PgbResult::ReOutputPageBuffer),
			PgbDisposition::ReOutputPageBuffer
		));
		assert!(matches!(translate(PgbResult::CancelPage), PgbDisposition::CancelSheet));
		match translate(PgbResult::IoError) {
			PgbDisposition::Abort(err) => assert_eq!(err.kind, RipErrorKind::IoError),
			other => panic!("unexpected {other:?}"),
		}
		match translate(PgbResult::Other(42)) {
			PgbDisposition::Abort(err) => assert_eq!(err.kind, RipErrorKind::Unregistered),
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn test_memory_pgb_band_round_trip() {
		let geometry = PageGeometry {
			width: 64,
			page_height: 32,
			band_height: 8,
			line_bytes: 64,
		};
		let mut device = MemoryPgb::new();
		assert_eq!(device.open("Painting-0"), PgbResult::Ok);

		let band = vec![0xABu8; 8 * 64];
		assert_eq!(write_band(&mut device, &geometry, 8, &band), PgbResult::Ok);

		let mut back = vec![0u8; 8 * 64];
		assert_eq!(
			read_band(&mut device, &geometry, 0, 8, 1, 8, &mut back),
			PgbResult::Ok
		);
		assert_eq!(back, band);
	}

	#[test]
	fn test_fault_plan_injects() {
		let mut device = MemoryPgb::new();
		device.open("x");
		device.fault_plan.push(PgbResult::NotReady);
		assert_eq!(device.write(&[1, 2, 3]), PgbResult::NotReady);
		assert_eq!(device.retries_seen, 1);
		assert_eq!(device.write(&[1, 2, 3]), PgbResult::Ok);
	}
}
