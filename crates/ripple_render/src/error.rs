//! The render error taxonomy.

use thiserror::Error;

/// Classified render errors, mirroring the interpreter's error names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RipErrorKind {
	/// Memory allocation failed.
	VmError,
	/// Scratch-file or page-buffer I/O failed.
	IoError,
	/// User cancel.
	Interrupt,
	/// A band split could not reduce the problem further.
	LimitCheck,
	/// Imposition placed content off the page.
	RangeCheck,
	/// Surface or halftone-module capability mismatch.
	ConfigurationError,
	/// A page-buffer parameter had the wrong type.
	TypeCheck,
	/// An unmapped device error.
	Unregistered,
	/// Deliberate cancellation that must not fail the page.
	NotAnError,
}

/// A render error: a kind plus human-readable detail.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {detail}")]
pub struct RipError {
	/// Classification used for recovery decisions.
	pub kind: RipErrorKind,
	/// Free-form description for the job log.
	pub detail: String,
}

impl RipError {
	/// Creates an error of the given kind.
	pub fn new(kind: RipErrorKind, detail: impl Into<String>) -> Self {
		Self {
			kind,
			detail: detail.into(),
		}
	}

	/// True for the cancellation pseudo-error.
	pub fn is_not_an_error(&self) -> bool {
		self.kind == RipErrorKind::NotAnError
	}
}

impl From<ripple_store::StoreError> for RipError {
	fn from(err: ripple_store::StoreError) -> Self {
		let kind = match &err {
			ripple_store::StoreError::Io(_) => RipErrorKind::IoError,
			ripple_store::StoreError::Codec(_) => RipErrorKind::IoError,
			_ => RipErrorKind::Unregistered,
		};
		RipError::new(kind, err.to_string())
	}
}

impl From<ripple_color::ColorError> for RipError {
	fn from(err: ripple_color::ColorError) -> Self {
		RipError::new(RipErrorKind::Unregistered, err.to_string())
	}
}

/// The printer-error event posted when an asynchronously rendered page
/// fails. The skin may fail the job or suppress handling entirely
/// (which behaves like a page cancel).
#[derive(Debug, Clone)]
pub struct PrinterErrorEvent {
	/// Timeline reference of the failing render.
	pub timeline: u64,
	/// Page number as the job counts them.
	pub page_number: i32,
	/// Interpreter-style error name.
	pub error_name: String,
	/// The command reported against the error.
	pub command: String,
	/// Raw error number.
	pub error_number: i32,
	/// Detail string.
	pub detail: String,
	/// Out: the job should be failed.
	pub fail_job: bool,
	/// Out: skip local handling, treat as a page cancel.
	pub suppress_handling: bool,
}

impl PrinterErrorEvent {
	/// Builds the event for a failed render of `page_number`.
	pub fn for_error(page_number: i32, error: &RipError) -> Self {
		Self {
			timeline: 0,
			page_number,
			error_name: format!("{:?}", error.kind),
			command: "renderbands".to_string(),
			error_number: error.kind as i32,
			detail: error.detail.clone(),
			fail_job: false,
			suppress_handling: false,
		}
	}
}
