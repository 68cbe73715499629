//! Error type for color building and interning.

use ripple_types::{ColorantIndex, PmError};
use thiserror::Error;

/// Errors that can occur when building or manipulating display-list colors
#[derive(Debug, Error)]
pub enum ColorError {
	/// Paintmask construction rejected the colorant set
	#[error(transparent)]
	Paintmask(#[from] PmError),

	/// Colorant and value arrays disagree in length
	#[error("Colorant/value count mismatch: {colorants} colorants, {values} values")]
	CountMismatch {
		/// Number of colorant indexes supplied
		colorants: usize,
		/// Number of color values supplied
		values: usize,
	},

	/// A merge found a common colorant under the Disallow action
	#[error("Colorant {0:?} present in both colors with merging disallowed")]
	CommonColorant(ColorantIndex),

	/// The operation needs an ordinary colorant mask, not a command color
	#[error("Operation not defined for the {0} constant color")]
	CommandColor(&'static str),

	/// Interpolation sources carry different colorant sets
	#[error("Interpolation sources must share one colorant set")]
	ColorantMismatch,

	/// A handle referred to an entry that no longer exists
	#[error("Stale color handle")]
	StaleHandle,

	/// Removing a colorant would leave the color without channels
	#[error("Removing {0:?} would empty the color")]
	WouldEmpty(ColorantIndex),
}
