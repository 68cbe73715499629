//! 16-bit fixed-point color values.

use serde::{Deserialize, Serialize};

/// A device color value in 16-bit fixed point.
///
/// `0` is no ink, [`ColorValue::ONE`] is full ink. The all-ones bit pattern
/// is reserved as the in-band [`ColorValue::TRANSPARENT`] sentinel used by
/// overprint reduction, so [`ColorValue::from_unit`] never produces it.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ColorValue(pub u16);

impl ColorValue {
	/// Full intensity.
	pub const ONE: ColorValue = ColorValue(0xFFFE);
	/// Largest renderable value, equal to [`ColorValue::ONE`].
	pub const MAX: ColorValue = ColorValue(0xFFFE);
	/// Mid intensity, used by merge averaging.
	pub const HALF: ColorValue = ColorValue(0x8000);
	/// Zero intensity.
	pub const ZERO: ColorValue = ColorValue(0);
	/// In-band sentinel for an overprinted (absent) channel.
	pub const TRANSPARENT: ColorValue = ColorValue(0xFFFF);

	/// Quantises a unit-range float; `0.25` becomes `0x4000`.
	///
	/// Input outside `[0, 1]` is clamped. The result never equals
	/// [`ColorValue::TRANSPARENT`].
	pub fn from_unit(f: f32) -> Self {
		let q = (f64::from(f) * 65536.0).round();
		ColorValue(q.clamp(0.0, f64::from(Self::ONE.0)) as u16)
	}

	/// Back to a unit-range float.
	pub fn to_unit(self) -> f32 {
		f32::from(self.0) / 65536.0
	}

	/// Big-endian wire form, as posted to the page buffer device.
	pub fn to_be_bytes(self) -> [u8; 2] {
		self.0.to_be_bytes()
	}

	/// Returns true for the transparent sentinel.
	pub fn is_transparent(self) -> bool {
		self == Self::TRANSPARENT
	}
}
