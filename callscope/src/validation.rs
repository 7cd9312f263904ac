//! Argument checks shared by every wrapper.
//!
//! Validation never fails the call: a rejected argument is turned into a
//! tagged display value and the caller sets the matching fact bit, while the
//! host still receives the original argument.

use callscope_common::DisplayValue;

use crate::domain::Handle;
use crate::host::{format_number, HostValue};

/// Fractional digits kept for delays and self-times.
pub const DISPLAY_PRECISION: i32 = 3;

/// Round to [`DISPLAY_PRECISION`] digits, normalizing `-0` to `0`.
#[must_use]
pub fn round_fixed(value: f64) -> f64 {
    let scale = 10f64.powi(DISPLAY_PRECISION);
    let rounded = (value * scale).round() / scale;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Outcome of checking a delay argument.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckedDelay {
    pub display: DisplayValue,
    pub is_bad: bool,
}

/// A delay must be omitted or a finite number `>= 0`.
#[must_use]
pub fn validate_delay(delay: Option<f64>) -> CheckedDelay {
    match delay {
        None => CheckedDelay { display: DisplayValue::Unset, is_bad: false },
        Some(d) if d.is_finite() && d >= 0.0 => {
            CheckedDelay { display: DisplayValue::Number(round_fixed(d)), is_bad: false }
        }
        Some(d) => CheckedDelay { display: DisplayValue::tagged(format_number(d)), is_bad: true },
    }
}

/// A cancellation handle must be a positive integer.
///
/// # Errors
/// Returns the tagged display form of `value` when it is not a valid handle.
pub fn validate_handler(value: &HostValue) -> Result<Handle, DisplayValue> {
    value.as_handle().ok_or_else(|| DisplayValue::tagged(value.to_display_string()))
}
