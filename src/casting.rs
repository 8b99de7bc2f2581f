//! Safe numeric casting utilities for raster tiling.
//!
//! This module provides safe conversion functions and documents our assumptions
//! about numeric ranges in the context of terrain raster processing.
//!
//! # Design Decisions
//!
//! ## Pixel Dimensions (`usize` ↔ `f64`)
//! We allow `usize` to `f64` conversions without explicit checks because:
//! - Maximum practical raster dimension: ~1 billion pixels per side
//! - `f64` mantissa: 52 bits, can exactly represent integers up to 2^53
//! - No real-world raster will exceed this limit
//!
//! ## Scaled Pixel Rectangles (`f64` → `usize`)
//! Rectangle origins/sizes scaled by the height↔color pixel ratio are
//! rounded, never truncated, so sibling tiles stay edge-to-edge.

use std::convert::TryFrom;

/// Scale a pixel coordinate or extent by a ratio, rounding to the nearest pixel.
///
/// Negative results (possible only with a negative ratio, which callers never
/// pass) clamp to zero.
#[inline]
#[must_use]
pub fn scale_round(value: usize, ratio: f64) -> usize {
    // Allow cast precision loss: pixel dimensions fit in the f64 mantissa
    #[allow(clippy::cast_precision_loss)]
    let scaled = (value as f64 * ratio).round();
    if scaled <= 0.0 {
        return 0;
    }
    // Cast is safe: non-negative and rounded
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let result = scaled as usize;
    result
}

/// Convert a `usize` pixel dimension to `u32`, failing on overflow.
///
/// # Errors
/// Returns an error string if the value exceeds `u32::MAX`.
#[inline]
pub fn usize_to_u32(value: usize) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("Value {value} exceeds u32 maximum"))
}
