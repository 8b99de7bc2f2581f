//! Bilinear resampling and 2:1 box-filter reduction.
//!
//! Two alignment conventions are in play and they are deliberately not the
//! same: upscaling is corner-aligned (source and destination corner pixels
//! coincide exactly, which keeps the shared edge samples of adjacent height
//! tiles identical), while downscaling is center-aligned (each destination
//! pixel samples the centroid of its source footprint, the usual convention
//! for minification).
//!
//! Large ratios are handled by pre-doubling or pre-halving each axis
//! independently while more than a 2x step remains on it, so no single pass
//! ever skips source pixels. Integer rasters route fractional resizes through
//! `f32`; exact power-of-two reductions stay in integer arithmetic via
//! [`reduce_2to1`], which never round-trips through float.

use tracing::debug;

use crate::raster::{Pixel, Raster, Rgb8, RgbF32};

/// Pixel types that support the linear arithmetic bilinear filtering needs.
pub trait LinearPixel: Pixel {
    const ZERO: Self;

    /// `self + other * weight`, per channel.
    #[must_use]
    fn mul_add(self, other: Self, weight: f32) -> Self;
}

impl LinearPixel for f32 {
    const ZERO: Self = 0.0;

    #[inline]
    fn mul_add(self, other: Self, weight: f32) -> Self {
        other.mul_add(weight, self)
    }
}

impl LinearPixel for RgbF32 {
    const ZERO: Self = RgbF32 { r: 0.0, g: 0.0, b: 0.0 };

    #[inline]
    fn mul_add(self, other: Self, weight: f32) -> Self {
        Self {
            r: other.r.mul_add(weight, self.r),
            g: other.g.mul_add(weight, self.g),
            b: other.b.mul_add(weight, self.b),
        }
    }
}

/// Pixel types with an integer accumulator wide enough to sum four samples.
pub trait BoxPixel: Pixel {
    type Acc: Copy + Default;

    fn accumulate(acc: Self::Acc, px: Self) -> Self::Acc;
    fn average4(acc: Self::Acc) -> Self;
}

impl BoxPixel for u8 {
    type Acc = u32;

    #[inline]
    fn accumulate(acc: u32, px: u8) -> u32 {
        acc + u32::from(px)
    }

    #[inline]
    fn average4(acc: u32) -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        let avg = (acc >> 2) as u8;
        avg
    }
}

impl BoxPixel for u16 {
    type Acc = u32;

    #[inline]
    fn accumulate(acc: u32, px: u16) -> u32 {
        acc + u32::from(px)
    }

    #[inline]
    fn average4(acc: u32) -> u16 {
        #[allow(clippy::cast_possible_truncation)]
        let avg = (acc >> 2) as u16;
        avg
    }
}

impl BoxPixel for Rgb8 {
    type Acc = (u32, u32, u32);

    #[inline]
    fn accumulate(acc: (u32, u32, u32), px: Rgb8) -> (u32, u32, u32) {
        (acc.0 + u32::from(px.r), acc.1 + u32::from(px.g), acc.2 + u32::from(px.b))
    }

    #[inline]
    fn average4(acc: (u32, u32, u32)) -> Rgb8 {
        #[allow(clippy::cast_possible_truncation)]
        let avg = Rgb8::new((acc.0 >> 2) as u8, (acc.1 >> 2) as u8, (acc.2 >> 2) as u8);
        avg
    }
}

impl BoxPixel for f32 {
    type Acc = f32;

    #[inline]
    fn accumulate(acc: f32, px: f32) -> f32 {
        acc + px
    }

    #[inline]
    fn average4(acc: f32) -> f32 {
        acc * 0.25
    }
}

impl BoxPixel for RgbF32 {
    type Acc = RgbF32;

    #[inline]
    fn accumulate(acc: RgbF32, px: RgbF32) -> RgbF32 {
        RgbF32::new(acc.r + px.r, acc.g + px.g, acc.b + px.b)
    }

    #[inline]
    fn average4(acc: RgbF32) -> RgbF32 {
        RgbF32::new(acc.r * 0.25, acc.g * 0.25, acc.b * 0.25)
    }
}

/// Halve both raster dimensions by averaging each 2x2 block.
///
/// Both dimensions must be even. Integer pixel types accumulate in integer
/// arithmetic and shift, so no float round-trip occurs.
///
/// # Panics
/// Panics if either dimension is odd.
#[must_use]
pub fn reduce_2to1<P: BoxPixel>(src: &Raster<P>) -> Raster<P> {
    assert!(
        src.width() % 2 == 0 && src.height() % 2 == 0,
        "reduce_2to1 requires even dimensions, got {}x{}",
        src.width(),
        src.height()
    );
    let w = src.width() / 2;
    let h = src.height() / 2;
    let mut out = Raster::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = P::Acc::default();
            acc = P::accumulate(acc, src.get(x * 2, y * 2));
            acc = P::accumulate(acc, src.get(x * 2 + 1, y * 2));
            acc = P::accumulate(acc, src.get(x * 2, y * 2 + 1));
            acc = P::accumulate(acc, src.get(x * 2 + 1, y * 2 + 1));
            out.set(x, y, P::average4(acc));
        }
    }
    out
}

/// Bilinear sample at a fractional source position, edge-guarded.
///
/// `x`/`y` must lie within `[0, width-1] x [0, height-1]`; samples on the
/// last row or column skip the out-of-range neighbor by virtue of a zero
/// fractional weight.
#[inline]
fn subpixel<P: LinearPixel>(src: &Raster<P>, x: f64, y: f64) -> P {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let x0 = x.floor() as usize;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let y0 = y.floor() as usize;

    #[allow(clippy::cast_possible_truncation)]
    let fx = (x - x.floor()) as f32;
    #[allow(clippy::cast_possible_truncation)]
    let fy = (y - y.floor()) as f32;

    let x1 = if fx > 0.0 { x0 + 1 } else { x0 };
    let y1 = if fy > 0.0 { y0 + 1 } else { y0 };

    let top = P::ZERO
        .mul_add(src.get(x0, y0), 1.0 - fx)
        .mul_add(src.get(x1, y0), fx);
    let bottom = P::ZERO
        .mul_add(src.get(x0, y1), 1.0 - fx)
        .mul_add(src.get(x1, y1), fx);
    P::ZERO.mul_add(top, 1.0 - fy).mul_add(bottom, fy)
}

/// One corner-aligned bilinear pass. Destination corner pixels reproduce the
/// source corner pixels exactly. Sample positions clamp to the last source
/// index; `(dst-1) * (src-1)/(dst-1)` can round a hair above `src-1` and the
/// clamp keeps the edge guard in [`subpixel`] from reaching past the buffer.
fn corner_pass<P: LinearPixel>(src: &Raster<P>, dst_w: usize, dst_h: usize) -> Raster<P> {
    #[allow(clippy::cast_precision_loss)]
    let max_x = (src.width() - 1) as f64;
    #[allow(clippy::cast_precision_loss)]
    let max_y = (src.height() - 1) as f64;
    #[allow(clippy::cast_precision_loss)]
    let x_step = if dst_w > 1 { max_x / (dst_w - 1) as f64 } else { 0.0 };
    #[allow(clippy::cast_precision_loss)]
    let y_step = if dst_h > 1 { max_y / (dst_h - 1) as f64 } else { 0.0 };

    let mut out = Raster::new(dst_w, dst_h);
    for dy in 0..dst_h {
        #[allow(clippy::cast_precision_loss)]
        let sy = (dy as f64 * y_step).min(max_y);
        for dx in 0..dst_w {
            #[allow(clippy::cast_precision_loss)]
            let sx = (dx as f64 * x_step).min(max_x);
            out.set(dx, dy, subpixel(src, sx, sy));
        }
    }
    out
}

/// One center-aligned bilinear pass. Each destination pixel samples the
/// centroid of its source footprint, clamped to the source extent.
fn center_pass<P: LinearPixel>(src: &Raster<P>, dst_w: usize, dst_h: usize) -> Raster<P> {
    #[allow(clippy::cast_precision_loss)]
    let x_step = src.width() as f64 / dst_w as f64;
    #[allow(clippy::cast_precision_loss)]
    let y_step = src.height() as f64 / dst_h as f64;
    #[allow(clippy::cast_precision_loss)]
    let max_x = (src.width() - 1) as f64;
    #[allow(clippy::cast_precision_loss)]
    let max_y = (src.height() - 1) as f64;

    let mut out = Raster::new(dst_w, dst_h);
    for dy in 0..dst_h {
        #[allow(clippy::cast_precision_loss)]
        let sy = ((dy as f64 + 0.5) * y_step - 0.5).clamp(0.0, max_y);
        for dx in 0..dst_w {
            #[allow(clippy::cast_precision_loss)]
            let sx = ((dx as f64 + 0.5) * x_step - 0.5).clamp(0.0, max_x);
            out.set(dx, dy, subpixel(src, sx, sy));
        }
    }
    out
}

/// Corner-aligned bilinear upscale. Each axis pre-doubles independently (a
/// doubling inserts exact midpoints, keeping the corner grid aligned) while
/// a further doubling still fits that axis, then one pass covers the
/// fractional remainder.
fn scaled_up<P: LinearPixel>(src: Raster<P>, dst_w: usize, dst_h: usize) -> Raster<P> {
    assert!(dst_w > 1 && dst_h > 1, "corner-aligned upscale needs dst > 1 per axis");
    debug_assert!(dst_w >= src.width() && dst_h >= src.height());

    let mut cur = src;
    loop {
        let next_w = if cur.width() >= 2 && (cur.width() - 1) * 2 + 1 <= dst_w {
            (cur.width() - 1) * 2 + 1
        } else {
            cur.width()
        };
        let next_h = if cur.height() >= 2 && (cur.height() - 1) * 2 + 1 <= dst_h {
            (cur.height() - 1) * 2 + 1
        } else {
            cur.height()
        };
        if next_w == cur.width() && next_h == cur.height() {
            break;
        }
        cur = corner_pass(&cur, next_w, next_h);
    }
    if cur.width() == dst_w && cur.height() == dst_h {
        return cur;
    }
    corner_pass(&cur, dst_w, dst_h)
}

/// Center-aligned bilinear downscale. Each axis pre-halves independently
/// while more than a 2x shrink remains on it. Both axes halving together
/// over even dimensions take the integer box filter; otherwise a bilinear
/// half-pass covers the axes that still need it.
fn scaled_down<P: LinearPixel + BoxPixel>(src: Raster<P>, dst_w: usize, dst_h: usize) -> Raster<P> {
    let mut cur = src;
    loop {
        let halve_w = cur.width() >= dst_w * 2;
        let halve_h = cur.height() >= dst_h * 2;
        if !halve_w && !halve_h {
            break;
        }
        if halve_w && halve_h && cur.width() % 2 == 0 && cur.height() % 2 == 0 {
            cur = reduce_2to1(&cur);
            continue;
        }
        let next_w = if halve_w { cur.width() / 2 } else { cur.width() };
        let next_h = if halve_h { cur.height() / 2 } else { cur.height() };
        cur = center_pass(&cur, next_w, next_h);
    }
    if cur.width() == dst_w && cur.height() == dst_h {
        return cur;
    }
    center_pass(&cur, dst_w, dst_h)
}

/// Resize a linear raster to `dst_w` x `dst_h`.
///
/// Identity sizes return the source unchanged. Axes growing use the
/// corner-aligned upscale; axes shrinking use the center-aligned downscale.
/// A mixed resize (one axis up, one down) upscales first, then downscales.
#[must_use]
pub fn scaled<P: LinearPixel + BoxPixel>(src: Raster<P>, dst_w: usize, dst_h: usize) -> Raster<P> {
    if src.width() == dst_w && src.height() == dst_h {
        return src;
    }
    debug!(
        src_w = src.width(),
        src_h = src.height(),
        dst_w,
        dst_h,
        "Resampling raster"
    );
    if dst_w >= src.width() && dst_h >= src.height() {
        return scaled_up(src, dst_w, dst_h);
    }
    if dst_w <= src.width() && dst_h <= src.height() {
        return scaled_down(src, dst_w, dst_h);
    }
    // Mixed axes: grow both to the per-axis maximum, then shrink.
    let mid_w = dst_w.max(src.width());
    let mid_h = dst_h.max(src.height());
    let mid = scaled_up(src, mid_w, mid_h);
    scaled_down(mid, dst_w, dst_h)
}

/// Resize a `u16` raster, reducing in integer arithmetic while an exact 2:1
/// step fits and finishing any fractional remainder through `f32`.
#[must_use]
pub fn scaled_u16(src: Raster<u16>, dst_w: usize, dst_h: usize) -> Raster<u16> {
    let mut cur = src;
    while cur.width() % 2 == 0
        && cur.height() % 2 == 0
        && cur.width() / 2 >= dst_w
        && cur.height() / 2 >= dst_h
    {
        cur = reduce_2to1(&cur);
    }
    if cur.width() == dst_w && cur.height() == dst_h {
        return cur;
    }
    let float = cur.convert(f32::from);
    scaled(float, dst_w, dst_h).convert(|v| {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let q = (v + 0.5).clamp(0.0, f32::from(u16::MAX)) as u16;
        q
    })
}

/// Resize an RGB8 raster, reducing in integer arithmetic while an exact 2:1
/// step fits and finishing any fractional remainder through float RGB.
#[must_use]
pub fn scaled_rgb8(src: Raster<Rgb8>, dst_w: usize, dst_h: usize) -> Raster<Rgb8> {
    let mut cur = src;
    while cur.width() % 2 == 0
        && cur.height() % 2 == 0
        && cur.width() / 2 >= dst_w
        && cur.height() / 2 >= dst_h
    {
        cur = reduce_2to1(&cur);
    }
    if cur.width() == dst_w && cur.height() == dst_h {
        return cur;
    }
    let float = cur.convert(|p| RgbF32::new(f32::from(p.r), f32::from(p.g), f32::from(p.b)));
    scaled(float, dst_w, dst_h).convert(|p| {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let q = Rgb8::new(
            (p.r + 0.5).clamp(0.0, 255.0) as u8,
            (p.g + 0.5).clamp(0.0, 255.0) as u8,
            (p.b + 0.5).clamp(0.0, 255.0) as u8,
        );
        q
    })
}
