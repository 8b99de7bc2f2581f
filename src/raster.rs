//! Generic in-memory raster buffers.
//!
//! [`Raster<P>`] is a row-major 2D grid of pixels generic over the [`Pixel`]
//! trait, which abstracts channel count, bytes per channel and the
//! little-endian byte layout used for raw I/O. Supported pixel types are the
//! ones the conversion pipeline actually moves around: `u8`, `u16`, `f32`,
//! [`Rgb8`] and [`RgbF32`].
//!
//! All sub-rectangle operations take a [`Rect`] and fail with
//! [`RasterError::RectOutOfBounds`] rather than panicking; the raw-byte
//! accessors are the seam the codec layer reads and writes through.

use tracing::warn;

/// Axis-aligned pixel rectangle. `x`/`y` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub w: usize,
    pub h: usize,
}

impl Rect {
    #[must_use]
    pub const fn new(x: usize, y: usize, w: usize, h: usize) -> Self {
        Self { x, y, w, h }
    }

    /// Pixel area of the rectangle.
    #[inline]
    #[must_use]
    pub const fn area(&self) -> usize {
        self.w * self.h
    }

    /// Whether the rectangle lies entirely within a `width` x `height` grid.
    #[inline]
    #[must_use]
    pub const fn fits_within(&self, width: usize, height: usize) -> bool {
        self.x + self.w <= width && self.y + self.h <= height
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.w, self.h, self.x, self.y)
    }
}

/// Error type for raster buffer operations.
#[derive(Debug)]
pub enum RasterError {
    /// A sub-rectangle extends past the raster bounds
    RectOutOfBounds { rect: Rect, width: usize, height: usize },
    /// A raw byte buffer's length disagrees with the pixel region it maps to
    ByteLengthMismatch { expected: usize, actual: usize },
    /// A row range extends past the raster height
    RowsOutOfBounds { row: usize, count: usize, height: usize },
}

impl std::fmt::Display for RasterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RectOutOfBounds { rect, width, height } => {
                write!(f, "Rect {rect} outside raster bounds {width}x{height}")
            }
            Self::ByteLengthMismatch { expected, actual } => {
                write!(f, "Raw byte buffer length {actual}, expected {expected}")
            }
            Self::RowsOutOfBounds { row, count, height } => {
                write!(f, "Rows {row}..{} outside raster height {height}", row + count)
            }
        }
    }
}

impl std::error::Error for RasterError {}

/// Pixel sample layout. Implemented for the channel/depth combinations the
/// conversion pipeline uses.
pub trait Pixel: Copy + Default + PartialEq + std::fmt::Debug {
    const CHANNELS: usize;
    const BYTES_PER_CHANNEL: usize;
    const IS_FLOAT: bool;
    const BYTES_PER_PIXEL: usize = Self::CHANNELS * Self::BYTES_PER_CHANNEL;

    /// Serialize this pixel little-endian into `out` (exactly
    /// `BYTES_PER_PIXEL` bytes).
    fn write_bytes(&self, out: &mut [u8]);

    /// Deserialize a pixel from little-endian bytes.
    fn read_bytes(bytes: &[u8]) -> Self;
}

impl Pixel for u8 {
    const CHANNELS: usize = 1;
    const BYTES_PER_CHANNEL: usize = 1;
    const IS_FLOAT: bool = false;

    #[inline]
    fn write_bytes(&self, out: &mut [u8]) {
        out[0] = *self;
    }

    #[inline]
    fn read_bytes(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

impl Pixel for u16 {
    const CHANNELS: usize = 1;
    const BYTES_PER_CHANNEL: usize = 2;
    const IS_FLOAT: bool = false;

    #[inline]
    fn write_bytes(&self, out: &mut [u8]) {
        out[..2].copy_from_slice(&self.to_le_bytes());
    }

    #[inline]
    fn read_bytes(bytes: &[u8]) -> Self {
        u16::from_le_bytes([bytes[0], bytes[1]])
    }
}

impl Pixel for f32 {
    const CHANNELS: usize = 1;
    const BYTES_PER_CHANNEL: usize = 4;
    const IS_FLOAT: bool = true;

    #[inline]
    fn write_bytes(&self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_le_bytes());
    }

    #[inline]
    fn read_bytes(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// 8-bit RGB pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb8 {
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Pixel for Rgb8 {
    const CHANNELS: usize = 3;
    const BYTES_PER_CHANNEL: usize = 1;
    const IS_FLOAT: bool = false;

    #[inline]
    fn write_bytes(&self, out: &mut [u8]) {
        out[0] = self.r;
        out[1] = self.g;
        out[2] = self.b;
    }

    #[inline]
    fn read_bytes(bytes: &[u8]) -> Self {
        Self { r: bytes[0], g: bytes[1], b: bytes[2] }
    }
}

/// 32-bit float RGB pixel, the intermediate type for fractional color resizes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RgbF32 {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl RgbF32 {
    #[must_use]
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }
}

impl Pixel for RgbF32 {
    const CHANNELS: usize = 3;
    const BYTES_PER_CHANNEL: usize = 4;
    const IS_FLOAT: bool = true;

    #[inline]
    fn write_bytes(&self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.r.to_le_bytes());
        out[4..8].copy_from_slice(&self.g.to_le_bytes());
        out[8..12].copy_from_slice(&self.b.to_le_bytes());
    }

    #[inline]
    fn read_bytes(bytes: &[u8]) -> Self {
        Self {
            r: f32::read_bytes(&bytes[0..4]),
            g: f32::read_bytes(&bytes[4..8]),
            b: f32::read_bytes(&bytes[8..12]),
        }
    }
}

/// Quarter-turn rotation applied to a whole raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Cw90,
    Cw180,
    Cw270,
}

/// Row-major 2D pixel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster<P: Pixel> {
    width: usize,
    height: usize,
    pixels: Vec<P>,
}

impl<P: Pixel> Raster<P> {
    /// Allocate a raster of default-valued pixels.
    #[must_use]
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height, pixels: vec![P::default(); width * height] }
    }

    /// Build a raster from an existing pixel vector.
    ///
    /// # Errors
    /// Fails if the vector length is not `width * height`.
    pub fn from_pixels(width: usize, height: usize, pixels: Vec<P>) -> Result<Self, RasterError> {
        if pixels.len() != width * height {
            return Err(RasterError::ByteLengthMismatch {
                expected: width * height,
                actual: pixels.len(),
            });
        }
        Ok(Self { width, height, pixels })
    }

    #[inline]
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    #[inline]
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Full-raster bounds as a [`Rect`] at the origin.
    #[inline]
    #[must_use]
    pub const fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    #[inline]
    #[must_use]
    pub fn pixels(&self) -> &[P] {
        &self.pixels
    }

    #[inline]
    #[must_use]
    pub fn pixels_mut(&mut self) -> &mut [P] {
        &mut self.pixels
    }

    #[inline]
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> P {
        self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: P) {
        self.pixels[y * self.width + x] = value;
    }

    /// Borrow `count` full rows starting at `row`.
    ///
    /// # Errors
    /// Fails if the row range exceeds the raster height.
    pub fn rows(&self, row: usize, count: usize) -> Result<&[P], RasterError> {
        if row + count > self.height {
            return Err(RasterError::RowsOutOfBounds { row, count, height: self.height });
        }
        Ok(&self.pixels[row * self.width..(row + count) * self.width])
    }

    /// Overwrite `count` full rows starting at `row`.
    ///
    /// # Errors
    /// Fails if the row range exceeds the raster height or the slice length
    /// disagrees with it.
    pub fn set_rows(&mut self, row: usize, count: usize, src: &[P]) -> Result<(), RasterError> {
        if row + count > self.height {
            return Err(RasterError::RowsOutOfBounds { row, count, height: self.height });
        }
        let expected = count * self.width;
        if src.len() != expected {
            return Err(RasterError::ByteLengthMismatch { expected, actual: src.len() });
        }
        self.pixels[row * self.width..(row + count) * self.width].copy_from_slice(src);
        Ok(())
    }

    /// Copy a sub-rectangle into a new raster.
    ///
    /// # Errors
    /// Fails if `rect` extends past the raster bounds.
    pub fn crop(&self, rect: Rect) -> Result<Raster<P>, RasterError> {
        self.check_rect(rect)?;
        let mut out = Raster::new(rect.w, rect.h);
        for y in 0..rect.h {
            let src_start = (rect.y + y) * self.width + rect.x;
            let dst_start = y * rect.w;
            out.pixels[dst_start..dst_start + rect.w]
                .copy_from_slice(&self.pixels[src_start..src_start + rect.w]);
        }
        Ok(out)
    }

    /// Overwrite a sub-rectangle from another raster of matching size.
    ///
    /// # Errors
    /// Fails if `rect` extends past the bounds or `src` has a different size.
    pub fn set_rect(&mut self, rect: Rect, src: &Raster<P>) -> Result<(), RasterError> {
        self.check_rect(rect)?;
        if src.width != rect.w || src.height != rect.h {
            return Err(RasterError::ByteLengthMismatch {
                expected: rect.area(),
                actual: src.pixels.len(),
            });
        }
        for y in 0..rect.h {
            let dst_start = (rect.y + y) * self.width + rect.x;
            let src_start = y * rect.w;
            self.pixels[dst_start..dst_start + rect.w]
                .copy_from_slice(&src.pixels[src_start..src_start + rect.w]);
        }
        Ok(())
    }

    /// Reset every pixel to a constant value.
    pub fn clear(&mut self, value: P) {
        self.pixels.fill(value);
    }

    /// Reset a sub-rectangle to a constant value.
    ///
    /// # Errors
    /// Fails if `rect` extends past the raster bounds.
    pub fn clear_rect(&mut self, rect: Rect, value: P) -> Result<(), RasterError> {
        self.check_rect(rect)?;
        for y in rect.y..rect.y + rect.h {
            self.pixels[y * self.width + rect.x..y * self.width + rect.x + rect.w].fill(value);
        }
        Ok(())
    }

    /// Serialize `count` full rows starting at `row` into little-endian bytes.
    ///
    /// # Errors
    /// Fails if the row range exceeds the raster height.
    pub fn raw_rows(&self, row: usize, count: usize) -> Result<Vec<u8>, RasterError> {
        let src = self.rows(row, count)?;
        let mut out = vec![0u8; src.len() * P::BYTES_PER_PIXEL];
        for (px, chunk) in src.iter().zip(out.chunks_exact_mut(P::BYTES_PER_PIXEL)) {
            px.write_bytes(chunk);
        }
        Ok(out)
    }

    /// Overwrite `count` full rows starting at `row` from little-endian bytes.
    ///
    /// # Errors
    /// Fails if the row range exceeds the height or the byte length is wrong.
    pub fn set_raw_rows(&mut self, row: usize, count: usize, bytes: &[u8]) -> Result<(), RasterError> {
        if row + count > self.height {
            return Err(RasterError::RowsOutOfBounds { row, count, height: self.height });
        }
        let expected = count * self.width * P::BYTES_PER_PIXEL;
        if bytes.len() != expected {
            return Err(RasterError::ByteLengthMismatch { expected, actual: bytes.len() });
        }
        let dst = &mut self.pixels[row * self.width..(row + count) * self.width];
        for (px, chunk) in dst.iter_mut().zip(bytes.chunks_exact(P::BYTES_PER_PIXEL)) {
            *px = P::read_bytes(chunk);
        }
        Ok(())
    }

    /// Serialize the whole raster into little-endian bytes.
    #[must_use]
    pub fn to_raw(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.pixels.len() * P::BYTES_PER_PIXEL];
        for (px, chunk) in self.pixels.iter().zip(out.chunks_exact_mut(P::BYTES_PER_PIXEL)) {
            px.write_bytes(chunk);
        }
        out
    }

    /// Serialize a sub-rectangle into little-endian bytes.
    ///
    /// # Errors
    /// Fails if `rect` extends past the raster bounds.
    pub fn raw_rect(&self, rect: Rect) -> Result<Vec<u8>, RasterError> {
        self.check_rect(rect)?;
        let mut out = vec![0u8; rect.area() * P::BYTES_PER_PIXEL];
        let row_bytes = rect.w * P::BYTES_PER_PIXEL;
        for y in 0..rect.h {
            let src = &self.pixels[(rect.y + y) * self.width + rect.x..][..rect.w];
            let dst = &mut out[y * row_bytes..(y + 1) * row_bytes];
            for (px, chunk) in src.iter().zip(dst.chunks_exact_mut(P::BYTES_PER_PIXEL)) {
                px.write_bytes(chunk);
            }
        }
        Ok(out)
    }

    /// Reverse the row order in place.
    pub fn flip_vertical(&mut self) {
        let w = self.width;
        let h = self.height;
        for y in 0..h / 2 {
            let (top, rest) = self.pixels.split_at_mut((y + 1) * w);
            let bottom_start = (h - 1 - y) * w - (y + 1) * w;
            top[y * w..].swap_with_slice(&mut rest[bottom_start..bottom_start + w]);
        }
    }

    /// Reverse each row in place.
    pub fn flip_horizontal(&mut self) {
        for row in self.pixels.chunks_exact_mut(self.width) {
            row.reverse();
        }
    }

    /// Return a copy rotated clockwise by the given quarter turn.
    #[must_use]
    pub fn rotated(&self, rotation: Rotation) -> Raster<P> {
        match rotation {
            Rotation::Cw90 => {
                let mut out = Raster::new(self.height, self.width);
                for y in 0..self.height {
                    for x in 0..self.width {
                        out.set(self.height - 1 - y, x, self.get(x, y));
                    }
                }
                out
            }
            Rotation::Cw180 => {
                let mut out = self.clone();
                out.pixels.reverse();
                out
            }
            Rotation::Cw270 => {
                let mut out = Raster::new(self.height, self.width);
                for y in 0..self.height {
                    for x in 0..self.width {
                        out.set(y, self.width - 1 - x, self.get(x, y));
                    }
                }
                out
            }
        }
    }

    /// Map every pixel through `f` into a raster of another pixel type.
    #[must_use]
    pub fn convert<Q: Pixel, F: Fn(P) -> Q>(&self, f: F) -> Raster<Q> {
        Raster {
            width: self.width,
            height: self.height,
            pixels: self.pixels.iter().map(|&p| f(p)).collect(),
        }
    }

    fn check_rect(&self, rect: Rect) -> Result<(), RasterError> {
        if rect.fits_within(self.width, self.height) {
            Ok(())
        } else {
            Err(RasterError::RectOutOfBounds {
                rect,
                width: self.width,
                height: self.height,
            })
        }
    }
}

impl Raster<f32> {
    /// Minimum and maximum sample, ignoring non-finite values.
    ///
    /// Returns `(0.0, 0.0)` for an empty or all-non-finite raster, with a
    /// warning in the latter case.
    #[must_use]
    pub fn finite_extrema(&self) -> (f32, f32) {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &v in &self.pixels {
            if v.is_finite() {
                min = min.min(v);
                max = max.max(v);
            }
        }
        if min > max {
            if !self.pixels.is_empty() {
                warn!("Raster has no finite samples; extrema default to 0");
            }
            return (0.0, 0.0);
        }
        (min, max)
    }

    /// Convert to `u16` with an offset and scale: `(v + trans) * scale + 0.5`.
    #[must_use]
    pub fn to_u16_scaled(&self, trans: f32, scale: f32) -> Raster<u16> {
        self.convert(|v| {
            let scaled = (v + trans) * scale + 0.5;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let q = scaled.clamp(0.0, f32::from(u16::MAX)) as u16;
            q
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: usize, h: usize) -> Raster<f32> {
        let mut r = Raster::new(w, h);
        for y in 0..h {
            for x in 0..w {
                #[allow(clippy::cast_precision_loss)]
                r.set(x, y, (y * w + x) as f32);
            }
        }
        r
    }

    #[test]
    fn test_crop_and_set_rect_roundtrip() {
        let src = gradient(8, 6);
        let rect = Rect::new(2, 1, 4, 3);
        let cropped = src.crop(rect).unwrap();
        assert_eq!(cropped.width(), 4);
        assert_eq!(cropped.height(), 3);
        assert_eq!(cropped.get(0, 0), src.get(2, 1));
        assert_eq!(cropped.get(3, 2), src.get(5, 3));

        let mut dst = Raster::<f32>::new(8, 6);
        dst.set_rect(rect, &cropped).unwrap();
        assert_eq!(dst.get(2, 1), src.get(2, 1));
        assert_eq!(dst.get(5, 3), src.get(5, 3));
        assert_eq!(dst.get(0, 0), 0.0);
    }

    #[test]
    fn test_crop_out_of_bounds_fails() {
        let src = gradient(8, 6);
        assert!(matches!(
            src.crop(Rect::new(5, 0, 4, 3)),
            Err(RasterError::RectOutOfBounds { .. })
        ));
        assert!(matches!(
            src.crop(Rect::new(0, 4, 2, 3)),
            Err(RasterError::RectOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_raw_rows_roundtrip_u16() {
        let mut src = Raster::<u16>::new(4, 3);
        for y in 0..3 {
            for x in 0..4 {
                src.set(x, y, (y * 4 + x) as u16 * 1000);
            }
        }
        let bytes = src.raw_rows(1, 2).unwrap();
        assert_eq!(bytes.len(), 4 * 2 * 2);
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 4000);

        let mut dst = Raster::<u16>::new(4, 3);
        dst.set_raw_rows(1, 2, &bytes).unwrap();
        assert_eq!(dst.get(0, 1), 4000);
        assert_eq!(dst.get(3, 2), 11_000);
        assert_eq!(dst.get(0, 0), 0);
    }

    #[test]
    fn test_raw_rect_rgb8() {
        let mut src = Raster::<Rgb8>::new(3, 2);
        src.set(1, 0, Rgb8::new(10, 20, 30));
        src.set(2, 1, Rgb8::new(40, 50, 60));
        let bytes = src.raw_rect(Rect::new(1, 0, 2, 2)).unwrap();
        assert_eq!(bytes.len(), 2 * 2 * 3);
        assert_eq!(&bytes[0..3], &[10, 20, 30]);
        assert_eq!(&bytes[9..12], &[40, 50, 60]);
    }

    #[test]
    fn test_flip_vertical() {
        let mut r = gradient(3, 3);
        r.flip_vertical();
        assert_eq!(r.get(0, 0), 6.0);
        assert_eq!(r.get(2, 0), 8.0);
        assert_eq!(r.get(1, 1), 4.0);
        assert_eq!(r.get(0, 2), 0.0);
    }

    #[test]
    fn test_flip_horizontal() {
        let mut r = gradient(3, 2);
        r.flip_horizontal();
        assert_eq!(r.get(0, 0), 2.0);
        assert_eq!(r.get(2, 0), 0.0);
        assert_eq!(r.get(0, 1), 5.0);
    }

    #[test]
    fn test_rotate_cw90() {
        // 2x3 gradient rotated cw gives 3x2
        let r = gradient(2, 3).rotated(Rotation::Cw90);
        assert_eq!(r.width(), 3);
        assert_eq!(r.height(), 2);
        // top-left of rotated = bottom-left of source
        assert_eq!(r.get(0, 0), 4.0);
        assert_eq!(r.get(2, 0), 0.0);
        assert_eq!(r.get(0, 1), 5.0);
    }

    #[test]
    fn test_rotate_cw180_twice_is_identity() {
        let r = gradient(4, 3);
        let twice = r.rotated(Rotation::Cw180).rotated(Rotation::Cw180);
        assert_eq!(r, twice);
    }

    #[test]
    fn test_rotate_cw270_is_cw90_inverse() {
        let r = gradient(5, 2);
        let back = r.rotated(Rotation::Cw90).rotated(Rotation::Cw270);
        assert_eq!(r, back);
    }

    #[test]
    fn test_finite_extrema_skips_nan() {
        let mut r = Raster::<f32>::new(2, 2);
        r.set(0, 0, f32::NAN);
        r.set(1, 0, -3.0);
        r.set(0, 1, 7.5);
        r.set(1, 1, f32::INFINITY);
        assert_eq!(r.finite_extrema(), (-3.0, 7.5));
    }

    #[test]
    fn test_to_u16_scaled() {
        let mut r = Raster::<f32>::new(2, 1);
        r.set(0, 0, -5.0);
        r.set(1, 0, 95.0);
        // trans = 5, scale maps [0, 100] onto [0, 65535]
        let scale = f32::from(u16::MAX) / 100.0;
        let q = r.to_u16_scaled(5.0, scale);
        assert_eq!(q.get(0, 0), 0);
        assert_eq!(q.get(1, 0), u16::MAX);
    }

    #[test]
    fn test_clear_fills_with_value() {
        let mut r = Raster::<u8>::new(3, 2);
        r.set(2, 1, 7);
        r.clear(42);
        assert!(r.pixels().iter().all(|&p| p == 42));
    }

    #[test]
    fn test_clear_rect() {
        let mut r = Raster::<u8>::new(4, 4);
        r.pixels_mut().fill(9);
        r.clear_rect(Rect::new(1, 1, 2, 2), 0).unwrap();
        assert_eq!(r.get(0, 0), 9);
        assert_eq!(r.get(1, 1), 0);
        assert_eq!(r.get(2, 2), 0);
        assert_eq!(r.get(3, 3), 9);
    }
}
