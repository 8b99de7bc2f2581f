//! Raster container access.
//!
//! The conversion pipeline never talks to the `tiff` crate directly; it goes
//! through the [`RasterCodec`] trait, which exposes exactly what the
//! pipeline needs: an [`ImageDescriptor`], raw tag lookups for the
//! georeferencing metadata, and strip-ordered row reads as raw bytes. That
//! keeps the pipeline testable against in-memory mock codecs and keeps the
//! container format swappable.
//!
//! [`TiffCodec`] is the production implementation over the pure-Rust `tiff`
//! crate; [`write_color_tile`] writes the LZW-compressed RGB output tiles.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::RGB8;
use tiff::encoder::compression::Lzw;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;
use tracing::debug;

use crate::raster::{Raster, Rgb8};

// TIFF tags the pipeline reads or writes.
pub const TAG_MIN_SAMPLE_VALUE: u16 = 280;
pub const TAG_MAX_SAMPLE_VALUE: u16 = 281;
pub const TAG_SMIN_SAMPLE_VALUE: u16 = 340;
pub const TAG_SMAX_SAMPLE_VALUE: u16 = 341;
pub const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
pub const TAG_MODEL_TIE_POINT: u16 = 33922;
pub const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
pub const TAG_GEO_DOUBLE_PARAMS: u16 = 34736;
pub const TAG_GEO_ASCII_PARAMS: u16 = 34737;
pub const TAG_GDAL_NODATA: u16 = 42113;

/// Rows per strip written into output color tiles.
pub const OUTPUT_ROWS_PER_STRIP: usize = 32;

/// How samples of one channel are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    UnsignedInt,
    Float,
}

/// Row order of the stored raster relative to the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RasterOrientation {
    /// Row 0 is the top of the scene (TIFF orientation 1)
    #[default]
    TopLeft,
    /// Row 0 is the bottom of the scene (TIFF orientation 4)
    BottomLeft,
}

/// Shape and encoding of the image a codec serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub bits_per_channel: usize,
    pub sample_kind: SampleKind,
    pub orientation: RasterOrientation,
    pub rows_per_strip: usize,
}

impl ImageDescriptor {
    /// Bytes in one full row.
    #[inline]
    #[must_use]
    pub const fn row_bytes(&self) -> usize {
        self.width * self.channels * (self.bits_per_channel / 8)
    }

    /// Bytes in one channel sample.
    #[inline]
    #[must_use]
    pub const fn sample_bytes(&self) -> usize {
        self.bits_per_channel / 8
    }
}

/// Error type for codec operations.
#[derive(Debug)]
pub enum CodecError {
    /// The container's pixel layout is not one the pipeline supports
    UnsupportedLayout(String),
    /// A tag was present but had the wrong type or arity
    BadTagValue { tag: u16, detail: String },
    /// A row read went outside the image
    RowsOutOfBounds { row: usize, count: usize, height: usize },
    Tiff(tiff::TiffError),
    Io(std::io::Error),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLayout(detail) => write!(f, "Unsupported raster layout: {detail}"),
            Self::BadTagValue { tag, detail } => write!(f, "Bad value for tag {tag}: {detail}"),
            Self::RowsOutOfBounds { row, count, height } => {
                write!(f, "Rows {row}..{} outside image height {height}", row + count)
            }
            Self::Tiff(e) => write!(f, "TIFF error: {e}"),
            Self::Io(e) => write!(f, "Codec I/O error: {e}"),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tiff(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tiff::TiffError> for CodecError {
    fn from(e: tiff::TiffError) -> Self {
        Self::Tiff(e)
    }
}

impl From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Read access to a georeferenced raster container.
///
/// Row reads return raw sample bytes in the container's storage order; if
/// [`byte_swapped`](Self::byte_swapped) reports `true` the caller swaps each
/// multi-byte sample to native order via [`swap_bytes_in_place`].
pub trait RasterCodec {
    /// Shape and encoding of the image.
    ///
    /// # Errors
    /// Fails if the container cannot be decoded or its layout is unsupported.
    fn descriptor(&mut self) -> Result<ImageDescriptor, CodecError>;

    /// Look up a tag as an unsigned 16-bit array. `None` when absent.
    ///
    /// # Errors
    /// Fails if the tag is present with an incompatible type.
    fn tag_u16_array(&mut self, tag: u16) -> Result<Option<Vec<u16>>, CodecError>;

    /// Look up a tag as a double array. `None` when absent.
    ///
    /// # Errors
    /// Fails if the tag is present with an incompatible type.
    fn tag_f64_array(&mut self, tag: u16) -> Result<Option<Vec<f64>>, CodecError>;

    /// Look up a tag as an ascii string. `None` when absent.
    ///
    /// # Errors
    /// Fails if the tag is present with an incompatible type.
    fn tag_ascii(&mut self, tag: u16) -> Result<Option<String>, CodecError>;

    /// Copy `count` rows starting at `row` into `out` as raw sample bytes.
    /// `out` must be exactly `count * row_bytes` long.
    ///
    /// # Errors
    /// Fails if the row range exceeds the image or `out` is missized.
    fn read_rows(&mut self, row: usize, count: usize, out: &mut [u8]) -> Result<(), CodecError>;

    /// Whether multi-byte samples arrive opposite to native byte order.
    fn byte_swapped(&self) -> bool {
        false
    }
}

/// Swap every `sample_bytes`-wide sample in `buf` between byte orders.
///
/// Supports 2- and 4-byte samples; 1-byte samples are a no-op.
pub fn swap_bytes_in_place(buf: &mut [u8], sample_bytes: usize) {
    match sample_bytes {
        1 => {}
        2 => {
            for chunk in buf.chunks_exact_mut(2) {
                chunk.swap(0, 1);
            }
        }
        4 => {
            for chunk in buf.chunks_exact_mut(4) {
                chunk.swap(0, 3);
                chunk.swap(1, 2);
            }
        }
        other => {
            debug_assert!(false, "unsupported sample width {other}");
        }
    }
}

/// Production codec over the `tiff` crate.
///
/// The whole image is decoded once, on the first row read, and served from
/// memory afterwards; samples are stored native-order so
/// [`byte_swapped`](RasterCodec::byte_swapped) is always `false`.
pub struct TiffCodec {
    decoder: Decoder<BufReader<File>>,
    decoded: Option<Vec<u8>>,
    descriptor: Option<ImageDescriptor>,
}

impl TiffCodec {
    /// Open a TIFF file for reading.
    ///
    /// # Errors
    /// Fails if the file cannot be opened or is not a TIFF.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CodecError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Opening TIFF");
        let reader = BufReader::new(File::open(path)?);
        let decoder = Decoder::new(reader)?;
        Ok(Self { decoder, decoded: None, descriptor: None })
    }

    fn build_descriptor(&mut self) -> Result<ImageDescriptor, CodecError> {
        let (width, height) = self.decoder.dimensions()?;
        let colortype = self.decoder.colortype()?;

        let (channels, bits, kind) = match colortype {
            tiff::ColorType::Gray(bits) => {
                let kind = if bits == 32 { SampleKind::Float } else { SampleKind::UnsignedInt };
                (1, usize::from(bits), kind)
            }
            tiff::ColorType::RGB(bits) => (3, usize::from(bits), SampleKind::UnsignedInt),
            other => {
                return Err(CodecError::UnsupportedLayout(format!(
                    "color type {other:?} not supported"
                )));
            }
        };

        // TIFF orientation 4 is bottom-left; everything else treated as 1
        let orientation = match self.decoder.find_tag(Tag::Orientation)? {
            Some(v) => {
                if v.into_u16()? == 4 {
                    RasterOrientation::BottomLeft
                } else {
                    RasterOrientation::TopLeft
                }
            }
            None => RasterOrientation::TopLeft,
        };

        let rows_per_strip = match self.decoder.find_tag(Tag::RowsPerStrip)? {
            Some(v) => v.into_u32()? as usize,
            None => height as usize,
        };

        Ok(ImageDescriptor {
            width: width as usize,
            height: height as usize,
            channels,
            bits_per_channel: bits,
            sample_kind: kind,
            orientation,
            rows_per_strip,
        })
    }

    fn ensure_decoded(&mut self) -> Result<(), CodecError> {
        if self.decoded.is_some() {
            return Ok(());
        }
        let bytes = match self.decoder.read_image()? {
            DecodingResult::U8(data) => data,
            DecodingResult::U16(data) => {
                let mut out = Vec::with_capacity(data.len() * 2);
                for v in data {
                    out.extend_from_slice(&v.to_ne_bytes());
                }
                out
            }
            DecodingResult::F32(data) => {
                let mut out = Vec::with_capacity(data.len() * 4);
                for v in data {
                    out.extend_from_slice(&v.to_ne_bytes());
                }
                out
            }
            other => {
                return Err(CodecError::UnsupportedLayout(format!(
                    "decoded sample type {other:?} not supported"
                )));
            }
        };
        self.decoded = Some(bytes);
        Ok(())
    }
}

impl RasterCodec for TiffCodec {
    fn descriptor(&mut self) -> Result<ImageDescriptor, CodecError> {
        if let Some(d) = self.descriptor {
            return Ok(d);
        }
        let d = self.build_descriptor()?;
        self.descriptor = Some(d);
        Ok(d)
    }

    fn tag_u16_array(&mut self, tag: u16) -> Result<Option<Vec<u16>>, CodecError> {
        match self.decoder.find_tag(Tag::Unknown(tag))? {
            Some(v) => {
                let vec = v.into_u16_vec().map_err(|e| CodecError::BadTagValue {
                    tag,
                    detail: e.to_string(),
                })?;
                Ok(Some(vec))
            }
            None => Ok(None),
        }
    }

    fn tag_f64_array(&mut self, tag: u16) -> Result<Option<Vec<f64>>, CodecError> {
        match self.decoder.find_tag(Tag::Unknown(tag))? {
            Some(v) => {
                let vec = v.into_f64_vec().map_err(|e| CodecError::BadTagValue {
                    tag,
                    detail: e.to_string(),
                })?;
                Ok(Some(vec))
            }
            None => Ok(None),
        }
    }

    fn tag_ascii(&mut self, tag: u16) -> Result<Option<String>, CodecError> {
        match self.decoder.find_tag(Tag::Unknown(tag))? {
            Some(v) => {
                let s = v.into_string().map_err(|e| CodecError::BadTagValue {
                    tag,
                    detail: e.to_string(),
                })?;
                Ok(Some(s))
            }
            None => Ok(None),
        }
    }

    fn read_rows(&mut self, row: usize, count: usize, out: &mut [u8]) -> Result<(), CodecError> {
        let desc = self.descriptor()?;
        if row + count > desc.height {
            return Err(CodecError::RowsOutOfBounds { row, count, height: desc.height });
        }
        self.ensure_decoded()?;
        let row_bytes = desc.row_bytes();
        debug_assert_eq!(out.len(), count * row_bytes);
        // Unreachable: ensure_decoded either filled the buffer or errored
        let data = self.decoded.as_ref().ok_or_else(|| {
            CodecError::UnsupportedLayout("image not decoded".to_string())
        })?;
        out.copy_from_slice(&data[row * row_bytes..(row + count) * row_bytes]);
        Ok(())
    }
}

/// Write one RGB color tile as an LZW-compressed striped TIFF.
///
/// # Errors
/// Fails on I/O or TIFF encoding errors.
pub fn write_color_tile(path: &Path, tile: &Raster<Rgb8>) -> Result<(), CodecError> {
    debug!(path = %path.display(), w = tile.width(), h = tile.height(), "Writing color tile");
    let file = File::create(path)?;
    let mut encoder = TiffEncoder::new(file)?;

    let width = u32::try_from(tile.width()).map_err(|_| {
        CodecError::UnsupportedLayout(format!("tile width {} exceeds u32", tile.width()))
    })?;
    let height = u32::try_from(tile.height()).map_err(|_| {
        CodecError::UnsupportedLayout(format!("tile height {} exceeds u32", tile.height()))
    })?;

    let mut image = encoder.new_image_with_compression::<RGB8, _>(width, height, Lzw)?;
    image.rows_per_strip(OUTPUT_ROWS_PER_STRIP as u32)?;
    image.write_data(&tile.to_raw())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_bytes_u16() {
        let mut buf = vec![0x12, 0x34, 0xAB, 0xCD];
        swap_bytes_in_place(&mut buf, 2);
        assert_eq!(buf, vec![0x34, 0x12, 0xCD, 0xAB]);
    }

    #[test]
    fn test_swap_bytes_f32() {
        let mut buf = 1.5f32.to_be_bytes().to_vec();
        swap_bytes_in_place(&mut buf, 4);
        assert_eq!(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]), 1.5);
    }

    #[test]
    fn test_swap_bytes_u8_noop() {
        let mut buf = vec![1, 2, 3];
        swap_bytes_in_place(&mut buf, 1);
        assert_eq!(buf, vec![1, 2, 3]);
    }

    #[test]
    fn test_descriptor_row_bytes() {
        let d = ImageDescriptor {
            width: 100,
            height: 50,
            channels: 3,
            bits_per_channel: 8,
            sample_kind: SampleKind::UnsignedInt,
            orientation: RasterOrientation::TopLeft,
            rows_per_strip: 32,
        };
        assert_eq!(d.row_bytes(), 300);
        assert_eq!(d.sample_bytes(), 1);
    }

    #[test]
    fn test_color_tile_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.tif");

        let mut tile = Raster::<Rgb8>::new(64, 64);
        for y in 0..64 {
            for x in 0..64 {
                tile.set(x, y, Rgb8::new(x as u8 * 4, y as u8 * 4, 128));
            }
        }
        write_color_tile(&path, &tile).unwrap();

        let mut codec = TiffCodec::open(&path).unwrap();
        let desc = codec.descriptor().unwrap();
        assert_eq!(desc.width, 64);
        assert_eq!(desc.height, 64);
        assert_eq!(desc.channels, 3);
        assert_eq!(desc.bits_per_channel, 8);
        assert!(!codec.byte_swapped());

        let mut row = vec![0u8; desc.row_bytes()];
        codec.read_rows(10, 1, &mut row).unwrap();
        assert_eq!(&row[0..3], &[0, 40, 128]);
        assert_eq!(&row[12..15], &[16, 40, 128]);
    }

    #[test]
    fn test_read_rows_out_of_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.tif");
        let tile = Raster::<Rgb8>::new(8, 8);
        write_color_tile(&path, &tile).unwrap();

        let mut codec = TiffCodec::open(&path).unwrap();
        let mut buf = vec![0u8; 8 * 3 * 4];
        assert!(matches!(
            codec.read_rows(6, 4, &mut buf),
            Err(CodecError::RowsOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_missing_tag_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.tif");
        write_color_tile(&path, &Raster::<Rgb8>::new(4, 4)).unwrap();

        let mut codec = TiffCodec::open(&path).unwrap();
        assert!(codec.tag_f64_array(TAG_MODEL_PIXEL_SCALE).unwrap().is_none());
        assert!(codec.tag_u16_array(TAG_GEO_KEY_DIRECTORY).unwrap().is_none());
        assert!(codec.tag_ascii(TAG_GDAL_NODATA).unwrap().is_none());
    }
}
