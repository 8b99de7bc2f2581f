//! Binary height tile container.
//!
//! Each height tile is a fixed 36-byte little-endian header followed by
//! row-major sample bytes. The header carries everything an importer needs
//! to place the tile: its side length, sample encoding, grid position, the
//! pixel-to-meters scale and the terrain height range of the whole dataset
//! (not just this tile), so every tile dequantizes against the same range.
//!
//! Readers must call [`HeightTileHeader::validate`] before trusting any
//! sample bytes; [`read`] does this internally and normalizes integer
//! payloads to `f32` in `[0, 1]`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::debug;

use crate::raster::{Pixel, Raster, RasterError};

/// Magic identifying a height tile file, stored little-endian.
pub const HEIGHT_TILE_MAGIC: u32 = u32::from_le_bytes(*b"HMR1");

/// Header byte length: six `u32` fields plus three `f32` fields.
pub const HEIGHT_TILE_HEADER_LEN: usize = 36;

/// Rows written or read per I/O chunk.
const ROWS_PER_CHUNK: usize = 32;

/// Error type for height tile serialization.
#[derive(Debug)]
pub enum HeightTileError {
    /// Magic bytes did not match [`HEIGHT_TILE_MAGIC`]
    BadMagic(u32),
    /// `tile_size_pix - 1` was not a power of two
    BadTileSize(u32),
    /// Sample width and float flag disagree (float must be 4 bytes, integer
    /// must be 1 or 2)
    BadSampleEncoding { bytes_per_sample: u32, is_float: bool },
    /// `pix_to_meters` was not strictly positive or not finite
    BadScale(f32),
    /// Terrain height range violated `0 <= min <= max`
    BadRange { min: f32, max: f32 },
    /// A field differed during a header compatibility or equality check
    FieldMismatch { field: &'static str },
    /// The file ended before the declared sample payload
    Truncated { expected: usize, actual: usize },
    Io(std::io::Error),
    Raster(RasterError),
}

impl std::fmt::Display for HeightTileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadMagic(m) => {
                write!(f, "Bad height tile magic {m:#010x}, expected {HEIGHT_TILE_MAGIC:#010x}")
            }
            Self::BadTileSize(s) => {
                write!(f, "Height tile size {s} invalid; size minus one must be a power of two")
            }
            Self::BadSampleEncoding { bytes_per_sample, is_float } => write!(
                f,
                "Invalid sample encoding: {bytes_per_sample} bytes per sample, is_float={is_float}"
            ),
            Self::BadScale(s) => write!(f, "Height tile pix_to_meters {s} must be positive"),
            Self::BadRange { min, max } => {
                write!(f, "Height tile terrain range [{min}, {max}] must satisfy 0 <= min <= max")
            }
            Self::FieldMismatch { field } => {
                write!(f, "Height tile header field {field} does not match")
            }
            Self::Truncated { expected, actual } => {
                write!(f, "Height tile payload truncated: expected {expected} bytes, got {actual}")
            }
            Self::Io(e) => write!(f, "Height tile I/O error: {e}"),
            Self::Raster(e) => write!(f, "Height tile raster error: {e}"),
        }
    }
}

impl std::error::Error for HeightTileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Raster(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HeightTileError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<RasterError> for HeightTileError {
    fn from(e: RasterError) -> Self {
        Self::Raster(e)
    }
}

/// Fixed header of a height tile file. All fields little-endian on disk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightTileHeader {
    pub tile_size_pix: u32,
    pub bytes_per_sample: u32,
    pub is_float: bool,
    /// Column of this tile in its region grid
    pub pos_x: u32,
    /// Row of this tile in its region grid
    pub pos_y: u32,
    /// Meters covered by one pixel step
    pub pix_to_meters: f32,
    /// Dataset-wide minimum terrain height in meters, >= 0
    pub min_total_terrain_height: f32,
    /// Dataset-wide maximum terrain height in meters
    pub max_total_terrain_height: f32,
}

impl HeightTileHeader {
    /// Build a header for tiles of sample type `P`.
    #[must_use]
    pub fn for_samples<P: Pixel>(
        tile_size_pix: u32,
        pix_to_meters: f32,
        min_height: f32,
        max_height: f32,
    ) -> Self {
        // Pixel byte widths are single digits
        #[allow(clippy::cast_possible_truncation)]
        let bytes_per_sample = P::BYTES_PER_PIXEL as u32;
        Self {
            tile_size_pix,
            bytes_per_sample,
            is_float: P::IS_FLOAT,
            pos_x: 0,
            pos_y: 0,
            pix_to_meters,
            min_total_terrain_height: min_height,
            max_total_terrain_height: max_height,
        }
    }

    /// Grid position builder.
    #[must_use]
    pub const fn at(mut self, pos_x: u32, pos_y: u32) -> Self {
        self.pos_x = pos_x;
        self.pos_y = pos_y;
        self
    }

    /// Sample payload byte length implied by the header.
    #[inline]
    #[must_use]
    pub const fn payload_len(&self) -> usize {
        (self.tile_size_pix as usize) * (self.tile_size_pix as usize)
            * (self.bytes_per_sample as usize)
    }

    /// Check every structural invariant of the header.
    ///
    /// # Errors
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), HeightTileError> {
        let side = self.tile_size_pix;
        if side < 2 || !(side - 1).is_power_of_two() {
            return Err(HeightTileError::BadTileSize(side));
        }
        let encoding_ok = if self.is_float {
            self.bytes_per_sample == 4
        } else {
            self.bytes_per_sample == 1 || self.bytes_per_sample == 2
        };
        if !encoding_ok {
            return Err(HeightTileError::BadSampleEncoding {
                bytes_per_sample: self.bytes_per_sample,
                is_float: self.is_float,
            });
        }
        if !(self.pix_to_meters.is_finite() && self.pix_to_meters > 0.0) {
            return Err(HeightTileError::BadScale(self.pix_to_meters));
        }
        if !(self.min_total_terrain_height >= 0.0
            && self.min_total_terrain_height <= self.max_total_terrain_height)
        {
            return Err(HeightTileError::BadRange {
                min: self.min_total_terrain_height,
                max: self.max_total_terrain_height,
            });
        }
        Ok(())
    }

    /// Check that another header describes tiles from the same dataset,
    /// ignoring the grid position fields.
    ///
    /// # Errors
    /// Returns [`HeightTileError::FieldMismatch`] naming the first field that
    /// differs.
    pub fn validate_compatible(&self, other: &Self) -> Result<(), HeightTileError> {
        self.validate()?;
        other.validate()?;
        let mismatch = |field| Err(HeightTileError::FieldMismatch { field });
        if self.tile_size_pix != other.tile_size_pix {
            return mismatch("tile_size_pix");
        }
        if self.bytes_per_sample != other.bytes_per_sample {
            return mismatch("bytes_per_sample");
        }
        if self.is_float != other.is_float {
            return mismatch("is_float");
        }
        if self.pix_to_meters != other.pix_to_meters {
            return mismatch("pix_to_meters");
        }
        if self.min_total_terrain_height != other.min_total_terrain_height {
            return mismatch("min_total_terrain_height");
        }
        if self.max_total_terrain_height != other.max_total_terrain_height {
            return mismatch("max_total_terrain_height");
        }
        Ok(())
    }

    /// Check full equality with another header, position included.
    ///
    /// # Errors
    /// Returns [`HeightTileError::FieldMismatch`] naming the first field that
    /// differs.
    pub fn validate_exact_match(&self, other: &Self) -> Result<(), HeightTileError> {
        self.validate_compatible(other)?;
        if self.pos_x != other.pos_x {
            return Err(HeightTileError::FieldMismatch { field: "pos_x" });
        }
        if self.pos_y != other.pos_y {
            return Err(HeightTileError::FieldMismatch { field: "pos_y" });
        }
        Ok(())
    }

    /// Serialize the header little-endian.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEIGHT_TILE_HEADER_LEN] {
        let mut out = [0u8; HEIGHT_TILE_HEADER_LEN];
        out[0..4].copy_from_slice(&HEIGHT_TILE_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&self.tile_size_pix.to_le_bytes());
        out[8..12].copy_from_slice(&self.bytes_per_sample.to_le_bytes());
        out[12..16].copy_from_slice(&u32::from(self.is_float).to_le_bytes());
        out[16..20].copy_from_slice(&self.pos_x.to_le_bytes());
        out[20..24].copy_from_slice(&self.pos_y.to_le_bytes());
        out[24..28].copy_from_slice(&self.pix_to_meters.to_le_bytes());
        out[28..32].copy_from_slice(&self.min_total_terrain_height.to_le_bytes());
        out[32..36].copy_from_slice(&self.max_total_terrain_height.to_le_bytes());
        out
    }

    /// Parse and validate a header from its little-endian byte form.
    ///
    /// # Errors
    /// Fails on a bad magic or any violated header invariant.
    pub fn from_bytes(bytes: &[u8; HEIGHT_TILE_HEADER_LEN]) -> Result<Self, HeightTileError> {
        let u32_at = |off: usize| u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]);
        let f32_at = |off: usize| f32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]);

        let magic = u32_at(0);
        if magic != HEIGHT_TILE_MAGIC {
            return Err(HeightTileError::BadMagic(magic));
        }
        let header = Self {
            tile_size_pix: u32_at(4),
            bytes_per_sample: u32_at(8),
            is_float: u32_at(12) != 0,
            pos_x: u32_at(16),
            pos_y: u32_at(20),
            pix_to_meters: f32_at(24),
            min_total_terrain_height: f32_at(28),
            max_total_terrain_height: f32_at(32),
        };
        header.validate()?;
        Ok(header)
    }
}

/// Write a height tile: validated header, then samples in row chunks.
///
/// # Errors
/// Fails on a header invariant violation, a raster/header size disagreement
/// or an I/O error.
pub fn write<P: Pixel>(
    path: &Path,
    header: &HeightTileHeader,
    samples: &Raster<P>,
) -> Result<(), HeightTileError> {
    header.validate()?;
    let side = header.tile_size_pix as usize;
    if samples.width() != side
        || samples.height() != side
        || P::BYTES_PER_PIXEL != header.bytes_per_sample as usize
        || P::IS_FLOAT != header.is_float
    {
        return Err(HeightTileError::BadSampleEncoding {
            bytes_per_sample: header.bytes_per_sample,
            is_float: header.is_float,
        });
    }

    debug!(path = %path.display(), side, "Writing height tile");
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&header.to_bytes())?;
    let mut row = 0;
    while row < side {
        let count = ROWS_PER_CHUNK.min(side - row);
        writer.write_all(&samples.raw_rows(row, count)?)?;
        row += count;
    }
    writer.flush()?;
    Ok(())
}

/// Read a height tile, validating the header before touching the payload.
///
/// Integer payloads are normalized to `f32` in `[0, 1]`; float payloads are
/// returned as stored.
///
/// # Errors
/// Fails on a bad or inconsistent header, a truncated payload or I/O error.
pub fn read(path: &Path) -> Result<(HeightTileHeader, Raster<f32>), HeightTileError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut header_bytes = [0u8; HEIGHT_TILE_HEADER_LEN];
    reader.read_exact(&mut header_bytes)?;
    let header = HeightTileHeader::from_bytes(&header_bytes)?;

    let expected = header.payload_len();
    let mut payload = Vec::with_capacity(expected);
    reader.read_to_end(&mut payload)?;
    if payload.len() < expected {
        return Err(HeightTileError::Truncated { expected, actual: payload.len() });
    }
    payload.truncate(expected);

    let side = header.tile_size_pix as usize;
    let samples = match (header.is_float, header.bytes_per_sample) {
        (true, 4) => {
            let mut r = Raster::<f32>::new(side, side);
            r.set_raw_rows(0, side, &payload)?;
            r
        }
        (false, 1) => {
            let mut r = Raster::<u8>::new(side, side);
            r.set_raw_rows(0, side, &payload)?;
            r.convert(|v| f32::from(v) / f32::from(u8::MAX))
        }
        (false, 2) => {
            let mut r = Raster::<u16>::new(side, side);
            r.set_raw_rows(0, side, &payload)?;
            r.convert(|v| f32::from(v) / f32::from(u16::MAX))
        }
        (is_float, bytes_per_sample) => {
            return Err(HeightTileError::BadSampleEncoding { bytes_per_sample, is_float });
        }
    };
    Ok((header, samples))
}
