#![doc = include_str!("../README.md")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod align;
pub mod casting;
pub mod codec;
pub mod convert;
pub mod geokeys;
pub mod header;
pub mod height_tile;
pub mod raster;
pub mod resample;
pub mod tiling;

// ============================================================================
// Pipeline entry points
// ============================================================================

pub use convert::{
    ConvertError, ConvertOptions, ConvertSummary, Converter, PreRotation, TileNameOrder,
    COLOR_BLOCK_SIZE, MAX_COLOR_TILE_SIZE, MAX_HEIGHT_TILE_SIZE, MIN_HEIGHT_TILE_SIZE,
};

// ============================================================================
// Raster containers and metadata
// ============================================================================

pub use codec::{
    write_color_tile, CodecError, ImageDescriptor, RasterCodec, RasterOrientation, SampleKind,
    TiffCodec,
};
pub use geokeys::{GeoKeyDirectory, GeoKeyError, ModelType, RasterType};
pub use header::{GeoRasterHeader, HeaderError, PixelScale, TiePoint};

// ============================================================================
// Pixel buffers and resampling
// ============================================================================

pub use raster::{Pixel, Raster, RasterError, Rect, Rgb8, RgbF32, Rotation};
pub use resample::{reduce_2to1, scaled, scaled_rgb8, scaled_u16};

// ============================================================================
// Tiling and output formats
// ============================================================================

pub use align::{Alignment, AlignmentError};
pub use height_tile::{HeightTileError, HeightTileHeader, HEIGHT_TILE_MAGIC};
pub use tiling::{
    legal_tile_size_le, PlanRegion, RegionLedger, TileEmit, TilePass, TilePlan, TilingError,
};
