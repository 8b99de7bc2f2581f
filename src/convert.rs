//! The height/color conversion pipeline.
//!
//! [`Converter::run`] drives one full conversion: decode both raster
//! headers, verify formats and alignment, load the pixels, quantize the
//! heights, build the tile plan once and replay it twice, writing a binary
//! height tile container and an RGB color TIFF per tile. The two passes
//! share the plan and a [`RegionLedger`], so a height tile written without a
//! matching color tile is a hard error, not a silent gap.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::align::{Alignment, AlignmentError};
use crate::casting::{scale_round, usize_to_u32};
use crate::codec::{write_color_tile, CodecError, RasterCodec, RasterOrientation, SampleKind};
use crate::header::{GeoRasterHeader, HeaderError};
use crate::height_tile::{self, HeightTileError, HeightTileHeader};
use crate::raster::{Raster, RasterError, Rect, Rgb8, Rotation};
use crate::resample::scaled_rgb8;
use crate::tiling::{legal_tile_size_le, RegionLedger, TilePass, TilePlan, TilingError};

/// Smallest height tile the defaults allow (`2^6 + 1`).
pub const MIN_HEIGHT_TILE_SIZE: usize = 65;
/// Largest height tile the defaults allow (`2^12 + 1`).
pub const MAX_HEIGHT_TILE_SIZE: usize = 4097;
/// Default ceiling for color tile side length.
pub const MAX_COLOR_TILE_SIZE: usize = 8192;
/// Color tile sides are padded to a multiple of this for block compression.
pub const COLOR_BLOCK_SIZE: usize = 4;

/// Which grid coordinate comes first in output file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileNameOrder {
    /// `{row}-{col}`
    #[default]
    RowCol,
    /// `{col}-{row}`
    ColRow,
}

/// Quarter-turn rotation applied to both rasters before tiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreRotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

/// Pipeline configuration.
#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions {
    /// Regions whose legal tile size would drop below this become gaps
    pub min_height_tile_size: usize,
    /// Upper bound on the top-level height tile size
    pub max_height_tile_size: usize,
    /// The top-level tile shrinks until its color counterpart fits this
    pub max_color_tile_size: usize,
    /// Pad color tiles to a multiple of [`COLOR_BLOCK_SIZE`]
    pub block_align_color_tiles: bool,
    pub pre_rotation: PreRotation,
    pub tile_name_order: TileNameOrder,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            min_height_tile_size: MIN_HEIGHT_TILE_SIZE,
            max_height_tile_size: MAX_HEIGHT_TILE_SIZE,
            max_color_tile_size: MAX_COLOR_TILE_SIZE,
            block_align_color_tiles: true,
            pre_rotation: PreRotation::None,
            tile_name_order: TileNameOrder::default(),
        }
    }
}

impl ConvertOptions {
    /// Check the option set for internal consistency.
    ///
    /// # Errors
    /// Returns [`ConvertError::Configuration`] on an illegal tile size bound
    /// or an inverted range.
    pub fn validate(&self) -> Result<(), ConvertError> {
        for (name, size) in [
            ("min_height_tile_size", self.min_height_tile_size),
            ("max_height_tile_size", self.max_height_tile_size),
        ] {
            if size < 2 || !(size - 1).is_power_of_two() {
                return Err(ConvertError::Configuration(format!(
                    "{name} {size} is not a legal tile size"
                )));
            }
        }
        if self.min_height_tile_size > self.max_height_tile_size {
            return Err(ConvertError::Configuration(format!(
                "min_height_tile_size {} exceeds max_height_tile_size {}",
                self.min_height_tile_size, self.max_height_tile_size
            )));
        }
        if self.max_color_tile_size < COLOR_BLOCK_SIZE {
            return Err(ConvertError::Configuration(format!(
                "max_color_tile_size {} is below the color block size",
                self.max_color_tile_size
            )));
        }
        Ok(())
    }
}

/// Error type for a whole conversion run.
#[derive(Debug)]
pub enum ConvertError {
    /// Bad options or an input raster with an unsupported format
    Configuration(String),
    Codec(CodecError),
    Header(HeaderError),
    Alignment(AlignmentError),
    Tiling(TilingError),
    Raster(RasterError),
    HeightTile(HeightTileError),
    Io(std::io::Error),
}

impl std::fmt::Display for ConvertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(detail) => write!(f, "Configuration error: {detail}"),
            Self::Codec(e) => write!(f, "Codec error: {e}"),
            Self::Header(e) => write!(f, "Header error: {e}"),
            Self::Alignment(e) => write!(f, "Alignment error: {e}"),
            Self::Tiling(e) => write!(f, "Tiling error: {e}"),
            Self::Raster(e) => write!(f, "Raster error: {e}"),
            Self::HeightTile(e) => write!(f, "Height tile error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ConvertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Configuration(_) => None,
            Self::Codec(e) => Some(e),
            Self::Header(e) => Some(e),
            Self::Alignment(e) => Some(e),
            Self::Tiling(e) => Some(e),
            Self::Raster(e) => Some(e),
            Self::HeightTile(e) => Some(e),
            Self::Io(e) => Some(e),
        }
    }
}

impl From<CodecError> for ConvertError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<HeaderError> for ConvertError {
    fn from(e: HeaderError) -> Self {
        Self::Header(e)
    }
}

impl From<AlignmentError> for ConvertError {
    fn from(e: AlignmentError) -> Self {
        Self::Alignment(e)
    }
}

impl From<TilingError> for ConvertError {
    fn from(e: TilingError) -> Self {
        Self::Tiling(e)
    }
}

impl From<RasterError> for ConvertError {
    fn from(e: RasterError) -> Self {
        Self::Raster(e)
    }
}

impl From<HeightTileError> for ConvertError {
    fn from(e: HeightTileError) -> Self {
        Self::HeightTile(e)
    }
}

impl From<std::io::Error> for ConvertError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Outcome of a successful conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvertSummary {
    pub height_tiles: usize,
    pub color_tiles: usize,
    /// Regions too small to tile; their pixels were dropped
    pub coverage_gaps: usize,
    /// Top-level height tile side length
    pub tile_size: usize,
    /// Terrain height range written into every tile header
    pub height_range: (f32, f32),
}

/// One conversion job: an output path base plus options.
pub struct Converter {
    out_base: PathBuf,
    options: ConvertOptions,
}

impl Converter {
    /// `out_base` is the path prefix output files are named under, e.g.
    /// `out/terrain` yields `out/terrain_HM_R00_00-00.hmr`.
    #[must_use]
    pub fn new<P: AsRef<Path>>(out_base: P) -> Self {
        Self { out_base: out_base.as_ref().to_path_buf(), options: ConvertOptions::default() }
    }

    #[must_use]
    pub fn with_options(mut self, options: ConvertOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the conversion.
    ///
    /// # Errors
    /// Fails on bad options, unsupported input formats, misaligned rasters,
    /// any codec or write error, or an unbalanced tile pass ledger.
    pub fn run(
        &self,
        height: &mut dyn RasterCodec,
        color: &mut dyn RasterCodec,
    ) -> Result<ConvertSummary, ConvertError> {
        self.options.validate()?;

        let mut hm_header = GeoRasterHeader::load(height)?;
        let mut color_header = GeoRasterHeader::load(color)?;
        check_height_format(&hm_header)?;
        check_color_format(&color_header)?;

        let mut hm_raster = load_height_raster(height, &hm_header)?;
        let mut color_raster = load_color_raster(color, &color_header)?;

        // Normalize both rasters to top-left row order
        if hm_header.descriptor.orientation == RasterOrientation::BottomLeft {
            hm_raster.flip_vertical();
        }
        if color_header.descriptor.orientation == RasterOrientation::BottomLeft {
            color_raster.flip_vertical();
        }

        if let Some(rotation) = rotation_of(self.options.pre_rotation) {
            debug!(?rotation, "Applying pre-rotation");
            hm_raster = hm_raster.rotated(rotation);
            color_raster = color_raster.rotated(rotation);
            if matches!(rotation, Rotation::Cw90 | Rotation::Cw270) {
                hm_header.swap_axes();
                color_header.swap_axes();
            }
        }

        let alignment = Alignment::check(&hm_header, &color_header)?;

        let (min_height, max_height) = height_extrema(&hm_header, &mut hm_raster);
        let min_total = if min_height < 0.0 {
            warn!(min_height, "Clamping negative minimum terrain height to zero");
            0.0
        } else {
            min_height
        };
        let max_total = max_height.max(min_total);

        // Quantize heights to u16 against the full range
        let range = max_height - min_height;
        let scale = if range > 0.0 {
            f32::from(u16::MAX) / range
        } else {
            warn!("Terrain is flat; all height samples quantize to zero");
            0.0
        };
        let hm_u16 = hm_raster.to_u16_scaled(-min_height, scale);

        let top_tile = self.top_tile_size(
            hm_header.descriptor.width.min(hm_header.descriptor.height),
            alignment.hm_to_color,
        )?;
        let plan = TilePlan::build(
            hm_header.descriptor.width,
            hm_header.descriptor.height,
            top_tile,
            self.options.min_height_tile_size,
            self.options.max_height_tile_size,
        )?;
        info!(
            top_tile,
            regions = plan.regions().len(),
            tiles = plan.tile_count(),
            gaps = plan.gap_count(),
            "Tile plan ready"
        );

        if let Some(parent) = self.out_base.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let pix_to_meters = hm_header.pixel_scale.x as f32;

        let mut ledger = RegionLedger::new();
        let mut height_tiles = 0usize;
        plan.replay::<ConvertError, _>(TilePass::Height, &mut ledger, |_, emit| {
            // Raw heightmap import reads rows bottom-up
            let mut tile = hm_u16.crop(emit.rect)?;
            tile.flip_vertical();
            let header = HeightTileHeader::for_samples::<u16>(
                usize_to_u32(emit.rect.w).map_err(ConvertError::Configuration)?,
                pix_to_meters,
                min_total,
                max_total,
            )
            .at(
                usize_to_u32(emit.grid_col).map_err(ConvertError::Configuration)?,
                usize_to_u32(emit.grid_row).map_err(ConvertError::Configuration)?,
            );
            let path = self.tile_path("HM", "hmr", emit.region_id, emit.grid_col, emit.grid_row);
            height_tile::write(&path, &header, &tile)?;
            height_tiles += 1;
            Ok(())
        })?;

        let mut color_tiles = 0usize;
        plan.replay::<ConvertError, _>(TilePass::Color, &mut ledger, |_, emit| {
            let tile = self.cut_color_tile(&color_raster, emit.rect, alignment.hm_to_color)?;
            let path = self.tile_path("RGB", "tif", emit.region_id, emit.grid_col, emit.grid_row);
            write_color_tile(&path, &tile)?;
            color_tiles += 1;
            Ok(())
        })?;

        ledger.finish()?;
        info!(height_tiles, color_tiles, "Conversion complete");
        Ok(ConvertSummary {
            height_tiles,
            color_tiles,
            coverage_gaps: plan.gap_count(),
            tile_size: top_tile,
            height_range: (min_total, max_total),
        })
    }

    /// Largest legal top tile for the raster, shrunk until the implied color
    /// tile fits `max_color_tile_size`.
    fn top_tile_size(&self, short_side: usize, hm_to_color: f64) -> Result<usize, ConvertError> {
        let bound = short_side.min(self.options.max_height_tile_size);
        let mut tile = legal_tile_size_le(bound).ok_or_else(|| {
            ConvertError::Configuration(format!("raster short side {short_side} cannot be tiled"))
        })?;

        loop {
            if tile < self.options.min_height_tile_size {
                return Err(ConvertError::Configuration(format!(
                    "no legal tile size in [{}, {}] keeps the color tile under {}",
                    self.options.min_height_tile_size,
                    self.options.max_height_tile_size,
                    self.options.max_color_tile_size
                )));
            }
            if self.color_tile_side(tile, hm_to_color) <= self.options.max_color_tile_size {
                return Ok(tile);
            }
            tile = legal_tile_size_le(tile - 2).ok_or_else(|| {
                ConvertError::Configuration(
                    "color tile cap cannot be met by any legal tile size".to_string(),
                )
            })?;
        }
    }

    fn color_tile_side(&self, height_tile: usize, hm_to_color: f64) -> usize {
        let side = scale_round(height_tile, hm_to_color);
        if self.options.block_align_color_tiles {
            side.div_ceil(COLOR_BLOCK_SIZE) * COLOR_BLOCK_SIZE
        } else {
            side
        }
    }

    /// Crop the ratio-scaled counterpart of a height rect out of the color
    /// raster and resample it to its exact (optionally block-aligned) size.
    fn cut_color_tile(
        &self,
        color: &Raster<Rgb8>,
        height_rect: Rect,
        hm_to_color: f64,
    ) -> Result<Raster<Rgb8>, ConvertError> {
        let target = self.color_tile_side(height_rect.w, hm_to_color);

        let x = scale_round(height_rect.x, hm_to_color).min(color.width().saturating_sub(1));
        let y = scale_round(height_rect.y, hm_to_color).min(color.height().saturating_sub(1));
        let w = scale_round(height_rect.w, hm_to_color).min(color.width() - x);
        let h = scale_round(height_rect.h, hm_to_color).min(color.height() - y);
        if w == 0 || h == 0 {
            return Err(ConvertError::Configuration(format!(
                "color rect for height rect {height_rect} is empty"
            )));
        }

        let cropped = color.crop(Rect::new(x, y, w, h))?;
        Ok(scaled_rgb8(cropped, target, target))
    }

    fn tile_path(&self, kind: &str, ext: &str, region: usize, col: usize, row: usize) -> PathBuf {
        let (a, b) = match self.options.tile_name_order {
            TileNameOrder::RowCol => (row, col),
            TileNameOrder::ColRow => (col, row),
        };
        let mut name = self.out_base.as_os_str().to_os_string();
        name.push(format!("_{kind}_R{region:02}_{a:02}-{b:02}.{ext}"));
        PathBuf::from(name)
    }
}

fn rotation_of(pre: PreRotation) -> Option<Rotation> {
    match pre {
        PreRotation::None => None,
        PreRotation::Cw90 => Some(Rotation::Cw90),
        PreRotation::Cw180 => Some(Rotation::Cw180),
        PreRotation::Cw270 => Some(Rotation::Cw270),
    }
}

fn check_height_format(header: &GeoRasterHeader) -> Result<(), ConvertError> {
    let d = &header.descriptor;
    if d.width == 0 || d.height == 0 {
        return Err(ConvertError::Configuration("height raster is empty".to_string()));
    }
    if d.channels != 1 || d.bits_per_channel != 32 || d.sample_kind != SampleKind::Float {
        return Err(ConvertError::Configuration(format!(
            "height raster must be single-channel float32, got {} x {}-bit {:?}",
            d.channels, d.bits_per_channel, d.sample_kind
        )));
    }
    if !header.pixel_scale.is_square(1e-4) {
        return Err(ConvertError::Configuration(format!(
            "height raster pixels must be square, got {} x {}",
            header.pixel_scale.x, header.pixel_scale.y
        )));
    }
    Ok(())
}

fn check_color_format(header: &GeoRasterHeader) -> Result<(), ConvertError> {
    let d = &header.descriptor;
    if d.width == 0 || d.height == 0 {
        return Err(ConvertError::Configuration("color raster is empty".to_string()));
    }
    if d.channels != 3 || d.bits_per_channel != 8 || d.sample_kind != SampleKind::UnsignedInt {
        return Err(ConvertError::Configuration(format!(
            "color raster must be 3-channel 8-bit, got {} x {}-bit {:?}",
            d.channels, d.bits_per_channel, d.sample_kind
        )));
    }
    Ok(())
}

/// Strip-wise load of the height raster, swapping byte order if the codec
/// reports it.
fn load_height_raster(
    codec: &mut dyn RasterCodec,
    header: &GeoRasterHeader,
) -> Result<Raster<f32>, ConvertError> {
    let d = header.descriptor;
    let mut raster = Raster::<f32>::new(d.width, d.height);
    let mut row = 0;
    let strip = d.rows_per_strip.max(1);
    let mut buf = vec![0u8; strip * d.row_bytes()];
    while row < d.height {
        let count = strip.min(d.height - row);
        let chunk = &mut buf[..count * d.row_bytes()];
        codec.read_rows(row, count, chunk)?;
        if codec.byte_swapped() {
            crate::codec::swap_bytes_in_place(chunk, d.sample_bytes());
        }
        raster.set_raw_rows(row, count, chunk)?;
        row += count;
    }
    Ok(raster)
}

fn load_color_raster(
    codec: &mut dyn RasterCodec,
    header: &GeoRasterHeader,
) -> Result<Raster<Rgb8>, ConvertError> {
    let d = header.descriptor;
    let mut raster = Raster::<Rgb8>::new(d.width, d.height);
    let mut row = 0;
    let strip = d.rows_per_strip.max(1);
    let mut buf = vec![0u8; strip * d.row_bytes()];
    while row < d.height {
        let count = strip.min(d.height - row);
        let chunk = &mut buf[..count * d.row_bytes()];
        codec.read_rows(row, count, chunk)?;
        raster.set_raw_rows(row, count, chunk)?;
        row += count;
    }
    Ok(raster)
}

/// Nodata substitution plus extrema. Nodata and non-finite samples are
/// replaced by the minimum real value with a warning; declared header
/// extrema are trusted when they cover the data.
fn height_extrema(header: &GeoRasterHeader, raster: &mut Raster<f32>) -> (f32, f32) {
    #[allow(clippy::cast_possible_truncation)]
    let nodata = header.nodata.map(|v| v as f32);

    // Extrema over real samples only
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in raster.pixels() {
        if v.is_finite() && Some(v) != nodata {
            min = min.min(v);
            max = max.max(v);
        }
    }
    if min > max {
        warn!("Height raster has no usable samples");
        return (0.0, 0.0);
    }
    let (scan_min, scan_max) = (min, max);

    let mut replaced = 0usize;
    for v in raster.pixels_mut() {
        if !v.is_finite() || Some(*v) == nodata {
            *v = scan_min;
            replaced += 1;
        }
    }
    if replaced > 0 {
        warn!(replaced, ?nodata, substitute = scan_min, "Substituted unusable height samples");
    }

    match (header.min_sample, header.max_sample) {
        (Some(min), Some(max)) if min <= max => {
            #[allow(clippy::cast_possible_truncation)]
            let declared = (min as f32, max as f32);
            if declared.0 > scan_min || declared.1 < scan_max {
                warn!(
                    declared_min = declared.0,
                    declared_max = declared.1,
                    scan_min,
                    scan_max,
                    "Declared sample range does not cover the data; using the scan"
                );
                (scan_min, scan_max)
            } else {
                declared
            }
        }
        _ => (scan_min, scan_max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{
        ImageDescriptor, TAG_GDAL_NODATA, TAG_MODEL_PIXEL_SCALE, TAG_MODEL_TIE_POINT,
    };
    use crate::raster::Pixel;
    use std::collections::HashMap;

    /// In-memory codec over a pre-rendered byte image.
    struct MockCodec {
        descriptor: ImageDescriptor,
        bytes: Vec<u8>,
        f64_tags: HashMap<u16, Vec<f64>>,
        u16_tags: HashMap<u16, Vec<u16>>,
        ascii_tags: HashMap<u16, String>,
        swapped: bool,
    }

    impl MockCodec {
        fn height(raster: &Raster<f32>, pixel_scale: f64) -> Self {
            let mut c = Self {
                descriptor: ImageDescriptor {
                    width: raster.width(),
                    height: raster.height(),
                    channels: 1,
                    bits_per_channel: 32,
                    sample_kind: SampleKind::Float,
                    orientation: RasterOrientation::TopLeft,
                    rows_per_strip: 4,
                },
                bytes: raster.to_raw(),
                f64_tags: HashMap::new(),
                u16_tags: HashMap::new(),
                ascii_tags: HashMap::new(),
                swapped: false,
            };
            c.f64_tags
                .insert(TAG_MODEL_PIXEL_SCALE, vec![pixel_scale, pixel_scale, 1.0]);
            c.f64_tags
                .insert(TAG_MODEL_TIE_POINT, vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
            c
        }

        fn color(raster: &Raster<Rgb8>, pixel_scale: f64) -> Self {
            let mut c = Self {
                descriptor: ImageDescriptor {
                    width: raster.width(),
                    height: raster.height(),
                    channels: 3,
                    bits_per_channel: 8,
                    sample_kind: SampleKind::UnsignedInt,
                    orientation: RasterOrientation::TopLeft,
                    rows_per_strip: 8,
                },
                bytes: raster.to_raw(),
                f64_tags: HashMap::new(),
                u16_tags: HashMap::new(),
                ascii_tags: HashMap::new(),
                swapped: false,
            };
            c.f64_tags
                .insert(TAG_MODEL_PIXEL_SCALE, vec![pixel_scale, pixel_scale, 1.0]);
            c.f64_tags
                .insert(TAG_MODEL_TIE_POINT, vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
            c
        }

        /// Store samples byte-swapped and report it, exercising the caller's
        /// swap path.
        fn swap_storage(mut self) -> Self {
            crate::codec::swap_bytes_in_place(&mut self.bytes, self.descriptor.sample_bytes());
            self.swapped = true;
            self
        }
    }

    impl RasterCodec for MockCodec {
        fn descriptor(&mut self) -> Result<ImageDescriptor, CodecError> {
            Ok(self.descriptor)
        }

        fn tag_u16_array(&mut self, tag: u16) -> Result<Option<Vec<u16>>, CodecError> {
            Ok(self.u16_tags.get(&tag).cloned())
        }

        fn tag_f64_array(&mut self, tag: u16) -> Result<Option<Vec<f64>>, CodecError> {
            Ok(self.f64_tags.get(&tag).cloned())
        }

        fn tag_ascii(&mut self, tag: u16) -> Result<Option<String>, CodecError> {
            Ok(self.ascii_tags.get(&tag).cloned())
        }

        fn read_rows(&mut self, row: usize, count: usize, out: &mut [u8]) -> Result<(), CodecError> {
            let row_bytes = self.descriptor.row_bytes();
            out.copy_from_slice(&self.bytes[row * row_bytes..(row + count) * row_bytes]);
            Ok(())
        }

        fn byte_swapped(&self) -> bool {
            self.swapped
        }
    }

    fn ramp_height(w: usize, h: usize) -> Raster<f32> {
        let mut r = Raster::new(w, h);
        for y in 0..h {
            for x in 0..w {
                #[allow(clippy::cast_precision_loss)]
                r.set(x, y, 100.0 + (x + y) as f32);
            }
        }
        r
    }

    fn flat_color(w: usize, h: usize) -> Raster<Rgb8> {
        let mut r = Raster::new(w, h);
        r.pixels_mut().fill(Rgb8::new(10, 120, 200));
        r
    }

    fn small_options() -> ConvertOptions {
        ConvertOptions {
            min_height_tile_size: 5,
            max_height_tile_size: 17,
            max_color_tile_size: 64,
            ..ConvertOptions::default()
        }
    }

    #[test]
    fn test_options_validation() {
        let mut o = ConvertOptions::default();
        o.validate().unwrap();
        o.min_height_tile_size = 64; // 63 not a power of two
        assert!(matches!(o.validate(), Err(ConvertError::Configuration(_))));
        o.min_height_tile_size = 8193;
        o.max_height_tile_size = 4097;
        assert!(matches!(o.validate(), Err(ConvertError::Configuration(_))));
    }

    #[test]
    fn test_end_to_end_small_pair() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("terrain");

        let hm = ramp_height(10, 10);
        let color = flat_color(40, 40);
        let mut hm_codec = MockCodec::height(&hm, 2.0);
        let mut color_codec = MockCodec::color(&color, 0.5);

        let summary = Converter::new(&base)
            .with_options(small_options())
            .run(&mut hm_codec, &mut color_codec)
            .unwrap();

        // 10x10 with a 9-pixel top tile: one 9x9 tile, 1-pixel gap edges
        assert_eq!(summary.tile_size, 9);
        assert_eq!(summary.height_tiles, 1);
        assert_eq!(summary.color_tiles, 1);
        assert!(summary.coverage_gaps > 0);
        assert_eq!(summary.height_range, (100.0, 118.0));

        let hm_path = dir.path().join("terrain_HM_R00_00-00.hmr");
        let (tile_header, samples) = height_tile::read(&hm_path).unwrap();
        assert_eq!(tile_header.tile_size_pix, 9);
        assert_eq!(tile_header.bytes_per_sample, 2);
        assert_eq!(tile_header.pix_to_meters, 2.0);
        assert_eq!(tile_header.min_total_terrain_height, 100.0);
        assert_eq!(tile_header.max_total_terrain_height, 118.0);
        assert_eq!(samples.width(), 9);

        // ratio 4 maps the 9-pixel tile to 36, already block-aligned
        let rgb_path = dir.path().join("terrain_RGB_R00_00-00.tif");
        let mut rgb = crate::codec::TiffCodec::open(&rgb_path).unwrap();
        let desc = rgb.descriptor().unwrap();
        assert_eq!(desc.width, 36);
        assert_eq!(desc.height, 36);
    }

    #[test]
    fn test_height_tiles_are_bottom_up() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("t");

        // Height increases with source row; after the bottom-up flip the
        // first tile row holds the largest values
        let mut hm = Raster::<f32>::new(9, 9);
        for y in 0..9 {
            for x in 0..9 {
                #[allow(clippy::cast_precision_loss)]
                hm.set(x, y, y as f32);
            }
        }
        let color = flat_color(36, 36);
        let mut hm_codec = MockCodec::height(&hm, 2.0);
        let mut color_codec = MockCodec::color(&color, 0.5);

        Converter::new(&base)
            .with_options(small_options())
            .run(&mut hm_codec, &mut color_codec)
            .unwrap();

        let (_, samples) = height_tile::read(&dir.path().join("t_HM_R00_00-00.hmr")).unwrap();
        assert!(samples.get(0, 0) > samples.get(0, 8));
    }

    #[test]
    fn test_byte_swapped_codec_matches_native() {
        let dir = tempfile::tempdir().unwrap();

        let hm = ramp_height(9, 9);
        let color = flat_color(36, 36);

        let native = Converter::new(dir.path().join("native"))
            .with_options(small_options())
            .run(&mut MockCodec::height(&hm, 2.0), &mut MockCodec::color(&color, 0.5))
            .unwrap();
        let swapped = Converter::new(dir.path().join("swapped"))
            .with_options(small_options())
            .run(
                &mut MockCodec::height(&hm, 2.0).swap_storage(),
                &mut MockCodec::color(&color, 0.5),
            )
            .unwrap();

        assert_eq!(native, swapped);
        let (_, a) = height_tile::read(&dir.path().join("native_HM_R00_00-00.hmr")).unwrap();
        let (_, b) = height_tile::read(&dir.path().join("swapped_HM_R00_00-00.hmr")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_nodata_substitution() {
        let dir = tempfile::tempdir().unwrap();

        let mut hm = ramp_height(9, 9);
        hm.set(4, 4, -9999.0);
        let color = flat_color(36, 36);
        let mut hm_codec = MockCodec::height(&hm, 2.0);
        hm_codec.ascii_tags.insert(TAG_GDAL_NODATA, "-9999".to_string());
        let mut color_codec = MockCodec::color(&color, 0.5);

        let summary = Converter::new(dir.path().join("nd"))
            .with_options(small_options())
            .run(&mut hm_codec, &mut color_codec)
            .unwrap();

        // range computed over real samples only
        assert_eq!(summary.height_range, (100.0, 116.0));
    }

    #[test]
    fn test_negative_min_clamps_to_zero() {
        let dir = tempfile::tempdir().unwrap();

        let mut hm = ramp_height(9, 9);
        hm.set(0, 0, -5.0);
        let color = flat_color(36, 36);

        let summary = Converter::new(dir.path().join("neg"))
            .with_options(small_options())
            .run(&mut MockCodec::height(&hm, 2.0), &mut MockCodec::color(&color, 0.5))
            .unwrap();
        assert_eq!(summary.height_range.0, 0.0);
    }

    #[test]
    fn test_wrong_color_format_fails() {
        let hm = ramp_height(9, 9);
        let color = flat_color(36, 36);
        let mut hm_codec = MockCodec::height(&hm, 2.0);
        let mut color_codec = MockCodec::color(&color, 0.5);
        color_codec.descriptor.channels = 1;

        let err = Converter::new("unused")
            .with_options(small_options())
            .run(&mut hm_codec, &mut color_codec)
            .unwrap_err();
        assert!(matches!(err, ConvertError::Configuration(_)));
    }

    #[test]
    fn test_color_cap_shrinks_top_tile() {
        let dir = tempfile::tempdir().unwrap();

        let hm = ramp_height(10, 10);
        let color = flat_color(40, 40);
        // a 9-pixel tile implies a 36-pixel color tile; cap at 32 forces 5
        let options = ConvertOptions { max_color_tile_size: 32, ..small_options() };

        let summary = Converter::new(dir.path().join("cap"))
            .with_options(options)
            .run(&mut MockCodec::height(&hm, 2.0), &mut MockCodec::color(&color, 0.5))
            .unwrap();
        assert_eq!(summary.tile_size, 5);
    }

    #[test]
    fn test_color_cap_unreachable_fails() {
        let hm = ramp_height(10, 10);
        let color = flat_color(40, 40);
        let options = ConvertOptions { max_color_tile_size: 8, ..small_options() };

        let err = Converter::new("unused")
            .with_options(options)
            .run(&mut MockCodec::height(&hm, 2.0), &mut MockCodec::color(&color, 0.5))
            .unwrap_err();
        assert!(matches!(err, ConvertError::Configuration(_)));
    }

    #[test]
    fn test_col_row_name_order() {
        let dir = tempfile::tempdir().unwrap();

        // 18x9 gives a 1x2 grid of 9-pixel tiles in one region
        let hm = ramp_height(18, 9);
        let color = flat_color(72, 36);
        let options = ConvertOptions {
            tile_name_order: TileNameOrder::ColRow,
            ..small_options()
        };

        let summary = Converter::new(dir.path().join("cr"))
            .with_options(options)
            .run(&mut MockCodec::height(&hm, 2.0), &mut MockCodec::color(&color, 0.5))
            .unwrap();
        assert_eq!(summary.height_tiles, 2);
        assert!(dir.path().join("cr_HM_R00_01-00.hmr").exists());
        assert!(dir.path().join("cr_RGB_R00_01-00.tif").exists());
    }

    #[test]
    fn test_pre_rotation_cw90() {
        let dir = tempfile::tempdir().unwrap();

        let hm = ramp_height(9, 18);
        let color = flat_color(36, 72);
        let options = ConvertOptions { pre_rotation: PreRotation::Cw90, ..small_options() };

        // After rotation the raster is 18x9; the plan is a 2x1 grid
        let summary = Converter::new(dir.path().join("rot"))
            .with_options(options)
            .run(&mut MockCodec::height(&hm, 2.0), &mut MockCodec::color(&color, 0.5))
            .unwrap();
        assert_eq!(summary.height_tiles, 2);
    }

    #[test]
    fn test_quantization_uses_full_range() {
        let dir = tempfile::tempdir().unwrap();

        let hm = ramp_height(9, 9); // 100..116
        let color = flat_color(36, 36);

        Converter::new(dir.path().join("q"))
            .with_options(small_options())
            .run(&mut MockCodec::height(&hm, 2.0), &mut MockCodec::color(&color, 0.5))
            .unwrap();

        let (_, samples) = height_tile::read(&dir.path().join("q_HM_R00_00-00.hmr")).unwrap();
        // normalized u16 payload spans the whole [0, 1] interval
        let (min, max) = samples.finite_extrema();
        assert!(min.abs() < 1e-4);
        assert!((max - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_pixel_trait_layout() {
        assert_eq!(<u16 as Pixel>::BYTES_PER_PIXEL, 2);
        assert_eq!(<Rgb8 as Pixel>::BYTES_PER_PIXEL, 3);
        assert!(<f32 as Pixel>::IS_FLOAT);
    }
}
