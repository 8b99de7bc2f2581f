//! Georeferencing header assembly.
//!
//! Pulls the GeoTIFF metadata a conversion needs out of a [`RasterCodec`]:
//! the model pixel scale, the raster-to-model tie points, the decoded GeoKey
//! directory, the declared sample range and the GDAL nodata marker. The
//! result is a plain [`GeoRasterHeader`] value the alignment and conversion
//! stages consume without touching the codec again.

use tracing::warn;

use crate::codec::{
    CodecError, ImageDescriptor, RasterCodec, TAG_GDAL_NODATA, TAG_GEO_ASCII_PARAMS,
    TAG_GEO_DOUBLE_PARAMS, TAG_GEO_KEY_DIRECTORY, TAG_MAX_SAMPLE_VALUE, TAG_MIN_SAMPLE_VALUE,
    TAG_MODEL_PIXEL_SCALE, TAG_MODEL_TIE_POINT, TAG_SMAX_SAMPLE_VALUE, TAG_SMIN_SAMPLE_VALUE,
};
use crate::geokeys::{GeoKeyDirectory, GeoKeyError};

/// Error type for header loading.
#[derive(Debug)]
pub enum HeaderError {
    /// The raster carries no `ModelPixelScale` tag
    MissingPixelScale,
    /// A georeferencing tag had the wrong element count
    BadTagArity { tag: u16, expected: usize, actual: usize },
    GeoKey(GeoKeyError),
    Codec(CodecError),
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPixelScale => write!(f, "Raster has no ModelPixelScale tag"),
            Self::BadTagArity { tag, expected, actual } => {
                write!(f, "Tag {tag} carries {actual} values, expected {expected}")
            }
            Self::GeoKey(e) => write!(f, "GeoKey directory error: {e}"),
            Self::Codec(e) => write!(f, "Codec error: {e}"),
        }
    }
}

impl std::error::Error for HeaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::GeoKey(e) => Some(e),
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GeoKeyError> for HeaderError {
    fn from(e: GeoKeyError) -> Self {
        Self::GeoKey(e)
    }
}

impl From<CodecError> for HeaderError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

/// One raster-point to model-point anchor (`ModelTiePoint` sextuple).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiePoint {
    /// Raster-space point `(i, j, k)` in pixels
    pub raster: [f64; 3],
    /// Model-space point `(x, y, z)` in model units
    pub model: [f64; 3],
}

/// `ModelPixelScale`: model units per pixel step per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelScale {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PixelScale {
    /// Whether the horizontal axes are equal to within `tolerance`.
    #[must_use]
    pub fn is_square(&self, tolerance: f64) -> bool {
        (self.x - self.y).abs() <= tolerance * self.x.abs().max(self.y.abs())
    }

    /// The larger horizontal axis.
    #[inline]
    #[must_use]
    pub fn max_axis(&self) -> f64 {
        self.x.max(self.y)
    }
}

/// Everything the pipeline needs to know about one input raster.
#[derive(Debug, Clone)]
pub struct GeoRasterHeader {
    pub descriptor: ImageDescriptor,
    pub pixel_scale: PixelScale,
    pub tie_points: Vec<TiePoint>,
    pub geo_keys: Option<GeoKeyDirectory>,
    /// Declared minimum sample value, from `SMinSampleValue` or
    /// `MinSampleValue`
    pub min_sample: Option<f64>,
    pub max_sample: Option<f64>,
    /// GDAL nodata marker, parsed from its ascii tag
    pub nodata: Option<f64>,
}

impl GeoRasterHeader {
    /// Load the header from a codec.
    ///
    /// # Errors
    /// Fails if the codec cannot serve the image, the pixel scale tag is
    /// missing or malformed, tie points have a broken arity or the GeoKey
    /// directory is structurally corrupt. A missing GeoKey directory and an
    /// unparseable nodata string only warn.
    pub fn load(codec: &mut dyn RasterCodec) -> Result<Self, HeaderError> {
        let descriptor = codec.descriptor()?;

        let scale_values = codec
            .tag_f64_array(TAG_MODEL_PIXEL_SCALE)?
            .ok_or(HeaderError::MissingPixelScale)?;
        if scale_values.len() != 3 {
            return Err(HeaderError::BadTagArity {
                tag: TAG_MODEL_PIXEL_SCALE,
                expected: 3,
                actual: scale_values.len(),
            });
        }
        let pixel_scale =
            PixelScale { x: scale_values[0], y: scale_values[1], z: scale_values[2] };

        let tie_points = match codec.tag_f64_array(TAG_MODEL_TIE_POINT)? {
            Some(values) => {
                if values.len() % 6 != 0 {
                    return Err(HeaderError::BadTagArity {
                        tag: TAG_MODEL_TIE_POINT,
                        expected: 6,
                        actual: values.len(),
                    });
                }
                values
                    .chunks_exact(6)
                    .map(|c| TiePoint {
                        raster: [c[0], c[1], c[2]],
                        model: [c[3], c[4], c[5]],
                    })
                    .collect()
            }
            None => Vec::new(),
        };

        let geo_keys = match codec.tag_u16_array(TAG_GEO_KEY_DIRECTORY)? {
            Some(directory) => {
                let doubles = codec.tag_f64_array(TAG_GEO_DOUBLE_PARAMS)?.unwrap_or_default();
                let ascii = codec.tag_ascii(TAG_GEO_ASCII_PARAMS)?.unwrap_or_default();
                Some(GeoKeyDirectory::parse(&directory, &doubles, &ascii)?)
            }
            None => {
                warn!("Raster has no GeoKey directory");
                None
            }
        };

        let min_sample = read_sample_bound(codec, TAG_SMIN_SAMPLE_VALUE, TAG_MIN_SAMPLE_VALUE)?;
        let max_sample = read_sample_bound(codec, TAG_SMAX_SAMPLE_VALUE, TAG_MAX_SAMPLE_VALUE)?;

        let nodata = match codec.tag_ascii(TAG_GDAL_NODATA)? {
            Some(text) => match text.trim().trim_end_matches('\0').parse::<f64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(text = %text, "Unparseable nodata tag; ignoring");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            descriptor,
            pixel_scale,
            tie_points,
            geo_keys,
            min_sample,
            max_sample,
            nodata,
        })
    }

    /// Exchange the horizontal axes, matching a quarter-turn pre-rotation of
    /// the pixel data.
    pub fn swap_axes(&mut self) {
        std::mem::swap(&mut self.descriptor.width, &mut self.descriptor.height);
        std::mem::swap(&mut self.pixel_scale.x, &mut self.pixel_scale.y);
        for tp in &mut self.tie_points {
            tp.raster.swap(0, 1);
        }
    }

    /// First tie point, if any.
    #[must_use]
    pub fn tie_point(&self) -> Option<&TiePoint> {
        self.tie_points.first()
    }
}

/// Read a declared sample bound: the float `SMin`/`SMax` tag wins, falling
/// back to the baseline unsigned tag.
fn read_sample_bound(
    codec: &mut dyn RasterCodec,
    float_tag: u16,
    baseline_tag: u16,
) -> Result<Option<f64>, HeaderError> {
    if let Some(values) = codec.tag_f64_array(float_tag)? {
        if let Some(&v) = values.first() {
            return Ok(Some(v));
        }
    }
    if let Some(values) = codec.tag_u16_array(baseline_tag)? {
        if let Some(&v) = values.first() {
            return Ok(Some(f64::from(v)));
        }
    }
    Ok(None)
}
