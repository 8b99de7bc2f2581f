//! Height/color raster alignment checks.
//!
//! Before tiling, the two input rasters must be shown to describe the same
//! patch of ground. The checks compare model pixel scales (producing the
//! height-to-color pixel ratio the tiling passes scale rectangles by), tie
//! point positions in both raster and model space, and the linear units the
//! GeoKey directories declare. Small disagreements warn; disagreements
//! larger than half a pixel are fatal.

use tracing::warn;

use crate::geokeys::LinearUnit;
use crate::header::GeoRasterHeader;

/// Tie points may disagree by at most this many height-raster pixels.
const TIE_POINT_TOLERANCE_PIX: f64 = 0.5;

/// Error type for alignment checks. All variants are fatal.
#[derive(Debug)]
pub enum AlignmentError {
    /// A raster carries no tie point to anchor the comparison
    MissingTiePoint { raster: &'static str },
    /// Tie points disagree by more than half a height pixel in raster space
    TiePointMismatch { axis: &'static str, delta_pix: f64 },
    /// The two rasters declare different horizontal linear units
    UnitMismatch { height: LinearUnit, color: LinearUnit },
    /// A pixel scale axis is zero, negative or non-finite
    BadPixelScale { raster: &'static str, value: f64 },
}

impl std::fmt::Display for AlignmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTiePoint { raster } => {
                write!(f, "The {raster} raster has no model tie point")
            }
            Self::TiePointMismatch { axis, delta_pix } => write!(
                f,
                "Tie points disagree by {delta_pix:.3} height pixels on the {axis} axis \
                 (tolerance {TIE_POINT_TOLERANCE_PIX})"
            ),
            Self::UnitMismatch { height, color } => write!(
                f,
                "Height raster uses {height:?} but color raster uses {color:?}"
            ),
            Self::BadPixelScale { raster, value } => {
                write!(f, "The {raster} raster has an invalid pixel scale {value}")
            }
        }
    }
}

impl std::error::Error for AlignmentError {}

/// Verified relationship between the two input rasters.
#[derive(Debug, Clone, Copy)]
pub struct Alignment {
    /// Multiply height-raster pixel coordinates by this to get color-raster
    /// pixel coordinates
    pub hm_to_color: f64,
    /// Inverse ratio
    pub color_to_hm: f64,
    /// Model-space tie point offset (color minus height), in model units
    pub model_delta: (f64, f64),
}

impl Alignment {
    /// Run every alignment check between a height and a color header.
    ///
    /// The color scale is taken as the larger of its two horizontal axes, so
    /// a slightly anisotropic orthophoto still aligns; the height raster's
    /// squareness is the caller's concern.
    ///
    /// # Errors
    /// Fails on a missing tie point, a degenerate pixel scale, a declared
    /// unit mismatch or a raster-space tie point disagreement beyond half a
    /// height pixel.
    pub fn check(height: &GeoRasterHeader, color: &GeoRasterHeader) -> Result<Self, AlignmentError> {
        let hm_scale = height.pixel_scale.x;
        if !(hm_scale.is_finite() && hm_scale > 0.0) {
            return Err(AlignmentError::BadPixelScale { raster: "height", value: hm_scale });
        }
        if !color.pixel_scale.is_square(1e-6) {
            warn!(
                x = color.pixel_scale.x,
                y = color.pixel_scale.y,
                "Color raster pixels are not square; using the larger axis"
            );
        }
        let color_scale = color.pixel_scale.max_axis();
        if !(color_scale.is_finite() && color_scale > 0.0) {
            return Err(AlignmentError::BadPixelScale { raster: "color", value: color_scale });
        }

        check_units(height, color)?;

        let hm_to_color = hm_scale / color_scale;
        let color_to_hm = color_scale / hm_scale;

        let hm_tp = height
            .tie_point()
            .ok_or(AlignmentError::MissingTiePoint { raster: "height" })?;
        let color_tp = color
            .tie_point()
            .ok_or(AlignmentError::MissingTiePoint { raster: "color" })?;

        // Compare the raster-space anchors in height-pixel units
        for (axis, idx) in [("x", 0), ("y", 1)] {
            let delta_pix = (color_tp.raster[idx] * color_to_hm - hm_tp.raster[idx]).abs();
            if delta_pix > TIE_POINT_TOLERANCE_PIX {
                return Err(AlignmentError::TiePointMismatch { axis, delta_pix });
            }
            if delta_pix > 0.0 {
                warn!(axis, delta_pix, "Tie points differ within tolerance");
            }
        }

        // Model-space anchors should coincide to within half a height pixel
        let model_delta = (
            color_tp.model[0] - hm_tp.model[0],
            color_tp.model[1] - hm_tp.model[1],
        );
        let half_pixel = hm_scale * 0.5;
        if model_delta.0.abs() > half_pixel || model_delta.1.abs() > half_pixel {
            warn!(
                dx = model_delta.0,
                dy = model_delta.1,
                half_pixel,
                "Model-space tie points differ by more than half a height pixel"
            );
        }

        Ok(Self { hm_to_color, color_to_hm, model_delta })
    }
}

fn check_units(height: &GeoRasterHeader, color: &GeoRasterHeader) -> Result<(), AlignmentError> {
    let (Some(hm_keys), Some(color_keys)) = (&height.geo_keys, &color.geo_keys) else {
        return Ok(());
    };

    let hm_unit = hm_keys.proj_linear_unit;
    let color_unit = color_keys.proj_linear_unit;
    if hm_unit != LinearUnit::Undefined
        && color_unit != LinearUnit::Undefined
        && hm_unit != color_unit
    {
        return Err(AlignmentError::UnitMismatch { height: hm_unit, color: color_unit });
    }

    let vert_unit = hm_keys.vertical_linear_unit;
    if hm_unit != LinearUnit::Undefined
        && vert_unit != LinearUnit::Undefined
        && hm_unit != vert_unit
    {
        warn!(
            horizontal = ?hm_unit,
            vertical = ?vert_unit,
            "Height raster horizontal and vertical units differ"
        );
    }
    Ok(())
}
