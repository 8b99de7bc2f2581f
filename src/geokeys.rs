//! GeoKey directory decoding.
//!
//! A GeoTIFF stores its georeferencing metadata as a flat unsigned-16-bit
//! "key directory" array plus two auxiliary blobs: a double-precision
//! parameter array and a pipe-delimited ascii parameter string. This module
//! parses those three inputs into a typed [`GeoKeyDirectory`].
//!
//! The directory layout is a 4-element header (`version`, `major_revision`,
//! `minor_revision`, `key_count`) followed by `key_count` 4-element key
//! records: `(key_id, value_location, value_count, value_offset)`. The
//! `value_location` field selects where the value lives: `0` means the
//! offset field *is* the value (an unsigned 16-bit code), while the tag ids
//! of the double and ascii parameter blobs reference those arrays.
//!
//! Unknown key ids and out-of-domain enum codes are stored and warned about,
//! never fatal; structural corruption (bad version, truncated records,
//! dangling references) is fatal.

use std::collections::HashMap;

use tracing::warn;

use crate::codec::{TAG_GEO_ASCII_PARAMS, TAG_GEO_DOUBLE_PARAMS};

/// The only supported key directory version.
pub const GEO_KEY_DIRECTORY_VERSION: u16 = 1;

// Well-known GeoKey ids.
pub const KEY_GT_MODEL_TYPE: u16 = 1024;
pub const KEY_GT_RASTER_TYPE: u16 = 1025;
pub const KEY_GT_CITATION: u16 = 1026;
pub const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
pub const KEY_GEOG_CITATION: u16 = 2049;
pub const KEY_GEOG_GEODETIC_DATUM: u16 = 2050;
pub const KEY_GEOG_PRIME_MERIDIAN: u16 = 2051;
pub const KEY_GEOG_LINEAR_UNITS: u16 = 2052;
pub const KEY_GEOG_LINEAR_UNIT_SIZE: u16 = 2053;
pub const KEY_GEOG_ANGULAR_UNITS: u16 = 2054;
pub const KEY_GEOG_ANGULAR_UNIT_SIZE: u16 = 2055;
pub const KEY_GEOG_ELLIPSOID: u16 = 2056;
pub const KEY_GEOG_SEMI_MAJOR_AXIS: u16 = 2057;
pub const KEY_GEOG_SEMI_MINOR_AXIS: u16 = 2058;
pub const KEY_GEOG_INV_FLATTENING: u16 = 2059;
pub const KEY_GEOG_AZIMUTH_UNITS: u16 = 2060;
pub const KEY_GEOG_PRIME_MERIDIAN_LON: u16 = 2061;
pub const KEY_PROJECTED_CS_TYPE: u16 = 3072;
pub const KEY_PCS_CITATION: u16 = 3073;
pub const KEY_PROJECTION: u16 = 3074;
pub const KEY_PROJ_COORD_TRANS: u16 = 3075;
pub const KEY_PROJ_LINEAR_UNITS: u16 = 3076;
pub const KEY_PROJ_LINEAR_UNIT_SIZE: u16 = 3077;
pub const KEY_VERTICAL_CS_TYPE: u16 = 4096;
pub const KEY_VERTICAL_CITATION: u16 = 4097;
pub const KEY_VERTICAL_DATUM: u16 = 4098;
pub const KEY_VERTICAL_UNITS: u16 = 4099;

/// Error type for GeoKey directory parsing. All variants are fatal.
#[derive(Debug)]
pub enum GeoKeyError {
    /// Directory version was not [`GEO_KEY_DIRECTORY_VERSION`]
    Version(u16),
    /// A key record would read past the end of the directory array
    TruncatedDirectory { key_index: usize, key_count: usize },
    /// An inline or double-array key declared a value count other than 1
    Arity { key_id: u16, value_count: u16 },
    /// A double/ascii reference points outside its source array, or the
    /// declared ascii length disagrees with the delimiter position
    CorruptReference { key_id: u16, detail: String },
    /// The value-location field named an unknown source tag
    InvalidLocation { key_id: u16, location: u16 },
}

impl std::fmt::Display for GeoKeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Version(v) => {
                write!(f, "GeoKey directory version must be {GEO_KEY_DIRECTORY_VERSION}, was {v}")
            }
            Self::TruncatedDirectory { key_index, key_count } => write!(
                f,
                "GeoKey record {key_index}/{key_count} runs past the end of the directory array"
            ),
            Self::Arity { key_id, value_count } => write!(
                f,
                "GeoKey {key_id} declares {value_count} values, only 1 value per key supported"
            ),
            Self::CorruptReference { key_id, detail } => {
                write!(f, "GeoKey {key_id} has a corrupt value reference: {detail}")
            }
            Self::InvalidLocation { key_id, location } => write!(
                f,
                "GeoKey {key_id} value location {location} is invalid; must be 0, \
                 {TAG_GEO_DOUBLE_PARAMS} or {TAG_GEO_ASCII_PARAMS}"
            ),
        }
    }
}

impl std::error::Error for GeoKeyError {}

/// Model space type (`GTModelTypeGeoKey`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelType {
    #[default]
    Undefined,
    Projected,
    Geographic,
    Geocentric,
}

impl ModelType {
    fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Undefined),
            1 => Some(Self::Projected),
            2 => Some(Self::Geographic),
            3 => Some(Self::Geocentric),
            _ => None,
        }
    }
}

/// Raster space convention (`GTRasterTypeGeoKey`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RasterType {
    #[default]
    Undefined,
    PixelIsArea,
    PixelIsPoint,
}

impl RasterType {
    fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Undefined),
            1 => Some(Self::PixelIsArea),
            2 => Some(Self::PixelIsPoint),
            _ => None,
        }
    }
}

/// Linear unit code (EPSG 90xx range)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinearUnit {
    #[default]
    Undefined,
    Meter,
    Foot,
    FootUsSurvey,
    FootModifiedAmerican,
    FootClarke,
    FootIndian,
    Link,
    Mile,
    Kilometer,
    Fathom,
    Yard,
}

impl LinearUnit {
    fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Undefined),
            9001 => Some(Self::Meter),
            9002 => Some(Self::Foot),
            9003 => Some(Self::FootUsSurvey),
            9004 => Some(Self::FootModifiedAmerican),
            9005 => Some(Self::FootClarke),
            9006 => Some(Self::FootIndian),
            9007 => Some(Self::Link),
            9035 => Some(Self::Mile),
            9036 => Some(Self::Kilometer),
            9014 => Some(Self::Fathom),
            9096 => Some(Self::Yard),
            _ => None,
        }
    }
}

/// Angular unit code (EPSG 91xx range)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AngularUnit {
    #[default]
    Undefined,
    Radian,
    Degree,
    ArcMinute,
    ArcSecond,
    Grad,
    Gon,
    Dms,
    DmsHemisphere,
}

impl AngularUnit {
    fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Undefined),
            9101 => Some(Self::Radian),
            9102 => Some(Self::Degree),
            9103 => Some(Self::ArcMinute),
            9104 => Some(Self::ArcSecond),
            9105 => Some(Self::Grad),
            9106 => Some(Self::Gon),
            9107 => Some(Self::Dms),
            9108 => Some(Self::DmsHemisphere),
            _ => None,
        }
    }
}

/// One raw 4-element key record, kept verbatim for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawGeoKey {
    pub key_id: u16,
    pub location: u16,
    pub value_count: u16,
    pub value_offset: u16,
}

/// Parsed GeoKey directory.
///
/// Every resolved value lands in one of the three category maps keyed by raw
/// key id; well-known keys are additionally projected onto the named fields.
#[derive(Debug, Clone, Default)]
pub struct GeoKeyDirectory {
    pub major_revision: u16,
    pub minor_revision: u16,
    pub raw_keys: Vec<RawGeoKey>,

    /// Unsigned 16-bit code values, keyed by raw key id
    pub code_values: HashMap<u16, u16>,
    /// Double values, keyed by raw key id
    pub double_values: HashMap<u16, f64>,
    /// Ascii values, keyed by raw key id
    pub ascii_values: HashMap<u16, String>,

    pub model_type: ModelType,
    pub raster_type: RasterType,
    pub geographic_cs_code: Option<u16>,
    pub projected_cs_code: Option<u16>,
    pub vertical_cs_code: Option<u16>,
    pub geog_linear_unit: LinearUnit,
    pub geog_angular_unit: AngularUnit,
    pub proj_linear_unit: LinearUnit,
    pub vertical_linear_unit: LinearUnit,
    pub gt_citation: String,
    pub geog_citation: String,
    pub pcs_citation: String,
    pub vertical_citation: String,
}

impl GeoKeyDirectory {
    /// Parse the raw key directory plus its auxiliary double and ascii blobs.
    ///
    /// `ascii` is the full `GeoAsciiParams` string with values separated by
    /// `|`; each key's `value_offset` is a character inset into that blob.
    ///
    /// # Errors
    /// Returns [`GeoKeyError`] on a bad version, truncated key records,
    /// dangling references or an unknown value location. Unknown key ids and
    /// out-of-domain codes only log a warning.
    pub fn parse(directory: &[u16], doubles: &[f64], ascii: &str) -> Result<Self, GeoKeyError> {
        if directory.len() < 4 {
            return Err(GeoKeyError::TruncatedDirectory { key_index: 0, key_count: 0 });
        }

        let version = directory[0];
        if version != GEO_KEY_DIRECTORY_VERSION {
            return Err(GeoKeyError::Version(version));
        }

        let mut dir = GeoKeyDirectory {
            major_revision: directory[1],
            minor_revision: directory[2],
            ..Default::default()
        };

        let key_count = directory[3] as usize;
        dir.raw_keys.reserve(key_count);

        for ki in 0..key_count {
            let base = 4 + ki * 4;
            if base + 4 > directory.len() {
                return Err(GeoKeyError::TruncatedDirectory { key_index: ki, key_count });
            }

            let raw = RawGeoKey {
                key_id: directory[base],
                location: directory[base + 1],
                value_count: directory[base + 2],
                value_offset: directory[base + 3],
            };
            dir.raw_keys.push(raw);

            match raw.location {
                0 => {
                    if raw.value_count != 1 {
                        return Err(GeoKeyError::Arity {
                            key_id: raw.key_id,
                            value_count: raw.value_count,
                        });
                    }
                    dir.add_code_value(raw.key_id, raw.value_offset);
                }
                TAG_GEO_DOUBLE_PARAMS => {
                    if raw.value_count != 1 {
                        return Err(GeoKeyError::Arity {
                            key_id: raw.key_id,
                            value_count: raw.value_count,
                        });
                    }
                    let value = doubles.get(raw.value_offset as usize).copied().ok_or_else(|| {
                        GeoKeyError::CorruptReference {
                            key_id: raw.key_id,
                            detail: format!(
                                "double offset {} outside parameter array of length {}",
                                raw.value_offset,
                                doubles.len()
                            ),
                        }
                    })?;
                    dir.add_double_value(raw.key_id, value);
                }
                TAG_GEO_ASCII_PARAMS => {
                    if raw.value_count < 1 {
                        return Err(GeoKeyError::Arity {
                            key_id: raw.key_id,
                            value_count: raw.value_count,
                        });
                    }
                    let value = resolve_ascii(ascii, &raw)?;
                    dir.add_ascii_value(raw.key_id, value);
                }
                other => {
                    return Err(GeoKeyError::InvalidLocation {
                        key_id: raw.key_id,
                        location: other,
                    });
                }
            }
        }

        Ok(dir)
    }

    fn add_code_value(&mut self, key_id: u16, code: u16) {
        self.code_values.insert(key_id, code);

        match key_id {
            KEY_GT_MODEL_TYPE => match ModelType::from_code(code) {
                Some(v) => self.model_type = v,
                None => warn_unknown_code("GTModelType", code),
            },
            KEY_GT_RASTER_TYPE => match RasterType::from_code(code) {
                Some(v) => self.raster_type = v,
                None => warn_unknown_code("GTRasterType", code),
            },
            KEY_GEOGRAPHIC_TYPE => self.geographic_cs_code = Some(code),
            KEY_PROJECTED_CS_TYPE => self.projected_cs_code = Some(code),
            KEY_VERTICAL_CS_TYPE => self.vertical_cs_code = Some(code),
            KEY_GEOG_LINEAR_UNITS => match LinearUnit::from_code(code) {
                Some(v) => self.geog_linear_unit = v,
                None => warn_unknown_code("GeogLinearUnits", code),
            },
            KEY_GEOG_ANGULAR_UNITS | KEY_GEOG_AZIMUTH_UNITS => {
                match AngularUnit::from_code(code) {
                    Some(v) => self.geog_angular_unit = v,
                    None => warn_unknown_code("GeogAngularUnits", code),
                }
            }
            KEY_PROJ_LINEAR_UNITS => match LinearUnit::from_code(code) {
                Some(v) => self.proj_linear_unit = v,
                None => warn_unknown_code("ProjLinearUnits", code),
            },
            KEY_VERTICAL_UNITS => match LinearUnit::from_code(code) {
                Some(v) => self.vertical_linear_unit = v,
                None => warn_unknown_code("VerticalUnits", code),
            },
            KEY_GEOG_GEODETIC_DATUM | KEY_GEOG_PRIME_MERIDIAN | KEY_GEOG_ELLIPSOID
            | KEY_PROJECTION | KEY_PROJ_COORD_TRANS | KEY_VERTICAL_DATUM => {
                // Passed through opaquely; kept in the code map only.
            }
            other => {
                warn!(key_id = other, code, "Storing code value for unrecognized GeoKey");
            }
        }
    }

    fn add_double_value(&mut self, key_id: u16, value: f64) {
        self.double_values.insert(key_id, value);

        match key_id {
            KEY_GEOG_LINEAR_UNIT_SIZE
            | KEY_GEOG_ANGULAR_UNIT_SIZE
            | KEY_GEOG_SEMI_MAJOR_AXIS
            | KEY_GEOG_SEMI_MINOR_AXIS
            | KEY_GEOG_INV_FLATTENING
            | KEY_GEOG_PRIME_MERIDIAN_LON
            | KEY_PROJ_LINEAR_UNIT_SIZE => {}
            // Projection parameters (3078..=3095) are passed through opaquely.
            3078..=3095 => {}
            other => {
                warn!(key_id = other, value, "Storing double value for unrecognized GeoKey");
            }
        }
    }

    fn add_ascii_value(&mut self, key_id: u16, value: String) {
        match key_id {
            KEY_GT_CITATION => self.gt_citation = value.clone(),
            KEY_GEOG_CITATION => self.geog_citation = value.clone(),
            KEY_PCS_CITATION => self.pcs_citation = value.clone(),
            KEY_VERTICAL_CITATION => self.vertical_citation = value.clone(),
            other => {
                warn!(key_id = other, value = %value, "Storing ascii value for unrecognized GeoKey");
            }
        }
        self.ascii_values.insert(key_id, value);
    }

    /// Look up a code value by raw key id.
    #[inline]
    #[must_use]
    pub fn code(&self, key_id: u16) -> Option<u16> {
        self.code_values.get(&key_id).copied()
    }

    /// Look up a double value by raw key id.
    #[inline]
    #[must_use]
    pub fn double(&self, key_id: u16) -> Option<f64> {
        self.double_values.get(&key_id).copied()
    }

    /// Look up an ascii value by raw key id.
    #[inline]
    #[must_use]
    pub fn ascii(&self, key_id: u16) -> Option<&str> {
        self.ascii_values.get(&key_id).map(String::as_str)
    }
}

/// Resolve an ascii key record against the pipe-delimited parameter blob.
///
/// The record's `value_offset` is a cumulative character inset: we walk the
/// delimited segments, consuming each segment's length, until the inset is
/// exhausted. The declared `value_count` must then equal the segment length
/// plus one (the trailing delimiter).
fn resolve_ascii(blob: &str, raw: &RawGeoKey) -> Result<String, GeoKeyError> {
    let mut inset = i64::from(raw.value_offset);
    let mut chosen: Option<&str> = None;

    for segment in blob.split('|') {
        chosen = Some(segment);
        inset -= segment.len() as i64;
        if inset < 0 {
            break;
        }
    }

    let Some(value) = chosen else {
        return Err(GeoKeyError::CorruptReference {
            key_id: raw.key_id,
            detail: "ascii parameter blob is empty".to_string(),
        });
    };

    if inset >= 0 {
        return Err(GeoKeyError::CorruptReference {
            key_id: raw.key_id,
            detail: format!("ascii offset {} outside parameter blob", raw.value_offset),
        });
    }

    if usize::from(raw.value_count) != value.len() + 1 {
        return Err(GeoKeyError::CorruptReference {
            key_id: raw.key_id,
            detail: format!("expected {} chars, got {}", raw.value_count, value.len() + 1),
        });
    }

    Ok(value.to_string())
}

fn warn_unknown_code(key: &str, code: u16) {
    warn!(key, code, "GeoKey code outside known value domain; stored anyway");
}
