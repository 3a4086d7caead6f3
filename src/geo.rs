//! Raster geometry: the affine pixel grid of an acquisition and reprojection
//! between EPSG-coded coordinate reference systems.

use std::fmt;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Deserialize, Serialize};

use crate::data::model::PixelCoord;
use crate::error::{InputError, Result, SamplerError};

/// WGS84 geographic (longitude/latitude in degrees).
pub const EPSG_WGS84: u32 = 4326;
/// Web Mercator.
pub const EPSG_WEB_MERCATOR: u32 = 3857;

// ---------------------------------------------------------------------------
// Crs – EPSG-coded coordinate reference system
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Crs(pub u32);

impl Crs {
    pub fn epsg(&self) -> u32 {
        self.0
    }

    pub fn is_geographic(&self) -> bool {
        self.0 == EPSG_WGS84
    }

    /// proj4 definition for the codes this tool understands: WGS84, Web
    /// Mercator and the WGS84 UTM zones.
    fn proj_string(&self) -> Option<String> {
        match self.0 {
            EPSG_WGS84 => Some("+proj=longlat +datum=WGS84 +no_defs".to_string()),
            EPSG_WEB_MERCATOR => Some(
                "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs"
                    .to_string(),
            ),
            code @ 32601..=32660 => Some(format!(
                "+proj=utm +zone={} +datum=WGS84 +units=m +no_defs",
                code - 32600
            )),
            code @ 32701..=32760 => Some(format!(
                "+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs",
                code - 32700
            )),
            _ => None,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// GeoTransform – north-up affine pixel grid
// ---------------------------------------------------------------------------

/// Maps raster row/column to map coordinates. `origin` is the outer corner
/// of pixel (0, 0); `pixel_height` is negative for north-up rasters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Identity grid: map coordinates equal (col, row).
    pub fn identity() -> Self {
        GeoTransform {
            origin_x: 0.0,
            origin_y: 0.0,
            pixel_width: 1.0,
            pixel_height: 1.0,
        }
    }

    /// Fractional row/column are floored, so any point inside a pixel maps to
    /// that pixel. The result may be negative or beyond the raster.
    pub fn index(&self, x: f64, y: f64) -> (i64, i64) {
        let (row, col) = self.fractional(x, y);
        (row.floor() as i64, col.floor() as i64)
    }

    fn fractional(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (y - self.origin_y) / self.pixel_height,
            (x - self.origin_x) / self.pixel_width,
        )
    }

    /// Map coordinates of the pixel centre.
    pub fn xy(&self, pixel: PixelCoord) -> (f64, f64) {
        let x = self.origin_x + (pixel.col as f64 + 0.5) * self.pixel_width;
        let y = self.origin_y + (pixel.row as f64 + 0.5) * self.pixel_height;
        (x, y)
    }

    /// Checked variant of [`index`](Self::index) for a `height` x `width` raster.
    /// Non-finite coordinates lie on no pixel.
    pub fn pixel_at(&self, x: f64, y: f64, height: usize, width: usize) -> Result<PixelCoord> {
        let (row, col) = self.fractional(x, y);
        if !(row.is_finite() && col.is_finite()) {
            return Err(InputError::CoordinateOutOfBounds { x, y }.into());
        }
        let (row, col) = (row.floor() as i64, col.floor() as i64);
        if row < 0 || col < 0 || row as usize >= height || col as usize >= width {
            return Err(InputError::CoordinateOutOfBounds { x, y }.into());
        }
        Ok(PixelCoord::new(row as usize, col as usize))
    }
}

// ---------------------------------------------------------------------------
// CoordTransformer – reprojection between two CRS
// ---------------------------------------------------------------------------

enum Strategy {
    Identity,
    Proj { source: Box<Proj>, target: Box<Proj> },
}

/// Reusable transformation between two EPSG codes.
pub struct CoordTransformer {
    source: Crs,
    target: Crs,
    strategy: Strategy,
}

impl fmt::Debug for CoordTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordTransformer")
            .field("source", &self.source)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl CoordTransformer {
    pub fn new(source: Crs, target: Crs) -> Result<Self> {
        if source == target {
            return Ok(CoordTransformer {
                source,
                target,
                strategy: Strategy::Identity,
            });
        }
        let source_proj = build_proj(source)?;
        let target_proj = build_proj(target)?;
        Ok(CoordTransformer {
            source,
            target,
            strategy: Strategy::Proj {
                source: Box::new(source_proj),
                target: Box::new(target_proj),
            },
        })
    }

    /// Geographic coordinates are longitude/latitude in degrees on both ends.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let (source, target) = match &self.strategy {
            Strategy::Identity => return Ok((x, y)),
            Strategy::Proj { source, target } => (source, target),
        };

        let mut point = if self.source.is_geographic() {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(source, target, &mut point).map_err(|e| {
            SamplerError::Projection(format!(
                "{} -> {} failed for ({x}, {y}): {e:?}",
                self.source, self.target
            ))
        })?;

        if self.target.is_geographic() {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }
}

fn build_proj(crs: Crs) -> Result<Proj> {
    let definition = crs
        .proj_string()
        .ok_or_else(|| SamplerError::Projection(format!("{crs} is not supported")))?;
    Proj::from_proj_string(&definition)
        .map_err(|e| SamplerError::Projection(format!("invalid definition for {crs}: {e:?}")))
}
