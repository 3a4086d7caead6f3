use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

use crate::data::model::PixelCoord;
use crate::geo::Crs;

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Invalid input. Never retried: every operation is deterministic, so the
/// same input reproduces the same failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("no acquisitions found")]
    EmptyAcquisitionList,

    #[error("file name '{0}' does not start with a YYYYMMDD date")]
    MalformedDatePrefix(String),

    #[error("two acquisitions share the date {0}")]
    DuplicateDate(NaiveDate),

    #[error("acquisitions are not sorted by date ({previous} before {next})")]
    UnsortedAcquisitions { previous: NaiveDate, next: NaiveDate },

    #[error("CRS mismatch: {expected} in the reference acquisition, {found} in {path}")]
    CrsMismatch {
        expected: Crs,
        found: Crs,
        path: PathBuf,
    },

    #[error("band count mismatch: expected {expected}, found {found} in {path}")]
    BandCountMismatch {
        expected: usize,
        found: usize,
        path: PathBuf,
    },

    #[error("raster shape mismatch: expected {expected:?}, found {found:?} in {path}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
        path: PathBuf,
    },

    #[error("pixel {pixel} lies outside the {height}x{width} raster")]
    PixelOutOfBounds {
        pixel: PixelCoord,
        height: usize,
        width: usize,
    },

    #[error("coordinate ({x}, {y}) lies outside the raster")]
    CoordinateOutOfBounds { x: f64, y: f64 },

    #[error("band {band} requested but observations carry only {available} bands")]
    MissingBand { band: usize, available: usize },

    #[error("series {index} has length {found}, expected {expected}")]
    LengthMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("series {index} contains a non-finite value at step {step}")]
    NonFiniteSeries { index: usize, step: usize },

    #[error("reference series is empty")]
    EmptyReference,

    #[error("reference series has length {found}, expected {expected}")]
    ReferenceLengthMismatch { expected: usize, found: usize },

    #[error("reference series contains a non-finite value at step {step}")]
    NonFiniteReference { step: usize },

    #[error("similarity threshold {0} is outside (0, 1)")]
    InvalidThreshold(f64),

    #[error("observation date {0} is not part of the target grid")]
    DateNotOnGrid(NaiveDate),

    #[error("rejected candidate {candidate} maps to record {record}, but only {records} records exist")]
    RecordOutOfRange {
        candidate: usize,
        record: usize,
        records: usize,
    },

    #[error("unsupported raster: {0}")]
    UnsupportedRaster(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A series could not be resampled onto the target grid.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignmentError {
    #[error("target date grid is empty")]
    EmptyTargetGrid,

    #[error("target date grid is not strictly ascending at position {0}")]
    UnsortedTargetGrid(usize),

    #[error("series with {observations} observation(s) has no defined interpolation direction")]
    Degenerate { observations: usize },
}

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("pixel {pixel} has no usable observation after quality filtering")]
    InsufficientData { pixel: PixelCoord },

    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TIFF error in {path}: {source}")]
    Tiff {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("projection error: {0}")]
    Projection(String),

    #[error("segmentation failed: {0}")]
    Segmentation(String),
}

impl SamplerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SamplerError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn tiff(path: impl Into<PathBuf>, source: tiff::TiffError) -> Self {
        SamplerError::Tiff {
            path: path.into(),
            source,
        }
    }

    /// Only a pixel without usable observations is handled at the
    /// per-reference-point boundary; everything else aborts the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SamplerError::InsufficientData { .. })
    }
}

pub type Result<T> = std::result::Result<T, SamplerError>;
