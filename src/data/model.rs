use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::geo::Crs;

// ---------------------------------------------------------------------------
// Acquisition – one raster per date
// ---------------------------------------------------------------------------

/// One co-registered source raster. The date is the sole sort and alignment key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    pub date: NaiveDate,
    pub path: PathBuf,
}

impl Acquisition {
    pub fn new(date: NaiveDate, path: impl Into<PathBuf>) -> Self {
        Acquisition {
            date,
            path: path.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// PixelCoord – raster-space index
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PixelCoord {
    pub row: usize,
    pub col: usize,
}

impl PixelCoord {
    pub fn new(row: usize, col: usize) -> Self {
        PixelCoord { row, col }
    }
}

impl fmt::Display for PixelCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

// ---------------------------------------------------------------------------
// Provenance – where a series or record came from
// ---------------------------------------------------------------------------

/// `Candidate { id }` carries the candidate's position in the candidate set
/// proposed for one reference point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Provenance {
    Reference,
    Candidate { id: usize },
}

impl Provenance {
    pub fn is_reference(&self) -> bool {
        matches!(self, Provenance::Reference)
    }

    /// Tag written to the sample store.
    pub fn tag(&self) -> &'static str {
        match self {
            Provenance::Reference => "reference",
            Provenance::Candidate { .. } => "candidate",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Reference => write!(f, "reference"),
            Provenance::Candidate { id } => write!(f, "candidate #{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// PixelSeries – multi-band observations of one pixel over time
// ---------------------------------------------------------------------------

/// Band values observed at one date.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub date: NaiveDate,
    pub bands: Vec<f64>,
}

/// One pixel's observations in ascending date order.
///
/// Every stage returns a new series instead of mutating its input, so the raw,
/// quality-filtered and aligned views never alias.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelSeries {
    pub pixel: PixelCoord,
    pub provenance: Provenance,
    /// Identifier of the reference point that spawned this series.
    pub reference_id: i64,
    pub observations: Vec<Observation>,
}

impl PixelSeries {
    /// Same pixel and provenance, new observations.
    pub fn with_observations(&self, observations: Vec<Observation>) -> Self {
        PixelSeries {
            pixel: self.pixel,
            provenance: self.provenance,
            reference_id: self.reference_id,
            observations,
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.observations.iter().map(|o| o.date)
    }

    /// Band count of the first observation (0 for an empty series).
    pub fn band_count(&self) -> usize {
        self.observations.first().map_or(0, |o| o.bands.len())
    }

    /// Values of one band across all dates.
    pub fn band(&self, band: usize) -> Option<Vec<f64>> {
        self.observations
            .iter()
            .map(|o| o.bands.get(band).copied())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// DerivedIndexSeries – one scalar per date
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedIndexSeries {
    pub provenance: Provenance,
    pub values: Vec<f64>,
}

impl DerivedIndexSeries {
    /// Coerce NaN and ±inf to 0.
    pub fn sanitized(mut self) -> Self {
        for v in &mut self.values {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
        self
    }

    /// Index of the first non-finite value, if any.
    pub fn first_non_finite(&self) -> Option<usize> {
        self.values.iter().position(|v| !v.is_finite())
    }
}

// ---------------------------------------------------------------------------
// SimilarityVerdict – per-candidate decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityVerdict {
    /// Index into the candidate set given to the similarity filter.
    pub candidate: usize,
    pub distance: f64,
    pub similarity: f64,
    pub accepted: bool,
}

// ---------------------------------------------------------------------------
// Reference points and sample-store records
// ---------------------------------------------------------------------------

/// A trusted, labelled sample in map coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub id: i64,
    #[serde(alias = "multi_clas", alias = "class")]
    pub label: i64,
    pub x: f64,
    pub y: f64,
    /// CRS of `x`/`y`; `None` means the raster CRS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<Crs>,
}

/// One row of the sample store. For each reference point the reference
/// occupies index 0 and candidates follow in candidate-set order.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub provenance: Provenance,
    pub label: i64,
    pub reference_id: i64,
    pub x: f64,
    pub y: f64,
}

impl SampleRecord {
    /// Geometry key used by the final exact-match deduplication.
    pub fn geometry_key(&self) -> (u64, u64) {
        (self.x.to_bits(), self.y.to_bits())
    }
}

/// An accepted record together with its aligned band series.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedSample {
    pub record: SampleRecord,
    /// One band vector per target date.
    pub series: Vec<Vec<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 5, d).unwrap()
    }

    #[test]
    fn band_extraction_follows_dates() {
        let series = PixelSeries {
            pixel: PixelCoord::new(0, 0),
            provenance: Provenance::Reference,
            reference_id: 1,
            observations: vec![
                Observation { date: date(1), bands: vec![1.0, 10.0] },
                Observation { date: date(2), bands: vec![2.0, 20.0] },
            ],
        };
        assert_eq!(series.band(1), Some(vec![10.0, 20.0]));
        assert_eq!(series.band(2), None);
        assert_eq!(series.band_count(), 2);
    }

    #[test]
    fn sanitize_replaces_non_finite_with_zero() {
        let series = DerivedIndexSeries {
            provenance: Provenance::Candidate { id: 0 },
            values: vec![0.5, f64::NAN, f64::INFINITY, f64::NEG_INFINITY],
        };
        assert_eq!(series.first_non_finite(), Some(1));
        let clean = series.sanitized();
        assert_eq!(clean.values, vec![0.5, 0.0, 0.0, 0.0]);
        assert_eq!(clean.first_non_finite(), None);
    }

    #[test]
    fn provenance_tags() {
        assert_eq!(Provenance::Reference.tag(), "reference");
        assert_eq!(Provenance::Candidate { id: 4 }.tag(), "candidate");
        assert_eq!(Provenance::Candidate { id: 4 }.to_string(), "candidate #4");
    }
}
