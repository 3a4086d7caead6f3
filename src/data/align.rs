use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::model::{Acquisition, Observation, PixelSeries};
use crate::error::{AlignmentError, InputError, Result, SamplerError};

// ---------------------------------------------------------------------------
// DateGrid – the shared target axis
// ---------------------------------------------------------------------------

/// Strictly ascending dates every series in a run is resampled onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateGrid {
    dates: Vec<NaiveDate>,
}

impl DateGrid {
    pub fn new(dates: Vec<NaiveDate>) -> Result<Self> {
        if dates.is_empty() {
            return Err(AlignmentError::EmptyTargetGrid.into());
        }
        if let Some(pos) = dates.windows(2).position(|w| w[0] >= w[1]) {
            return Err(AlignmentError::UnsortedTargetGrid(pos + 1).into());
        }
        Ok(DateGrid { dates })
    }

    pub fn from_acquisitions(acquisitions: &[Acquisition]) -> Result<Self> {
        Self::new(acquisitions.iter().map(|a| a.date).collect())
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    fn position(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }
}

// ---------------------------------------------------------------------------
// Interpolation axis
// ---------------------------------------------------------------------------

/// What "linear" is measured against when filling interior gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Elapsed days between observations.
    #[default]
    Time,
    /// Grid positions, treating acquisitions as equally spaced. Observation
    /// dates must then lie on the grid.
    GridIndex,
}

// ---------------------------------------------------------------------------
// Alignment
// ---------------------------------------------------------------------------

/// Resample a quality-filtered series onto `grid`.
///
/// Interior grid dates are linearly interpolated per band between the two
/// surrounding observations; dates before the first observation repeat the
/// first value and dates after the last repeat the last value. Fill never
/// extrapolates a slope.
///
/// An empty series is insufficient data. A single observation, or dates that
/// are not strictly ascending, leave the interpolation direction undefined and
/// are reported as degenerate.
pub fn align(series: &PixelSeries, grid: &DateGrid, interpolation: Interpolation) -> Result<PixelSeries> {
    if grid.is_empty() {
        return Err(AlignmentError::EmptyTargetGrid.into());
    }
    if series.is_empty() {
        return Err(SamplerError::InsufficientData {
            pixel: series.pixel,
        });
    }
    let observations = &series.observations;
    if observations.len() < 2 || observations.windows(2).any(|w| w[0].date >= w[1].date) {
        return Err(AlignmentError::Degenerate {
            observations: observations.len(),
        }
        .into());
    }
    let bands = series.band_count();
    if let Some(obs) = observations.iter().find(|o| o.bands.len() != bands) {
        return Err(InputError::MissingBand {
            band: bands.max(obs.bands.len()) - 1,
            available: bands.min(obs.bands.len()),
        }
        .into());
    }

    let axis: Vec<f64> = match interpolation {
        Interpolation::Time => observations.iter().map(|o| day_number(o.date)).collect(),
        Interpolation::GridIndex => observations
            .iter()
            .map(|o| {
                grid.position(o.date)
                    .map(|p| p as f64)
                    .ok_or(InputError::DateNotOnGrid(o.date))
            })
            .collect::<std::result::Result<_, _>>()?,
    };

    let aligned = grid
        .dates()
        .iter()
        .enumerate()
        .map(|(pos, &date)| {
            let t = match interpolation {
                Interpolation::Time => day_number(date),
                Interpolation::GridIndex => pos as f64,
            };
            Observation {
                date,
                bands: sample_at(observations, &axis, t),
            }
        })
        .collect();

    Ok(series.with_observations(aligned))
}

/// Values at `t`, given observations positioned at the ascending `axis`.
fn sample_at(observations: &[Observation], axis: &[f64], t: f64) -> Vec<f64> {
    let last = axis.len() - 1;
    if t <= axis[0] {
        return observations[0].bands.clone();
    }
    if t >= axis[last] {
        return observations[last].bands.clone();
    }
    // First index with axis[i] >= t; 1..=last because of the checks above.
    let upper = axis.partition_point(|&a| a < t);
    if axis[upper] == t {
        return observations[upper].bands.clone();
    }
    let lower = upper - 1;
    let w = (t - axis[lower]) / (axis[upper] - axis[lower]);
    observations[lower]
        .bands
        .iter()
        .zip(&observations[upper].bands)
        .map(|(a, b)| a + (b - a) * w)
        .collect()
}

fn day_number(date: NaiveDate) -> f64 {
    f64::from(date.num_days_from_ce())
}
