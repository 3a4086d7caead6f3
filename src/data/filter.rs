use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::model::{Observation, PixelSeries};
use crate::error::{InputError, Result};

// ---------------------------------------------------------------------------
// QualityCode – values of the auxiliary quality band
// ---------------------------------------------------------------------------

/// Quality-band codes (Sentinel-2 scene classification numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QualityCode {
    NoData = 0,
    CloudShadow = 3,
    CloudMediumProbability = 8,
    CloudHighProbability = 9,
    ThinCirrus = 10,
}

impl QualityCode {
    /// Codes that disqualify a time-step.
    pub fn contaminated() -> BTreeSet<QualityCode> {
        [
            QualityCode::CloudShadow,
            QualityCode::CloudMediumProbability,
            QualityCode::CloudHighProbability,
            QualityCode::ThinCirrus,
        ]
        .into_iter()
        .collect()
    }

    /// Contaminated codes plus fill; used to rank whole acquisitions.
    pub fn invalid() -> BTreeSet<QualityCode> {
        let mut codes = Self::contaminated();
        codes.insert(QualityCode::NoData);
        codes
    }

    pub fn matches(&self, value: f64) -> bool {
        value == f64::from(u8::from(*self))
    }
}

impl From<QualityCode> for u8 {
    fn from(code: QualityCode) -> u8 {
        code as u8
    }
}

impl TryFrom<u8> for QualityCode {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(QualityCode::NoData),
            3 => Ok(QualityCode::CloudShadow),
            8 => Ok(QualityCode::CloudMediumProbability),
            9 => Ok(QualityCode::CloudHighProbability),
            10 => Ok(QualityCode::ThinCirrus),
            other => Err(format!("unknown quality code {other}")),
        }
    }
}

impl fmt::Display for QualityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", u8::from(*self))
    }
}

// ---------------------------------------------------------------------------
// QualityFilter
// ---------------------------------------------------------------------------

/// Flags contaminated time-steps of a pixel's observation matrix.
///
/// A step is discarded when its quality-band value is one of `bad_codes`, or
/// when any of `zero_check_bands` is exactly zero (no-data).
#[derive(Debug, Clone, PartialEq)]
pub struct QualityFilter {
    pub quality_band: usize,
    pub bad_codes: BTreeSet<QualityCode>,
    pub zero_check_bands: Vec<usize>,
}

impl Default for QualityFilter {
    fn default() -> Self {
        QualityFilter {
            quality_band: 4,
            bad_codes: QualityCode::contaminated(),
            zero_check_bands: vec![0, 1, 2, 3],
        }
    }
}

impl QualityFilter {
    /// Ascending, deduplicated indices of the steps to discard.
    ///
    /// Rows are time-steps, columns are bands. A missing column counts as
    /// neither contaminated nor zero.
    pub fn discard_indices(&self, steps: &[Vec<f64>]) -> Vec<usize> {
        let mut discard = BTreeSet::new();

        for (t, row) in steps.iter().enumerate() {
            if let Some(&q) = row.get(self.quality_band) {
                if self.bad_codes.iter().any(|code| code.matches(q)) {
                    discard.insert(t);
                }
            }
        }
        for &band in &self.zero_check_bands {
            for (t, row) in steps.iter().enumerate() {
                if row.get(band) == Some(&0.0) {
                    discard.insert(t);
                }
            }
        }

        discard.into_iter().collect()
    }

    /// Drop discarded steps and the quality band itself.
    ///
    /// The result may be empty; alignment reports that as insufficient data.
    pub fn apply(&self, series: &PixelSeries) -> Result<PixelSeries> {
        for obs in &series.observations {
            if obs.bands.len() <= self.quality_band {
                return Err(InputError::MissingBand {
                    band: self.quality_band,
                    available: obs.bands.len(),
                }
                .into());
            }
        }

        let rows: Vec<Vec<f64>> = series
            .observations
            .iter()
            .map(|o| o.bands.clone())
            .collect();
        let discard: BTreeSet<usize> = self.discard_indices(&rows).into_iter().collect();

        let kept = series
            .observations
            .iter()
            .enumerate()
            .filter(|(t, _)| !discard.contains(t))
            .map(|(_, obs)| Observation {
                date: obs.date,
                bands: obs
                    .bands
                    .iter()
                    .enumerate()
                    .filter(|(b, _)| *b != self.quality_band)
                    .map(|(_, v)| *v)
                    .collect(),
            })
            .collect();

        Ok(series.with_observations(kept))
    }
}
