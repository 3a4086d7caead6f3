use serde::{Deserialize, Serialize};

use super::model::{DerivedIndexSeries, PixelSeries};
use crate::error::{InputError, Result};

/// Scalar-per-date signal computed from an aligned series' bands.
///
/// Band indices refer to the series after the quality band was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivedIndex {
    /// `(nir - red) / (nir + red)`
    Ndvi { red: usize, nir: usize },
    /// `(a - b) / (a + b)`
    NormalizedDifference { a: usize, b: usize },
}

impl Default for DerivedIndex {
    fn default() -> Self {
        DerivedIndex::Ndvi { red: 2, nir: 3 }
    }
}

impl DerivedIndex {
    /// Band positions `(a, b)` of `(a - b) / (a + b)`.
    pub fn operands(&self) -> (usize, usize) {
        match *self {
            DerivedIndex::Ndvi { red, nir } => (nir, red),
            DerivedIndex::NormalizedDifference { a, b } => (a, b),
        }
    }

    /// Raw per-date values. Zero denominators yield NaN or ±inf; see
    /// [`DerivedIndexSeries::sanitized`].
    pub fn compute(&self, series: &PixelSeries) -> Result<DerivedIndexSeries> {
        let (a, b) = self.operands();
        let values = series
            .observations
            .iter()
            .map(|obs| -> Result<f64> {
                let available = obs.bands.len();
                let va = obs.bands.get(a).ok_or(InputError::MissingBand { band: a, available })?;
                let vb = obs.bands.get(b).ok_or(InputError::MissingBand { band: b, available })?;
                Ok((va - vb) / (va + vb))
            })
            .collect::<Result<Vec<f64>>>()?;

        Ok(DerivedIndexSeries {
            provenance: series.provenance,
            values,
        })
    }
}
