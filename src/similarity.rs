//! Candidate cleaning by time-series similarity.
//!
//! Each derived-index series is paired with a synthetic step axis `1..=N` to
//! form a 2-D trajectory. The dynamic-time-warping distance `d` between a
//! candidate trajectory and the reference trajectory (Euclidean per-step cost)
//! becomes the similarity `1 / (1 + d)`; a candidate is kept only when its
//! similarity is strictly greater than the threshold.

use log::debug;

use crate::data::align::DateGrid;
use crate::data::model::{DerivedIndexSeries, SimilarityVerdict};
use crate::error::{InputError, Result};

// ---------------------------------------------------------------------------
// Dynamic time warping
// ---------------------------------------------------------------------------

/// DTW with an optional Sakoe-Chiba band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dtw {
    window: Option<usize>,
}

impl Dtw {
    /// Unconstrained warping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict matches to `|i - j| <= radius`. The band is widened to the
    /// length difference so a path always exists.
    pub fn with_window(radius: usize) -> Self {
        Dtw {
            window: Some(radius),
        }
    }

    /// Minimum accumulated Euclidean cost over all warping paths.
    ///
    /// Two empty sequences are at distance 0; an empty and a non-empty one are
    /// infinitely apart.
    pub fn distance<const D: usize>(&self, a: &[[f64; D]], b: &[[f64; D]]) -> f64 {
        let (n, m) = (a.len(), b.len());
        if n == 0 && m == 0 {
            return 0.0;
        }
        if n == 0 || m == 0 {
            return f64::INFINITY;
        }

        let radius = self.window.map(|w| w.max(n.abs_diff(m)));
        let mut prev = vec![f64::INFINITY; m + 1];
        let mut curr = vec![f64::INFINITY; m + 1];
        prev[0] = 0.0;

        for i in 1..=n {
            curr.fill(f64::INFINITY);
            let (lo, hi) = match radius {
                Some(r) => (i.saturating_sub(r).max(1), (i + r).min(m)),
                None => (1, m),
            };
            for j in lo..=hi {
                let cost = euclidean(&a[i - 1], &b[j - 1]);
                let best = prev[j].min(curr[j - 1]).min(prev[j - 1]);
                curr[j] = cost + best;
            }
            std::mem::swap(&mut prev, &mut curr);
        }
        prev[m]
    }
}

fn euclidean<const D: usize>(p: &[f64; D], q: &[f64; D]) -> f64 {
    p.iter()
        .zip(q)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Pair each value with its 1-based step number.
pub fn trajectory(values: &[f64]) -> Vec<[f64; 2]> {
    values
        .iter()
        .enumerate()
        .map(|(k, &v)| [(k + 1) as f64, v])
        .collect()
}

/// Monotone decreasing map from `[0, inf)` onto `(0, 1]`.
pub fn similarity_from_distance(distance: f64) -> f64 {
    1.0 / (1.0 + distance)
}

// ---------------------------------------------------------------------------
// SimilarityFilter
// ---------------------------------------------------------------------------

/// Partition of a candidate set by similarity to the reference.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityOutcome {
    /// One verdict per candidate, in candidate order.
    pub verdicts: Vec<SimilarityVerdict>,
}

impl SimilarityOutcome {
    /// Ascending indices of rejected candidates in the candidate set's
    /// original ordering.
    pub fn rejected_indices(&self) -> Vec<usize> {
        self.verdicts
            .iter()
            .filter(|v| !v.accepted)
            .map(|v| v.candidate)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityFilter {
    threshold: f64,
    dtw: Dtw,
}

impl SimilarityFilter {
    /// `threshold` must lie strictly inside (0, 1).
    pub fn new(threshold: f64, dtw: Dtw) -> Result<Self> {
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(InputError::InvalidThreshold(threshold).into());
        }
        Ok(SimilarityFilter { threshold, dtw })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score every candidate against `reference`.
    ///
    /// All series must have one finite value per grid date; callers sanitize
    /// derived indices first.
    pub fn filter(
        &self,
        grid: &DateGrid,
        reference: &DerivedIndexSeries,
        candidates: &[DerivedIndexSeries],
    ) -> Result<SimilarityOutcome> {
        let expected = grid.len();
        if reference.values.is_empty() {
            return Err(InputError::EmptyReference.into());
        }
        if reference.values.len() != expected {
            return Err(InputError::ReferenceLengthMismatch {
                expected,
                found: reference.values.len(),
            }
            .into());
        }
        if let Some(step) = reference.first_non_finite() {
            return Err(InputError::NonFiniteReference { step }.into());
        }
        for (index, candidate) in candidates.iter().enumerate() {
            if candidate.values.len() != expected {
                return Err(InputError::LengthMismatch {
                    index,
                    expected,
                    found: candidate.values.len(),
                }
                .into());
            }
            if let Some(step) = candidate.first_non_finite() {
                return Err(InputError::NonFiniteSeries { index, step }.into());
            }
        }

        let reference_path = trajectory(&reference.values);
        let verdicts = candidates
            .iter()
            .enumerate()
            .map(|(candidate, series)| {
                let distance = self.dtw.distance(&trajectory(&series.values), &reference_path);
                let similarity = similarity_from_distance(distance);
                let accepted = similarity > self.threshold;
                debug!(
                    "{}: distance {distance:.4}, similarity {similarity:.4} -> {}",
                    series.provenance,
                    if accepted { "keep" } else { "drop" }
                );
                SimilarityVerdict {
                    candidate,
                    distance,
                    similarity,
                    accepted,
                }
            })
            .collect();

        Ok(SimilarityOutcome { verdicts })
    }
}
