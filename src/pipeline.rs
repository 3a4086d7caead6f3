//! SampleOrchestrator: expands each reference point into cleaned samples.
//!
//! ```text
//!  reference point ──▶ patch ──▶ segmenter ──▶ first mask ──▶ candidate pixels
//!                                                                  │
//!        ┌─────────────────────────────────────────────────────────┘
//!        ▼
//!   datacube ──▶ quality filter ──▶ align ──▶ derived index ──▶ similarity
//!                                                                  │
//!                                      records minus rejected ◀────┘
//! ```

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use log::{debug, info, warn};

use crate::color::{mark_seed, overlay_mask, LabelColors};
use crate::config::SamplerConfig;
use crate::data::align::{align, DateGrid, Interpolation};
use crate::data::filter::{QualityCode, QualityFilter};
use crate::data::index::DerivedIndex;
use crate::data::model::{
    Acquisition, AcceptedSample, DerivedIndexSeries, PixelCoord, PixelSeries, Provenance,
    ReferencePoint, SampleRecord, SimilarityVerdict,
};
use crate::data::raster::{RasterHeader, RasterReader};
use crate::data::store::apply_rejections;
use crate::datacube::{DatacubeExtractor, PixelRequest};
use crate::error::{AlignmentError, InputError, Result, SamplerError};
use crate::geo::Crs;
use crate::patch::{extract_patch, select_optimal_image, stretch_to_u8, Patch};
use crate::segment::{SegmentMask, Segmenter};
use crate::similarity::SimilarityFilter;
use crate::state::RunState;

// ---------------------------------------------------------------------------
// Per-point outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointStatus {
    /// Candidates were scored and cleaned.
    Cleaned,
    /// The first mask selected no pixel; the point is skipped.
    NoCandidates,
    /// The reference pixel has no alignable series; only the reference is kept.
    ReferenceUnusable,
}

#[derive(Debug, Clone)]
pub struct PointOutcome {
    pub reference_id: i64,
    pub status: PointStatus,
    /// Number of candidate pixels in the first mask.
    pub candidates: usize,
    /// Kept samples: the reference first, then accepted candidates in order.
    pub samples: Vec<AcceptedSample>,
    /// Verdicts for the candidates that reached the similarity filter, with
    /// `candidate` in the full candidate index space.
    pub verdicts: Vec<SimilarityVerdict>,
    /// Candidates rejected without scoring because their series could not be
    /// aligned.
    pub unusable: Vec<usize>,
}

impl PointOutcome {
    fn empty(reference_id: i64, status: PointStatus) -> Self {
        PointOutcome {
            reference_id,
            status,
            candidates: 0,
            samples: Vec::new(),
            verdicts: Vec::new(),
            unusable: Vec::new(),
        }
    }

    /// Accepted candidates, excluding the reference.
    pub fn accepted(&self) -> usize {
        self.samples
            .iter()
            .filter(|s| !s.record.provenance.is_reference())
            .count()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives one run over a validated acquisition stack.
pub struct SampleOrchestrator<'a, R: RasterReader, S: Segmenter> {
    cube: DatacubeExtractor<'a, R>,
    grid: DateGrid,
    segmenter: &'a S,
    image: RgbImage,
    quality: QualityFilter,
    index: DerivedIndex,
    similarity: SimilarityFilter,
    interpolation: Interpolation,
    patch_size: (usize, usize),
    points_crs: Option<Crs>,
    diagnostics: Option<PathBuf>,
    colors: LabelColors,
}

impl<'a, R: RasterReader, S: Segmenter> SampleOrchestrator<'a, R, S> {
    /// Validate the stack and render the image the segmenter works on: the
    /// configured optimal image, or the acquisition with the fewest flagged
    /// pixels.
    pub fn new(
        config: &SamplerConfig,
        reader: &'a R,
        acquisitions: Vec<Acquisition>,
        segmenter: &'a S,
    ) -> Result<Self> {
        config.validate()?;
        let mut cube = DatacubeExtractor::new(reader, acquisitions, config.cache_capacity)?;
        let grid = cube.date_grid()?;

        let optimal = match &config.optimal_image {
            Some(path) => find_acquisition(cube.acquisitions(), path)?,
            None => select_optimal_image(&mut cube, config.quality_band, &QualityCode::invalid())?,
        };
        let image = stretch_to_u8(&*cube.raster(optimal)?, config.rgb_bands)?;

        Ok(SampleOrchestrator {
            cube,
            grid,
            segmenter,
            image,
            quality: config.quality_filter(),
            index: config.derived_index(),
            similarity: config.similarity_filter()?,
            interpolation: config.interpolation,
            patch_size: (config.patch_width, config.patch_height),
            points_crs: config.points_crs,
            diagnostics: config.write_diagnostics.then(|| config.save_dir.clone()),
            colors: LabelColors::new(&Default::default()),
        })
    }

    pub fn header(&self) -> &RasterHeader {
        self.cube.header()
    }

    pub fn grid(&self) -> &DateGrid {
        &self.grid
    }

    /// Process every point in order, then release the decoded stack.
    pub fn run(&mut self, points: &[ReferencePoint], state: &mut RunState) -> Result<()> {
        self.colors = LabelColors::new(&points.iter().map(|p| p.label).collect());
        for (i, point) in points.iter().enumerate() {
            debug!("Reference point {}/{}: id {}", i + 1, points.len(), point.id);
            let outcome = self.process_point(point)?;
            state.record(outcome);
        }
        self.cube.release();
        Ok(())
    }

    pub fn process_point(&mut self, point: &ReferencePoint) -> Result<PointOutcome> {
        let crs = point.crs.or(self.points_crs).unwrap_or(self.header().crs);
        let (x, y) = self.cube.to_raster_crs(point.x, point.y, crs)?;
        let header = self.header();
        let seed = header.transform.pixel_at(x, y, header.height, header.width)?;

        let (width, height) = self.patch_size;
        let patch = extract_patch(&self.image, seed, width, height)?;
        let masks = self.segmenter.segment(&patch.image, patch.seed, point.label)?;
        self.write_patch_diagnostics(point, &patch, &masks)?;

        let candidates = match masks.first() {
            Some(mask) => patch.mask_to_raster(mask)?,
            None => Vec::new(),
        };
        if candidates.is_empty() {
            warn!("Point {}: segmentation selected no pixel, skipping", point.id);
            return Ok(PointOutcome::empty(point.id, PointStatus::NoCandidates));
        }

        let outcome = self.clean(point, (x, y), seed, &candidates)?;
        info!(
            "Point {} (label {}): {} candidates, {} accepted, {} rejected",
            point.id,
            point.label,
            outcome.candidates,
            outcome.accepted(),
            outcome.candidates - outcome.accepted()
        );
        Ok(outcome)
    }

    /// Score the candidates of one point against its reference pixel.
    fn clean(
        &mut self,
        point: &ReferencePoint,
        reference_xy: (f64, f64),
        seed: PixelCoord,
        candidates: &[PixelCoord],
    ) -> Result<PointOutcome> {
        let transform = self.header().transform;
        let record = |provenance: Provenance, (x, y): (f64, f64)| SampleRecord {
            provenance,
            label: point.label,
            reference_id: point.id,
            x,
            y,
        };

        let mut requests = Vec::with_capacity(candidates.len() + 1);
        requests.push(PixelRequest {
            pixel: seed,
            provenance: Provenance::Reference,
            reference_id: point.id,
        });
        requests.extend(candidates.iter().enumerate().map(|(id, &pixel)| PixelRequest {
            pixel,
            provenance: Provenance::Candidate { id },
            reference_id: point.id,
        }));
        let mut raw = self.cube.extract(&requests)?.into_iter();

        // Records: reference at 0, candidate i at i + 1.
        let mut records = Vec::with_capacity(requests.len());
        let reference_raw = raw.next().ok_or(InputError::EmptyAcquisitionList)?;
        let reference = match self.prepare(&reference_raw)? {
            Some(aligned) => aligned,
            None => {
                warn!(
                    "Point {}: reference pixel {} has no usable observation, keeping the reference only",
                    point.id, seed
                );
                let mut outcome = PointOutcome::empty(point.id, PointStatus::ReferenceUnusable);
                outcome.candidates = candidates.len();
                outcome.unusable = (0..candidates.len()).collect();
                outcome.samples.push(AcceptedSample {
                    record: record(Provenance::Reference, reference_xy),
                    series: Vec::new(),
                });
                return Ok(outcome);
            }
        };
        records.push(AcceptedSample {
            record: record(Provenance::Reference, reference_xy),
            series: bands_by_date(&reference),
        });
        let first_candidate = records.len();

        let mut scored: Vec<usize> = Vec::with_capacity(candidates.len());
        let mut scored_series: Vec<DerivedIndexSeries> = Vec::with_capacity(candidates.len());
        let mut unusable = Vec::new();
        for (id, series) in raw.enumerate() {
            let xy = transform.xy(series.pixel);
            match self.prepare(&series)? {
                Some(aligned) => {
                    scored_series.push(self.index.compute(&aligned)?.sanitized());
                    scored.push(id);
                    records.push(AcceptedSample {
                        record: record(Provenance::Candidate { id }, xy),
                        series: bands_by_date(&aligned),
                    });
                }
                None => {
                    unusable.push(id);
                    records.push(AcceptedSample {
                        record: record(Provenance::Candidate { id }, xy),
                        series: Vec::new(),
                    });
                }
            }
        }

        let reference_index = self.index.compute(&reference)?.sanitized();
        let outcome = self
            .similarity
            .filter(&self.grid, &reference_index, &scored_series)?;

        // Back to the full candidate index space.
        let verdicts: Vec<SimilarityVerdict> = outcome
            .verdicts
            .iter()
            .map(|v| SimilarityVerdict {
                candidate: scored[v.candidate],
                ..*v
            })
            .collect();
        let mut rejected: Vec<usize> = outcome
            .rejected_indices()
            .into_iter()
            .map(|i| scored[i])
            .chain(unusable.iter().copied())
            .collect();
        rejected.sort_unstable();

        if let Some(dir) = &self.diagnostics {
            write_series_diagnostics(
                &dir.join(format!("{}_series.csv", point.id)),
                &self.grid,
                &reference_index,
                &scored_series,
                &verdicts,
            )?;
        }

        let samples = apply_rejections(records, &rejected, first_candidate)?;
        Ok(PointOutcome {
            reference_id: point.id,
            status: PointStatus::Cleaned,
            candidates: candidates.len(),
            samples,
            verdicts,
            unusable,
        })
    }

    /// Quality-filter and align one pixel. `None` when the pixel has nothing
    /// to align: no observation survives filtering, or a single one does.
    fn prepare(&self, series: &PixelSeries) -> Result<Option<PixelSeries>> {
        let filtered = self.quality.apply(series)?;
        match align(&filtered, &self.grid, self.interpolation) {
            Ok(aligned) => Ok(Some(aligned)),
            Err(err) if err.is_recoverable() => {
                debug!("{} {}: {err}", series.provenance, series.pixel);
                Ok(None)
            }
            Err(SamplerError::Alignment(err @ AlignmentError::Degenerate { .. })) => {
                warn!("{} at {}: {err}", series.provenance, series.pixel);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn write_patch_diagnostics(
        &self,
        point: &ReferencePoint,
        patch: &Patch,
        masks: &[SegmentMask],
    ) -> Result<()> {
        let Some(dir) = &self.diagnostics else {
            return Ok(());
        };
        let seed_color = Rgb([255, 0, 0]);

        let mut before = patch.image.clone();
        mark_seed(&mut before, patch.seed, seed_color);
        before.save(dir.join(format!("{}_patch.png", point.id)))?;

        let color = self.colors.color_for(point.label);
        for (k, mask) in masks.iter().enumerate() {
            let mut overlay = overlay_mask(&patch.image, mask, color, 0.6);
            mark_seed(&mut overlay, patch.seed, seed_color);
            overlay.save(dir.join(format!("{}_mask_{}.png", point.id, k + 1)))?;
            debug!(
                "Point {}: mask {} score {:.3}, {} pixels",
                point.id,
                k + 1,
                mask.score(),
                mask.count()
            );
        }
        Ok(())
    }
}

/// A bare file name matches by name; anything else must match the path.
fn find_acquisition(acquisitions: &[Acquisition], path: &Path) -> Result<usize> {
    let bare = path.parent().map_or(true, |p| p.as_os_str().is_empty());
    acquisitions
        .iter()
        .position(|a| a.path == path || (bare && a.path.file_name() == path.file_name()))
        .ok_or_else(|| {
            InputError::InvalidConfig(format!(
                "optimal image {} is not one of the acquisitions",
                path.display()
            ))
            .into()
        })
}

fn bands_by_date(series: &PixelSeries) -> Vec<Vec<f64>> {
    series.observations.iter().map(|o| o.bands.clone()).collect()
}

/// `series,accepted,similarity,<date>...` with the reference first.
fn write_series_diagnostics(
    path: &Path,
    grid: &DateGrid,
    reference: &DerivedIndexSeries,
    candidates: &[DerivedIndexSeries],
    verdicts: &[SimilarityVerdict],
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["series".to_string(), "accepted".to_string(), "similarity".to_string()];
    header.extend(grid.dates().iter().map(|d| d.format("%Y-%m-%d").to_string()));
    writer.write_record(&header)?;

    let values = |s: &DerivedIndexSeries| s.values.iter().map(|v| v.to_string()).collect::<Vec<_>>();

    let mut row = vec!["reference".to_string(), String::new(), String::new()];
    row.extend(values(reference));
    writer.write_record(&row)?;

    for (series, verdict) in candidates.iter().zip(verdicts) {
        let mut row = vec![
            format!("candidate_{}", verdict.candidate),
            verdict.accepted.to_string(),
            format!("{:.6}", verdict.similarity),
        ];
        row.extend(values(series));
        writer.write_record(&row)?;
    }
    writer.flush().map_err(|e| SamplerError::io(path, e))?;
    Ok(())
}
