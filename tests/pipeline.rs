mod common;

use std::cell::Cell;

use approx::assert_relative_eq;

use common::*;
use sits_sampler::data::model::{Acquisition, PixelCoord, Provenance};
use sits_sampler::data::raster::{Raster, RasterHeader, RasterReader};
use sits_sampler::error::{InputError, SamplerError};
use sits_sampler::patch::PatchPoint;
use sits_sampler::segment::{SegmentMask, Segmenter};
use sits_sampler::state::{records, RunState};
use sits_sampler::{PointStatus, SampleOrchestrator};

#[test]
fn dissimilar_and_unusable_candidates_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let (reader, acquisitions) = in_memory_stack();
    let segmenter = OffsetSegmenter::new(&[(0, 1), (1, 0), (1, 1)]);
    let mut orchestrator =
        SampleOrchestrator::new(&config(dir.path()), &reader, acquisitions, &segmenter).unwrap();

    let outcome = orchestrator.process_point(&point(7, 1, 2, 2)).unwrap();

    assert_eq!(outcome.status, PointStatus::Cleaned);
    assert_eq!(outcome.candidates, 3);
    assert_eq!(outcome.accepted(), 1);
    assert_eq!(outcome.unusable, vec![2]);

    assert_eq!(outcome.verdicts.len(), 2);
    assert_eq!(outcome.verdicts[0].candidate, 0);
    assert!(outcome.verdicts[0].accepted);
    assert_relative_eq!(outcome.verdicts[0].similarity, 1.0);
    assert_eq!(outcome.verdicts[1].candidate, 1);
    assert!(!outcome.verdicts[1].accepted);
    assert_relative_eq!(outcome.verdicts[1].distance, 4.0, epsilon = 1e-9);

    let kept: Vec<_> = outcome.samples.iter().map(|s| &s.record).collect();
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].provenance, Provenance::Reference);
    assert_eq!((kept[0].x, kept[0].y), (25.0, 35.0));
    assert_eq!(kept[1].provenance, Provenance::Candidate { id: 0 });
    assert_eq!((kept[1].x, kept[1].y), (35.0, 35.0));
    assert!(kept.iter().all(|r| r.reference_id == 7 && r.label == 1));

    // Quality band dropped, one band vector per date.
    assert_eq!(outcome.samples[1].series.len(), dates().len());
    assert_eq!(outcome.samples[1].series[0], vec![500.0, 500.0, 100.0, 300.0]);
}

#[test]
fn rejection_removes_the_rejected_candidate_not_its_neighbour() {
    let dir = tempfile::tempdir().unwrap();
    let (reader, acquisitions) = in_memory_stack();
    // From (3, 1): the bare pixel (3, 2) comes first in row-major order, then
    // the crop pixel (4, 1).
    let segmenter = OffsetSegmenter::new(&[(0, 1), (1, 0)]);
    let mut orchestrator =
        SampleOrchestrator::new(&config(dir.path()), &reader, acquisitions, &segmenter).unwrap();

    let outcome = orchestrator.process_point(&point(8, 1, 3, 1)).unwrap();

    assert_eq!(outcome.candidates, 2);
    assert!(!outcome.verdicts[0].accepted);
    assert!(outcome.verdicts[1].accepted);

    let kept: Vec<_> = outcome.samples.iter().map(|s| &s.record).collect();
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].provenance, Provenance::Reference);
    assert_eq!(kept[1].provenance, Provenance::Candidate { id: 1 });
    assert_eq!((kept[1].x, kept[1].y), (15.0, 15.0));
}

#[test]
fn all_cloudy_candidate_yields_no_accepted_sample() {
    let dir = tempfile::tempdir().unwrap();
    let (reader, acquisitions) = in_memory_stack();
    let segmenter = OffsetSegmenter::new(&[(1, 1)]);
    let mut orchestrator =
        SampleOrchestrator::new(&config(dir.path()), &reader, acquisitions, &segmenter).unwrap();

    let outcome = orchestrator.process_point(&point(3, 2, 2, 2)).unwrap();

    assert_eq!(outcome.candidates, 1);
    assert_eq!(outcome.accepted(), 0);
    assert_eq!(outcome.unusable, vec![0]);
    assert!(outcome.verdicts.is_empty());
    assert_eq!(outcome.samples.len(), 1);
    assert!(outcome.samples[0].record.provenance.is_reference());
}

#[test]
fn cloudy_reference_keeps_only_the_reference() {
    let dir = tempfile::tempdir().unwrap();
    let (reader, acquisitions) = in_memory_stack();
    let segmenter = OffsetSegmenter::new(&[(0, -1), (-1, 0)]);
    let mut orchestrator =
        SampleOrchestrator::new(&config(dir.path()), &reader, acquisitions, &segmenter).unwrap();

    let cloud = CLOUD_PIXEL;
    let outcome = orchestrator
        .process_point(&point(4, 1, cloud.row, cloud.col))
        .unwrap();

    assert_eq!(outcome.status, PointStatus::ReferenceUnusable);
    assert_eq!(outcome.candidates, 2);
    assert_eq!(outcome.accepted(), 0);
    assert_eq!(outcome.samples.len(), 1);
    assert!(outcome.samples[0].series.is_empty());
}

#[test]
fn empty_mask_skips_the_point() {
    let dir = tempfile::tempdir().unwrap();
    let (reader, acquisitions) = in_memory_stack();
    let segmenter = OffsetSegmenter::new(&[]);
    let mut orchestrator =
        SampleOrchestrator::new(&config(dir.path()), &reader, acquisitions, &segmenter).unwrap();

    let outcome = orchestrator.process_point(&point(5, 1, 1, 1)).unwrap();
    assert_eq!(outcome.status, PointStatus::NoCandidates);
    assert!(outcome.samples.is_empty());
}

#[test]
fn point_outside_the_raster_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let (reader, acquisitions) = in_memory_stack();
    let segmenter = OffsetSegmenter::new(&[(0, 1)]);
    let mut orchestrator =
        SampleOrchestrator::new(&config(dir.path()), &reader, acquisitions, &segmenter).unwrap();

    let mut outside = point(9, 1, 0, 0);
    outside.x = 75.0;
    let err = orchestrator.process_point(&outside).unwrap_err();
    assert!(matches!(
        err,
        SamplerError::Input(InputError::CoordinateOutOfBounds { .. })
    ));
}

#[test]
fn run_collates_and_deduplicates_shared_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let (reader, acquisitions) = in_memory_stack();
    // From (2, 2) the offset selects (2, 3); from (2, 4) the opposite offset
    // selects (2, 3) again.
    struct Mirrored;
    impl Segmenter for Mirrored {
        fn segment(
            &self,
            patch: &image::RgbImage,
            seed: PatchPoint,
            label: i64,
        ) -> sits_sampler::Result<Vec<SegmentMask>> {
            let offset = if label == 1 { (0, 1) } else { (0, -1) };
            OffsetSegmenter::new(&[offset]).segment(patch, seed, label)
        }
    }

    let mut orchestrator =
        SampleOrchestrator::new(&config(dir.path()), &reader, acquisitions, &Mirrored).unwrap();
    let mut state = RunState::new();
    orchestrator
        .run(&[point(1, 1, 2, 2), point(2, 2, 2, 4)], &mut state)
        .unwrap();

    assert_eq!(state.points_processed, 2);
    assert_eq!(state.candidates_accepted, 2);

    let samples = state.finalize();
    let records = records(&samples);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].reference_id, 1);
    assert_eq!(records[1].provenance, Provenance::Candidate { id: 0 });
    assert_eq!(records[2].provenance, Provenance::Reference);
    assert_eq!(records[2].reference_id, 2);
}

#[test]
fn diagnostics_are_written_per_point() {
    let dir = tempfile::tempdir().unwrap();
    let (reader, acquisitions) = in_memory_stack();
    let segmenter = OffsetSegmenter::new(&[(0, 1), (1, 0)]);
    let mut cfg = config(dir.path());
    cfg.write_diagnostics = true;
    let mut orchestrator = SampleOrchestrator::new(&cfg, &reader, acquisitions, &segmenter).unwrap();

    orchestrator.process_point(&point(12, 1, 2, 2)).unwrap();

    assert!(dir.path().join("12_patch.png").exists());
    assert!(dir.path().join("12_mask_1.png").exists());
    let series = std::fs::read_to_string(dir.path().join("12_series.csv")).unwrap();
    let lines: Vec<&str> = series.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("series,accepted,similarity,2023-04-01"));
    assert!(lines[1].starts_with("reference,"));
    assert!(lines[2].starts_with("candidate_0,true,1.000000,"));
    assert!(lines[3].starts_with("candidate_1,false,"));
}

#[test]
fn unknown_optimal_image_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let (reader, acquisitions) = in_memory_stack();
    let segmenter = OffsetSegmenter::new(&[]);
    let mut cfg = config(dir.path());
    cfg.optimal_image = Some("20990101_stack.tif".into());
    assert!(SampleOrchestrator::new(&cfg, &reader, acquisitions.clone(), &segmenter).is_err());

    cfg.optimal_image = Some(file_name(dates()[2]).into());
    assert!(SampleOrchestrator::new(&cfg, &reader, acquisitions, &segmenter).is_ok());
}

struct CountingReader<R> {
    inner: R,
    reads: Cell<usize>,
}

impl<R: RasterReader> RasterReader for CountingReader<R> {
    fn read_header(&self, acquisition: &Acquisition) -> sits_sampler::Result<RasterHeader> {
        self.inner.read_header(acquisition)
    }

    fn read(&self, acquisition: &Acquisition) -> sits_sampler::Result<Raster> {
        self.reads.set(self.reads.get() + 1);
        self.inner.read(acquisition)
    }
}

#[test]
fn each_acquisition_is_decoded_once_per_run() {
    let dir = tempfile::tempdir().unwrap();
    let (inner, acquisitions) = in_memory_stack();
    let reader = CountingReader {
        inner,
        reads: Cell::new(0),
    };
    let segmenter = OffsetSegmenter::new(&[(0, 1), (1, 0)]);
    let mut orchestrator =
        SampleOrchestrator::new(&config(dir.path()), &reader, acquisitions, &segmenter).unwrap();
    assert_eq!(reader.reads.get(), dates().len());

    let mut state = RunState::new();
    orchestrator
        .run(&[point(1, 1, 2, 2), point(2, 1, 4, 4)], &mut state)
        .unwrap();
    assert_eq!(reader.reads.get(), dates().len());
}

#[test]
fn bare_pixel_is_where_the_fixture_says() {
    let r = raster();
    assert_eq!(r.pixel(BARE_PIXEL), &BARE);
    assert_eq!(r.pixel(PixelCoord::new(0, 0)), &CROP);
}
