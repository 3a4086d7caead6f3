mod common;

use std::fs::File;

use arrow::array::Array;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use common::*;
use sits_sampler::data::loader::{discover_acquisitions, load_reference_points};
use sits_sampler::data::raster::{write_geotiff, GeoTiffReader, RasterReader};
use sits_sampler::data::store::{write_samples, write_series_parquet};
use sits_sampler::geo::Crs;
use sits_sampler::state::{records, RunState};
use sits_sampler::SampleOrchestrator;

fn write_stack(dir: &std::path::Path) {
    // Written out of date order; discovery sorts by the name prefix.
    for date in dates().into_iter().rev() {
        write_geotiff(&dir.join(file_name(date)), &raster()).unwrap();
    }
    std::fs::write(dir.join("notes.txt"), "not an acquisition").unwrap();
}

#[test]
fn discovered_stack_round_trips_through_geotiff() {
    let dir = tempfile::tempdir().unwrap();
    write_stack(dir.path());

    let acquisitions = discover_acquisitions(dir.path()).unwrap();
    assert_eq!(
        acquisitions.iter().map(|a| a.date).collect::<Vec<_>>(),
        dates()
    );

    let decoded = GeoTiffReader.read(&acquisitions[0]).unwrap();
    assert_eq!(decoded.header, header());
    assert_eq!(decoded.data(), raster().data());
}

#[test]
fn end_to_end_run_on_disk() {
    let images = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_stack(images.path());

    let points_path = images.path().join("points.csv");
    let p = point(21, 1, 2, 2);
    std::fs::write(
        &points_path,
        format!("id,label,x,y,crs\n{},{},{},{},{}\n", p.id, p.label, p.x, p.y, EPSG),
    )
    .unwrap();

    let mut cfg = config(out.path());
    cfg.images_dir = images.path().to_path_buf();
    cfg.reference_points = points_path.clone();
    cfg.export_series = Some(out.path().join("series.parquet"));

    let acquisitions = discover_acquisitions(&cfg.images_dir).unwrap();
    let points = load_reference_points(&cfg.reference_points, cfg.points_crs).unwrap();
    let reader = GeoTiffReader;
    let segmenter = OffsetSegmenter::new(&[(0, 1), (1, 0), (1, 1)]);

    let mut orchestrator = SampleOrchestrator::new(&cfg, &reader, acquisitions, &segmenter).unwrap();
    assert_eq!(orchestrator.header().crs, Crs(EPSG));
    let mut state = RunState::new();
    orchestrator.run(&points, &mut state).unwrap();
    assert_eq!(state.candidates_proposed, 3);
    assert_eq!(state.candidates_unusable, 1);
    let samples = state.finalize();

    write_samples(&cfg.output_path(), &records(&samples), Crs(EPSG)).unwrap();
    write_series_parquet(cfg.export_series.as_ref().unwrap(), &samples).unwrap();

    let csv = std::fs::read_to_string(cfg.output_path()).unwrap();
    assert_eq!(
        csv.lines().collect::<Vec<_>>(),
        vec![
            "type,multi_clas,id,x,y",
            "reference,1,21,25.0,35.0",
            "candidate,1,21,35.0,35.0",
        ]
    );

    let file = File::open(out.path().join("series.parquet")).unwrap();
    let batch = ParquetRecordBatchReaderBuilder::try_new(file)
        .unwrap()
        .build()
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    assert_eq!(batch.num_rows(), 2);
    assert_eq!(batch.num_columns(), 4 + 5);
    assert!(batch.column_by_name("band_4").is_none());
    assert_eq!(batch.column_by_name("band_3").unwrap().len(), 2);
}
