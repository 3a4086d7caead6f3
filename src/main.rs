use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use log::info;

use sits_sampler::data::loader::{discover_acquisitions, load_reference_points};
use sits_sampler::data::raster::GeoTiffReader;
use sits_sampler::data::store::{write_samples, write_series_parquet};
use sits_sampler::geo::Crs;
use sits_sampler::segment::CommandSegmenter;
use sits_sampler::state::{records, RunState};
use sits_sampler::{SampleOrchestrator, SamplerConfig};

/// Expand labelled reference points into training samples.
///
/// The segmentation program goes after `--`, e.g.
/// `sits-sampler -i tiles -p points.csv -- python sam_cli.py --checkpoint sam_vit_h.pth`
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON run configuration; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the YYYYMMDD*.tif acquisitions
    #[arg(short, long)]
    images_dir: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    save_dir: Option<PathBuf>,

    /// Reference points (.csv or .geojson)
    #[arg(short = 'p', long)]
    points: Option<PathBuf>,

    /// EPSG code of reference points without their own CRS
    #[arg(long)]
    points_epsg: Option<u32>,

    /// Acquisition to segment on (default: fewest cloudy pixels)
    #[arg(long)]
    optimal_image: Option<PathBuf>,

    #[arg(long)]
    patch_width: Option<usize>,

    #[arg(long)]
    patch_height: Option<usize>,

    /// Similarity a candidate must exceed to be kept, in (0, 1)
    #[arg(short = 't', long)]
    threshold: Option<f64>,

    /// Sakoe-Chiba radius for the DTW distance
    #[arg(long)]
    dtw_window: Option<usize>,

    /// Write patch, mask and series diagnostics to the output directory
    #[arg(long)]
    diagnostics: bool,

    /// Export accepted samples' aligned series to a Parquet file
    #[arg(long)]
    export_series: Option<PathBuf>,

    /// Output file name (.csv or .geojson)
    #[arg(short, long)]
    output: Option<String>,

    /// Segmentation program and its arguments
    #[arg(last = true)]
    segment_command: Vec<String>,
}

impl Cli {
    fn into_config(self) -> Result<SamplerConfig> {
        let mut config = match &self.config {
            Some(path) => SamplerConfig::from_json_file(path)
                .with_context(|| format!("Failed to read configuration {}", path.display()))?,
            None => SamplerConfig::default(),
        };

        if let Some(v) = self.images_dir {
            config.images_dir = v;
        }
        if let Some(v) = self.save_dir {
            config.save_dir = v;
        }
        if let Some(v) = self.points {
            config.reference_points = v;
        }
        if let Some(v) = self.points_epsg {
            config.points_crs = Some(Crs(v));
        }
        if let Some(v) = self.optimal_image {
            config.optimal_image = Some(v);
        }
        if let Some(v) = self.patch_width {
            config.patch_width = v;
        }
        if let Some(v) = self.patch_height {
            config.patch_height = v;
        }
        if let Some(v) = self.threshold {
            config.similarity_threshold = v;
        }
        if let Some(v) = self.dtw_window {
            config.dtw_window = Some(v);
        }
        if let Some(v) = self.export_series {
            config.export_series = Some(v);
        }
        if let Some(v) = self.output {
            config.output_name = v;
        }
        if self.diagnostics {
            config.write_diagnostics = true;
        }
        if !self.segment_command.is_empty() {
            config.segment_command = self.segment_command;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    builder.init();

    let config = Cli::parse().into_config()?;
    let started = Instant::now();

    fs::create_dir_all(&config.save_dir)
        .with_context(|| format!("Failed to create {}", config.save_dir.display()))?;

    let acquisitions = discover_acquisitions(&config.images_dir)
        .with_context(|| format!("Failed to list acquisitions in {}", config.images_dir.display()))?;
    let points = load_reference_points(&config.reference_points, config.points_crs).with_context(|| {
        format!(
            "Failed to load reference points from {}",
            config.reference_points.display()
        )
    })?;

    let reader = GeoTiffReader;
    let segmenter = CommandSegmenter::new(
        config.segment_command.clone(),
        config.save_dir.join(".segment"),
    )
    .context("No segmentation command given (pass it after `--`)")?;

    let mut orchestrator = SampleOrchestrator::new(&config, &reader, acquisitions, &segmenter)?;
    let crs = orchestrator.header().crs;

    let mut state = RunState::new();
    orchestrator.run(&points, &mut state)?;
    let samples = state.finalize();

    let output = config.output_path();
    write_samples(&output, &records(&samples), crs)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    if let Some(path) = &config.export_series {
        write_series_parquet(path, &samples)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let elapsed = started.elapsed().as_secs_f64();
    info!(
        "Done in {:.0}m {:.2}s ({elapsed:.2}s)",
        (elapsed / 60.0).floor(),
        elapsed % 60.0
    );
    Ok(())
}
