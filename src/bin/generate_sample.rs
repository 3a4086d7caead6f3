use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate};
use clap::Parser;
use log::info;

use sits_sampler::data::raster::{write_geotiff, Raster, RasterHeader};
use sits_sampler::geo::{Crs, GeoTransform};

/// Write a synthetic 5-band acquisition stack (blue, green, red, NIR,
/// quality) and a reference-point CSV for trying the sampler.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Output directory
    #[arg(short, long, default_value = "demo")]
    output: PathBuf,

    /// Raster width and height in pixels
    #[arg(long, default_value_t = 64)]
    size: usize,

    /// Number of acquisitions
    #[arg(long, default_value_t = 12)]
    dates: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

const EPSG: u32 = 32633;
const ORIGIN: (f64, f64) = (500_000.0, 5_800_000.0);
const PIXEL: f64 = 10.0;

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// SplitMix64.
struct Noise(u64);

impl Noise {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn uniform(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller
    fn normal(&mut self, sigma: f64) -> f64 {
        let u1 = self.uniform().max(f64::MIN_POSITIVE);
        let u2 = self.uniform();
        sigma * (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }
}

#[derive(Clone, Copy)]
enum LandCover {
    /// Summer green-up.
    Crop,
    /// Evergreen.
    Forest,
}

impl LandCover {
    fn label(self) -> i64 {
        match self {
            LandCover::Crop => 1,
            LandCover::Forest => 2,
        }
    }

    /// Surface reflectance (blue, green, red, NIR) on a day of the year.
    fn reflectance(self, doy: f64) -> [f64; 4] {
        match self {
            LandCover::Crop => {
                let green_up = gaussian(doy, 190.0, 35.0, 1.0);
                [0.06, 0.08 + 0.04 * green_up, 0.12 - 0.08 * green_up, 0.20 + 0.30 * green_up]
            }
            LandCover::Forest => [0.03, 0.05, 0.03, 0.32],
        }
    }
}

/// Crop in the left half, forest in the right.
fn cover_at(col: usize, size: usize) -> LandCover {
    if col < size / 2 {
        LandCover::Crop
    } else {
        LandCover::Forest
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let mut rng = Noise(args.seed);

    let images = args.output.join("images");
    fs::create_dir_all(&images).with_context(|| format!("Failed to create {}", images.display()))?;

    let header = RasterHeader {
        width: args.size,
        height: args.size,
        bands: 5,
        transform: GeoTransform {
            origin_x: ORIGIN.0,
            origin_y: ORIGIN.1,
            pixel_width: PIXEL,
            pixel_height: -PIXEL,
        },
        crs: Crs(EPSG),
    };

    let start = NaiveDate::from_ymd_opt(2023, 1, 15).context("invalid start date")?;
    let step = 365 / args.dates.max(1) as i64;

    for t in 0..args.dates {
        let date = start + Duration::days(step * t as i64);
        let doy = f64::from(date.ordinal());

        // One rectangular cloud on every third acquisition, with a shadow band below it.
        let cloud = (t % 3 == 1).then(|| {
            let r0 = (rng.uniform() * args.size as f64 * 0.6) as usize;
            let c0 = (rng.uniform() * args.size as f64 * 0.6) as usize;
            (r0, c0, args.size / 4)
        });

        let mut data = Vec::with_capacity(args.size * args.size * 5);
        for row in 0..args.size {
            for col in 0..args.size {
                let quality = match cloud {
                    Some((r0, c0, s)) if (r0..r0 + s).contains(&row) && (c0..c0 + s).contains(&col) => 9.0,
                    Some((r0, c0, s)) if (r0 + s..r0 + s + 2).contains(&row) && (c0..c0 + s).contains(&col) => 3.0,
                    _ => 4.0,
                };
                for value in cover_at(col, args.size).reflectance(doy) {
                    data.push((value + rng.normal(0.005)).max(0.001) * 10_000.0);
                }
                data.push(quality);
            }
        }

        let path = images.join(format!("{}_S2_synthetic.tif", date.format("%Y%m%d")));
        let raster = Raster::new(header.clone(), data)?;
        write_geotiff(&path, &raster).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {}", path.display());
    }

    // Reference points at pixel centres, two per class.
    let points_path = args.output.join("points.csv");
    let mut writer = csv::Writer::from_path(&points_path)?;
    writer.write_record(["id", "label", "x", "y", "crs"])?;
    let quarter = args.size / 4;
    let picks = [
        (quarter, quarter),
        (3 * quarter, quarter),
        (quarter, 3 * quarter),
        (3 * quarter, 3 * quarter),
    ];
    for (id, &(row, col)) in picks.iter().enumerate() {
        let x = ORIGIN.0 + (col as f64 + 0.5) * PIXEL;
        let y = ORIGIN.1 - (row as f64 + 0.5) * PIXEL;
        let label = cover_at(col, args.size).label();
        writer.write_record([
            (id + 1).to_string(),
            label.to_string(),
            x.to_string(),
            y.to_string(),
            EPSG.to_string(),
        ])?;
    }
    writer.flush()?;

    info!(
        "Wrote {} acquisitions ({}x{} px) to {} and {} reference points to {}",
        args.dates,
        args.size,
        args.size,
        images.display(),
        picks.len(),
        points_path.display()
    );
    Ok(())
}
