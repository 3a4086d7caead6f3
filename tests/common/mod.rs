#![allow(dead_code)]

use std::path::Path;

use chrono::NaiveDate;
use image::RgbImage;

use sits_sampler::data::model::{Acquisition, PixelCoord, ReferencePoint};
use sits_sampler::data::raster::{InMemoryReader, Raster, RasterHeader};
use sits_sampler::error::Result;
use sits_sampler::geo::{Crs, GeoTransform};
use sits_sampler::patch::PatchPoint;
use sits_sampler::segment::{SegmentMask, Segmenter};
use sits_sampler::SamplerConfig;

pub const SIZE: usize = 6;
pub const EPSG: u32 = 32633;

/// Similar to the default pixel: NDVI 0.5 on every date.
pub const CROP: [f64; 5] = [500.0, 500.0, 100.0, 300.0, 4.0];
/// NDVI -0.5 on every date.
pub const BARE: [f64; 5] = [500.0, 500.0, 300.0, 100.0, 4.0];
/// Cloud-coded on every date.
pub const CLOUD: [f64; 5] = [900.0, 900.0, 900.0, 900.0, 9.0];

pub const BARE_PIXEL: PixelCoord = PixelCoord { row: 3, col: 2 };
pub const CLOUD_PIXEL: PixelCoord = PixelCoord { row: 3, col: 3 };

pub fn dates() -> Vec<NaiveDate> {
    [(4, 1), (4, 11), (4, 21), (5, 1)]
        .iter()
        .map(|&(m, d)| NaiveDate::from_ymd_opt(2023, m, d).unwrap())
        .collect()
}

pub fn header() -> RasterHeader {
    RasterHeader {
        width: SIZE,
        height: SIZE,
        bands: 5,
        transform: GeoTransform {
            origin_x: 0.0,
            origin_y: 60.0,
            pixel_width: 10.0,
            pixel_height: -10.0,
        },
        crs: Crs(EPSG),
    }
}

/// Same raster on every date: crop everywhere except one bare and one
/// permanently cloudy pixel.
pub fn raster() -> Raster {
    let mut data = Vec::with_capacity(SIZE * SIZE * 5);
    for row in 0..SIZE {
        for col in 0..SIZE {
            let pixel = PixelCoord::new(row, col);
            let values = if pixel == BARE_PIXEL {
                BARE
            } else if pixel == CLOUD_PIXEL {
                CLOUD
            } else {
                CROP
            };
            data.extend_from_slice(&values);
        }
    }
    Raster::new(header(), data).unwrap()
}

pub fn file_name(date: NaiveDate) -> String {
    format!("{}_stack.tif", date.format("%Y%m%d"))
}

pub fn in_memory_stack() -> (InMemoryReader, Vec<Acquisition>) {
    let mut reader = InMemoryReader::new();
    let mut acquisitions = Vec::new();
    for date in dates() {
        let path = file_name(date);
        reader.insert(&path, raster());
        acquisitions.push(Acquisition::new(date, path));
    }
    (reader, acquisitions)
}

/// Map coordinates of a pixel centre.
pub fn point(id: i64, label: i64, row: usize, col: usize) -> ReferencePoint {
    let (x, y) = header().transform.xy(PixelCoord::new(row, col));
    ReferencePoint {
        id,
        label,
        x,
        y,
        crs: Some(Crs(EPSG)),
    }
}

pub fn config(save_dir: &Path) -> SamplerConfig {
    SamplerConfig {
        save_dir: save_dir.to_path_buf(),
        patch_width: 4,
        patch_height: 4,
        ..SamplerConfig::default()
    }
}

/// Selects fixed offsets from the seed, in the given order.
pub struct OffsetSegmenter {
    pub offsets: Vec<(i64, i64)>,
}

impl OffsetSegmenter {
    pub fn new(offsets: &[(i64, i64)]) -> Self {
        OffsetSegmenter {
            offsets: offsets.to_vec(),
        }
    }
}

impl Segmenter for OffsetSegmenter {
    fn segment(&self, patch: &RgbImage, seed: PatchPoint, _label: i64) -> Result<Vec<SegmentMask>> {
        let (w, h) = patch.dimensions();
        let mut mask = vec![false; (w * h) as usize];
        for &(dr, dc) in &self.offsets {
            let r = i64::from(seed.row) + dr;
            let c = i64::from(seed.col) + dc;
            if (0..i64::from(h)).contains(&r) && (0..i64::from(w)).contains(&c) {
                mask[(r as u32 * w + c as u32) as usize] = true;
            }
        }
        Ok(vec![SegmentMask::new(w, h, mask, 0.9)?])
    }
}
