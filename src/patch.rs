//! Image patches handed to the segmenter, and the choice of the acquisition
//! they are cut from.

use std::collections::BTreeSet;

use image::{imageops, Rgb, RgbImage};
use log::{debug, info};
use rayon::prelude::*;

use crate::data::filter::QualityCode;
use crate::data::model::PixelCoord;
use crate::data::raster::{Raster, RasterReader};
use crate::datacube::DatacubeExtractor;
use crate::error::{InputError, Result, SamplerError};
use crate::segment::SegmentMask;

// ---------------------------------------------------------------------------
// Optimal image selection
// ---------------------------------------------------------------------------

/// Number of pixels whose quality value is one of `codes`.
pub fn count_flagged(raster: &Raster, quality_band: usize, codes: &BTreeSet<QualityCode>) -> Result<usize> {
    let bands = raster.header.bands;
    if quality_band >= bands {
        return Err(InputError::MissingBand {
            band: quality_band,
            available: bands,
        }
        .into());
    }
    Ok(raster
        .data()
        .par_chunks(bands)
        .filter(|pixel| codes.iter().any(|c| c.matches(pixel[quality_band])))
        .count())
}

/// Index of the acquisition with the fewest flagged pixels. Ties go to the
/// earliest acquisition.
///
/// Rasters are decoded through the cube, so with an unbounded cache the
/// extraction that follows reuses them.
pub fn select_optimal_image<R: RasterReader>(
    cube: &mut DatacubeExtractor<'_, R>,
    quality_band: usize,
    codes: &BTreeSet<QualityCode>,
) -> Result<usize> {
    let mut best: Option<(usize, usize)> = None;
    for index in 0..cube.acquisitions().len() {
        let raster = cube.raster(index)?;
        let count = count_flagged(&raster, quality_band, codes)?;
        debug!(
            "{}: {count} flagged pixels",
            cube.acquisitions()[index].path.display()
        );
        if best.map_or(true, |(_, fewest)| count < fewest) {
            best = Some((index, count));
        }
    }

    let (best, count) = best.ok_or(InputError::EmptyAcquisitionList)?;
    info!(
        "Optimal image: {} ({count} flagged pixels)",
        cube.acquisitions()[best].path.display()
    );
    Ok(best)
}

// ---------------------------------------------------------------------------
// 8-bit rendering
// ---------------------------------------------------------------------------

/// Render three bands as an RGB image, stretching each channel linearly from
/// its min/max to 0–255. Constant channels render as 0.
pub fn stretch_to_u8(raster: &Raster, bands: [usize; 3]) -> Result<RgbImage> {
    let h = &raster.header;
    if let Some(&band) = bands.iter().find(|&&b| b >= h.bands) {
        return Err(InputError::MissingBand {
            band,
            available: h.bands,
        }
        .into());
    }

    let ranges = bands.map(|band| {
        raster
            .band(band)
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            })
    });

    let width = u32::try_from(h.width).map_err(|_| too_large(h.width))?;
    let height = u32::try_from(h.height).map_err(|_| too_large(h.height))?;

    Ok(RgbImage::from_fn(width, height, |x, y| {
        let values = raster.pixel(PixelCoord::new(y as usize, x as usize));
        let mut rgb = [0u8; 3];
        for (channel, (&band, &(lo, hi))) in bands.iter().zip(&ranges).enumerate() {
            rgb[channel] = scale(values[band], lo, hi);
        }
        Rgb(rgb)
    }))
}

fn scale(value: f64, lo: f64, hi: f64) -> u8 {
    if !value.is_finite() || hi <= lo {
        return 0;
    }
    ((value - lo) / (hi - lo) * 255.0).clamp(0.0, 255.0) as u8
}

fn too_large(n: usize) -> SamplerError {
    InputError::UnsupportedRaster(format!("dimension {n} exceeds the image size limit")).into()
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// A position inside a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchPoint {
    pub row: u32,
    pub col: u32,
}

/// A window of the rendered image around a seed pixel.
#[derive(Debug, Clone)]
pub struct Patch {
    /// Raster position of the patch's top-left pixel.
    pub origin: PixelCoord,
    pub image: RgbImage,
    pub seed: PatchPoint,
}

impl Patch {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn to_raster(&self, point: PatchPoint) -> PixelCoord {
        PixelCoord::new(
            self.origin.row + point.row as usize,
            self.origin.col + point.col as usize,
        )
    }

    /// Raster positions of every selected mask pixel, row-major.
    pub fn mask_to_raster(&self, mask: &SegmentMask) -> Result<Vec<PixelCoord>> {
        if (mask.width(), mask.height()) != (self.width(), self.height()) {
            return Err(SamplerError::Segmentation(format!(
                "mask is {}x{}, patch is {}x{}",
                mask.height(),
                mask.width(),
                self.height(),
                self.width()
            )));
        }
        Ok(mask.points().map(|p| self.to_raster(p)).collect())
    }
}

/// Cut a `width` x `height` window centred on `seed`.
///
/// Each axis spans `[seed - size/2, seed + size/2)` clipped to the image, and
/// always includes the seed itself.
pub fn extract_patch(image: &RgbImage, seed: PixelCoord, width: usize, height: usize) -> Result<Patch> {
    let (img_w, img_h) = (image.width() as usize, image.height() as usize);
    if seed.row >= img_h || seed.col >= img_w {
        return Err(InputError::PixelOutOfBounds {
            pixel: seed,
            height: img_h,
            width: img_w,
        }
        .into());
    }

    let (row0, row1) = window(seed.row, height, img_h);
    let (col0, col1) = window(seed.col, width, img_w);

    let patch = imageops::crop_imm(
        image,
        col0 as u32,
        row0 as u32,
        (col1 - col0) as u32,
        (row1 - row0) as u32,
    )
    .to_image();

    Ok(Patch {
        origin: PixelCoord::new(row0, col0),
        image: patch,
        seed: PatchPoint {
            row: (seed.row - row0) as u32,
            col: (seed.col - col0) as u32,
        },
    })
}

fn window(centre: usize, size: usize, dim: usize) -> (usize, usize) {
    let start = centre.saturating_sub(size / 2);
    let end = (centre + size / 2).min(dim).max(centre + 1);
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::Acquisition;
    use crate::data::raster::{InMemoryReader, RasterHeader};
    use crate::geo::{Crs, GeoTransform};
    use chrono::NaiveDate;

    fn raster(height: usize, width: usize, bands: usize, f: impl Fn(usize, usize, usize) -> f64) -> Raster {
        let header = RasterHeader {
            width,
            height,
            bands,
            transform: GeoTransform::identity(),
            crs: Crs(32633),
        };
        let mut data = Vec::with_capacity(width * height * bands);
        for r in 0..height {
            for c in 0..width {
                for b in 0..bands {
                    data.push(f(r, c, b));
                }
            }
        }
        Raster::new(header, data).unwrap()
    }

    #[test]
    fn stretch_maps_min_and_max_to_full_range() {
        let r = raster(2, 2, 4, |r, c, b| match b {
            0 => [0.0, 100.0, 200.0, 400.0][r * 2 + c],
            1 => 7.0,
            _ => 1000.0 - (r * 2 + c) as f64,
        });
        let img = stretch_to_u8(&r, [0, 1, 2]).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 255]);
        assert_eq!(img.get_pixel(1, 1).0, [255, 0, 0]);
        assert_eq!(img.get_pixel(1, 0).0[0], 63);
        assert!(stretch_to_u8(&r, [0, 1, 4]).is_err());
    }

    #[test]
    fn interior_patch_is_centred_on_seed() {
        let img = RgbImage::new(50, 40);
        let patch = extract_patch(&img, PixelCoord::new(20, 25), 10, 6).unwrap();
        assert_eq!(patch.origin, PixelCoord::new(17, 20));
        assert_eq!((patch.height(), patch.width()), (6, 10));
        assert_eq!(patch.seed, PatchPoint { row: 3, col: 5 });
        assert_eq!(patch.to_raster(patch.seed), PixelCoord::new(20, 25));
    }

    #[test]
    fn patch_is_clipped_per_axis() {
        let img = RgbImage::new(50, 40);
        let patch = extract_patch(&img, PixelCoord::new(38, 2), 10, 10).unwrap();
        assert_eq!(patch.origin, PixelCoord::new(33, 0));
        assert_eq!((patch.height(), patch.width()), (7, 7));
        assert_eq!(patch.seed, PatchPoint { row: 5, col: 2 });

        assert!(extract_patch(&img, PixelCoord::new(40, 0), 10, 10).is_err());
    }

    #[test]
    fn mask_pixels_map_back_to_raster() {
        let img = RgbImage::new(20, 20);
        let patch = extract_patch(&img, PixelCoord::new(10, 10), 4, 4).unwrap();
        let mut mask = vec![false; 16];
        mask[0] = true;
        mask[6] = true;
        let mask = SegmentMask::new(4, 4, mask, 0.9).unwrap();
        assert_eq!(
            patch.mask_to_raster(&mask).unwrap(),
            vec![PixelCoord::new(8, 8), PixelCoord::new(9, 10)]
        );

        let wrong = SegmentMask::new(3, 4, vec![false; 12], 0.9).unwrap();
        assert!(patch.mask_to_raster(&wrong).is_err());
    }

    #[test]
    fn optimal_image_has_fewest_flagged_pixels() {
        let mut reader = InMemoryReader::new();
        let quality = [[4.0, 8.0, 0.0, 4.0], [4.0, 4.0, 9.0, 4.0], [3.0, 4.0, 4.0, 10.0]];
        let mut acquisitions = Vec::new();
        for (i, q) in quality.iter().enumerate() {
            let path = format!("2023050{}.tif", i + 1);
            reader.insert(&path, raster(2, 2, 2, |r, c, b| if b == 1 { q[r * 2 + c] } else { 0.5 }));
            acquisitions.push(Acquisition::new(
                NaiveDate::from_ymd_opt(2023, 5, i as u32 + 1).unwrap(),
                path,
            ));
        }

        let mut cube = DatacubeExtractor::new(&reader, acquisitions, None).unwrap();
        let best = select_optimal_image(&mut cube, 1, &QualityCode::invalid()).unwrap();
        assert_eq!(best, 1);
        assert_eq!(cube.cached(), 3);

        // Without fill counted, the first two tie and the earlier wins.
        let best = select_optimal_image(&mut cube, 1, &QualityCode::contaminated()).unwrap();
        assert_eq!(best, 0);

        assert!(select_optimal_image(&mut cube, 2, &QualityCode::invalid()).is_err());
    }
}
