use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use log::debug;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

use super::model::{Acquisition, PixelCoord};
use crate::error::{InputError, Result, SamplerError};
use crate::geo::{Crs, GeoTransform};

// GeoTIFF tags and keys
const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

// ---------------------------------------------------------------------------
// Raster – one decoded acquisition
// ---------------------------------------------------------------------------

/// Shape and georeferencing of an acquisition, readable without decoding pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterHeader {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
}

impl RasterHeader {
    pub fn contains(&self, pixel: PixelCoord) -> bool {
        pixel.row < self.height && pixel.col < self.width
    }

    pub fn check_bounds(&self, pixel: PixelCoord) -> Result<()> {
        if self.contains(pixel) {
            Ok(())
        } else {
            Err(InputError::PixelOutOfBounds {
                pixel,
                height: self.height,
                width: self.width,
            }
            .into())
        }
    }
}

/// Pixel values stored band-interleaved: `[(row * width + col) * bands + band]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub header: RasterHeader,
    data: Vec<f64>,
}

impl Raster {
    pub fn new(header: RasterHeader, data: Vec<f64>) -> Result<Self> {
        let expected = header.width * header.height * header.bands;
        if data.len() != expected {
            return Err(InputError::UnsupportedRaster(format!(
                "{} samples for a {}x{}x{} raster",
                data.len(),
                header.height,
                header.width,
                header.bands
            ))
            .into());
        }
        Ok(Raster { header, data })
    }

    /// All band values at one pixel. Panics if the pixel is outside the
    /// raster; callers check bounds on the header first.
    pub fn pixel(&self, pixel: PixelCoord) -> &[f64] {
        let bands = self.header.bands;
        let start = (pixel.row * self.header.width + pixel.col) * bands;
        &self.data[start..start + bands]
    }

    /// Every value of one band in row-major order.
    pub fn band(&self, band: usize) -> impl Iterator<Item = f64> + '_ {
        self.data
            .iter()
            .skip(band)
            .step_by(self.header.bands.max(1))
            .copied()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }
}

// ---------------------------------------------------------------------------
// RasterReader – the raster I/O seam
// ---------------------------------------------------------------------------

/// Source of decoded acquisitions. Implementations must be deterministic.
pub trait RasterReader {
    fn read_header(&self, acquisition: &Acquisition) -> Result<RasterHeader>;
    fn read(&self, acquisition: &Acquisition) -> Result<Raster>;
}

/// Reads band-interleaved GeoTIFFs from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoTiffReader;

impl RasterReader for GeoTiffReader {
    fn read_header(&self, acquisition: &Acquisition) -> Result<RasterHeader> {
        let path = &acquisition.path;
        let mut decoder = open_decoder(path)?;
        read_header(&mut decoder, path)
    }

    fn read(&self, acquisition: &Acquisition) -> Result<Raster> {
        let path = &acquisition.path;
        let mut decoder = open_decoder(path)?;
        let header = read_header(&mut decoder, path)?;
        let image = decoder
            .read_image()
            .map_err(|e| SamplerError::tiff(path, e))?;
        let data = decoding_result_to_f64(image, path)?;
        debug!(
            "Decoded {} ({}x{}x{})",
            path.display(),
            header.height,
            header.width,
            header.bands
        );
        Raster::new(header, data)
    }
}

/// Rasters held in memory and keyed by acquisition path.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReader {
    rasters: HashMap<PathBuf, Raster>,
}

impl InMemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, raster: Raster) {
        self.rasters.insert(path.into(), raster);
    }

    fn lookup(&self, acquisition: &Acquisition) -> Result<&Raster> {
        self.rasters.get(&acquisition.path).ok_or_else(|| {
            SamplerError::io(
                &acquisition.path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "raster not loaded"),
            )
        })
    }
}

impl RasterReader for InMemoryReader {
    fn read_header(&self, acquisition: &Acquisition) -> Result<RasterHeader> {
        Ok(self.lookup(acquisition)?.header.clone())
    }

    fn read(&self, acquisition: &Acquisition) -> Result<Raster> {
        Ok(self.lookup(acquisition)?.clone())
    }
}

// -- GeoTIFF decoding helpers --

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| SamplerError::io(path, e))?;
    let decoder = Decoder::new(BufReader::new(file)).map_err(|e| SamplerError::tiff(path, e))?;
    Ok(decoder.with_limits(Limits::unlimited()))
}

fn read_header(decoder: &mut Decoder<BufReader<File>>, path: &Path) -> Result<RasterHeader> {
    let tiff_err = |e| SamplerError::tiff(path, e);

    let (width, height) = decoder.dimensions().map_err(tiff_err)?;
    let bands = match decoder.find_tag(Tag::SamplesPerPixel).map_err(tiff_err)? {
        Some(v) => v.into_u32().map_err(tiff_err)? as usize,
        None => 1,
    };

    let scale = find_f64_vec(decoder, MODEL_PIXEL_SCALE, path)?;
    let tiepoint = find_f64_vec(decoder, MODEL_TIEPOINT, path)?;
    let matrix = find_f64_vec(decoder, MODEL_TRANSFORMATION, path)?;
    let transform = geo_transform(scale, tiepoint, matrix, path)?;

    let keys = match decoder
        .find_tag(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY))
        .map_err(tiff_err)?
    {
        Some(v) => v.into_u16_vec().map_err(tiff_err)?,
        None => Vec::new(),
    };
    let crs = epsg_from_geokeys(&keys).ok_or_else(|| {
        InputError::UnsupportedRaster(format!("{} carries no EPSG code", path.display()))
    })?;

    Ok(RasterHeader {
        width: width as usize,
        height: height as usize,
        bands,
        transform,
        crs,
    })
}

fn find_f64_vec(
    decoder: &mut Decoder<BufReader<File>>,
    tag: u16,
    path: &Path,
) -> Result<Option<Vec<f64>>> {
    decoder
        .find_tag(Tag::from_u16_exhaustive(tag))
        .map_err(|e| SamplerError::tiff(path, e))?
        .map(|v| v.into_f64_vec().map_err(|e| SamplerError::tiff(path, e)))
        .transpose()
}

fn geo_transform(
    scale: Option<Vec<f64>>,
    tiepoint: Option<Vec<f64>>,
    matrix: Option<Vec<f64>>,
    path: &Path,
) -> Result<GeoTransform> {
    if let (Some(scale), Some(tie)) = (&scale, &tiepoint) {
        if scale.len() >= 2 && tie.len() >= 6 {
            let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
            return Ok(GeoTransform {
                origin_x: x - i * scale[0],
                origin_y: y + j * scale[1],
                pixel_width: scale[0],
                pixel_height: -scale[1],
            });
        }
    }
    if let Some(m) = matrix {
        if m.len() >= 8 {
            if m[1] != 0.0 || m[4] != 0.0 {
                return Err(InputError::UnsupportedRaster(format!(
                    "{} is rotated",
                    path.display()
                ))
                .into());
            }
            return Ok(GeoTransform {
                origin_x: m[3],
                origin_y: m[7],
                pixel_width: m[0],
                pixel_height: m[5],
            });
        }
    }
    Err(InputError::UnsupportedRaster(format!("{} is not georeferenced", path.display())).into())
}

/// Projected CRS wins over geographic when both keys are present.
fn epsg_from_geokeys(keys: &[u16]) -> Option<Crs> {
    if keys.len() < 4 {
        return None;
    }
    let entries: Vec<&[u16]> = keys[4..].chunks_exact(4).collect();
    let lookup = |id: u16| {
        entries
            .iter()
            .find(|e| e[0] == id && e[1] == 0)
            .map(|e| e[3])
            .filter(|code| *code != 0 && *code != 32767)
    };
    lookup(PROJECTED_CS_TYPE_KEY)
        .or_else(|| lookup(GEOGRAPHIC_TYPE_KEY))
        .map(|code| Crs(code as u32))
}

fn decoding_result_to_f64(result: DecodingResult, path: &Path) -> Result<Vec<f64>> {
    #[allow(unreachable_patterns)]
    let data = match result {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        _ => {
            return Err(InputError::UnsupportedRaster(format!(
                "{}: unsupported sample type",
                path.display()
            ))
            .into())
        }
    };
    Ok(data)
}

// ---------------------------------------------------------------------------
// GeoTIFF writing
// ---------------------------------------------------------------------------

/// Write a raster as an uncompressed, band-interleaved float32 GeoTIFF with a
/// single strip.
pub fn write_geotiff(path: &Path, raster: &Raster) -> Result<()> {
    let header = &raster.header;
    let tiff_err = |e| SamplerError::tiff(path, e);

    let file = File::create(path).map_err(|e| SamplerError::io(path, e))?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file)).map_err(tiff_err)?;
    let mut dir = encoder.new_directory().map_err(tiff_err)?;

    let samples: Vec<f32> = raster.data().iter().map(|&v| v as f32).collect();
    let bits = vec![32u16; header.bands];
    let formats = vec![3u16; header.bands]; // IEEE floating point

    dir.write_tag(Tag::ImageWidth, header.width as u32)
        .map_err(tiff_err)?;
    dir.write_tag(Tag::ImageLength, header.height as u32)
        .map_err(tiff_err)?;
    dir.write_tag(Tag::BitsPerSample, &bits[..])
        .map_err(tiff_err)?;
    dir.write_tag(Tag::Compression, 1u16).map_err(tiff_err)?;
    dir.write_tag(Tag::PhotometricInterpretation, 1u16)
        .map_err(tiff_err)?;
    dir.write_tag(Tag::SamplesPerPixel, header.bands as u16)
        .map_err(tiff_err)?;
    dir.write_tag(Tag::RowsPerStrip, header.height as u32)
        .map_err(tiff_err)?;
    dir.write_tag(Tag::StripByteCounts, (samples.len() * 4) as u32)
        .map_err(tiff_err)?;
    dir.write_tag(Tag::PlanarConfiguration, 1u16)
        .map_err(tiff_err)?;
    dir.write_tag(Tag::SampleFormat, &formats[..])
        .map_err(tiff_err)?;

    let gt = header.transform;
    let scale = [gt.pixel_width, -gt.pixel_height, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    let crs_key = if header.crs.is_geographic() {
        GEOGRAPHIC_TYPE_KEY
    } else {
        PROJECTED_CS_TYPE_KEY
    };
    let model_type = if header.crs.is_geographic() { 2 } else { 1 };
    let geokeys: [u16; 16] = [
        1, 1, 0, 3,
        GT_MODEL_TYPE_KEY, 0, 1, model_type,
        GT_RASTER_TYPE_KEY, 0, 1, 1,
        crs_key, 0, 1, header.crs.epsg() as u16,
    ];
    dir.write_tag(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE), &scale[..])
        .map_err(tiff_err)?;
    dir.write_tag(Tag::from_u16_exhaustive(MODEL_TIEPOINT), &tiepoint[..])
        .map_err(tiff_err)?;
    dir.write_tag(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY), &geokeys[..])
        .map_err(tiff_err)?;

    let offset = dir.write_data(&samples[..]).map_err(tiff_err)?;
    dir.write_tag(Tag::StripOffsets, offset as u32)
        .map_err(tiff_err)?;
    dir.finish().map_err(tiff_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn header(height: usize, width: usize, bands: usize) -> RasterHeader {
        RasterHeader {
            width,
            height,
            bands,
            transform: GeoTransform {
                origin_x: 300_000.0,
                origin_y: 5_000_000.0,
                pixel_width: 10.0,
                pixel_height: -10.0,
            },
            crs: Crs(32633),
        }
    }

    #[test]
    fn pixel_and_band_access_are_interleaved() {
        // 2x2 raster, 2 bands: value = row*100 + col*10 + band
        let data: Vec<f64> = (0..2)
            .flat_map(|r| (0..2).flat_map(move |c| (0..2).map(move |b| (r * 100 + c * 10 + b) as f64)))
            .collect();
        let raster = Raster::new(header(2, 2, 2), data).unwrap();
        assert_eq!(raster.pixel(PixelCoord::new(1, 0)), &[100.0, 101.0]);
        let band1: Vec<f64> = raster.band(1).collect();
        assert_eq!(band1, vec![1.0, 11.0, 101.0, 111.0]);
    }

    #[test]
    fn raster_rejects_wrong_sample_count() {
        assert!(Raster::new(header(2, 2, 3), vec![0.0; 11]).is_err());
    }

    #[test]
    fn bounds_check_reports_pixel() {
        let h = header(5, 4, 1);
        assert!(h.check_bounds(PixelCoord::new(4, 3)).is_ok());
        let err = h.check_bounds(PixelCoord::new(5, 0)).unwrap_err();
        assert!(matches!(
            err,
            SamplerError::Input(InputError::PixelOutOfBounds { .. })
        ));
    }

    #[test]
    fn geokeys_prefer_projected_code() {
        let keys = [1, 1, 0, 2, 2048, 0, 1, 4326, 3072, 0, 1, 32633];
        assert_eq!(epsg_from_geokeys(&keys), Some(Crs(32633)));
        let user_defined = [1, 1, 0, 1, 3072, 0, 1, 32767];
        assert_eq!(epsg_from_geokeys(&user_defined), None);
    }

    #[test]
    fn geotiff_round_trip_preserves_values_and_georeferencing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20230501_stack.tif");
        let data: Vec<f64> = (0..3 * 4 * 5).map(|v| v as f64 * 0.5).collect();
        let raster = Raster::new(header(3, 4, 5), data).unwrap();
        write_geotiff(&path, &raster).unwrap();

        let acquisition = Acquisition::new(
            chrono::NaiveDate::from_ymd_opt(2023, 5, 1).unwrap(),
            &path,
        );
        let reader = GeoTiffReader;
        assert_eq!(reader.read_header(&acquisition).unwrap(), raster.header);
        assert_eq!(reader.read(&acquisition).unwrap(), raster);
    }
}
