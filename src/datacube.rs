//! Per-pixel multi-band time series pulled from a stack of acquisitions.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, info};

use crate::data::align::DateGrid;
use crate::data::model::{Acquisition, Observation, PixelCoord, PixelSeries, Provenance};
use crate::data::raster::{Raster, RasterHeader, RasterReader};
use crate::error::{InputError, Result};
use crate::geo::{CoordTransformer, Crs};

/// One pixel to extract, with the identity its series will carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRequest {
    pub pixel: PixelCoord,
    pub provenance: Provenance,
    pub reference_id: i64,
}

/// Builds [`PixelSeries`] from a validated, date-sorted acquisition stack.
///
/// Decoded acquisitions are cached and shared by every pixel queried against
/// them. With a capacity the oldest decoded acquisition is released first;
/// without one the whole stack stays resident until [`release`](Self::release).
pub struct DatacubeExtractor<'a, R: RasterReader> {
    reader: &'a R,
    acquisitions: Vec<Acquisition>,
    header: RasterHeader,
    capacity: Option<usize>,
    cache: HashMap<usize, Arc<Raster>>,
    order: VecDeque<usize>,
}

impl<'a, R: RasterReader> DatacubeExtractor<'a, R> {
    /// Validate the stack: non-empty, strictly ascending dates, one CRS, one
    /// band count and one shape. The first acquisition is the reference.
    pub fn new(reader: &'a R, acquisitions: Vec<Acquisition>, capacity: Option<usize>) -> Result<Self> {
        let first = acquisitions.first().ok_or(InputError::EmptyAcquisitionList)?;
        let header = reader.read_header(first)?;

        for pair in acquisitions.windows(2) {
            if pair[0].date == pair[1].date {
                return Err(InputError::DuplicateDate(pair[0].date).into());
            }
            if pair[0].date > pair[1].date {
                return Err(InputError::UnsortedAcquisitions {
                    previous: pair[0].date,
                    next: pair[1].date,
                }
                .into());
            }
        }

        for acquisition in &acquisitions[1..] {
            let other = reader.read_header(acquisition)?;
            let path = acquisition.path.clone();
            if other.crs != header.crs {
                return Err(InputError::CrsMismatch {
                    expected: header.crs,
                    found: other.crs,
                    path,
                }
                .into());
            }
            if other.bands != header.bands {
                return Err(InputError::BandCountMismatch {
                    expected: header.bands,
                    found: other.bands,
                    path,
                }
                .into());
            }
            if (other.height, other.width) != (header.height, header.width) {
                return Err(InputError::ShapeMismatch {
                    expected: (header.height, header.width),
                    found: (other.height, other.width),
                    path,
                }
                .into());
            }
        }

        info!(
            "Datacube: {} acquisitions, {}x{} pixels, {} bands, {}",
            acquisitions.len(),
            header.height,
            header.width,
            header.bands,
            header.crs
        );

        Ok(DatacubeExtractor {
            reader,
            acquisitions,
            header,
            capacity: capacity.map(|c| c.max(1)),
            cache: HashMap::new(),
            order: VecDeque::new(),
        })
    }

    pub fn header(&self) -> &RasterHeader {
        &self.header
    }

    pub fn acquisitions(&self) -> &[Acquisition] {
        &self.acquisitions
    }

    /// Target grid made of the acquisition dates.
    pub fn date_grid(&self) -> Result<DateGrid> {
        DateGrid::from_acquisitions(&self.acquisitions)
    }

    /// A map coordinate given in `crs`, expressed in the raster CRS.
    pub fn to_raster_crs(&self, x: f64, y: f64, crs: Crs) -> Result<(f64, f64)> {
        CoordTransformer::new(crs, self.header.crs)?.transform(x, y)
    }

    /// Raster-space pixel containing a map coordinate given in `crs`.
    pub fn locate(&self, x: f64, y: f64, crs: Crs) -> Result<PixelCoord> {
        let (x, y) = self.to_raster_crs(x, y, crs)?;
        self.header
            .transform
            .pixel_at(x, y, self.header.height, self.header.width)
    }

    /// Full, unfiltered band vectors for every request, one observation per
    /// acquisition in date order. Any out-of-bounds pixel fails the whole call.
    pub fn extract(&mut self, requests: &[PixelRequest]) -> Result<Vec<PixelSeries>> {
        for request in requests {
            self.header.check_bounds(request.pixel)?;
        }

        let mut observations: Vec<Vec<Observation>> = requests
            .iter()
            .map(|_| Vec::with_capacity(self.acquisitions.len()))
            .collect();

        for index in 0..self.acquisitions.len() {
            let raster = self.raster(index)?;
            let date = self.acquisitions[index].date;
            for (request, series) in requests.iter().zip(observations.iter_mut()) {
                series.push(Observation {
                    date,
                    bands: raster.pixel(request.pixel).to_vec(),
                });
            }
        }

        Ok(requests
            .iter()
            .zip(observations)
            .map(|(request, observations)| PixelSeries {
                pixel: request.pixel,
                provenance: request.provenance,
                reference_id: request.reference_id,
                observations,
            })
            .collect())
    }

    /// Drop every decoded acquisition.
    pub fn release(&mut self) {
        if !self.cache.is_empty() {
            debug!("Releasing {} decoded acquisitions", self.cache.len());
        }
        self.cache.clear();
        self.order.clear();
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Decoded acquisition `index`, served from the cache when resident.
    pub fn raster(&mut self, index: usize) -> Result<Arc<Raster>> {
        if let Some(raster) = self.cache.get(&index) {
            return Ok(Arc::clone(raster));
        }

        let acquisition = self.acquisitions.get(index).ok_or_else(|| {
            InputError::InvalidConfig(format!(
                "acquisition {index} requested from a stack of {}",
                self.acquisitions.len()
            ))
        })?;
        let raster = self.reader.read(acquisition)?;
        if raster.header.bands != self.header.bands
            || (raster.header.height, raster.header.width) != (self.header.height, self.header.width)
        {
            return Err(InputError::ShapeMismatch {
                expected: (self.header.height, self.header.width),
                found: (raster.header.height, raster.header.width),
                path: acquisition.path.clone(),
            }
            .into());
        }
        let raster = Arc::new(raster);

        if let Some(capacity) = self.capacity {
            while self.order.len() >= capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.cache.remove(&evicted);
                }
            }
        }
        self.cache.insert(index, Arc::clone(&raster));
        self.order.push_back(index);
        Ok(raster)
    }
}
