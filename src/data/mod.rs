/// Data layer: core types, raster access, and per-pixel time-series stages.
///
/// Architecture:
/// ```text
///  YYYYMMDD*.tif          points .csv / .geojson
///        │                        │
///        ▼                        ▼
///   ┌──────────┐            ┌──────────┐
///   │  loader   │ discover   │  loader   │ parse → ReferencePoint
///   └──────────┘            └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  raster   │  GeoTIFF → Raster (rows × cols × bands)
///   └──────────┘
///        │   (datacube extraction)
///        ▼
///   ┌──────────┐     ┌──────────┐     ┌──────────┐
///   │  filter   │ ──▶ │  align    │ ──▶ │  index    │  PixelSeries → DerivedIndexSeries
///   └──────────┘     └──────────┘     └──────────┘
///                                           │  (similarity cleaning)
///                                           ▼
///                                     ┌──────────┐
///                                     │  store    │  records → CSV / GeoJSON / Parquet
///                                     └──────────┘
/// ```

pub mod align;
pub mod filter;
pub mod index;
pub mod loader;
pub mod model;
pub mod raster;
pub mod store;
