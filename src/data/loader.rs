use std::path::Path;

use chrono::NaiveDate;
use glob::{glob_with, MatchOptions, Pattern};
use log::{debug, info};
use serde_json::Value as JsonValue;

use super::model::{Acquisition, ReferencePoint};
use crate::error::{InputError, Result, SamplerError};
use crate::geo::Crs;

// ---------------------------------------------------------------------------
// Acquisition discovery
// ---------------------------------------------------------------------------

/// Find every `*.tif` / `*.tiff` in `dir`, whatever the extension's case, and
/// sort by the `YYYYMMDD` prefix of the file name.
///
/// Fails on an empty directory, a name without a valid date prefix, or two
/// files sharing a date.
pub fn discover_acquisitions(dir: &Path) -> Result<Vec<Acquisition>> {
    let mut acquisitions = Vec::new();
    let escaped = Path::new(&Pattern::escape(&dir.to_string_lossy())).to_path_buf();
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };

    for pattern in ["*.tif", "*.tiff"] {
        let pattern = escaped.join(pattern).to_string_lossy().to_string();
        for entry in glob_with(&pattern, options)? {
            let path = entry.map_err(|e| {
                let path = e.path().to_path_buf();
                SamplerError::io(path, e.into_error())
            })?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let date = parse_date_prefix(&name)?;
            acquisitions.push(Acquisition::new(date, path));
        }
    }

    sort_acquisitions(&mut acquisitions)?;
    info!(
        "Found {} acquisitions in {} ({} .. {})",
        acquisitions.len(),
        dir.display(),
        acquisitions[0].date,
        acquisitions[acquisitions.len() - 1].date
    );
    Ok(acquisitions)
}

/// Parse the first eight characters of a file name as `YYYYMMDD`.
pub fn parse_date_prefix(name: &str) -> Result<NaiveDate> {
    let prefix = name
        .get(..8)
        .ok_or_else(|| InputError::MalformedDatePrefix(name.to_string()))?;
    NaiveDate::parse_from_str(prefix, "%Y%m%d")
        .map_err(|_| InputError::MalformedDatePrefix(name.to_string()).into())
}

/// Sort ascending by date and reject duplicates and an empty list.
pub fn sort_acquisitions(acquisitions: &mut [Acquisition]) -> Result<()> {
    if acquisitions.is_empty() {
        return Err(InputError::EmptyAcquisitionList.into());
    }
    acquisitions.sort_by(|a, b| a.date.cmp(&b.date));
    if let Some(pair) = acquisitions.windows(2).find(|w| w[0].date == w[1].date) {
        return Err(InputError::DuplicateDate(pair[0].date).into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Reference points
// ---------------------------------------------------------------------------

/// Load reference points. Dispatch by extension.
///
/// Supported formats:
/// * `.csv`              – columns `id`, `label` (or `multi_clas`), `x`, `y`, optional `crs`
/// * `.geojson` / `.json` – FeatureCollection of Points with `id` and `multi_clas` properties
///
/// `default_crs` applies to points that do not carry their own.
pub fn load_reference_points(path: &Path, default_crs: Option<Crs>) -> Result<Vec<ReferencePoint>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let mut points = match ext.as_str() {
        "csv" => load_points_csv(path)?,
        "geojson" | "json" => load_points_geojson(path)?,
        other => {
            return Err(InputError::InvalidConfig(format!(
                "unsupported reference point file extension: .{other}"
            ))
            .into())
        }
    };

    for point in &mut points {
        if point.crs.is_none() {
            point.crs = default_crs;
        }
    }
    info!("Loaded {} reference points from {}", points.len(), path.display());
    Ok(points)
}

fn load_points_csv(path: &Path) -> Result<Vec<ReferencePoint>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut points = Vec::new();
    for record in reader.deserialize() {
        let point: ReferencePoint = record?;
        points.push(point);
    }
    Ok(points)
}

/// Expected layout:
///
/// ```json
/// {
///   "type": "FeatureCollection",
///   "crs": { "properties": { "name": "urn:ogc:def:crs:EPSG::32633" } },
///   "features": [
///     { "geometry": { "type": "Point", "coordinates": [x, y] },
///       "properties": { "id": 1, "multi_clas": 2 } }
///   ]
/// }
/// ```
fn load_points_geojson(path: &Path) -> Result<Vec<ReferencePoint>> {
    let text = std::fs::read_to_string(path).map_err(|e| SamplerError::io(path, e))?;
    let root: JsonValue = serde_json::from_str(&text)?;

    let invalid = |msg: String| SamplerError::from(InputError::InvalidConfig(msg));

    let collection_crs = root
        .pointer("/crs/properties/name")
        .and_then(|v| v.as_str())
        .and_then(parse_crs_name);

    let features = root
        .get("features")
        .and_then(|f| f.as_array())
        .ok_or_else(|| invalid(format!("{}: expected a FeatureCollection", path.display())))?;

    let mut points = Vec::with_capacity(features.len());
    for (i, feature) in features.iter().enumerate() {
        let coords = feature
            .pointer("/geometry/coordinates")
            .and_then(|c| c.as_array())
            .filter(|c| c.len() >= 2)
            .ok_or_else(|| invalid(format!("feature {i}: missing point coordinates")))?;
        let x = coords[0]
            .as_f64()
            .ok_or_else(|| invalid(format!("feature {i}: x is not a number")))?;
        let y = coords[1]
            .as_f64()
            .ok_or_else(|| invalid(format!("feature {i}: y is not a number")))?;

        let properties = feature.get("properties");
        let integer = |key: &str| properties.and_then(|p| p.get(key)).and_then(json_to_i64);
        let id = integer("id").ok_or_else(|| invalid(format!("feature {i}: missing 'id'")))?;
        let label = integer("multi_clas")
            .or_else(|| integer("label"))
            .ok_or_else(|| invalid(format!("feature {i}: missing 'multi_clas'")))?;

        points.push(ReferencePoint {
            id,
            label,
            x,
            y,
            crs: collection_crs,
        });
    }
    debug!("Parsed {} GeoJSON features", points.len());
    Ok(points)
}

fn json_to_i64(val: &JsonValue) -> Option<i64> {
    match val {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts `EPSG:32633` and `urn:ogc:def:crs:EPSG::32633`; CRS84 maps to 4326.
fn parse_crs_name(name: &str) -> Option<Crs> {
    if name.ends_with("CRS84") {
        return Some(Crs(crate::geo::EPSG_WGS84));
    }
    name.rsplit(':').next()?.parse().ok().map(Crs)
}
