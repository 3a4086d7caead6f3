use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Float64Builder, Int64Array, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::{debug, info};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use serde_json::json;

use super::model::{AcceptedSample, SampleRecord};
use crate::error::{InputError, Result, SamplerError};
use crate::geo::Crs;

// ---------------------------------------------------------------------------
// Deletion by similarity verdict
// ---------------------------------------------------------------------------

/// Remove the records of rejected candidates.
///
/// `rejected` holds candidate indices as given to the similarity filter;
/// candidate `i` is stored at record `i + offset`. With the reference at
/// record 0 the offset is 1.
pub fn apply_rejections<T>(records: Vec<T>, rejected: &[usize], offset: usize) -> Result<Vec<T>> {
    let mut drop = BTreeSet::new();
    for &candidate in rejected {
        let record = candidate + offset;
        if record >= records.len() {
            return Err(InputError::RecordOutOfRange {
                candidate,
                record,
                records: records.len(),
            }
            .into());
        }
        drop.insert(record);
    }
    Ok(records
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !drop.contains(i))
        .map(|(_, r)| r)
        .collect())
}

/// Keep the first sample at each exact geometry.
pub fn dedup_by_geometry(samples: Vec<AcceptedSample>) -> Vec<AcceptedSample> {
    let before = samples.len();
    let mut seen = HashSet::new();
    let kept: Vec<AcceptedSample> = samples
        .into_iter()
        .filter(|s| seen.insert(s.record.geometry_key()))
        .collect();
    if kept.len() < before {
        debug!("Dropped {} samples with duplicate geometry", before - kept.len());
    }
    kept
}

// ---------------------------------------------------------------------------
// Vector output
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SampleRow<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    multi_clas: i64,
    id: i64,
    x: f64,
    y: f64,
}

impl<'a> From<&'a SampleRecord> for SampleRow<'a> {
    fn from(r: &'a SampleRecord) -> Self {
        SampleRow {
            kind: r.provenance.tag(),
            multi_clas: r.label,
            id: r.reference_id,
            x: r.x,
            y: r.y,
        }
    }
}

/// Write records, choosing the format by extension (`.csv`, `.geojson`/`.json`).
pub fn write_samples(path: &Path, records: &[SampleRecord], crs: Crs) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "csv" => write_samples_csv(path, records),
        "geojson" | "json" => write_samples_geojson(path, records, crs),
        other => Err(InputError::InvalidConfig(format!(
            "unsupported sample output extension: .{other}"
        ))
        .into()),
    }
}

pub fn write_samples_csv(path: &Path, records: &[SampleRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(SampleRow::from(record))?;
    }
    writer.flush().map_err(|e| SamplerError::io(path, e))?;
    info!("Wrote {} samples to {}", records.len(), path.display());
    Ok(())
}

pub fn write_samples_geojson(path: &Path, records: &[SampleRecord], crs: Crs) -> Result<()> {
    let features: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [r.x, r.y] },
                "properties": {
                    "type": r.provenance.tag(),
                    "multi_clas": r.label,
                    "id": r.reference_id,
                },
            })
        })
        .collect();
    let collection = json!({
        "type": "FeatureCollection",
        "crs": {
            "type": "name",
            "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", crs.epsg()) },
        },
        "features": features,
    });

    let file = File::create(path).map_err(|e| SamplerError::io(path, e))?;
    serde_json::to_writer_pretty(file, &collection)?;
    info!("Wrote {} samples to {}", records.len(), path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Series export
// ---------------------------------------------------------------------------

/// One row per accepted sample: a `band_<b>` list column per band holding the
/// aligned values in date order, then `id`, `label`, `type`, `x` and `y`.
pub fn write_series_parquet(path: &Path, samples: &[AcceptedSample]) -> Result<()> {
    let bands = samples
        .iter()
        .filter_map(|s| s.series.first())
        .map(Vec::len)
        .max()
        .unwrap_or(0);

    let item = Arc::new(Field::new("item", DataType::Float64, true));
    let mut fields = Vec::with_capacity(bands + 5);
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(bands + 5);

    for band in 0..bands {
        let mut builder = ListBuilder::new(Float64Builder::new());
        for sample in samples {
            let values = builder.values();
            for step in &sample.series {
                values.append_option(step.get(band).copied());
            }
            builder.append(true);
        }
        fields.push(Field::new(
            format!("band_{band}"),
            DataType::List(item.clone()),
            false,
        ));
        columns.push(Arc::new(builder.finish()));
    }

    fields.push(Field::new("id", DataType::Int64, false));
    columns.push(Arc::new(Int64Array::from_iter_values(
        samples.iter().map(|s| s.record.reference_id),
    )));
    fields.push(Field::new("label", DataType::Int64, false));
    columns.push(Arc::new(Int64Array::from_iter_values(
        samples.iter().map(|s| s.record.label),
    )));
    fields.push(Field::new("type", DataType::Utf8, false));
    columns.push(Arc::new(StringArray::from_iter_values(
        samples.iter().map(|s| s.record.provenance.tag()),
    )));
    fields.push(Field::new("x", DataType::Float64, false));
    columns.push(Arc::new(Float64Array::from_iter_values(
        samples.iter().map(|s| s.record.x),
    )));
    fields.push(Field::new("y", DataType::Float64, false));
    columns.push(Arc::new(Float64Array::from_iter_values(
        samples.iter().map(|s| s.record.y),
    )));

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let file = File::create(path).map_err(|e| SamplerError::io(path, e))?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;

    info!(
        "Wrote {} sample series ({} bands) to {}",
        samples.len(),
        bands,
        path.display()
    );
    Ok(())
}
