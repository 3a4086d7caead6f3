use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::align::Interpolation;
use crate::data::filter::{QualityCode, QualityFilter};
use crate::data::index::DerivedIndex;
use crate::error::{InputError, Result, SamplerError};
use crate::geo::Crs;
use crate::similarity::{Dtw, SimilarityFilter};

/// Settings of one sampling run. Every field has a default, so a config file
/// only needs the paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplerConfig {
    /// Directory holding the `YYYYMMDD*.tif` acquisitions.
    pub images_dir: PathBuf,
    /// Output directory for samples and diagnostics.
    pub save_dir: PathBuf,
    /// Reference points (`.csv` or `.geojson`).
    pub reference_points: PathBuf,
    /// CRS of reference points that do not declare one. `None` means the
    /// raster CRS.
    pub points_crs: Option<Crs>,
    /// Acquisition to segment on; picked automatically when unset.
    pub optimal_image: Option<PathBuf>,
    /// Bands rendered as the red, green and blue channels of the patch.
    pub rgb_bands: [usize; 3],
    pub patch_width: usize,
    pub patch_height: usize,
    pub similarity_threshold: f64,
    pub quality_band: usize,
    pub bad_quality_codes: BTreeSet<QualityCode>,
    pub zero_check_bands: Vec<usize>,
    /// Signal compared between candidates and the reference. Band positions
    /// count after the quality band is dropped.
    pub index: DerivedIndex,
    pub interpolation: Interpolation,
    /// External segmentation program and its leading arguments.
    pub segment_command: Vec<String>,
    pub write_diagnostics: bool,
    /// Sakoe-Chiba radius; unconstrained when unset.
    pub dtw_window: Option<usize>,
    /// Decoded acquisitions kept in memory; all of them when unset.
    pub cache_capacity: Option<usize>,
    /// File name of the collated samples inside `save_dir`.
    pub output_name: String,
    /// Also export the accepted samples' aligned series to this Parquet file.
    pub export_series: Option<PathBuf>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            images_dir: PathBuf::from("images"),
            save_dir: PathBuf::from("output"),
            reference_points: PathBuf::from("points.csv"),
            points_crs: None,
            optimal_image: None,
            rgb_bands: [0, 1, 2],
            patch_width: 100,
            patch_height: 100,
            similarity_threshold: 0.7,
            quality_band: 4,
            bad_quality_codes: QualityCode::contaminated(),
            zero_check_bands: vec![0, 1, 2, 3],
            index: DerivedIndex::default(),
            interpolation: Interpolation::Time,
            segment_command: Vec::new(),
            write_diagnostics: false,
            dtw_window: None,
            cache_capacity: None,
            output_name: "Generated_samples.csv".to_string(),
            export_series: None,
        }
    }
}

impl SamplerConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| SamplerError::io(path, e))?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(InputError::InvalidConfig(msg).into()) };

        if !(self.similarity_threshold > 0.0 && self.similarity_threshold < 1.0) {
            return Err(InputError::InvalidThreshold(self.similarity_threshold).into());
        }
        if self.patch_width == 0 || self.patch_height == 0 {
            return invalid(format!(
                "patch size must be positive, got {}x{}",
                self.patch_height, self.patch_width
            ));
        }
        if self.zero_check_bands.contains(&self.quality_band) {
            return invalid(format!(
                "quality band {} is also listed as a zero-check band",
                self.quality_band
            ));
        }
        let (a, b) = self.index.operands();
        if a == b {
            return invalid(format!("both index operands use band {a}"));
        }
        if self.output_name.trim().is_empty() {
            return invalid("output name is empty".to_string());
        }
        Ok(())
    }

    pub fn quality_filter(&self) -> QualityFilter {
        QualityFilter {
            quality_band: self.quality_band,
            bad_codes: self.bad_quality_codes.clone(),
            zero_check_bands: self.zero_check_bands.clone(),
        }
    }

    pub fn derived_index(&self) -> DerivedIndex {
        self.index
    }

    pub fn similarity_filter(&self) -> Result<SimilarityFilter> {
        let dtw = self.dtw_window.map_or_else(Dtw::new, Dtw::with_window);
        SimilarityFilter::new(self.similarity_threshold, dtw)
    }

    pub fn output_path(&self) -> PathBuf {
        self.save_dir.join(&self.output_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_sentinel_2_layout() {
        let config = SamplerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quality_filter(), QualityFilter::default());
        assert_eq!(config.derived_index(), DerivedIndex::default());
        assert_eq!(config.similarity_filter().unwrap().threshold(), 0.7);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{
                "images_dir": "/data/s2",
                "similarity_threshold": 0.8,
                "bad_quality_codes": [8, 9],
                "interpolation": "grid_index",
                "segment_command": ["python", "sam_cli.py"]
            }"#,
        )
        .unwrap();

        let config = SamplerConfig::from_json_file(&path).unwrap();
        assert_eq!(config.images_dir, PathBuf::from("/data/s2"));
        assert_eq!(config.similarity_threshold, 0.8);
        assert_eq!(
            config.bad_quality_codes,
            [QualityCode::CloudMediumProbability, QualityCode::CloudHighProbability]
                .into_iter()
                .collect::<BTreeSet<_>>()
        );
        assert_eq!(config.interpolation, Interpolation::GridIndex);
        assert_eq!(config.segment_command.len(), 2);
        assert_eq!(config.patch_width, 100);
        assert_eq!(config.derived_index(), DerivedIndex::Ndvi { red: 2, nir: 3 });
    }

    #[test]
    fn index_kind_and_bands_come_from_the_file() {
        let config: SamplerConfig = serde_json::from_str(
            r#"{"index": {"kind": "normalized_difference", "a": 1, "b": 3}}"#,
        )
        .unwrap();
        assert_eq!(
            config.derived_index(),
            DerivedIndex::NormalizedDifference { a: 1, b: 3 }
        );
        assert!(config.validate().is_ok());

        let same: SamplerConfig =
            serde_json::from_str(r#"{"index": {"kind": "ndvi", "red": 3, "nir": 3}}"#).unwrap();
        assert!(same.validate().is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        // Candidate record positions are fixed by the orchestrator, not configured.
        assert!(serde_json::from_str::<SamplerConfig>(r#"{"record_offset": 0}"#).is_err());
        assert!(serde_json::from_str::<SamplerConfig>(r#"{"similarity_treshold": 0.5}"#).is_err());
    }

    #[test]
    fn unknown_quality_code_is_rejected() {
        let err = serde_json::from_str::<SamplerConfig>(r#"{"bad_quality_codes": [7]}"#);
        assert!(err.is_err());
    }

    #[test]
    fn validation_catches_inconsistent_settings() {
        let mut config = SamplerConfig {
            similarity_threshold: 1.0,
            ..SamplerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SamplerError::Input(InputError::InvalidThreshold(_)))
        ));

        config.similarity_threshold = 0.7;
        config.zero_check_bands.push(4);
        assert!(config.validate().is_err());

        config.zero_check_bands.pop();
        config.patch_height = 0;
        assert!(config.validate().is_err());
    }
}
