//! Segmentation collaborator: proposes candidate masks around a seed pixel.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use image::{GrayImage, RgbImage};
use log::{debug, warn};

use crate::error::{Result, SamplerError};
use crate::patch::PatchPoint;

/// A boolean patch-shaped mask with the model's confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentMask {
    width: u32,
    height: u32,
    mask: Vec<bool>,
    score: f32,
}

impl SegmentMask {
    /// `mask` is row-major, `width * height` long.
    pub fn new(width: u32, height: u32, mask: Vec<bool>, score: f32) -> Result<Self> {
        if mask.len() != width as usize * height as usize {
            return Err(SamplerError::Segmentation(format!(
                "mask has {} values for a {height}x{width} patch",
                mask.len()
            )));
        }
        Ok(SegmentMask {
            width,
            height,
            mask,
            score,
        })
    }

    /// Non-zero pixels are selected.
    pub fn from_luma(image: &GrayImage, score: f32) -> Self {
        SegmentMask {
            width: image.width(),
            height: image.height(),
            mask: image.pixels().map(|p| p.0[0] > 0).collect(),
            score,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Selected pixels in row-major order.
    pub fn points(&self) -> impl Iterator<Item = PatchPoint> + '_ {
        let width = self.width.max(1) as usize;
        self.mask
            .iter()
            .enumerate()
            .filter(|(_, m)| **m)
            .map(move |(i, _)| PatchPoint {
                row: (i / width) as u32,
                col: (i % width) as u32,
            })
    }
}

/// Blocking segmentation call. Failures are reported, never retried.
///
/// Masks come back in the model's confidence order; only the first one feeds
/// the sample candidates.
pub trait Segmenter {
    fn segment(&self, patch: &RgbImage, seed: PatchPoint, label: i64) -> Result<Vec<SegmentMask>>;
}

// ---------------------------------------------------------------------------
// External command
// ---------------------------------------------------------------------------

/// Runs an external segmentation program once per patch.
///
/// The program is called as `<argv...> <patch.png> <row> <col> <label> <out_dir>`
/// and must leave `scores.json` (an array of numbers) and one
/// `mask_<k>.png` per score in `out_dir`.
#[derive(Debug, Clone)]
pub struct CommandSegmenter {
    argv: Vec<String>,
    scratch: PathBuf,
}

impl CommandSegmenter {
    pub fn new(argv: Vec<String>, scratch: impl Into<PathBuf>) -> Result<Self> {
        if argv.is_empty() {
            return Err(SamplerError::Segmentation(
                "segmentation command is empty".to_string(),
            ));
        }
        Ok(CommandSegmenter {
            argv,
            scratch: scratch.into(),
        })
    }

    fn prepare(&self) -> Result<(PathBuf, PathBuf)> {
        let out_dir = self.scratch.join("masks");
        if out_dir.exists() {
            fs::remove_dir_all(&out_dir).map_err(|e| SamplerError::io(&out_dir, e))?;
        }
        fs::create_dir_all(&out_dir).map_err(|e| SamplerError::io(&out_dir, e))?;
        Ok((self.scratch.join("patch.png"), out_dir))
    }

    fn read_masks(out_dir: &Path) -> Result<Vec<SegmentMask>> {
        let scores_path = out_dir.join("scores.json");
        let text = fs::read_to_string(&scores_path).map_err(|e| SamplerError::io(&scores_path, e))?;
        let scores: Vec<f32> = serde_json::from_str(&text)?;

        scores
            .into_iter()
            .enumerate()
            .map(|(k, score)| {
                let path = out_dir.join(format!("mask_{k}.png"));
                let image = image::open(&path)?.to_luma8();
                Ok(SegmentMask::from_luma(&image, score))
            })
            .collect()
    }
}

impl Segmenter for CommandSegmenter {
    fn segment(&self, patch: &RgbImage, seed: PatchPoint, label: i64) -> Result<Vec<SegmentMask>> {
        let (patch_path, out_dir) = self.prepare()?;
        patch.save(&patch_path)?;

        debug!("Running {} on {}", self.argv[0], patch_path.display());
        let output = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .arg(&patch_path)
            .arg(seed.row.to_string())
            .arg(seed.col.to_string())
            .arg(label.to_string())
            .arg(&out_dir)
            .output()
            .map_err(|e| SamplerError::Segmentation(format!("cannot run {}: {e}", self.argv[0])))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("{} failed: {}", self.argv[0], stderr.trim());
            return Err(SamplerError::Segmentation(format!(
                "{} exited with {}",
                self.argv[0], output.status
            )));
        }

        let masks = Self::read_masks(&out_dir)?;
        for mask in &masks {
            if (mask.width(), mask.height()) != patch.dimensions() {
                return Err(SamplerError::Segmentation(format!(
                    "mask is {}x{}, patch is {}x{}",
                    mask.height(),
                    mask.width(),
                    patch.height(),
                    patch.width()
                )));
            }
        }
        Ok(masks)
    }
}
