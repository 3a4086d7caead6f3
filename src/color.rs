use std::collections::{BTreeMap, BTreeSet};

use image::{Rgb, RgbImage};
use palette::{Hsl, IntoColor, Srgb};

use crate::patch::PatchPoint;
use crate::segment::SegmentMask;

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Rgb<u8>> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.55);
            let rgb: Srgb = hsl.into_color();
            Rgb([
                (rgb.red * 255.0) as u8,
                (rgb.green * 255.0) as u8,
                (rgb.blue * 255.0) as u8,
            ])
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Color mapping: class label → Rgb
// ---------------------------------------------------------------------------

/// Maps the class labels of a run to distinct colours.
#[derive(Debug, Clone)]
pub struct LabelColors {
    mapping: BTreeMap<i64, Rgb<u8>>,
    default_color: Rgb<u8>,
}

impl LabelColors {
    pub fn new(labels: &BTreeSet<i64>) -> Self {
        let mapping = labels
            .iter()
            .copied()
            .zip(generate_palette(labels.len()))
            .collect();
        LabelColors {
            mapping,
            default_color: Rgb([128, 128, 128]),
        }
    }

    pub fn color_for(&self, label: i64) -> Rgb<u8> {
        self.mapping
            .get(&label)
            .copied()
            .unwrap_or(self.default_color)
    }
}

// ---------------------------------------------------------------------------
// Diagnostic drawing
// ---------------------------------------------------------------------------

/// Blend `color` over the selected mask pixels with opacity `alpha`.
pub fn overlay_mask(image: &RgbImage, mask: &SegmentMask, color: Rgb<u8>, alpha: f32) -> RgbImage {
    let alpha = alpha.clamp(0.0, 1.0);
    let mut out = image.clone();
    for point in mask.points() {
        if point.col >= out.width() || point.row >= out.height() {
            continue;
        }
        let px = out.get_pixel_mut(point.col, point.row);
        for (channel, &c) in px.0.iter_mut().zip(&color.0) {
            *channel = (f32::from(*channel) * (1.0 - alpha) + f32::from(c) * alpha).round() as u8;
        }
    }
    out
}

/// Draw a small cross centred on `seed`.
pub fn mark_seed(image: &mut RgbImage, seed: PatchPoint, color: Rgb<u8>) {
    const ARM: i64 = 2;
    let (w, h) = (i64::from(image.width()), i64::from(image.height()));
    let (row, col) = (i64::from(seed.row), i64::from(seed.col));
    for d in -ARM..=ARM {
        for (r, c) in [(row + d, col), (row, col + d)] {
            if (0..h).contains(&r) && (0..w).contains(&c) {
                image.put_pixel(c as u32, r as u32, color);
            }
        }
    }
}
