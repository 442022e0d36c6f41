//! Shuffled single-image minibatches for detector training.

use image::imageops::{self, FilterType};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::debug;

use crate::types::{Blobs, DatasetError, DatasetResult, RoidbEntry};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DataLayerConfig {
    /// Candidate target lengths for the shorter image side; one is drawn per batch.
    pub scales: Vec<u32>,
    /// Cap on the longer side after scaling.
    pub max_size: u32,
    /// Per-channel RGB means subtracted from raw 0..255 pixels.
    pub pixel_means: [f32; 3],
    pub use_flipped: bool,
}

impl Default for DataLayerConfig {
    fn default() -> Self {
        Self {
            scales: vec![600],
            max_size: 1000,
            pixel_means: [122.7717, 115.9465, 102.9801],
            use_flipped: true,
        }
    }
}

/// Cursor over a shuffled roidb. Each call to [`RoiDataLayer::forward`]
/// consumes one entry; the order is reshuffled once every entry has been seen.
pub struct RoiDataLayer {
    roidb: Vec<RoidbEntry>,
    num_classes: usize,
    perm: Vec<usize>,
    cursor: usize,
    epoch: usize,
    rng: StdRng,
    cfg: DataLayerConfig,
}

impl RoiDataLayer {
    pub fn new(
        roidb: Vec<RoidbEntry>,
        num_classes: usize,
        cfg: DataLayerConfig,
        seed: u64,
    ) -> DatasetResult<Self> {
        if roidb.is_empty() {
            return Err(DatasetError::Empty("roidb".to_string()));
        }
        if cfg.scales.is_empty() {
            return Err(DatasetError::Empty("SCALES".to_string()));
        }
        let mut layer = Self {
            perm: (0..roidb.len()).collect(),
            roidb,
            num_classes,
            cursor: 0,
            epoch: 0,
            rng: StdRng::seed_from_u64(seed),
            cfg,
        };
        layer.shuffle();
        Ok(layer)
    }

    pub fn len(&self) -> usize {
        self.roidb.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roidb.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Completed passes over the roidb.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    fn shuffle(&mut self) {
        self.perm.shuffle(&mut self.rng);
        self.cursor = 0;
    }

    fn next_index(&mut self) -> usize {
        if self.cursor >= self.perm.len() {
            self.epoch += 1;
            self.shuffle();
        }
        let idx = self.perm[self.cursor];
        self.cursor += 1;
        idx
    }

    /// Load, rescale and package the next image.
    pub fn forward(&mut self) -> DatasetResult<Blobs> {
        let idx = self.next_index();
        let target = self.cfg.scales[self.rng.random_range(0..self.cfg.scales.len())];
        let entry = &self.roidb[idx];
        let img = image::open(&entry.image)
            .map_err(|source| DatasetError::Image {
                path: entry.image.clone(),
                source,
            })?
            .to_rgb8();
        let img = if entry.flipped {
            imageops::flip_horizontal(&img)
        } else {
            img
        };
        debug!(image = %entry.image.display(), flipped = entry.flipped, "loaded roidb entry");
        Ok(build_blobs(entry, &img, target, &self.cfg))
    }
}

/// Scale that brings the shorter side to `target` without the longer side exceeding `max_size`.
pub fn image_scale(width: u32, height: u32, target: u32, max_size: u32) -> f32 {
    let short = width.min(height).max(1) as f32;
    let long = width.max(height).max(1) as f32;
    let mut scale = target as f32 / short;
    if (scale * long).round() > max_size as f32 {
        scale = max_size as f32 / long;
    }
    scale
}

fn build_blobs(entry: &RoidbEntry, img: &RgbImage, target: u32, cfg: &DataLayerConfig) -> Blobs {
    let (w, h) = img.dimensions();
    let scale = image_scale(w, h, target, cfg.max_size);
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);
    let resized = imageops::resize(img, new_w, new_h, FilterType::Triangle);

    let plane = (new_w * new_h) as usize;
    let mut data = vec![0.0f32; plane * 3];
    for (x, y, px) in resized.enumerate_pixels() {
        let offset = (y * new_w + x) as usize;
        for c in 0..3 {
            data[c * plane + offset] = px[c] as f32 - cfg.pixel_means[c];
        }
    }

    let scale_box = |b: &[f32; 4]| [b[0] * scale, b[1] * scale, b[2] * scale, b[3] * scale];
    let gt_boxes = entry
        .boxes
        .iter()
        .zip(entry.gt_classes.iter())
        .map(|(b, cls)| {
            let [x1, y1, x2, y2] = scale_box(b);
            [x1, y1, x2, y2, *cls as f32]
        })
        .collect();

    Blobs {
        data,
        height: new_h as usize,
        width: new_w as usize,
        im_info: [new_h as f32, new_w as f32, scale],
        gt_boxes,
        gt_ishard: entry.is_hard.clone(),
        dontcare_areas: entry.dontcare.iter().map(scale_box).collect(),
        im_name: entry
            .image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorter_side_reaches_target_unless_capped() {
        assert!((image_scale(600, 400, 600, 1000) - 1.5).abs() < 1e-6);
        // 1.5 would make the long side 1200, so the cap gives 1000 / 800.
        assert!((image_scale(800, 400, 600, 1000) - 1.25).abs() < 1e-6);
        // 600 / 200 = 3 would make the long side 3000 > 1000.
        assert!((image_scale(1000, 200, 600, 1000) - 1.0).abs() < 1e-6);
    }
}
