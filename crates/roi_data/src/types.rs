//! Core types and errors for roi_data.

use std::path::PathBuf;

use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("annotation {annotation} refers to unknown {what} {id}")]
    UnknownReference {
        annotation: u64,
        what: &'static str,
        id: u64,
    },
    #[error("imdb `{0}` has no usable entries")]
    Empty(String),
}

/// One training image with its 0-based inclusive ground-truth boxes.
#[derive(Debug, Clone, PartialEq)]
pub struct RoidbEntry {
    pub image: PathBuf,
    pub width: u32,
    pub height: u32,
    /// `[x1, y1, x2, y2]` in original pixel coordinates.
    pub boxes: Vec<[f32; 4]>,
    /// Class index per box; 0 is background and never appears here.
    pub gt_classes: Vec<usize>,
    pub is_hard: Vec<bool>,
    pub dontcare: Vec<[f32; 4]>,
    pub flipped: bool,
}

impl RoidbEntry {
    /// Mirror boxes and don't-care regions around the vertical axis.
    pub fn flipped(&self) -> Self {
        let w = self.width as f32;
        let mirror = |b: &[f32; 4]| [w - b[2] - 1.0, b[1], w - b[0] - 1.0, b[3]];
        Self {
            boxes: self.boxes.iter().map(mirror).collect(),
            dontcare: self.dontcare.iter().map(mirror).collect(),
            flipped: !self.flipped,
            ..self.clone()
        }
    }
}

/// One data-layer batch.
#[derive(Debug, Clone)]
pub struct Blobs {
    /// Mean-subtracted pixels, CHW for a single image (`[1, 3, height, width]`).
    pub data: Vec<f32>,
    pub height: usize,
    pub width: usize,
    /// `[height, width, scale]` of the rescaled image.
    pub im_info: [f32; 3],
    /// Scaled `[x1, y1, x2, y2, class]`.
    pub gt_boxes: Vec<[f32; 5]>,
    pub gt_ishard: Vec<bool>,
    pub dontcare_areas: Vec<[f32; 4]>,
    pub im_name: String,
}

impl Blobs {
    pub fn shape(&self) -> [usize; 4] {
        [1, 3, self.height, self.width]
    }

    /// Largest ground-truth coordinate; 0 when there are no boxes.
    pub fn max_gt_coordinate(&self) -> f32 {
        self.gt_boxes
            .iter()
            .flat_map(|b| b[..4].iter().copied())
            .fold(0.0, f32::max)
    }
}
