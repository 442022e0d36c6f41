//! COCO-layout annotation files.

use serde::{Deserialize, Serialize};

/// Category whose annotations mark regions to ignore rather than objects.
pub const DONTCARE: &str = "dontcare";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoFile {
    pub images: Vec<CocoImage>,
    #[serde(default)]
    pub annotations: Vec<CocoAnnotation>,
    pub categories: Vec<CocoCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoImage {
    pub id: u64,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoAnnotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    /// `[x, y, width, height]` in pixels.
    pub bbox: [f32; 4],
    #[serde(default)]
    pub iscrowd: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoCategory {
    pub id: u64,
    pub name: String,
}

/// Convert a COCO `[x, y, w, h]` box to inclusive `[x1, y1, x2, y2]` clipped to the image.
/// Degenerate boxes come back as `None`.
pub fn xywh_to_xyxy(bbox: [f32; 4], width: u32, height: u32) -> Option<[f32; 4]> {
    let [x, y, w, h] = bbox;
    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;
    let x1 = x.max(0.0);
    let y1 = y.max(0.0);
    let x2 = (x1 + (w - 1.0).max(0.0)).min(max_x);
    let y2 = (y1 + (h - 1.0).max(0.0)).min(max_y);
    if w <= 0.0 || h <= 0.0 || x2 < x1 || y2 < y1 {
        return None;
    }
    Some([x1, y1, x2, y2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_and_clips() {
        assert_eq!(xywh_to_xyxy([10.0, 20.0, 5.0, 4.0], 100, 100), Some([10.0, 20.0, 14.0, 23.0]));
        assert_eq!(xywh_to_xyxy([95.0, 0.0, 20.0, 4.0], 100, 100), Some([95.0, 0.0, 99.0, 3.0]));
        assert_eq!(xywh_to_xyxy([10.0, 10.0, 0.0, 4.0], 100, 100), None);
    }
}
