use std::path::Path;

use image::{ImageResult, Rgba, RgbaImage};

use crate::proposal::Proposal;

/// Proposals scoring below this are not drawn by default.
pub const DEFAULT_MIN_SCORE: f64 = 0.1;
const THICKNESS: u32 = 3;

/// Blue channel scaled by score.
pub fn proposal_color(score: f64) -> Rgba<u8> {
    let level = (255.0 * score.clamp(0.0, 1.0)) as u8;
    Rgba([0, 0, level, 255])
}

/// Clamp a proposal to pixel bounds; `None` when it is empty or inverted after clamping.
pub fn pixel_box(p: &Proposal, dims: (u32, u32)) -> Option<[u32; 4]> {
    let (w, h) = dims;
    if w == 0 || h == 0 {
        return None;
    }
    let clamp = |v: f64, max: u32| -> u32 { v.max(0.0).min((max - 1) as f64) as u32 };
    let (x0, y0, x1, y1) = (clamp(p.x1, w), clamp(p.y1, h), clamp(p.x2, w), clamp(p.y2, h));
    if x0 > x1 || y0 > y1 {
        return None;
    }
    Some([x0, y0, x1, y1])
}

/// Draw a rectangle border with given thickness.
pub fn draw_rect(img: &mut RgbaImage, bbox_px: [u32; 4], color: Rgba<u8>, thickness: u32) {
    let (w, h) = img.dimensions();
    let [x0, y0, x1, y1] = bbox_px;
    for t in 0..thickness {
        let xx0 = x0.saturating_add(t);
        let yy0 = y0.saturating_add(t);
        let xx1 = x1.saturating_sub(t);
        let yy1 = y1.saturating_sub(t);
        if xx0 >= w || yy0 >= h || xx1 >= w || yy1 >= h || xx0 > xx1 || yy0 > yy1 {
            continue;
        }
        for x in xx0..=xx1 {
            img.put_pixel(x, yy0, color);
            img.put_pixel(x, yy1, color);
        }
        for y in yy0..=yy1 {
            img.put_pixel(xx0, y, color);
            img.put_pixel(xx1, y, color);
        }
    }
}

/// Draw every proposal at or above `min_score`; returns how many were drawn.
pub fn draw_proposals(img: &mut RgbaImage, proposals: &[Proposal], min_score: f64) -> usize {
    let dims = img.dimensions();
    let mut drawn = 0;
    for p in proposals.iter().filter(|p| p.score >= min_score) {
        if let Some(bbox) = pixel_box(p, dims) {
            draw_rect(img, bbox, proposal_color(p.score), THICKNESS);
            drawn += 1;
        }
    }
    drawn
}

/// Load `image_path`, draw its proposals and save the result to `out_path`.
pub fn render_overlay(
    image_path: &Path,
    proposals: &[Proposal],
    min_score: f64,
    out_path: &Path,
) -> ImageResult<usize> {
    let mut img = image::open(image_path)?.to_rgba8();
    let drawn = draw_proposals(&mut img, proposals, min_score);
    img.save(out_path)?;
    Ok(drawn)
}
