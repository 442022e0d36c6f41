use crate::boxes::BBox;

pub const FEAT_STRIDE: usize = 16;
pub const ANCHOR_RATIOS: [f32; 3] = [0.5, 1.0, 2.0];
pub const ANCHOR_SCALES: [f32; 3] = [8.0, 16.0, 32.0];

pub fn num_anchors() -> usize {
    ANCHOR_RATIOS.len() * ANCHOR_SCALES.len()
}

fn mk_anchor(ws: f32, hs: f32, cx: f32, cy: f32) -> BBox {
    [
        cx - 0.5 * (ws - 1.0),
        cy - 0.5 * (hs - 1.0),
        cx + 0.5 * (ws - 1.0),
        cy + 0.5 * (hs - 1.0),
    ]
}

/// Reference anchors centred on the `[0, 0, base-1, base-1]` cell, ratio-major then scale.
pub fn base_anchors(base_size: usize, ratios: &[f32], scales: &[f32]) -> Vec<BBox> {
    let base = base_size as f32;
    let (cx, cy) = (0.5 * (base - 1.0), 0.5 * (base - 1.0));
    let size = base * base;
    let mut out = Vec::with_capacity(ratios.len() * scales.len());
    for &ratio in ratios {
        let ws = (size / ratio).sqrt().round();
        let hs = (ws * ratio).round();
        for &scale in scales {
            out.push(mk_anchor(ws * scale, hs * scale, cx, cy));
        }
    }
    out
}

/// Anchors for every feature-map cell, ordered `(y, x, anchor)`.
pub fn shifted_anchors(feat_h: usize, feat_w: usize, stride: usize, base: &[BBox]) -> Vec<BBox> {
    let mut out = Vec::with_capacity(feat_h * feat_w * base.len());
    for y in 0..feat_h {
        let sy = (y * stride) as f32;
        for x in 0..feat_w {
            let sx = (x * stride) as f32;
            for a in base {
                out.push([a[0] + sx, a[1] + sy, a[2] + sx, a[3] + sy]);
            }
        }
    }
    out
}

pub fn default_anchors(feat_h: usize, feat_w: usize) -> Vec<BBox> {
    let base = base_anchors(FEAT_STRIDE, &ANCHOR_RATIOS, &ANCHOR_SCALES);
    shifted_anchors(feat_h, feat_w, FEAT_STRIDE, &base)
}
