//! Box geometry on inclusive pixel coordinates (`width = x2 - x1 + 1`).

pub type BBox = [f32; 4];

pub fn width(b: &BBox) -> f32 {
    b[2] - b[0] + 1.0
}

pub fn height(b: &BBox) -> f32 {
    b[3] - b[1] + 1.0
}

pub fn area(b: &BBox) -> f32 {
    width(b).max(0.0) * height(b).max(0.0)
}

pub fn intersection(a: &BBox, b: &BBox) -> f32 {
    let iw = a[2].min(b[2]) - a[0].max(b[0]) + 1.0;
    let ih = a[3].min(b[3]) - a[1].max(b[1]) + 1.0;
    if iw <= 0.0 || ih <= 0.0 {
        0.0
    } else {
        iw * ih
    }
}

pub fn iou(a: &BBox, b: &BBox) -> f32 {
    let inter = intersection(a, b);
    if inter == 0.0 {
        return 0.0;
    }
    let union = area(a) + area(b) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Row-major `boxes.len() x query.len()` IoU matrix.
pub fn overlaps(boxes: &[BBox], query: &[BBox]) -> Vec<f32> {
    let mut out = Vec::with_capacity(boxes.len() * query.len());
    for b in boxes {
        for q in query {
            out.push(iou(b, q));
        }
    }
    out
}

/// Regression deltas `(dx, dy, dw, dh)` taking `from` onto `to`.
pub fn bbox_transform(from: &BBox, to: &BBox) -> [f32; 4] {
    let (fw, fh) = (width(from), height(from));
    let (fx, fy) = (from[0] + 0.5 * fw, from[1] + 0.5 * fh);
    let (tw, th) = (width(to), height(to));
    let (tx, ty) = (to[0] + 0.5 * tw, to[1] + 0.5 * th);
    [
        (tx - fx) / fw,
        (ty - fy) / fh,
        (tw / fw).ln(),
        (th / fh).ln(),
    ]
}

/// Apply regression deltas to a box.
pub fn bbox_transform_inv(from: &BBox, deltas: &[f32; 4]) -> BBox {
    let (w, h) = (width(from), height(from));
    let (cx, cy) = (from[0] + 0.5 * w, from[1] + 0.5 * h);
    let pcx = deltas[0] * w + cx;
    let pcy = deltas[1] * h + cy;
    let pw = deltas[2].exp() * w;
    let ph = deltas[3].exp() * h;
    [
        pcx - 0.5 * pw,
        pcy - 0.5 * ph,
        pcx + 0.5 * pw,
        pcy + 0.5 * ph,
    ]
}

/// Clamp a box into an image of `height x width` pixels.
pub fn clip(b: &BBox, height: f32, width: f32) -> BBox {
    let max_x = (width - 1.0).max(0.0);
    let max_y = (height - 1.0).max(0.0);
    [
        b[0].clamp(0.0, max_x),
        b[1].clamp(0.0, max_y),
        b[2].clamp(0.0, max_x),
        b[3].clamp(0.0, max_y),
    ]
}

/// Greedy non-maximum suppression. Returns indices into `boxes`, highest score first.
pub fn nms(boxes: &[BBox], scores: &[f32], thresh: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len().min(scores.len())).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    let mut keep: Vec<usize> = Vec::new();
    for idx in order {
        if keep.iter().all(|&k| iou(&boxes[k], &boxes[idx]) <= thresh) {
            keep.push(idx);
        }
    }
    keep
}
