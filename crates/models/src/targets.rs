//! Training-time target assignment for both heads and the proposal layer between them.
//!
//! Everything here runs on host vectors; only the resulting indices and
//! targets go back to the device.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::boxes::{self, BBox};
use crate::config::{RoiConfig, RpnConfig};

/// Ground-truth rows are `[x1, y1, x2, y2, class]`.
pub type GtBox = [f32; 5];

fn gt_bbox(g: &GtBox) -> BBox {
    [g[0], g[1], g[2], g[3]]
}

/// Split ground truth into boxes that take part in matching and hard boxes that only suppress.
fn split_hard(gt: &[GtBox], is_hard: &[bool]) -> (Vec<GtBox>, Vec<BBox>) {
    let mut easy = Vec::new();
    let mut hard = Vec::new();
    for (i, g) in gt.iter().enumerate() {
        if is_hard.get(i).copied().unwrap_or(false) {
            hard.push(gt_bbox(g));
        } else {
            easy.push(*g);
        }
    }
    (easy, hard)
}

/// Per-row best overlap and its column index.
fn max_overlaps(rows: &[BBox], cols: &[BBox]) -> (Vec<f32>, Vec<usize>) {
    let mut max = vec![0.0f32; rows.len()];
    let mut arg = vec![0usize; rows.len()];
    for (r, row) in rows.iter().enumerate() {
        for (c, col) in cols.iter().enumerate() {
            let o = boxes::iou(row, col);
            if o > max[r] {
                max[r] = o;
                arg[r] = c;
            }
        }
    }
    (max, arg)
}

/// Keep at most `keep` of `inds`, chosen at random; the rest are returned.
fn subsample<R: Rng + ?Sized>(mut inds: Vec<usize>, keep: usize, rng: &mut R) -> (Vec<usize>, Vec<usize>) {
    if inds.len() <= keep {
        return (inds, Vec::new());
    }
    inds.shuffle(rng);
    let dropped = inds.split_off(keep);
    (inds, dropped)
}

/// RPN labels per anchor: `1` foreground, `0` background, `-1` ignored.
#[derive(Debug, Clone)]
pub struct AnchorTargets {
    pub labels: Vec<i8>,
    /// Regression targets; meaningful only where the label is 1.
    pub deltas: Vec<[f32; 4]>,
}

impl AnchorTargets {
    pub fn sampled(&self) -> Vec<usize> {
        (0..self.labels.len()).filter(|&i| self.labels[i] >= 0).collect()
    }

    pub fn foreground(&self) -> Vec<usize> {
        (0..self.labels.len()).filter(|&i| self.labels[i] == 1).collect()
    }
}

/// Label anchors against ground truth and sample a fixed-size minibatch.
///
/// Anchors that cross the image border are ignored. Background anchors that
/// overlap a hard box by at least the negative threshold, and anchors mostly
/// covered by don't-care regions, are ignored as well.
pub fn anchor_targets<R: Rng + ?Sized>(
    anchors: &[BBox],
    gt: &[GtBox],
    is_hard: &[bool],
    dontcare: &[BBox],
    im_info: [f32; 3],
    cfg: &RpnConfig,
    rng: &mut R,
) -> AnchorTargets {
    let [im_h, im_w, _] = im_info;
    let (easy, hard) = split_hard(gt, is_hard);
    let easy_boxes: Vec<BBox> = easy.iter().map(gt_bbox).collect();

    let inside: Vec<usize> = anchors
        .iter()
        .enumerate()
        .filter(|(_, a)| a[0] >= 0.0 && a[1] >= 0.0 && a[2] < im_w && a[3] < im_h)
        .map(|(i, _)| i)
        .collect();
    let inside_boxes: Vec<BBox> = inside.iter().map(|&i| anchors[i]).collect();
    let (max, arg) = max_overlaps(&inside_boxes, &easy_boxes);

    let mut labels = vec![-1i8; anchors.len()];
    if !cfg.clobber_positives {
        for (k, &i) in inside.iter().enumerate() {
            if max[k] < cfg.negative_overlap {
                labels[i] = 0;
            }
        }
    }
    // Every ground-truth box gets its best anchors, even below the positive threshold.
    for g in &easy_boxes {
        let ious: Vec<f32> = inside_boxes.iter().map(|a| boxes::iou(a, g)).collect();
        let best = ious.iter().copied().fold(0.0f32, f32::max);
        if best <= 0.0 {
            continue;
        }
        for (k, &o) in ious.iter().enumerate() {
            if o == best {
                labels[inside[k]] = 1;
            }
        }
    }
    for (k, &i) in inside.iter().enumerate() {
        if max[k] >= cfg.positive_overlap {
            labels[i] = 1;
        }
    }
    if cfg.clobber_positives {
        for (k, &i) in inside.iter().enumerate() {
            if max[k] < cfg.negative_overlap {
                labels[i] = 0;
            }
        }
    }

    for (k, &i) in inside.iter().enumerate() {
        if labels[i] != 0 {
            continue;
        }
        let near_hard = hard
            .iter()
            .any(|h| boxes::iou(&inside_boxes[k], h) >= cfg.negative_overlap);
        let covered: f32 = dontcare
            .iter()
            .map(|d| boxes::intersection(&inside_boxes[k], d) / boxes::area(&inside_boxes[k]).max(1.0))
            .sum();
        if near_hard || covered > cfg.dontcare_intersection_hi {
            labels[i] = -1;
        }
    }

    let num_fg = (cfg.fg_fraction * cfg.batch_size as f32) as usize;
    let fg: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == 1).collect();
    let (fg, dropped) = subsample(fg, num_fg, rng);
    for i in dropped {
        labels[i] = -1;
    }
    let num_bg = cfg.batch_size.saturating_sub(fg.len());
    let bg: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == 0).collect();
    let (_, dropped) = subsample(bg, num_bg, rng);
    for i in dropped {
        labels[i] = -1;
    }

    let mut deltas = vec![[0.0f32; 4]; anchors.len()];
    for (k, &i) in inside.iter().enumerate() {
        if labels[i] == 1 {
            deltas[i] = boxes::bbox_transform(&inside_boxes[k], &easy_boxes[arg[k]]);
        }
    }

    AnchorTargets { labels, deltas }
}

/// Decode RPN outputs into scored proposals: clip, drop small boxes, keep the
/// top-N by score and suppress overlaps.
pub fn proposals(
    anchors: &[BBox],
    fg_scores: &[f32],
    deltas: &[[f32; 4]],
    im_info: [f32; 3],
    cfg: &RpnConfig,
) -> Vec<(BBox, f32)> {
    let [im_h, im_w, scale] = im_info;
    let min_size = cfg.min_size * scale;
    let mut scored: Vec<(BBox, f32)> = anchors
        .iter()
        .zip(deltas.iter())
        .zip(fg_scores.iter())
        .map(|((a, d), &s)| (boxes::clip(&boxes::bbox_transform_inv(a, d), im_h, im_w), s))
        .filter(|(b, _)| boxes::width(b) >= min_size && boxes::height(b) >= min_size)
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(cfg.pre_nms_top_n);

    let (bxs, scores): (Vec<BBox>, Vec<f32>) = scored.iter().copied().unzip();
    let mut keep = boxes::nms(&bxs, &scores, cfg.nms_thresh);
    keep.truncate(cfg.post_nms_top_n);
    keep.into_iter().map(|i| scored[i]).collect()
}

/// Sampled RoIs with class labels and class-specific regression targets.
#[derive(Debug, Clone, Default)]
pub struct RoiTargets {
    pub rois: Vec<BBox>,
    pub labels: Vec<usize>,
    /// Row-major `rois.len() x 4 * num_classes`.
    pub targets: Vec<f32>,
    pub weights: Vec<f32>,
    pub num_fg: usize,
}

/// Sample foreground and background RoIs from proposals plus ground truth.
pub fn proposal_targets<R: Rng + ?Sized>(
    proposals: &[BBox],
    gt: &[GtBox],
    is_hard: &[bool],
    num_classes: usize,
    cfg: &RoiConfig,
    rng: &mut R,
) -> RoiTargets {
    let (easy, _) = split_hard(gt, is_hard);
    let easy_boxes: Vec<BBox> = easy.iter().map(gt_bbox).collect();
    let mut all_rois: Vec<BBox> = proposals.to_vec();
    all_rois.extend(easy_boxes.iter().copied());

    let (max, arg) = max_overlaps(&all_rois, &easy_boxes);
    let fg: Vec<usize> = (0..all_rois.len()).filter(|&i| max[i] >= cfg.fg_thresh).collect();
    let bg: Vec<usize> = (0..all_rois.len())
        .filter(|&i| max[i] < cfg.bg_thresh_hi && max[i] >= cfg.bg_thresh_lo)
        .collect();

    let fg_per_image = (cfg.fg_fraction * cfg.batch_size as f32).round() as usize;
    let (fg, _) = subsample(fg, fg_per_image, rng);
    let (bg, _) = subsample(bg, cfg.batch_size.saturating_sub(fg.len()), rng);

    let width = 4 * num_classes;
    let mut out = RoiTargets {
        num_fg: fg.len(),
        ..RoiTargets::default()
    };
    for (k, &i) in fg.iter().chain(bg.iter()).enumerate() {
        let roi = all_rois[i];
        let is_fg = k < fg.len();
        let label = if is_fg { easy[arg[i]][4] as usize } else { 0 };
        out.rois.push(roi);
        out.labels.push(label);
        let mut t = vec![0.0f32; width];
        let mut w = vec![0.0f32; width];
        if is_fg && label < num_classes {
            let d = boxes::bbox_transform(&roi, &easy_boxes[arg[i]]);
            for c in 0..4 {
                t[label * 4 + c] =
                    (d[c] - cfg.bbox_normalize_means[c]) / cfg.bbox_normalize_stds[c];
                w[label * 4 + c] = 1.0;
            }
        }
        out.targets.extend(t);
        out.weights.extend(w);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn subsample_keeps_requested_count() {
        let mut rng = StdRng::seed_from_u64(3);
        let (kept, dropped) = subsample((0..10).collect(), 4, &mut rng);
        assert_eq!(kept.len(), 4);
        assert_eq!(dropped.len(), 6);
        let (kept, dropped) = subsample(vec![1, 2], 4, &mut rng);
        assert_eq!(kept, vec![1, 2]);
        assert!(dropped.is_empty());
    }
}
