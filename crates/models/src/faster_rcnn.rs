//! Faster R-CNN on a VGG16 trunk.
//!
//! Shapes:
//! - Input image: `[1, 3, H, W]`, mean-subtracted.
//! - Trunk features: `[1, C, H/16, W/16]`.
//! - RPN rows: `[H/16 * W/16 * 9, 2]` scores and `[.., 4]` deltas, ordered `(y, x, anchor)`.
//! - RoI head: `[R, num_classes]` scores and `[R, 4 * num_classes]` deltas.

use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Initializer, Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::activation::{relu, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::module::adaptive_avg_pool2d;
use burn::tensor::{Int, Tensor, TensorData};
use rand::Rng;
use roi_data::Blobs;
use tracing::trace;

use crate::anchors::{self, FEAT_STRIDE};
use crate::boxes::BBox;
use crate::config::FasterRcnnConfig;
use crate::error::ModelError;
use crate::params::ParamSlot;
use crate::targets;

/// torchvision `features.N` index of each VGG16 convolution.
pub const VGG16_CONV_INDICES: [usize; 13] = [0, 2, 5, 7, 10, 12, 14, 17, 19, 21, 24, 26, 28];
const BLOCK_DEPTHS: [usize; 5] = [2, 2, 3, 3, 3];

const RPN_SIGMA: f32 = 3.0;
const RCNN_SIGMA: f32 = 1.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossBreakdown {
    pub rpn_cls: f32,
    pub rpn_box: f32,
    pub rcnn_cls: f32,
    pub rcnn_box: f32,
}

impl LossBreakdown {
    pub fn rpn(&self) -> f32 {
        self.rpn_cls + self.rpn_box
    }

    pub fn rcnn(&self) -> f32 {
        self.rcnn_cls + self.rcnn_box
    }

    pub fn total(&self) -> f32 {
        self.rpn() + self.rcnn()
    }
}

/// Classification hit counts over the sampled RoIs of one image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Foreground RoIs classified as their true class.
    pub tp: usize,
    /// Background RoIs classified as background.
    pub tn: usize,
    pub fg: usize,
    pub bg: usize,
}

#[derive(Debug)]
pub struct DetectionOutput<B: Backend> {
    /// Sum of the RPN and RoI-head losses; differentiable.
    pub loss: Tensor<B, 1>,
    pub losses: LossBreakdown,
    pub diagnostics: Diagnostics,
}

#[derive(Module, Debug)]
pub struct FasterRcnn<B: Backend> {
    features: Vec<Conv2d<B>>,
    pool: MaxPool2d,
    rpn_conv: Conv2d<B>,
    rpn_score: Conv2d<B>,
    rpn_bbox: Conv2d<B>,
    fc6: Linear<B>,
    fc7: Linear<B>,
    score_fc: Linear<B>,
    bbox_fc: Linear<B>,
    dropout: Dropout,
    pub config: Ignored<FasterRcnnConfig>,
}

/// Host copy of a tensor's values as `f32`.
pub fn tensor_values<B: Backend, const D: usize>(t: Tensor<B, D>) -> Result<Vec<f32>, ModelError> {
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| ModelError::TensorData(format!("{err:?}")))
}

/// The value of a one-element tensor.
pub fn scalar_value<B: Backend, const D: usize>(t: Tensor<B, D>) -> Result<f32, ModelError> {
    match tensor_values(t)?.as_slice() {
        [value] => Ok(*value),
        values => Err(ModelError::TensorData(format!(
            "expected a single value, found {}",
            values.len()
        ))),
    }
}

fn index_tensor<B: Backend>(inds: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let data: Vec<i64> = inds.iter().map(|&i| i as i64).collect();
    Tensor::from_data(TensorData::new(data, [inds.len()]), device)
}

/// `[1, C, H, W]` with `C = n * width` reshaped to `[H * W * n, width]`.
fn to_rows<B: Backend>(x: Tensor<B, 4>, width: usize) -> Tensor<B, 2> {
    let [_, c, h, w] = x.dims();
    x.swap_dims(1, 2).swap_dims(2, 3).reshape([h * w * c / width, width])
}

fn smooth_l1<B: Backend, const D: usize>(diff: Tensor<B, D>, sigma: f32) -> Tensor<B, D> {
    let s2 = sigma * sigma;
    let abs = diff.abs();
    let small = abs.clone().lower_elem(1.0 / s2);
    let quadratic = abs.clone().powf_scalar(2.0).mul_scalar(0.5 * s2);
    let linear = abs.sub_scalar(0.5 / s2);
    linear.mask_where(small, quadratic)
}

impl<B: Backend> FasterRcnn<B> {
    pub fn new(config: FasterRcnnConfig, device: &B::Device) -> Self {
        let init = Initializer::Normal {
            mean: 0.0,
            std: config.init_std,
        };
        let conv3 = |c_in: usize, c_out: usize| {
            Conv2dConfig::new([c_in, c_out], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .with_initializer(init.clone())
                .init(device)
        };
        let conv1 = |c_in: usize, c_out: usize| {
            Conv2dConfig::new([c_in, c_out], [1, 1])
                .with_padding(PaddingConfig2d::Valid)
                .with_initializer(init.clone())
                .init(device)
        };
        let linear = |d_in: usize, d_out: usize| {
            LinearConfig::new(d_in, d_out)
                .with_initializer(init.clone())
                .init(device)
        };

        let mut features = Vec::with_capacity(VGG16_CONV_INDICES.len());
        let mut c_in = 3;
        for (&depth, &width) in BLOCK_DEPTHS.iter().zip(config.block_widths.iter()) {
            for _ in 0..depth {
                features.push(conv3(c_in, width));
                c_in = width;
            }
        }

        let a = anchors::num_anchors();
        let pooled = c_in * config.pool_size * config.pool_size;
        Self {
            features,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            rpn_conv: conv3(c_in, config.rpn_channels),
            rpn_score: conv1(config.rpn_channels, a * 2),
            rpn_bbox: conv1(config.rpn_channels, a * 4),
            fc6: linear(pooled, config.fc_dim),
            fc7: linear(config.fc_dim, config.fc_dim),
            score_fc: linear(config.fc_dim, config.num_classes),
            bbox_fc: linear(config.fc_dim, config.num_classes * 4),
            dropout: DropoutConfig::new(config.dropout).init(),
            config: Ignored(config),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    /// VGG16 conv stack with the final pooling layer removed (stride 16).
    pub fn trunk(&self, image: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = image;
        let mut layer = 0;
        for (block, &depth) in BLOCK_DEPTHS.iter().enumerate() {
            for _ in 0..depth {
                x = relu(self.features[layer].forward(x));
                layer += 1;
            }
            if block + 1 < BLOCK_DEPTHS.len() {
                x = self.pool.forward(x);
            }
        }
        x
    }

    /// All parameters in registration order under torchvision-compatible names.
    pub fn params_mut(&mut self) -> Vec<(String, ParamSlot<'_, B>)> {
        fn conv<'a, B: Backend>(
            out: &mut Vec<(String, ParamSlot<'a, B>)>,
            prefix: &str,
            conv: &'a mut Conv2d<B>,
        ) {
            out.push((format!("{prefix}.weight"), ParamSlot::Conv(&mut conv.weight)));
            if let Some(bias) = conv.bias.as_mut() {
                out.push((format!("{prefix}.bias"), ParamSlot::Bias(bias)));
            }
        }
        fn linear<'a, B: Backend>(
            out: &mut Vec<(String, ParamSlot<'a, B>)>,
            prefix: &str,
            linear: &'a mut Linear<B>,
        ) {
            out.push((format!("{prefix}.weight"), ParamSlot::Linear(&mut linear.weight)));
            if let Some(bias) = linear.bias.as_mut() {
                out.push((format!("{prefix}.bias"), ParamSlot::Bias(bias)));
            }
        }

        let mut out = Vec::new();
        for (layer, idx) in self.features.iter_mut().zip(VGG16_CONV_INDICES) {
            conv(&mut out, &format!("features.{idx}"), layer);
        }
        conv(&mut out, "rpn.conv1", &mut self.rpn_conv);
        conv(&mut out, "rpn.score_conv", &mut self.rpn_score);
        conv(&mut out, "rpn.bbox_conv", &mut self.rpn_bbox);
        linear(&mut out, "classifier.0", &mut self.fc6);
        linear(&mut out, "classifier.3", &mut self.fc7);
        linear(&mut out, "score_fc", &mut self.score_fc);
        linear(&mut out, "bbox_fc", &mut self.bbox_fc);
        out
    }

    /// Parameter names with torch-layout shapes, in registration order.
    pub fn named_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let mut copy = self.clone();
        copy.params_mut()
            .into_iter()
            .map(|(name, slot)| {
                let shape = slot.torch_shape();
                (name, shape)
            })
            .collect()
    }

    /// Exclude the first `count` parameters from training. Returns their names.
    pub fn freeze_leading(&mut self, count: usize) -> Vec<String> {
        self.params_mut()
            .into_iter()
            .take(count)
            .map(|(name, mut slot)| {
                slot.freeze();
                name
            })
            .collect()
    }

    fn roi_pool(&self, features: Tensor<B, 4>, rois: &[BBox]) -> Tensor<B, 4> {
        let [_, channels, feat_h, feat_w] = features.dims();
        let scale = 1.0 / FEAT_STRIDE as f32;
        let size = self.config.pool_size;
        let cell = |v: f32, limit: usize| ((v * scale).round().max(0.0) as usize).min(limit - 1);
        let pooled = rois
            .iter()
            .map(|roi| {
                let x1 = cell(roi[0], feat_w);
                let y1 = cell(roi[1], feat_h);
                let x2 = cell(roi[2], feat_w).max(x1);
                let y2 = cell(roi[3], feat_h).max(y1);
                let region = features
                    .clone()
                    .slice([0..1, 0..channels, y1..y2 + 1, x1..x2 + 1]);
                adaptive_avg_pool2d(region, [size, size])
            })
            .collect();
        Tensor::cat(pooled, 0)
    }

    /// One training forward pass: both heads, their targets and all four losses.
    pub fn forward<R: Rng + ?Sized>(
        &self,
        blobs: &Blobs,
        rng: &mut R,
    ) -> Result<DetectionOutput<B>, ModelError> {
        let expected = 3 * blobs.height * blobs.width;
        if blobs.data.len() != expected {
            return Err(ModelError::InputShape {
                expected,
                actual: blobs.data.len(),
            });
        }
        if blobs.height < FEAT_STRIDE || blobs.width < FEAT_STRIDE {
            return Err(ModelError::ImageTooSmall {
                height: blobs.height,
                width: blobs.width,
            });
        }
        let cfg = &*self.config;
        let device = self.rpn_conv.weight.device();
        let cross_entropy = CrossEntropyLossConfig::new().init(&device);
        let zero = || Tensor::<B, 1>::zeros([1], &device);

        let image = Tensor::<B, 4>::from_data(
            TensorData::new(blobs.data.clone(), blobs.shape()),
            &device,
        );
        let features = self.trunk(image);
        let [_, _, feat_h, feat_w] = features.dims();

        let rpn = relu(self.rpn_conv.forward(features.clone()));
        let rpn_scores = to_rows(self.rpn_score.forward(rpn.clone()), 2);
        let rpn_deltas = to_rows(self.rpn_bbox.forward(rpn), 4);
        let all_anchors = anchors::default_anchors(feat_h, feat_w);

        let anchor_targets = targets::anchor_targets(
            &all_anchors,
            &blobs.gt_boxes,
            &blobs.gt_ishard,
            &blobs.dontcare_areas,
            blobs.im_info,
            &cfg.rpn,
            rng,
        );
        let sampled = anchor_targets.sampled();
        let rpn_cls = if sampled.is_empty() {
            zero()
        } else {
            let labels: Vec<i64> = sampled
                .iter()
                .map(|&i| anchor_targets.labels[i] as i64)
                .collect();
            let labels = Tensor::<B, 1, Int>::from_data(
                TensorData::new(labels, [sampled.len()]),
                &device,
            );
            let logits = rpn_scores
                .clone()
                .select(0, index_tensor::<B>(&sampled, &device));
            cross_entropy.forward(logits, labels)
        };
        let fg = anchor_targets.foreground();
        let rpn_box = if fg.is_empty() {
            zero()
        } else {
            let flat: Vec<f32> = fg
                .iter()
                .flat_map(|&i| anchor_targets.deltas[i])
                .collect();
            let target = Tensor::<B, 2>::from_data(TensorData::new(flat, [fg.len(), 4]), &device);
            let pred = rpn_deltas
                .clone()
                .select(0, index_tensor::<B>(&fg, &device));
            smooth_l1(pred - target, RPN_SIGMA)
                .sum()
                .div_scalar(fg.len() as f32 + 1e-4)
        };

        let fg_scores: Vec<f32> = tensor_values(softmax(rpn_scores.detach(), 1))?
            .chunks(2)
            .map(|c| c[1])
            .collect();
        let deltas: Vec<[f32; 4]> = tensor_values(rpn_deltas.detach())?
            .chunks(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();
        let proposals: Vec<BBox> =
            targets::proposals(&all_anchors, &fg_scores, &deltas, blobs.im_info, &cfg.rpn)
                .into_iter()
                .map(|(b, _)| b)
                .collect();
        let roi_targets = targets::proposal_targets(
            &proposals,
            &blobs.gt_boxes,
            &blobs.gt_ishard,
            cfg.num_classes,
            &cfg.roi,
            rng,
        );
        trace!(
            anchors = all_anchors.len(),
            proposals = proposals.len(),
            rois = roi_targets.rois.len(),
            "detector forward"
        );

        let mut diagnostics = Diagnostics::default();
        let (rcnn_cls, rcnn_box) = if roi_targets.rois.is_empty() {
            (zero(), zero())
        } else {
            let r = roi_targets.rois.len();
            let pooled = self.roi_pool(features, &roi_targets.rois);
            let [_, c, p, q] = pooled.dims();
            let x = pooled.reshape([r, c * p * q]);
            let x = self.dropout.forward(relu(self.fc6.forward(x)));
            let x = self.dropout.forward(relu(self.fc7.forward(x)));
            let cls_logits = self.score_fc.forward(x.clone());
            let bbox_pred = self.bbox_fc.forward(x);

            let width = 4 * cfg.num_classes;
            let labels: Vec<i64> = roi_targets.labels.iter().map(|&l| l as i64).collect();
            let labels = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [r]), &device);
            let targets = Tensor::<B, 2>::from_data(
                TensorData::new(roi_targets.targets.clone(), [r, width]),
                &device,
            );
            let weights = Tensor::<B, 2>::from_data(
                TensorData::new(roi_targets.weights.clone(), [r, width]),
                &device,
            );

            let scores = tensor_values(cls_logits.clone().detach())?;
            for (row, &label) in scores.chunks(cfg.num_classes).zip(&roi_targets.labels) {
                let predicted = row
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                if label > 0 {
                    diagnostics.fg += 1;
                    diagnostics.tp += usize::from(predicted == label);
                } else {
                    diagnostics.bg += 1;
                    diagnostics.tn += usize::from(predicted == 0);
                }
            }

            let cls = cross_entropy.forward(cls_logits, labels);
            let bbox = smooth_l1((bbox_pred - targets) * weights, RCNN_SIGMA)
                .sum()
                .div_scalar(roi_targets.num_fg as f32 + 1e-4);
            (cls, bbox)
        };

        let losses = LossBreakdown {
            rpn_cls: scalar_value(rpn_cls.clone())?,
            rpn_box: scalar_value(rpn_box.clone())?,
            rcnn_cls: scalar_value(rcnn_cls.clone())?,
            rcnn_box: scalar_value(rcnn_box.clone())?,
        };
        Ok(DetectionOutput {
            loss: rpn_cls + rpn_box + rcnn_cls + rcnn_box,
            losses,
            diagnostics,
        })
    }
}
