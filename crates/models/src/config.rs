//! Detector hyper-parameters. Field names deserialize from the `TRAIN:` section keys.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RpnConfig {
    /// Anchors sampled per image for the RPN losses.
    #[serde(rename = "RPN_BATCHSIZE")]
    pub batch_size: usize,
    #[serde(rename = "RPN_FG_FRACTION")]
    pub fg_fraction: f32,
    #[serde(rename = "RPN_POSITIVE_OVERLAP")]
    pub positive_overlap: f32,
    #[serde(rename = "RPN_NEGATIVE_OVERLAP")]
    pub negative_overlap: f32,
    /// Let a low-overlap background label override a best-match foreground.
    #[serde(rename = "RPN_CLOBBER_POSITIVES")]
    pub clobber_positives: bool,
    #[serde(rename = "RPN_PRE_NMS_TOP_N")]
    pub pre_nms_top_n: usize,
    #[serde(rename = "RPN_POST_NMS_TOP_N")]
    pub post_nms_top_n: usize,
    #[serde(rename = "RPN_NMS_THRESH")]
    pub nms_thresh: f32,
    /// Minimum proposal side in original-image pixels.
    #[serde(rename = "RPN_MIN_SIZE")]
    pub min_size: f32,
    /// Anchors covered by don't-care regions beyond this fraction are ignored.
    #[serde(rename = "DONTCARE_AREA_INTERSECTION_HI")]
    pub dontcare_intersection_hi: f32,
}

impl Default for RpnConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            fg_fraction: 0.5,
            positive_overlap: 0.7,
            negative_overlap: 0.3,
            clobber_positives: false,
            pre_nms_top_n: 12000,
            post_nms_top_n: 2000,
            nms_thresh: 0.7,
            min_size: 16.0,
            dontcare_intersection_hi: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RoiConfig {
    /// RoIs sampled per image for the classification head.
    pub batch_size: usize,
    pub fg_fraction: f32,
    pub fg_thresh: f32,
    pub bg_thresh_hi: f32,
    pub bg_thresh_lo: f32,
    pub bbox_normalize_means: [f32; 4],
    pub bbox_normalize_stds: [f32; 4],
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            fg_fraction: 0.25,
            fg_thresh: 0.5,
            bg_thresh_hi: 0.5,
            bg_thresh_lo: 0.0,
            bbox_normalize_means: [0.0; 4],
            bbox_normalize_stds: [0.1, 0.1, 0.2, 0.2],
        }
    }
}

/// Layer widths and head settings for [`crate::FasterRcnn`].
#[derive(Debug, Clone, PartialEq)]
pub struct FasterRcnnConfig {
    /// Including background.
    pub num_classes: usize,
    /// Output channels of the five VGG16 blocks.
    pub block_widths: [usize; 5],
    pub rpn_channels: usize,
    pub fc_dim: usize,
    pub pool_size: usize,
    pub dropout: f64,
    pub init_std: f64,
    pub rpn: RpnConfig,
    pub roi: RoiConfig,
}

impl FasterRcnnConfig {
    pub fn vgg16(num_classes: usize) -> Self {
        Self {
            num_classes,
            block_widths: [64, 128, 256, 512, 512],
            rpn_channels: 512,
            fc_dim: 4096,
            pool_size: 7,
            dropout: 0.5,
            init_std: 0.01,
            rpn: RpnConfig::default(),
            roi: RoiConfig::default(),
        }
    }

    pub fn with_heads(mut self, rpn: RpnConfig, roi: RoiConfig) -> Self {
        self.rpn = rpn;
        self.roi = roi;
        self
    }
}
