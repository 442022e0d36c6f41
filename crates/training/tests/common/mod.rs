#![allow(dead_code)]

use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use models::{FasterRcnnConfig, RoiConfig, RpnConfig};
use roi_data::Blobs;

pub type ADBackend = Autodiff<NdArray<f32>>;

/// VGG16 layout with narrow layers so a step runs in milliseconds on CPU.
pub fn tiny_config(num_classes: usize) -> FasterRcnnConfig {
    FasterRcnnConfig {
        block_widths: [4, 4, 8, 8, 8],
        rpn_channels: 8,
        fc_dim: 16,
        pool_size: 2,
        ..FasterRcnnConfig::vgg16(num_classes)
    }
    .with_heads(
        RpnConfig {
            batch_size: 32,
            pre_nms_top_n: 200,
            post_nms_top_n: 50,
            ..RpnConfig::default()
        },
        RoiConfig {
            batch_size: 16,
            ..RoiConfig::default()
        },
    )
}

pub fn blobs(size: usize) -> Blobs {
    let plane = size * size;
    Blobs {
        data: (0..3 * plane).map(|i| ((i % 97) as f32) - 48.0).collect(),
        height: size,
        width: size,
        im_info: [size as f32, size as f32, 1.0],
        gt_boxes: vec![[40.0, 40.0, 119.0, 119.0, 1.0]],
        gt_ishard: vec![false],
        dontcare_areas: Vec::new(),
        im_name: "synthetic.png".to_string(),
    }
}
