//! Burn Faster R-CNN detector.
//!
//! - `FasterRcnn`: VGG16 trunk, region-proposal network and RoI classification head,
//!   trained end to end from one image blob per step.
//! - `boxes`, `anchors`, `targets`: host-side geometry, anchor generation and the
//!   sampling that turns ground truth into per-head training targets.
//!
//! Parameters are addressable by torchvision-style names so that pretrained
//! VGG16 weights can be copied in by name.

pub mod anchors;
pub mod boxes;
pub mod config;
pub mod error;
pub mod faster_rcnn;
pub mod params;
pub mod targets;

pub use config::{FasterRcnnConfig, RoiConfig, RpnConfig};
pub use error::ModelError;
pub use faster_rcnn::{
    scalar_value, tensor_values, DetectionOutput, Diagnostics, FasterRcnn, LossBreakdown,
    VGG16_CONV_INDICES,
};
pub use params::ParamSlot;

pub mod prelude {
    pub use super::{DetectionOutput, FasterRcnn, FasterRcnnConfig, LossBreakdown};
}
