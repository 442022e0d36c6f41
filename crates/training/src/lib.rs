#![recursion_limit = "256"]
//! Faster R-CNN training: run configuration, pretrained weight transfer, the
//! step loop with learning-rate decay, checkpoints and scalar metrics.

pub mod checkpoint;
pub mod clip;
pub mod config;
pub mod learner;
pub mod metrics;
pub mod state;
pub mod trainer;
pub mod transfer;
pub mod util;

pub use clip::clip_global_norm;
pub use config::{ConfigError, ExperimentConfig, TrainingConfig};
pub use learner::RcnnLearner;
pub use metrics::{MetricsSink, ScalarLogger, ScalarRecord};
pub use state::{StepReport, TrainingState};
pub use trainer::{
    AnomalyPolicy, DataSource, GroundTruthAnomaly, Learner, LearnerError, TrainError,
    TrainingLoop, TrainingSummary,
};
pub use transfer::{
    plan_transfer, transfer_weights, CopyOutcome, ParameterCopyMismatch, PretrainedWeights,
    TransferReport,
};
pub use util::{run_train, TrainArgs};

/// Backend alias for training (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
