use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use burn::backend::Autodiff;
use burn::tensor::backend::Backend;
use clap::{Parser, ValueEnum};
use models::{FasterRcnn, FasterRcnnConfig};
use roi_data::{get_imdb, RoiDataLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{resolve_config_path, ExperimentConfig, TrainingConfig};
use crate::learner::RcnnLearner;
use crate::metrics::ScalarLogger;
use crate::trainer::{AnomalyPolicy, TrainingLoop, TrainingSummary};
use crate::transfer::{transfer_weights, PretrainedWeights};
use crate::TrainBackend;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "train", about = "Train a Faster R-CNN detector on an imdb")]
pub struct TrainArgs {
    /// Training imdb name, resolved to `<data-root>/annotations/<imdb>.json`.
    #[arg(long, default_value = "optha_ma_part_trainval")]
    pub imdb: String,
    #[arg(long, default_value = "data")]
    pub data_root: PathBuf,
    /// Experiment YAML (falls back to $RCNN_CONFIG, then experiments/cfgs/optha.yml).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Pretrained safetensors file with torchvision VGG16 names.
    #[arg(long)]
    pub pretrained: Option<PathBuf>,
    /// Checkpoint directory.
    #[arg(long, default_value = "models/saved_model_optha_part")]
    pub output_dir: PathBuf,
    /// Root for scalar metric logs.
    #[arg(long, default_value = "./logs")]
    pub logs_root: PathBuf,
    #[arg(long, default_value_t = 0)]
    pub start_step: u64,
    /// Last step, inclusive.
    #[arg(long, default_value_t = 100000)]
    pub end_step: u64,
    #[arg(long, value_delimiter = ',', default_value = "60000,80000")]
    pub decay_steps: Vec<u64>,
    #[arg(long, default_value_t = 0.1)]
    pub decay_factor: f64,
    /// Overrides RNG_SEED from the experiment file.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Skip tp/tn and per-head loss tracking.
    #[arg(long, default_value_t = false)]
    pub no_debug: bool,
    /// Do not write scalar metrics.
    #[arg(long, default_value_t = false)]
    pub no_metrics: bool,
    /// Keep momentum buffers across learning-rate decays.
    #[arg(long, default_value_t = false)]
    pub preserve_optimizer_state: bool,
    /// Number of leading parameters excluded from optimization.
    #[arg(long, default_value_t = 8)]
    pub frozen_params: usize,
    /// Gradient norm ceiling.
    #[arg(long, default_value_t = 10.0)]
    pub clip_norm: f32,
    /// Ground-truth coordinates above this trigger the anomaly policy.
    #[arg(long, default_value_t = 40000.0)]
    pub gt_sanity_bound: f32,
    #[arg(long, value_enum, default_value_t = AnomalyPolicy::Abort)]
    pub anomaly_policy: AnomalyPolicy,
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
}

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

type ADBackend = Autodiff<TrainBackend>;

pub fn run_train(args: TrainArgs) -> anyhow::Result<TrainingSummary> {
    validate_backend_choice(args.backend)?;

    let config_path = resolve_config_path(args.config.as_deref());
    let exp = ExperimentConfig::load(&config_path)?;
    let cfg = TrainingConfig::from_parts(&args, exp)?;
    info!(config = %config_path.display(), exp_dir = %cfg.exp_dir, seed = cfg.seed, "loaded experiment");

    ADBackend::seed(cfg.seed);
    fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("creating {}", cfg.output_dir.display()))?;

    let imdb = get_imdb(&cfg.imdb_name, &cfg.data_root)
        .with_context(|| format!("loading imdb {}", cfg.imdb_name))?
        .prepare(cfg.data.use_flipped)?;
    info!(imdb = %imdb.name, images = imdb.roidb.len(), classes = imdb.num_classes(), "prepared roidb");
    let data = RoiDataLayer::new(imdb.roidb, imdb.classes.len(), cfg.data.clone(), cfg.seed)?;

    let device = <ADBackend as Backend>::Device::default();
    let model_cfg =
        FasterRcnnConfig::vgg16(data.num_classes()).with_heads(cfg.rpn.clone(), cfg.roi.clone());
    let mut model = FasterRcnn::<ADBackend>::new(model_cfg, &device);

    if let Some(path) = &cfg.pretrained {
        let weights = PretrainedWeights::load(path)?;
        let report = transfer_weights(&mut model, &weights);
        info!(
            copied = report.copied.len(),
            mismatched = report.mismatched.len(),
            absent = report.absent.len(),
            "pretrained weights applied"
        );
    } else {
        warn!("no pretrained weights given; training from random initialization");
    }

    let learner = RcnnLearner::new(model, &cfg);
    let metrics = if cfg.use_metrics {
        let logger = ScalarLogger::create(&cfg.logs_root, &cfg.log_dir)
            .with_context(|| format!("creating metrics log under {}", cfg.metrics_dir().display()))?;
        info!(path = %logger.path().display(), "writing scalar metrics");
        Some(logger)
    } else {
        None
    };

    let summary = TrainingLoop::new(&cfg, data, learner, metrics).run()?;
    Ok(summary)
}
