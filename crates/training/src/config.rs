//! Experiment YAML and the merged run configuration.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use models::{RoiConfig, RpnConfig};
use roi_data::DataLayerConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::trainer::AnomalyPolicy;
use crate::util::TrainArgs;

pub const CONFIG_ENV: &str = "RCNN_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "experiments/cfgs/optha.yml";
pub const DEFAULT_SEED: u64 = 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top level of an experiment file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ExperimentConfig {
    pub exp_dir: String,
    pub log_dir: String,
    pub rng_seed: Option<u64>,
    pub train: TrainSection,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            exp_dir: "default".to_string(),
            log_dir: "default".to_string(),
            rng_seed: None,
            train: TrainSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TrainSection {
    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    /// Steps between console log lines.
    pub display: u64,
    /// Steps between metric pushes.
    pub log_image_iters: u64,
    pub snapshot_iters: u64,
    #[serde(flatten)]
    pub data: DataLayerConfig,
    #[serde(flatten)]
    pub rpn: RpnConfig,
    #[serde(flatten)]
    pub roi: RoiConfig,
}

impl Default for TrainSection {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            momentum: 0.9,
            weight_decay: 0.0005,
            display: 10,
            log_image_iters: 100,
            snapshot_iters: 10000,
            data: DataLayerConfig::default(),
            rpn: RpnConfig::default(),
            roi: RoiConfig::default(),
        }
    }
}

impl ExperimentConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Config path from the command line, else `RCNN_CONFIG`, else the default.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Everything one training run needs, fixed at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub imdb_name: String,
    pub data_root: PathBuf,
    pub output_dir: PathBuf,
    pub logs_root: PathBuf,
    pub log_dir: String,
    pub exp_dir: String,
    pub pretrained: Option<PathBuf>,
    pub start_step: u64,
    /// Inclusive.
    pub end_step: u64,
    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub display_interval: u64,
    pub log_interval: u64,
    pub snapshot_interval: u64,
    pub decay_steps: BTreeSet<u64>,
    pub decay_factor: f64,
    pub seed: u64,
    /// Track tp/tn/fg/bg and per-head losses.
    pub debug: bool,
    pub use_metrics: bool,
    pub preserve_optimizer_state: bool,
    pub frozen_params: usize,
    pub clip_norm: f32,
    pub gt_sanity_bound: f32,
    pub anomaly_policy: AnomalyPolicy,
    pub data: DataLayerConfig,
    pub rpn: RpnConfig,
    pub roi: RoiConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let exp = ExperimentConfig::default();
        Self {
            imdb_name: "optha_ma_part_trainval".to_string(),
            data_root: PathBuf::from("data"),
            output_dir: PathBuf::from("models/saved_model_optha_part"),
            logs_root: PathBuf::from("./logs"),
            log_dir: exp.log_dir,
            exp_dir: exp.exp_dir,
            pretrained: None,
            start_step: 0,
            end_step: 100000,
            learning_rate: exp.train.learning_rate,
            momentum: exp.train.momentum,
            weight_decay: exp.train.weight_decay,
            display_interval: exp.train.display,
            log_interval: exp.train.log_image_iters,
            snapshot_interval: exp.train.snapshot_iters,
            decay_steps: BTreeSet::from([60000, 80000]),
            decay_factor: 0.1,
            seed: DEFAULT_SEED,
            debug: true,
            use_metrics: true,
            preserve_optimizer_state: false,
            frozen_params: 8,
            clip_norm: 10.0,
            gt_sanity_bound: 40000.0,
            anomaly_policy: AnomalyPolicy::Abort,
            data: exp.train.data,
            rpn: exp.train.rpn,
            roi: exp.train.roi,
        }
    }
}

impl TrainingConfig {
    /// Merge command-line options with the experiment file.
    pub fn from_parts(args: &TrainArgs, exp: ExperimentConfig) -> Result<Self, ConfigError> {
        let cfg = Self {
            imdb_name: args.imdb.clone(),
            data_root: args.data_root.clone(),
            output_dir: args.output_dir.clone(),
            logs_root: args.logs_root.clone(),
            log_dir: exp.log_dir,
            exp_dir: exp.exp_dir,
            pretrained: args.pretrained.clone(),
            start_step: args.start_step,
            end_step: args.end_step,
            learning_rate: exp.train.learning_rate,
            momentum: exp.train.momentum,
            weight_decay: exp.train.weight_decay,
            display_interval: exp.train.display,
            log_interval: exp.train.log_image_iters,
            snapshot_interval: exp.train.snapshot_iters,
            decay_steps: args.decay_steps.iter().copied().collect(),
            decay_factor: args.decay_factor,
            seed: args.seed.or(exp.rng_seed).unwrap_or(DEFAULT_SEED),
            debug: !args.no_debug,
            use_metrics: !args.no_metrics,
            preserve_optimizer_state: args.preserve_optimizer_state,
            frozen_params: args.frozen_params,
            clip_norm: args.clip_norm,
            gt_sanity_bound: args.gt_sanity_bound,
            anomaly_policy: args.anomaly_policy,
            data: exp.train.data,
            rpn: exp.train.rpn,
            roi: exp.train.roi,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.display_interval == 0 || self.log_interval == 0 || self.snapshot_interval == 0 {
            return Err(ConfigError::Invalid(
                "DISPLAY, LOG_IMAGE_ITERS and SNAPSHOT_ITERS must be positive".to_string(),
            ));
        }
        if self.end_step < self.start_step {
            return Err(ConfigError::Invalid(format!(
                "end step {} precedes start step {}",
                self.end_step, self.start_step
            )));
        }
        if self.data.scales.is_empty() {
            return Err(ConfigError::Invalid("SCALES must not be empty".to_string()));
        }
        if self.clip_norm.is_nan() || self.clip_norm <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "clip norm must be positive, got {}",
                self.clip_norm
            )));
        }
        Ok(())
    }

    /// Directory receiving the scalar metrics file.
    pub fn metrics_dir(&self) -> PathBuf {
        self.logs_root.join(&self.log_dir)
    }
}
