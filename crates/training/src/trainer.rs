//! The step loop: fetch, guard, optimize, report, snapshot, decay.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use models::ModelError;
use roi_data::{Blobs, DatasetError, DatasetResult, RoiDataLayer};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::checkpoint::{checkpoint_path, is_checkpoint_step};
use crate::config::{ConfigError, TrainingConfig};
use crate::metrics::MetricsSink;
use crate::state::{StepReport, TrainingState};

/// What to do when a batch carries implausible ground-truth coordinates.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AnomalyPolicy {
    /// Fail the run with diagnostics.
    #[default]
    Abort,
    /// Block until an operator acknowledges, then continue.
    Pause,
}

#[derive(Debug, Error)]
pub enum LearnerError {
    #[error(transparent)]
    Data(#[from] DatasetError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("failed to write checkpoint {path}: {source}")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: burn::record::RecorderError,
    },
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("step {step}: ground truth in {image} reaches {max}, beyond the sanity bound")]
    MalformedGroundTruth { step: u64, image: String, max: f32 },
    #[error("step {step} failed: {source}")]
    Unrecoverable {
        step: u64,
        #[source]
        source: LearnerError,
    },
    #[error("step {step}: checkpoint failed: {source}")]
    Checkpoint {
        step: u64,
        #[source]
        source: LearnerError,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A batch whose ground truth exceeded the sanity bound.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruthAnomaly {
    pub step: u64,
    pub image: String,
    pub max: f32,
    pub num_boxes: usize,
}

/// Supplies one training batch per call.
pub trait DataSource {
    fn next_blobs(&mut self) -> DatasetResult<Blobs>;
}

impl DataSource for RoiDataLayer {
    fn next_blobs(&mut self) -> DatasetResult<Blobs> {
        self.forward()
    }
}

impl<T: DataSource + ?Sized> DataSource for &mut T {
    fn next_blobs(&mut self) -> DatasetResult<Blobs> {
        (**self).next_blobs()
    }
}

/// Owns the model and optimizer; performs one update per call.
pub trait Learner {
    /// Forward, backward, clip and update at the given learning rate.
    fn step(&mut self, blobs: &Blobs, learning_rate: f64) -> Result<StepReport, LearnerError>;

    /// Replace the optimizer with a fresh instance over the same trainable parameters.
    fn rebuild_optimizer(&mut self);

    fn save_checkpoint(&self, path: &Path) -> Result<PathBuf, LearnerError>;
}

impl<T: Learner + ?Sized> Learner for &mut T {
    fn step(&mut self, blobs: &Blobs, learning_rate: f64) -> Result<StepReport, LearnerError> {
        (**self).step(blobs, learning_rate)
    }

    fn rebuild_optimizer(&mut self) {
        (**self).rebuild_optimizer()
    }

    fn save_checkpoint(&self, path: &Path) -> Result<PathBuf, LearnerError> {
        (**self).save_checkpoint(path)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSummary {
    pub steps_run: u64,
    pub final_learning_rate: f64,
    pub checkpoints: Vec<PathBuf>,
    pub optimizer_rebuilds: usize,
}

type PauseHook<'a> = Box<dyn FnMut(&GroundTruthAnomaly) -> io::Result<()> + 'a>;

fn wait_for_operator(anomaly: &GroundTruthAnomaly) -> io::Result<()> {
    warn!(
        step = anomaly.step,
        image = %anomaly.image,
        max = anomaly.max,
        boxes = anomaly.num_boxes,
        "ground truth beyond sanity bound; press Enter to continue"
    );
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(())
}

pub struct TrainingLoop<'a, D, L, M> {
    config: &'a TrainingConfig,
    data: D,
    learner: L,
    metrics: Option<M>,
    state: TrainingState,
    pause: PauseHook<'a>,
}

impl<'a, D, L, M> TrainingLoop<'a, D, L, M>
where
    D: DataSource,
    L: Learner,
    M: MetricsSink,
{
    pub fn new(config: &'a TrainingConfig, data: D, learner: L, metrics: Option<M>) -> Self {
        let metrics = if config.use_metrics { metrics } else { None };
        Self {
            state: TrainingState::new(config.start_step, config.learning_rate),
            config,
            data,
            learner,
            metrics,
            pause: Box::new(wait_for_operator),
        }
    }

    /// Replace the stdin prompt used by [`AnomalyPolicy::Pause`].
    pub fn with_pause_hook(
        mut self,
        hook: impl FnMut(&GroundTruthAnomaly) -> io::Result<()> + 'a,
    ) -> Self {
        self.pause = Box::new(hook);
        self
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn learner(&self) -> &L {
        &self.learner
    }

    pub fn into_parts(self) -> (D, L, Option<M>) {
        (self.data, self.learner, self.metrics)
    }

    /// Run steps `start..=end`.
    pub fn run(&mut self) -> Result<TrainingSummary, TrainError> {
        let cfg = self.config;
        info!(
            start = cfg.start_step,
            end = cfg.end_step,
            learning_rate = cfg.learning_rate,
            "starting training"
        );
        let mut summary = TrainingSummary::default();

        for step in cfg.start_step..=cfg.end_step {
            self.state.step = step;
            let blobs = self.data.next_blobs().map_err(|source| {
                error!(step, %source, "data layer failed");
                TrainError::Unrecoverable {
                    step,
                    source: source.into(),
                }
            })?;
            self.check_ground_truth(step, &blobs)?;

            let report = self
                .learner
                .step(&blobs, self.state.learning_rate)
                .map_err(|source| {
                    error!(step, %source, "training step failed");
                    TrainError::Unrecoverable { step, source }
                })?;
            self.state.record(&report, cfg.debug);

            let mut reset = false;
            if step % cfg.display_interval == 0 {
                self.log_progress(&blobs.im_name);
                reset = true;
            }

            if step % cfg.log_interval == 0 {
                self.push_metrics(step);
            }

            if is_checkpoint_step(step, cfg.snapshot_interval) {
                let target = checkpoint_path(&cfg.output_dir, step);
                let saved = self
                    .learner
                    .save_checkpoint(&target)
                    .map_err(|source| TrainError::Checkpoint { step, source })?;
                info!("save model: {}", saved.display());
                summary.checkpoints.push(saved);
            }

            if cfg.decay_steps.contains(&step) {
                self.state.learning_rate *= cfg.decay_factor;
                if !cfg.preserve_optimizer_state {
                    self.learner.rebuild_optimizer();
                    summary.optimizer_rebuilds += 1;
                }
                info!(
                    step,
                    learning_rate = self.state.learning_rate,
                    rebuilt = !cfg.preserve_optimizer_state,
                    "learning rate decayed"
                );
            }

            if reset {
                self.state.reset();
            }
            summary.steps_run += 1;
        }

        summary.final_learning_rate = self.state.learning_rate;
        info!(
            steps = summary.steps_run,
            checkpoints = summary.checkpoints.len(),
            "training finished"
        );
        Ok(summary)
    }

    fn check_ground_truth(&mut self, step: u64, blobs: &Blobs) -> Result<(), TrainError> {
        let max = blobs.max_gt_coordinate();
        if max <= self.config.gt_sanity_bound {
            return Ok(());
        }
        let anomaly = GroundTruthAnomaly {
            step,
            image: blobs.im_name.clone(),
            max,
            num_boxes: blobs.gt_boxes.len(),
        };
        match self.config.anomaly_policy {
            AnomalyPolicy::Abort => {
                error!(step, image = %anomaly.image, max, "malformed ground truth");
                Err(TrainError::MalformedGroundTruth {
                    step,
                    image: anomaly.image,
                    max,
                })
            }
            AnomalyPolicy::Pause => {
                (self.pause)(&anomaly)?;
                Ok(())
            }
        }
    }

    fn log_progress(&self, image: &str) {
        let state = &self.state;
        let fps = state.fps();
        info!(
            step = state.step,
            "step {}, image: {}, loss: {:.4}, fps: {:.2} ({:.2}s per batch)",
            state.step,
            image,
            state.mean_loss(),
            fps,
            1.0 / fps
        );
        if self.config.debug {
            let steps = state.steps_since_reset.max(1) as usize;
            info!(
                "\tTP: {:.2}%, TF: {:.2}%, fg/bg=({}/{})",
                state.tp_rate(),
                state.tn_rate(),
                state.fg / steps,
                state.bg / steps
            );
            let l = state.last_losses;
            info!(
                "\trpn_cls: {:.4}, rpn_box: {:.4}, rcnn_cls: {:.4}, rcnn_box: {:.4}",
                l.rpn_cls, l.rpn_box, l.rcnn_cls, l.rcnn_box
            );
        }
    }

    fn push_metrics(&mut self, step: u64) {
        let Some(sink) = self.metrics.as_mut() else {
            return;
        };
        let state = &self.state;
        let mut scalars = vec![
            ("train_loss", state.mean_loss()),
            ("learning_rate", state.learning_rate),
        ];
        if self.config.debug {
            let l = state.last_losses;
            scalars.extend([
                ("true_positive", state.tp_rate()),
                ("true_negative", state.tn_rate()),
                ("rpn_cls", f64::from(l.rpn_cls)),
                ("rpn_box", f64::from(l.rpn_box)),
                ("rcnn_cls", f64::from(l.rcnn_cls)),
                ("rcnn_box", f64::from(l.rcnn_box)),
            ]);
        }
        for (tag, value) in scalars {
            if let Err(err) = sink.push_scalar(tag, value, step) {
                warn!(tag, step, %err, "failed to push metric");
            }
        }
    }
}
