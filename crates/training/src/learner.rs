use std::path::{Path, PathBuf};

use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer, Sgd, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use models::{scalar_value, FasterRcnn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use roi_data::Blobs;
use tracing::{debug, info};

use crate::checkpoint::save_module;
use crate::clip::clip_global_norm;
use crate::config::TrainingConfig;
use crate::state::StepReport;
use crate::trainer::{Learner, LearnerError};

/// SGD with momentum (no dampening) and L2 weight decay. Clipping happens in
/// [`RcnnLearner`] over the global gradient norm.
pub fn sgd_config(momentum: f64, weight_decay: f64) -> SgdConfig {
    SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(momentum)
                .with_dampening(0.0),
        ))
        .with_weight_decay(Some(WeightDecayConfig::new(weight_decay as f32)))
}

type SgdOptimizer<B> =
    OptimizerAdaptor<Sgd<<B as AutodiffBackend>::InnerBackend>, FasterRcnn<B>, B>;

/// Burn-backed [`Learner`] for [`FasterRcnn`].
pub struct RcnnLearner<B: AutodiffBackend> {
    model: FasterRcnn<B>,
    optim: SgdOptimizer<B>,
    sgd: SgdConfig,
    clip_norm: f32,
    rng: StdRng,
}

impl<B: AutodiffBackend> RcnnLearner<B> {
    /// Freezes the leading parameters, then builds the optimizer over the rest.
    pub fn new(mut model: FasterRcnn<B>, cfg: &TrainingConfig) -> Self {
        let frozen = model.freeze_leading(cfg.frozen_params);
        info!(count = frozen.len(), first = ?frozen.first(), last = ?frozen.last(), "frozen parameters");
        let sgd = sgd_config(cfg.momentum, cfg.weight_decay);
        Self {
            optim: sgd.init(),
            sgd,
            clip_norm: cfg.clip_norm,
            model,
            rng: StdRng::seed_from_u64(cfg.seed),
        }
    }

    pub fn model(&self) -> &FasterRcnn<B> {
        &self.model
    }

    pub fn into_model(self) -> FasterRcnn<B> {
        self.model
    }
}

impl<B: AutodiffBackend> Learner for RcnnLearner<B> {
    fn step(&mut self, blobs: &Blobs, learning_rate: f64) -> Result<StepReport, LearnerError> {
        let output = self.model.forward(blobs, &mut self.rng)?;
        let loss = scalar_value(output.loss.clone().detach())?;
        let mut grads = GradientsParams::from_grads(output.loss.backward(), &self.model);
        let grad_norm = clip_global_norm::<B, _>(&self.model, &mut grads, self.clip_norm)?;
        debug!(params = grads.len(), loss, grad_norm, "applying gradients");
        self.model = self.optim.step(learning_rate, self.model.clone(), grads);
        Ok(StepReport {
            loss,
            losses: output.losses,
            diagnostics: output.diagnostics,
        })
    }

    fn rebuild_optimizer(&mut self) {
        self.optim = self.sgd.init();
    }

    fn save_checkpoint(&self, path: &Path) -> Result<PathBuf, LearnerError> {
        save_module(&self.model, path).map_err(|source| LearnerError::Checkpoint {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(path.to_path_buf())
    }
}
