//! Gradient clipping by the global norm over every parameter gradient.

use burn::module::{Module, ModuleVisitor, ParamId};
use burn::optim::GradientsParams;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use models::{scalar_value, ModelError};

/// Sums squared gradient entries of every parameter that has a gradient.
struct SquaredNorm<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    sum: Option<Tensor<B::InnerBackend, 1>>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredNorm<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) else {
            return;
        };
        let squares = grad.powf_scalar(2.0).sum();
        self.sum = Some(match self.sum.take() {
            Some(acc) => acc + squares,
            None => squares,
        });
    }
}

struct Scale<'a> {
    grads: &'a mut GradientsParams,
    factor: f32,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Scale<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads.register(id, grad.mul_scalar(self.factor));
        }
    }
}

/// Scale all gradients by `max_norm / total` when their joint L2 norm exceeds
/// `max_norm`. Returns the norm measured before clipping.
pub fn clip_global_norm<B, M>(
    module: &M,
    grads: &mut GradientsParams,
    max_norm: f32,
) -> Result<f32, ModelError>
where
    B: AutodiffBackend,
    M: Module<B>,
{
    let mut norm = SquaredNorm::<B> {
        grads: &*grads,
        sum: None,
    };
    module.visit(&mut norm);
    let Some(sum) = norm.sum else {
        return Ok(0.0);
    };
    let total = scalar_value(sum)?.sqrt();

    if total > max_norm {
        module.visit(&mut Scale {
            grads,
            factor: max_norm / total,
        });
    }
    Ok(total)
}
