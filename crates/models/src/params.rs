//! Mutable access to individual parameters by their torch-style names.

use burn::module::Param;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::error::ModelError;

/// One named parameter of a detector.
pub enum ParamSlot<'a, B: Backend> {
    Conv(&'a mut Param<Tensor<B, 4>>),
    /// Stored `[in, out]`; exposed as torch's `[out, in]`.
    Linear(&'a mut Param<Tensor<B, 2>>),
    Bias(&'a mut Param<Tensor<B, 1>>),
}

fn replace<B: Backend, const D: usize>(param: &mut Param<Tensor<B, D>>, value: Tensor<B, D>) {
    let require_grad = param.is_require_grad();
    *param = Param::initialized(param.id, value.set_require_grad(require_grad));
}

impl<B: Backend> ParamSlot<'_, B> {
    pub fn torch_shape(&self) -> Vec<usize> {
        match self {
            Self::Conv(p) => p.dims().to_vec(),
            Self::Linear(p) => {
                let [d_in, d_out] = p.dims();
                vec![d_out, d_in]
            }
            Self::Bias(p) => p.dims().to_vec(),
        }
    }

    pub fn num_elements(&self) -> usize {
        self.torch_shape().iter().product()
    }

    /// Overwrite the values from torch-layout data, keeping the parameter id and grad flag.
    pub fn assign(&mut self, data: TensorData) -> Result<(), ModelError> {
        let expected = self.torch_shape();
        if data.shape != expected {
            return Err(ModelError::ShapeMismatch {
                expected,
                actual: data.shape.clone(),
            });
        }
        match self {
            Self::Conv(p) => {
                let value = Tensor::from_data(data, &p.device());
                replace(p, value);
            }
            Self::Linear(p) => {
                let value = Tensor::<B, 2>::from_data(data, &p.device()).transpose();
                replace(p, value);
            }
            Self::Bias(p) => {
                let value = Tensor::from_data(data, &p.device());
                replace(p, value);
            }
        }
        Ok(())
    }

    /// Stop gradients from reaching this parameter.
    pub fn freeze(&mut self) {
        match self {
            Self::Conv(p) => {
                let v = p.val().set_require_grad(false);
                **p = Param::initialized(p.id, v);
            }
            Self::Linear(p) => {
                let v = p.val().set_require_grad(false);
                **p = Param::initialized(p.id, v);
            }
            Self::Bias(p) => {
                let v = p.val().set_require_grad(false);
                **p = Param::initialized(p.id, v);
            }
        }
    }

    pub fn is_trainable(&self) -> bool {
        match self {
            Self::Conv(p) => p.is_require_grad(),
            Self::Linear(p) => p.is_require_grad(),
            Self::Bias(p) => p.is_require_grad(),
        }
    }
}
