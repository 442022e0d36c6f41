//! Name-matched copy of pretrained parameters into a detector.
//!
//! Planning is pure: [`plan_transfer`] compares name/shape tables and yields one
//! [`CopyOutcome`] per pretrained tensor. [`transfer_weights`] applies a plan and
//! logs each outcome. Mismatches are expected when the class count differs from
//! the pretrained classifier and never abort the run.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use burn::tensor::TensorData;
use models::FasterRcnn;
use safetensors::{Dtype, SafeTensors};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to read pretrained weights {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse safetensors {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: safetensors::SafeTensorError,
    },
}

/// A single parameter that could not be copied.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("did not copy {name}: {reason}")]
pub struct ParameterCopyMismatch {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied,
    SkippedAbsent,
    SkippedShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

/// Outcome for every pretrained name, in the pretrained order.
pub fn plan_transfer(
    model: &[(String, Vec<usize>)],
    pretrained: &[(String, Vec<usize>)],
) -> Vec<(String, CopyOutcome)> {
    let shapes: HashMap<&str, &Vec<usize>> =
        model.iter().map(|(name, shape)| (name.as_str(), shape)).collect();
    pretrained
        .iter()
        .map(|(name, shape)| {
            let outcome = match shapes.get(name.as_str()) {
                None => CopyOutcome::SkippedAbsent,
                Some(expected) if *expected != shape => CopyOutcome::SkippedShapeMismatch {
                    expected: (*expected).clone(),
                    actual: shape.clone(),
                },
                Some(_) => CopyOutcome::Copied,
            };
            (name.clone(), outcome)
        })
        .collect()
}

/// Pretrained tensors in torch layout, as `f32`.
#[derive(Debug, Clone, Default)]
pub struct PretrainedWeights {
    tensors: Vec<(String, Vec<usize>, Vec<f32>)>,
}

impl PretrainedWeights {
    pub fn load(path: &Path) -> Result<Self, TransferError> {
        let bytes = fs::read(path).map_err(|source| TransferError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_safetensors(&bytes).map_err(|source| TransferError::Format {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_safetensors(bytes: &[u8]) -> Result<Self, safetensors::SafeTensorError> {
        let file = SafeTensors::deserialize(bytes)?;
        let mut entries = file.tensors();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let mut tensors = Vec::with_capacity(entries.len());
        for (name, view) in entries {
            let values = match view.dtype() {
                Dtype::F32 => view
                    .data()
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
                Dtype::F64 => view
                    .data()
                    .chunks_exact(8)
                    .map(|c| {
                        f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32
                    })
                    .collect(),
                other => {
                    warn!(%name, dtype = ?other, "skipping pretrained tensor with unsupported dtype");
                    continue;
                }
            };
            tensors.push((name, view.shape().to_vec(), values));
        }
        Ok(Self { tensors })
    }

    pub fn push(&mut self, name: impl Into<String>, shape: Vec<usize>, values: Vec<f32>) {
        self.tensors.push((name.into(), shape, values));
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn shapes(&self) -> Vec<(String, Vec<usize>)> {
        self.tensors
            .iter()
            .map(|(name, shape, _)| (name.clone(), shape.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferReport {
    pub copied: Vec<String>,
    pub absent: Vec<String>,
    pub mismatched: Vec<ParameterCopyMismatch>,
}

/// Copy every pretrained tensor whose name and shape match a model parameter.
pub fn transfer_weights<B: Backend>(
    model: &mut FasterRcnn<B>,
    weights: &PretrainedWeights,
) -> TransferReport {
    let plan = plan_transfer(&model.named_shapes(), &weights.shapes());
    let mut slots: HashMap<String, _> = model.params_mut().into_iter().collect();
    let mut report = TransferReport::default();

    for ((name, outcome), (_, shape, values)) in plan.into_iter().zip(&weights.tensors) {
        match outcome {
            CopyOutcome::SkippedAbsent => {
                debug!(%name, "pretrained tensor has no model counterpart");
                report.absent.push(name);
            }
            CopyOutcome::SkippedShapeMismatch { expected, actual } => {
                let mismatch = ParameterCopyMismatch {
                    reason: format!("shape {actual:?} does not match {expected:?}"),
                    name,
                };
                warn!("{mismatch}");
                report.mismatched.push(mismatch);
            }
            CopyOutcome::Copied => {
                let Some(slot) = slots.get_mut(&name) else {
                    continue;
                };
                match slot.assign(TensorData::new(values.clone(), shape.clone())) {
                    Ok(()) => {
                        info!("copied {name}");
                        report.copied.push(name);
                    }
                    Err(err) => {
                        let mismatch = ParameterCopyMismatch {
                            name,
                            reason: err.to_string(),
                        };
                        warn!("{mismatch}");
                        report.mismatched.push(mismatch);
                    }
                }
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, &[usize])]) -> Vec<(String, Vec<usize>)> {
        entries
            .iter()
            .map(|(n, s)| (n.to_string(), s.to_vec()))
            .collect()
    }

    #[test]
    fn plan_classifies_each_name() {
        let model = table(&[("features.0.weight", &[64, 3, 3, 3]), ("score_fc.weight", &[2, 4096])]);
        let pretrained = table(&[
            ("features.0.weight", &[64, 3, 3, 3]),
            ("score_fc.weight", &[1000, 4096]),
            ("classifier.6.weight", &[1000, 4096]),
        ]);
        let plan = plan_transfer(&model, &pretrained);
        assert_eq!(plan[0].1, CopyOutcome::Copied);
        assert_eq!(
            plan[1].1,
            CopyOutcome::SkippedShapeMismatch {
                expected: vec![2, 4096],
                actual: vec![1000, 4096]
            }
        );
        assert_eq!(plan[2].1, CopyOutcome::SkippedAbsent);
    }
}
