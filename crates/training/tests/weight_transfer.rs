mod common;

use burn::tensor::backend::Backend;
use common::{tiny_config, ADBackend};
use models::{FasterRcnn, ParamSlot};
use safetensors::tensor::TensorView;
use safetensors::Dtype;
use training::transfer::TransferError;
use training::{transfer_weights, PretrainedWeights};

fn le_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn write_safetensors(
    path: &std::path::Path,
    tensors: &[(&str, Vec<usize>, Vec<f32>)],
) -> anyhow::Result<()> {
    let bytes: Vec<(String, Vec<usize>, Vec<u8>)> = tensors
        .iter()
        .map(|(n, s, v)| (n.to_string(), s.clone(), le_bytes(v)))
        .collect();
    let views = bytes
        .iter()
        .map(|(n, s, b)| Ok((n.clone(), TensorView::new(Dtype::F32, s.clone(), b)?)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let raw = safetensors::serialize(views, &None)?;
    std::fs::write(path, raw)?;
    Ok(())
}

fn values_of(model: &mut FasterRcnn<ADBackend>, name: &str) -> Vec<f32> {
    let mut params = model.params_mut();
    let (_, slot) = params
        .iter_mut()
        .find(|(n, _)| n == name)
        .expect("parameter exists");
    let data = match slot {
        ParamSlot::Conv(p) => p.val().into_data(),
        ParamSlot::Linear(p) => p.val().into_data(),
        ParamSlot::Bias(p) => p.val().into_data(),
    };
    data.to_vec::<f32>().expect("f32 data")
}

#[test]
fn copies_matching_names_and_tolerates_mismatches() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("vgg16.safetensors");
    let fc6: Vec<f32> = (0..16 * 32).map(|v| v as f32).collect();
    write_safetensors(
        &path,
        &[
            ("features.0.weight", vec![4, 3, 3, 3], vec![0.5; 108]),
            ("features.0.bias", vec![4], vec![1.0, 2.0, 3.0, 4.0]),
            ("classifier.0.weight", vec![16, 32], fc6),
            ("score_fc.weight", vec![1000, 16], vec![0.0; 16000]),
            ("classifier.6.weight", vec![1000, 16], vec![0.0; 16000]),
        ],
    )?;

    let device = <ADBackend as Backend>::Device::default();
    let mut model = FasterRcnn::<ADBackend>::new(tiny_config(2), &device);
    let weights = PretrainedWeights::load(&path)?;
    assert_eq!(weights.len(), 5);

    let report = transfer_weights(&mut model, &weights);
    let mut copied = report.copied.clone();
    copied.sort();
    assert_eq!(
        copied,
        vec!["classifier.0.weight", "features.0.bias", "features.0.weight"]
    );
    assert_eq!(report.absent, vec!["classifier.6.weight"]);
    assert_eq!(report.mismatched.len(), 1);
    assert_eq!(report.mismatched[0].name, "score_fc.weight");
    assert!(report.mismatched[0].to_string().starts_with("did not copy score_fc.weight"));

    assert_eq!(values_of(&mut model, "features.0.bias"), vec![1.0, 2.0, 3.0, 4.0]);
    assert!(values_of(&mut model, "features.0.weight").iter().all(|&v| v == 0.5));
    // torch [out=16, in=32] lands as burn [in=32, out=16].
    let fc6 = values_of(&mut model, "classifier.0.weight");
    assert_eq!(fc6[1], 32.0);
    assert_eq!(fc6[16], 1.0);
    Ok(())
}

#[test]
fn transfer_keeps_frozen_flags() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("w.safetensors");
    write_safetensors(&path, &[("features.0.bias", vec![4], vec![0.0; 4])])?;

    let device = <ADBackend as Backend>::Device::default();
    let mut model = FasterRcnn::<ADBackend>::new(tiny_config(2), &device);
    model.freeze_leading(2);
    transfer_weights(&mut model, &PretrainedWeights::load(&path)?);
    let trainable: Vec<bool> = model
        .params_mut()
        .iter()
        .map(|(_, slot)| slot.is_trainable())
        .collect();
    assert!(!trainable[0] && !trainable[1] && trainable[2]);
    Ok(())
}

#[test]
fn unreadable_weights_are_errors() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let missing = PretrainedWeights::load(&dir.path().join("missing.safetensors")).unwrap_err();
    assert!(matches!(missing, TransferError::Io { .. }));

    let garbage = dir.path().join("garbage.safetensors");
    std::fs::write(&garbage, b"not a safetensors file")?;
    let err = PretrainedWeights::load(&garbage).unwrap_err();
    assert!(matches!(err, TransferError::Format { .. }));
    Ok(())
}
