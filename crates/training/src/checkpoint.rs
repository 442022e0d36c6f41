use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use models::{FasterRcnn, FasterRcnnConfig};

pub const CHECKPOINT_PREFIX: &str = "faster_rcnn";

/// `<output_dir>/faster_rcnn_<step>.bin`
pub fn checkpoint_path(output_dir: &Path, step: u64) -> PathBuf {
    output_dir.join(format!("{CHECKPOINT_PREFIX}_{step}.bin"))
}

/// Snapshots happen at positive multiples of the interval only.
pub fn is_checkpoint_step(step: u64, interval: u64) -> bool {
    interval > 0 && step > 0 && step % interval == 0
}

pub fn save_module<B: Backend, M: Module<B>>(module: &M, path: &Path) -> Result<(), RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    module.clone().save_file(path, &recorder)
}

pub fn load_faster_rcnn<B: Backend>(
    path: &Path,
    config: FasterRcnnConfig,
    device: &B::Device,
) -> Result<FasterRcnn<B>, RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    FasterRcnn::<B>::new(config, device).load_file(path, &recorder, device)
}
