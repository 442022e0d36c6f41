use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("image blob holds {actual} values, expected {expected} for its shape")]
    InputShape { expected: usize, actual: usize },
    #[error("image of {height}x{width} is smaller than one feature cell")]
    ImageTooSmall { height: usize, width: usize },
    #[error("shape mismatch: model has {expected:?}, source has {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("cannot read tensor values: {0}")]
    TensorData(String),
}
