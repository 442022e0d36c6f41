use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::matfile::MatError;

#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("no image paths given")]
    NoImages,
    #[error("`{0}` is not a valid MATLAB function name")]
    InvalidRoutine(String),
    #[error("failed to allocate temporary results file: {0}")]
    TempFile(#[source] io::Error),
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("MATLAB script did not exit successfully (status {status:?})")]
    ExternalProcess { status: Option<i32> },
    #[error("external routine returned {actual} proposal lists for {expected} images")]
    ResultCountMismatch { expected: usize, actual: usize },
    #[error("failed to read results file: {0}")]
    MatFile(#[from] MatError),
    #[error("malformed results: {0}")]
    MalformedResults(String),
}
