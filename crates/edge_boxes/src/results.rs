//! Reading the results container written by the MATLAB routine.

use std::path::Path;

use crate::error::ProposalError;
use crate::matfile::{MatFile, MatValue, Matrix};

/// Variable holding one N x 5 matrix per image.
pub const ALL_BOXES: &str = "all_boxes";

/// Load `all_boxes` from a MAT file as raw (still 1-based) proposal rows.
pub fn load_all_boxes(path: &Path) -> Result<Vec<Vec<[f64; 5]>>, ProposalError> {
    let file = MatFile::open(path)?;
    let items = match file.require(ALL_BOXES)? {
        MatValue::Cell { items, .. } => items,
        other => {
            return Err(ProposalError::MalformedResults(format!(
                "`{ALL_BOXES}` should be a cell array, found {}",
                kind(other)
            )))
        }
    };
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| match item {
            MatValue::Numeric(matrix) => matrix_rows(idx, matrix),
            other => Err(ProposalError::MalformedResults(format!(
                "entry {idx} of `{ALL_BOXES}` is a {}",
                kind(other)
            ))),
        })
        .collect()
}

fn matrix_rows(idx: usize, matrix: &Matrix) -> Result<Vec<[f64; 5]>, ProposalError> {
    if matrix.is_empty() {
        return Ok(Vec::new());
    }
    if matrix.cols != 5 {
        return Err(ProposalError::MalformedResults(format!(
            "entry {idx} has {} columns, expected 5 (x1, y1, x2, y2, score)",
            matrix.cols
        )));
    }
    Ok((0..matrix.rows)
        .map(|r| {
            [
                matrix.get(r, 0),
                matrix.get(r, 1),
                matrix.get(r, 2),
                matrix.get(r, 3),
                matrix.get(r, 4),
            ]
        })
        .collect())
}

fn kind(value: &MatValue) -> &'static str {
    match value {
        MatValue::Numeric(_) => "numeric array",
        MatValue::Char(_) => "char array",
        MatValue::Cell { .. } => "cell array",
        MatValue::Unsupported { .. } => "unsupported array",
    }
}
