use serde::{Deserialize, Serialize};

/// Candidate window in 0-based pixel coordinates with a confidence score.
///
/// `x1 <= x2` and `y1 <= y2` are whatever the upstream routine produced; nothing
/// here reorders or validates corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub score: f64,
}

impl Proposal {
    pub fn from_row(row: [f64; 5]) -> Self {
        Self {
            x1: row[0],
            y1: row[1],
            x2: row[2],
            y2: row[3],
            score: row[4],
        }
    }

    pub fn to_row(&self) -> [f64; 5] {
        [self.x1, self.y1, self.x2, self.y2, self.score]
    }
}

/// One proposal list per input image, in input order.
pub type ProposalBatch = Vec<Vec<Proposal>>;

/// Pixel indexing convention of a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBase {
    Zero,
    /// MATLAB-style: the first pixel is 1.
    One,
}

/// Proposal rows as delivered by a compute client, before index correction.
#[derive(Debug, Clone, PartialEq)]
pub struct RawProposals {
    pub index_base: IndexBase,
    pub boxes: Vec<Vec<[f64; 5]>>,
}

impl RawProposals {
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Shift to 0-based coordinates. Only the first corner moves; the second
    /// corner and the score pass through untouched.
    pub fn into_zero_based(self) -> ProposalBatch {
        let offset = match self.index_base {
            IndexBase::Zero => 0.0,
            IndexBase::One => 1.0,
        };
        self.boxes
            .into_iter()
            .map(|rows| {
                rows.into_iter()
                    .map(|[x1, y1, x2, y2, score]| {
                        Proposal::from_row([x1 - offset, y1 - offset, x2, y2, score])
                    })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_based_input_is_untouched() {
        let raw = RawProposals {
            index_base: IndexBase::Zero,
            boxes: vec![vec![[1.0, 2.0, 3.0, 4.0, 0.5]]],
        };
        let batch = raw.into_zero_based();
        assert_eq!(batch[0][0].to_row(), [1.0, 2.0, 3.0, 4.0, 0.5]);
    }
}
