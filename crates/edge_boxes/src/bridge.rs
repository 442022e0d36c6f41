use std::path::{Path, PathBuf};

use tracing::info;

use crate::client::{ExternalComputeClient, MatlabClient, MatlabConfig};
use crate::error::ProposalError;
use crate::proposal::ProposalBatch;

/// Routine used for the "effective detection proposals" configuration.
pub const DEFAULT_ROUTINE: &str = "edge_boxes_wrapper";

/// Turns a compute client's raw output into 0-based proposals, one list per image.
#[derive(Debug, Clone)]
pub struct ProposalBridge<C> {
    client: C,
    routine: String,
}

impl ProposalBridge<MatlabClient> {
    pub fn matlab(cfg: MatlabConfig) -> Self {
        Self::new(MatlabClient::new(cfg))
    }
}

impl<C: ExternalComputeClient> ProposalBridge<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            routine: DEFAULT_ROUTINE.to_string(),
        }
    }

    pub fn with_routine(mut self, routine: impl Into<String>) -> Self {
        self.routine = routine.into();
        self
    }

    pub fn routine(&self) -> &str {
        &self.routine
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Compute window proposals for `image_paths`.
    pub fn get_windows<P: AsRef<Path>>(
        &self,
        image_paths: &[P],
    ) -> Result<ProposalBatch, ProposalError> {
        if image_paths.is_empty() {
            return Err(ProposalError::NoImages);
        }
        let paths: Vec<PathBuf> = image_paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        let ticket = self.client.submit(&paths, &self.routine)?;
        let batch = self.client.wait(ticket)?.into_zero_based();
        if batch.len() != paths.len() {
            return Err(ProposalError::ResultCountMismatch {
                expected: paths.len(),
                actual: batch.len(),
            });
        }
        info!(
            images = paths.len(),
            proposals = batch.iter().map(Vec::len).sum::<usize>(),
            routine = %self.routine,
            "computed window proposals"
        );
        Ok(batch)
    }
}
