//! Edge Boxes window proposals for the detection pipeline.
//!
//! The proposal search itself runs inside MATLAB. This crate marshals image
//! paths into a batch-mode MATLAB invocation, reads the `.mat` results file it
//! leaves behind and hands back 0-based proposals, one list per image.
//!
//! - [`ExternalComputeClient`]: submit/wait seam around whatever computes the boxes.
//! - [`MatlabClient`]: the subprocess + temp-file implementation of that seam.
//! - [`ProposalBridge`]: index-base correction and result-count validation on top of a client.
//! - [`matfile`]: level-5 MAT-file codec used to read the results container.

pub mod bridge;
pub mod client;
pub mod error;
pub mod matfile;
pub mod overlay;
pub mod proposal;
pub mod results;

pub use bridge::{ProposalBridge, DEFAULT_ROUTINE};
pub use client::{ExternalComputeClient, MatlabClient, MatlabConfig, MatlabJob};
pub use error::ProposalError;
pub use proposal::{IndexBase, Proposal, ProposalBatch, RawProposals};
