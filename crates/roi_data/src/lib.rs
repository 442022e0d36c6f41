//! Image databases (imdb) and the RoI data layer for detector training.
//!
//! An imdb is a named COCO-layout annotation file. Its entries form the
//! roidb, which [`RoiDataLayer`] walks in a seeded shuffled order, producing
//! one rescaled, mean-subtracted image blob per call.

pub mod coco;
pub mod imdb;
pub mod layer;
pub mod types;

pub use imdb::{get_imdb, Imdb};
pub use layer::{DataLayerConfig, RoiDataLayer};
pub use types::{Blobs, DatasetError, DatasetResult, RoidbEntry};
