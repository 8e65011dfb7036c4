//! `segpatch`: stochastic patch sampling and augmentation for segmentation
//! training corpora.
//!
//! Samples are submitted to a [`CorpusBuilder`]; [`CorpusBuilder::init`]
//! canonicalizes their labels and builds a (optionally label-balanced)
//! distribution over every patch offset of the corpus. The resulting
//! [`PatchCorpus`] draws randomly augmented raw/label patch pairs, directly or
//! through the burn [`PatchDataset`] and [`PatchBatcher`].

pub mod affine;
pub mod augmentation;
pub mod border;
pub mod canonical;
pub mod clahe;
pub mod config;
pub mod corpus;
pub mod dataset;
pub mod error;
pub mod filter;
pub mod image;
pub mod ingest;
pub mod sampler;
pub mod weights;


// Re-export commonly used types
pub use augmentation::{PatchAugmentor, IGNORE_LABEL};
pub use canonical::LabelMode;
pub use config::{
    AugmentationConfig, BlurConfig, BorderConfig, ClaheConfig, CropConfig, HistEqConfig,
    LabelConsolidateConfig, SamplerConfig,
};
pub use corpus::{CorpusBuilder, PatchCorpus};
pub use dataset::{PatchBatch, PatchBatcher, PatchDataset, PatchItem};
pub use error::{CorpusError, CorpusResult};
pub use crate::image::{Flip, Image};
pub use ingest::{complement_plane, needs_complement};
pub use sampler::{OffsetGrid, Patch, PatchLocation};
pub use weights::{LabelStatistics, SamplingDistribution};
