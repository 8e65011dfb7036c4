//! Error types for corpus construction and patch sampling.
//!
//! Two kinds of failure exist. Corpus inconsistencies are raised by
//! [`CorpusBuilder::init`](crate::CorpusBuilder::init) and are fatal: running
//! `init` again on the same corpus cannot succeed. Invalid configurations are
//! rejected when a configuration is applied. Missing optional configuration
//! data is never an error; it falls back to a logged default instead.

use thiserror::Error;

/// Error type for corpus and sampling operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CorpusError {
    /// `init` was called without any submitted sample.
    #[error("empty corpus: {raw_images} raw images, {label_images} label images")]
    EmptyCorpus {
        /// Number of raw images in the corpus.
        raw_images: usize,
        /// Number of label images in the corpus.
        label_images: usize,
    },

    /// The raw and label collections disagree in length.
    #[error("corpus count mismatch: {raw_images} raw images, {label_images} label images")]
    CountMismatch {
        /// Number of raw images in the corpus.
        raw_images: usize,
        /// Number of label images in the corpus.
        label_images: usize,
    },

    /// A submitted label stack cannot be canonicalized.
    #[error("malformed label stack for sample {index}: {reason}")]
    MalformedLabelStack {
        /// Position of the sample in submission order.
        index: usize,
        /// What is wrong with the stack.
        reason: String,
    },

    /// An image does not have the size shared by the rest of the corpus.
    #[error(
        "image {index} has size {actual_width}x{actual_height}, expected {expected_width}x{expected_height}"
    )]
    ImageSizeMismatch {
        /// Position of the sample in submission order.
        index: usize,
        /// Expected width in pixels.
        expected_width: usize,
        /// Expected height in pixels.
        expected_height: usize,
        /// Actual width in pixels.
        actual_width: usize,
        /// Actual height in pixels.
        actual_height: usize,
    },

    /// No patch of the configured size fits into the corpus images.
    #[error("patch size {patch_size} does not fit into {width}x{height} label images")]
    PatchTooLarge {
        /// Configured patch size.
        patch_size: usize,
        /// Label image width.
        width: usize,
        /// Label image height.
        height: usize,
    },

    /// A canonical label index is not below the configured label count.
    #[error("sample {index} contains label {label}, but only {nr_labels} labels are configured")]
    LabelOutOfRange {
        /// Position of the sample in submission order.
        index: usize,
        /// Offending label index.
        label: usize,
        /// Configured number of labels.
        nr_labels: usize,
    },

    /// The biased sampling distribution carries no usable weight.
    #[error("degenerate sampling distribution: {reason}")]
    DegenerateDistribution {
        /// Why the distribution cannot be sampled.
        reason: String,
    },

    /// A configuration value can never be satisfied.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// A pixel buffer does not match the requested dimensions.
    #[error("data length mismatch: expected {expected}, got {actual}")]
    DataLengthMismatch {
        /// Expected number of values.
        expected: usize,
        /// Actual number of values.
        actual: usize,
    },
}

impl CorpusError {
    /// Whether this error reports an inconsistent corpus rather than a bad
    /// configuration or buffer.
    pub const fn is_corpus_inconsistency(&self) -> bool {
        matches!(
            self,
            Self::EmptyCorpus { .. }
                | Self::CountMismatch { .. }
                | Self::MalformedLabelStack { .. }
                | Self::ImageSizeMismatch { .. }
                | Self::PatchTooLarge { .. }
                | Self::LabelOutOfRange { .. }
                | Self::DegenerateDistribution { .. }
        )
    }
}

/// A specialized `Result` type for corpus operations.
pub type CorpusResult<T> = Result<T, CorpusError>;
