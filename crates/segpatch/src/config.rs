//! Configuration structures for ingestion, sampling and augmentation.
//!
//! Every option defaults to "disabled" with a neutral value, so
//! `AugmentationConfig::new()` describes plain uniform patch sampling without
//! any augmentation.

use burn::prelude::*;

use crate::error::{CorpusError, CorpusResult};

/// Top-level configuration of a patch source.
#[derive(Config, Debug)]
pub struct SamplerConfig {
    /// Edge length of the square label patch in pixels.
    pub patch_size: usize,
    /// Number of label classes before consolidation.
    pub nr_labels: usize,
    /// Seed for the random generator driving patch draws.
    #[config(default = 42)]
    pub seed: u64,
    /// Ingestion and augmentation options.
    #[config(default = "AugmentationConfig::new()")]
    pub augmentation: AugmentationConfig,
}

/// Ingestion, sampling and augmentation options.
#[derive(Config, Debug)]
pub struct AugmentationConfig {
    /// Pixels trimmed from the augmented raw and label patches.
    #[config(default = "CropConfig::new()")]
    pub crop: CropConfig,
    /// Reflect border added around every raw image at ingestion.
    #[config(default = "BorderConfig::new()")]
    pub border: BorderConfig,
    /// Min-max normalize raw images to `[-1, 1]` at ingestion.
    #[config(default = false)]
    pub normalize: bool,
    /// Randomly mirror patches along one or both axes.
    #[config(default = false)]
    pub mirror: bool,
    /// Randomly rotate patches about their center.
    #[config(default = false)]
    pub rotate: bool,
    /// Randomly scale patches by one of 0.5, 1.0, 1.5 or 2.0.
    #[config(default = false)]
    pub scale: bool,
    /// Randomly translate patches by up to 10 pixels.
    #[config(default = false)]
    pub translate: bool,
    /// Gaussian blur of the raw patch.
    #[config(default = "BlurConfig::new()")]
    pub blur: BlurConfig,
    /// Contrast limited adaptive histogram equalization at ingestion.
    #[config(default = "ClaheConfig::new()")]
    pub clahe: ClaheConfig,
    /// Remapping of fine-grained labels to output classes.
    #[config(default = "LabelConsolidateConfig::new()")]
    pub label_consolidate: LabelConsolidateConfig,
    /// Label histogram equalization of the sampling distribution.
    #[config(default = "HistEqConfig::new()")]
    pub hist_eq: HistEqConfig,
}

/// Crop applied after the geometric augmentation.
#[derive(Config, Debug)]
pub struct CropConfig {
    /// Pixels removed from the raw patch extent.
    #[config(default = 0)]
    pub image_crop: usize,
    /// Pixels removed from the label patch extent.
    #[config(default = 0)]
    pub label_crop: usize,
}

/// Border padding of raw images.
#[derive(Config, Debug)]
pub struct BorderConfig {
    #[config(default = false)]
    pub enabled: bool,
    /// Border width added on every side.
    #[config(default = 0)]
    pub size: usize,
}

/// Gaussian blur with a sigma drawn per patch from `N(mean, std)`.
#[derive(Config, Debug)]
pub struct BlurConfig {
    #[config(default = false)]
    pub enabled: bool,
    #[config(default = 0.0)]
    pub mean: f32,
    #[config(default = 0.1)]
    pub std: f32,
    /// Odd kernel edge length.
    #[config(default = 5)]
    pub kernel_size: usize,
}

/// Contrast limited adaptive histogram equalization.
#[derive(Config, Debug)]
pub struct ClaheConfig {
    #[config(default = false)]
    pub enabled: bool,
    /// Clip limit relative to a uniform tile histogram.
    #[config(default = 4.0)]
    pub clip_limit: f32,
}

/// Label consolidation lookup table.
#[derive(Config, Debug)]
pub struct LabelConsolidateConfig {
    #[config(default = false)]
    pub enabled: bool,
    /// Output class for every input class, indexed by input class.
    #[config(default = "Vec::new()")]
    pub mapping: Vec<i32>,
}

/// Label histogram equalization.
#[derive(Config, Debug)]
pub struct HistEqConfig {
    #[config(default = false)]
    pub enabled: bool,
    /// Bias patch offsets towards patches rich in rare labels.
    #[config(default = false)]
    pub patch_prior: bool,
    /// Stochastically mask pixels of frequent labels.
    #[config(default = false)]
    pub pixel_mask: bool,
    /// Per-label divisor applied to the label frequency before masking.
    #[config(default = "Vec::new()")]
    pub label_boost: Vec<f32>,
}

impl AugmentationConfig {
    /// Whether any of the geometric transforms is enabled.
    pub const fn has_geometric_transform(&self) -> bool {
        self.scale || self.rotate || self.translate
    }

    /// Border width actually added to raw images.
    pub const fn border_size(&self) -> usize {
        if self.border.enabled {
            self.border.size
        } else {
            0
        }
    }

    /// Whether pixel masking is active; it requires histogram equalization.
    pub const fn masks_pixels(&self) -> bool {
        self.hist_eq.enabled && self.hist_eq.pixel_mask
    }

    /// Whether patch offsets are drawn from the weighted distribution.
    pub const fn uses_patch_prior(&self) -> bool {
        self.hist_eq.enabled && self.hist_eq.patch_prior
    }

    /// Validate values that no fallback can repair.
    ///
    /// # Errors
    ///
    /// Returns `Err(CorpusError::InvalidConfiguration)` for an even or zero
    /// blur kernel, a negative or non-finite blur deviation, a non-positive
    /// CLAHE clip limit, a negative consolidation target or a non-positive
    /// label boost.
    pub fn validate(&self) -> CorpusResult<()> {
        if self.blur.enabled {
            if self.blur.kernel_size == 0 || self.blur.kernel_size % 2 == 0 {
                return Err(CorpusError::InvalidConfiguration {
                    reason: format!(
                        "blur kernel size must be odd and > 0, got {}",
                        self.blur.kernel_size
                    ),
                });
            }
            if !self.blur.mean.is_finite() || !self.blur.std.is_finite() || self.blur.std < 0.0 {
                return Err(CorpusError::InvalidConfiguration {
                    reason: format!(
                        "blur sigma distribution N({}, {}) is not valid",
                        self.blur.mean, self.blur.std
                    ),
                });
            }
        }

        if self.clahe.enabled && !(self.clahe.clip_limit > 0.0) {
            return Err(CorpusError::InvalidConfiguration {
                reason: format!(
                    "CLAHE clip limit must be > 0, got {}",
                    self.clahe.clip_limit
                ),
            });
        }

        if self.label_consolidate.enabled {
            if let Some((label, target)) = self
                .label_consolidate
                .mapping
                .iter()
                .enumerate()
                .find(|(_, target)| **target < 0)
            {
                return Err(CorpusError::InvalidConfiguration {
                    reason: format!("label {label} is consolidated to negative class {target}"),
                });
            }
        }

        if self.hist_eq.enabled {
            if let Some((label, boost)) = self
                .hist_eq
                .label_boost
                .iter()
                .enumerate()
                .find(|(_, boost)| !(**boost > 0.0) || !boost.is_finite())
            {
                return Err(CorpusError::InvalidConfiguration {
                    reason: format!("label boost for label {label} must be > 0, got {boost}"),
                });
            }
        }

        Ok(())
    }

    /// Validate the crop against the patch extents it is applied to.
    ///
    /// # Errors
    ///
    /// Returns `Err(CorpusError::InvalidConfiguration)` if a crop would leave
    /// an empty raw or label patch.
    pub fn validate_crop(&self, patch_size: usize) -> CorpusResult<()> {
        let raw_extent = patch_size + 2 * self.border_size();
        if self.crop.image_crop >= raw_extent {
            return Err(CorpusError::InvalidConfiguration {
                reason: format!(
                    "image crop {} leaves no pixels of a {raw_extent} pixel raw patch",
                    self.crop.image_crop
                ),
            });
        }
        if self.crop.label_crop >= patch_size {
            return Err(CorpusError::InvalidConfiguration {
                reason: format!(
                    "label crop {} leaves no pixels of a {patch_size} pixel label patch",
                    self.crop.label_crop
                ),
            });
        }
        Ok(())
    }

    /// Label boosts padded to `nr_labels` entries.
    ///
    /// Missing boosts default to `1.0`; surplus boosts are ignored.
    pub fn label_boost(&self, nr_labels: usize) -> Vec<f32> {
        let configured = &self.hist_eq.label_boost;
        if configured.len() != nr_labels {
            tracing::info!(
                configured = configured.len(),
                nr_labels,
                "label boost count differs from label count, missing boosts default to 1.0"
            );
        }
        (0..nr_labels)
            .map(|label| configured.get(label).copied().unwrap_or(1.0))
            .collect()
    }

    /// Consolidation table padded to `nr_labels` entries.
    ///
    /// Labels without an entry map to themselves.
    pub fn consolidation_mapping(&self, nr_labels: usize) -> Vec<i32> {
        let configured = &self.label_consolidate.mapping;
        if configured.len() < nr_labels {
            tracing::info!(
                configured = configured.len(),
                nr_labels,
                "consolidation table is shorter than the label count, missing labels map to themselves"
            );
        }
        let len = configured.len().max(nr_labels);
        (0..len)
            .map(|label| configured.get(label).copied().unwrap_or(label as i32))
            .collect()
    }
}
