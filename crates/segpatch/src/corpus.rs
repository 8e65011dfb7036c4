//! Corpus lifecycle: ingestion, initialization and patch drawing.
//!
//! A [`CorpusBuilder`] collects samples. [`CorpusBuilder::init`] consumes it,
//! canonicalizes the labels, validates the corpus and builds the sampling
//! distribution, producing an immutable [`PatchCorpus`] that can be shared
//! between threads and sampled from concurrently.

use image::{DynamicImage, GrayImage};
use rand::Rng;
use rayon::prelude::*;

use crate::{
    augmentation::PatchAugmentor,
    canonical::{canonicalize, LabelMode},
    config::{AugmentationConfig, SamplerConfig},
    error::{CorpusError, CorpusResult},
    image::Image,
    ingest::prepare_raw,
    sampler::{extract_patch, OffsetGrid, Patch, PatchLocation},
    weights::{label_frequencies, mask_probability, patch_prior, LabelStatistics, SamplingDistribution},
};

/// Collects samples until the corpus is initialized.
#[derive(Debug, Clone)]
pub struct CorpusBuilder {
    config: SamplerConfig,
    raw_images: Vec<Image>,
    label_stacks: Vec<Vec<GrayImage>>,
    image_ids: Vec<u64>,
}

impl CorpusBuilder {
    /// Builder with default augmentation options.
    pub fn new(patch_size: usize, nr_labels: usize) -> Self {
        Self::from_config(SamplerConfig::new(patch_size, nr_labels))
    }

    pub const fn from_config(config: SamplerConfig) -> Self {
        Self {
            config,
            raw_images: Vec::new(),
            label_stacks: Vec::new(),
            image_ids: Vec::new(),
        }
    }

    /// Replace the augmentation options.
    ///
    /// Ingestion options (CLAHE, normalization, border) only affect samples
    /// submitted afterwards.
    ///
    /// # Errors
    ///
    /// Returns `Err(CorpusError::InvalidConfiguration)` if the options can
    /// never be satisfied; the previous options are kept.
    pub fn configure(&mut self, augmentation: AugmentationConfig) -> CorpusResult<()> {
        augmentation.validate()?;
        if !self.raw_images.is_empty() {
            tracing::warn!(
                submitted = self.raw_images.len(),
                "reconfiguring after submission, ingestion options do not apply to earlier samples"
            );
        }
        self.config.augmentation = augmentation;
        Ok(())
    }

    pub const fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Ingest one decoded sample.
    ///
    /// The raw image is converted right away; the label planes are kept as
    /// submitted and canonicalized by [`init`](Self::init), where malformed
    /// input is reported.
    pub fn submit(&mut self, raw: &DynamicImage, id: u64, label_planes: Vec<GrayImage>) {
        let image = prepare_raw(raw, &self.config.augmentation);
        tracing::debug!(
            id,
            width = image.width(),
            height = image.height(),
            channels = image.channels(),
            planes = label_planes.len(),
            "submitted sample"
        );

        self.raw_images.push(image);
        self.image_ids.push(id);
        self.label_stacks.push(label_planes);
    }

    pub fn raw_images(&self) -> &[Image] {
        &self.raw_images
    }

    pub fn label_stacks(&self) -> &[Vec<GrayImage>] {
        &self.label_stacks
    }

    pub fn image_ids(&self) -> &[u64] {
        &self.image_ids
    }

    pub fn len(&self) -> usize {
        self.raw_images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw_images.is_empty()
    }

    /// Drop every submitted sample, keeping the configuration.
    pub fn clear(&mut self) {
        self.raw_images.clear();
        self.label_stacks.clear();
        self.image_ids.clear();
    }

    /// Canonicalize labels, validate the corpus and build the sampling
    /// distribution.
    ///
    /// # Errors
    ///
    /// Returns a corpus inconsistency error if the corpus is empty, its
    /// collections disagree in length, a label stack is malformed, image
    /// sizes differ, the patch does not fit, a label exceeds the label count
    /// or the weighted distribution carries no weight. Returns
    /// `Err(CorpusError::InvalidConfiguration)` for unusable options.
    pub fn init(self) -> CorpusResult<PatchCorpus> {
        let Self {
            config,
            raw_images,
            label_stacks,
            image_ids,
        } = self;

        if raw_images.is_empty() || label_stacks.is_empty() {
            return Err(CorpusError::EmptyCorpus {
                raw_images: raw_images.len(),
                label_images: label_stacks.len(),
            });
        }
        if raw_images.len() != label_stacks.len() || raw_images.len() != image_ids.len() {
            return Err(CorpusError::CountMismatch {
                raw_images: raw_images.len(),
                label_images: label_stacks.len(),
            });
        }

        let augmentation = &config.augmentation;
        augmentation.validate()?;
        augmentation.validate_crop(config.patch_size)?;

        let (raw_width, raw_height) = (raw_images[0].width(), raw_images[0].height());
        for (index, image) in raw_images.iter().enumerate() {
            check_size(index, image, raw_width, raw_height)?;
        }

        let canonical = canonicalize(&label_stacks)?;
        drop(label_stacks);

        let border = augmentation.border_size();
        let label_width = raw_width.saturating_sub(2 * border);
        let label_height = raw_height.saturating_sub(2 * border);
        for (index, label) in canonical.images.iter().enumerate() {
            check_size(index, label, label_width, label_height)?;
        }
        check_label_range(&canonical.images, config.nr_labels)?;

        let grid = OffsetGrid::new(
            canonical.images.len(),
            label_width,
            label_height,
            config.patch_size,
        )?;
        tracing::info!(
            images = grid.images(),
            label_width,
            label_height,
            patch_size = config.patch_size,
            border,
            offsets = grid.len(),
            "corpus geometry"
        );

        let (distribution, statistics) =
            build_distribution(&canonical.images, &grid, &config)?;

        let augmentor = PatchAugmentor::new(
            augmentation.clone(),
            config.nr_labels,
            statistics
                .as_ref()
                .and_then(|statistics| statistics.mask_probability.clone()),
        )?;

        Ok(PatchCorpus {
            config,
            raw_images,
            label_images: canonical.images,
            image_ids,
            label_mode: canonical.mode,
            grid,
            distribution,
            statistics,
            augmentor,
        })
    }
}

fn check_size(index: usize, image: &Image, width: usize, height: usize) -> CorpusResult<()> {
    if image.width() != width || image.height() != height {
        return Err(CorpusError::ImageSizeMismatch {
            index,
            expected_width: width,
            expected_height: height,
            actual_width: image.width(),
            actual_height: image.height(),
        });
    }
    Ok(())
}

fn check_label_range(labels: &[Image], nr_labels: usize) -> CorpusResult<()> {
    let offending = labels.par_iter().enumerate().find_map_first(|(index, label)| {
        label
            .data()
            .iter()
            .find(|&&value| value as usize >= nr_labels)
            .map(|&value| (index, value as usize))
    });

    match offending {
        Some((index, label)) => Err(CorpusError::LabelOutOfRange {
            index,
            label,
            nr_labels,
        }),
        None => Ok(()),
    }
}

fn build_distribution(
    labels: &[Image],
    grid: &OffsetGrid,
    config: &SamplerConfig,
) -> CorpusResult<(SamplingDistribution, Option<LabelStatistics>)> {
    let augmentation = &config.augmentation;
    if !augmentation.hist_eq.enabled {
        return Ok((SamplingDistribution::Uniform { len: grid.len() }, None));
    }

    let mut frequencies = label_frequencies(labels, config.nr_labels, config.patch_size)?;

    let distribution = if augmentation.uses_patch_prior() {
        let prior = patch_prior(labels, grid, config.patch_size, &frequencies)?;
        frequencies = prior.frequencies;
        SamplingDistribution::Weighted {
            cumulative: prior.cumulative,
        }
    } else {
        SamplingDistribution::Uniform { len: grid.len() }
    };

    let mask_probability = augmentation.masks_pixels().then(|| {
        mask_probability(&frequencies, &augmentation.label_boost(config.nr_labels))
    });

    Ok((
        distribution,
        Some(LabelStatistics {
            frequencies,
            mask_probability,
        }),
    ))
}

/// Initialized, immutable corpus.
#[derive(Debug, Clone)]
pub struct PatchCorpus {
    config: SamplerConfig,
    raw_images: Vec<Image>,
    label_images: Vec<Image>,
    image_ids: Vec<u64>,
    label_mode: LabelMode,
    grid: OffsetGrid,
    distribution: SamplingDistribution,
    statistics: Option<LabelStatistics>,
    augmentor: PatchAugmentor,
}

impl PatchCorpus {
    pub const fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn raw_images(&self) -> &[Image] {
        &self.raw_images
    }

    /// Canonical label images, one class index per pixel.
    pub fn label_images(&self) -> &[Image] {
        &self.label_images
    }

    pub fn image_ids(&self) -> &[u64] {
        &self.image_ids
    }

    pub const fn label_mode(&self) -> LabelMode {
        self.label_mode
    }

    pub const fn grid(&self) -> &OffsetGrid {
        &self.grid
    }

    pub const fn distribution(&self) -> &SamplingDistribution {
        &self.distribution
    }

    /// Label statistics, computed when histogram equalization is enabled.
    pub const fn statistics(&self) -> Option<&LabelStatistics> {
        self.statistics.as_ref()
    }

    pub fn len(&self) -> usize {
        self.raw_images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw_images.is_empty()
    }

    /// Channels of every raw patch.
    pub fn channels(&self) -> usize {
        self.raw_images.first().map_or(0, Image::channels)
    }

    /// Edge length of augmented raw patches.
    pub fn image_patch_size(&self) -> usize {
        let augmentation = &self.config.augmentation;
        self.config.patch_size + 2 * augmentation.border_size() - augmentation.crop.image_crop
    }

    /// Edge length of augmented label patches.
    pub fn label_patch_size(&self) -> usize {
        self.config.patch_size - self.config.augmentation.crop.label_crop
    }

    /// Draw a patch location from the sampling distribution.
    pub fn draw_location<R: Rng + ?Sized>(&self, rng: &mut R) -> PatchLocation {
        self.grid.decode(self.distribution.sample(rng))
    }

    /// Copy the unaugmented patch at `location`.
    pub fn extract(&self, location: PatchLocation) -> Patch {
        extract_patch(
            &self.raw_images[location.image],
            &self.label_images[location.image],
            location,
            self.config.patch_size,
            self.config.augmentation.border_size(),
        )
    }

    /// Draw, extract and augment one patch.
    pub fn draw_patch<R: Rng + ?Sized>(&self, rng: &mut R) -> Patch {
        let location = self.draw_location(rng);
        tracing::debug!(
            image = location.image,
            id = self.image_ids[location.image],
            x = location.x,
            y = location.y,
            "drawing patch"
        );
        self.augmentor.augment(self.extract(location), rng)
    }

    /// Discard all samples and return an empty builder with the same
    /// configuration.
    pub fn reset(self) -> CorpusBuilder {
        CorpusBuilder::from_config(self.config)
    }
}
