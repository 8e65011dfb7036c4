//! Random augmentation of drawn patches
//!
//! Steps, in order, each one optional:
//! 1. Mirror along a random axis combination
//! 2. Scale, rotation and translation, composed in random order and applied
//!    in a single resampling pass. The composite is drawn in label
//!    coordinates; with a border, the raw patch is warped by the same
//!    composite shifted by the border, so raw scaling is about the border
//!    corner rather than the raw origin.
//! 3. Crop to the output size
//! 4. Gaussian blur of the raw patch
//! 5. Stochastic masking of label pixels
//! 6. Label consolidation

use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;

use crate::{
    affine::{snap_scale, warp_affine, Affine2, Interpolation},
    config::AugmentationConfig,
    error::{CorpusError, CorpusResult},
    filter::gaussian_blur,
    image::{Flip, Image},
    sampler::Patch,
};

/// Label value of pixels excluded from the loss.
pub const IGNORE_LABEL: f32 = -1.0;

/// Largest translation in pixels, in either direction.
pub const MAX_TRANSLATION: i32 = 10;

/// Applies the configured augmentations to patches
#[derive(Debug, Clone)]
pub struct PatchAugmentor {
    config: AugmentationConfig,
    border: usize,
    blur_sigma: Option<Normal<f32>>,
    mask_probability: Option<Vec<f32>>,
    mapping: Option<Vec<i32>>,
}

impl PatchAugmentor {
    /// Create an augmentor
    ///
    /// # Arguments
    /// * `config` - Augmentation options
    /// * `nr_labels` - Number of classes before consolidation
    /// * `mask_probability` - Per-class keep probability; masking is skipped
    ///   without it
    ///
    /// # Errors
    /// Returns `Err(CorpusError::InvalidConfiguration)` if the blur sigma
    /// distribution is invalid.
    pub fn new(
        config: AugmentationConfig,
        nr_labels: usize,
        mask_probability: Option<Vec<f32>>,
    ) -> CorpusResult<Self> {
        let blur_sigma = if config.blur.enabled {
            let normal = Normal::new(config.blur.mean, config.blur.std).map_err(|e| {
                CorpusError::InvalidConfiguration {
                    reason: format!("blur sigma distribution: {e}"),
                }
            })?;
            Some(normal)
        } else {
            None
        };

        let mask_probability = if config.masks_pixels() {
            mask_probability
        } else {
            None
        };

        let mapping = config
            .label_consolidate
            .enabled
            .then(|| config.consolidation_mapping(nr_labels));

        Ok(Self {
            border: config.border_size(),
            config,
            blur_sigma,
            mask_probability,
            mapping,
        })
    }

    pub const fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Augment one patch
    ///
    /// The label patch must be the raw patch minus the border on every side.
    pub fn augment<R: Rng + ?Sized>(&self, patch: Patch, rng: &mut R) -> Patch {
        let Patch {
            mut image,
            mut label,
        } = patch;

        if self.config.mirror {
            let flip = Flip::from_code(rng.random_range(0..=2) - 1);
            image = image.flip(flip);
            label = label.flip(flip);
        }

        if let Some(transform) = self.draw_transform(label.width(), label.height(), rng) {
            let border = self.border as f64;
            let raw_transform =
                Affine2::translate(border, border) * transform * Affine2::translate(-border, -border);
            image = warp_affine(&image, &raw_transform, Interpolation::Linear);
            label = warp_affine(&label, &transform, Interpolation::Nearest);
        }

        let image_size = image.width().saturating_sub(self.config.crop.image_crop);
        let label_size = label.width().saturating_sub(self.config.crop.label_crop);
        if image_size != image.width() {
            image = image.crop(0, 0, image_size, image_size);
        }
        if label_size != label.width() {
            label = label.crop(0, 0, label_size, label_size);
        }

        if let Some(normal) = &self.blur_sigma {
            let sigma = normal.sample(rng);
            image = gaussian_blur(&image, self.config.blur.kernel_size, f64::from(sigma));
        }

        if let Some(probability) = &self.mask_probability {
            mask_labels(&mut label, probability, rng.random());
        }

        if let Some(mapping) = &self.mapping {
            consolidate_labels(&mut label, mapping);
        }

        Patch { image, label }
    }

    /// Composite of the enabled geometric transforms in label coordinates
    fn draw_transform<R: Rng + ?Sized>(
        &self,
        width: usize,
        height: usize,
        rng: &mut R,
    ) -> Option<Affine2> {
        if !self.config.has_geometric_transform() {
            return None;
        }

        Some(
            self.draw_geometry(rng)
                .into_iter()
                .fold(Affine2::IDENTITY, |composite, transform| {
                    composite * transform.matrix(width, height)
                }),
        )
    }

    /// Draw every enabled transform, in random order.
    pub(crate) fn draw_geometry<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<GeometricTransform> {
        let mut transforms = Vec::with_capacity(3);
        if self.config.scale {
            transforms.push(GeometricTransform::Scale(snap_scale(
                rng.random_range(0.5..2.5),
            )));
        }
        if self.config.rotate {
            let angle: i32 = rng.random_range(0..=359);
            transforms.push(GeometricTransform::Rotate(f64::from(angle)));
        }
        if self.config.translate {
            let shift: i32 = rng.random_range(-MAX_TRANSLATION..=MAX_TRANSLATION);
            transforms.push(GeometricTransform::Translate(f64::from(shift)));
        }

        transforms.shuffle(rng);
        transforms
    }
}

/// A drawn geometric transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum GeometricTransform {
    /// Isotropic scale about the origin
    Scale(f64),
    /// Rotation in degrees about the patch center
    Rotate(f64),
    /// Equal shift along both axes
    Translate(f64),
}

impl GeometricTransform {
    fn matrix(self, width: usize, height: usize) -> Affine2 {
        match self {
            Self::Scale(factor) => Affine2::scale(factor),
            Self::Rotate(degrees) => {
                Affine2::rotation_about((width / 2) as f64, (height / 2) as f64, degrees)
            }
            Self::Translate(shift) => Affine2::translate(shift, shift),
        }
    }
}

/// Replace each label pixel by [`IGNORE_LABEL`] unless a uniform draw is at
/// most the keep probability of its class.
///
/// Every row draws from its own generator seeded with `seed + row`, so the
/// result does not depend on thread scheduling.
pub fn mask_labels(label: &mut Image, keep_probability: &[f32], seed: u64) {
    let stride = label.stride();
    if stride == 0 {
        return;
    }

    label
        .data_mut()
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row)| {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(y as u64));
            for value in row {
                if *value < 0.0 {
                    continue;
                }
                debug_assert!((*value as usize) < keep_probability.len());
                let keep = keep_probability.get(*value as usize).copied().unwrap_or(1.0);
                if keep < rng.random::<f32>() {
                    *value = IGNORE_LABEL;
                }
            }
        });
}

/// Map every label through `mapping`; negative labels become
/// [`IGNORE_LABEL`].
pub fn consolidate_labels(label: &mut Image, mapping: &[i32]) {
    let stride = label.stride();
    if stride == 0 {
        return;
    }

    label.data_mut().par_chunks_mut(stride).for_each(|row| {
        for value in row {
            *value = if *value < 0.0 {
                IGNORE_LABEL
            } else {
                debug_assert!((*value as usize) < mapping.len());
                mapping
                    .get(*value as usize)
                    .map_or(*value, |&mapped| mapped as f32)
            };
        }
    });
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;

    use super::*;
    use crate::config::{BlurConfig, BorderConfig, CropConfig, HistEqConfig, LabelConsolidateConfig};

    fn patch(size: usize, border: usize) -> Patch {
        let raw = size + 2 * border;
        Patch {
            image: Image::from_fn(raw, raw, |x, y| (y * raw + x) as f32),
            label: Image::from_fn(size, size, |x, y| ((x + y) % 3) as f32),
        }
    }

    #[test]
    fn disabled_pipeline_is_identity() {
        let augmentor = PatchAugmentor::new(AugmentationConfig::new(), 3, None).unwrap();
        let input = patch(8, 0);

        let output = augmentor.augment(input.clone(), &mut StdRng::seed_from_u64(0));
        assert_eq!(output, input);
    }

    #[test]
    fn mirror_flips_raw_and_label_alike() {
        let augmentor =
            PatchAugmentor::new(AugmentationConfig::new().with_mirror(true), 3, None).unwrap();
        let input = patch(6, 0);
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..20 {
            let output = augmentor.augment(input.clone(), &mut rng);
            let flip = [Flip::Vertical, Flip::Horizontal, Flip::Both]
                .into_iter()
                .find(|&flip| input.image.flip(flip) == output.image)
                .expect("raw patch was not mirrored");
            assert_eq!(output.label, input.label.flip(flip));
        }
    }

    #[test]
    fn geometric_transforms_keep_sizes_and_classes() {
        let config = AugmentationConfig::new()
            .with_scale(true)
            .with_rotate(true)
            .with_translate(true);
        let augmentor = PatchAugmentor::new(config, 3, None).unwrap();
        let mut rng = StdRng::seed_from_u64(5);

        for _ in 0..20 {
            let output = augmentor.augment(patch(16, 0), &mut rng);
            assert_eq!((output.image.width(), output.image.height()), (16, 16));
            assert_eq!((output.label.width(), output.label.height()), (16, 16));
            assert!(output.label.data().iter().all(|v| [0.0, 1.0, 2.0].contains(v)));
        }
    }

    fn snapped_scales() -> [f64; 4] {
        [0.5, 1.0, 1.5, 2.0]
    }

    #[test]
    fn scale_is_snapped_and_isotropic() {
        let augmentor =
            PatchAugmentor::new(AugmentationConfig::new().with_scale(true), 3, None).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen = Vec::new();

        for _ in 0..200 {
            let [row0, row1] = augmentor.draw_transform(16, 16, &mut rng).unwrap().rows();
            let factor = row0[0];
            assert!(snapped_scales().contains(&factor), "unsnapped scale {factor}");
            assert_relative_eq!(row1[1], factor);
            assert_eq!([row0[1], row0[2], row1[0], row1[2]], [0.0; 4]);
            if !seen.contains(&factor) {
                seen.push(factor);
            }
        }
        assert_eq!(seen.len(), 4, "scales drawn: {seen:?}");
    }

    #[test]
    fn translation_is_integral_and_bounded() {
        let augmentor =
            PatchAugmentor::new(AugmentationConfig::new().with_translate(true), 3, None).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let mut seen = Vec::new();

        for _ in 0..200 {
            let [row0, row1] = augmentor.draw_transform(16, 16, &mut rng).unwrap().rows();
            assert_eq!([row0[0], row0[1], row1[0], row1[1]], [1.0, 0.0, 0.0, 1.0]);

            let shift = row0[2];
            assert_eq!(row1[2], shift);
            assert_eq!(shift.fract(), 0.0);
            assert!(shift.abs() <= f64::from(MAX_TRANSLATION));
            if !seen.contains(&shift) {
                seen.push(shift);
            }
        }
        assert!(seen.len() > 10, "shifts drawn: {seen:?}");
    }

    #[test]
    fn transform_order_is_shuffled() {
        let config = AugmentationConfig::new().with_scale(true).with_translate(true);
        let augmentor = PatchAugmentor::new(config, 3, None).unwrap();
        let (mut scale_first, mut translate_first) = (0, 0);

        for seed in 0..100 {
            let drawn = augmentor.draw_geometry(&mut StdRng::seed_from_u64(seed));
            assert_eq!(drawn.len(), 2);
            match drawn[0] {
                GeometricTransform::Scale(_) => scale_first += 1,
                GeometricTransform::Translate(_) => translate_first += 1,
                GeometricTransform::Rotate(_) => panic!("rotation is disabled"),
            }
        }
        assert!(scale_first > 0 && translate_first > 0);
    }

    #[test]
    fn composite_applies_last_drawn_transform_first() {
        let config = AugmentationConfig::new().with_scale(true).with_translate(true);
        let augmentor = PatchAugmentor::new(config, 3, None).unwrap();

        for seed in 0..20 {
            let drawn = augmentor.draw_geometry(&mut StdRng::seed_from_u64(seed));
            let composite = augmentor
                .draw_transform(16, 16, &mut StdRng::seed_from_u64(seed))
                .unwrap();
            let expected = drawn[0].matrix(16, 16) * drawn[1].matrix(16, 16);
            assert_eq!(composite.rows(), expected.rows());
        }
    }

    #[test]
    fn crop_trims_bottom_right() {
        let config = AugmentationConfig::new()
            .with_crop(CropConfig::new().with_image_crop(4).with_label_crop(2));
        let augmentor = PatchAugmentor::new(config, 3, None).unwrap();
        let input = patch(8, 2);

        let output = augmentor.augment(input.clone(), &mut StdRng::seed_from_u64(0));

        assert_eq!(output.image, input.image.crop(0, 0, 8, 8));
        assert_eq!(output.label, input.label.crop(0, 0, 6, 6));
    }

    #[test]
    fn blur_touches_only_the_raw_patch() {
        let config = AugmentationConfig::new()
            .with_blur(BlurConfig::new().with_enabled(true).with_mean(1.5).with_std(0.0));
        let augmentor = PatchAugmentor::new(config, 3, None).unwrap();
        let input = patch(8, 0);

        let output = augmentor.augment(input.clone(), &mut StdRng::seed_from_u64(0));

        assert_ne!(output.image, input.image);
        assert_eq!(output.label, input.label);
    }

    #[test]
    fn masking_requires_histogram_equalization() {
        let probability = Some(vec![0.0; 3]);
        let augmentor = PatchAugmentor::new(AugmentationConfig::new(), 3, probability.clone()).unwrap();
        let input = patch(8, 0);
        assert_eq!(augmentor.augment(input.clone(), &mut StdRng::seed_from_u64(0)), input);

        let config = AugmentationConfig::new()
            .with_hist_eq(HistEqConfig::new().with_enabled(true).with_pixel_mask(true));
        let augmentor = PatchAugmentor::new(config, 3, Some(vec![0.0, 1.0, 1.0])).unwrap();
        let output = augmentor.augment(input.clone(), &mut StdRng::seed_from_u64(0));

        for (out, original) in output.label.data().iter().zip(input.label.data()) {
            if *original == 0.0 {
                assert!((*out - IGNORE_LABEL).abs() < f32::EPSILON);
            } else {
                assert!((*out - *original).abs() < f32::EPSILON);
            }
        }
    }

    #[test]
    fn masking_is_reproducible_per_seed() {
        let input = Image::from_fn(32, 32, |x, y| ((x * y) % 4) as f32);
        let probability = [0.2, 0.5, 0.8, 1.0];

        let mut a = input.clone();
        let mut b = input.clone();
        mask_labels(&mut a, &probability, 99);
        mask_labels(&mut b, &probability, 99);

        assert_eq!(a, b);
        let masked = a.data().iter().filter(|&&v| v == IGNORE_LABEL).count();
        assert!(masked > 0 && masked < a.data().len());
        assert!(a
            .data()
            .iter()
            .zip(input.data())
            .all(|(&out, &original)| out == IGNORE_LABEL || out == original));
    }

    #[test]
    fn consolidation_maps_and_preserves_sentinel() {
        let mut label = Image::from_vec(4, 1, 1, vec![0.0, 1.0, 2.0, IGNORE_LABEL]).unwrap();
        consolidate_labels(&mut label, &[0, 1, 1]);

        assert_eq!(label.data(), &[0.0, 1.0, 1.0, IGNORE_LABEL]);

        let once = label.clone();
        consolidate_labels(&mut label, &[0, 1, 1]);
        assert_eq!(label, once);
    }

    #[test]
    fn consolidation_runs_last() {
        let config = AugmentationConfig::new().with_label_consolidate(
            LabelConsolidateConfig::new()
                .with_enabled(true)
                .with_mapping(vec![0, 0]),
        );
        let augmentor = PatchAugmentor::new(config, 3, None).unwrap();

        let output = augmentor.augment(patch(4, 0), &mut StdRng::seed_from_u64(0));
        assert!(output.label.data().iter().all(|&v| v == 0.0 || v == 2.0));
    }

    #[test]
    fn border_aligned_rotation_keeps_label_under_raw() {
        let config = AugmentationConfig::new()
            .with_rotate(true)
            .with_border(BorderConfig::new().with_enabled(true).with_size(3));
        let augmentor = PatchAugmentor::new(config, 3, None).unwrap();
        let size = 9;
        let raw = size + 6;
        let input = Patch {
            image: Image::from_fn(raw, raw, |x, y| (y * raw + x) as f32),
            label: Image::from_fn(size, size, |x, y| ((y + 3) * raw + x + 3) as f32),
        };

        let mut rng = StdRng::seed_from_u64(21);
        for _ in 0..10 {
            let output = augmentor.augment(input.clone(), &mut rng);
            let center = output.label.get(size / 2, size / 2, 0);
            assert!((output.image.get(size / 2 + 3, size / 2 + 3, 0) - center).abs() < 1e-3);
        }
    }
}
