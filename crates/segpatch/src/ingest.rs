//! Conversion of decoded samples into corpus storage.

use image::{DynamicImage, GrayImage};

use crate::{
    border::BorderMode,
    clahe::equalize_clahe,
    config::AugmentationConfig,
    image::Image,
};

/// Convert a decoded raw image into a float corpus image.
///
/// Grey images (with or without alpha) become one channel, everything else
/// three. Each 8-bit channel is optionally equalized, the result is scaled to
/// `[0, 1]`, optionally min-max normalized to `[-1, 1]` and optionally
/// reflect-padded by the configured border.
pub fn prepare_raw(raw: &DynamicImage, config: &AugmentationConfig) -> Image {
    let mut planes = split_channels(raw);

    if config.clahe.enabled {
        planes = planes
            .iter()
            .map(|plane| equalize_clahe(plane, config.clahe.clip_limit))
            .collect();
    }

    let mut image = merge_channels(&planes);

    if config.normalize {
        normalize_min_max(&mut image, -1.0, 1.0);
    }

    if config.border.enabled && config.border.size > 0 {
        image = image.pad(config.border.size, BorderMode::Reflect);
    }

    image
}

fn split_channels(raw: &DynamicImage) -> Vec<GrayImage> {
    match raw.color().channel_count() {
        1 | 2 => vec![raw.to_luma8()],
        _ => {
            let rgb = raw.to_rgb8();
            (0..3)
                .map(|c| GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                    image::Luma([rgb.get_pixel(x, y)[c]])
                }))
                .collect()
        }
    }
}

fn merge_channels(planes: &[GrayImage]) -> Image {
    let channels = planes.len();
    let (width, height) = planes
        .first()
        .map(|p| (p.width() as usize, p.height() as usize))
        .unwrap_or((0, 0));

    let mut image = Image::new(width, height, channels);
    let data = image.data_mut();
    for (c, plane) in planes.iter().enumerate() {
        for (i, &v) in plane.as_raw().iter().enumerate() {
            data[i * channels + c] = f32::from(v) / 255.0;
        }
    }
    image
}

/// Linearly map the value range of `image` onto `[lo, hi]`.
///
/// A constant image maps to `lo`.
pub fn normalize_min_max(image: &mut Image, lo: f32, hi: f32) {
    let (min, max) = image.min_max();
    let range = max - min;
    let scale = if range > f32::EPSILON {
        (hi - lo) / range
    } else {
        0.0
    };
    for v in image.data_mut() {
        *v = (*v - min) * scale + lo;
    }
}

/// Whether a stack of `planes` label planes should get a complement plane.
///
/// Multi-plane stacks that cover fewer than `nr_labels` classes (and are not
/// a binary problem) leave unlabelled pixels without a class of their own.
pub const fn needs_complement(planes: usize, nr_labels: usize) -> bool {
    planes > 1 && nr_labels != 2 && planes < nr_labels
}

/// Plane that is set wherever none of `planes` is: `255 - sum`, saturating.
pub fn complement_plane(planes: &[GrayImage]) -> Option<GrayImage> {
    let first = planes.first()?;
    let mut complement = GrayImage::from_pixel(first.width(), first.height(), image::Luma([255]));
    for plane in planes {
        for (dst, src) in complement.pixels_mut().zip(plane.pixels()) {
            dst[0] = dst[0].saturating_sub(src[0]);
        }
    }
    Some(complement)
}

#[cfg(test)]
mod tests {
    use image::{ImageBuffer, Luma, Rgb, RgbImage};

    use super::*;
    use crate::config::{BorderConfig, ClaheConfig};

    fn rgb_gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 10) as u8, (y * 10) as u8, 255])
        }))
    }

    #[test]
    fn color_input_becomes_three_unit_channels() {
        let image = prepare_raw(&rgb_gradient(4, 3), &AugmentationConfig::new());

        assert_eq!((image.width(), image.height(), image.channels()), (4, 3, 3));
        assert!((image.get(2, 1, 0) - 20.0 / 255.0).abs() < 1e-6);
        assert!((image.get(2, 1, 1) - 10.0 / 255.0).abs() < 1e-6);
        assert!((image.get(2, 1, 2) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn grey_input_becomes_one_channel() {
        let raw = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(5, 5, Luma([51u8])));
        let image = prepare_raw(&raw, &AugmentationConfig::new());

        assert_eq!(image.channels(), 1);
        assert!((image.get(0, 0, 0) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn normalization_spans_minus_one_to_one() {
        let config = AugmentationConfig::new().with_normalize(true);
        let image = prepare_raw(&rgb_gradient(4, 3), &config);

        let (min, max) = image.min_max();
        assert!((min + 1.0).abs() < 1e-6);
        assert!((max - 1.0).abs() < 1e-6);
    }

    #[test]
    fn constant_image_normalizes_to_lower_bound() {
        let mut image = Image::from_fn(3, 3, |_, _| 0.7);
        normalize_min_max(&mut image, -1.0, 1.0);
        assert!(image.data().iter().all(|&v| (v + 1.0).abs() < 1e-6));
    }

    #[test]
    fn border_pads_every_side() {
        let config = AugmentationConfig::new()
            .with_border(BorderConfig::new().with_enabled(true).with_size(3));
        let image = prepare_raw(&rgb_gradient(4, 3), &config);

        assert_eq!((image.width(), image.height()), (10, 9));
        assert_eq!(image.pixel(3, 3), image.pixel(2, 2));
    }

    #[test]
    fn clahe_runs_per_channel() {
        let config =
            AugmentationConfig::new().with_clahe(ClaheConfig::new().with_enabled(true));
        let image = prepare_raw(&rgb_gradient(16, 16), &config);

        assert_eq!(image.channels(), 3);
        assert!(image.data().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn complement_covers_unlabelled_pixels() {
        let a = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 255 } else { 0 }]));
        let b = GrayImage::from_fn(2, 1, |_, _| Luma([0]));

        let complement = complement_plane(&[a, b]).unwrap();
        assert_eq!(complement.as_raw(), &vec![0, 255]);
    }

    #[test]
    fn complement_rule() {
        assert!(needs_complement(2, 3));
        assert!(!needs_complement(1, 3));
        assert!(!needs_complement(2, 2));
        assert!(!needs_complement(3, 3));
    }
}
