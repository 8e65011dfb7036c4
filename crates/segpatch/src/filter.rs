//! Gaussian smoothing of float images.

use rayon::prelude::*;

use crate::{
    border::{map_index, BorderMode},
    image::Image,
};

/// Sigma implied by a kernel size when no positive sigma is given.
pub fn sigma_for_kernel(ksize: usize) -> f64 {
    0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Binomial kernels used for small sizes when no positive sigma is given.
const SMALL_KERNELS: [&[f32]; 4] = [
    &[1.0],
    &[0.25, 0.5, 0.25],
    &[0.0625, 0.25, 0.375, 0.25, 0.0625],
    &[0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125],
];

/// Normalized 1D Gaussian kernel, matching OpenCV's `getGaussianKernel`
///
/// # Arguments
/// * `ksize` - Kernel length, odd and > 0
/// * `sigma` - Standard deviation; for values `<= 0` kernels up to 7 taps
///   come from a fixed binomial table, larger ones derive sigma from `ksize`
///
/// # Returns
/// `ksize` weights summing to one
pub fn gaussian_kernel_1d(ksize: usize, sigma: f64) -> Vec<f32> {
    debug_assert!(ksize % 2 == 1, "kernel size must be odd");

    if sigma <= 0.0 {
        if let Some(kernel) = SMALL_KERNELS.get(ksize / 2).filter(|k| k.len() == ksize) {
            return kernel.to_vec();
        }
    }

    let sigma = if sigma > 0.0 {
        sigma
    } else {
        sigma_for_kernel(ksize)
    };
    let center = (ksize as f64 - 1.0) / 2.0;
    let scale = -0.5 / (sigma * sigma);

    let weights: Vec<f64> = (0..ksize)
        .map(|i| {
            let d = i as f64 - center;
            (scale * d * d).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.iter().map(|w| (w / sum) as f32).collect()
}

/// Gaussian blur with a square kernel
///
/// Separable horizontal then vertical pass per channel, with `Reflect101`
/// border extrapolation.
///
/// # Arguments
/// * `image` - Input image, any channel count
/// * `ksize` - Kernel edge length, odd and > 0
/// * `sigma` - Standard deviation in both directions
///
/// # Returns
/// Blurred image of the same size
pub fn gaussian_blur(image: &Image, ksize: usize, sigma: f64) -> Image {
    if ksize <= 1 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    let kernel = gaussian_kernel_1d(ksize, sigma);
    let radius = (ksize / 2) as isize;
    let (width, height, channels) = (image.width(), image.height(), image.channels());
    let stride = image.stride();

    let mut horizontal = Image::new(width, height, channels);
    horizontal
        .data_mut()
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row)| {
            let src = image.row(y);
            for x in 0..width {
                for c in 0..channels {
                    row[x * channels + c] = kernel
                        .iter()
                        .enumerate()
                        .map(|(k, w)| {
                            let sx = map_index(x as isize + k as isize - radius, width, BorderMode::Reflect101);
                            w * src[sx * channels + c]
                        })
                        .sum();
                }
            }
        });

    let mut out = Image::new(width, height, channels);
    out.data_mut()
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row)| {
            for (k, w) in kernel.iter().enumerate() {
                let sy = map_index(y as isize + k as isize - radius, height, BorderMode::Reflect101);
                for (dst, src) in row.iter_mut().zip(horizontal.row(sy)) {
                    *dst += w * src;
                }
            }
        });
    out
}
