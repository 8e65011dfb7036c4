//! Affine transforms of patches.

use std::ops::Mul;

use rayon::prelude::*;

use crate::{
    border::{map_index, BorderMode},
    image::Image,
};

/// Homogeneous 3x3 affine matrix acting on `(x, y, 1)` pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine2 {
    m: [[f64; 3]; 3],
}

impl Affine2 {
    pub const IDENTITY: Self = Self {
        m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    };

    /// Build from the two upper rows.
    pub const fn from_rows(row0: [f64; 3], row1: [f64; 3]) -> Self {
        Self {
            m: [row0, row1, [0.0, 0.0, 1.0]],
        }
    }

    /// Isotropic scaling about the origin.
    pub const fn scale(factor: f64) -> Self {
        Self::from_rows([factor, 0.0, 0.0], [0.0, factor, 0.0])
    }

    pub const fn translate(tx: f64, ty: f64) -> Self {
        Self::from_rows([1.0, 0.0, tx], [0.0, 1.0, ty])
    }

    /// Counter-clockwise rotation by `degrees` about `(cx, cy)`, in image
    /// coordinates with the y axis pointing down.
    pub fn rotation_about(cx: f64, cy: f64, degrees: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self::from_rows(
            [cos, sin, (1.0 - cos) * cx - sin * cy],
            [-sin, cos, sin * cx + (1.0 - cos) * cy],
        )
    }

    pub const fn rows(&self) -> [[f64; 3]; 2] {
        [self.m[0], self.m[1]]
    }

    /// Map a point.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.m;
        (
            m[0][0] * x + m[0][1] * y + m[0][2],
            m[1][0] * x + m[1][1] * y + m[1][2],
        )
    }

    /// Inverse transform, or `None` if the linear part is singular.
    pub fn inverse(&self) -> Option<Self> {
        let m = &self.m;
        let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
        if det.abs() < 1e-12 {
            return None;
        }

        let a = m[1][1] / det;
        let b = -m[0][1] / det;
        let c = -m[1][0] / det;
        let d = m[0][0] / det;
        Some(Self::from_rows(
            [a, b, -(a * m[0][2] + b * m[1][2])],
            [c, d, -(c * m[0][2] + d * m[1][2])],
        ))
    }
}

impl Default for Affine2 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Affine2 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let mut m = [[0.0; 3]; 3];
        for (i, row) in m.iter_mut().enumerate() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = (0..3).map(|k| self.m[i][k] * rhs.m[k][j]).sum();
            }
        }
        Self { m }
    }
}

/// Snap a scale factor drawn from `[0.5, 2.5)` onto the supported factors.
///
/// `[0.5, 1.0)` becomes 0.5, `[1.5, 2.0)` becomes 1.5 and `[2.0, 2.5)`
/// becomes 2.0; everything else, including `[1.0, 1.5)`, becomes 1.0.
pub fn snap_scale(drawn: f32) -> f64 {
    match drawn {
        s if (0.5..1.0).contains(&s) => 0.5,
        s if (1.5..2.0).contains(&s) => 1.5,
        s if (2.0..2.5).contains(&s) => 2.0,
        _ => 1.0,
    }
}

/// Resampling kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Bilinear; for intensities.
    Linear,
    /// Nearest neighbour; for class indices.
    Nearest,
}

/// Warp `src` by `transform` into an image of the same size.
///
/// Every destination pixel samples the source at the inverse-mapped
/// position; positions outside the source are reflected (`Reflect101`).
/// A singular transform leaves the image unchanged.
pub fn warp_affine(src: &Image, transform: &Affine2, interpolation: Interpolation) -> Image {
    let Some(inverse) = transform.inverse() else {
        tracing::debug!(?transform, "singular transform, patch left unwarped");
        return src.clone();
    };

    let (width, height, channels) = (src.width(), src.height(), src.channels());
    let mut out = Image::new(width, height, channels);
    if width == 0 || height == 0 {
        return out;
    }

    let stride = out.stride();
    out.data_mut()
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, pixel) in row.chunks_exact_mut(channels).enumerate() {
                let (sx, sy) = inverse.apply(x as f64, y as f64);
                match interpolation {
                    Interpolation::Nearest => {
                        let ix = map_index((sx + 0.5).floor() as isize, width, BorderMode::Reflect101);
                        let iy = map_index((sy + 0.5).floor() as isize, height, BorderMode::Reflect101);
                        pixel.copy_from_slice(src.pixel(ix, iy));
                    }
                    Interpolation::Linear => sample_bilinear(src, sx, sy, pixel),
                }
            }
        });
    out
}

fn sample_bilinear(src: &Image, x: f64, y: f64, out: &mut [f32]) {
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = ((x - x0) as f32, (y - y0) as f32);

    let map_x = |i: isize| map_index(i, src.width(), BorderMode::Reflect101);
    let map_y = |i: isize| map_index(i, src.height(), BorderMode::Reflect101);
    let (xa, xb) = (map_x(x0 as isize), map_x(x0 as isize + 1));
    let (ya, yb) = (map_y(y0 as isize), map_y(y0 as isize + 1));

    let (p00, p10) = (src.pixel(xa, ya), src.pixel(xb, ya));
    let (p01, p11) = (src.pixel(xa, yb), src.pixel(xb, yb));
    for (c, value) in out.iter_mut().enumerate() {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        *value = top * (1.0 - fy) + bottom * fy;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(1.2, 1.0)]
    #[case(1.7, 1.5)]
    #[case(2.6, 1.0)] // out of range
    #[case(0.5, 0.5)]
    #[case(0.99, 0.5)]
    #[case(2.0, 2.0)]
    #[case(2.49, 2.0)]
    fn scale_snaps_to_half_steps(#[case] drawn: f32, #[case] expected: f64) {
        assert_relative_eq!(snap_scale(drawn), expected);
    }

    #[test]
    fn rotation_keeps_center_fixed() {
        let rotation = Affine2::rotation_about(16.0, 16.0, 37.0);
        let (px, py) = rotation.apply(16.0, 16.0);
        assert_relative_eq!(px, 16.0, epsilon = 1e-9);
        assert_relative_eq!(py, 16.0, epsilon = 1e-9);
    }

    #[test]
    fn quarter_turn_maps_axes() {
        let rotation = Affine2::rotation_about(0.0, 0.0, 90.0);
        let (px, py) = rotation.apply(1.0, 0.0);
        assert_relative_eq!(px, 0.0, epsilon = 1e-9);
        assert_relative_eq!(py, -1.0, epsilon = 1e-9);
        let (px, py) = rotation.apply(0.0, 1.0);
        assert_relative_eq!(px, 1.0, epsilon = 1e-9);
        assert_relative_eq!(py, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn product_applies_right_factor_first() {
        let composite = Affine2::translate(3.0, -2.0) * Affine2::scale(2.0);
        let (px, py) = composite.apply(1.0, 1.0);
        assert_relative_eq!(px, 5.0, epsilon = 1e-9);
        assert_relative_eq!(py, 0.0, epsilon = 1e-9);

        let composite = Affine2::scale(2.0) * Affine2::translate(3.0, -2.0);
        let (px, py) = composite.apply(1.0, 1.0);
        assert_relative_eq!(px, 8.0, epsilon = 1e-9);
        assert_relative_eq!(py, -2.0, epsilon = 1e-9);
    }

    #[test]
    fn inverse_undoes_transform() {
        let transform = Affine2::rotation_about(4.0, 4.0, 123.0) * Affine2::scale(1.5)
            * Affine2::translate(-7.0, 7.0);
        let inverse = transform.inverse().unwrap();

        let (x, y) = transform.apply(2.5, -1.0);
        let (px, py) = inverse.apply(x, y);
        assert_relative_eq!(px, 2.5, epsilon = 1e-9);
        assert_relative_eq!(py, -1.0, epsilon = 1e-9);
        assert_eq!(Affine2::scale(0.0).inverse(), None);
    }

    #[test]
    fn identity_warp_is_exact() {
        let src = Image::from_fn(6, 5, |x, y| (x * 10 + y) as f32);

        assert_eq!(warp_affine(&src, &Affine2::IDENTITY, Interpolation::Linear), src);
        assert_eq!(warp_affine(&src, &Affine2::IDENTITY, Interpolation::Nearest), src);
    }

    #[test]
    fn nearest_rotation_moves_pixels() {
        let mut src = Image::new(5, 5, 1);
        src.set(0, 1, 0, 1.0);

        let rotation = Affine2::rotation_about(2.0, 2.0, 90.0);
        let warped = warp_affine(&src, &rotation, Interpolation::Nearest);

        assert!((warped.get(1, 4, 0) - 1.0).abs() < f32::EPSILON);
        assert!((warped.data().iter().sum::<f32>() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn translation_reflects_at_the_border() {
        let src = Image::from_fn(4, 1, |x, _| x as f32);
        let warped = warp_affine(&src, &Affine2::translate(2.0, 0.0), Interpolation::Nearest);

        assert_eq!(warped.data(), &[2.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn linear_interpolates_between_pixels() {
        let src = Image::from_fn(4, 1, |x, _| x as f32 * 2.0);
        let warped = warp_affine(&src, &Affine2::translate(-0.5, 0.0), Interpolation::Linear);

        assert_relative_eq!(warped.get(0, 0, 0), 1.0, epsilon = 1e-6);
        assert_relative_eq!(warped.get(2, 0, 0), 5.0, epsilon = 1e-6);
    }

    #[test]
    fn nearest_never_invents_values() {
        let src = Image::from_fn(9, 9, |x, y| ((x + 2 * y) % 3) as f32);
        let transform =
            Affine2::rotation_about(4.0, 4.0, 33.0) * Affine2::scale(1.5) * Affine2::translate(3.0, 3.0);

        let warped = warp_affine(&src, &transform, Interpolation::Nearest);
        assert!(warped.data().iter().all(|v| [0.0, 1.0, 2.0].contains(v)));
    }
}
