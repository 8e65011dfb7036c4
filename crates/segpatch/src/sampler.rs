//! Patch locations, their flat encoding and extraction from the corpus.

use crate::{
    error::{CorpusError, CorpusResult},
    image::Image,
};

/// Top-left corner of a label patch inside one corpus image.
///
/// The matching raw region starts at the same coordinates because raw images
/// carry the border on every side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchLocation {
    pub image: usize,
    pub x: usize,
    pub y: usize,
}

/// Every valid patch offset of a corpus, enumerated image by image, row by
/// row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetGrid {
    images: usize,
    positions_x: usize,
    positions_y: usize,
}

impl OffsetGrid {
    /// Grid of `patch_size` patches over `images` label images of the given
    /// size.
    ///
    /// # Errors
    ///
    /// Returns `Err(CorpusError::PatchTooLarge)` if the patch is empty or
    /// larger than the label images in either dimension.
    pub fn new(
        images: usize,
        label_width: usize,
        label_height: usize,
        patch_size: usize,
    ) -> CorpusResult<Self> {
        if patch_size == 0 || patch_size > label_width || patch_size > label_height {
            return Err(CorpusError::PatchTooLarge {
                patch_size,
                width: label_width,
                height: label_height,
            });
        }

        Ok(Self {
            images,
            positions_x: label_width - patch_size + 1,
            positions_y: label_height - patch_size + 1,
        })
    }

    pub const fn images(&self) -> usize {
        self.images
    }

    pub const fn positions_x(&self) -> usize {
        self.positions_x
    }

    pub const fn positions_y(&self) -> usize {
        self.positions_y
    }

    /// Offsets per image.
    pub const fn per_image(&self) -> usize {
        self.positions_x * self.positions_y
    }

    /// Offsets in the whole corpus.
    pub const fn len(&self) -> usize {
        self.images * self.per_image()
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Location encoded by a flat offset index.
    pub fn decode(&self, index: usize) -> PatchLocation {
        debug_assert!(index < self.len(), "offset {index} outside {} offsets", self.len());

        let per_image = self.per_image();
        let image = index / per_image;
        let within = index % per_image;
        PatchLocation {
            image,
            x: within % self.positions_x,
            y: within / self.positions_x,
        }
    }

    /// Flat offset index of a location.
    pub fn encode(&self, location: PatchLocation) -> usize {
        debug_assert!(location.x < self.positions_x && location.y < self.positions_y);

        location.image * self.per_image() + location.y * self.positions_x + location.x
    }
}

/// Smallest index whose cumulative weight reaches `offset`.
///
/// Offsets beyond the total weight are clamped to the last index. The slice
/// must be non-decreasing.
pub fn lower_bound(cumulative: &[f64], offset: f64) -> usize {
    cumulative
        .partition_point(|&weight| weight < offset)
        .min(cumulative.len().saturating_sub(1))
}

/// Raw and label patch pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub image: Image,
    pub label: Image,
}

/// Copy the raw and label regions at `location`.
///
/// The raw region is `patch_size + 2 * border` pixels wide, the label region
/// `patch_size`.
pub fn extract_patch(
    raw: &Image,
    label: &Image,
    location: PatchLocation,
    patch_size: usize,
    border: usize,
) -> Patch {
    let raw_size = patch_size + 2 * border;
    Patch {
        image: raw.crop(location.x, location.y, raw_size, raw_size),
        label: label.crop(location.x, location.y, patch_size, patch_size),
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    #[test]
    fn grid_counts_valid_offsets() {
        let grid = OffsetGrid::new(2, 64, 48, 32).unwrap();

        assert_eq!(grid.positions_x(), 33);
        assert_eq!(grid.positions_y(), 17);
        assert_eq!(grid.per_image(), 33 * 17);
        assert_eq!(grid.len(), 2 * 33 * 17);
    }

    #[test]
    fn patch_filling_the_image_has_one_offset() {
        let grid = OffsetGrid::new(3, 16, 16, 16).unwrap();
        assert_eq!(grid.per_image(), 1);
        assert_eq!(grid.decode(2), PatchLocation { image: 2, x: 0, y: 0 });
    }

    #[test]
    fn oversized_patch_is_rejected() {
        assert_eq!(
            OffsetGrid::new(1, 16, 8, 9),
            Err(CorpusError::PatchTooLarge {
                patch_size: 9,
                width: 16,
                height: 8
            })
        );
        assert!(OffsetGrid::new(1, 16, 8, 0).is_err());
    }

    #[test]
    fn decode_inverts_encode() {
        let grid = OffsetGrid::new(3, 10, 7, 4).unwrap();
        for index in 0..grid.len() {
            assert_eq!(grid.encode(grid.decode(index)), index);
        }

        assert_eq!(
            grid.decode(grid.per_image() + 2 * grid.positions_x() + 5),
            PatchLocation { image: 1, x: 5, y: 2 }
        );
    }

    #[test]
    fn lower_bound_hits_exact_weights() {
        let cumulative = [1.0, 3.0, 3.0, 6.0];

        assert_eq!(lower_bound(&cumulative, 0.0), 0);
        assert_eq!(lower_bound(&cumulative, 1.0), 0);
        assert_eq!(lower_bound(&cumulative, 1.5), 1);
        assert_eq!(lower_bound(&cumulative, 3.0), 1);
        assert_eq!(lower_bound(&cumulative, 3.1), 3);
        assert_eq!(lower_bound(&cumulative, 6.0), 3);
        assert_eq!(lower_bound(&cumulative, 7.0), 3);
    }

    #[test]
    fn lower_bound_property_holds_for_random_offsets() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut total = 0.0;
        let cumulative: Vec<f64> = (0..257)
            .map(|_| {
                total += rng.random_range(0.0..2.0);
                total
            })
            .collect();

        for _ in 0..1000 {
            let offset = rng.random_range(0.0..=total);
            let index = lower_bound(&cumulative, offset);

            assert!(index < cumulative.len());
            assert!(offset <= cumulative[index]);
            if index > 0 {
                assert!(cumulative[index - 1] < offset);
            }
        }
    }

    #[test]
    fn extraction_copies_border_region() {
        let raw = Image::from_fn(8, 8, |x, y| (y * 8 + x) as f32);
        let label = Image::from_fn(4, 4, |x, y| (y * 4 + x) as f32);
        let location = PatchLocation { image: 0, x: 1, y: 2 };

        let patch = extract_patch(&raw, &label, location, 2, 2);

        assert_eq!((patch.image.width(), patch.image.height()), (6, 6));
        assert_eq!((patch.label.width(), patch.label.height()), (2, 2));
        assert!((patch.image.get(0, 0, 0) - 17.0).abs() < f32::EPSILON);
        assert_eq!(patch.label.data(), &[9.0, 10.0, 13.0, 14.0]);
    }
}
