//! Out-of-range index mapping for border extrapolation.

/// How indices outside an image are folded back inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMode {
    /// Mirror including the edge pixel: `cba|abcd|dcb`.
    Reflect,
    /// Mirror excluding the edge pixel: `dcb|abcd|cba`.
    Reflect101,
}

/// Map a possibly out-of-range index into `[0, len)`.
///
/// `len` must be non-zero.
pub fn map_index(i: isize, len: usize, mode: BorderMode) -> usize {
    debug_assert!(len > 0, "cannot map an index into an empty axis");

    match mode {
        BorderMode::Reflect => {
            let period = (2 * len) as isize;
            let r = i.rem_euclid(period) as usize;
            if r < len {
                r
            } else {
                2 * len - 1 - r
            }
        }
        BorderMode::Reflect101 => {
            if len == 1 {
                return 0;
            }
            let period = (2 * len - 2) as isize;
            let r = i.rem_euclid(period) as usize;
            if r < len {
                r
            } else {
                (2 * len - 2) - r
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{map_index, BorderMode};

    #[rstest]
    #[case(-4, 3)]
    #[case(-3, 2)]
    #[case(-1, 0)]
    #[case(0, 0)]
    #[case(4, 4)]
    #[case(5, 4)]
    #[case(6, 3)]
    #[case(9, 0)] // past the mirrored copy
    fn reflect_repeats_edge_pixel(#[case] index: isize, #[case] expected: usize) {
        assert_eq!(map_index(index, 5, BorderMode::Reflect), expected);
    }

    #[rstest]
    #[case(-7, 1)]
    #[case(-4, 4)]
    #[case(-1, 1)]
    #[case(0, 0)]
    #[case(4, 4)]
    #[case(5, 3)]
    #[case(7, 1)]
    fn reflect101_skips_edge_pixel(#[case] index: isize, #[case] expected: usize) {
        assert_eq!(map_index(index, 5, BorderMode::Reflect101), expected);
    }

    #[test]
    fn single_pixel_axis() {
        for i in -3..=3 {
            assert_eq!(map_index(i, 1, BorderMode::Reflect), 0);
            assert_eq!(map_index(i, 1, BorderMode::Reflect101), 0);
        }
    }
}
