//! Float image container shared by raw images, label images and patches.

use crate::{
    border::{map_index, BorderMode},
    error::{CorpusError, CorpusResult},
};

/// Row-major, channel-interleaved `f32` image.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: usize,
    height: usize,
    channels: usize,
    data: Vec<f32>,
}

/// Mirror axis, following the usual flip-code convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flip {
    /// Reverse the row order (flip code `0`).
    Vertical,
    /// Reverse the column order (flip code `> 0`).
    Horizontal,
    /// Reverse rows and columns (flip code `< 0`).
    Both,
}

impl Flip {
    /// Decode a flip code.
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Vertical,
            c if c > 0 => Self::Horizontal,
            _ => Self::Both,
        }
    }
}

impl Image {
    /// Create a zero-filled image.
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![0.0; width * height * channels],
        }
    }

    /// Wrap an existing buffer.
    ///
    /// # Errors
    ///
    /// Returns `Err(CorpusError::DataLengthMismatch)` if `data` does not hold
    /// exactly `width * height * channels` values.
    pub fn from_vec(
        width: usize,
        height: usize,
        channels: usize,
        data: Vec<f32>,
    ) -> CorpusResult<Self> {
        let expected = width * height * channels;
        if data.len() != expected {
            return Err(CorpusError::DataLengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Build a single-channel image from a per-pixel function of `(x, y)`.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            channels: 1,
            data,
        }
    }

    pub const fn width(&self) -> usize {
        self.width
    }

    pub const fn height(&self) -> usize {
        self.height
    }

    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Values per row.
    pub const fn stride(&self) -> usize {
        self.width * self.channels
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<f32> {
        self.data
    }

    /// Value of channel `c` at `(x, y)`.
    pub fn get(&self, x: usize, y: usize, c: usize) -> f32 {
        debug_assert!(x < self.width && y < self.height && c < self.channels);
        self.data[(y * self.width + x) * self.channels + c]
    }

    /// Set channel `c` at `(x, y)`.
    pub fn set(&mut self, x: usize, y: usize, c: usize, value: f32) {
        debug_assert!(x < self.width && y < self.height && c < self.channels);
        self.data[(y * self.width + x) * self.channels + c] = value;
    }

    /// All channels of the pixel at `(x, y)`.
    pub fn pixel(&self, x: usize, y: usize) -> &[f32] {
        let start = (y * self.width + x) * self.channels;
        &self.data[start..start + self.channels]
    }

    /// One row of interleaved values.
    pub fn row(&self, y: usize) -> &[f32] {
        let stride = self.stride();
        &self.data[y * stride..(y + 1) * stride]
    }

    /// Copy the `width x height` region whose top-left corner is `(x, y)`.
    pub fn crop(&self, x: usize, y: usize, width: usize, height: usize) -> Self {
        assert!(
            x + width <= self.width && y + height <= self.height,
            "crop {width}x{height}+{x}+{y} exceeds {}x{} image",
            self.width,
            self.height
        );

        let mut data = Vec::with_capacity(width * height * self.channels);
        for row in y..y + height {
            let start = (row * self.width + x) * self.channels;
            data.extend_from_slice(&self.data[start..start + width * self.channels]);
        }
        Self {
            width,
            height,
            channels: self.channels,
            data,
        }
    }

    /// Mirror the image.
    pub fn flip(&self, flip: Flip) -> Self {
        let reverse_rows = matches!(flip, Flip::Vertical | Flip::Both);
        let reverse_cols = matches!(flip, Flip::Horizontal | Flip::Both);

        let mut out = Self::new(self.width, self.height, self.channels);
        for y in 0..self.height {
            let src_y = if reverse_rows { self.height - 1 - y } else { y };
            for x in 0..self.width {
                let src_x = if reverse_cols { self.width - 1 - x } else { x };
                let dst = (y * self.width + x) * self.channels;
                out.data[dst..dst + self.channels].copy_from_slice(self.pixel(src_x, src_y));
            }
        }
        out
    }

    /// Add `border` pixels on every side, extrapolated with `mode`.
    pub fn pad(&self, border: usize, mode: BorderMode) -> Self {
        if border == 0 {
            return self.clone();
        }

        let width = self.width + 2 * border;
        let height = self.height + 2 * border;
        let mut out = Self::new(width, height, self.channels);
        for y in 0..height {
            let src_y = map_index(y as isize - border as isize, self.height, mode);
            for x in 0..width {
                let src_x = map_index(x as isize - border as isize, self.width, mode);
                let dst = (y * width + x) * self.channels;
                out.data[dst..dst + self.channels].copy_from_slice(self.pixel(src_x, src_y));
            }
        }
        out
    }

    /// Smallest and largest value over all channels.
    pub fn min_max(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }
}
