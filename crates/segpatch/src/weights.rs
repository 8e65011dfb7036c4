//! Label histogram equalization of the patch sampling distribution.
//!
//! Three quantities are derived from the canonical label images, once per
//! corpus:
//!
//! 1. Label frequencies, counted with a per-pixel weight that models how many
//!    patches cover the pixel, so image borders are not overrepresented.
//! 2. Optionally, a weight per patch offset. A patch weighs more the more of
//!    its pixels belong to rare labels; offsets are then drawn proportionally
//!    to their weight through a cumulative distribution. The label
//!    frequencies are re-estimated under that biased sampling.
//! 3. Optionally, a per-label probability of keeping a label pixel, inversely
//!    proportional to the (boosted) label frequency.
//!
//! Per-image work runs in parallel. The prefix sum over all offsets runs
//! after every weight is known.

use rand::Rng;
use rayon::prelude::*;

use crate::{
    error::{CorpusError, CorpusResult},
    image::Image,
    sampler::{lower_bound, OffsetGrid},
};

/// Label frequencies and pixel masking probabilities of a corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelStatistics {
    /// Relative frequency per label, summing to one.
    pub frequencies: Vec<f64>,
    /// Probability of keeping a pixel of each label, if masking is enabled.
    pub mask_probability: Option<Vec<f32>>,
}

/// Distribution over flat patch offsets.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingDistribution {
    /// Every offset is equally likely.
    Uniform { len: usize },
    /// Offset `i` is drawn with probability proportional to
    /// `cumulative[i] - cumulative[i - 1]`.
    Weighted { cumulative: Vec<f64> },
}

impl SamplingDistribution {
    /// Number of offsets the distribution ranges over.
    pub fn len(&self) -> usize {
        match self {
            Self::Uniform { len } => *len,
            Self::Weighted { cumulative } => cumulative.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upper end of the range scalar draws are taken from.
    pub fn total_weight(&self) -> f64 {
        match self {
            Self::Uniform { len } => *len as f64,
            Self::Weighted { cumulative } => cumulative.last().copied().unwrap_or(0.0),
        }
    }

    /// Offset index a scalar draw in `[0, total_weight)` falls on.
    pub fn locate(&self, draw: f64) -> usize {
        match self {
            Self::Uniform { len } => (draw.max(0.0) as usize).min(len.saturating_sub(1)),
            Self::Weighted { cumulative } => lower_bound(cumulative, draw),
        }
    }

    /// Draw one offset index.
    ///
    /// The distribution must not be empty.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        match self {
            Self::Uniform { len } => rng.random_range(0..*len),
            Self::Weighted { .. } => self.locate(rng.random_range(0.0..self.total_weight())),
        }
    }
}

/// Weight of a pixel at `(x, y)` in the frequency count.
///
/// Pixels closer than a patch size to the border are covered by fewer
/// patches and count less.
pub fn coverage_weight(x: usize, y: usize, width: usize, height: usize, patch_size: usize) -> u64 {
    let wx = x.min(width - x).min(patch_size);
    let wy = y.min(height - y).min(patch_size);
    (wx * wy) as u64
}

/// Coverage-weighted relative label frequencies over all label images.
///
/// # Errors
///
/// Returns `Err(CorpusError::DegenerateDistribution)` if no pixel carries any
/// weight, which happens when every image is a single pixel wide or high.
pub fn label_frequencies(
    labels: &[Image],
    nr_labels: usize,
    patch_size: usize,
) -> CorpusResult<Vec<f64>> {
    let counts = labels
        .par_iter()
        .map(|label| {
            let (width, height) = (label.width(), label.height());
            let mut counts = vec![0u64; nr_labels];
            for y in 0..height {
                for (x, &value) in label.row(y).iter().enumerate() {
                    debug_assert!((value as usize) < nr_labels, "label {value} out of range");
                    counts[value as usize] += coverage_weight(x, y, width, height, patch_size);
                }
            }
            counts
        })
        .reduce(|| vec![0u64; nr_labels], add_counts);

    let total: u64 = counts.iter().sum();
    if total == 0 {
        return Err(CorpusError::DegenerateDistribution {
            reason: "no label pixel carries frequency weight".to_string(),
        });
    }

    let frequencies: Vec<f64> = counts
        .iter()
        .map(|&count| count as f64 / total as f64)
        .collect();
    for (label, frequency) in frequencies.iter().enumerate() {
        tracing::info!(label, frequency, "label frequency");
    }
    Ok(frequencies)
}

fn add_counts<T: Copy + std::ops::AddAssign>(mut acc: Vec<T>, other: Vec<T>) -> Vec<T> {
    for (a, b) in acc.iter_mut().zip(other) {
        *a += b;
    }
    acc
}

/// Patch offset weights and the label frequencies they imply.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchPrior {
    /// Non-decreasing prefix sum of the per-offset weights.
    pub cumulative: Vec<f64>,
    /// Label frequencies re-estimated under the weighted offset distribution.
    pub frequencies: Vec<f64>,
}

/// Weight of a patch with the given per-label pixel counts.
///
/// Labels with zero frequency contribute nothing.
pub fn patch_weight(counts: &[u32], frequencies: &[f64], area: f64) -> f64 {
    counts
        .iter()
        .zip(frequencies)
        .filter(|(_, &frequency)| frequency > 0.0)
        .map(|(&count, &frequency)| f64::from(count) / area / frequency)
        .sum()
}

/// Weight every patch offset of the grid and build the cumulative
/// distribution.
///
/// Label counts are maintained with a sliding window: recomputed at the
/// start of each row, then updated by the departing and entering column.
///
/// # Errors
///
/// Returns `Err(CorpusError::DegenerateDistribution)` if the total weight is
/// zero or not finite.
pub fn patch_prior(
    labels: &[Image],
    grid: &OffsetGrid,
    patch_size: usize,
    frequencies: &[f64],
) -> CorpusResult<PatchPrior> {
    let nr_labels = frequencies.len();
    let area = (patch_size * patch_size) as f64;
    let mut weights = vec![0.0f64; grid.len()];

    let weighted_counts = weights
        .par_chunks_mut(grid.per_image())
        .zip(labels.par_iter())
        .map(|(weights, label)| {
            let mut weighted = vec![0.0f64; nr_labels];
            let mut counts = vec![0u32; nr_labels];
            let class = |x: usize, y: usize| label.get(x, y, 0) as usize;

            for y in 0..grid.positions_y() {
                for x in 0..grid.positions_x() {
                    if x == 0 {
                        counts.fill(0);
                        for py in y..y + patch_size {
                            for px in 0..patch_size {
                                counts[class(px, py)] += 1;
                            }
                        }
                    } else {
                        for py in y..y + patch_size {
                            counts[class(x - 1, py)] -= 1;
                            counts[class(x + patch_size - 1, py)] += 1;
                        }
                    }

                    let weight = patch_weight(&counts, frequencies, area);
                    for (acc, &count) in weighted.iter_mut().zip(&counts) {
                        *acc += weight * f64::from(count);
                    }
                    weights[y * grid.positions_x() + x] = weight;
                }
            }
            weighted
        })
        .reduce(|| vec![0.0f64; nr_labels], add_counts);

    prefix_sum(&mut weights);

    let total = weights.last().copied().unwrap_or(0.0);
    if !(total.is_finite() && total > 0.0) {
        return Err(CorpusError::DegenerateDistribution {
            reason: format!("total patch weight is {total}"),
        });
    }

    let divisor: f64 = weighted_counts.iter().sum();
    let frequencies: Vec<f64> = weighted_counts.iter().map(|&w| w / divisor).collect();
    for (label, frequency) in frequencies.iter().enumerate() {
        tracing::info!(label, frequency, "re-estimated label frequency");
    }

    Ok(PatchPrior {
        cumulative: weights,
        frequencies,
    })
}

/// In-place inclusive prefix sum.
pub fn prefix_sum(values: &mut [f64]) {
    let mut running = 0.0;
    for value in values {
        running += *value;
        *value = running;
    }
}

/// Probability of keeping a pixel of each label.
///
/// Frequencies are divided by their boost and renormalized, inverted, and
/// scaled so the rarest label keeps all its pixels. Labels that never occur
/// keep all their pixels as well.
pub fn mask_probability(frequencies: &[f64], boost: &[f32]) -> Vec<f32> {
    let boosted: Vec<f64> = frequencies
        .iter()
        .zip(boost)
        .map(|(&frequency, &boost)| frequency / f64::from(boost))
        .collect();
    let divisor: f64 = boosted.iter().sum();

    let inverse: Vec<Option<f64>> = boosted
        .iter()
        .map(|&frequency| {
            let normalized = frequency / divisor;
            (normalized > 0.0).then(|| 1.0 / normalized)
        })
        .collect();
    let max = inverse.iter().flatten().copied().fold(0.0f64, f64::max);

    let probability: Vec<f32> = inverse
        .iter()
        .map(|inverse| match inverse {
            Some(inverse) if max > 0.0 => (inverse / max) as f32,
            _ => 1.0,
        })
        .collect();
    for (label, probability) in probability.iter().enumerate() {
        tracing::info!(label, probability, "label mask probability");
    }
    probability
}
