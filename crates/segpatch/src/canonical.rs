//! Canonicalization of submitted label planes into class index images.
//!
//! Two input conventions exist. A stack of several planes carries one class
//! per plane: a pixel belongs to class `i` when plane `i` is positive there,
//! and later planes overwrite earlier ones. A single plane carries the class
//! as its pixel value: the distinct values of the whole corpus are ranked in
//! ascending order and every pixel is replaced by the rank of its value.
//! The convention is chosen once, from the first submitted stack.

use std::collections::BTreeSet;

use image::GrayImage;
use rayon::prelude::*;

use crate::{
    error::{CorpusError, CorpusResult},
    image::Image,
};

/// How a corpus encodes its labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelMode {
    /// One indicator plane per class.
    ClassPlanes,
    /// One plane whose values enumerate the classes.
    ValuePlane,
}

impl LabelMode {
    /// Pick the mode from the plane count of the first stack.
    pub const fn detect(first_stack_planes: usize) -> Self {
        if first_stack_planes > 1 {
            Self::ClassPlanes
        } else {
            Self::ValuePlane
        }
    }
}

/// Canonical label images of a whole corpus.
#[derive(Debug, Clone)]
pub struct CanonicalLabels {
    pub mode: LabelMode,
    pub images: Vec<Image>,
}

/// Canonicalize every stack of a corpus.
///
/// # Errors
///
/// Returns `Err(CorpusError::MalformedLabelStack)` if a stack is empty or its
/// planes differ in size.
pub fn canonicalize(stacks: &[Vec<GrayImage>]) -> CorpusResult<CanonicalLabels> {
    for (index, stack) in stacks.iter().enumerate() {
        validate_stack(index, stack)?;
    }

    let Some(first) = stacks.first() else {
        return Ok(CanonicalLabels {
            mode: LabelMode::ValuePlane,
            images: Vec::new(),
        });
    };

    let mode = LabelMode::detect(first.len());
    tracing::info!(?mode, planes = first.len(), "canonicalizing label stacks");

    for (index, stack) in stacks.iter().enumerate() {
        if LabelMode::detect(stack.len()) != mode {
            tracing::warn!(
                index,
                planes = stack.len(),
                ?mode,
                "label stack disagrees with the corpus label mode"
            );
        }
    }

    let images = match mode {
        LabelMode::ClassPlanes => stacks
            .iter()
            .map(|stack| canonicalize_class_planes(stack))
            .collect(),
        LabelMode::ValuePlane => {
            let ranks = value_ranks(stacks.iter().map(|stack| &stack[0]));
            stacks
                .iter()
                .map(|stack| canonicalize_value_plane(&stack[0], &ranks))
                .collect()
        }
    };

    Ok(CanonicalLabels { mode, images })
}

fn validate_stack(index: usize, stack: &[GrayImage]) -> CorpusResult<()> {
    let Some(first) = stack.first() else {
        return Err(CorpusError::MalformedLabelStack {
            index,
            reason: "no label planes submitted".to_string(),
        });
    };

    if first.width() == 0 || first.height() == 0 {
        return Err(CorpusError::MalformedLabelStack {
            index,
            reason: "label plane is empty".to_string(),
        });
    }

    if let Some((plane, other)) = stack
        .iter()
        .enumerate()
        .find(|(_, plane)| plane.dimensions() != first.dimensions())
    {
        return Err(CorpusError::MalformedLabelStack {
            index,
            reason: format!(
                "plane {plane} is {}x{}, plane 0 is {}x{}",
                other.width(),
                other.height(),
                first.width(),
                first.height()
            ),
        });
    }

    Ok(())
}

/// Class index of the last plane that is positive at each pixel, else `0`.
pub fn canonicalize_class_planes(planes: &[GrayImage]) -> Image {
    let Some(first) = planes.first() else {
        return Image::new(0, 0, 1);
    };
    let width = first.width() as usize;
    let height = first.height() as usize;

    let mut label = Image::new(width, height, 1);
    label
        .data_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (class, plane) in planes.iter().enumerate() {
                let src = &plane.as_raw()[y * width..(y + 1) * width];
                for (dst, &v) in row.iter_mut().zip(src) {
                    if v > 0 {
                        *dst = class as f32;
                    }
                }
            }
        });
    label
}

/// Rank of every value that occurs in any of `planes`, ascending.
///
/// Values that never occur map to `None`.
pub fn value_ranks<'a>(planes: impl IntoIterator<Item = &'a GrayImage>) -> [Option<f32>; 256] {
    let values: BTreeSet<u8> = planes
        .into_iter()
        .flat_map(|plane| plane.as_raw().iter().copied())
        .collect();

    let mut ranks = [None; 256];
    for (rank, value) in values.into_iter().enumerate() {
        ranks[value as usize] = Some(rank as f32);
    }
    ranks
}

/// Replace every pixel by the rank of its value.
pub fn canonicalize_value_plane(plane: &GrayImage, ranks: &[Option<f32>; 256]) -> Image {
    let width = plane.width() as usize;
    let height = plane.height() as usize;

    let mut label = Image::new(width, height, 1);
    label
        .data_mut()
        .par_chunks_mut(width)
        .zip(plane.as_raw().par_chunks(width))
        .for_each(|(row, src)| {
            for (dst, &v) in row.iter_mut().zip(src) {
                debug_assert!(ranks[v as usize].is_some(), "value {v} was not ranked");
                *dst = ranks[v as usize].unwrap_or(0.0);
            }
        });
    label
}
