//! File-system loading of segmentation corpora and patch statistics.
//!
//! A corpus on disk is one directory of raw images plus one directory per
//! label plane. Files are matched by stem: `raw/img01.png` pairs with
//! `labels_a/img01.png`, `labels_b/img01.tif` and so on.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage};
use segpatch::{complement_plane, needs_complement, CorpusBuilder, Image};
use walkdir::WalkDir;

const SUPPORTED_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

/// Whether the path has an image extension the loader decodes.
pub fn is_supported_image<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
}

/// A raw image and its label planes, one per label directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingItem {
    pub raw: PathBuf,
    pub labels: Vec<PathBuf>,
}

fn image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to read {}", dir.display()))?;
        if entry.file_type().is_file() && is_supported_image(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn find_by_stem<'a>(files: &'a [PathBuf], stem: &std::ffi::OsStr) -> Option<&'a PathBuf> {
    files.iter().find(|file| file.file_stem() == Some(stem))
}

/// Pair every raw image with the same-stem file of each label directory.
///
/// Raw images missing from any label directory are skipped with a warning.
///
/// # Errors
///
/// Returns an error if a directory cannot be read.
pub fn collect_training_items(raw_dir: &Path, label_dirs: &[PathBuf]) -> Result<Vec<TrainingItem>> {
    let label_files = label_dirs
        .iter()
        .map(|dir| image_files(dir))
        .collect::<Result<Vec<_>>>()?;

    let mut items = Vec::new();
    for raw in image_files(raw_dir)? {
        let Some(stem) = raw.file_stem() else {
            continue;
        };

        let labels: Option<Vec<PathBuf>> = label_files
            .iter()
            .map(|files| find_by_stem(files, stem).cloned())
            .collect();

        match labels {
            Some(labels) => items.push(TrainingItem { raw, labels }),
            None => {
                tracing::warn!(path = %raw.display(), "no label planes found, skipping");
            }
        }
    }

    tracing::info!(items = items.len(), raw_dir = %raw_dir.display(), "collected training items");
    Ok(items)
}

/// Label planes of a sample, with a complement plane appended when the
/// planes do not cover every class.
pub fn label_planes(mut planes: Vec<GrayImage>, nr_labels: usize) -> Vec<GrayImage> {
    if needs_complement(planes.len(), nr_labels) {
        if let Some(complement) = complement_plane(&planes) {
            planes.push(complement);
        }
    }
    planes
}

/// Decode the raw image and label planes of an item.
///
/// # Errors
///
/// Returns an error if a file cannot be opened or decoded.
pub fn load_item(item: &TrainingItem, nr_labels: usize) -> Result<(DynamicImage, Vec<GrayImage>)> {
    let raw = image::open(&item.raw)
        .with_context(|| format!("failed to open raw image {}", item.raw.display()))?;

    let planes = item
        .labels
        .iter()
        .map(|path| {
            image::open(path)
                .map(|plane| plane.to_luma8())
                .with_context(|| format!("failed to open label image {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((raw, label_planes(planes, nr_labels)))
}

/// Load every item into the builder, numbering samples in order.
///
/// # Errors
///
/// Returns an error if any item fails to load.
pub fn submit_items(builder: &mut CorpusBuilder, items: &[TrainingItem]) -> Result<()> {
    let nr_labels = builder.config().nr_labels;
    for (id, item) in items.iter().enumerate() {
        let (raw, planes) = load_item(item, nr_labels)?;
        builder.submit(&raw, id as u64, planes);
    }
    Ok(())
}

/// Label occurrence counts over drawn patches.
///
/// Counter `0` holds ignored pixels, counter `c + 1` label `c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCounter {
    counts: Vec<u64>,
}

impl LabelCounter {
    pub fn new(nr_labels: usize) -> Self {
        Self {
            counts: vec![0; nr_labels + 1],
        }
    }

    /// Count every pixel of a label patch.
    pub fn record(&mut self, label: &Image) {
        for &value in label.data() {
            let slot = if value < 0.0 { 0 } else { value as usize + 1 };
            if let Some(count) = self.counts.get_mut(slot) {
                *count += 1;
            } else {
                tracing::warn!(label = value, "label outside the counted range");
            }
        }
    }

    /// `(label, count)` pairs, starting with `-1` for ignored pixels.
    pub fn entries(&self) -> impl Iterator<Item = (i64, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .map(|(slot, &count)| (slot as i64 - 1, count))
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}
