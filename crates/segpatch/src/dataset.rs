//! Burn dataset and batcher over randomly drawn patches.
//!
//! The dataset has a virtual length: item `i` is the patch drawn by a
//! generator seeded with `seed + i`, so the same index always yields the same
//! patch and items can be produced from any number of loader workers.

use std::{marker::PhantomData, sync::Arc};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::{backend::Backend, Tensor, TensorData},
};
use rand::{rngs::StdRng, SeedableRng};

use crate::corpus::PatchCorpus;

/// One augmented patch as raw buffers.
///
/// Following burn's convention the dataset returns plain data and the
/// batcher creates tensors on the target device.
#[derive(Debug, Clone)]
pub struct PatchItem {
    /// Raw patch as `[H, W, C]` floats
    pub image: Vec<f32>,
    /// Label patch as `[H, W]` class indices, `-1` for ignored pixels
    pub label: Vec<f32>,
    pub image_size: usize,
    pub label_size: usize,
    pub channels: usize,
}

/// Batch of patches.
#[derive(Debug, Clone)]
pub struct PatchBatch<B: Backend> {
    /// `[N, C, H, W]`
    pub images: Tensor<B, 4>,
    /// `[N, H, W]`
    pub labels: Tensor<B, 3>,
}

/// Fixed number of patch draws per epoch from a shared corpus.
#[derive(Debug, Clone)]
pub struct PatchDataset {
    corpus: Arc<PatchCorpus>,
    draws: usize,
    seed: u64,
}

impl PatchDataset {
    /// Dataset of `draws` patches, reproducible from `seed`.
    pub const fn new(corpus: Arc<PatchCorpus>, draws: usize, seed: u64) -> Self {
        Self {
            corpus,
            draws,
            seed,
        }
    }

    /// Dataset seeded from the corpus configuration.
    pub fn from_corpus(corpus: Arc<PatchCorpus>, draws: usize) -> Self {
        let seed = corpus.config().seed;
        Self::new(corpus, draws, seed)
    }

    pub fn corpus(&self) -> &PatchCorpus {
        &self.corpus
    }
}

impl Dataset<PatchItem> for PatchDataset {
    fn get(&self, index: usize) -> Option<PatchItem> {
        if index >= self.draws {
            return None;
        }

        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(index as u64));
        let patch = self.corpus.draw_patch(&mut rng);

        Some(PatchItem {
            image_size: patch.image.width(),
            label_size: patch.label.width(),
            channels: patch.image.channels(),
            image: patch.image.into_raw(),
            label: patch.label.into_raw(),
        })
    }

    fn len(&self) -> usize {
        self.draws
    }
}

/// Stacks [`PatchItem`]s into [`PatchBatch`]es.
#[derive(Clone, Default)]
pub struct PatchBatcher<B: Backend> {
    _phantom: PhantomData<B>,
}

impl<B: Backend> PatchBatcher<B> {
    pub const fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, PatchItem, PatchBatch<B>> for PatchBatcher<B> {
    fn batch(&self, items: Vec<PatchItem>, device: &B::Device) -> PatchBatch<B> {
        let mut images = Vec::with_capacity(items.len());
        let mut labels = Vec::with_capacity(items.len());

        for item in items {
            let image = Tensor::<B, 3>::from_data(
                TensorData::new(item.image, [item.image_size, item.image_size, item.channels]),
                device,
            )
            .permute([2, 0, 1]);
            let label = Tensor::<B, 2>::from_data(
                TensorData::new(item.label, [item.label_size, item.label_size]),
                device,
            );

            images.push(image);
            labels.push(label);
        }

        PatchBatch {
            images: Tensor::stack(images, 0),
            labels: Tensor::stack(labels, 0),
        }
    }
}
