// --- File: src/data/dataloader.rs ---

//! DataLoader: batched iteration over a dataset.

use super::dataset::{DataResult, Dataset, LabeledImage};
use super::sampler::{
    BatchSampler, RandomSampler, Sampler, SequentialSampler, TrainSampling,
    WeightedRandomSampler,
};
use ndarray::{stack, Array2, Array4, Axis};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Items of one batch together with their dataset indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub indices: Vec<usize>,
}

impl<T> Batch<T> {
    pub fn new(items: Vec<T>, indices: Vec<usize>) -> Self {
        Self { items, indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

impl Batch<LabeledImage> {
    /// Stacks images into `(B, C, H, W)` and labels into `(B, K)`.
    pub fn stack(&self) -> DataResult<(Array4<f32>, Array2<f32>)> {
        let images: Vec<_> = self.items.iter().map(|item| item.image.view()).collect();
        let labels: Vec<_> = self.items.iter().map(|item| item.label.view()).collect();
        Ok((stack(Axis(0), &images)?, stack(Axis(0), &labels)?))
    }
}

/// Iterates a dataset in batches.
///
/// Order comes from the weighted sampler when one is set, otherwise the
/// indices are sequential or shuffled. Cloning is cheap; clones share the
/// dataset and the epoch counter.
///
/// # Example
///
/// ```rust,ignore
/// let loader = DataLoader::new(dataset, 32).shuffle(true).drop_last(true);
///
/// for batch in loader.iter() {
///     let (images, labels) = batch?.stack()?;
/// }
/// ```
pub struct DataLoader<D: Dataset> {
    dataset: Arc<D>,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: Option<u64>,
    sampler: Option<WeightedRandomSampler>,
    epoch: Arc<AtomicUsize>,
}

impl<D: Dataset> DataLoader<D> {
    pub fn new(dataset: D, batch_size: usize) -> Self {
        Self::from_arc(Arc::new(dataset), batch_size)
    }

    /// Loader over a dataset that is shared elsewhere.
    pub fn from_arc(dataset: Arc<D>, batch_size: usize) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle: false,
            drop_last: false,
            seed: None,
            sampler: None,
            epoch: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Seeds the shuffling.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Draws indices from `sampler` instead of sequential or shuffled order.
    pub fn sampler(mut self, sampler: WeightedRandomSampler) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Applies a resolved training strategy.
    pub fn sampling(self, sampling: TrainSampling) -> Self {
        match sampling {
            TrainSampling::Shuffle => self.shuffle(true),
            TrainSampling::Weighted(sampler) => self.shuffle(false).sampler(sampler),
        }
    }

    /// Number of indices one pass visits.
    pub fn len(&self) -> usize {
        match &self.sampler {
            Some(sampler) => sampler.len(),
            None => self.dataset.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_batches(&self) -> usize {
        let n = self.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    /// Number of passes started so far.
    pub fn epoch(&self) -> usize {
        self.epoch.load(Ordering::Relaxed)
    }

    /// Starts a new pass.
    pub fn iter(&self) -> DataLoaderIter<D> {
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed);
        let n = self.dataset.len();
        let batch_sampler = match (&self.sampler, self.shuffle) {
            (Some(sampler), _) => BatchSamplerEnum::Weighted(BatchSampler::new(
                sampler.for_epoch(epoch),
                self.batch_size,
                self.drop_last,
            )),
            (None, true) => {
                let sampler = match self.seed {
                    Some(seed) => RandomSampler::with_seed(n, seed.wrapping_add(epoch as u64)),
                    None => RandomSampler::new(n),
                };
                BatchSamplerEnum::Random(BatchSampler::new(sampler, self.batch_size, self.drop_last))
            }
            (None, false) => BatchSamplerEnum::Sequential(BatchSampler::new(
                SequentialSampler::new(n),
                self.batch_size,
                self.drop_last,
            )),
        };
        tracing::trace!(epoch, batches = self.num_batches(), "starting loader pass");
        DataLoaderIter {
            dataset: Arc::clone(&self.dataset),
            batch_sampler,
        }
    }
}

impl<D: Dataset> Clone for DataLoader<D> {
    fn clone(&self) -> Self {
        Self {
            dataset: Arc::clone(&self.dataset),
            batch_size: self.batch_size,
            shuffle: self.shuffle,
            drop_last: self.drop_last,
            seed: self.seed,
            sampler: self.sampler.clone(),
            epoch: Arc::clone(&self.epoch),
        }
    }
}

impl<D: Dataset> fmt::Debug for DataLoader<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataLoader")
            .field("len", &self.len())
            .field("batch_size", &self.batch_size)
            .field("shuffle", &self.shuffle)
            .field("drop_last", &self.drop_last)
            .field("weighted", &self.sampler.is_some())
            .finish()
    }
}

impl<D: Dataset> IntoIterator for DataLoader<D> {
    type Item = DataResult<Batch<D::Item>>;
    type IntoIter = DataLoaderIter<D>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<D: Dataset> IntoIterator for &DataLoader<D> {
    type Item = DataResult<Batch<D::Item>>;
    type IntoIter = DataLoaderIter<D>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

enum BatchSamplerEnum {
    Sequential(BatchSampler<SequentialSampler>),
    Random(BatchSampler<RandomSampler>),
    Weighted(BatchSampler<WeightedRandomSampler>),
}

impl Iterator for BatchSamplerEnum {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            BatchSamplerEnum::Sequential(s) => s.next(),
            BatchSamplerEnum::Random(s) => s.next(),
            BatchSamplerEnum::Weighted(s) => s.next(),
        }
    }
}

/// One pass over a [`DataLoader`]. Owns its dataset handle.
pub struct DataLoaderIter<D: Dataset> {
    dataset: Arc<D>,
    batch_sampler: BatchSamplerEnum,
}

impl<D: Dataset> Iterator for DataLoaderIter<D> {
    type Item = DataResult<Batch<D::Item>>;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.batch_sampler.next()?;
        let items = indices
            .iter()
            .map(|&idx| self.dataset.get(idx))
            .collect::<DataResult<Vec<_>>>();
        Some(items.map(|items| Batch::new(items, indices)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::DataError;
    use ndarray::{array, Array3};

    struct Squares {
        len: usize,
    }

    impl Dataset for Squares {
        type Item = usize;

        fn len(&self) -> usize {
            self.len
        }

        fn get(&self, index: usize) -> DataResult<usize> {
            if index >= self.len {
                return Err(DataError::IndexOutOfRange {
                    index,
                    len: self.len,
                });
            }
            Ok(index * index)
        }
    }

    #[test]
    fn test_dataloader_basic() {
        let loader = DataLoader::new(Squares { len: 10 }, 3);
        assert_eq!(loader.num_batches(), 4);
        assert_eq!(loader.len(), 10);

        let batches: Vec<_> = loader.iter().map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[0].items, vec![0, 1, 4]);
        assert_eq!(batches[3].indices, vec![9]);
    }

    #[test]
    fn test_dataloader_drop_last() {
        let loader = DataLoader::new(Squares { len: 10 }, 3).drop_last(true);
        assert_eq!(loader.num_batches(), 3);
        assert_eq!(loader.iter().count(), 3);
    }

    #[test]
    fn test_dataloader_shuffle_visits_everything() {
        let loader = DataLoader::new(Squares { len: 10 }, 4).shuffle(true).seed(42);
        let mut seen: Vec<usize> = loader
            .iter()
            .flat_map(|b| b.unwrap().indices)
            .collect();
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(loader.epoch(), 1);
    }

    #[test]
    fn test_clones_share_the_epoch() {
        let loader = DataLoader::new(Squares { len: 4 }, 2).shuffle(true).seed(7);
        let clone = loader.clone();
        let _ = loader.iter();
        let _ = clone.iter();
        assert_eq!(loader.epoch(), 2);
    }

    #[test]
    fn test_weighted_sampling_sets_order_and_length() {
        let sampler = WeightedRandomSampler::new(vec![0.0, 0.0, 1.0], 5, true)
            .unwrap()
            .with_seed(3);
        let loader = DataLoader::new(Squares { len: 3 }, 2).sampling(TrainSampling::Weighted(sampler));
        assert_eq!(loader.len(), 5);
        assert_eq!(loader.num_batches(), 3);

        let indices: Vec<usize> = loader.iter().flat_map(|b| b.unwrap().indices).collect();
        assert_eq!(indices, vec![2; 5]);
    }

    #[test]
    fn test_stack_labeled_images() {
        let items = vec![
            LabeledImage {
                image: Array3::zeros((3, 4, 4)),
                label: array![1.0, 0.0],
            },
            LabeledImage {
                image: Array3::ones((3, 4, 4)),
                label: array![0.0, 1.0],
            },
        ];
        let (images, labels) = Batch::new(items, vec![0, 1]).stack().unwrap();
        assert_eq!(images.shape(), &[2, 3, 4, 4]);
        assert_eq!(labels, array![[1.0, 0.0], [0.0, 1.0]]);
    }
}
