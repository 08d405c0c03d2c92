//! # Data Module
//!
//! Everything between files on disk and batches fed to a model.
//!
//! ## Key Components
//!
//! - [`DataSource`]: sample ids, labels and decoded images
//! - [`Dataset`]: indexable training items built from a source
//! - [`DataLoader`]: batched iteration, sequential, shuffled or weighted
//! - [`CyclicIterator`]: restarts a loader when it runs out
//! - [`transforms`]: augmentation primitives and [`Compose`]
//! - [`pipelines`]: the ready-made train/eval chains
//!
//! ## Example
//!
//! ```ignore
//! use augpipe::data::*;
//! use std::sync::Arc;
//!
//! let source: Arc<dyn DataSource> =
//!     custom_data_source("folder", "data/", None, Some("train"))?.into();
//! let (train_chain, _) = get_classification_transforms(256, 320, 224, "flip", None)?;
//! let sampling = get_train_sampler_and_shuffler("balanced-class", Some(source.as_ref()), Some(0), 10.0)?;
//!
//! let dataset = ClassificationDataset::new(source, train_chain);
//! let loader = DataLoader::new(dataset, 32).sampling(sampling);
//! let mut batches = CyclicIterator::new(loader);
//! let (images, labels) = batches.get()??.stack()?;
//! ```

pub mod cyclic;
pub mod dataloader;
pub mod dataset;
pub mod mixing;
pub mod pipelines;
pub mod sampler;
pub mod transforms;

pub use cyclic::CyclicIterator;
pub use dataloader::{Batch, DataLoader, DataLoaderIter};
pub use dataset::{
    custom_data_source, ClassificationDataset, DataError, DataResult, DataSource,
    DataSourceRegistry, Dataset, ImageFolderSource, InMemorySource, LabeledImage,
    SegmentationDataset, SourceOptions,
};
pub use mixing::{apply_augmentation, BoxedDataset, CutMix, CutOrMixUp, MixUp};
pub use pipelines::{
    get_affinity_transforms, get_ccam_transforms, get_classification_transforms,
    get_inference_transforms, get_segmentation_transforms, imagenet_stats, NormalizeStats,
};
pub use sampler::{
    compute_balanced_class_weights, compute_balanced_sample_weights,
    get_train_sampler_and_shuffler, BatchSampler, RandomSampler, Sampler, SamplerError,
    SamplerKind, SequentialSampler, TrainSampling, WeightedRandomSampler,
};
pub use transforms::{Compose, Layout, Sample, Transform, TransformError};
