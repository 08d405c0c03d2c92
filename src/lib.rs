//! # augpipe: data pipelines for weakly and fully supervised vision training
//!
//! **augpipe** bundles the pieces that sit between images on disk and a
//! training loop:
//!
//! - composable, seedable augmentations over HWC/CHW `ndarray` images with
//!   optional segmentation masks ([`data::transforms`]),
//! - ready-made chains for classification, segmentation, affinity and
//!   class-activation-map training ([`data::pipelines`]),
//! - CutMix/MixUp dataset wrappers ([`data::mixing`]),
//! - label-balanced weighted sampling ([`data::sampler`]),
//! - batching loaders and an endless cyclic iterator ([`data::dataloader`],
//!   [`data::cyclic`]),
//! - a JSON configuration tying it together ([`config`]).
//!
//! ## Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use augpipe::config::{PipelineConfig, Task};
//! use augpipe::data::{ClassificationDataset, DataLoader};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::load("pipeline.json")?;
//! let source: Arc<dyn augpipe::data::DataSource> = Arc::from(config.source()?);
//! let sampling = config.train_sampling(Some(source.as_ref()))?;
//!
//! let mut chains = config.transforms(Task::Classification)?;
//! let (_, train) = chains.remove(0);
//! let dataset = ClassificationDataset::new(source, train);
//!
//! let loader = DataLoader::new(dataset, config.batch_size).sampling(sampling);
//! for batch in &loader {
//!     let (images, labels) = batch?.stack()?;
//!     println!("{:?} {:?}", images.shape(), labels.shape());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;

pub use config::{ConfigError, PipelineConfig, Task};
