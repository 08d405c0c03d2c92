// --- File: src/data/transforms/mod.rs ---

//! Image transforms and their composition.
//!
//! A transform consumes a [`Sample`] (an image plus an optional mask) and
//! returns the transformed sample. Random transforms draw from the RNG the
//! caller passes in, so a chain applied with a seeded RNG is reproducible.
//!
//! ## Layout
//!
//! Images start out HWC with raw pixel values in `0..=255`. [`Transpose`]
//! switches them to CHW; every spatial transform reads the current
//! [`Layout`] from the sample and works in either.
//!
//! Masks are either `(H, W)` label maps or `(C, H, W)` continuous maps
//! (class activation maps), so the spatial axes of a mask are always its
//! last two.

pub mod color;
pub mod geometric;
pub mod randaugment;
pub(crate) mod resample;

pub use color::{Clahe, ColorJitter, Normalize, QuantileNormalization};
pub use geometric::{
    ApplyToImage, AtLeast3d, ElasticTransform, RandomApply, RandomCrop, RandomHorizontalFlip,
    RandomResize, RandomRotation, RandomVerticalFlip, Resize, ResizeMask, ResizeTarget,
    TopLeftCrop, Transpose,
};
pub use randaugment::RandAugment;

use ndarray::{Array3, ArrayD, Axis};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::fmt;
use thiserror::Error;

/// Errors raised while building or applying transforms.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("invalid parameter for {transform}: {message}")]
    InvalidParameter {
        transform: &'static str,
        message: String,
    },

    #[error("{transform} expects {expected} channels, got {actual}")]
    ChannelMismatch {
        transform: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{transform} expects a {expected} image")]
    Layout {
        transform: &'static str,
        expected: Layout,
    },

    #[error("{transform} requires a mask")]
    MissingMask { transform: &'static str },

    #[error("mask must be 2-D (H, W) or 3-D (C, H, W), got {ndim} dimensions")]
    MaskRank { ndim: usize },

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, TransformError>;

/// Memory layout of the image tensor of a [`Sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Height, width, channels. The layout images are decoded into.
    Hwc,
    /// Channels, height, width. The layout models consume.
    Chw,
}

impl Layout {
    /// Axes of `(height, width, channels)` for this layout.
    pub fn axes(self) -> (usize, usize, usize) {
        match self {
            Layout::Hwc => (0, 1, 2),
            Layout::Chw => (1, 2, 0),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Hwc => write!(f, "HWC"),
            Layout::Chw => write!(f, "CHW"),
        }
    }
}

/// An image with an optional dense target.
#[derive(Debug, Clone)]
pub struct Sample {
    pub image: Array3<f32>,
    pub mask: Option<ArrayD<f32>>,
    pub layout: Layout,
}

impl Sample {
    /// Wraps an HWC image without a mask.
    pub fn new(image: Array3<f32>) -> Self {
        Self {
            image,
            mask: None,
            layout: Layout::Hwc,
        }
    }

    /// Wraps an HWC image together with its mask.
    pub fn with_mask(image: Array3<f32>, mask: ArrayD<f32>) -> Self {
        Self {
            image,
            mask: Some(mask),
            layout: Layout::Hwc,
        }
    }

    pub fn height(&self) -> usize {
        self.image.len_of(Axis(self.layout.axes().0))
    }

    pub fn width(&self) -> usize {
        self.image.len_of(Axis(self.layout.axes().1))
    }

    pub fn channels(&self) -> usize {
        self.image.len_of(Axis(self.layout.axes().2))
    }
}

/// Spatial `(height, width)` axes of a mask.
pub(crate) fn mask_axes(mask: &ArrayD<f32>) -> Result<(usize, usize)> {
    match mask.ndim() {
        2 => Ok((0, 1)),
        3 => Ok((1, 2)),
        ndim => Err(TransformError::MaskRank { ndim }),
    }
}

/// A step of a transform chain.
pub trait Transform: Send + Sync {
    /// Applies the transform to a sample.
    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Result<Sample>;

    /// Short, stable name of the step, used to inspect assembled chains.
    fn name(&self) -> &'static str;
}

/// An ordered chain of transforms.
pub struct Compose {
    transforms: Vec<Box<dyn Transform>>,
}

impl Compose {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self {
            transforms: Vec::new(),
        }
    }

    /// Appends a step (builder style).
    pub fn add<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    /// Appends a step in place.
    pub fn push<T: Transform + 'static>(&mut self, transform: T) {
        self.transforms.push(Box::new(transform));
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Names of the steps, in application order.
    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    /// Whether a step with the given name is part of the chain.
    pub fn contains(&self, name: &str) -> bool {
        self.transforms.iter().any(|t| t.name() == name)
    }

    /// Applies the chain with a freshly seeded RNG.
    pub fn apply_seeded(&self, sample: Sample, seed: u64) -> Result<Sample> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.apply(sample, &mut rng)
    }
}

impl Default for Compose {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Compose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl Transform for Compose {
    fn apply(&self, mut sample: Sample, rng: &mut dyn RngCore) -> Result<Sample> {
        for transform in &self.transforms {
            sample = transform.apply(sample, rng)?;
        }
        Ok(sample)
    }

    fn name(&self) -> &'static str {
        "Compose"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn gradient_image(h: usize, w: usize) -> Array3<f32> {
        Array3::from_shape_fn((h, w, 3), |(y, x, c)| (y * w + x + c) as f32)
    }

    #[test]
    fn test_sample_dimensions_follow_layout() {
        let mut sample = Sample::new(gradient_image(4, 6));
        assert_eq!((sample.height(), sample.width(), sample.channels()), (4, 6, 3));

        sample = Transpose.apply(sample, &mut rand::rng()).unwrap();
        assert_eq!(sample.layout, Layout::Chw);
        assert_eq!(sample.image.shape(), &[3, 4, 6]);
        assert_eq!((sample.height(), sample.width(), sample.channels()), (4, 6, 3));
    }

    #[test]
    fn test_compose_names_and_order() {
        let chain = Compose::new()
            .add(Resize::exact(8, 8))
            .add(Normalize::imagenet())
            .add(Transpose);

        assert_eq!(chain.names(), vec!["Resize", "Normalize", "Transpose"]);
        assert!(chain.contains("Normalize"));
        assert!(!chain.contains("RandomCrop"));
        assert_eq!(chain.len(), 3);

        let out = chain.apply_seeded(Sample::new(gradient_image(4, 4)), 7).unwrap();
        assert_eq!(out.image.shape(), &[3, 8, 8]);
    }

    #[test]
    fn test_compose_is_reproducible_with_seed() {
        let chain = Compose::new()
            .add(RandomHorizontalFlip::new(0.5))
            .add(RandomCrop::new(3));
        let a = chain.apply_seeded(Sample::new(gradient_image(5, 5)), 11).unwrap();
        let b = chain.apply_seeded(Sample::new(gradient_image(5, 5)), 11).unwrap();
        assert_eq!(a.image, b.image);
    }

    #[test]
    fn test_mask_axes() {
        assert_eq!(mask_axes(&ArrayD::zeros(IxDyn(&[4, 5]))).unwrap(), (0, 1));
        assert_eq!(mask_axes(&ArrayD::zeros(IxDyn(&[2, 4, 5]))).unwrap(), (1, 2));
        assert!(matches!(
            mask_axes(&ArrayD::zeros(IxDyn(&[4]))),
            Err(TransformError::MaskRank { ndim: 1 })
        ));
    }
}
