// --- File: src/data/pipelines.rs ---

//! Ready-made transform chains for classification, inference, affinity,
//! segmentation and class-activation-map training.
//!
//! Optional steps are switched on by substrings of an `augment` string, e.g.
//! `"flip_colorjitter_cutmix"`.

use super::transforms::{
    ApplyToImage, AtLeast3d, Clahe, ColorJitter, Compose, ElasticTransform, Normalize,
    QuantileNormalization, RandAugment, RandomApply, RandomCrop, RandomHorizontalFlip,
    RandomResize, RandomRotation, RandomVerticalFlip, Resize, ResizeMask, Result, TopLeftCrop,
    Transpose, TransformError,
};
use super::transforms::geometric::Interpolation;
use serde::{Deserialize, Serialize};

/// Channel statistics for [`Normalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeStats {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl NormalizeStats {
    pub fn to_transform(&self) -> Result<Normalize> {
        Normalize::new(self.mean.clone(), self.std.clone())
    }
}

impl Default for NormalizeStats {
    fn default() -> Self {
        imagenet_stats()
    }
}

/// ImageNet mean and standard deviation.
pub fn imagenet_stats() -> NormalizeStats {
    NormalizeStats {
        mean: vec![0.485, 0.456, 0.406],
        std: vec![0.229, 0.224, 0.225],
    }
}

fn normalize(stats: Option<&NormalizeStats>) -> Result<Normalize> {
    match stats {
        Some(stats) => stats.to_transform(),
        None => Ok(Normalize::imagenet()),
    }
}

fn crop_size(transform: &'static str, size: usize) -> Result<usize> {
    if size == 0 {
        return Err(TransformError::InvalidParameter {
            transform,
            message: "crop size must be greater than 0".to_string(),
        });
    }
    Ok(size)
}

fn color_jitter() -> Result<ColorJitter> {
    ColorJitter::new(0.3, 0.3, 0.3, 0.1)
}

fn log_chains(kind: &str, train: &Compose, eval: Option<&Compose>) {
    tracing::debug!(
        kind,
        train = ?train.names(),
        eval = ?eval.map(Compose::names),
        "assembled transform chains"
    );
}

/// Train and eval chains for image classification.
///
/// With `min_size == max_size` training resizes to a fixed square, otherwise
/// it draws a random size. Training always ends with normalisation, a random
/// crop (left to CutMix when `augment` contains `cutmix`) and `Transpose`;
/// evaluation ends with normalisation, a top-left crop and `Transpose`.
pub fn get_classification_transforms(
    min_size: usize,
    max_size: usize,
    crop: usize,
    augment: &str,
    stats: Option<&NormalizeStats>,
) -> Result<(Compose, Compose)> {
    let crop = crop_size("classification", crop)?;
    let mut train = Compose::new();
    let mut eval = Compose::new();

    if min_size == max_size {
        train.push(Resize::exact(min_size, min_size));
        eval.push(Resize::exact(min_size, min_size));
    } else {
        train.push(RandomResize::new(min_size, max_size)?);
        eval.push(Resize::shorter_side(crop));
    }

    if augment.contains("flip") {
        train.push(RandomHorizontalFlip::new(0.5));
        train.push(RandomVerticalFlip::new(0.5));
    }
    if augment.contains("rotation") {
        train.push(RandomRotation::new(0.0, 90.0)?);
    }
    if augment.contains("elastic") {
        train.push(RandomApply::new(ElasticTransform::new(50.0, 5.0)?, 0.5)?);
    }
    if augment.contains("qnorm") {
        train.push(QuantileNormalization::default());
        eval.push(QuantileNormalization::default());
    }
    if augment.contains("clahe") {
        train.push(Clahe::default());
        eval.push(Clahe::default());
    }
    if augment.contains("colorjitter") {
        train.push(color_jitter()?);
    }
    if augment.contains("randaugment") {
        train.push(RandAugment::new(2, 10)?);
    }

    train.push(normalize(stats)?);
    if !augment.contains("cutmix") {
        train.push(RandomCrop::new(crop));
    }
    train.push(Transpose);

    eval.push(normalize(stats)?);
    eval.push(TopLeftCrop::new(crop));
    eval.push(Transpose);

    log_chains("classification", &train, Some(&eval));
    Ok((train, eval))
}

/// Chain for inference on full images: optional quantile normalisation,
/// then normalisation and `Transpose`.
pub fn get_inference_transforms(augment: &str, stats: Option<&NormalizeStats>) -> Result<Compose> {
    let mut chain = Compose::new();
    if augment.contains("qnorm") {
        chain.push(QuantileNormalization::default());
    }
    chain.push(normalize(stats)?);
    chain.push(Transpose);

    log_chains("inference", &chain, None);
    Ok(chain)
}

/// Training chain for affinity learning. The label map is shrunk to a
/// quarter of the crop to match the network's output stride.
pub fn get_affinity_transforms(
    min_size: usize,
    max_size: usize,
    crop: usize,
    overcrop: bool,
    stats: Option<&NormalizeStats>,
) -> Result<Compose> {
    let crop = crop_size("affinity", crop)?;
    let chain = Compose::new()
        .add(RandomResize::new(min_size, max_size)?.with_overcrop(overcrop))
        .add(RandomHorizontalFlip::default())
        .add(normalize(stats)?)
        .add(RandomCrop::new(crop))
        .add(Transpose)
        .add(ResizeMask::new(crop / 4)?);

    log_chains("affinity", &chain, None);
    Ok(chain)
}

/// Train and eval chains for semantic segmentation.
pub fn get_segmentation_transforms(
    min_size: usize,
    max_size: usize,
    crop: usize,
    augment: &str,
    overcrop: bool,
    stats: Option<&NormalizeStats>,
) -> Result<(Compose, Compose)> {
    let crop = crop_size("segmentation", crop)?;
    let mut train = Compose::new()
        .add(RandomResize::new(min_size, max_size)?.with_overcrop(overcrop))
        .add(RandomHorizontalFlip::default());
    let mut eval = Compose::new().add(Resize::shorter_side(crop));

    if augment.contains("colorjitter") {
        train.push(ApplyToImage::new(color_jitter()?));
    }
    if augment.contains("clahe") {
        train.push(Clahe::default());
        eval.push(Clahe::default());
    }

    train.push(normalize(stats)?);
    train.push(RandomCrop::new(crop));
    train.push(Transpose);

    eval.push(normalize(stats)?);
    eval.push(TopLeftCrop::new(crop));
    eval.push(Transpose);

    log_chains("segmentation", &train, Some(&eval));
    Ok((train, eval))
}

/// Train and eval chains for refining class activation maps.
///
/// The maps are continuous, so they are resized bilinearly and crops pad
/// them with 0.
pub fn get_ccam_transforms(
    image_size: usize,
    crop: usize,
    stats: Option<&NormalizeStats>,
) -> Result<(Compose, Compose)> {
    let crop = crop_size("ccam", crop)?;
    let resize = || {
        Resize::exact(image_size, image_size).with_mask_interpolation(Interpolation::Bilinear)
    };

    let train = Compose::new()
        .add(resize())
        .add(normalize(stats)?)
        .add(RandomCrop::new(crop).with_ignore_value(0.0))
        .add(Transpose)
        .add(RandomHorizontalFlip::default())
        .add(AtLeast3d);

    let eval = Compose::new()
        .add(resize())
        .add(normalize(stats)?)
        .add(Transpose);

    log_chains("ccam", &train, Some(&eval));
    Ok((train, eval))
}
