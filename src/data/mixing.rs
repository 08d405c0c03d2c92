// --- File: src/data/mixing.rs ---

//! Label-mixing dataset wrappers: CutMix, MixUp and a per-draw choice
//! between the two.
//!
//! The wrapped dataset yields CHW images (its chain ends with `Transpose`).
//! Mixed labels are convex combinations of the two multi-hot vectors.

use super::dataset::{DataError, DataResult, Dataset, DrawRng, LabeledImage};
use super::transforms::geometric::CropWindow;
use super::transforms::TransformError;
use ndarray::{s, Array3, Axis};
use rand::{Rng, RngCore};
use rand_distr::{Beta, Distribution};

/// A dataset of labelled images behind a trait object.
pub type BoxedDataset = Box<dyn Dataset<Item = LabeledImage>>;

/// Parameters shared by the mixing wrappers.
#[derive(Debug, Clone)]
struct MixParams {
    num_mix: usize,
    beta: Beta<f32>,
    prob: f32,
}

impl MixParams {
    fn new(name: &'static str, num_mix: usize, beta: f32, prob: f32) -> DataResult<Self> {
        if !(0.0..=1.0).contains(&prob) {
            return Err(invalid(name, format!("probability must lie in [0, 1], got {prob}")));
        }
        let beta = Beta::new(beta, beta)
            .map_err(|e| invalid(name, format!("beta must be positive, got {beta}: {e}")))?;
        Ok(Self {
            num_mix,
            beta,
            prob,
        })
    }

    /// Mixing coefficient of the next round, or `None` when the round is
    /// skipped.
    fn draw(&self, rng: &mut dyn RngCore) -> Option<f32> {
        if rng.random::<f32>() > self.prob {
            return None;
        }
        Some(self.beta.sample(rng))
    }
}

fn invalid(transform: &'static str, message: String) -> DataError {
    DataError::Transform(TransformError::InvalidParameter { transform, message })
}

fn ensure_same_shape(a: &LabeledImage, b: &LabeledImage) -> DataResult<()> {
    if a.image.shape() != b.image.shape() || a.label.len() != b.label.len() {
        return Err(DataError::Inconsistent(format!(
            "cannot mix a {:?} image with a {:?} image",
            a.image.shape(),
            b.image.shape()
        )));
    }
    Ok(())
}

fn random_crop(image: &Array3<f32>, size: usize, rng: &mut dyn RngCore) -> Array3<f32> {
    let (h, w) = (image.len_of(Axis(1)), image.len_of(Axis(2)));
    CropWindow::random(h, w, size, rng).apply(image, (1, 2), size, 0.0)
}

/// Draws a partner for mixing.
fn partner<D: Dataset<Item = LabeledImage>>(
    dataset: &D,
    crop: Option<usize>,
    rng: &mut dyn RngCore,
) -> DataResult<LabeledImage> {
    let index = rng.random_range(0..dataset.len());
    let mut item = dataset.get(index)?;
    if let Some(size) = crop {
        item.image = random_crop(&item.image, size, rng);
    }
    Ok(item)
}

/// Pastes a box of roughly `1 - lam` of the area from `other` into `item`
/// and mixes the labels by the exact pasted ratio.
fn cut_paste(
    item: &mut LabeledImage,
    other: &LabeledImage,
    lam: f32,
    rng: &mut dyn RngCore,
) -> DataResult<()> {
    ensure_same_shape(item, other)?;
    let (h, w) = (item.image.len_of(Axis(1)), item.image.len_of(Axis(2)));
    if h == 0 || w == 0 {
        return Ok(());
    }
    let cut = (1.0 - lam).max(0.0).sqrt();
    let (cut_h, cut_w) = ((h as f32 * cut) as usize, (w as f32 * cut) as usize);
    let (cy, cx) = (rng.random_range(0..h), rng.random_range(0..w));
    let (y1, y2) = (cy.saturating_sub(cut_h / 2), (cy + cut_h / 2).min(h));
    let (x1, x2) = (cx.saturating_sub(cut_w / 2), (cx + cut_w / 2).min(w));

    item.image
        .slice_mut(s![.., y1..y2, x1..x2])
        .assign(&other.image.slice(s![.., y1..y2, x1..x2]));

    let kept = 1.0 - ((y2 - y1) * (x2 - x1)) as f32 / (h * w) as f32;
    item.label = &item.label * kept + &other.label * (1.0 - kept);
    Ok(())
}

/// Convex combination of two items.
fn blend(item: &mut LabeledImage, other: &LabeledImage, lam: f32) -> DataResult<()> {
    ensure_same_shape(item, other)?;
    item.image = &item.image * lam + &other.image * (1.0 - lam);
    item.label = &item.label * lam + &other.label * (1.0 - lam);
    Ok(())
}

/// CutMix: crops every image to `image_size`, then with probability `prob`
/// pastes a random box from another sample.
#[derive(Debug, Clone)]
pub struct CutMix<D> {
    inner: D,
    image_size: usize,
    params: MixParams,
    rng: DrawRng,
}

impl<D: Dataset<Item = LabeledImage>> CutMix<D> {
    pub fn new(inner: D, image_size: usize, num_mix: usize, beta: f32, prob: f32) -> DataResult<Self> {
        if image_size == 0 {
            return Err(invalid("CutMix", "image size must be positive".to_string()));
        }
        Ok(Self {
            inner,
            image_size,
            params: MixParams::new("CutMix", num_mix, beta, prob)?,
            rng: DrawRng::new(None),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = DrawRng::new(Some(seed));
        self
    }
}

impl<D: Dataset<Item = LabeledImage>> Dataset for CutMix<D> {
    type Item = LabeledImage;

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn get(&self, index: usize) -> DataResult<LabeledImage> {
        let mut rng = self.rng.draw();
        let mut item = self.inner.get(index)?;
        item.image = random_crop(&item.image, self.image_size, &mut rng);

        for _ in 0..self.params.num_mix {
            let Some(lam) = self.params.draw(&mut rng) else {
                continue;
            };
            let other = partner(&self.inner, Some(self.image_size), &mut rng)?;
            cut_paste(&mut item, &other, lam, &mut rng)?;
        }
        Ok(item)
    }
}

/// MixUp: with probability `prob`, blends the sample with another one.
#[derive(Debug, Clone)]
pub struct MixUp<D> {
    inner: D,
    params: MixParams,
    rng: DrawRng,
}

impl<D: Dataset<Item = LabeledImage>> MixUp<D> {
    pub fn new(inner: D, num_mix: usize, beta: f32, prob: f32) -> DataResult<Self> {
        Ok(Self {
            inner,
            params: MixParams::new("MixUp", num_mix, beta, prob)?,
            rng: DrawRng::new(None),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = DrawRng::new(Some(seed));
        self
    }
}

impl<D: Dataset<Item = LabeledImage>> Dataset for MixUp<D> {
    type Item = LabeledImage;

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn get(&self, index: usize) -> DataResult<LabeledImage> {
        let mut rng = self.rng.draw();
        let mut item = self.inner.get(index)?;
        for _ in 0..self.params.num_mix {
            let Some(lam) = self.params.draw(&mut rng) else {
                continue;
            };
            let other = partner(&self.inner, None, &mut rng)?;
            blend(&mut item, &other, lam)?;
        }
        Ok(item)
    }
}

/// Crops like [`CutMix`], then each mixing round picks CutMix or MixUp with
/// equal chance.
#[derive(Debug, Clone)]
pub struct CutOrMixUp<D> {
    inner: D,
    image_size: usize,
    params: MixParams,
    rng: DrawRng,
}

impl<D: Dataset<Item = LabeledImage>> CutOrMixUp<D> {
    pub fn new(inner: D, image_size: usize, num_mix: usize, beta: f32, prob: f32) -> DataResult<Self> {
        if image_size == 0 {
            return Err(invalid("CutOrMixUp", "image size must be positive".to_string()));
        }
        Ok(Self {
            inner,
            image_size,
            params: MixParams::new("CutOrMixUp", num_mix, beta, prob)?,
            rng: DrawRng::new(None),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = DrawRng::new(Some(seed));
        self
    }
}

impl<D: Dataset<Item = LabeledImage>> Dataset for CutOrMixUp<D> {
    type Item = LabeledImage;

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn get(&self, index: usize) -> DataResult<LabeledImage> {
        let mut rng = self.rng.draw();
        let mut item = self.inner.get(index)?;
        item.image = random_crop(&item.image, self.image_size, &mut rng);

        for _ in 0..self.params.num_mix {
            let Some(lam) = self.params.draw(&mut rng) else {
                continue;
            };
            let other = partner(&self.inner, Some(self.image_size), &mut rng)?;
            if rng.random::<bool>() {
                cut_paste(&mut item, &other, lam, &mut rng)?;
            } else {
                blend(&mut item, &other, lam)?;
            }
        }
        Ok(item)
    }
}

const NUM_MIX: usize = 1;
const BETA: f32 = 1.0;

/// Wraps a classification dataset with the mixing augmentations named in
/// `augment`.
///
/// `cutormixup` selects [`CutOrMixUp`]. Otherwise `cutmix` adds [`CutMix`]
/// and `mixup` stacks [`MixUp`] on top of it. A `seed` makes every wrapper
/// reproducible; stacked wrappers get distinct seeds derived from it.
pub fn apply_augmentation(
    dataset: BoxedDataset,
    augment: &str,
    image_size: usize,
    cutmix_prob: f32,
    mixup_prob: f32,
    seed: Option<u64>,
) -> DataResult<BoxedDataset> {
    if augment.contains("cutormixup") {
        tracing::info!(image_size, num_mix = NUM_MIX, beta = BETA, prob = cutmix_prob, seed = ?seed, "applying cutormixup");
        let mut wrapper = CutOrMixUp::new(dataset, image_size, NUM_MIX, BETA, cutmix_prob)?;
        if let Some(seed) = seed {
            wrapper = wrapper.with_seed(seed);
        }
        return Ok(Box::new(wrapper));
    }

    let mut dataset = dataset;
    if augment.contains("cutmix") {
        tracing::info!(image_size, num_mix = NUM_MIX, beta = BETA, prob = cutmix_prob, seed = ?seed, "applying cutmix");
        let mut wrapper = CutMix::new(dataset, image_size, NUM_MIX, BETA, cutmix_prob)?;
        if let Some(seed) = seed {
            wrapper = wrapper.with_seed(seed);
        }
        dataset = Box::new(wrapper);
    }
    if augment.contains("mixup") {
        tracing::info!(num_mix = NUM_MIX, beta = BETA, prob = mixup_prob, seed = ?seed, "applying mixup");
        let mut wrapper = MixUp::new(dataset, NUM_MIX, BETA, mixup_prob)?;
        if let Some(seed) = seed {
            wrapper = wrapper.with_seed(seed.wrapping_add(1));
        }
        dataset = Box::new(wrapper);
    }
    Ok(dataset)
}
