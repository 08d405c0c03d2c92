// --- File: src/data/sampler.rs ---

//! Index sampling strategies: the loader's sequential, random and batch
//! samplers, and the weighted sampler used to rebalance training sets.

use super::dataset::{DataError, DataSource};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Upper bound applied to balanced-class weights unless told otherwise.
pub const DEFAULT_CLIP_VALUE: f32 = 10.0;

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Unknown sampler '{name}'. Known samplers are: {known:?}.")]
    UnknownSampler {
        name: String,
        known: Vec<&'static str>,
    },

    #[error("sampler '{0}' needs a data source to compute weights from")]
    MissingSource(SamplerKind),

    #[error("invalid sampling weights: {0}")]
    InvalidWeights(String),

    #[error(transparent)]
    Data(#[from] DataError),
}

pub type Result<T> = std::result::Result<T, SamplerError>;

/// Trait for samplers, generators of dataset indices.
pub trait Sampler: Iterator<Item = usize> {
    /// Number of indices one pass yields.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Restarts the pass.
    fn reset(&mut self);
}

/// Yields `0..len` in order.
#[derive(Debug, Clone)]
pub struct SequentialSampler {
    len: usize,
    current: usize,
}

impl SequentialSampler {
    pub fn new(len: usize) -> Self {
        Self { len, current: 0 }
    }
}

impl Iterator for SequentialSampler {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current < self.len {
            let idx = self.current;
            self.current += 1;
            Some(idx)
        } else {
            None
        }
    }
}

impl Sampler for SequentialSampler {
    fn len(&self) -> usize {
        self.len
    }

    fn reset(&mut self) {
        self.current = 0;
    }
}

/// Yields a permutation of `0..len`; every reset reshuffles.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    indices: Vec<usize>,
    current: usize,
    rng: StdRng,
}

impl RandomSampler {
    pub fn new(len: usize) -> Self {
        Self::from_rng(len, StdRng::from_rng(&mut rand::rng()))
    }

    /// Reproducible permutations.
    pub fn with_seed(len: usize, seed: u64) -> Self {
        Self::from_rng(len, StdRng::seed_from_u64(seed))
    }

    fn from_rng(len: usize, rng: StdRng) -> Self {
        let mut sampler = Self {
            indices: (0..len).collect(),
            current: 0,
            rng,
        };
        sampler.indices.shuffle(&mut sampler.rng);
        sampler
    }
}

impl Iterator for RandomSampler {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = *self.indices.get(self.current)?;
        self.current += 1;
        Some(idx)
    }
}

impl Sampler for RandomSampler {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn reset(&mut self) {
        self.current = 0;
        self.indices.shuffle(&mut self.rng);
    }
}

/// Groups the indices of an inner sampler into batches.
#[derive(Debug, Clone)]
pub struct BatchSampler<S: Sampler> {
    sampler: S,
    batch_size: usize,
    drop_last: bool,
}

impl<S: Sampler> BatchSampler<S> {
    /// `batch_size` is raised to at least 1.
    pub fn new(sampler: S, batch_size: usize, drop_last: bool) -> Self {
        Self {
            sampler,
            batch_size: batch_size.max(1),
            drop_last,
        }
    }

    pub fn num_batches(&self) -> usize {
        let n = self.sampler.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    pub fn reset(&mut self) {
        self.sampler.reset();
    }
}

impl<S: Sampler> Iterator for BatchSampler<S> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<usize> = self.sampler.by_ref().take(self.batch_size).collect();
        if batch.is_empty() || (batch.len() < self.batch_size && self.drop_last) {
            return None;
        }
        Some(batch)
    }
}

/// Draws indices with probability proportional to their weight.
#[derive(Debug, Clone)]
pub struct WeightedRandomSampler {
    weights: Vec<f64>,
    cumulative: Vec<f64>,
    num_samples: usize,
    replacement: bool,
    current: usize,
    used: Vec<bool>,
    seed: Option<u64>,
    rng: StdRng,
}

impl WeightedRandomSampler {
    /// Creates a sampler yielding `num_samples` indices per pass.
    ///
    /// # Errors
    ///
    /// Fails when a weight is negative or not finite, when every weight is
    /// zero, or when drawing without replacement asks for more indices than
    /// there are non-zero weights.
    pub fn new(weights: Vec<f64>, num_samples: usize, replacement: bool) -> Result<Self> {
        if let Some((i, w)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(SamplerError::InvalidWeights(format!(
                "weight {i} is {w}, weights must be finite and non-negative"
            )));
        }
        let positive = weights.iter().filter(|w| **w > 0.0).count();
        if positive == 0 {
            return Err(SamplerError::InvalidWeights(
                "at least one weight must be positive".to_string(),
            ));
        }
        if !replacement && num_samples > positive {
            return Err(SamplerError::InvalidWeights(format!(
                "cannot draw {num_samples} indices without replacement from {positive} non-zero weights"
            )));
        }

        let cumulative = weights
            .iter()
            .scan(0.0, |sum, w| {
                *sum += w;
                Some(*sum)
            })
            .collect();

        Ok(Self {
            used: vec![false; weights.len()],
            weights,
            cumulative,
            num_samples,
            replacement,
            current: 0,
            seed: None,
            rng: StdRng::from_rng(&mut rand::rng()),
        })
    }

    /// Makes the draws reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Fresh copy for the given epoch. Seeded samplers derive the epoch's
    /// stream from their seed, so epochs differ but replay identically.
    pub fn for_epoch(&self, epoch: usize) -> Self {
        let mut sampler = self.clone();
        sampler.reset();
        sampler.rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(epoch as u64)),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        sampler
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn replacement(&self) -> bool {
        self.replacement
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    fn draw_with_replacement(&mut self) -> usize {
        let total = self.cumulative.last().copied().unwrap_or(0.0);
        let r = self.rng.random::<f64>() * total;
        self.cumulative
            .partition_point(|&c| c <= r)
            .min(self.weights.len() - 1)
    }

    fn draw_without_replacement(&mut self) -> Option<usize> {
        let total: f64 = self
            .weights
            .iter()
            .zip(&self.used)
            .filter(|(_, used)| !**used)
            .map(|(w, _)| w)
            .sum();
        if total <= 0.0 {
            return None;
        }

        let r = self.rng.random::<f64>() * total;
        let mut sum = 0.0;
        let mut last = None;
        for (idx, (&w, used)) in self.weights.iter().zip(&self.used).enumerate() {
            if *used || w <= 0.0 {
                continue;
            }
            sum += w;
            last = Some(idx);
            if r < sum {
                break;
            }
        }
        if let Some(idx) = last {
            self.used[idx] = true;
        }
        last
    }
}

impl Iterator for WeightedRandomSampler {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.num_samples {
            return None;
        }
        let idx = if self.replacement {
            Some(self.draw_with_replacement())
        } else {
            self.draw_without_replacement()
        };
        if idx.is_some() {
            self.current += 1;
        }
        idx
    }
}

impl Sampler for WeightedRandomSampler {
    fn len(&self) -> usize {
        self.num_samples
    }

    fn reset(&mut self) {
        self.current = 0;
        self.used.fill(false);
    }
}

/// Training sampling strategies selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerKind {
    /// Plain shuffling.
    Default,
    /// Inverse frequency of each sample's full label combination.
    BalancedSample,
    /// Inverse frequency of the rarest class a sample carries.
    BalancedClass,
}

impl SamplerKind {
    pub const NAMES: [&'static str; 3] = ["default", "balanced-sample", "balanced-class"];

    pub fn as_str(self) -> &'static str {
        match self {
            SamplerKind::Default => "default",
            SamplerKind::BalancedSample => "balanced-sample",
            SamplerKind::BalancedClass => "balanced-class",
        }
    }
}

impl fmt::Display for SamplerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplerKind {
    type Err = SamplerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(SamplerKind::Default),
            "balanced-sample" => Ok(SamplerKind::BalancedSample),
            "balanced-class" => Ok(SamplerKind::BalancedClass),
            _ => Err(SamplerError::UnknownSampler {
                name: s.to_string(),
                known: Self::NAMES.to_vec(),
            }),
        }
    }
}

/// Per-sample weights balancing every label column.
///
/// For each column, a value `v` weighs `n / (n_values * count(v))` where
/// `n_values` is the number of distinct values in the column. A sample's
/// weight is the product over columns.
pub fn compute_balanced_sample_weights(labels: &Array2<f32>) -> Array1<f64> {
    let n = labels.nrows();
    let mut weights = Array1::from_elem(n, 1.0);
    if n == 0 {
        return weights;
    }

    for column in labels.axis_iter(Axis(1)) {
        let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
        for v in column.iter() {
            *counts.entry(v.to_bits()).or_default() += 1;
        }
        let n_values = counts.len() as f64;
        for (w, v) in weights.iter_mut().zip(column.iter()) {
            let count = counts[&v.to_bits()] as f64;
            *w *= n as f64 / (n_values * count);
        }
    }
    weights
}

/// Per-sample weights favouring rare classes.
///
/// Class `c` with label frequency `freq_c` gets the ratio
/// `max(freq) / freq_c`; a sample takes the largest ratio among its active
/// labels (scaled by the label value), clipped to `clip_value`. Classes that
/// never occur contribute nothing, so unlabeled samples weigh 0.
pub fn compute_balanced_class_weights(labels: &Array2<f32>, clip_value: f32) -> Array1<f64> {
    let freq = labels.sum_axis(Axis(0)).mapv(f64::from);
    let max_freq = freq.iter().copied().fold(0.0, f64::max);
    if max_freq <= 0.0 {
        tracing::warn!("no class has a positive frequency, every sampling weight is 0");
        return Array1::zeros(labels.nrows());
    }
    let ratio = freq.mapv(|f| if f > 0.0 { max_freq / f } else { 0.0 });

    labels
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .zip(ratio.iter())
                .map(|(&l, &r)| f64::from(l) * r)
                .fold(0.0, f64::max)
                .min(f64::from(clip_value))
        })
        .collect()
}

/// How the training loader orders its samples.
#[derive(Debug, Clone)]
pub enum TrainSampling {
    /// No sampler; the loader shuffles.
    Shuffle,
    /// Indices come from the weighted sampler; the loader does not shuffle.
    Weighted(WeightedRandomSampler),
}

impl TrainSampling {
    pub fn sampler(&self) -> Option<&WeightedRandomSampler> {
        match self {
            TrainSampling::Shuffle => None,
            TrainSampling::Weighted(sampler) => Some(sampler),
        }
    }

    /// Whether the loader should shuffle on its own.
    pub fn shuffle(&self) -> bool {
        matches!(self, TrainSampling::Shuffle)
    }
}

/// Resolves a sampler name into the training loader's sampling strategy.
///
/// `"default"` shuffles without a sampler. The balanced modes weigh every
/// sample of `source` and draw `len(source)` indices with replacement.
///
/// # Errors
///
/// Unknown names yield [`SamplerError::UnknownSampler`]; balanced modes
/// without a source yield [`SamplerError::MissingSource`].
pub fn get_train_sampler_and_shuffler(
    name: &str,
    source: Option<&dyn DataSource>,
    seed: Option<u64>,
    clip_value: f32,
) -> Result<TrainSampling> {
    let kind: SamplerKind = name.parse()?;
    if kind == SamplerKind::Default {
        tracing::info!(sampler = %kind, "shuffling without a sampler");
        return Ok(TrainSampling::Shuffle);
    }

    let source = source.ok_or(SamplerError::MissingSource(kind))?;
    let labels = source.label_matrix()?;
    let weights = match kind {
        SamplerKind::BalancedSample => compute_balanced_sample_weights(&labels),
        _ => compute_balanced_class_weights(&labels, clip_value),
    };

    let mut sampler = WeightedRandomSampler::new(weights.to_vec(), source.len(), true)?;
    if let Some(seed) = seed {
        sampler = sampler.with_seed(seed);
    }
    tracing::info!(
        sampler = %kind,
        samples = source.len(),
        seed = ?seed,
        "built weighted sampler"
    );
    Ok(TrainSampling::Weighted(sampler))
}
