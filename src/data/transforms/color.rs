// --- File: src/data/transforms/color.rs ---

//! Photometric transforms on raw `0..=255` images: channel normalisation,
//! colour jitter, quantile normalisation and CLAHE.

use super::{Layout, Result, Sample, Transform, TransformError};
use ndarray::{Array2, Array3, ArrayViewMut2, Axis, Zip};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};

const LUMA: [f32; 3] = [0.299, 0.587, 0.114];

/// Per-channel `(x / 255 - mean) / std`.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalize {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl Normalize {
    /// Creates a normaliser.
    ///
    /// # Errors
    ///
    /// Fails when `mean` and `std` differ in length, are empty, or when any
    /// standard deviation is not strictly positive.
    pub fn new(mean: Vec<f32>, std: Vec<f32>) -> Result<Self> {
        if mean.is_empty() || mean.len() != std.len() {
            return Err(TransformError::InvalidParameter {
                transform: "Normalize",
                message: format!(
                    "mean and std need the same non-zero length, got {} and {}",
                    mean.len(),
                    std.len()
                ),
            });
        }
        if let Some((i, s)) = std.iter().enumerate().find(|(_, s)| !(**s > 0.0)) {
            return Err(TransformError::InvalidParameter {
                transform: "Normalize",
                message: format!("standard deviation at index {i} must be greater than 0, got {s}"),
            });
        }
        Ok(Self { mean, std })
    }

    /// ImageNet statistics.
    pub fn imagenet() -> Self {
        Self {
            mean: vec![0.485, 0.456, 0.406],
            std: vec![0.229, 0.224, 0.225],
        }
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    pub fn std(&self) -> &[f32] {
        &self.std
    }
}

impl Transform for Normalize {
    fn apply(&self, mut sample: Sample, _rng: &mut dyn RngCore) -> Result<Sample> {
        let channels = sample.channels();
        if channels != self.mean.len() {
            return Err(TransformError::ChannelMismatch {
                transform: self.name(),
                expected: self.mean.len(),
                actual: channels,
            });
        }
        let c_axis = sample.layout.axes().2;
        for (mut plane, (&m, &s)) in sample
            .image
            .axis_iter_mut(Axis(c_axis))
            .zip(self.mean.iter().zip(&self.std))
        {
            plane.mapv_inplace(|x| (x / 255.0 - m) / s);
        }
        Ok(sample)
    }

    fn name(&self) -> &'static str {
        "Normalize"
    }
}

/// Luma plane of an RGB image.
pub(crate) fn grayscale(image: &Array3<f32>, layout: Layout) -> Array2<f32> {
    let c_axis = layout.axes().2;
    let mut gray = Array2::zeros((
        image.len_of(Axis(layout.axes().0)),
        image.len_of(Axis(layout.axes().1)),
    ));
    for (plane, weight) in image.axis_iter(Axis(c_axis)).zip(LUMA) {
        gray.scaled_add(weight, &plane);
    }
    gray
}

pub(crate) fn adjust_brightness(image: &mut Array3<f32>, factor: f32) {
    image.mapv_inplace(|x| (x * factor).clamp(0.0, 255.0));
}

/// Blends every pixel with the mean grey level.
pub(crate) fn adjust_contrast(image: &mut Array3<f32>, layout: Layout, factor: f32) {
    let mean = if image.len_of(Axis(layout.axes().2)) == 3 {
        grayscale(image, layout).mean().unwrap_or(0.0)
    } else {
        image.mean().unwrap_or(0.0)
    };
    image.mapv_inplace(|x| (mean + factor * (x - mean)).clamp(0.0, 255.0));
}

/// Blends every pixel with its own grey value. Needs three channels.
pub(crate) fn adjust_saturation(image: &mut Array3<f32>, layout: Layout, factor: f32) {
    let gray = grayscale(image, layout);
    for mut plane in image.axis_iter_mut(Axis(layout.axes().2)) {
        Zip::from(&mut plane)
            .and(&gray)
            .for_each(|x, &g| *x = (g + factor * (*x - g)).clamp(0.0, 255.0));
    }
}

fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let s = if max > 0.0 { delta / max } else { 0.0 };
    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let h6 = h.rem_euclid(1.0) * 6.0;
    let sector = h6.floor();
    let f = h6 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match sector as u32 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

/// Rotates the hue of every pixel by `shift` turns. Needs three channels.
pub(crate) fn adjust_hue(image: &mut Array3<f32>, layout: Layout, shift: f32) {
    for mut px in image.lanes_mut(Axis(layout.axes().2)) {
        let (h, s, v) = rgb_to_hsv(px[0] / 255.0, px[1] / 255.0, px[2] / 255.0);
        let (r, g, b) = hsv_to_rgb(h + shift, s, v);
        px[0] = (r * 255.0).clamp(0.0, 255.0);
        px[1] = (g * 255.0).clamp(0.0, 255.0);
        px[2] = (b * 255.0).clamp(0.0, 255.0);
    }
}

/// Random brightness, contrast, saturation and hue, applied in random order.
///
/// Brightness, contrast and saturation factors are drawn from
/// `[max(0, 1 - x), 1 + x]`; the hue shift from `[-hue, hue]` turns.
#[derive(Debug, Clone)]
pub struct ColorJitter {
    brightness: f32,
    contrast: f32,
    saturation: f32,
    hue: f32,
}

impl ColorJitter {
    pub fn new(brightness: f32, contrast: f32, saturation: f32, hue: f32) -> Result<Self> {
        if brightness < 0.0 || contrast < 0.0 || saturation < 0.0 {
            return Err(TransformError::InvalidParameter {
                transform: "ColorJitter",
                message: "brightness, contrast and saturation must be non-negative".to_string(),
            });
        }
        if !(0.0..=0.5).contains(&hue) {
            return Err(TransformError::InvalidParameter {
                transform: "ColorJitter",
                message: format!("hue must lie in [0, 0.5], got {hue}"),
            });
        }
        Ok(Self {
            brightness,
            contrast,
            saturation,
            hue,
        })
    }

    fn factor(amount: f32, rng: &mut dyn RngCore) -> Option<f32> {
        (amount > 0.0).then(|| rng.random_range((1.0 - amount).max(0.0)..=1.0 + amount))
    }
}

impl Transform for ColorJitter {
    fn apply(&self, mut sample: Sample, rng: &mut dyn RngCore) -> Result<Sample> {
        let channels = sample.channels();
        if channels != 3 && (self.saturation > 0.0 || self.hue > 0.0) {
            return Err(TransformError::ChannelMismatch {
                transform: self.name(),
                expected: 3,
                actual: channels,
            });
        }

        let mut order = [0u8, 1, 2, 3];
        order.shuffle(rng);
        let layout = sample.layout;
        for step in order {
            match step {
                0 => {
                    if let Some(f) = Self::factor(self.brightness, rng) {
                        adjust_brightness(&mut sample.image, f);
                    }
                }
                1 => {
                    if let Some(f) = Self::factor(self.contrast, rng) {
                        adjust_contrast(&mut sample.image, layout, f);
                    }
                }
                2 => {
                    if let Some(f) = Self::factor(self.saturation, rng) {
                        adjust_saturation(&mut sample.image, layout, f);
                    }
                }
                _ => {
                    if self.hue > 0.0 {
                        let shift = rng.random_range(-self.hue..=self.hue);
                        adjust_hue(&mut sample.image, layout, shift);
                    }
                }
            }
        }
        Ok(sample)
    }

    fn name(&self) -> &'static str {
        "ColorJitter"
    }
}

/// Linear-interpolated quantile of sorted values.
fn quantile(sorted: &[f32], q: f32) -> f32 {
    let pos = q * (sorted.len() - 1) as f32;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f32)
}

/// Channel-independent quantile normalisation: each channel is clipped to
/// its `[low, high]` quantiles and stretched to `0..=255`.
#[derive(Debug, Clone)]
pub struct QuantileNormalization {
    low: f32,
    high: f32,
}

impl QuantileNormalization {
    pub fn new(low: f32, high: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&low) || !(low < high && high <= 1.0) {
            return Err(TransformError::InvalidParameter {
                transform: "QuantileNormalization",
                message: format!("quantiles must satisfy 0 <= low < high <= 1, got {low} and {high}"),
            });
        }
        Ok(Self { low, high })
    }
}

impl Default for QuantileNormalization {
    fn default() -> Self {
        Self {
            low: 0.01,
            high: 0.99,
        }
    }
}

impl Transform for QuantileNormalization {
    fn apply(&self, mut sample: Sample, _rng: &mut dyn RngCore) -> Result<Sample> {
        let c_axis = sample.layout.axes().2;
        for mut plane in sample.image.axis_iter_mut(Axis(c_axis)) {
            if plane.is_empty() {
                continue;
            }
            let mut sorted: Vec<f32> = plane.iter().copied().collect();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let lo = quantile(&sorted, self.low);
            let hi = quantile(&sorted, self.high);
            if hi - lo <= f32::EPSILON {
                plane.fill(0.0);
                continue;
            }
            plane.mapv_inplace(|x| ((x - lo) / (hi - lo)).clamp(0.0, 1.0) * 255.0);
        }
        Ok(sample)
    }

    fn name(&self) -> &'static str {
        "QuantileNormalization"
    }
}

/// Contrast-limited adaptive histogram equalisation, per channel.
///
/// Each channel is split into a grid of tiles; every tile gets its own
/// clipped-histogram lookup table and pixels blend the tables of the four
/// nearest tile centres.
#[derive(Debug, Clone)]
pub struct Clahe {
    clip_limit: f32,
    tiles: (usize, usize),
}

impl Clahe {
    pub fn new(clip_limit: f32, tiles: (usize, usize)) -> Result<Self> {
        if !(clip_limit > 0.0) || tiles.0 == 0 || tiles.1 == 0 {
            return Err(TransformError::InvalidParameter {
                transform: "Clahe",
                message: format!(
                    "clip limit must be > 0 and the tile grid non-empty, got {clip_limit} and {tiles:?}"
                ),
            });
        }
        Ok(Self { clip_limit, tiles })
    }

    fn tile_lut(&self, plane: &ArrayViewMut2<f32>, rows: (usize, usize), cols: (usize, usize)) -> [f32; 256] {
        let mut hist = [0f32; 256];
        for y in rows.0..rows.1 {
            for x in cols.0..cols.1 {
                hist[bin(plane[[y, x]])] += 1.0;
            }
        }

        let area = ((rows.1 - rows.0) * (cols.1 - cols.0)) as f32;
        let limit = (self.clip_limit * area / 256.0).max(1.0);
        let mut excess = 0.0;
        for count in hist.iter_mut() {
            if *count > limit {
                excess += *count - limit;
                *count = limit;
            }
        }
        let bonus = excess / 256.0;

        let mut lut = [0f32; 256];
        let mut cdf = 0.0;
        for (slot, count) in lut.iter_mut().zip(hist) {
            cdf += count + bonus;
            *slot = (cdf * 255.0 / area).clamp(0.0, 255.0);
        }
        lut
    }

    fn equalize(&self, mut plane: ArrayViewMut2<f32>) {
        let (h, w) = plane.dim();
        if h == 0 || w == 0 {
            return;
        }
        let tile_h = h.div_ceil(self.tiles.0.min(h));
        let tile_w = w.div_ceil(self.tiles.1.min(w));
        let (ny, nx) = (h.div_ceil(tile_h), w.div_ceil(tile_w));

        let mut luts = Vec::with_capacity(ny * nx);
        for ty in 0..ny {
            for tx in 0..nx {
                let rows = (ty * tile_h, ((ty + 1) * tile_h).min(h));
                let cols = (tx * tile_w, ((tx + 1) * tile_w).min(w));
                luts.push(self.tile_lut(&plane, rows, cols));
            }
        }

        for y in 0..h {
            let (y0, y1, wy) = neighbours((y as f32 + 0.5) / tile_h as f32 - 0.5, ny);
            for x in 0..w {
                let (x0, x1, wx) = neighbours((x as f32 + 0.5) / tile_w as f32 - 0.5, nx);
                let v = bin(plane[[y, x]]);
                let top = luts[y0 * nx + x0][v] * (1.0 - wx) + luts[y0 * nx + x1][v] * wx;
                let bottom = luts[y1 * nx + x0][v] * (1.0 - wx) + luts[y1 * nx + x1][v] * wx;
                plane[[y, x]] = top * (1.0 - wy) + bottom * wy;
            }
        }
    }
}

impl Default for Clahe {
    fn default() -> Self {
        Self {
            clip_limit: 2.0,
            tiles: (8, 8),
        }
    }
}

fn bin(v: f32) -> usize {
    v.round().clamp(0.0, 255.0) as usize
}

/// Indices of the two tile centres around fractional tile position `f`, and
/// the weight of the second one.
fn neighbours(f: f32, n: usize) -> (usize, usize, f32) {
    if f <= 0.0 {
        (0, 0, 0.0)
    } else if f >= (n - 1) as f32 {
        (n - 1, n - 1, 0.0)
    } else {
        let i = f.floor();
        (i as usize, i as usize + 1, f - i)
    }
}

impl Transform for Clahe {
    fn apply(&self, mut sample: Sample, _rng: &mut dyn RngCore) -> Result<Sample> {
        let c_axis = sample.layout.axes().2;
        for plane in sample.image.axis_iter_mut(Axis(c_axis)) {
            self.equalize(plane);
        }
        Ok(sample)
    }

    fn name(&self) -> &'static str {
        "CLAHE"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn range(values: impl Iterator<Item = f32>) -> f32 {
        let (lo, hi) = values.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        hi - lo
    }

    #[test]
    fn test_normalize_imagenet() {
        let image = Array3::from_elem((2, 2, 3), 255.0);
        let out = Normalize::imagenet()
            .apply(Sample::new(image), &mut rand::rng())
            .unwrap();
        assert!((out.image[[0, 0, 0]] - (1.0 - 0.485) / 0.229).abs() < 1e-5);
        assert!((out.image[[1, 1, 2]] - (1.0 - 0.406) / 0.225).abs() < 1e-5);
    }

    #[test]
    fn test_normalize_channel_first() {
        let image = Array3::from_elem((2, 2, 2), 0.0);
        let mut sample = Sample::new(image);
        sample.layout = Layout::Chw;
        let norm = Normalize::new(vec![0.5, 0.25], vec![0.5, 0.25]).unwrap();
        let out = norm.apply(sample, &mut rand::rng()).unwrap();
        assert_eq!(out.image[[0, 1, 1]], -1.0);
        assert_eq!(out.image[[1, 0, 0]], -1.0);
    }

    #[test]
    fn test_normalize_validation() {
        assert!(Normalize::new(vec![0.5], vec![0.5, 0.5]).is_err());
        assert!(Normalize::new(vec![0.5], vec![0.0]).is_err());
        assert!(Normalize::new(vec![], vec![]).is_err());

        let image = Array3::zeros((2, 2, 4));
        let result = Normalize::imagenet().apply(Sample::new(image), &mut rand::rng());
        assert!(matches!(
            result,
            Err(TransformError::ChannelMismatch { expected: 3, actual: 4, .. })
        ));
    }

    #[test]
    fn test_hsv_round_trip() {
        for &(r, g, b) in &[(1.0, 0.0, 0.0), (0.2, 0.6, 0.4), (0.5, 0.5, 0.5), (0.1, 0.2, 0.9)] {
            let (h, s, v) = rgb_to_hsv(r, g, b);
            let (r2, g2, b2) = hsv_to_rgb(h, s, v);
            assert!((r - r2).abs() < 1e-5 && (g - g2).abs() < 1e-5 && (b - b2).abs() < 1e-5);
        }
    }

    #[test]
    fn test_color_jitter_stays_in_range() {
        let image = Array3::from_shape_fn((8, 8, 3), |(y, x, c)| ((y * 8 + x) * 4 + c) as f32);
        let jitter = ColorJitter::new(0.3, 0.3, 0.3, 0.1).unwrap();
        let out = jitter
            .apply(Sample::new(image), &mut StdRng::seed_from_u64(2))
            .unwrap();
        assert!(out.image.iter().all(|v| (0.0..=255.0).contains(v)));
    }

    #[test]
    fn test_color_jitter_needs_rgb_for_hue() {
        let image = Array3::zeros((2, 2, 4));
        let jitter = ColorJitter::new(0.3, 0.3, 0.3, 0.1).unwrap();
        assert!(jitter.apply(Sample::new(image.clone()), &mut rand::rng()).is_err());

        let brightness_only = ColorJitter::new(0.3, 0.0, 0.0, 0.0).unwrap();
        assert!(brightness_only.apply(Sample::new(image), &mut rand::rng()).is_ok());
    }

    #[test]
    fn test_hue_shift_keeps_grey() {
        let mut image = Array3::from_elem((2, 2, 3), 128.0);
        adjust_hue(&mut image, Layout::Hwc, 0.25);
        assert!(image.iter().all(|&v| (v - 128.0).abs() < 1e-3));
    }

    #[test]
    fn test_quantile_normalization_stretches_each_channel() {
        let image = Array3::from_shape_fn((10, 10, 2), |(y, x, c)| {
            (y * 10 + x) as f32 * if c == 0 { 1.0 } else { 0.1 }
        });
        let out = QuantileNormalization::default()
            .apply(Sample::new(image), &mut rand::rng())
            .unwrap();
        for plane in out.image.axis_iter(Axis(2)) {
            let max = plane.iter().cloned().fold(f32::MIN, f32::max);
            let min = plane.iter().cloned().fold(f32::MAX, f32::min);
            assert_eq!(max, 255.0);
            assert_eq!(min, 0.0);
        }
    }

    #[test]
    fn test_quantile() {
        let sorted = [0.0, 10.0, 20.0, 30.0, 40.0];
        assert_eq!(quantile(&sorted, 0.0), 0.0);
        assert_eq!(quantile(&sorted, 1.0), 40.0);
        assert!((quantile(&sorted, 0.5) - 20.0).abs() < 1e-6);
        assert!((quantile(&sorted, 0.1) - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_clahe_spreads_low_contrast_values() {
        let image = Array3::from_shape_fn((16, 16, 1), |(y, x, _)| 100.0 + ((y * 16 + x) % 11) as f32);
        let before = range(image.iter().copied());
        let out = Clahe::new(2.0, (2, 2))
            .unwrap()
            .apply(Sample::new(image), &mut rand::rng())
            .unwrap();
        let after = range(out.image.iter().copied());
        assert!(after > before, "range {before} -> {after}");
        assert!(out.image.iter().all(|v| (0.0..=255.0).contains(v)));
    }

    #[test]
    fn test_clahe_constant_image_stays_constant() {
        let image = Array3::from_elem((12, 12, 3), 60.0);
        let out = Clahe::default()
            .apply(Sample::new(image), &mut rand::rng())
            .unwrap();
        let first = out.image[[0, 0, 0]];
        assert!(out.image.iter().all(|&v| (v - first).abs() < 1e-3));
    }

    #[test]
    fn test_clahe_small_image_has_fewer_tiles() {
        let image = Array3::from_shape_fn((3, 5, 1), |(y, x, _)| (y * 5 + x) as f32 * 10.0);
        let out = Clahe::default()
            .apply(Sample::new(image), &mut rand::rng())
            .unwrap();
        assert_eq!(out.image.shape(), &[3, 5, 1]);
    }
}
