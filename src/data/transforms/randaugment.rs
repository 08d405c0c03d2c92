// --- File: src/data/transforms/randaugment.rs ---

//! RandAugment over a fixed pool of fourteen photometric and geometric
//! operations, followed by a square grey cutout.

use super::color::{adjust_brightness, adjust_contrast, adjust_saturation};
use super::geometric::{rotate_sample, warp_sample};
use super::{Result, Sample, Transform, TransformError};
use ndarray::{s, Array2, ArrayViewMut2, Axis};
use rand::{Rng, RngCore};

/// Side of the cutout square, in pixels.
const CUTOUT: usize = 16;
const CUTOUT_FILL: f32 = 127.0;

/// Operations RandAugment picks from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AugmentOp {
    AutoContrast,
    Brightness,
    Color,
    Contrast,
    Equalize,
    Identity,
    Posterize,
    Rotate,
    Sharpness,
    ShearX,
    ShearY,
    Solarize,
    TranslateX,
    TranslateY,
}

impl AugmentOp {
    pub const POOL: [AugmentOp; 14] = [
        AugmentOp::AutoContrast,
        AugmentOp::Brightness,
        AugmentOp::Color,
        AugmentOp::Contrast,
        AugmentOp::Equalize,
        AugmentOp::Identity,
        AugmentOp::Posterize,
        AugmentOp::Rotate,
        AugmentOp::Sharpness,
        AugmentOp::ShearX,
        AugmentOp::ShearY,
        AugmentOp::Solarize,
        AugmentOp::TranslateX,
        AugmentOp::TranslateY,
    ];

    /// `(max_v, bias)` the magnitude is scaled with.
    fn range(self) -> (f32, f32) {
        match self {
            AugmentOp::Brightness
            | AugmentOp::Color
            | AugmentOp::Contrast
            | AugmentOp::Sharpness => (0.9, 0.05),
            AugmentOp::Posterize => (4.0, 4.0),
            AugmentOp::Rotate => (30.0, 0.0),
            AugmentOp::ShearX | AugmentOp::ShearY => (0.3, 0.0),
            AugmentOp::TranslateX | AugmentOp::TranslateY => (0.3, 0.0),
            AugmentOp::Solarize => (256.0, 0.0),
            AugmentOp::AutoContrast | AugmentOp::Equalize | AugmentOp::Identity => (0.0, 0.0),
        }
    }

    /// Applies the op at magnitude `v` on a `0..=10` scale.
    pub fn apply(self, mut sample: Sample, v: u32, rng: &mut dyn RngCore) -> Result<Sample> {
        let (max_v, bias) = self.range();
        let float_v = v as f32 * max_v / 10.0;
        let int_v = (v as f32 * max_v / 10.0) as i32;
        let layout = sample.layout;
        let c_axis = layout.axes().2;

        match self {
            AugmentOp::Identity => {}
            AugmentOp::AutoContrast => {
                for plane in sample.image.axis_iter_mut(Axis(c_axis)) {
                    auto_contrast(plane);
                }
            }
            AugmentOp::Equalize => {
                for plane in sample.image.axis_iter_mut(Axis(c_axis)) {
                    equalize(plane);
                }
            }
            AugmentOp::Brightness => adjust_brightness(&mut sample.image, float_v + bias),
            AugmentOp::Contrast => adjust_contrast(&mut sample.image, layout, float_v + bias),
            AugmentOp::Color => {
                if sample.channels() == 3 {
                    adjust_saturation(&mut sample.image, layout, float_v + bias);
                }
            }
            AugmentOp::Sharpness => {
                let factor = float_v + bias;
                for plane in sample.image.axis_iter_mut(Axis(c_axis)) {
                    sharpen(plane, factor);
                }
            }
            AugmentOp::Posterize => {
                let bits = (int_v + bias as i32).clamp(1, 8) as u32;
                let keep = !0u8 << (8 - bits);
                sample
                    .image
                    .mapv_inplace(|x| f32::from(x.round().clamp(0.0, 255.0) as u8 & keep));
            }
            AugmentOp::Solarize => {
                let threshold = (256 - int_v) as f32;
                sample
                    .image
                    .mapv_inplace(|x| if x >= threshold { 255.0 - x } else { x });
            }
            AugmentOp::Rotate => {
                let degrees = random_sign(float_v, rng);
                sample = rotate_sample(sample, degrees, 0.0)?;
            }
            AugmentOp::ShearX => {
                let shear = random_sign(float_v, rng);
                sample = warp_sample(sample, move |y, x| (y as f32, x as f32 + shear * y as f32), 0.0)?;
            }
            AugmentOp::ShearY => {
                let shear = random_sign(float_v, rng);
                sample = warp_sample(sample, move |y, x| (y as f32 + shear * x as f32, x as f32), 0.0)?;
            }
            AugmentOp::TranslateX => {
                let shift = random_sign(float_v, rng);
                let pixels = (shift * sample.width() as f32).trunc();
                sample = warp_sample(sample, move |y, x| (y as f32, x as f32 + pixels), 0.0)?;
            }
            AugmentOp::TranslateY => {
                let shift = random_sign(float_v, rng);
                let pixels = (shift * sample.height() as f32).trunc();
                sample = warp_sample(sample, move |y, x| (y as f32 + pixels, x as f32), 0.0)?;
            }
        }
        Ok(sample)
    }
}

fn random_sign(v: f32, rng: &mut dyn RngCore) -> f32 {
    if rng.random::<f32>() < 0.5 {
        -v
    } else {
        v
    }
}

/// Stretches a plane linearly so its extremes hit 0 and 255.
fn auto_contrast(mut plane: ArrayViewMut2<f32>) {
    let (lo, hi) = plane
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if hi > lo {
        plane.mapv_inplace(|x| (x - lo) / (hi - lo) * 255.0);
    }
}

/// Histogram equalisation of a single plane.
fn equalize(mut plane: ArrayViewMut2<f32>) {
    let bin = |v: f32| v.round().clamp(0.0, 255.0) as usize;
    let mut hist = [0usize; 256];
    for &v in plane.iter() {
        hist[bin(v)] += 1;
    }
    let Some(last) = hist.iter().rposition(|&count| count > 0) else {
        return;
    };
    let step = (hist.iter().sum::<usize>() - hist[last]) / 255;
    if step == 0 {
        return;
    }

    let mut lut = [0f32; 256];
    let mut n = step / 2;
    for (slot, count) in lut.iter_mut().zip(hist) {
        *slot = (n / step).min(255) as f32;
        n += count;
    }
    plane.mapv_inplace(|x| lut[bin(x)]);
}

/// Blends a plane with its 3x3 smoothed version; border pixels keep their
/// values in the smoothed plane.
fn sharpen(mut plane: ArrayViewMut2<f32>, factor: f32) {
    let (h, w) = plane.dim();
    if h < 3 || w < 3 {
        return;
    }
    let mut smooth = plane.to_owned();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let window = plane.slice(s![y - 1..y + 2, x - 1..x + 2]);
            smooth[[y, x]] = (window.sum() + 4.0 * plane[[y, x]]) / 13.0;
        }
    }
    let blended: Array2<f32> = ndarray::Zip::from(&smooth)
        .and(&plane)
        .map_collect(|&s, &p| (s + factor * (p - s)).clamp(0.0, 255.0));
    plane.assign(&blended);
}

/// Applies `n` operations drawn with replacement from [`AugmentOp::POOL`],
/// each with probability 0.5 at a magnitude drawn from `1..m`, then pastes a
/// grey square at a random position.
#[derive(Debug, Clone)]
pub struct RandAugment {
    n: usize,
    m: u32,
}

impl RandAugment {
    pub fn new(n: usize, m: u32) -> Result<Self> {
        if !(2..=10).contains(&m) {
            return Err(TransformError::InvalidParameter {
                transform: "RandAugment",
                message: format!("magnitude must lie in 2..=10, got {m}"),
            });
        }
        Ok(Self { n, m })
    }

    fn cutout(sample: &mut Sample, rng: &mut dyn RngCore) {
        let (h, w) = (sample.height(), sample.width());
        if h == 0 || w == 0 {
            return;
        }
        let cy = rng.random_range(0.0..h as f32);
        let cx = rng.random_range(0.0..w as f32);
        let half = CUTOUT as f32 / 2.0;
        let y0 = (cy - half).max(0.0) as usize;
        let x0 = (cx - half).max(0.0) as usize;
        let (y1, x1) = ((y0 + CUTOUT).min(h), (x0 + CUTOUT).min(w));

        let (h_axis, w_axis, _) = sample.layout.axes();
        let mut patch = sample.image.view_mut();
        patch.slice_axis_inplace(Axis(h_axis), (y0..y1).into());
        patch.slice_axis_inplace(Axis(w_axis), (x0..x1).into());
        patch.fill(CUTOUT_FILL);
    }
}

impl Transform for RandAugment {
    fn apply(&self, mut sample: Sample, rng: &mut dyn RngCore) -> Result<Sample> {
        for _ in 0..self.n {
            let op = AugmentOp::POOL[rng.random_range(0..AugmentOp::POOL.len())];
            let v = rng.random_range(1..self.m);
            if rng.random::<f32>() < 0.5 {
                sample = op.apply(sample, v, rng)?;
            }
        }
        Self::cutout(&mut sample, rng);
        Ok(sample)
    }

    fn name(&self) -> &'static str {
        "RandAugment"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::transforms::Layout;
    use ndarray::{array, Array3};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gradient(h: usize, w: usize) -> Array3<f32> {
        Array3::from_shape_fn((h, w, 3), |(y, x, c)| ((y * w + x) * 3 + c) as f32 % 256.0)
    }

    #[test]
    fn test_every_op_keeps_shape_and_range() {
        let mut rng = StdRng::seed_from_u64(5);
        for op in AugmentOp::POOL {
            for v in [1, 5, 9] {
                let out = op.apply(Sample::new(gradient(20, 24)), v, &mut rng).unwrap();
                assert_eq!(out.image.shape(), &[20, 24, 3], "{op:?}");
                assert!(
                    out.image.iter().all(|x| (-1e-3..=255.001).contains(x)),
                    "{op:?} at {v} left the pixel range"
                );
            }
        }
    }

    #[test]
    fn test_posterize_keeps_high_bits() {
        let image = Array3::from_elem((2, 2, 3), 0b1011_0111 as f32);
        // v = 1 gives int(0.4) + 4 = 4 bits
        let out = AugmentOp::Posterize
            .apply(Sample::new(image), 1, &mut rand::rng())
            .unwrap();
        assert!(out.image.iter().all(|&x| x == 0b1011_0000 as f32));
    }

    #[test]
    fn test_solarize_inverts_above_threshold() {
        let image = Array3::from_shape_fn((1, 2, 1), |(_, x, _)| if x == 0 { 10.0 } else { 250.0 });
        // v = 5 gives a threshold of 256 - 128
        let out = AugmentOp::Solarize
            .apply(Sample::new(image), 5, &mut rand::rng())
            .unwrap();
        assert_eq!(out.image[[0, 0, 0]], 10.0);
        assert_eq!(out.image[[0, 1, 0]], 5.0);
    }

    #[test]
    fn test_auto_contrast_stretches() {
        let mut plane = array![[50.0, 100.0], [75.0, 60.0]];
        auto_contrast(plane.view_mut());
        assert_eq!(plane[[0, 0]], 0.0);
        assert_eq!(plane[[0, 1]], 255.0);
    }

    #[test]
    fn test_equalize_spreads_histogram() {
        let mut plane = Array2::from_shape_fn((64, 64), |(y, x)| 100.0 + ((y * 64 + x) % 4) as f32);
        equalize(plane.view_mut());
        let max = plane.iter().cloned().fold(f32::MIN, f32::max);
        assert!(max > 150.0);
        assert_eq!(plane.iter().cloned().fold(f32::MAX, f32::min), 0.0);
    }

    #[test]
    fn test_identity_sharpness_keeps_plane() {
        let original = Array2::from_shape_fn((5, 5), |(y, x)| (y * 5 + x) as f32);
        let mut plane = original.clone();
        sharpen(plane.view_mut(), 1.0);
        for (a, b) in plane.iter().zip(original.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_rand_augment_pastes_grey_cutout() {
        let augment = RandAugment::new(2, 10).unwrap();
        let out = augment
            .apply(Sample::new(Array3::zeros((32, 32, 3))), &mut StdRng::seed_from_u64(3))
            .unwrap();
        assert_eq!(out.image.shape(), &[32, 32, 3]);
        let grey = out.image.iter().filter(|&&x| x == CUTOUT_FILL).count();
        assert!(grey >= 3 * 8 * 8, "cutout covered only {grey} values");
    }

    #[test]
    fn test_rand_augment_channel_first() {
        let mut sample = Sample::new(Array3::from_elem((3, 20, 20), 30.0));
        sample.layout = Layout::Chw;
        let out = RandAugment::new(2, 10)
            .unwrap()
            .apply(sample, &mut StdRng::seed_from_u64(9))
            .unwrap();
        assert_eq!(out.image.shape(), &[3, 20, 20]);
    }

    #[test]
    fn test_rand_augment_rejects_small_magnitude() {
        assert!(RandAugment::new(2, 1).is_err());
        assert!(RandAugment::new(2, 11).is_err());
    }
}
