// --- File: src/data/transforms/geometric.rs ---

//! Spatial transforms: resizing, flipping, rotation, elastic warps, cropping
//! and layout changes.
//!
//! Every spatial step moves the mask together with the image. Label maps are
//! resampled with nearest-neighbour interpolation so class ids survive.

use super::resample::{
    blur_plane, map_image_planes, map_mask_planes, remap_plane, resize_image, resize_mask,
};
use super::{mask_axes, Layout, Result, Sample, Transform, TransformError};
use ndarray::{Array, Array2, Axis, Dimension, Slice};
use rand::{Rng, RngCore};

pub use super::resample::Interpolation;

/// Ignore value written into label-map padding.
pub const IGNORE_INDEX: f32 = 255.0;

fn positive(transform: &'static str, what: &str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(TransformError::InvalidParameter {
            transform,
            message: format!("{what} must be greater than 0"),
        });
    }
    Ok(value)
}

fn probability(transform: &'static str, p: f32) -> Result<f32> {
    if !(0.0..=1.0).contains(&p) {
        return Err(TransformError::InvalidParameter {
            transform,
            message: format!("probability must lie in [0, 1], got {p}"),
        });
    }
    Ok(p)
}

/// Resizes image and mask to `(height, width)`.
fn resize_sample(
    mut sample: Sample,
    height: usize,
    width: usize,
    mask_interpolation: Interpolation,
) -> Result<Sample> {
    if (sample.height(), sample.width()) != (height, width) {
        sample.image = resize_image(&sample.image, sample.layout, height, width)?;
    }
    if let Some(mask) = sample.mask.take() {
        sample.mask = Some(resize_mask(&mask, height, width, mask_interpolation)?);
    }
    Ok(sample)
}

/// Target size of a [`Resize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeTarget {
    /// Exactly `(height, width)`.
    Exact(usize, usize),
    /// Preserve the aspect ratio; the shorter side becomes this length.
    ShorterSide(usize),
}

impl ResizeTarget {
    /// Output `(height, width)` for an input of `(height, width)`.
    ///
    /// `ShorterSide` rounds the longer side up: `(500, 480)` at 512 gives
    /// `(534, 512)`, so a following crop never runs short.
    pub fn output_size(self, height: usize, width: usize) -> (usize, usize) {
        match self {
            ResizeTarget::Exact(h, w) => (h, w),
            ResizeTarget::ShorterSide(s) => {
                if height <= width {
                    let w = (width as f64 * s as f64 / height as f64).ceil() as usize;
                    (s, w.max(s))
                } else {
                    let h = (height as f64 * s as f64 / width as f64).ceil() as usize;
                    (h.max(s), s)
                }
            }
        }
    }
}

/// Deterministic resize of image and mask.
#[derive(Debug, Clone)]
pub struct Resize {
    target: ResizeTarget,
    mask_interpolation: Interpolation,
}

impl Resize {
    pub fn new(target: ResizeTarget) -> Self {
        Self {
            target,
            mask_interpolation: Interpolation::Nearest,
        }
    }

    pub fn exact(height: usize, width: usize) -> Self {
        Self::new(ResizeTarget::Exact(height, width))
    }

    pub fn shorter_side(size: usize) -> Self {
        Self::new(ResizeTarget::ShorterSide(size))
    }

    /// Continuous targets (class activation maps) resize bilinearly.
    pub fn with_mask_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.mask_interpolation = interpolation;
        self
    }
}

impl Transform for Resize {
    fn apply(&self, sample: Sample, _rng: &mut dyn RngCore) -> Result<Sample> {
        let (h, w) = self.target.output_size(sample.height(), sample.width());
        positive(self.name(), "height", h)?;
        positive(self.name(), "width", w)?;
        resize_sample(sample, h, w, self.mask_interpolation)
    }

    fn name(&self) -> &'static str {
        "Resize"
    }
}

/// Random rescale: draws a size in `[min_size, max_size]` and scales the
/// longer side to it, or the shorter side when `overcrop` is set.
#[derive(Debug, Clone)]
pub struct RandomResize {
    min_size: usize,
    max_size: usize,
    overcrop: bool,
}

impl RandomResize {
    pub fn new(min_size: usize, max_size: usize) -> Result<Self> {
        positive("RandomResize", "min_size", min_size)?;
        if min_size > max_size {
            return Err(TransformError::InvalidParameter {
                transform: "RandomResize",
                message: format!("min_size {min_size} exceeds max_size {max_size}"),
            });
        }
        Ok(Self {
            min_size,
            max_size,
            overcrop: false,
        })
    }

    pub fn with_overcrop(mut self, overcrop: bool) -> Self {
        self.overcrop = overcrop;
        self
    }
}

impl Transform for RandomResize {
    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Result<Sample> {
        let size = rng.random_range(self.min_size..=self.max_size);
        let (h, w) = (sample.height(), sample.width());
        let reference = if self.overcrop { h.min(w) } else { h.max(w) };
        let scale = size as f64 / reference.max(1) as f64;
        let new_h = ((h as f64 * scale).round() as usize).max(1);
        let new_w = ((w as f64 * scale).round() as usize).max(1);
        resize_sample(sample, new_h, new_w, Interpolation::Nearest)
    }

    fn name(&self) -> &'static str {
        "RandomResize"
    }
}

fn flip_axis(
    mut sample: Sample,
    image_axis: usize,
    mask_axis_of: fn((usize, usize)) -> usize,
) -> Result<Sample> {
    sample.image.invert_axis(Axis(image_axis));
    sample.image = sample.image.as_standard_layout().into_owned();
    if let Some(mut mask) = sample.mask.take() {
        let axis = mask_axis_of(mask_axes(&mask)?);
        mask.invert_axis(Axis(axis));
        sample.mask = Some(mask.as_standard_layout().into_owned());
    }
    Ok(sample)
}

/// Mirrors image and mask left-right with probability `p`.
#[derive(Debug, Clone)]
pub struct RandomHorizontalFlip {
    p: f32,
}

impl RandomHorizontalFlip {
    pub fn new(p: f32) -> Self {
        Self { p: p.clamp(0.0, 1.0) }
    }
}

impl Default for RandomHorizontalFlip {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl Transform for RandomHorizontalFlip {
    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Result<Sample> {
        if rng.random::<f32>() >= self.p {
            return Ok(sample);
        }
        let axis = sample.layout.axes().1;
        flip_axis(sample, axis, |(_, w)| w)
    }

    fn name(&self) -> &'static str {
        "RandomHorizontalFlip"
    }
}

/// Mirrors image and mask top-bottom with probability `p`.
#[derive(Debug, Clone)]
pub struct RandomVerticalFlip {
    p: f32,
}

impl RandomVerticalFlip {
    pub fn new(p: f32) -> Self {
        Self { p: p.clamp(0.0, 1.0) }
    }
}

impl Default for RandomVerticalFlip {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl Transform for RandomVerticalFlip {
    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Result<Sample> {
        if rng.random::<f32>() >= self.p {
            return Ok(sample);
        }
        let axis = sample.layout.axes().0;
        flip_axis(sample, axis, |(h, _)| h)
    }

    fn name(&self) -> &'static str {
        "RandomVerticalFlip"
    }
}

/// Resamples image and mask so that output pixel `(y, x)` reads source
/// coordinates `source(y, x)`. The image is interpolated bilinearly and
/// padded with `fill`; the mask is read nearest and padded with the ignore
/// index.
pub(crate) fn warp_sample<F>(mut sample: Sample, source: F, fill: f32) -> Result<Sample>
where
    F: Fn(usize, usize) -> (f32, f32) + Copy,
{
    sample.image = map_image_planes(&sample.image, sample.layout, |p| {
        Ok(remap_plane(p, source, Interpolation::Bilinear, fill))
    })?;
    if let Some(mask) = sample.mask.take() {
        sample.mask = Some(map_mask_planes(&mask, |p| {
            Ok(remap_plane(p, source, Interpolation::Nearest, IGNORE_INDEX))
        })?);
    }
    Ok(sample)
}

/// Rotates a sample counter-clockwise by `degrees` about its centre.
pub(crate) fn rotate_sample(sample: Sample, degrees: f32, fill: f32) -> Result<Sample> {
    let (h, w) = (sample.height(), sample.width());
    let (cy, cx) = ((h as f32 - 1.0) / 2.0, (w as f32 - 1.0) / 2.0);
    let (sin, cos) = degrees.to_radians().sin_cos();
    warp_sample(
        sample,
        move |y, x| {
            let (dy, dx) = (y as f32 - cy, x as f32 - cx);
            (cy + dx * sin + dy * cos, cx + dx * cos - dy * sin)
        },
        fill,
    )
}

/// Rotation by an angle drawn uniformly from `[min_degrees, max_degrees]`.
#[derive(Debug, Clone)]
pub struct RandomRotation {
    min_degrees: f32,
    max_degrees: f32,
}

impl RandomRotation {
    pub fn new(min_degrees: f32, max_degrees: f32) -> Result<Self> {
        if min_degrees > max_degrees {
            return Err(TransformError::InvalidParameter {
                transform: "RandomRotation",
                message: format!("degree range [{min_degrees}, {max_degrees}] is empty"),
            });
        }
        Ok(Self {
            min_degrees,
            max_degrees,
        })
    }
}

impl Transform for RandomRotation {
    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Result<Sample> {
        let degrees = if self.max_degrees > self.min_degrees {
            rng.random_range(self.min_degrees..=self.max_degrees)
        } else {
            self.min_degrees
        };
        rotate_sample(sample, degrees, 0.0)
    }

    fn name(&self) -> &'static str {
        "RandomRotation"
    }
}

/// Applies the wrapped transform with probability `p`.
pub struct RandomApply {
    inner: Box<dyn Transform>,
    p: f32,
}

impl RandomApply {
    pub fn new<T: Transform + 'static>(inner: T, p: f32) -> Result<Self> {
        Ok(Self {
            inner: Box::new(inner),
            p: probability("RandomApply", p)?,
        })
    }
}

impl Transform for RandomApply {
    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Result<Sample> {
        if rng.random::<f32>() < self.p {
            self.inner.apply(sample, rng)
        } else {
            Ok(sample)
        }
    }

    fn name(&self) -> &'static str {
        "RandomApply"
    }
}

/// Elastic deformation with a Gaussian-smoothed random displacement field.
///
/// Displacements are drawn uniformly from `[-1, 1]`, blurred with `sigma`
/// and scaled by `alpha / 2` pixels, so `alpha` is the strength relative to
/// a grid normalised to `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct ElasticTransform {
    alpha: f32,
    sigma: f32,
}

impl ElasticTransform {
    pub fn new(alpha: f32, sigma: f32) -> Result<Self> {
        if alpha < 0.0 || sigma <= 0.0 {
            return Err(TransformError::InvalidParameter {
                transform: "ElasticTransform",
                message: format!(
                    "alpha must be >= 0 and sigma > 0, got alpha={alpha} sigma={sigma}"
                ),
            });
        }
        Ok(Self { alpha, sigma })
    }

    fn displacement(&self, h: usize, w: usize, rng: &mut dyn RngCore) -> Result<Array2<f32>> {
        let noise = Array2::from_shape_simple_fn((h, w), || rng.random_range(-1.0f32..=1.0));
        Ok(blur_plane(noise.view(), self.sigma)? * (self.alpha / 2.0))
    }
}

impl Transform for ElasticTransform {
    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Result<Sample> {
        let (h, w) = (sample.height(), sample.width());
        let dy = self.displacement(h, w, rng)?;
        let dx = self.displacement(h, w, rng)?;
        warp_sample(
            sample,
            |y, x| (y as f32 + dy[[y, x]], x as f32 + dx[[y, x]]),
            0.0,
        )
    }

    fn name(&self) -> &'static str {
        "ElasticTransform"
    }
}

/// Placement of a crop window: where it is read from and where it lands on
/// the `size x size` canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CropWindow {
    pub src_top: usize,
    pub src_left: usize,
    pub dst_top: usize,
    pub dst_left: usize,
    pub height: usize,
    pub width: usize,
}

impl CropWindow {
    /// Random placement. Larger sides are cropped at a random offset, smaller
    /// sides are pasted at a random offset of the canvas.
    pub fn random(h: usize, w: usize, size: usize, rng: &mut dyn RngCore) -> Self {
        let (src_top, dst_top) = Self::offsets(h, size, rng);
        let (src_left, dst_left) = Self::offsets(w, size, rng);
        Self {
            src_top,
            src_left,
            dst_top,
            dst_left,
            height: h.min(size),
            width: w.min(size),
        }
    }

    pub fn top_left(h: usize, w: usize, size: usize) -> Self {
        Self {
            src_top: 0,
            src_left: 0,
            dst_top: 0,
            dst_left: 0,
            height: h.min(size),
            width: w.min(size),
        }
    }

    fn offsets(len: usize, size: usize, rng: &mut dyn RngCore) -> (usize, usize) {
        if len > size {
            (rng.random_range(0..=len - size), 0)
        } else {
            (0, rng.random_range(0..=size - len))
        }
    }

    /// Copies the window of `src` into a `size x size` canvas filled with `fill`.
    pub fn apply<D: Dimension>(
        &self,
        src: &Array<f32, D>,
        axes: (usize, usize),
        size: usize,
        fill: f32,
    ) -> Array<f32, D> {
        let (h_axis, w_axis) = axes;
        let mut shape = src.raw_dim();
        shape[h_axis] = size;
        shape[w_axis] = size;
        let mut canvas = Array::from_elem(shape, fill);

        let mut dst = canvas.view_mut();
        dst.slice_axis_inplace(Axis(h_axis), Slice::from(self.dst_top..self.dst_top + self.height));
        dst.slice_axis_inplace(Axis(w_axis), Slice::from(self.dst_left..self.dst_left + self.width));
        let mut window = src.view();
        window.slice_axis_inplace(Axis(h_axis), Slice::from(self.src_top..self.src_top + self.height));
        window.slice_axis_inplace(Axis(w_axis), Slice::from(self.src_left..self.src_left + self.width));
        dst.assign(&window);

        canvas
    }
}

fn crop_sample(mut sample: Sample, window: CropWindow, size: usize, ignore_value: f32) -> Result<Sample> {
    let (h_axis, w_axis, _) = sample.layout.axes();
    sample.image = window.apply(&sample.image, (h_axis, w_axis), size, 0.0);
    if let Some(mask) = sample.mask.take() {
        let axes = mask_axes(&mask)?;
        sample.mask = Some(window.apply(&mask, axes, size, ignore_value));
    }
    Ok(sample)
}

/// `size x size` crop at a random position, zero padded when the sample is
/// smaller than the crop. Mask padding uses `ignore_value`.
#[derive(Debug, Clone)]
pub struct RandomCrop {
    size: usize,
    ignore_value: f32,
}

impl RandomCrop {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ignore_value: IGNORE_INDEX,
        }
    }

    pub fn with_ignore_value(mut self, ignore_value: f32) -> Self {
        self.ignore_value = ignore_value;
        self
    }
}

impl Transform for RandomCrop {
    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Result<Sample> {
        positive(self.name(), "size", self.size)?;
        let window = CropWindow::random(sample.height(), sample.width(), self.size, rng);
        crop_sample(sample, window, self.size, self.ignore_value)
    }

    fn name(&self) -> &'static str {
        "RandomCrop"
    }
}

/// `size x size` crop anchored at the top-left corner, used for evaluation.
#[derive(Debug, Clone)]
pub struct TopLeftCrop {
    size: usize,
    ignore_value: f32,
}

impl TopLeftCrop {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ignore_value: IGNORE_INDEX,
        }
    }
}

impl Transform for TopLeftCrop {
    fn apply(&self, sample: Sample, _rng: &mut dyn RngCore) -> Result<Sample> {
        positive(self.name(), "size", self.size)?;
        let window = CropWindow::top_left(sample.height(), sample.width(), self.size);
        crop_sample(sample, window, self.size, self.ignore_value)
    }

    fn name(&self) -> &'static str {
        "TopLeftCrop"
    }
}

/// HWC -> CHW.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transpose;

impl Transform for Transpose {
    fn apply(&self, mut sample: Sample, _rng: &mut dyn RngCore) -> Result<Sample> {
        if sample.layout != Layout::Hwc {
            return Err(TransformError::Layout {
                transform: self.name(),
                expected: Layout::Hwc,
            });
        }
        sample.image = sample
            .image
            .permuted_axes([2, 0, 1])
            .as_standard_layout()
            .into_owned();
        sample.layout = Layout::Chw;
        Ok(sample)
    }

    fn name(&self) -> &'static str {
        "Transpose"
    }
}

/// Resizes only the mask to `size x size` (nearest).
#[derive(Debug, Clone)]
pub struct ResizeMask {
    size: usize,
}

impl ResizeMask {
    pub fn new(size: usize) -> Result<Self> {
        Ok(Self {
            size: positive("ResizeMask", "size", size)?,
        })
    }
}

impl Transform for ResizeMask {
    fn apply(&self, mut sample: Sample, _rng: &mut dyn RngCore) -> Result<Sample> {
        let mask = sample.mask.take().ok_or(TransformError::MissingMask {
            transform: self.name(),
        })?;
        sample.mask = Some(resize_mask(&mask, self.size, self.size, Interpolation::Nearest)?);
        Ok(sample)
    }

    fn name(&self) -> &'static str {
        "ResizeMask"
    }
}

/// Promotes a 2-D mask to `(1, H, W)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtLeast3d;

impl Transform for AtLeast3d {
    fn apply(&self, mut sample: Sample, _rng: &mut dyn RngCore) -> Result<Sample> {
        if let Some(mask) = sample.mask.take() {
            sample.mask = Some(if mask.ndim() < 3 {
                mask.insert_axis(Axis(0))
            } else {
                mask
            });
        }
        Ok(sample)
    }

    fn name(&self) -> &'static str {
        "AtLeast3d"
    }
}

/// Runs a transform on the image alone; the mask is detached meanwhile.
pub struct ApplyToImage {
    inner: Box<dyn Transform>,
}

impl ApplyToImage {
    pub fn new<T: Transform + 'static>(inner: T) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl Transform for ApplyToImage {
    fn apply(&self, mut sample: Sample, rng: &mut dyn RngCore) -> Result<Sample> {
        let mask = sample.mask.take();
        let mut out = self.inner.apply(sample, rng)?;
        out.mask = mask;
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "ApplyToImage"
    }
}
