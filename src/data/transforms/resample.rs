// --- File: src/data/transforms/resample.rs ---

//! Plane-wise resampling shared by the transforms.
//!
//! Resizing and blurring go through `image::imageops` one channel at a time;
//! arbitrary warps (rotation, shear, elastic) use [`remap_plane`].

use super::{mask_axes, Layout, Result, TransformError};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::{stack, Array2, Array3, ArrayD, ArrayView2, Axis, Ix2};

type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Interpolation used when a plane is resampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Bilinear,
}

impl Interpolation {
    fn filter(self) -> FilterType {
        match self {
            Interpolation::Nearest => FilterType::Nearest,
            Interpolation::Bilinear => FilterType::Triangle,
        }
    }
}

/// Runs an `imageops` operation on a single float plane.
///
/// `imageops` clamps float samples to `0.0..=1.0`, so the plane is mapped into
/// that range first and mapped back afterwards. With `keep_integral`, planes
/// holding only whole numbers (label maps) are rounded back to whole numbers.
fn through_unit_range<F>(plane: ArrayView2<f32>, keep_integral: bool, op: F) -> Result<Array2<f32>>
where
    F: FnOnce(&GrayF32) -> GrayF32,
{
    let (h, w) = plane.dim();
    if h == 0 || w == 0 {
        return Err(TransformError::InvalidParameter {
            transform: "resample",
            message: format!("cannot resample an empty {h}x{w} plane"),
        });
    }

    let (lo, hi) = plane
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = if hi > lo { hi - lo } else { 1.0 };
    let integral = keep_integral && plane.iter().all(|v| v.fract() == 0.0);

    let data: Vec<f32> = plane.iter().map(|&v| (v - lo) / span).collect();
    let buffer = GrayF32::from_raw(w as u32, h as u32, data).ok_or(
        TransformError::InvalidParameter {
            transform: "resample",
            message: "plane buffer does not match its dimensions".to_string(),
        },
    )?;

    let out = op(&buffer);
    let (out_w, out_h) = out.dimensions();
    let values = out
        .into_raw()
        .into_iter()
        .map(|v| {
            let restored = v * span + lo;
            if integral {
                restored.round()
            } else {
                restored
            }
        })
        .collect();

    Ok(Array2::from_shape_vec((out_h as usize, out_w as usize), values)?)
}

pub(crate) fn resize_plane(
    plane: ArrayView2<f32>,
    height: usize,
    width: usize,
    interpolation: Interpolation,
) -> Result<Array2<f32>> {
    if plane.dim() == (height, width) {
        return Ok(plane.to_owned());
    }
    let keep_integral = interpolation == Interpolation::Nearest;
    through_unit_range(plane, keep_integral, |buffer| {
        imageops::resize(buffer, width as u32, height as u32, interpolation.filter())
    })
}

pub(crate) fn blur_plane(plane: ArrayView2<f32>, sigma: f32) -> Result<Array2<f32>> {
    through_unit_range(plane, false, |buffer| imageops::blur(buffer, sigma))
}

/// Applies `f` to every channel plane of an image and reassembles the result.
pub(crate) fn map_image_planes<F>(image: &Array3<f32>, layout: Layout, mut f: F) -> Result<Array3<f32>>
where
    F: FnMut(ArrayView2<f32>) -> Result<Array2<f32>>,
{
    let (_, _, c_axis) = layout.axes();
    let planes = image
        .axis_iter(Axis(c_axis))
        .map(&mut f)
        .collect::<Result<Vec<_>>>()?;
    let views: Vec<_> = planes.iter().map(|p| p.view()).collect();
    Ok(stack(Axis(c_axis), &views)?)
}

/// Applies `f` to the spatial plane(s) of a 2-D or 3-D mask.
pub(crate) fn map_mask_planes<F>(mask: &ArrayD<f32>, mut f: F) -> Result<ArrayD<f32>>
where
    F: FnMut(ArrayView2<f32>) -> Result<Array2<f32>>,
{
    mask_axes(mask)?;
    if mask.ndim() == 2 {
        let plane = mask.view().into_dimensionality::<Ix2>()?;
        return Ok(f(plane)?.into_dyn());
    }

    let planes = mask
        .axis_iter(Axis(0))
        .map(|p| f(p.into_dimensionality::<Ix2>()?))
        .collect::<Result<Vec<_>>>()?;
    let views: Vec<_> = planes.iter().map(|p| p.view()).collect();
    Ok(stack(Axis(0), &views)?.into_dyn())
}

pub(crate) fn resize_image(
    image: &Array3<f32>,
    layout: Layout,
    height: usize,
    width: usize,
) -> Result<Array3<f32>> {
    map_image_planes(image, layout, |p| {
        resize_plane(p, height, width, Interpolation::Bilinear)
    })
}

pub(crate) fn resize_mask(
    mask: &ArrayD<f32>,
    height: usize,
    width: usize,
    interpolation: Interpolation,
) -> Result<ArrayD<f32>> {
    map_mask_planes(mask, |p| resize_plane(p, height, width, interpolation))
}

fn bilinear(plane: &ArrayView2<f32>, y: f32, x: f32, fill: f32) -> f32 {
    let (h, w) = plane.dim();
    if !(y > -1.0 && y < h as f32 && x > -1.0 && x < w as f32) {
        return fill;
    }
    let y0 = y.floor();
    let x0 = x.floor();
    let dy = y - y0;
    let dx = x - x0;
    let (y0, x0) = (y0 as isize, x0 as isize);

    let at = |yy: isize, xx: isize| {
        if yy >= 0 && xx >= 0 && (yy as usize) < h && (xx as usize) < w {
            plane[[yy as usize, xx as usize]]
        } else {
            fill
        }
    };

    at(y0, x0) * (1.0 - dy) * (1.0 - dx)
        + at(y0, x0 + 1) * (1.0 - dy) * dx
        + at(y0 + 1, x0) * dy * (1.0 - dx)
        + at(y0 + 1, x0 + 1) * dy * dx
}

fn nearest(plane: &ArrayView2<f32>, y: f32, x: f32, fill: f32) -> f32 {
    let (h, w) = plane.dim();
    let (yy, xx) = (y.round(), x.round());
    if yy < 0.0 || xx < 0.0 || yy >= h as f32 || xx >= w as f32 {
        return fill;
    }
    plane[[yy as usize, xx as usize]]
}

/// Builds a plane of the same size where output pixel `(y, x)` is read from
/// source coordinates `source(y, x)`. Pixels mapped outside read `fill`.
pub(crate) fn remap_plane<F>(
    plane: ArrayView2<f32>,
    source: F,
    interpolation: Interpolation,
    fill: f32,
) -> Array2<f32>
where
    F: Fn(usize, usize) -> (f32, f32),
{
    Array2::from_shape_fn(plane.dim(), |(y, x)| {
        let (sy, sx) = source(y, x);
        match interpolation {
            Interpolation::Bilinear => bilinear(&plane, sy, sx, fill),
            Interpolation::Nearest => nearest(&plane, sy, sx, fill),
        }
    })
}
