//! Warping and blending aligned images onto a shared canvas.
//!
//! The canvas bounds come from projecting every image's corners through
//! its global transform. Each image is then inverse-warped: for every
//! canvas pixel inside the image's projected bounds, the inverse
//! transform gives fractional source coordinates and the source is
//! sampled bilinearly. Overlaps are feather-blended, weighting each
//! contribution by its distance to the nearest source-image edge so
//! seams fade instead of cutting hard.
//!
//! Images render in parallel into private layers; layers merge
//! sequentially in input order, so the result is deterministic under any
//! thread count.

use rayon::prelude::*;

use crate::align::GlobalAlignment;
use crate::transform::Homography;
use crate::types::{RgbImage, StitchError};

/// Hard cap on either canvas dimension. A registration gone wrong can
/// project corners absurdly far out; treat that as failure rather than
/// attempting a multi-gigabyte allocation.
const MAX_CANVAS_DIM: u32 = 1 << 14;

/// The output canvas: dimensions plus the translation that shifts the
/// joint bounding box onto the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Canvas {
    /// Canvas width in pixels.
    pub width: u32,
    /// Canvas height in pixels.
    pub height: u32,
    /// Translation applied after each global transform so every warped
    /// pixel lands at non-negative coordinates.
    pub offset: Homography,
}

/// Compute the canvas covering every warped image.
///
/// # Errors
///
/// Returns [`StitchError::StitchFailed`] when any corner maps to the
/// plane at infinity, the joint bounding box is degenerate, or the
/// canvas would exceed [`MAX_CANVAS_DIM`] in either dimension.
pub fn canvas_for(
    images: &[RgbImage],
    alignment: &GlobalAlignment,
) -> Result<Canvas, StitchError> {
    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;

    for (image, transform) in images.iter().zip(&alignment.transforms) {
        let w = f64::from(image.width()) - 1.0;
        let h = f64::from(image.height()) - 1.0;
        for &(x, y) in &[(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)] {
            let (px, py) = transform.apply(x, y).ok_or(StitchError::StitchFailed)?;
            min_x = min_x.min(px);
            min_y = min_y.min(py);
            max_x = max_x.max(px);
            max_y = max_y.max(py);
        }
    }

    let width = (max_x - min_x).floor() + 1.0;
    let height = (max_y - min_y).floor() + 1.0;
    if !width.is_finite() || !height.is_finite() || width < 1.0 || height < 1.0 {
        return Err(StitchError::StitchFailed);
    }
    if width > f64::from(MAX_CANVAS_DIM) || height > f64::from(MAX_CANVAS_DIM) {
        return Err(StitchError::StitchFailed);
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (width, height) = (width as u32, height as u32);
    Ok(Canvas {
        width,
        height,
        offset: Homography::translation(-min_x, -min_y),
    })
}

/// Warp all images onto the canvas and feather-blend overlaps.
///
/// # Errors
///
/// Returns [`StitchError::StitchFailed`] when the canvas is degenerate,
/// a canvas-to-source transform cannot be inverted, or no canvas pixel
/// receives contributions from at least two images (the warped inputs do
/// not overlap at all).
pub fn composite(
    images: &[RgbImage],
    alignment: &GlobalAlignment,
) -> Result<RgbImage, StitchError> {
    let canvas = canvas_for(images, alignment)?;

    let layers: Vec<Layer> = images
        .par_iter()
        .zip(alignment.transforms.par_iter())
        .map(|(image, transform)| render_layer(image, transform, &canvas))
        .collect::<Result<_, _>>()?;

    // Sequential merge keeps blending independent of thread scheduling.
    let pixel_count = canvas.width as usize * canvas.height as usize;
    let mut accum = vec![[0.0_f64; 3]; pixel_count];
    let mut weight = vec![0.0_f64; pixel_count];
    let mut coverage = vec![0_u8; pixel_count];

    for layer in &layers {
        for &(index, color, w) in &layer.samples {
            accum[index][0] += color[0] * w;
            accum[index][1] += color[1] * w;
            accum[index][2] += color[2] * w;
            weight[index] += w;
            coverage[index] = coverage[index].saturating_add(1);
        }
    }

    if images.len() >= 2 && !coverage.iter().any(|&c| c >= 2) {
        return Err(StitchError::StitchFailed);
    }

    let mut out = RgbImage::new(canvas.width, canvas.height);
    for (index, pixel) in out.pixels_mut().enumerate() {
        if weight[index] > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let rgb = [
                (accum[index][0] / weight[index]).round().clamp(0.0, 255.0) as u8,
                (accum[index][1] / weight[index]).round().clamp(0.0, 255.0) as u8,
                (accum[index][2] / weight[index]).round().clamp(0.0, 255.0) as u8,
            ];
            *pixel = image::Rgb(rgb);
        }
    }
    Ok(out)
}

/// One image's warped contribution: sparse weighted samples on the
/// canvas grid.
struct Layer {
    samples: Vec<(usize, [f64; 3], f64)>,
}

/// Inverse-warp one image onto the canvas.
fn render_layer(
    image: &RgbImage,
    global: &Homography,
    canvas: &Canvas,
) -> Result<Layer, StitchError> {
    let forward = canvas.offset.compose(global);
    let inverse = forward.inverse().ok_or(StitchError::StitchFailed)?;

    let (x0, y0, x1, y1) = projected_bounds(image, &forward, canvas);
    let src_w = f64::from(image.width());
    let src_h = f64::from(image.height());

    let mut samples = Vec::new();
    for cy in y0..y1 {
        for cx in x0..x1 {
            let Some((sx, sy)) = inverse.apply(f64::from(cx), f64::from(cy)) else {
                continue;
            };
            if sx < 0.0 || sy < 0.0 || sx > src_w - 1.0 || sy > src_h - 1.0 {
                continue;
            }
            let color = sample_bilinear(image, sx, sy);
            let index = cy as usize * canvas.width as usize + cx as usize;
            samples.push((index, color, feather_weight(sx, sy, src_w, src_h)));
        }
    }
    Ok(Layer { samples })
}

/// Canvas-space bounding box of the warped image, clamped to the canvas.
fn projected_bounds(
    image: &RgbImage,
    forward: &Homography,
    canvas: &Canvas,
) -> (u32, u32, u32, u32) {
    let w = f64::from(image.width()) - 1.0;
    let h = f64::from(image.height()) - 1.0;
    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for &(x, y) in &[(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)] {
        if let Some((px, py)) = forward.apply(x, y) {
            min_x = min_x.min(px);
            min_y = min_y.min(py);
            max_x = max_x.max(px);
            max_y = max_y.max(py);
        }
    }
    if !min_x.is_finite() || !max_x.is_finite() {
        return (0, 0, canvas.width, canvas.height);
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamp = |v: f64, hi: u32| v.clamp(0.0, f64::from(hi)) as u32;
    (
        clamp(min_x.floor(), canvas.width),
        clamp(min_y.floor(), canvas.height),
        clamp(max_x.ceil() + 1.0, canvas.width),
        clamp(max_y.ceil() + 1.0, canvas.height),
    )
}

/// Bilinear interpolation at fractional source coordinates. Callers
/// guarantee the coordinates sit inside `[0, w-1] x [0, h-1]`.
fn sample_bilinear(image: &RgbImage, x: f64, y: f64) -> [f64; 3] {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (ix, iy) = (x.floor() as u32, y.floor() as u32);
    let fx = x - x.floor();
    let fy = y - y.floor();
    let x1 = (ix + 1).min(image.width() - 1);
    let y1 = (iy + 1).min(image.height() - 1);

    let p00 = image.get_pixel(ix, iy).0;
    let p10 = image.get_pixel(x1, iy).0;
    let p01 = image.get_pixel(ix, y1).0;
    let p11 = image.get_pixel(x1, y1).0;

    let mut out = [0.0; 3];
    for c in 0..3 {
        let top = f64::from(p00[c]).mul_add(1.0 - fx, f64::from(p10[c]) * fx);
        let bottom = f64::from(p01[c]).mul_add(1.0 - fx, f64::from(p11[c]) * fx);
        out[c] = top.mul_add(1.0 - fy, bottom * fy);
    }
    out
}

/// Feather weight: distance to the nearest source edge, plus one so
/// border pixels still contribute.
fn feather_weight(x: f64, y: f64, width: f64, height: f64) -> f64 {
    let dx = x.min(width - 1.0 - x);
    let dy = y.min(height - 1.0 - y);
    dx.min(dy) + 1.0
}
