//! Keypoint detection and descriptor extraction.
//!
//! Detects corner-like keypoints over a Gaussian scale-space pyramid
//! (Harris response on the windowed structure tensor, non-maximum
//! suppressed), assigns each a dominant gradient orientation, and
//! computes a 128-element gradient-orientation-histogram descriptor
//! (4×4 spatial cells × 8 orientation bins, rotated into the keypoint's
//! frame, L2-normalized with 0.2 clamping). The result is invariant to
//! the keypoint's own rotation and coarsely invariant to scale.
//!
//! Extraction is deterministic for a given image buffer. A uniform image
//! legitimately produces zero keypoints; that is not an error, and every
//! downstream stage tolerates empty feature sets.

use image::imageops::FilterType;
use imageproc::filter::gaussian_blur_f32;
use rayon::prelude::*;

use crate::types::{GrayImage, RgbImage, StitchConfig};

/// Descriptor length: 4×4 spatial cells × 8 orientation bins.
pub const DESCRIPTOR_LEN: usize = 128;

/// Pixels near the image border where no keypoint is emitted. Covers the
/// rotated descriptor footprint plus one pixel of gradient support.
const BORDER_MARGIN: i64 = 17;

/// Half-extent of the descriptor sampling window, in pixels.
const PATCH_RADIUS: i64 = 8;

/// Radius of the orientation-assignment window.
const ORIENTATION_RADIUS: i64 = 8;

/// Bins in the orientation-assignment histogram.
const ORIENTATION_BINS: usize = 36;

/// Side length of the structure-tensor summation window.
const TENSOR_WINDOW: i64 = 5;

/// Descriptor clamp applied before renormalization, after the first L2
/// normalization pass.
const DESCRIPTOR_CLAMP: f32 = 0.2;

/// A detected keypoint in base-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Horizontal position, pixels from the left edge of the base image.
    pub x: f64,
    /// Vertical position, pixels from the top edge of the base image.
    pub y: f64,
    /// Detection scale: 1.0 at the base level, doubling per pyramid level.
    pub scale: f64,
    /// Dominant gradient orientation in radians.
    pub orientation: f64,
    /// Harris corner response at the detection scale.
    pub response: f64,
}

/// Fixed-length local appearance descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor(pub [f32; DESCRIPTOR_LEN]);

impl Descriptor {
    /// Squared L2 distance to another descriptor.
    #[must_use]
    pub fn distance_squared(&self, other: &Self) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }

    /// L2 distance to another descriptor.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f32 {
        self.distance_squared(other).sqrt()
    }
}

/// Keypoints and descriptors extracted from one image.
///
/// The two vectors are parallel: `descriptors[i]` describes
/// `keypoints[i]`.
#[derive(Debug, Clone, Default)]
pub struct Features {
    /// Detected keypoints, strongest response first.
    pub keypoints: Vec<Keypoint>,
    /// One descriptor per keypoint.
    pub descriptors: Vec<Descriptor>,
}

impl Features {
    /// Number of keypoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    /// Whether no keypoints were detected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Extract features from every image in parallel.
///
/// Per-image extraction shares no mutable state; rayon joins all workers
/// before returning, so matching always sees the complete set.
#[must_use]
pub fn extract_all(images: &[RgbImage], config: &StitchConfig) -> Vec<Features> {
    images.par_iter().map(|img| extract(img, config)).collect()
}

/// Extract keypoints and descriptors from a single image.
#[must_use]
pub fn extract(image: &RgbImage, config: &StitchConfig) -> Features {
    let gray = image::imageops::grayscale(image);
    let levels = build_pyramid(&gray, config);

    let mut keypoints = Vec::new();
    let mut descriptors = Vec::new();
    for level in &levels {
        detect_level(level, config, &mut keypoints, &mut descriptors);
    }

    // Strongest first; total_cmp keeps the order fully deterministic.
    let mut order: Vec<usize> = (0..keypoints.len()).collect();
    order.sort_by(|&a, &b| keypoints[b].response.total_cmp(&keypoints[a].response));
    order.truncate(config.max_features);

    Features {
        keypoints: order.iter().map(|&i| keypoints[i]).collect(),
        descriptors: order.iter().map(|&i| descriptors[i].clone()).collect(),
    }
}

/// One pyramid level: luminance in [0, 1] plus precomputed gradients.
struct Level {
    width: i64,
    height: i64,
    /// Multiplier mapping level coordinates back to base coordinates.
    scale: f64,
    lum: Vec<f32>,
    gx: Vec<f32>,
    gy: Vec<f32>,
}

impl Level {
    fn from_gray(gray: &GrayImage, scale: f64) -> Self {
        let width = i64::from(gray.width());
        let height = i64::from(gray.height());
        let lum: Vec<f32> = gray.as_raw().iter().map(|&v| f32::from(v) / 255.0).collect();

        let mut level = Self {
            width,
            height,
            scale,
            lum,
            gx: vec![0.0; (width * height).unsigned_abs() as usize],
            gy: vec![0.0; (width * height).unsigned_abs() as usize],
        };
        level.fill_gradients();
        level
    }

    #[allow(clippy::cast_sign_loss)]
    fn idx(&self, x: i64, y: i64) -> usize {
        (y * self.width + x) as usize
    }

    /// Central-difference gradients over the interior; borders stay zero.
    fn fill_gradients(&mut self) {
        for y in 1..self.height - 1 {
            for x in 1..self.width - 1 {
                let i = self.idx(x, y);
                self.gx[i] = (self.lum[self.idx(x + 1, y)] - self.lum[self.idx(x - 1, y)]) * 0.5;
                self.gy[i] = (self.lum[self.idx(x, y + 1)] - self.lum[self.idx(x, y - 1)]) * 0.5;
            }
        }
    }

    fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }
}

/// Build the Gaussian scale-space pyramid: blur then halve, repeatedly.
fn build_pyramid(gray: &GrayImage, config: &StitchConfig) -> Vec<Level> {
    let mut levels = Vec::with_capacity(config.pyramid_levels.max(1));
    let mut current = gray.clone();
    let mut scale = 1.0;

    for _ in 0..config.pyramid_levels.max(1) {
        levels.push(Level::from_gray(&current, scale));

        let (w, h) = (current.width() / 2, current.height() / 2);
        if w < 2 * BORDER_MARGIN.unsigned_abs() as u32 || h < 2 * BORDER_MARGIN.unsigned_abs() as u32
        {
            break;
        }
        let blurred = if config.pyramid_sigma > 0.0 {
            gaussian_blur_f32(&current, config.pyramid_sigma)
        } else {
            current.clone()
        };
        current = image::imageops::resize(&blurred, w, h, FilterType::Triangle);
        scale *= 2.0;
    }
    levels
}

/// Detect keypoints at one pyramid level and append them (with
/// descriptors) in base-image coordinates.
fn detect_level(
    level: &Level,
    config: &StitchConfig,
    keypoints: &mut Vec<Keypoint>,
    descriptors: &mut Vec<Descriptor>,
) {
    if level.width <= 2 * BORDER_MARGIN || level.height <= 2 * BORDER_MARGIN {
        return;
    }

    let response = harris_response(level, config.harris_k);

    let max_response = response.iter().copied().fold(0.0_f64, f64::max);
    let threshold = config
        .response_floor
        .max(config.response_relative * max_response);
    if max_response <= config.response_floor {
        return;
    }

    for y in BORDER_MARGIN..level.height - BORDER_MARGIN {
        for x in BORDER_MARGIN..level.width - BORDER_MARGIN {
            let r = response[level.idx(x, y)];
            if r <= threshold || !is_local_maximum(level, &response, x, y) {
                continue;
            }
            let orientation = dominant_orientation(level, x, y);
            #[allow(clippy::cast_precision_loss)]
            let (base_x, base_y) = (x as f64 * level.scale, y as f64 * level.scale);
            keypoints.push(Keypoint {
                x: base_x,
                y: base_y,
                scale: level.scale,
                orientation,
                response: r,
            });
            descriptors.push(describe(level, x, y, orientation));
        }
    }
}

/// Harris corner response over a windowed structure tensor.
fn harris_response(level: &Level, k: f64) -> Vec<f64> {
    let half = TENSOR_WINDOW / 2;
    let mut response = vec![0.0; level.lum.len()];

    for y in half + 1..level.height - half - 1 {
        for x in half + 1..level.width - half - 1 {
            let mut sxx = 0.0_f64;
            let mut syy = 0.0_f64;
            let mut sxy = 0.0_f64;
            for dy in -half..=half {
                for dx in -half..=half {
                    let i = level.idx(x + dx, y + dy);
                    let gx = f64::from(level.gx[i]);
                    let gy = f64::from(level.gy[i]);
                    sxx += gx * gx;
                    syy += gy * gy;
                    sxy += gx * gy;
                }
            }
            let det = sxx * syy - sxy * sxy;
            let trace = sxx + syy;
            response[level.idx(x, y)] = k.mul_add(-(trace * trace), det);
        }
    }
    response
}

/// 3×3 non-maximum suppression on the response map.
fn is_local_maximum(level: &Level, response: &[f64], x: i64, y: i64) -> bool {
    let r = response[level.idx(x, y)];
    for dy in -1..=1_i64 {
        for dx in -1..=1_i64 {
            if (dx, dy) == (0, 0) {
                continue;
            }
            if response[level.idx(x + dx, y + dy)] > r {
                return false;
            }
        }
    }
    true
}

/// Peak of a 36-bin magnitude-weighted gradient orientation histogram,
/// refined by fitting a parabola through the peak and its circular
/// neighbors. Accuracy is limited by the 10-degree binning; the
/// interpolation recovers sub-bin precision only where the neighboring
/// bins carry mass.
fn dominant_orientation(level: &Level, x: i64, y: i64) -> f64 {
    let mut histogram = [0.0_f64; ORIENTATION_BINS];

    for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            if !level.in_bounds(x + dx, y + dy) {
                continue;
            }
            let i = level.idx(x + dx, y + dy);
            let gx = f64::from(level.gx[i]);
            let gy = f64::from(level.gy[i]);
            let magnitude = gx.hypot(gy);
            if magnitude <= 0.0 {
                continue;
            }
            let angle = gy.atan2(gx);
            histogram[angle_bin(angle, ORIENTATION_BINS)] += magnitude;
        }
    }

    let peak = histogram
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map_or(0, |(bin, _)| bin);

    // Parabolic refinement over the circular neighbors of the peak.
    let left = histogram[(peak + ORIENTATION_BINS - 1) % ORIENTATION_BINS];
    let right = histogram[(peak + 1) % ORIENTATION_BINS];
    let center = histogram[peak];
    let curvature = (left + right) - 2.0 * center;
    let offset = if curvature.abs() < f64::EPSILON {
        0.0
    } else {
        (0.5 * (left - right) / curvature).clamp(-0.5, 0.5)
    };

    #[allow(clippy::cast_precision_loss)]
    let bin_width = std::f64::consts::TAU / ORIENTATION_BINS as f64;
    #[allow(clippy::cast_precision_loss)]
    let angle = (peak as f64 + 0.5 + offset).mul_add(bin_width, -std::f64::consts::PI);
    (angle + std::f64::consts::PI).rem_euclid(std::f64::consts::TAU) - std::f64::consts::PI
}

/// Map an angle in (-pi, pi] onto `bins` equal buckets of [0, 2*pi).
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn angle_bin(angle: f64, bins: usize) -> usize {
    let normalized = (angle + std::f64::consts::PI) / std::f64::consts::TAU;
    (((normalized * bins as f64).floor()) as usize).min(bins - 1)
}

/// Build the 4×4×8 gradient histogram descriptor, rotated into the
/// keypoint's orientation frame.
fn describe(level: &Level, x: i64, y: i64, orientation: f64) -> Descriptor {
    let mut bins = [0.0_f32; DESCRIPTOR_LEN];
    let (sin_o, cos_o) = orientation.sin_cos();

    for v in -PATCH_RADIUS..PATCH_RADIUS {
        for u in -PATCH_RADIUS..PATCH_RADIUS {
            // Rotate the sampling offset into the keypoint frame.
            #[allow(clippy::cast_precision_loss)]
            let (uf, vf) = (u as f64, v as f64);
            let dx = cos_o.mul_add(uf, -sin_o * vf);
            let dy = sin_o.mul_add(uf, cos_o * vf);
            #[allow(clippy::cast_possible_truncation)]
            let sx = x + dx.round() as i64;
            #[allow(clippy::cast_possible_truncation)]
            let sy = y + dy.round() as i64;
            if !level.in_bounds(sx, sy) {
                continue;
            }

            let i = level.idx(sx, sy);
            let gx = f64::from(level.gx[i]);
            let gy = f64::from(level.gy[i]);
            let magnitude = gx.hypot(gy);
            if magnitude <= 0.0 {
                continue;
            }

            // Gradient angle relative to the keypoint orientation.
            let relative = gy.atan2(gx) - orientation;
            let wrapped = relative.rem_euclid(std::f64::consts::TAU) - std::f64::consts::PI;
            let orientation_bin = angle_bin(wrapped, 8);

            #[allow(clippy::cast_sign_loss)]
            let cell_u = ((u + PATCH_RADIUS) / 4) as usize;
            #[allow(clippy::cast_sign_loss)]
            let cell_v = ((v + PATCH_RADIUS) / 4) as usize;
            let bin = (cell_v * 4 + cell_u) * 8 + orientation_bin;
            #[allow(clippy::cast_possible_truncation)]
            {
                bins[bin] += magnitude as f32;
            }
        }
    }

    normalize_descriptor(&mut bins);
    Descriptor(bins)
}

/// L2-normalize, clamp large components, renormalize. The clamp reduces
/// the influence of single dominant gradients (illumination edges).
fn normalize_descriptor(bins: &mut [f32; DESCRIPTOR_LEN]) {
    let norm = bins.iter().map(|b| b * b).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return;
    }
    for b in bins.iter_mut() {
        *b = (*b / norm).min(DESCRIPTOR_CLAMP);
    }
    let norm = bins.iter().map(|b| b * b).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for b in bins.iter_mut() {
            *b /= norm;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Scene with several rectangles of varied size and brightness on a
    /// graded background — plenty of stable corners.
    fn textured_image(w: u32, h: u32) -> RgbImage {
        let mut img = RgbImage::from_fn(w, h, |x, _y| {
            #[allow(clippy::cast_possible_truncation)]
            let base = 40 + (x % 17) as u8;
            image::Rgb([base, base, base])
        });
        let rects: [(u32, u32, u32, u32, u8); 5] = [
            (25, 25, 12, 9, 220),
            (60, 30, 8, 14, 180),
            (30, 60, 15, 10, 250),
            (70, 65, 10, 10, 150),
            (50, 48, 6, 6, 200),
        ];
        for &(rx, ry, rw, rh, value) in &rects {
            for y in ry..(ry + rh).min(h) {
                for x in rx..(rx + rw).min(w) {
                    img.put_pixel(x, y, image::Rgb([value, value, value]));
                }
            }
        }
        img
    }

    #[test]
    fn uniform_image_yields_zero_keypoints() {
        let img = RgbImage::from_pixel(100, 100, image::Rgb([128, 128, 128]));
        let features = extract(&img, &StitchConfig::default());
        assert!(features.is_empty(), "got {} keypoints", features.len());
    }

    #[test]
    fn textured_image_yields_keypoints() {
        let img = textured_image(100, 100);
        let features = extract(&img, &StitchConfig::default());
        assert!(
            features.len() >= 4,
            "expected corners on rectangles, got {}",
            features.len(),
        );
        assert_eq!(features.keypoints.len(), features.descriptors.len());
    }

    #[test]
    fn extraction_is_deterministic() {
        let img = textured_image(100, 100);
        let config = StitchConfig::default();
        let a = extract(&img, &config);
        let b = extract(&img, &config);
        assert_eq!(a.keypoints, b.keypoints);
        assert_eq!(a.descriptors, b.descriptors);
    }

    #[test]
    fn keypoints_sorted_by_response_and_capped() {
        let img = textured_image(120, 120);
        let config = StitchConfig {
            max_features: 5,
            ..StitchConfig::default()
        };
        let features = extract(&img, &config);
        assert!(features.len() <= 5);
        for pair in features.keypoints.windows(2) {
            assert!(pair[0].response >= pair[1].response);
        }
    }

    #[test]
    fn keypoints_stay_inside_image_bounds() {
        let img = textured_image(100, 100);
        let features = extract(&img, &StitchConfig::default());
        for kp in &features.keypoints {
            assert!(kp.x >= 0.0 && kp.x < 100.0);
            assert!(kp.y >= 0.0 && kp.y < 100.0);
        }
    }

    #[test]
    fn orientation_tracks_the_gradient_direction() {
        // Linear luminance ramp climbing at 30 degrees — right on a
        // histogram bin boundary, where bin centers alone would be off
        // by half a bin.
        let theta = std::f64::consts::FRAC_PI_6;
        let img = GrayImage::from_fn(64, 64, |x, y| {
            let v = f64::from(x).mul_add(theta.cos(), f64::from(y) * theta.sin()) * 2.5;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let lum = v.clamp(0.0, 255.0) as u8;
            image::Luma([lum])
        });
        let level = Level::from_gray(&img, 1.0);
        let orientation = dominant_orientation(&level, 32, 32);
        assert!(
            (orientation - theta).abs() < 0.085,
            "orientation {orientation}, expected about {theta}",
        );
    }

    #[test]
    fn descriptors_are_unit_length() {
        let img = textured_image(100, 100);
        let features = extract(&img, &StitchConfig::default());
        for descriptor in &features.descriptors {
            let norm = descriptor.0.iter().map(|b| b * b).sum::<f32>().sqrt();
            assert!(
                (norm - 1.0).abs() < 1e-3,
                "expected unit descriptor, norm={norm}",
            );
        }
    }

    #[test]
    fn descriptor_distance_is_zero_to_self() {
        let img = textured_image(100, 100);
        let features = extract(&img, &StitchConfig::default());
        let first = &features.descriptors[0];
        assert!(first.distance(first).abs() < f32::EPSILON);
    }

    #[test]
    fn extract_all_matches_sequential_extraction() {
        let images = vec![textured_image(100, 100), textured_image(90, 90)];
        let config = StitchConfig::default();
        let parallel = extract_all(&images, &config);
        for (img, features) in images.iter().zip(&parallel) {
            let sequential = extract(img, &config);
            assert_eq!(features.keypoints, sequential.keypoints);
        }
    }
}
