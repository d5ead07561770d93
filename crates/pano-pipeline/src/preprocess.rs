//! Input normalization: resize and pad every image to shared dimensions.
//!
//! Feature matching and compositing assume all images live on the same
//! pixel grid. Each input is scaled (aspect ratio preserved) to fit the
//! maximum width and height found across the sequence, then padded
//! symmetrically with black to exactly that size. The visible content is
//! never stretched; padding stays centered, with the extra pixel on the
//! trailing side when the delta is odd.

use image::imageops::FilterType;

use crate::types::{Dimensions, RgbImage, StitchError};

/// Resize and pad all images to the sequence's maximum dimensions.
///
/// Inputs are consumed and replaced with freshly allocated buffers; the
/// originals are never mutated in place.
///
/// # Errors
///
/// Returns [`StitchError::InsufficientInput`] when fewer than two images
/// are supplied.
pub fn normalize(images: Vec<RgbImage>) -> Result<Vec<RgbImage>, StitchError> {
    if images.len() < 2 {
        return Err(StitchError::InsufficientInput {
            found: images.len(),
        });
    }

    let target = Dimensions {
        width: images.iter().map(RgbImage::width).max().unwrap_or(0),
        height: images.iter().map(RgbImage::height).max().unwrap_or(0),
    };

    Ok(images
        .into_iter()
        .map(|img| fit_and_pad(&img, target))
        .collect())
}

/// Scale one image to fit within `target` (aspect preserved), then pad
/// with black borders to exactly `target`.
fn fit_and_pad(img: &RgbImage, target: Dimensions) -> RgbImage {
    let (w, h) = (img.width(), img.height());
    if w == target.width && h == target.height {
        return img.clone();
    }

    let scale = (f64::from(target.width) / f64::from(w))
        .min(f64::from(target.height) / f64::from(h));
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let new_w = ((f64::from(w) * scale).round() as u32).clamp(1, target.width);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let new_h = ((f64::from(h) * scale).round() as u32).clamp(1, target.height);

    let resized = if (new_w, new_h) == (w, h) {
        img.clone()
    } else {
        image::imageops::resize(img, new_w, new_h, FilterType::Triangle)
    };

    // Leading border; the trailing side absorbs the odd pixel.
    let left = (target.width - new_w) / 2;
    let top = (target.height - new_h) / 2;

    let mut padded = RgbImage::new(target.width, target.height);
    image::imageops::replace(&mut padded, &resized, i64::from(left), i64::from(top));
    padded
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(w, h, image::Rgb([value, value, value]))
    }

    #[test]
    fn fewer_than_two_images_is_an_error() {
        assert_eq!(
            normalize(vec![]),
            Err(StitchError::InsufficientInput { found: 0 }),
        );
        assert_eq!(
            normalize(vec![solid(10, 10, 128)]),
            Err(StitchError::InsufficientInput { found: 1 }),
        );
    }

    #[test]
    fn outputs_share_maximum_dimensions() {
        let out = normalize(vec![solid(100, 50, 200), solid(60, 80, 200)]).unwrap();
        for img in &out {
            assert_eq!(img.width(), 100);
            assert_eq!(img.height(), 80);
        }
    }

    #[test]
    fn equal_inputs_pass_through_unchanged() {
        let a = solid(40, 30, 10);
        let b = solid(40, 30, 20);
        let out = normalize(vec![a.clone(), b.clone()]).unwrap();
        assert_eq!(out[0], a);
        assert_eq!(out[1], b);
    }

    #[test]
    fn padding_is_centered_with_trailing_remainder() {
        // 10x10 content inside a 10x13 target: top pad 1, bottom pad 2.
        let out = normalize(vec![solid(10, 13, 255), solid(10, 10, 255)]).unwrap();
        let padded = &out[1];
        assert_eq!(padded.get_pixel(5, 0).0, [0, 0, 0]);
        assert_eq!(padded.get_pixel(5, 1).0, [255, 255, 255]);
        assert_eq!(padded.get_pixel(5, 10).0, [255, 255, 255]);
        assert_eq!(padded.get_pixel(5, 11).0, [0, 0, 0]);
        assert_eq!(padded.get_pixel(5, 12).0, [0, 0, 0]);
    }

    #[test]
    fn aspect_ratio_is_preserved_not_stretched() {
        // A 200x100 image normalized against a 100x100 one: the target is
        // 200x100 and the square image scales to 100x100, padded left/right.
        let out = normalize(vec![solid(200, 100, 255), solid(100, 100, 255)]).unwrap();
        let padded = &out[1];
        assert_eq!(padded.dimensions(), (200, 100));
        // Left pad column is black, content center is white.
        assert_eq!(padded.get_pixel(0, 50).0, [0, 0, 0]);
        assert_eq!(padded.get_pixel(100, 50).0, [255, 255, 255]);
        assert_eq!(padded.get_pixel(199, 50).0, [0, 0, 0]);
    }

    #[test]
    fn mixed_orientations_fit_within_target() {
        let out = normalize(vec![solid(120, 40, 9), solid(40, 120, 9)]).unwrap();
        for img in &out {
            assert_eq!(img.dimensions(), (120, 120));
        }
    }
}
