//! Border cropping: trim the black margins warping leaves behind.
//!
//! The composited canvas is a bounding box around rotated and shifted
//! quadrilaterals, so its edges carry unfilled black pixels. Cropping
//! keeps the smallest rectangle containing every non-black pixel, where
//! "non-black" means any channel above zero. Content pixels that are
//! genuinely black survive as long as they share a row and column with
//! lit pixels, which panorama content always does in practice.

use crate::types::RgbImage;

/// Crop to the bounding box of non-black content.
///
/// An entirely black image has no content bounding box and is returned
/// unchanged rather than collapsed to zero size.
#[must_use]
pub fn crop_black_borders(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let mut min_x = width;
    let mut min_y = height;
    let mut max_x = 0_u32;
    let mut max_y = 0_u32;
    let mut any = false;

    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel.0 != [0, 0, 0] {
            any = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    if !any {
        return image.clone();
    }

    image::imageops::crop_imm(image, min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
        .to_image()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn borders_are_trimmed_to_content() {
        let mut img = RgbImage::new(20, 10);
        for y in 2..7 {
            for x in 3..15 {
                img.put_pixel(x, y, image::Rgb([10, 20, 30]));
            }
        }
        let cropped = crop_black_borders(&img);
        assert_eq!(cropped.dimensions(), (12, 5));
        assert_eq!(cropped.get_pixel(0, 0).0, [10, 20, 30]);
        assert_eq!(cropped.get_pixel(11, 4).0, [10, 20, 30]);
    }

    #[test]
    fn all_black_image_is_returned_unchanged() {
        let img = RgbImage::new(8, 6);
        let cropped = crop_black_borders(&img);
        assert_eq!(cropped.dimensions(), (8, 6));
    }

    #[test]
    fn single_lit_pixel_crops_to_one_by_one() {
        let mut img = RgbImage::new(10, 10);
        img.put_pixel(4, 7, image::Rgb([0, 0, 1]));
        let cropped = crop_black_borders(&img);
        assert_eq!(cropped.dimensions(), (1, 1));
        assert_eq!(cropped.get_pixel(0, 0).0, [0, 0, 1]);
    }

    #[test]
    fn full_frame_content_is_untouched() {
        let img = RgbImage::from_pixel(12, 9, image::Rgb([5, 5, 5]));
        let cropped = crop_black_borders(&img);
        assert_eq!(cropped, img);
    }

    #[test]
    fn interior_black_pixels_survive_the_crop() {
        let mut img = RgbImage::from_pixel(10, 10, image::Rgb([100, 100, 100]));
        img.put_pixel(5, 5, image::Rgb([0, 0, 0]));
        let cropped = crop_black_borders(&img);
        assert_eq!(cropped.dimensions(), (10, 10));
        assert_eq!(cropped.get_pixel(5, 5).0, [0, 0, 0]);
    }
}
