//! pano-pipeline: Pure panorama stitching pipeline (sans-IO).
//!
//! Turns an ordered, overlapping image sequence into a single panorama
//! through: preprocess -> feature extraction -> adjacent-pair matching ->
//! robust pairwise registration -> global alignment -> warping and
//! feather blending -> border crop.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! image buffers and returns structured data. File enumeration, decoding
//! and encoding live in the `pano-batch` CLI.

pub mod align;
pub mod composite;
pub mod crop;
pub mod features;
pub mod matching;
pub mod pipeline;
pub mod preprocess;
pub mod register;
pub mod transform;
pub mod types;

pub use align::GlobalAlignment;
pub use features::{Descriptor, Features, Keypoint};
pub use matching::Match;
pub use pipeline::{StitchResult, Stitcher};
pub use register::PairwiseTransform;
pub use transform::Homography;
pub use types::{Dimensions, GrayImage, RgbImage, StitchConfig, StitchError};

/// Run the full stitching pipeline.
///
/// Takes an ordered sequence of overlapping images (left to right along
/// the panorama) and a configuration, then produces the final cropped
/// panorama. Use [`Stitcher`] instead when intermediate results are
/// needed.
///
/// # Pipeline steps
///
/// 1. Resize and pad all inputs to shared dimensions
/// 2. Keypoint detection and descriptor extraction (per image, parallel)
/// 3. Ratio-test matching of adjacent pairs
/// 4. RANSAC homography estimation per pair
/// 5. Global alignment against the middle image
/// 6. Inverse warping and feather blending onto a shared canvas
/// 7. Black border crop
///
/// # Errors
///
/// Returns [`StitchError::InsufficientInput`] for fewer than two images,
/// [`StitchError::InsufficientMatches`] when any adjacent pair cannot be
/// registered, [`StitchError::DegenerateChain`] when the alignment chain
/// contains a singular transform, and [`StitchError::StitchFailed`] when
/// the warped images do not overlap.
pub fn stitch(images: Vec<RgbImage>, config: &StitchConfig) -> Result<RgbImage, StitchError> {
    let panorama = Stitcher::new(images, config.clone())
        .preprocess()?
        .extract_features()
        .match_features()
        .register()?
        .align()?
        .composite()?
        .crop()
        .into_panorama();
    Ok(panorama)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn stitch_rejects_insufficient_input() {
        let one = RgbImage::from_pixel(32, 32, image::Rgb([10, 10, 10]));
        assert_eq!(
            stitch(vec![one], &StitchConfig::default()),
            Err(StitchError::InsufficientInput { found: 1 }),
        );
    }

    #[test]
    fn stitch_rejects_featureless_inputs() {
        let flat = RgbImage::from_pixel(64, 64, image::Rgb([128, 128, 128]));
        let err = stitch(vec![flat.clone(), flat], &StitchConfig::default()).unwrap_err();
        assert!(matches!(err, StitchError::InsufficientMatches { .. }));
    }
}
