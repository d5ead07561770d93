//! Shared types for the pano stitching pipeline.

use serde::{Deserialize, Serialize};

/// Re-export `RgbImage` so downstream crates can hold pipeline inputs and
/// outputs without depending on `image` directly.
pub use image::RgbImage;

/// Re-export `GrayImage` for the luminance intermediates used by feature
/// extraction.
pub use image::GrayImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Configuration for the stitching pipeline.
///
/// All parameters have defaults matching the `DEFAULT_*` constants, so
/// CLI flag defaults and `Default::default()` cannot silently diverge.
/// The config is passed explicitly into every stage; no stage keeps
/// module-level state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchConfig {
    /// Lowe ratio test threshold: a match survives only when its nearest
    /// descriptor distance is below `ratio_threshold` times the
    /// second-nearest distance.
    pub ratio_threshold: f32,

    /// Minimum surviving matches per adjacent pair. A pair below this is
    /// a weak link and the whole sequence is abandoned.
    pub min_good_matches: usize,

    /// RANSAC inlier threshold: maximum forward-projection error in
    /// pixels for a correspondence to count as an inlier.
    pub ransac_threshold: f64,

    /// Hard cap on RANSAC iterations. The effective count adapts
    /// downward as the observed inlier ratio improves.
    pub ransac_max_iterations: usize,

    /// Minimum registration confidence (inliers / good matches) for a
    /// pairwise transform to be accepted.
    pub min_confidence: f64,

    /// Maximum keypoints retained per image, strongest-response first.
    pub max_features: usize,

    /// Number of scale-space pyramid levels (>= 1). Each level halves
    /// the previous one.
    pub pyramid_levels: usize,

    /// Gaussian sigma applied before each pyramid downsample.
    pub pyramid_sigma: f32,

    /// Harris corner response `k` parameter.
    pub harris_k: f64,

    /// Absolute corner response floor. Uniform images produce responses
    /// below this everywhere and thus legitimately yield zero keypoints.
    pub response_floor: f64,

    /// Relative corner response threshold, as a fraction of the
    /// strongest response at each pyramid level.
    pub response_relative: f64,
}

impl StitchConfig {
    /// Default Lowe ratio threshold.
    pub const DEFAULT_RATIO_THRESHOLD: f32 = 0.7;
    /// Default minimum good matches per adjacent pair.
    pub const DEFAULT_MIN_GOOD_MATCHES: usize = 10;
    /// Default RANSAC inlier pixel threshold.
    pub const DEFAULT_RANSAC_THRESHOLD: f64 = 3.0;
    /// Default RANSAC iteration cap.
    pub const DEFAULT_RANSAC_MAX_ITERATIONS: usize = 2000;
    /// Default minimum registration confidence.
    pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;
    /// Default per-image keypoint cap.
    pub const DEFAULT_MAX_FEATURES: usize = 1500;
    /// Default pyramid depth.
    pub const DEFAULT_PYRAMID_LEVELS: usize = 3;
    /// Default pyramid blur sigma.
    pub const DEFAULT_PYRAMID_SIGMA: f32 = 1.2;
    /// Default Harris `k`.
    pub const DEFAULT_HARRIS_K: f64 = 0.04;
    /// Default absolute response floor (luminance normalized to [0, 1]).
    pub const DEFAULT_RESPONSE_FLOOR: f64 = 1e-3;
    /// Default relative response threshold.
    pub const DEFAULT_RESPONSE_RELATIVE: f64 = 0.01;
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            ratio_threshold: Self::DEFAULT_RATIO_THRESHOLD,
            min_good_matches: Self::DEFAULT_MIN_GOOD_MATCHES,
            ransac_threshold: Self::DEFAULT_RANSAC_THRESHOLD,
            ransac_max_iterations: Self::DEFAULT_RANSAC_MAX_ITERATIONS,
            min_confidence: Self::DEFAULT_MIN_CONFIDENCE,
            max_features: Self::DEFAULT_MAX_FEATURES,
            pyramid_levels: Self::DEFAULT_PYRAMID_LEVELS,
            pyramid_sigma: Self::DEFAULT_PYRAMID_SIGMA,
            harris_k: Self::DEFAULT_HARRIS_K,
            response_floor: Self::DEFAULT_RESPONSE_FLOOR,
            response_relative: Self::DEFAULT_RESPONSE_RELATIVE,
        }
    }
}

/// Errors that can abort stitching of one image sequence.
///
/// Every failure path yields a distinguishable reason; failures are local
/// to one sequence and never affect other batch entries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum StitchError {
    /// Fewer than two usable input images.
    #[error("need at least 2 images to stitch, found {found}")]
    InsufficientInput {
        /// Number of usable images supplied.
        found: usize,
    },

    /// An adjacent pair fell below the good-match threshold (or its
    /// registration confidence floor), invalidating the whole chain.
    #[error(
        "pair {pair}: only {found} good matches, need at least {required}; \
         sequence abandoned"
    )]
    InsufficientMatches {
        /// Zero-based adjacent pair index (pair `i` links images `i` and `i+1`).
        pair: usize,
        /// Matches (or surviving inliers) found.
        found: usize,
        /// Configured minimum.
        required: usize,
    },

    /// A pairwise transform in the chain to the reference image is not
    /// invertible. Identity is never substituted.
    #[error("pairwise transform {index} is singular; alignment chain is degenerate")]
    DegenerateChain {
        /// Zero-based index of the offending pairwise transform.
        index: usize,
    },

    /// Warping produced no overlapping region (or a degenerate canvas).
    #[error("no overlap between warped images; stitching failed")]
    StitchFailed,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_consts() {
        let config = StitchConfig::default();
        assert!(
            (config.ratio_threshold - StitchConfig::DEFAULT_RATIO_THRESHOLD).abs() < f32::EPSILON
        );
        assert_eq!(
            config.min_good_matches,
            StitchConfig::DEFAULT_MIN_GOOD_MATCHES
        );
        assert!(
            (config.ransac_threshold - StitchConfig::DEFAULT_RANSAC_THRESHOLD).abs()
                < f64::EPSILON
        );
        assert_eq!(
            config.ransac_max_iterations,
            StitchConfig::DEFAULT_RANSAC_MAX_ITERATIONS
        );
        assert!((config.min_confidence - StitchConfig::DEFAULT_MIN_CONFIDENCE).abs() < f64::EPSILON);
        assert_eq!(config.max_features, StitchConfig::DEFAULT_MAX_FEATURES);
        assert_eq!(config.pyramid_levels, StitchConfig::DEFAULT_PYRAMID_LEVELS);
    }

    #[test]
    fn config_serde_round_trip() {
        let config = StitchConfig {
            ratio_threshold: 0.8,
            min_good_matches: 20,
            ransac_threshold: 2.5,
            ..StitchConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: StitchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn insufficient_input_display() {
        let err = StitchError::InsufficientInput { found: 1 };
        assert_eq!(err.to_string(), "need at least 2 images to stitch, found 1");
    }

    #[test]
    fn insufficient_matches_display_names_pair() {
        let err = StitchError::InsufficientMatches {
            pair: 2,
            found: 4,
            required: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("pair 2"), "unexpected message: {msg}");
        assert!(msg.contains("4 good matches"), "unexpected message: {msg}");
    }

    #[test]
    fn error_serde_round_trip() {
        let err = StitchError::DegenerateChain { index: 3 };
        let json = serde_json::to_string(&err).unwrap();
        let back: StitchError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn dimensions_equality() {
        assert_eq!(
            Dimensions {
                width: 640,
                height: 480
            },
            Dimensions {
                width: 640,
                height: 480
            },
        );
    }
}
