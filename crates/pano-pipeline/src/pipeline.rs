//! Incremental stitching pipeline: advance stage-by-stage, inspecting
//! each intermediate result before continuing.
//!
//! Unlike [`crate::stitch`] which runs the entire pipeline in one call,
//! [`Stitcher`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use pano_pipeline::{RgbImage, StitchConfig, StitchError, Stitcher};
//! # fn run(images: Vec<RgbImage>) -> Result<(), StitchError> {
//! let result = Stitcher::new(images, StitchConfig::default())
//!     .preprocess()?
//!     .extract_features()
//!     .match_features()
//!     .register()?
//!     .align()?
//!     .composite()?
//!     .crop()
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state
//! (or `Result` for fallible stages). The caller can inspect the current
//! stage's output via accessor methods at any point — per-pair match
//! counts after matching, inlier statistics after registration, the
//! uncropped canvas after compositing.

use crate::align::GlobalAlignment;
use crate::features::Features;
use crate::matching::Match;
use crate::register::PairwiseTransform;
use crate::types::{RgbImage, StitchConfig, StitchError};

/// Final output of the pipeline: the panorama plus the registration
/// statistics that produced it.
#[derive(Debug, Clone)]
pub struct StitchResult {
    /// The cropped panorama.
    pub panorama: RgbImage,
    /// Per-adjacent-pair registration results, in sequence order.
    pub pairwise: Vec<PairwiseTransform>,
    /// Index of the reference image anchoring the panorama.
    pub reference: usize,
}

// ───────────────────────── Stage 0: Loaded ───────────────────────────

/// Pipeline state before any processing has occurred.
///
/// The input images and config are stored but not yet touched. Call
/// [`preprocess`](Self::preprocess) to advance to the next stage.
#[derive(Debug)]
#[must_use = "pipeline stages are consumed by advancing — call .preprocess() to continue"]
pub struct Loaded {
    config: StitchConfig,
    images: Vec<RgbImage>,
}

impl Loaded {
    /// The unprocessed input images.
    #[must_use]
    pub fn images(&self) -> &[RgbImage] {
        &self.images
    }

    /// Resize and pad all inputs to shared dimensions and advance to the
    /// [`Preprocessed`] stage.
    ///
    /// # Errors
    ///
    /// Returns [`StitchError::InsufficientInput`] when fewer than two
    /// images were supplied.
    pub fn preprocess(self) -> Result<Preprocessed, StitchError> {
        let normalized = crate::preprocess::normalize(self.images)?;
        Ok(Preprocessed {
            config: self.config,
            images: normalized,
        })
    }
}

// ───────────────────────── Stage 1: Preprocessed ─────────────────────

/// Pipeline state after input normalization.
///
/// Every image now shares the same dimensions. Call
/// [`extract_features`](Self::extract_features) to advance.
#[derive(Debug)]
#[must_use = "pipeline stages are consumed by advancing — call .extract_features() to continue"]
pub struct Preprocessed {
    config: StitchConfig,
    images: Vec<RgbImage>,
}

impl Preprocessed {
    /// The normalized images.
    #[must_use]
    pub fn normalized(&self) -> &[RgbImage] {
        &self.images
    }

    /// Detect keypoints and compute descriptors for every image, in
    /// parallel, and advance to the [`FeaturesExtracted`] stage.
    pub fn extract_features(self) -> FeaturesExtracted {
        let features = crate::features::extract_all(&self.images, &self.config);
        FeaturesExtracted {
            config: self.config,
            images: self.images,
            features,
        }
    }
}

// ───────────────────────── Stage 2: FeaturesExtracted ────────────────

/// Pipeline state after feature extraction.
///
/// Call [`match_features`](Self::match_features) to advance. Images with
/// zero keypoints are legal here; they surface as match failures at
/// registration rather than errors now.
#[derive(Debug)]
#[must_use = "pipeline stages are consumed by advancing — call .match_features() to continue"]
pub struct FeaturesExtracted {
    config: StitchConfig,
    images: Vec<RgbImage>,
    features: Vec<Features>,
}

impl FeaturesExtracted {
    /// Per-image extracted features.
    #[must_use]
    pub fn features(&self) -> &[Features] {
        &self.features
    }

    /// Ratio-test match every adjacent pair and advance to the
    /// [`Matched`] stage.
    pub fn match_features(self) -> Matched {
        let matches = crate::matching::match_adjacent_pairs(&self.features, &self.config);
        Matched {
            config: self.config,
            images: self.images,
            features: self.features,
            matches,
        }
    }
}

// ───────────────────────── Stage 3: Matched ──────────────────────────

/// Pipeline state after adjacent-pair matching.
///
/// Call [`register`](Self::register) to advance. This is where weak
/// links are detected — a pair with too few matches fails the whole
/// sequence.
#[derive(Debug)]
#[must_use = "pipeline stages are consumed by advancing — call .register() to continue"]
pub struct Matched {
    config: StitchConfig,
    images: Vec<RgbImage>,
    features: Vec<Features>,
    matches: Vec<Vec<Match>>,
}

impl Matched {
    /// Match sets per adjacent pair; set `i` links images `i` and `i+1`.
    #[must_use]
    pub fn matches(&self) -> &[Vec<Match>] {
        &self.matches
    }

    /// Match counts per adjacent pair, for progress reporting.
    #[must_use]
    pub fn match_counts(&self) -> Vec<usize> {
        self.matches.iter().map(Vec::len).collect()
    }

    /// Estimate a robust homography for every adjacent pair and advance
    /// to the [`Registered`] stage.
    ///
    /// # Errors
    ///
    /// Returns [`StitchError::InsufficientMatches`] when any pair has
    /// too few good matches or fails the registration confidence floor.
    pub fn register(self) -> Result<Registered, StitchError> {
        let pairwise =
            crate::register::register_pairs(&self.matches, &self.features, &self.config)?;
        Ok(Registered {
            config: self.config,
            images: self.images,
            pairwise,
        })
    }
}

// ───────────────────────── Stage 4: Registered ───────────────────────

/// Pipeline state after pairwise registration.
///
/// Every adjacent pair now has an accepted homography. Call
/// [`align`](Self::align) to advance.
#[derive(Debug)]
#[must_use = "pipeline stages are consumed by advancing — call .align() to continue"]
pub struct Registered {
    config: StitchConfig,
    images: Vec<RgbImage>,
    pairwise: Vec<PairwiseTransform>,
}

impl Registered {
    /// Per-pair registration results.
    #[must_use]
    pub fn pairwise(&self) -> &[PairwiseTransform] {
        &self.pairwise
    }

    /// Compose pairwise transforms into global per-image transforms and
    /// advance to the [`Aligned`] stage.
    ///
    /// # Errors
    ///
    /// Returns [`StitchError::DegenerateChain`] when a transform needed
    /// in inverted form is singular.
    pub fn align(self) -> Result<Aligned, StitchError> {
        let alignment = crate::align::align(&self.pairwise)?;
        Ok(Aligned {
            config: self.config,
            images: self.images,
            pairwise: self.pairwise,
            alignment,
        })
    }
}

// ───────────────────────── Stage 5: Aligned ──────────────────────────

/// Pipeline state after global alignment.
///
/// Call [`composite`](Self::composite) to advance to warping and
/// blending.
#[derive(Debug)]
#[must_use = "pipeline stages are consumed by advancing — call .composite() to continue"]
pub struct Aligned {
    config: StitchConfig,
    images: Vec<RgbImage>,
    pairwise: Vec<PairwiseTransform>,
    alignment: GlobalAlignment,
}

impl Aligned {
    /// The global alignment into the reference frame.
    #[must_use]
    pub const fn alignment(&self) -> &GlobalAlignment {
        &self.alignment
    }

    /// Warp every image onto the shared canvas, feather-blend overlaps,
    /// and advance to the [`Composited`] stage.
    ///
    /// # Errors
    ///
    /// Returns [`StitchError::StitchFailed`] when the warped images do
    /// not overlap or the canvas is degenerate.
    pub fn composite(self) -> Result<Composited, StitchError> {
        let canvas = crate::composite::composite(&self.images, &self.alignment)?;
        Ok(Composited {
            pairwise: self.pairwise,
            alignment: self.alignment,
            canvas,
        })
    }
}

// ───────────────────────── Stage 6: Composited ───────────────────────

/// Pipeline state after warping and blending.
///
/// The panorama exists but still carries the black margins warping
/// leaves behind. Call [`crop`](Self::crop) to advance to the final
/// stage.
#[derive(Debug)]
#[must_use = "pipeline stages are consumed by advancing — call .crop() to continue"]
pub struct Composited {
    pairwise: Vec<PairwiseTransform>,
    alignment: GlobalAlignment,
    canvas: RgbImage,
}

impl Composited {
    /// The blended canvas, before border cropping.
    #[must_use]
    pub const fn composited(&self) -> &RgbImage {
        &self.canvas
    }

    /// Trim black borders and advance to the final [`Cropped`] stage.
    pub fn crop(self) -> Cropped {
        let panorama = crate::crop::crop_black_borders(&self.canvas);
        Cropped {
            pairwise: self.pairwise,
            alignment: self.alignment,
            panorama,
        }
    }
}

// ───────────────────────── Stage 7: Cropped ──────────────────────────

/// Final pipeline state: the cropped panorama.
///
/// Call [`into_result`](Self::into_result) to extract the
/// [`StitchResult`], or [`into_panorama`](Self::into_panorama) for the
/// image alone.
#[derive(Debug)]
#[must_use = "call .into_result() or .into_panorama() to extract the output"]
pub struct Cropped {
    pairwise: Vec<PairwiseTransform>,
    alignment: GlobalAlignment,
    panorama: RgbImage,
}

impl Cropped {
    /// The finished panorama.
    #[must_use]
    pub const fn panorama(&self) -> &RgbImage {
        &self.panorama
    }

    /// Consume the pipeline and return the panorama with its
    /// registration statistics.
    #[must_use]
    pub fn into_result(self) -> StitchResult {
        StitchResult {
            panorama: self.panorama,
            pairwise: self.pairwise,
            reference: self.alignment.reference,
        }
    }

    /// Consume the pipeline and return only the panorama.
    #[must_use]
    pub fn into_panorama(self) -> RgbImage {
        self.panorama
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental panorama stitcher.
///
/// Created via [`Stitcher::new`], which stores the inputs and config
/// without doing any processing. Each stage method consumes the current
/// state and returns the next, making it a compile-time error to skip
/// stages or call them out of order.
pub struct Stitcher;

impl Stitcher {
    /// Create a new pipeline from input images and config.
    ///
    /// No processing is performed — call
    /// [`.preprocess()`](Loaded::preprocess) to begin.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(images: Vec<RgbImage>, config: StitchConfig) -> Loaded {
        Loaded { config, images }
    }
}
