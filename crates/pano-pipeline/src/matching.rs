//! Descriptor matching between adjacent image pairs.
//!
//! For each descriptor in the query image, finds the two nearest
//! descriptors in the train image by L2 distance and keeps the nearest
//! only when it passes Lowe's ratio test. The test rejects ambiguous
//! correspondences: repeated texture produces a second-nearest neighbor
//! almost as close as the nearest, and such matches are poison for
//! homography estimation.

use rayon::prelude::*;

use crate::features::Features;
use crate::types::StitchConfig;

/// One accepted correspondence between two images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    /// Keypoint index in the query (first) image.
    pub query: usize,
    /// Keypoint index in the train (second) image.
    pub train: usize,
    /// L2 descriptor distance of the accepted nearest neighbor.
    pub distance: f32,
}

/// Match every adjacent pair in the sequence, in parallel.
///
/// Returns `features.len() - 1` match sets; set `i` links images `i` and
/// `i + 1`. No minimum-count policy is applied here; registration owns
/// that decision.
#[must_use]
pub fn match_adjacent_pairs(features: &[Features], config: &StitchConfig) -> Vec<Vec<Match>> {
    features
        .par_windows(2)
        .map(|pair| match_pair(&pair[0], &pair[1], config))
        .collect()
}

/// Ratio-test matching from `query` descriptors into `train` descriptors.
///
/// Either side having fewer than two descriptors yields zero matches:
/// the ratio test needs a second-nearest neighbor to compare against.
#[must_use]
pub fn match_pair(query: &Features, train: &Features, config: &StitchConfig) -> Vec<Match> {
    if query.is_empty() || train.len() < 2 {
        return Vec::new();
    }

    let ratio_squared = config.ratio_threshold * config.ratio_threshold;
    let mut matches = Vec::new();

    for (query_index, descriptor) in query.descriptors.iter().enumerate() {
        let mut best = f32::INFINITY;
        let mut second = f32::INFINITY;
        let mut best_index = 0;

        for (train_index, candidate) in train.descriptors.iter().enumerate() {
            let d = descriptor.distance_squared(candidate);
            if d < best {
                second = best;
                best = d;
                best_index = train_index;
            } else if d < second {
                second = d;
            }
        }

        // Squared-distance form of the ratio test avoids sqrt per pair.
        if best < ratio_squared * second {
            matches.push(Match {
                query: query_index,
                train: best_index,
                distance: best.sqrt(),
            });
        }
    }
    matches
}
