//! Pairwise registration: robust homography estimation from matches.
//!
//! Each adjacent pair's matches are fed through RANSAC with a minimal
//! 4-correspondence direct linear transform (DLT) model, then the final
//! homography is re-estimated from the full inlier set. Point
//! coordinates are Hartley-normalized before every DLT solve, which
//! keeps the design matrix well conditioned at image-sized coordinates.
//!
//! RANSAC is seeded per pair, so registration of a given match set is
//! fully deterministic.

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::features::Features;
use crate::matching::Match;
use crate::transform::Homography;
use crate::types::{StitchConfig, StitchError};

/// RANSAC success probability used to adapt the iteration count.
const RANSAC_CONFIDENCE: f64 = 0.99;

/// Minimal sample size for a homography.
const SAMPLE_SIZE: usize = 4;

/// Collinearity area threshold for degenerate-sample rejection.
const COLLINEAR_EPSILON: f64 = 1e-6;

/// Base seed mixed with the pair index for per-pair deterministic RANSAC.
const RANSAC_SEED: u64 = 0x9E37_79B9_97F4_A7C5;

/// A robustly estimated transform linking one adjacent image pair.
///
/// The homography maps query-image (image `i`) coordinates into
/// train-image (image `i + 1`) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairwiseTransform {
    /// Estimated projective transform, query frame to train frame.
    pub homography: Homography,
    /// Matches that survived the ratio test for this pair.
    pub match_count: usize,
    /// Matches consistent with the final homography.
    pub inlier_count: usize,
    /// Mean forward-projection error over the inlier set, in pixels.
    pub mean_residual: f64,
    /// `inlier_count / match_count`; the chain acceptance criterion.
    pub confidence: f64,
}

/// Register every adjacent pair in parallel.
///
/// # Errors
///
/// Returns the first (lowest pair index) [`StitchError`] if any pair
/// fails; one weak link invalidates the whole sequence.
pub fn register_pairs(
    matches: &[Vec<Match>],
    features: &[Features],
    config: &StitchConfig,
) -> Result<Vec<PairwiseTransform>, StitchError> {
    let results: Vec<Result<PairwiseTransform, StitchError>> = matches
        .par_iter()
        .enumerate()
        .map(|(pair, set)| register_pair(&features[pair], &features[pair + 1], set, pair, config))
        .collect();
    results.into_iter().collect()
}

/// Estimate the homography for one adjacent pair.
///
/// # Errors
///
/// Returns [`StitchError::InsufficientMatches`] when the pair has too
/// few good matches, too few RANSAC inliers to determine a homography,
/// or a final confidence below the configured floor.
pub fn register_pair(
    query: &Features,
    train: &Features,
    matches: &[Match],
    pair: usize,
    config: &StitchConfig,
) -> Result<PairwiseTransform, StitchError> {
    if matches.len() < config.min_good_matches.max(SAMPLE_SIZE) {
        return Err(StitchError::InsufficientMatches {
            pair,
            found: matches.len(),
            required: config.min_good_matches.max(SAMPLE_SIZE),
        });
    }

    let points: Vec<((f64, f64), (f64, f64))> = matches
        .iter()
        .map(|m| {
            let q = &query.keypoints[m.query];
            let t = &train.keypoints[m.train];
            ((q.x, q.y), (t.x, t.y))
        })
        .collect();

    let (homography, inliers) = ransac(&points, pair, config).ok_or({
        StitchError::InsufficientMatches {
            pair,
            found: 0,
            required: SAMPLE_SIZE,
        }
    })?;

    // Re-estimate from the full consensus set, then re-score.
    let inlier_points: Vec<_> = inliers.iter().map(|&i| points[i]).collect();
    let refined = estimate_homography(&inlier_points).unwrap_or(homography);
    let (inlier_count, mean_residual) = score(&refined, &points, config.ransac_threshold);

    if inlier_count < SAMPLE_SIZE {
        return Err(StitchError::InsufficientMatches {
            pair,
            found: inlier_count,
            required: SAMPLE_SIZE,
        });
    }

    #[allow(clippy::cast_precision_loss)]
    let confidence = inlier_count as f64 / points.len() as f64;
    if confidence < config.min_confidence {
        return Err(StitchError::InsufficientMatches {
            pair,
            found: inlier_count,
            required: config.min_good_matches,
        });
    }

    Ok(PairwiseTransform {
        homography: refined,
        match_count: points.len(),
        inlier_count,
        mean_residual,
        confidence,
    })
}

/// RANSAC loop: returns the best homography and its inlier indices, or
/// `None` when no sample ever produced a valid model with at least
/// [`SAMPLE_SIZE`] inliers.
fn ransac(
    points: &[((f64, f64), (f64, f64))],
    pair: usize,
    config: &StitchConfig,
) -> Option<(Homography, Vec<usize>)> {
    let mut rng = StdRng::seed_from_u64(RANSAC_SEED ^ pair as u64);
    let mut best: Option<(Homography, Vec<usize>)> = None;
    let mut iterations = config.ransac_max_iterations;

    let mut iteration = 0;
    while iteration < iterations {
        iteration += 1;

        let sample = draw_sample(&mut rng, points.len());
        let sampled: Vec<_> = sample.iter().map(|&i| points[i]).collect();
        if sample_is_degenerate(&sampled) {
            continue;
        }
        let Some(candidate) = estimate_homography(&sampled) else {
            continue;
        };

        let inliers = consensus(&candidate, points, config.ransac_threshold);
        if inliers.len() < SAMPLE_SIZE {
            continue;
        }
        if best
            .as_ref()
            .is_none_or(|(_, current)| inliers.len() > current.len())
        {
            // Shrink the iteration budget as the inlier ratio improves.
            #[allow(clippy::cast_precision_loss)]
            let w = inliers.len() as f64 / points.len() as f64;
            iterations = iterations.min(adaptive_iterations(w, config.ransac_max_iterations));
            best = Some((candidate, inliers));
        }
    }
    best
}

/// Iterations needed to hit [`RANSAC_CONFIDENCE`] at inlier ratio `w`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn adaptive_iterations(w: f64, cap: usize) -> usize {
    let outlier_sample = 1.0 - w.powi(4);
    if outlier_sample <= f64::EPSILON {
        return 1;
    }
    if outlier_sample >= 1.0 {
        return cap;
    }
    let needed = (1.0 - RANSAC_CONFIDENCE).ln() / outlier_sample.ln();
    (needed.ceil().max(1.0) as usize).min(cap)
}

/// Draw four distinct indices.
fn draw_sample(rng: &mut StdRng, n: usize) -> [usize; SAMPLE_SIZE] {
    let mut sample = [0; SAMPLE_SIZE];
    let mut count = 0;
    while count < SAMPLE_SIZE {
        let candidate = rng.gen_range(0..n);
        if !sample[..count].contains(&candidate) {
            sample[count] = candidate;
            count += 1;
        }
    }
    sample
}

/// A minimal sample is degenerate when any three points on either side
/// are (nearly) collinear; such samples cannot constrain a homography.
fn sample_is_degenerate(sample: &[((f64, f64), (f64, f64))]) -> bool {
    for skip in 0..SAMPLE_SIZE {
        let mut queries = [(0.0, 0.0); 3];
        let mut trains = [(0.0, 0.0); 3];
        let mut filled = 0;
        for (i, &(q, t)) in sample.iter().enumerate() {
            if i == skip {
                continue;
            }
            queries[filled] = q;
            trains[filled] = t;
            filled += 1;
        }
        if collinear(queries) || collinear(trains) {
            return true;
        }
    }
    false
}

fn collinear([a, b, c]: [(f64, f64); 3]) -> bool {
    let area = (b.0 - a.0).mul_add(c.1 - a.1, -((b.1 - a.1) * (c.0 - a.0)));
    area.abs() < COLLINEAR_EPSILON
}

/// Inlier indices under forward-projection error.
fn consensus(
    h: &Homography,
    points: &[((f64, f64), (f64, f64))],
    threshold: f64,
) -> Vec<usize> {
    points
        .iter()
        .enumerate()
        .filter_map(|(i, &(q, t))| {
            let (px, py) = h.apply(q.0, q.1)?;
            let err = (px - t.0).hypot(py - t.1);
            (err <= threshold).then_some(i)
        })
        .collect()
}

/// Inlier count and mean inlier residual for a final homography.
fn score(
    h: &Homography,
    points: &[((f64, f64), (f64, f64))],
    threshold: f64,
) -> (usize, f64) {
    let inliers = consensus(h, points, threshold);
    if inliers.is_empty() {
        return (0, f64::INFINITY);
    }
    let total: f64 = inliers
        .iter()
        .filter_map(|&i| {
            let (q, t) = points[i];
            let (px, py) = h.apply(q.0, q.1)?;
            Some((px - t.0).hypot(py - t.1))
        })
        .sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = total / inliers.len() as f64;
    (inliers.len(), mean)
}

/// Direct linear transform over four or more correspondences, with
/// Hartley normalization on both sides.
///
/// Returns `None` when the correspondences do not determine an
/// invertible homography.
#[must_use]
pub fn estimate_homography(points: &[((f64, f64), (f64, f64))]) -> Option<Homography> {
    if points.len() < SAMPLE_SIZE {
        return None;
    }

    let queries: Vec<(f64, f64)> = points.iter().map(|&(q, _)| q).collect();
    let trains: Vec<(f64, f64)> = points.iter().map(|&(_, t)| t).collect();
    let norm_query = Normalization::fit(&queries)?;
    let norm_train = Normalization::fit(&trains)?;

    // The thin SVD only exposes the full right-singular basis when the
    // matrix has at least as many rows as columns; a minimal four-point
    // sample yields eight equations, so keep a padding zero row.
    let rows = (2 * points.len()).max(9);
    let mut a = DMatrix::zeros(rows, 9);
    for (row, &((qx, qy), (tx, ty))) in points.iter().enumerate() {
        let (x, y) = norm_query.apply(qx, qy);
        let (u, v) = norm_train.apply(tx, ty);
        a[(2 * row, 0)] = -x;
        a[(2 * row, 1)] = -y;
        a[(2 * row, 2)] = -1.0;
        a[(2 * row, 6)] = u * x;
        a[(2 * row, 7)] = u * y;
        a[(2 * row, 8)] = u;
        a[(2 * row + 1, 3)] = -x;
        a[(2 * row + 1, 4)] = -y;
        a[(2 * row + 1, 5)] = -1.0;
        a[(2 * row + 1, 6)] = v * x;
        a[(2 * row + 1, 7)] = v * y;
        a[(2 * row + 1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t.as_ref()?;
    let null_row = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)?;
    let h = v_t.row(null_row);

    let normalized = Homography::from_rows([
        h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8],
    ]);

    // Undo the normalization: H = T_train^-1 * H_norm * T_query.
    let denormalized = norm_train
        .inverse()?
        .compose(&normalized)
        .compose(&norm_query.transform());

    denormalized
        .is_invertible()
        .then(|| Homography::from_matrix(&denormalized.to_matrix()))
}

/// Hartley point normalization: centroid at the origin, mean distance
/// sqrt(2).
struct Normalization {
    cx: f64,
    cy: f64,
    scale: f64,
}

impl Normalization {
    fn fit(points: &[(f64, f64)]) -> Option<Self> {
        #[allow(clippy::cast_precision_loss)]
        let n = points.len() as f64;
        let cx = points.iter().map(|p| p.0).sum::<f64>() / n;
        let cy = points.iter().map(|p| p.1).sum::<f64>() / n;
        let mean_dist = points
            .iter()
            .map(|p| (p.0 - cx).hypot(p.1 - cy))
            .sum::<f64>()
            / n;
        if mean_dist < COLLINEAR_EPSILON {
            return None;
        }
        Some(Self {
            cx,
            cy,
            scale: std::f64::consts::SQRT_2 / mean_dist,
        })
    }

    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.cx) * self.scale, (y - self.cy) * self.scale)
    }

    fn transform(&self) -> Homography {
        Homography::from_rows([
            self.scale,
            0.0,
            -self.scale * self.cx,
            0.0,
            self.scale,
            -self.scale * self.cy,
            0.0,
            0.0,
            1.0,
        ])
    }

    fn inverse(&self) -> Option<Homography> {
        self.transform().inverse()
    }
}
