//! Global alignment: per-image transforms into a shared reference frame.
//!
//! The middle image of the sequence anchors the panorama, which halves
//! the worst-case chain length compared to anchoring at an end and keeps
//! accumulated projective drift symmetric. Every other image's global
//! transform is the composition of pairwise transforms along the chain
//! toward the reference.

use crate::register::PairwiseTransform;
use crate::transform::Homography;
use crate::types::StitchError;

/// Per-image transforms into the reference image's frame.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalAlignment {
    /// Index of the reference image; its transform is the identity.
    pub reference: usize,
    /// One transform per image, mapping that image's coordinates into
    /// the reference frame.
    pub transforms: Vec<Homography>,
}

impl GlobalAlignment {
    /// Number of aligned images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Whether the alignment covers no images.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

/// The reference image for a sequence of `image_count` images: the
/// middle one, rounding down for even counts.
#[must_use]
pub const fn reference_index(image_count: usize) -> usize {
    image_count / 2
}

/// Compose pairwise transforms into per-image global transforms.
///
/// Pairwise transform `i` maps image `i` into image `i + 1`. For an
/// image left of the reference the chain runs forward; for an image
/// right of the reference it runs through inverses. Compositions are
/// built incrementally outward from the reference so each chain link is
/// multiplied exactly once.
///
/// # Errors
///
/// Returns [`StitchError::DegenerateChain`] when any pairwise transform
/// along a chain is singular, whether it is used forward or inverted.
/// Identity is never substituted for a degenerate link.
pub fn align(pairwise: &[PairwiseTransform]) -> Result<GlobalAlignment, StitchError> {
    let image_count = pairwise.len() + 1;
    let reference = reference_index(image_count);
    let mut transforms = vec![Homography::identity(); image_count];

    // Left of the reference: global_i = P_{ref-1} * ... * P_i. Forward
    // links are used as-is, but a singular one still poisons the chain.
    for i in (0..reference).rev() {
        let forward = &pairwise[i].homography;
        if !forward.is_invertible() {
            return Err(StitchError::DegenerateChain { index: i });
        }
        transforms[i] = transforms[i + 1].compose(forward);
    }

    // Right of the reference: global_i = global_{i-1} * P_{i-1}^-1.
    for i in reference + 1..image_count {
        let inverse = pairwise[i - 1]
            .homography
            .inverse()
            .ok_or(StitchError::DegenerateChain { index: i - 1 })?;
        transforms[i] = transforms[i - 1].compose(&inverse);
    }

    Ok(GlobalAlignment {
        reference,
        transforms,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::transform::Homography;

    fn pairwise(h: Homography) -> PairwiseTransform {
        PairwiseTransform {
            homography: h,
            match_count: 50,
            inlier_count: 45,
            mean_residual: 0.3,
            confidence: 0.9,
        }
    }

    #[test]
    fn middle_reference_rounds_down_for_even_counts() {
        assert_eq!(reference_index(2), 1);
        assert_eq!(reference_index(3), 1);
        assert_eq!(reference_index(4), 2);
        assert_eq!(reference_index(5), 2);
    }

    #[test]
    fn reference_transform_is_identity() {
        let pairs = vec![
            pairwise(Homography::translation(100.0, 0.0)),
            pairwise(Homography::translation(100.0, 0.0)),
        ];
        let alignment = align(&pairs).unwrap();
        assert_eq!(alignment.reference, 1);
        assert_eq!(alignment.transforms[1], Homography::identity());
    }

    #[test]
    fn translations_chain_outward_from_reference() {
        // Each image sits 100 px right of the next; P_i maps image i
        // into image i+1 as a +100 x-shift.
        let shift = Homography::translation(100.0, 0.0);
        let pairs = vec![pairwise(shift), pairwise(shift), pairwise(shift), pairwise(shift)];
        let alignment = align(&pairs).unwrap();
        assert_eq!(alignment.reference, 2);

        let expected = [200.0, 100.0, 0.0, -100.0, -200.0];
        for (transform, tx) in alignment.transforms.iter().zip(expected) {
            let (x, y) = transform.apply(0.0, 0.0).unwrap();
            assert!((x - tx).abs() < 1e-9, "expected tx {tx}, got {x}");
            assert!(y.abs() < 1e-9);
        }
    }

    #[test]
    fn pairwise_law_holds_through_global_transforms() {
        // global_i == global_{i+1} * P_i for every chain link.
        let pairs = vec![
            pairwise(Homography::from_rows([
                1.02, 0.01, 40.0, -0.02, 0.99, 3.0, 1e-5, 0.0, 1.0,
            ])),
            pairwise(Homography::from_rows([
                0.98, -0.015, 55.0, 0.01, 1.01, -4.0, 0.0, 2e-5, 1.0,
            ])),
            pairwise(Homography::translation(60.0, -2.0)),
        ];
        let alignment = align(&pairs).unwrap();

        for (i, pair) in pairs.iter().enumerate() {
            let lhs = &alignment.transforms[i];
            let rhs = alignment.transforms[i + 1].compose(&pair.homography);
            for &(x, y) in &[(0.0, 0.0), (320.0, 240.0), (17.0, 201.0)] {
                let a = lhs.apply(x, y).unwrap();
                let b = rhs.apply(x, y).unwrap();
                assert!((a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn singular_pairwise_right_of_reference_is_degenerate() {
        let pairs = vec![
            pairwise(Homography::translation(10.0, 0.0)),
            pairwise(Homography::from_rows([0.0; 9])),
        ];
        // Reference is image 1; pair 1 must be inverted and cannot be.
        assert_eq!(
            align(&pairs).unwrap_err(),
            StitchError::DegenerateChain { index: 1 },
        );
    }

    #[test]
    fn singular_pairwise_left_of_reference_is_degenerate() {
        let pairs = vec![
            pairwise(Homography::from_rows([0.0; 9])),
            pairwise(Homography::translation(10.0, 0.0)),
        ];
        // Reference is image 1; pair 0 is a forward link in the chain
        // for image 0 and is singular.
        assert_eq!(
            align(&pairs).unwrap_err(),
            StitchError::DegenerateChain { index: 0 },
        );
    }

    #[test]
    fn two_images_align_to_the_second() {
        let pairs = vec![pairwise(Homography::translation(75.0, 5.0))];
        let alignment = align(&pairs).unwrap();
        assert_eq!(alignment.reference, 1);
        let (x, y) = alignment.transforms[0].apply(0.0, 0.0).unwrap();
        assert!((x - 75.0).abs() < 1e-9 && (y - 5.0).abs() < 1e-9);
        assert_eq!(alignment.transforms[1], Homography::identity());
    }
}
