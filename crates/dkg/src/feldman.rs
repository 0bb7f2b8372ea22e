//! Dealing polynomials and their public commitments.
//!
//! Every dealer draws a secret polynomial of degree t-1, publishes one G2
//! commitment per coefficient, and hands participant i the evaluation at
//! that participant's point. Verifiers reconstruct the expected commitment
//! of a share from the published vector alone, so a share proves itself
//! without revealing the polynomial.
//!
//! Quorum indices are zero-based; shares are dealt at `index + 1` so the
//! secret sits untouched at zero.

use bls12_381::{G2Affine, G2Projective, Scalar};
use ff::Field;
use group::Curve;
use rand::{CryptoRng, RngCore};

use coldsign_types::G2Point;

/// The evaluation point of a participant's share.
pub fn evaluation_point(participant_index: u32) -> Scalar {
    Scalar::from(u64::from(participant_index) + 1)
}

/// A dealer's secret polynomial. The constant term is the dealer's
/// contribution to the group secret; it never leaves this struct except as
/// shares and commitments.
pub struct SecretPolynomial {
    coefficients: Vec<Scalar>,
}

impl SecretPolynomial {
    /// Draw a fresh dealing polynomial of degree `threshold - 1` from `rng`.
    pub fn dealing<R: RngCore + CryptoRng>(threshold: u32, rng: &mut R) -> Self {
        assert!(threshold > 0, "a dealing polynomial needs at least one coefficient");
        let coefficients = (0..threshold)
            .map(|_| Scalar::random(&mut *rng))
            .collect();
        Self { coefficients }
    }

    /// Public commitments, one per coefficient: C_k = g2^{a_k}. The vector
    /// is what the dealer broadcasts and later embeds into every deal.
    pub fn commitments(&self) -> Vec<G2Point> {
        self.coefficients
            .iter()
            .map(|coefficient| {
                let point = (G2Projective::generator() * coefficient).to_affine();
                G2Point(point.to_compressed())
            })
            .collect()
    }

    /// The share dealt to one participant.
    pub fn share_for(&self, participant_index: u32) -> Scalar {
        self.evaluate(&evaluation_point(participant_index))
    }

    fn evaluate(&self, x: &Scalar) -> Scalar {
        self.coefficients
            .iter()
            .rev()
            .fold(Scalar::ZERO, |acc, coefficient| acc * x + coefficient)
    }
}

/// Verify a share against a dealer's commitment vector.
///
/// The expected commitment of the share is the polynomial evaluated in the
/// exponent, folded Horner-style over the published points; the share is
/// valid iff g2^{share} lands on it. Undecodable commitments fail closed.
pub fn verify_share(share: &Scalar, participant_index: u32, commitments: &[G2Point]) -> bool {
    let mut points = Vec::with_capacity(commitments.len());
    for commitment in commitments {
        match G2Affine::from_compressed(&commitment.0).into_option() {
            Some(point) => points.push(G2Projective::from(point)),
            None => return false,
        }
    }

    let x = evaluation_point(participant_index);
    let expected = points
        .iter()
        .rev()
        .fold(G2Projective::identity(), |acc, point| acc * x + point);

    G2Projective::generator() * share == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_commitment_vector_length_matches_threshold() {
        let polynomial = SecretPolynomial::dealing(3, &mut OsRng);
        assert_eq!(polynomial.commitments().len(), 3);
    }

    #[test]
    fn test_shares_verify_at_their_own_index() {
        let polynomial = SecretPolynomial::dealing(3, &mut OsRng);
        let commitments = polynomial.commitments();

        for participant_index in 0..5 {
            let share = polynomial.share_for(participant_index);
            assert!(verify_share(&share, participant_index, &commitments));
        }
    }

    #[test]
    fn test_share_does_not_verify_elsewhere() {
        let polynomial = SecretPolynomial::dealing(3, &mut OsRng);
        let commitments = polynomial.commitments();
        let share = polynomial.share_for(1);

        // Right share, wrong participant.
        assert!(!verify_share(&share, 2, &commitments));
        // Tampered share, right participant.
        assert!(!verify_share(&(share + Scalar::ONE), 1, &commitments));
    }

    #[test]
    fn test_threshold_one_deals_a_constant_share() {
        // Degree zero: every participant receives the secret itself.
        let polynomial = SecretPolynomial::dealing(1, &mut OsRng);
        assert_eq!(polynomial.share_for(0), polynomial.share_for(7));
    }

    #[test]
    fn test_garbage_commitments_fail_closed() {
        let polynomial = SecretPolynomial::dealing(2, &mut OsRng);
        let share = polynomial.share_for(0);

        let mut commitments = polynomial.commitments();
        commitments[1] = G2Point([0xFF; 96]);
        assert!(!verify_share(&share, 0, &commitments));
    }
}
