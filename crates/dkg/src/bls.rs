//! BLS threshold signing over the generated shares.
//!
//! Partial signatures are σ_i = share_i · H(payload) on G1; any t of them
//! recover the group signature through Lagrange interpolation at zero, and
//! the result verifies under the master public key with a pairing check.

use std::collections::HashSet;

use bls12_381::{pairing, G1Affine, G1Projective, G2Affine, Scalar};
use ff::Field;
use group::Curve;
use sha2::{Digest, Sha256};

use crate::error::DkgError;

/// Hash arbitrary data to a G1 point.
///
/// Hash-and-multiply construction: the digest is mapped to a scalar which
/// multiplies the generator. Deterministic across all participants.
pub fn hash_to_g1(data: &[u8]) -> G1Affine {
    let mut counter = 0u64;
    loop {
        let mut hasher = Sha256::new();
        hasher.update(b"BLS12381G1_THRESHOLD_SIG:");
        hasher.update(data);
        hasher.update(counter.to_le_bytes());
        let hash = hasher.finalize();

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hash[..32]);

        let scalar = Scalar::from_bytes(&bytes);
        if scalar.is_some().into() {
            return (G1Projective::generator() * scalar.unwrap()).to_affine();
        }
        counter += 1;
    }
}

/// Produce a partial signature with one participant's share.
pub fn partial_sign(share: &Scalar, payload: &[u8]) -> G1Affine {
    let point = hash_to_g1(payload);
    (G1Projective::from(point) * share).to_affine()
}

/// Recover the group signature from partial signatures.
///
/// `partials` pairs each participant index with its partial signature; the
/// evaluation points of the underlying shares are `index + 1`.
pub fn recover_signature(
    partials: &[(u32, G1Affine)],
    threshold: usize,
) -> Result<G1Affine, DkgError> {
    if partials.len() < threshold {
        return Err(DkgError::InsufficientShares {
            required: threshold,
            got: partials.len(),
        });
    }

    let mut seen = HashSet::new();
    for (index, _) in partials {
        if !seen.insert(*index) {
            return Err(DkgError::DuplicateShareIndex(*index));
        }
    }

    let points: Vec<u64> = partials.iter().map(|(index, _)| u64::from(*index) + 1).collect();

    let mut result = G1Projective::identity();
    for (i, (_, sig)) in partials.iter().enumerate() {
        let lambda = lagrange_coefficient_at_zero(points[i], &points)?;
        result += G1Projective::from(*sig) * lambda;
    }

    Ok(result.to_affine())
}

/// Verify a signature against the master public key:
/// e(σ, g2) == e(H(payload), mpk).
pub fn verify_signature(master_pub: &G2Affine, payload: &[u8], signature: &G1Affine) -> bool {
    pairing(signature, &G2Affine::generator()) == pairing(&hash_to_g1(payload), master_pub)
}

/// λ_i = Π_{j≠i} (x_j / (x_j - x_i)), evaluating at zero.
fn lagrange_coefficient_at_zero(x_i: u64, points: &[u64]) -> Result<Scalar, DkgError> {
    let x_i_scalar = Scalar::from(x_i);
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;

    for &x_j in points {
        if x_j == x_i {
            continue;
        }
        let x_j_scalar = Scalar::from(x_j);
        numerator *= x_j_scalar;
        denominator *= x_j_scalar - x_i_scalar;
    }

    let inverted = denominator.invert();
    if inverted.is_none().into() {
        return Err(DkgError::LagrangeInterpolationFailed);
    }
    Ok(numerator * inverted.unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feldman::SecretPolynomial;
    use rand::rngs::OsRng;

    /// Deal shares to n participants; the master public key is the dealt
    /// polynomial's constant-term commitment.
    fn dealt_shares(threshold: u32, n: u32) -> (G2Affine, Vec<(u32, Scalar)>) {
        let polynomial = SecretPolynomial::dealing(threshold, &mut OsRng);
        let master_pub = G2Affine::from_compressed(&polynomial.commitments()[0].0).unwrap();
        let shares = (0..n)
            .map(|index| (index, polynomial.share_for(index)))
            .collect();
        (master_pub, shares)
    }

    #[test]
    fn test_threshold_signature_recovers_and_verifies() {
        let payload = b"message to sign";

        let (master_pub, shares) = dealt_shares(2, 4);
        let partials: Vec<(u32, G1Affine)> = shares
            .iter()
            .map(|(index, share)| (*index, partial_sign(share, payload)))
            .collect();

        // Any two of the four partials recover the same valid signature.
        let sig_a = recover_signature(&partials[..2], 2).unwrap();
        let sig_b = recover_signature(&partials[2..4], 2).unwrap();
        assert_eq!(sig_a, sig_b);
        assert!(verify_signature(&master_pub, payload, &sig_a));
        assert!(!verify_signature(&master_pub, b"different payload", &sig_a));
    }

    #[test]
    fn test_below_threshold_fails_or_does_not_verify() {
        let payload = b"message to sign";

        let (master_pub, shares) = dealt_shares(3, 4);
        let partials: Vec<(u32, G1Affine)> = shares
            .iter()
            .map(|(index, share)| (*index, partial_sign(share, payload)))
            .collect();

        // Too few partials is an error outright.
        assert!(matches!(
            recover_signature(&partials[..2], 3),
            Err(DkgError::InsufficientShares { required: 3, got: 2 })
        ));

        // Interpolating t-1 points as if t-1 were the threshold yields a
        // signature that fails verification.
        let forged = recover_signature(&partials[..2], 2).unwrap();
        assert!(!verify_signature(&master_pub, payload, &forged));
    }

    #[test]
    fn test_duplicate_indices_are_rejected() {
        let (_, shares) = dealt_shares(2, 2);
        let partial = partial_sign(&shares[0].1, b"payload");

        let err = recover_signature(&[(0, partial), (0, partial)], 2).unwrap_err();
        assert!(matches!(err, DkgError::DuplicateShareIndex(0)));
    }

    #[test]
    fn test_hash_to_g1_is_deterministic() {
        assert_eq!(hash_to_g1(b"same input"), hash_to_g1(b"same input"));
        assert_ne!(hash_to_g1(b"one input"), hash_to_g1(b"another input"));
    }
}
