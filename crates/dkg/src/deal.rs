//! Deals: encrypted verifiable shares addressed to one recipient.
//!
//! A deal carries the dealer's commitment vector alongside the share
//! ciphertext, so the verifier can check it element-wise against the commits
//! the dealer broadcast earlier. Shares are encrypted to the recipient's
//! suite public key: an ephemeral Diffie-Hellman on G2 derives an AES-256-GCM
//! key through HKDF.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use bls12_381::{G2Affine, G2Projective, Scalar};
use ff::Field;
use group::Curve;
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use coldsign_types::G2Point;

use crate::error::DkgError;

const EPHEMERAL_LEN: usize = 96;
const NONCE_LEN: usize = 12;

/// A dealer's verifiable share for one recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    /// Index of the dealer.
    pub dealer: u32,
    /// Index of the recipient the share is encrypted to.
    pub recipient: u32,
    /// The dealer's commitment polynomial, embedded for verification.
    pub commitments: Vec<G2Point>,
    /// `ephemeral_pub (96) || nonce (12) || ciphertext`.
    pub encrypted_share: Vec<u8>,
}

/// Encrypt a share to the recipient's suite public key.
pub fn encrypt_share<R: RngCore + CryptoRng>(
    recipient_pub: &G2Affine,
    share: &Scalar,
    rng: &mut R,
) -> Result<Vec<u8>, DkgError> {
    let ephemeral = Scalar::random(&mut *rng);
    let ephemeral_pub = (G2Projective::generator() * ephemeral).to_affine();
    let shared = (G2Projective::from(*recipient_pub) * ephemeral).to_affine();

    let key = derive_deal_key(&shared)?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| DkgError::EncryptFailed(format!("failed to create cipher: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, share.to_bytes().as_ref())
        .map_err(|e| DkgError::EncryptFailed(format!("AES-GCM encryption failed: {e}")))?;

    let mut blob = Vec::with_capacity(EPHEMERAL_LEN + NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&ephemeral_pub.to_compressed());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a share with the recipient's suite secret key.
pub fn decrypt_share(secret: &Scalar, blob: &[u8]) -> Result<Scalar, DkgError> {
    if blob.len() <= EPHEMERAL_LEN + NONCE_LEN {
        return Err(DkgError::DecryptFailed("deal ciphertext is truncated".into()));
    }

    let mut ephemeral_bytes = [0u8; EPHEMERAL_LEN];
    ephemeral_bytes.copy_from_slice(&blob[..EPHEMERAL_LEN]);
    let ephemeral_pub = G2Affine::from_compressed(&ephemeral_bytes)
        .into_option()
        .ok_or(DkgError::InvalidG2Point)?;

    let shared = (G2Projective::from(ephemeral_pub) * secret).to_affine();
    let key = derive_deal_key(&shared)?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| DkgError::DecryptFailed(format!("failed to create cipher: {e}")))?;

    let nonce = Nonce::from_slice(&blob[EPHEMERAL_LEN..EPHEMERAL_LEN + NONCE_LEN]);
    let plaintext = cipher
        .decrypt(nonce, &blob[EPHEMERAL_LEN + NONCE_LEN..])
        .map_err(|_| DkgError::DecryptFailed("AES-GCM authentication failed".into()))?;

    let share_bytes: [u8; 32] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| DkgError::InvalidScalar)?;
    Scalar::from_bytes(&share_bytes)
        .into_option()
        .ok_or(DkgError::InvalidScalar)
}

fn derive_deal_key(shared: &G2Affine) -> Result<[u8; 32], DkgError> {
    let hk = Hkdf::<Sha256>::new(None, &shared.to_compressed());
    let mut key = [0u8; 32];
    hk.expand(b"DEAL-SHARE-KEY", &mut key)
        .map_err(|_| DkgError::EncryptFailed("key derivation failed".into()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn keypair() -> (Scalar, G2Affine) {
        let secret = Scalar::random(&mut OsRng);
        let public = (G2Projective::generator() * secret).to_affine();
        (secret, public)
    }

    #[test]
    fn test_share_encryption_roundtrip() {
        let mut rng = OsRng;
        let (secret, public) = keypair();
        let share = Scalar::random(&mut rng);

        let blob = encrypt_share(&public, &share, &mut rng).unwrap();
        let decrypted = decrypt_share(&secret, &blob).unwrap();
        assert_eq!(decrypted, share);
    }

    #[test]
    fn test_wrong_recipient_key_fails() {
        let mut rng = OsRng;
        let (_, public) = keypair();
        let (other_secret, _) = keypair();
        let share = Scalar::random(&mut rng);

        let blob = encrypt_share(&public, &share, &mut rng).unwrap();
        assert!(matches!(
            decrypt_share(&other_secret, &blob),
            Err(DkgError::DecryptFailed(_))
        ));
    }

    #[test]
    fn test_truncated_blob_fails() {
        let (secret, _) = keypair();
        assert!(matches!(
            decrypt_share(&secret, &[0u8; 40]),
            Err(DkgError::DecryptFailed(_))
        ));
    }

    #[test]
    fn test_deal_roundtrip() {
        let deal = Deal {
            dealer: 1,
            recipient: 2,
            commitments: vec![G2Point([3u8; 96]), G2Point([4u8; 96])],
            encrypted_share: vec![5, 6, 7],
        };
        let encoded = serde_json::to_vec(&deal).unwrap();
        let decoded: Deal = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(deal, decoded);
    }
}
