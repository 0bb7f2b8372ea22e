//! Encryption at rest for the offline key store.
//!
//! The AEAD key is derived from the operator-supplied encryption key and a
//! per-save salt through HKDF-SHA256. Each ciphertext carries its own random
//! nonce prefix; the salt is stored next to the ciphertexts and rotates on
//! every key save.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;

use crate::error::MachineError;

const NONCE_LEN: usize = 12;

fn derive_key(encryption_key: &[u8], salt: &[u8]) -> Result<[u8; 32], MachineError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), encryption_key);
    let mut key = [0u8; 32];
    hk.expand(b"AT-REST-KEY", &mut key)
        .map_err(|_| MachineError::EncryptFailed("key derivation failed".into()))?;
    Ok(key)
}

/// Encrypt `plaintext` under `(encryption_key, salt)`; output is
/// `nonce (12) || ciphertext`.
pub fn encrypt(
    encryption_key: &[u8],
    salt: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, MachineError> {
    let key = derive_key(encryption_key, salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| MachineError::EncryptFailed(format!("failed to create cipher: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| MachineError::EncryptFailed(format!("AES-GCM encryption failed: {e}")))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a blob produced by [`encrypt`] under the same key and salt.
pub fn decrypt(
    encryption_key: &[u8],
    salt: &[u8],
    blob: &[u8],
) -> Result<Vec<u8>, MachineError> {
    if blob.len() <= NONCE_LEN {
        return Err(MachineError::DecryptFailed("ciphertext is truncated".into()));
    }

    let key = derive_key(encryption_key, salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| MachineError::DecryptFailed(format!("failed to create cipher: {e}")))?;

    let nonce = Nonce::from_slice(&blob[..NONCE_LEN]);
    cipher
        .decrypt(nonce, &blob[NONCE_LEN..])
        .map_err(|_| MachineError::DecryptFailed("AES-GCM authentication failed".into()))
}
