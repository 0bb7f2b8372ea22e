//! Ed25519 keypairs for message authentication.
//!
//! Every node signs its outbound log messages; peers verify against the
//! public keys established by the round's init proposal.

use std::collections::HashMap;
use std::path::PathBuf;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// An Ed25519 signing keypair.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self { signing_key: SigningKey::generate(&mut OsRng) }
    }

    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self { signing_key: SigningKey::from_bytes(secret) }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing_key.sign(data).to_bytes().to_vec()
    }
}

/// Verify an Ed25519 signature; malformed keys or signatures simply fail.
pub fn verify_signature(pub_key: &[u8], data: &[u8], signature: &[u8]) -> bool {
    let Ok(pub_key): Result<[u8; 32], _> = pub_key.try_into() else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pub_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    verifying_key.verify(data, &signature).is_ok()
}

/// Keypair storage keyed by username.
pub trait KeyStore: Send {
    fn load_keys(&self, username: &str) -> Result<KeyPair, ClientError>;
}

/// In-memory keystore for tests; generates a keypair on first use.
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: Mutex<HashMap<String, [u8; 32]>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for InMemoryKeyStore {
    fn load_keys(&self, username: &str) -> Result<KeyPair, ClientError> {
        let mut keys = self.keys.lock();
        let secret = keys
            .entry(username.to_owned())
            .or_insert_with(|| KeyPair::generate().secret_bytes());
        Ok(KeyPair::from_secret_bytes(secret))
    }
}

#[derive(Serialize, Deserialize)]
struct StoredKeyPair {
    username: String,
    pub_key: String,
    secret_key: String,
}

/// One JSON file per username under a directory.
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, username: &str) -> PathBuf {
        self.dir.join(format!("{username}.json"))
    }

    /// Generate and persist a keypair for `username`, overwriting nothing.
    pub fn init(&self, username: &str) -> Result<KeyPair, ClientError> {
        let path = self.path(username);
        if path.exists() {
            return self.load_keys(username);
        }
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| ClientError::KeyStore(format!("failed to create key dir: {e}")))?;

        let keypair = KeyPair::generate();
        let stored = StoredKeyPair {
            username: username.to_owned(),
            pub_key: hex::encode(keypair.public_bytes()),
            secret_key: hex::encode(keypair.secret_bytes()),
        };
        let raw = serde_json::to_vec_pretty(&stored)?;
        std::fs::write(&path, raw)
            .map_err(|e| ClientError::KeyStore(format!("failed to write keys: {e}")))?;
        Ok(keypair)
    }
}

impl KeyStore for FileKeyStore {
    fn load_keys(&self, username: &str) -> Result<KeyPair, ClientError> {
        let raw = std::fs::read(self.path(username))
            .map_err(|e| ClientError::KeyStore(format!("failed to read keys for {username}: {e}")))?;
        let stored: StoredKeyPair = serde_json::from_slice(&raw)?;

        let secret = hex::decode(&stored.secret_key)
            .map_err(|e| ClientError::KeyStore(format!("bad secret key encoding: {e}")))?;
        let secret: [u8; 32] = secret
            .as_slice()
            .try_into()
            .map_err(|_| ClientError::KeyStore("secret key has wrong length".into()))?;
        Ok(KeyPair::from_secret_bytes(&secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate();
        let signature = keypair.sign(b"canonical message bytes");

        assert!(verify_signature(
            &keypair.public_bytes(),
            b"canonical message bytes",
            &signature
        ));
        assert!(!verify_signature(
            &keypair.public_bytes(),
            b"different bytes",
            &signature
        ));
    }

    #[test]
    fn test_corrupted_signature_fails() {
        let keypair = KeyPair::generate();
        let mut signature = keypair.sign(b"payload");
        signature[0] ^= 0xFF;

        assert!(!verify_signature(&keypair.public_bytes(), b"payload", &signature));
    }

    #[test]
    fn test_malformed_inputs_fail_closed() {
        assert!(!verify_signature(b"short", b"payload", &[0u8; 64]));
        assert!(!verify_signature(&[0u8; 32], b"payload", b"short"));
    }

    #[test]
    fn test_in_memory_store_is_stable_per_username() {
        let store = InMemoryKeyStore::new();
        let a = store.load_keys("alice").unwrap();
        let b = store.load_keys("alice").unwrap();
        let c = store.load_keys("bob").unwrap();

        assert_eq!(a.public_bytes(), b.public_bytes());
        assert_ne!(a.public_bytes(), c.public_bytes());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path());

        let created = store.init("alice").unwrap();
        let loaded = store.load_keys("alice").unwrap();
        assert_eq!(created.public_bytes(), loaded.public_bytes());

        // init is idempotent.
        let again = store.init("alice").unwrap();
        assert_eq!(created.public_bytes(), again.public_bytes());
    }
}
