//! `SecretStore` is the assumed-external collaborator for credential
//! encryption at rest (spec §1, §6). This crate still ships one concrete
//! default so C1 is exercisable end-to-end: AES-256-GCM over a key derived
//! from `WALLET_ENCRYPTION_KEY`, the same algorithm family the corpus's
//! "Secure wallet management" section reaches for
//! (`other_examples/manifests/tom14cat14-elite-mev-bot`).

use crate::error::VaultError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

/// `decrypt(blob) -> bytes` / `encrypt(bytes) -> blob` (spec §6). Implementors
/// own a process-wide key loaded at startup; this trait never exposes that
/// key to callers.
pub trait SecretStore: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError>;
    fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, VaultError>;
}

/// Default `SecretStore`: AES-256-GCM with a random 96-bit nonce prefixed to
/// the ciphertext. The process-wide key is derived by hashing the configured
/// `WALLET_ENCRYPTION_KEY` string down to 32 bytes.
pub struct AesGcmSecretStore {
    cipher: Aes256Gcm,
}

impl AesGcmSecretStore {
    pub fn new(key_material: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key_material.as_bytes());
        let key = hasher.finalize();
        let cipher = Aes256Gcm::new_from_slice(&key).expect("sha256 output is always 32 bytes");
        Self { cipher }
    }
}

impl SecretStore for AesGcmSecretStore {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| VaultError::EncryptFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, VaultError> {
        if blob.len() < NONCE_LEN {
            return Err(VaultError::MalformedKey);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::DecryptFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plaintext() {
        let store = AesGcmSecretStore::new("a test encryption key");
        let plaintext = b"a base58 keypair's 64 secret bytes go here, or close enough";
        let blob = store.encrypt(plaintext).unwrap();
        assert_ne!(blob, plaintext);
        let recovered = store.decrypt(&blob).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let store = AesGcmSecretStore::new("another key");
        let mut blob = store.encrypt(b"secret").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert!(store.decrypt(&blob).is_err());
    }

    #[test]
    fn rejects_blob_shorter_than_nonce() {
        let store = AesGcmSecretStore::new("k");
        assert!(store.decrypt(&[1, 2, 3]).is_err());
    }
}
